use common::conn::{BoxFuture, BoxStream};

use proto::consts::{BlockHeight, TokenAmount};
use proto::crypto::{Address, ChannelId, Secret, SecretHash};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger node could not be reached. The call may succeed later.
    Unreachable,
    /// The transaction was mined but failed.
    TransactionFailed,
    ChannelNotFound,
}

/// Access to the ledger and to the contracts of the payment network.
///
/// Every call may fail transiently. Callers decide whether to retry.
pub trait LedgerClient: Send + Sync {
    fn current_block_height(&self) -> BoxFuture<'_, Result<BlockHeight, LedgerError>>;

    /// A stream of the heights of newly mined blocks.
    /// The stream ends if the subscription breaks.
    fn subscribe_new_heads(
        &self,
    ) -> BoxFuture<'_, Result<BoxStream<'static, BlockHeight>, LedgerError>>;

    fn open_channel(
        &self,
        token_network: Address,
        partner: Address,
        settle_timeout: BlockHeight,
    ) -> BoxFuture<'_, Result<ChannelId, LedgerError>>;

    /// Add `amount` to our deposit in a channel.
    fn deposit(
        &self,
        token_network: Address,
        channel_id: ChannelId,
        amount: TokenAmount,
    ) -> BoxFuture<'_, Result<(), LedgerError>>;

    /// Close a channel, submitting the latest balance proof we received from `partner`.
    fn close_channel(
        &self,
        token_network: Address,
        channel_id: ChannelId,
        partner: Address,
    ) -> BoxFuture<'_, Result<(), LedgerError>>;

    fn register_secret(&self, secret: Secret) -> BoxFuture<'_, Result<(), LedgerError>>;

    /// Unlock a pending lock of `partner` whose secret was registered on-chain.
    fn unlock(
        &self,
        token_network: Address,
        channel_id: ChannelId,
        partner: Address,
        secret_hash: SecretHash,
    ) -> BoxFuture<'_, Result<(), LedgerError>>;
}

use serde::{Deserialize, Serialize};

use crate::consts::{BlockHeight, Nonce, TokenAmount};
use crate::crypto::{Address, ChannelId, Locksroot, Secret, SecretHash};

/// A hash time lock: `amount` tokens are claimable by revealing the preimage of
/// `secret_hash` before block `expiration`.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Lock {
    pub amount: TokenAmount,
    pub expiration: BlockHeight,
    pub secret_hash: SecretHash,
}

/// Commitment of the sender of a channel direction to its current balances.
/// The signature over this data is added and checked by the envelope layer.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct BalanceProof {
    pub token_network: Address,
    pub channel_id: ChannelId,
    pub nonce: Nonce,
    /// Total amount ever transferred (unlocked) by the sender.
    pub transferred_amount: TokenAmount,
    /// Sum of all currently pending locks of the sender.
    pub locked_amount: TokenAmount,
    pub locksroot: Locksroot,
}

/// A conditional payment sent to the next hop.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct LockedTransfer {
    pub payment_id: u64,
    pub initiator: Address,
    pub target: Address,
    pub sender: Address,
    pub recipient: Address,
    pub lock: Lock,
    pub balance_proof: BalanceProof,
}

/// Sent by the target to the initiator, asking for the secret of a lock.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SecretRequest {
    pub payment_id: u64,
    pub secret_hash: SecretHash,
    pub amount: TokenAmount,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RevealSecret {
    pub secret: Secret,
}

/// Removes a lock whose secret is known, moving its amount into the transferred amount.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct Unlock {
    pub payment_id: u64,
    pub secret: Secret,
    pub balance_proof: BalanceProof,
}

/// Removes an expired lock, without transferring its amount.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RemoveExpiredLock {
    pub secret_hash: SecretHash,
    pub balance_proof: BalanceProof,
}

/// Sent by the receiver of a lock to its sender: the receiver gives up on the lock and
/// will never claim it.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceDisposed {
    pub channel_id: ChannelId,
    pub lock: Lock,
}

#[allow(clippy::large_enum_variant)]
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    LockedTransfer(LockedTransfer),
    SecretRequest(SecretRequest),
    RevealSecret(RevealSecret),
    Unlock(Unlock),
    RemoveExpiredLock(RemoveExpiredLock),
    AnnounceDisposed(AnnounceDisposed),
}

/// Description of a locked transfer, as seen by one of the nodes along the route.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct LockedTransferState {
    pub payment_id: u64,
    pub token_network: Address,
    pub amount: TokenAmount,
    pub initiator: Address,
    pub target: Address,
    pub expiration: BlockHeight,
    pub secret_hash: SecretHash,
    /// Only known to the initiator at creation time.
    pub opt_secret: Option<Secret>,
}

impl LockedTransferState {
    pub fn lock(&self) -> Lock {
        Lock {
            amount: self.amount,
            expiration: self.expiration,
            secret_hash: self.secret_hash,
        }
    }

    /// State of the transfer as received by the next hop inside a locked transfer message.
    pub fn from_locked_transfer(locked_transfer: &LockedTransfer) -> Self {
        LockedTransferState {
            payment_id: locked_transfer.payment_id,
            token_network: locked_transfer.balance_proof.token_network,
            amount: locked_transfer.lock.amount,
            initiator: locked_transfer.initiator,
            target: locked_transfer.target,
            expiration: locked_transfer.lock.expiration,
            secret_hash: locked_transfer.lock.secret_hash,
            opt_secret: None,
        }
    }
}

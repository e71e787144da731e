use crypto::hash_lock::HashLock;

use proto::consts::{BlockHeight, TokenAmount};
use proto::crypto::{Address, ChannelId, Secret, SecretHash};
use proto::state_change::{Block, StateChange};
use proto::transfer::events::Event;
use proto::transfer::messages::{BalanceProof, Lock, LockedTransfer, LockedTransferState};
use proto::transfer::route::RouteState;

pub const TOKEN_NETWORK: u8 = 0xaa;
pub const REVEAL_TIMEOUT: BlockHeight = 5;

pub fn address(seed: u8) -> Address {
    Address::from(&[seed; Address::len()])
}

pub fn channel_id(seed: u8) -> ChannelId {
    ChannelId::from(&[seed; ChannelId::len()])
}

pub fn secret(seed: u8) -> Secret {
    Secret::from(&[seed; Secret::len()])
}

pub fn secret_hash(seed: u8) -> SecretHash {
    secret(seed).hash_lock()
}

/// A route to the node `seed`, through the channel `seed`.
pub fn route(seed: u8, available_balance: TokenAmount) -> RouteState {
    RouteState {
        node_address: address(seed),
        channel_id: channel_id(seed),
        available_balance,
        reveal_timeout: REVEAL_TIMEOUT,
        settle_timeout: 100,
        opt_closed_block: None,
    }
}

pub fn block(block_number: BlockHeight) -> StateChange {
    StateChange::Block(Block { block_number })
}

/// A transfer of `amount` from node 1 to node 9, locked on secret 7.
pub fn transfer_state(amount: TokenAmount, expiration: BlockHeight) -> LockedTransferState {
    LockedTransferState {
        payment_id: 0x1234,
        token_network: address(TOKEN_NETWORK),
        amount,
        initiator: address(1),
        target: address(9),
        expiration,
        secret_hash: secret_hash(7),
        opt_secret: None,
    }
}

/// A locked transfer from `sender` to `recipient`, through the channel `sender`.
pub fn locked_transfer(
    sender: u8,
    recipient: u8,
    amount: TokenAmount,
    expiration: BlockHeight,
) -> LockedTransfer {
    let transfer = transfer_state(amount, expiration);
    LockedTransfer {
        payment_id: transfer.payment_id,
        initiator: transfer.initiator,
        target: transfer.target,
        sender: address(sender),
        recipient: address(recipient),
        lock: Lock {
            amount,
            expiration,
            secret_hash: transfer.secret_hash,
        },
        balance_proof: BalanceProof {
            token_network: transfer.token_network,
            channel_id: channel_id(sender),
            nonce: 1,
            transferred_amount: 0,
            locked_amount: amount,
            locksroot: Default::default(),
        },
    }
}

pub fn has_notice(events: &[Event]) -> bool {
    events.iter().any(|event| match event {
        Event::Notice { .. } => true,
        _ => false,
    })
}

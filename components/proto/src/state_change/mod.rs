//! The closed set of facts the node reacts to.
//!
//! A state change is created once, handed to the state machines that are interested in it and
//! then discarded. Chain-derived state changes carry the block at which the ledger event
//! happened. For a fixed channel they must be delivered in the order of these blocks, and the
//! settlement of a channel is never delivered before its closing.

use serde::{Deserialize, Serialize};

use crate::consts::{BlockHeight, Nonce, TokenAmount};
use crate::crypto::{Address, ChannelId, Secret, SecretHash};
use crate::transfer::messages::{Lock, LockedTransfer, LockedTransferState, RemoveExpiredLock, Unlock};
use crate::transfer::route::RouteState;

/// A new block was mined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub block_number: BlockHeight,
}

/// The user asked us to pay `transfer.amount` to `transfer.target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionInitInitiator {
    pub our_address: Address,
    /// Contains the secret, which is only known to us.
    pub transfer: LockedTransferState,
    pub routes: Vec<RouteState>,
}

/// A locked transfer arrived, and we are not its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionInitMediator {
    pub our_address: Address,
    /// The channel the transfer arrived on.
    pub from_route: RouteState,
    pub from_transfer: LockedTransfer,
    /// Candidates for forwarding the transfer.
    pub routes: Vec<RouteState>,
}

/// A locked transfer arrived, and we are its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionInitTarget {
    pub our_address: Address,
    pub from_route: RouteState,
    pub from_transfer: LockedTransfer,
}

/// The channel refused to carry the locked transfer we tried to send on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCancelRoute {
    pub secret_hash: SecretHash,
    pub channel_id: ChannelId,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveSecretRequest {
    pub sender: Address,
    pub payment_id: u64,
    pub amount: TokenAmount,
    pub secret_hash: SecretHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveSecretReveal {
    pub sender: Address,
    pub secret: Secret,
    /// Hash of `secret`, computed on arrival.
    pub secret_hash: SecretHash,
}

/// The receiver of one of our locks announced that it gave up on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveAnnounceDisposed {
    pub sender: Address,
    pub channel_id: ChannelId,
    pub lock: Lock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BalanceProofKind {
    Unlock(Unlock),
    RemoveExpiredLock(RemoveExpiredLock),
}

/// A message updating the committed state of a channel on the sender's side.
/// A locked transfer is also such a message, but it arrives through `ActionInitMediator` or
/// `ActionInitTarget`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveBalanceProof {
    pub sender: Address,
    /// The lock the message refers to.
    pub secret_hash: SecretHash,
    pub kind: BalanceProofKind,
}

/// A state change derived from a ledger event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractStateChange {
    TokenNetworkCreated {
        token_address: Address,
        token_network: Address,
        block_number: BlockHeight,
    },
    ChannelOpened {
        token_network: Address,
        channel_id: ChannelId,
        participant1: Address,
        participant2: Address,
        settle_timeout: BlockHeight,
        block_number: BlockHeight,
    },
    ChannelNewDeposit {
        token_network: Address,
        channel_id: ChannelId,
        participant: Address,
        total_deposit: TokenAmount,
        block_number: BlockHeight,
    },
    ChannelWithdrawn {
        token_network: Address,
        channel_id: ChannelId,
        participant: Address,
        total_withdraw: TokenAmount,
        block_number: BlockHeight,
    },
    ChannelClosed {
        token_network: Address,
        channel_id: ChannelId,
        closing_participant: Address,
        block_number: BlockHeight,
    },
    /// A participant submitted the balance proof of its partner after the channel was closed.
    BalanceProofUpdated {
        token_network: Address,
        channel_id: ChannelId,
        participant: Address,
        nonce: Nonce,
        block_number: BlockHeight,
    },
    ChannelSettled {
        token_network: Address,
        channel_id: ChannelId,
        block_number: BlockHeight,
    },
    /// Both participants agreed to settle the channel without a dispute window.
    ChannelCooperativeSettled {
        token_network: Address,
        channel_id: ChannelId,
        participant1_amount: TokenAmount,
        participant2_amount: TokenAmount,
        block_number: BlockHeight,
    },
    /// A pending lock of `participant` was unlocked on-chain.
    ChannelUnlocked {
        token_network: Address,
        channel_id: ChannelId,
        participant: Address,
        secret_hash: SecretHash,
        transferred_amount: TokenAmount,
        block_number: BlockHeight,
    },
    SecretRegistered {
        secret: Secret,
        secret_hash: SecretHash,
        block_number: BlockHeight,
    },
}

impl ContractStateChange {
    pub fn block_number(&self) -> BlockHeight {
        match self {
            ContractStateChange::TokenNetworkCreated { block_number, .. }
            | ContractStateChange::ChannelOpened { block_number, .. }
            | ContractStateChange::ChannelNewDeposit { block_number, .. }
            | ContractStateChange::ChannelWithdrawn { block_number, .. }
            | ContractStateChange::ChannelClosed { block_number, .. }
            | ContractStateChange::BalanceProofUpdated { block_number, .. }
            | ContractStateChange::ChannelSettled { block_number, .. }
            | ContractStateChange::ChannelCooperativeSettled { block_number, .. }
            | ContractStateChange::ChannelUnlocked { block_number, .. }
            | ContractStateChange::SecretRegistered { block_number, .. } => *block_number,
        }
    }

    /// The channel this state change is about, if any.
    pub fn opt_channel_id(&self) -> Option<&ChannelId> {
        match self {
            ContractStateChange::ChannelOpened { channel_id, .. }
            | ContractStateChange::ChannelNewDeposit { channel_id, .. }
            | ContractStateChange::ChannelWithdrawn { channel_id, .. }
            | ContractStateChange::ChannelClosed { channel_id, .. }
            | ContractStateChange::BalanceProofUpdated { channel_id, .. }
            | ContractStateChange::ChannelSettled { channel_id, .. }
            | ContractStateChange::ChannelCooperativeSettled { channel_id, .. }
            | ContractStateChange::ChannelUnlocked { channel_id, .. } => Some(channel_id),
            ContractStateChange::TokenNetworkCreated { .. }
            | ContractStateChange::SecretRegistered { .. } => None,
        }
    }

    pub fn opt_token_network(&self) -> Option<&Address> {
        match self {
            ContractStateChange::TokenNetworkCreated { token_network, .. }
            | ContractStateChange::ChannelOpened { token_network, .. }
            | ContractStateChange::ChannelNewDeposit { token_network, .. }
            | ContractStateChange::ChannelWithdrawn { token_network, .. }
            | ContractStateChange::ChannelClosed { token_network, .. }
            | ContractStateChange::BalanceProofUpdated { token_network, .. }
            | ContractStateChange::ChannelSettled { token_network, .. }
            | ContractStateChange::ChannelCooperativeSettled { token_network, .. }
            | ContractStateChange::ChannelUnlocked { token_network, .. } => Some(token_network),
            ContractStateChange::SecretRegistered { .. } => None,
        }
    }

    /// Does this state change end the life of a channel on-chain?
    pub fn is_settlement(&self) -> bool {
        match self {
            ContractStateChange::ChannelSettled { .. } => true,
            _ => false,
        }
    }

    pub fn is_close(&self) -> bool {
        match self {
            ContractStateChange::ChannelClosed { .. } => true,
            _ => false,
        }
    }
}

#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateChange {
    Block(Block),
    ActionInitInitiator(ActionInitInitiator),
    ActionInitMediator(ActionInitMediator),
    ActionInitTarget(ActionInitTarget),
    ActionCancelRoute(ActionCancelRoute),
    ReceiveSecretRequest(ReceiveSecretRequest),
    ReceiveSecretReveal(ReceiveSecretReveal),
    ReceiveAnnounceDisposed(ReceiveAnnounceDisposed),
    ReceiveBalanceProof(ReceiveBalanceProof),
    Contract(ContractStateChange),
}

impl StateChange {
    /// Chain-derived state changes carry the block of the underlying ledger event.
    pub fn opt_block_number(&self) -> Option<BlockHeight> {
        match self {
            StateChange::Block(block) => Some(block.block_number),
            StateChange::Contract(contract_state_change) => {
                Some(contract_state_change.block_number())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_state_change_accessors() {
        let channel_id = ChannelId::from(&[1; ChannelId::len()]);
        let token_network = Address::from(&[2; Address::len()]);

        let closed = ContractStateChange::ChannelClosed {
            token_network,
            channel_id,
            closing_participant: Address::from(&[3; Address::len()]),
            block_number: 17,
        };
        assert_eq!(closed.block_number(), 17);
        assert_eq!(closed.opt_channel_id(), Some(&channel_id));
        assert_eq!(closed.opt_token_network(), Some(&token_network));
        assert!(closed.is_close());
        assert!(!closed.is_settlement());

        let secret_registered = ContractStateChange::SecretRegistered {
            secret: Secret::from(&[4; Secret::len()]),
            secret_hash: SecretHash::from(&[5; SecretHash::len()]),
            block_number: 3,
        };
        assert!(secret_registered.opt_channel_id().is_none());
        assert_eq!(
            StateChange::Contract(secret_registered).opt_block_number(),
            Some(3)
        );
    }

    #[test]
    fn test_state_change_serde() {
        let state_change = StateChange::Contract(ContractStateChange::ChannelSettled {
            token_network: Address::from(&[2; Address::len()]),
            channel_id: ChannelId::from(&[1; ChannelId::len()]),
            block_number: 99,
        });
        let ser = serde_json::to_string(&state_change).unwrap();
        let state_change2: StateChange = serde_json::from_str(&ser).unwrap();
        assert_eq!(state_change, state_change2);
    }
}

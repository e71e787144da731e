use serde::{Deserialize, Serialize};

use crate::consts::{BlockHeight, TokenAmount};
use crate::crypto::{Address, ChannelId, Secret, SecretHash};
use crate::notify::messages::{NoticeLevel, TransferStatus};
use crate::transfer::messages::{Lock, LockedTransferState};

/// Request to send a new locked transfer through our side of a channel.
/// The balance proof is filled in by the channel when the request is executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendLockedTransfer {
    pub recipient: Address,
    pub channel_id: ChannelId,
    pub transfer: LockedTransferState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendSecretRequest {
    pub recipient: Address,
    pub payment_id: u64,
    pub amount: TokenAmount,
    pub secret_hash: SecretHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRevealSecret {
    pub recipient: Address,
    pub secret: Secret,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendUnlock {
    pub recipient: Address,
    pub channel_id: ChannelId,
    pub payment_id: u64,
    pub secret: Secret,
    pub secret_hash: SecretHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRemoveExpiredLock {
    pub recipient: Address,
    pub channel_id: ChannelId,
    pub secret_hash: SecretHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendAnnounceDisposed {
    pub recipient: Address,
    pub channel_id: ChannelId,
    pub lock: Lock,
}

/// An on-chain call. Every call carries the last block at which it is still useful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractSend {
    RegisterSecret {
        secret: Secret,
        deadline: BlockHeight,
    },
    ChannelClose {
        token_network: Address,
        channel_id: ChannelId,
        partner: Address,
        deadline: BlockHeight,
    },
    Unlock {
        token_network: Address,
        channel_id: ChannelId,
        partner: Address,
        secret_hash: SecretHash,
        deadline: BlockHeight,
    },
}

impl ContractSend {
    pub fn deadline(&self) -> BlockHeight {
        match self {
            ContractSend::RegisterSecret { deadline, .. }
            | ContractSend::ChannelClose { deadline, .. }
            | ContractSend::Unlock { deadline, .. } => *deadline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSentSuccess {
    pub payment_id: u64,
    pub token_network: Address,
    pub target: Address,
    pub amount: TokenAmount,
    pub secret_hash: SecretHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSentFailed {
    pub payment_id: u64,
    pub token_network: Address,
    pub target: Address,
    pub amount: TokenAmount,
    pub secret_hash: SecretHash,
    pub status: TransferStatus,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceivedSuccess {
    pub payment_id: u64,
    pub token_network: Address,
    pub initiator: Address,
    pub amount: TokenAmount,
    pub secret_hash: SecretHash,
}

/// An effect produced by a transfer state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SendLockedTransfer(SendLockedTransfer),
    SendSecretRequest(SendSecretRequest),
    SendRevealSecret(SendRevealSecret),
    SendUnlock(SendUnlock),
    SendRemoveExpiredLock(SendRemoveExpiredLock),
    SendAnnounceDisposed(SendAnnounceDisposed),
    ContractSend(ContractSend),
    TransferSentSuccess(TransferSentSuccess),
    TransferSentFailed(TransferSentFailed),
    TransferReceivedSuccess(TransferReceivedSuccess),
    UnlockSuccess {
        payment_id: u64,
        secret_hash: SecretHash,
    },
    UnlockFailed {
        payment_id: u64,
        secret_hash: SecretHash,
        reason: String,
    },
    Notice {
        level: NoticeLevel,
        info: String,
    },
}

impl Event {
    pub fn notice(level: NoticeLevel, info: impl Into<String>) -> Self {
        Event::Notice {
            level,
            info: info.into(),
        }
    }
}

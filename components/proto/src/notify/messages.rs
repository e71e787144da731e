use serde::{Deserialize, Serialize};

use crate::consts::TokenAmount;
use crate::crypto::{Address, SecretHash};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    Completed,
    Expired,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Terminal outcome of a transfer we initiated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentTransfer {
    pub payment_id: u64,
    pub token_network: Address,
    pub target: Address,
    pub amount: TokenAmount,
    pub secret_hash: SecretHash,
    pub status: TransferStatus,
    pub opt_reason: Option<String>,
}

/// A transfer that reached us as its final target. Reported once the secret is known.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedTransfer {
    pub payment_id: u64,
    pub token_network: Address,
    pub initiator: Address,
    pub amount: TokenAmount,
    pub secret_hash: SecretHash,
}

/// A human readable message for the user of the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub info: String,
}

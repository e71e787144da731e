//! An in-memory ledger for tests.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::channel::mpsc;
use futures::future;
use futures::FutureExt;

use common::conn::{BoxFuture, BoxStream};

use proto::consts::{BlockHeight, TokenAmount};
use proto::crypto::{Address, ChannelId, Secret, SecretHash};

use crate::ledger::{LedgerClient, LedgerError};

/// A call issued to the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCall {
    OpenChannel {
        token_network: Address,
        partner: Address,
        settle_timeout: BlockHeight,
        channel_id: ChannelId,
    },
    Deposit {
        token_network: Address,
        channel_id: ChannelId,
        amount: TokenAmount,
    },
    CloseChannel {
        token_network: Address,
        channel_id: ChannelId,
        partner: Address,
    },
    RegisterSecret {
        secret: Secret,
    },
    Unlock {
        token_network: Address,
        channel_id: ChannelId,
        partner: Address,
        secret_hash: SecretHash,
    },
}

struct DummyLedgerInner {
    current_height: BlockHeight,
    /// Streams handed out on subscription, in order. Subscribing with no stream left fails.
    head_streams: VecDeque<mpsc::Receiver<BlockHeight>>,
    /// Amount of upcoming calls (of any kind) that fail with `Unreachable`.
    failures_left: usize,
    next_channel_index: u64,
    calls: Vec<LedgerCall>,
}

pub struct DummyLedger {
    inner: Mutex<DummyLedgerInner>,
}

/// A channel id derived from a counter.
pub fn dummy_channel_id(index: u64) -> ChannelId {
    let mut bytes = [0u8; ChannelId::len()];
    bytes[ChannelId::len() - 8..].copy_from_slice(&index.to_be_bytes());
    ChannelId::from(&bytes)
}

impl DummyLedger {
    pub fn new(current_height: BlockHeight) -> Self {
        DummyLedger {
            inner: Mutex::new(DummyLedgerInner {
                current_height,
                head_streams: VecDeque::new(),
                failures_left: 0,
                next_channel_index: 0,
                calls: Vec::new(),
            }),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, DummyLedgerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a sender of block heights for the next subscription.
    pub fn add_head_stream(&self) -> mpsc::Sender<BlockHeight> {
        let (sender, receiver) = mpsc::channel(0);
        self.lock_inner().head_streams.push_back(receiver);
        sender
    }

    pub fn set_current_height(&self, current_height: BlockHeight) {
        self.lock_inner().current_height = current_height;
    }

    /// The next `failures` calls fail.
    pub fn fail_next_calls(&self, failures: usize) {
        self.lock_inner().failures_left = failures;
    }

    pub fn calls(&self) -> Vec<LedgerCall> {
        self.lock_inner().calls.clone()
    }

    fn check_failure(inner: &mut DummyLedgerInner) -> Result<(), LedgerError> {
        if inner.failures_left > 0 {
            inner.failures_left -= 1;
            return Err(LedgerError::Unreachable);
        }
        Ok(())
    }

    fn record(&self, call: LedgerCall) -> Result<(), LedgerError> {
        let mut inner = self.lock_inner();
        DummyLedger::check_failure(&mut inner)?;
        inner.calls.push(call);
        Ok(())
    }
}

impl LedgerClient for DummyLedger {
    fn current_block_height(&self) -> BoxFuture<'_, Result<BlockHeight, LedgerError>> {
        let mut inner = self.lock_inner();
        let res = DummyLedger::check_failure(&mut inner).map(|()| inner.current_height);
        future::ready(res).boxed()
    }

    fn subscribe_new_heads(
        &self,
    ) -> BoxFuture<'_, Result<BoxStream<'static, BlockHeight>, LedgerError>> {
        let mut inner = self.lock_inner();
        let res = DummyLedger::check_failure(&mut inner).and_then(|()| {
            inner
                .head_streams
                .pop_front()
                .map(|receiver| -> BoxStream<'static, BlockHeight> { Box::pin(receiver) })
                .ok_or(LedgerError::Unreachable)
        });
        future::ready(res).boxed()
    }

    fn open_channel(
        &self,
        token_network: Address,
        partner: Address,
        settle_timeout: BlockHeight,
    ) -> BoxFuture<'_, Result<ChannelId, LedgerError>> {
        let mut inner = self.lock_inner();
        let res = DummyLedger::check_failure(&mut inner).map(|()| {
            let channel_id = dummy_channel_id(inner.next_channel_index);
            inner.next_channel_index += 1;
            inner.calls.push(LedgerCall::OpenChannel {
                token_network,
                partner,
                settle_timeout,
                channel_id,
            });
            channel_id
        });
        future::ready(res).boxed()
    }

    fn deposit(
        &self,
        token_network: Address,
        channel_id: ChannelId,
        amount: TokenAmount,
    ) -> BoxFuture<'_, Result<(), LedgerError>> {
        let res = self.record(LedgerCall::Deposit {
            token_network,
            channel_id,
            amount,
        });
        future::ready(res).boxed()
    }

    fn close_channel(
        &self,
        token_network: Address,
        channel_id: ChannelId,
        partner: Address,
    ) -> BoxFuture<'_, Result<(), LedgerError>> {
        let res = self.record(LedgerCall::CloseChannel {
            token_network,
            channel_id,
            partner,
        });
        future::ready(res).boxed()
    }

    fn register_secret(&self, secret: Secret) -> BoxFuture<'_, Result<(), LedgerError>> {
        let res = self.record(LedgerCall::RegisterSecret { secret });
        future::ready(res).boxed()
    }

    fn unlock(
        &self,
        token_network: Address,
        channel_id: ChannelId,
        partner: Address,
        secret_hash: SecretHash,
    ) -> BoxFuture<'_, Result<(), LedgerError>> {
        let res = self.record(LedgerCall::Unlock {
            token_network,
            channel_id,
            partner,
            secret_hash,
        });
        future::ready(res).boxed()
    }
}

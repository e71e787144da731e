use std::collections::HashSet;
use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::oneshot;
use futures::future::RemoteHandle;
use futures::task::{Spawn, SpawnExt};
use futures::{pin_mut, select, FutureExt, StreamExt};

use proto::consts::BlockHeight;

use timer::utils::sleep_ticks;
use timer::TimerClient;

use crate::ledger::{LedgerClient, LedgerError};

/// Returned by a block callback that is no longer interested in new blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackError;

/// Invoked once for every new block height.
/// Returning an error removes the callback.
pub type BlockCallback = Box<dyn FnMut(BlockHeight) -> Result<(), CallbackError> + Send>;

/// Handle of a registered callback, used for removing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

#[derive(Debug)]
pub enum ChainMonitorError {
    AlreadyStarted,
    SpawnError,
    LedgerError(LedgerError),
    HeadsStreamClosed,
}

struct MonitorState {
    opt_last_height: Option<BlockHeight>,
    next_callback_id: u64,
    callbacks: Vec<(CallbackId, BlockCallback)>,
    /// Set while callbacks are being invoked. The callbacks list is taken out of the state
    /// during invocation.
    invoking: bool,
    /// Callbacks removed during invocation
    pending_removals: HashSet<CallbackId>,
    started: bool,
}

/// Watches the ledger for new blocks and notifies registered callbacks.
///
/// Callbacks are invoked in registration order, from the monitor's task, once for every new
/// block height. A callback should not block, otherwise new blocks are delayed.
pub struct ChainMonitor<L> {
    ledger: Arc<L>,
    state: Arc<Mutex<MonitorState>>,
    timer_client: TimerClient,
    backoff_ticks: usize,
}

impl<L> Clone for ChainMonitor<L> {
    fn clone(&self) -> Self {
        ChainMonitor {
            ledger: self.ledger.clone(),
            state: self.state.clone(),
            timer_client: self.timer_client.clone(),
            backoff_ticks: self.backoff_ticks,
        }
    }
}

/// Stops a running chain monitor.
///
/// There is exactly one stopper for every started monitor, and `stop` consumes it, so a monitor
/// can not be stopped twice. Dropping the stopper also stops the monitor.
pub struct ChainMonitorStopper {
    stop_sender: oneshot::Sender<()>,
    loop_handle: RemoteHandle<()>,
}

impl ChainMonitorStopper {
    /// Stop the monitor, and wait until its task is done.
    /// No callback is invoked after this future resolves.
    pub async fn stop(self) {
        let _ = self.stop_sender.send(());
        self.loop_handle.await
    }
}

fn lock_state(state: &Mutex<MonitorState>) -> MutexGuard<'_, MonitorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle a new block height: check it against the last height and invoke all callbacks.
fn handle_new_height(state: &Mutex<MonitorState>, height: BlockHeight) {
    let mut callbacks = {
        let mut state = lock_state(state);
        match state.opt_last_height {
            Some(last_height) if height == last_height => {
                trace!("chain monitor: block {} was already handled", height);
                return;
            }
            Some(last_height) if height < last_height => {
                warn!(
                    "chain monitor: block height went back from {} to {}, possible reorg",
                    last_height, height
                );
            }
            Some(last_height) if height > last_height + 1 => {
                warn!(
                    "chain monitor: missed {} blocks (last: {}, new: {})",
                    height - last_height - 1,
                    last_height,
                    height
                );
            }
            _ => {}
        }
        trace!("chain monitor: new block {}", height);
        state.opt_last_height = Some(height);
        state.invoking = true;
        mem::replace(&mut state.callbacks, Vec::new())
    };

    let mut failed = Vec::new();
    for (callback_id, callback) in &mut callbacks {
        if callback(height).is_err() {
            debug!("chain monitor: removing callback {:?}", callback_id);
            failed.push(*callback_id);
        }
    }

    let mut state = lock_state(state);
    state.invoking = false;
    let pending_removals = mem::replace(&mut state.pending_removals, HashSet::new());
    callbacks.retain(|(callback_id, _)| {
        !failed.contains(callback_id) && !pending_removals.contains(callback_id)
    });
    // Callbacks registered during invocation come last:
    let registered_meanwhile = mem::replace(&mut state.callbacks, callbacks);
    state.callbacks.extend(registered_meanwhile);
}

/// Report the current height, then every new head, until the subscription breaks.
async fn watch_new_heads<L>(ledger: &L, state: &Mutex<MonitorState>) -> ChainMonitorError
where
    L: LedgerClient + ?Sized,
{
    // Get the latest height immediately, so that callbacks do not wait for the next block:
    match ledger.current_block_height().await {
        Ok(height) => handle_new_height(state, height),
        Err(e) => return ChainMonitorError::LedgerError(e),
    }

    let mut heads = match ledger.subscribe_new_heads().await {
        Ok(heads) => heads,
        Err(e) => return ChainMonitorError::LedgerError(e),
    };

    while let Some(height) = heads.next().await {
        handle_new_height(state, height);
    }
    ChainMonitorError::HeadsStreamClosed
}

async fn chain_monitor_loop<L>(
    ledger: Arc<L>,
    state: Arc<Mutex<MonitorState>>,
    timer_client: TimerClient,
    backoff_ticks: usize,
    stop_receiver: oneshot::Receiver<()>,
) where
    L: LedgerClient,
{
    let mut stop_receiver = stop_receiver.fuse();
    loop {
        let watch_fut = watch_new_heads(&*ledger, &state).fuse();
        pin_mut!(watch_fut);
        select! {
            e = watch_fut => warn!("chain monitor: {:?}, retrying in {} ticks", e, backoff_ticks),
            _ = stop_receiver => break,
        }

        let backoff_fut = sleep_ticks(backoff_ticks, timer_client.clone()).fuse();
        pin_mut!(backoff_fut);
        select! {
            res = backoff_fut => {
                if let Err(e) = res {
                    error!("chain monitor: timer error {:?}, stopping", e);
                    break;
                }
            },
            _ = stop_receiver => break,
        }
    }
    debug!("chain monitor: stopped");
}

impl<L> ChainMonitor<L>
where
    L: LedgerClient + 'static,
{
    /// `backoff_ticks`: amount of timer ticks to wait before subscribing again after a
    /// ledger failure.
    pub fn new(ledger: Arc<L>, timer_client: TimerClient, backoff_ticks: usize) -> Self {
        let state = MonitorState {
            opt_last_height: None,
            next_callback_id: 0,
            callbacks: Vec::new(),
            invoking: false,
            pending_removals: HashSet::new(),
            started: false,
        };
        ChainMonitor {
            ledger,
            state: Arc::new(Mutex::new(state)),
            timer_client,
            backoff_ticks,
        }
    }

    /// The latest block height observed, if any.
    pub fn block_height(&self) -> Option<BlockHeight> {
        lock_state(&self.state).opt_last_height
    }

    pub fn register_callback(&self, callback: BlockCallback) -> CallbackId {
        let mut state = lock_state(&self.state);
        let callback_id = CallbackId(state.next_callback_id);
        state.next_callback_id = state.next_callback_id.wrapping_add(1);
        state.callbacks.push((callback_id, callback));
        callback_id
    }

    /// Remove a callback. Removing an unknown callback has no effect.
    /// A callback removed while callbacks are being invoked may still observe the
    /// current block.
    pub fn remove_callback(&self, callback_id: CallbackId) {
        let mut state = lock_state(&self.state);
        let len_before = state.callbacks.len();
        state.callbacks.retain(|(cur_id, _)| cur_id != &callback_id);
        if state.callbacks.len() == len_before && state.invoking {
            state.pending_removals.insert(callback_id);
        }
    }

    /// Start watching the ledger in the background.
    /// Can only be called once for a monitor.
    pub fn start<S>(&self, spawner: S) -> Result<ChainMonitorStopper, ChainMonitorError>
    where
        S: Spawn,
    {
        {
            let mut state = lock_state(&self.state);
            if state.started {
                return Err(ChainMonitorError::AlreadyStarted);
            }
            state.started = true;
        }

        let (stop_sender, stop_receiver) = oneshot::channel();
        let loop_fut = chain_monitor_loop(
            self.ledger.clone(),
            self.state.clone(),
            self.timer_client.clone(),
            self.backoff_ticks,
            stop_receiver,
        );
        let loop_handle = spawner
            .spawn_with_handle(loop_fut)
            .map_err(|_| ChainMonitorError::SpawnError)?;

        Ok(ChainMonitorStopper {
            stop_sender,
            loop_handle,
        })
    }
}

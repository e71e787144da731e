use std::sync::Arc;

use futures::channel::mpsc;
use futures::executor::{block_on, ThreadPool};
use futures::task::Spawn;
use futures::{SinkExt, StreamExt};

use proto::consts::BlockHeight;
use timer::create_timer_incoming;

use crate::monitor::{BlockCallback, CallbackError, ChainMonitor, ChainMonitorError};
use crate::test_utils::DummyLedger;

fn collecting_callback() -> (BlockCallback, mpsc::UnboundedReceiver<BlockHeight>) {
    let (sender, receiver) = mpsc::unbounded();
    let callback: BlockCallback =
        Box::new(move |height| sender.unbounded_send(height).map_err(|_| CallbackError));
    (callback, receiver)
}

async fn task_chain_monitor_basic(spawner: impl Spawn + Clone) {
    let (_tick_sender, tick_receiver) = mpsc::channel::<()>(0);
    let timer_client = create_timer_incoming(tick_receiver, spawner.clone()).unwrap();

    let ledger = Arc::new(DummyLedger::new(10));
    let mut head_sender = ledger.add_head_stream();

    let chain_monitor = ChainMonitor::new(ledger.clone(), timer_client, 1);
    assert_eq!(chain_monitor.block_height(), None);

    let (callback, mut heights) = collecting_callback();
    chain_monitor.register_callback(callback);

    let stopper = chain_monitor.start(spawner.clone()).unwrap();

    // Current height is reported immediately:
    assert_eq!(heights.next().await, Some(10));
    assert_eq!(chain_monitor.block_height(), Some(10));

    head_sender.send(11).await.unwrap();
    assert_eq!(heights.next().await, Some(11));

    // A duplicate height is not reported:
    head_sender.send(11).await.unwrap();
    // A gap is reported, with the new height:
    head_sender.send(14).await.unwrap();
    assert_eq!(heights.next().await, Some(14));

    head_sender.send(15).await.unwrap();
    assert_eq!(heights.next().await, Some(15));
    assert_eq!(chain_monitor.block_height(), Some(15));

    stopper.stop().await;

    // The monitor does not read heads anymore:
    assert!(head_sender.send(16).await.is_err());
    drop(chain_monitor);
    assert_eq!(heights.next().await, None);
}

#[test]
fn test_chain_monitor_basic() {
    let thread_pool = ThreadPool::new().unwrap();
    block_on(task_chain_monitor_basic(thread_pool));
}

async fn task_chain_monitor_start_twice(spawner: impl Spawn + Clone) {
    let (_tick_sender, tick_receiver) = mpsc::channel::<()>(0);
    let timer_client = create_timer_incoming(tick_receiver, spawner.clone()).unwrap();

    let ledger = Arc::new(DummyLedger::new(10));
    let _head_sender = ledger.add_head_stream();

    let chain_monitor = ChainMonitor::new(ledger, timer_client, 1);
    let stopper = chain_monitor.start(spawner.clone()).unwrap();
    match chain_monitor.start(spawner.clone()) {
        Err(ChainMonitorError::AlreadyStarted) => {}
        _ => unreachable!(),
    }
    stopper.stop().await;
}

#[test]
fn test_chain_monitor_start_twice() {
    let thread_pool = ThreadPool::new().unwrap();
    block_on(task_chain_monitor_start_twice(thread_pool));
}

async fn task_chain_monitor_callbacks_order_and_removal(spawner: impl Spawn + Clone) {
    let (_tick_sender, tick_receiver) = mpsc::channel::<()>(0);
    let timer_client = create_timer_incoming(tick_receiver, spawner.clone()).unwrap();

    let ledger = Arc::new(DummyLedger::new(5));
    let mut head_sender = ledger.add_head_stream();
    let chain_monitor = ChainMonitor::new(ledger, timer_client, 1);

    // All callbacks report to the same channel, tagged with their index:
    let (sender, mut receiver) = mpsc::unbounded::<(usize, BlockHeight)>();

    let c_sender = sender.clone();
    chain_monitor.register_callback(Box::new(move |height| {
        c_sender.unbounded_send((0, height)).unwrap();
        Ok(())
    }));

    // Not interested anymore after the first block:
    let c_sender = sender.clone();
    chain_monitor.register_callback(Box::new(move |height| {
        c_sender.unbounded_send((1, height)).unwrap();
        Err(CallbackError)
    }));

    let c_sender = sender.clone();
    let callback_id2 = chain_monitor.register_callback(Box::new(move |height| {
        c_sender.unbounded_send((2, height)).unwrap();
        Ok(())
    }));

    // Registers another callback from within a callback, on the first block only:
    let c_chain_monitor = chain_monitor.clone();
    let c_sender = sender.clone();
    let mut registered = false;
    chain_monitor.register_callback(Box::new(move |_height| {
        if !registered {
            registered = true;
            let cc_sender = c_sender.clone();
            c_chain_monitor.register_callback(Box::new(move |height| {
                cc_sender.unbounded_send((4, height)).unwrap();
                Ok(())
            }));
        }
        Ok(())
    }));

    let stopper = chain_monitor.start(spawner.clone()).unwrap();

    let mut first = Vec::new();
    for _ in 0..3usize {
        first.push(receiver.next().await.unwrap());
    }
    assert_eq!(first, vec![(0, 5), (1, 5), (2, 5)]);

    chain_monitor.remove_callback(callback_id2);

    head_sender.send(6).await.unwrap();
    let mut second = Vec::new();
    for _ in 0..2usize {
        second.push(receiver.next().await.unwrap());
    }
    assert_eq!(second, vec![(0, 6), (4, 6)]);

    stopper.stop().await;
}

#[test]
fn test_chain_monitor_callbacks_order_and_removal() {
    let thread_pool = ThreadPool::new().unwrap();
    block_on(task_chain_monitor_callbacks_order_and_removal(thread_pool));
}

async fn task_chain_monitor_retry(spawner: impl Spawn + Clone) {
    let (mut tick_sender, tick_receiver) = mpsc::channel::<()>(0);
    let timer_client = create_timer_incoming(tick_receiver, spawner.clone()).unwrap();

    let ledger = Arc::new(DummyLedger::new(10));
    let head_sender1 = ledger.add_head_stream();
    let mut head_sender2 = ledger.add_head_stream();

    // The first attempt to get the current height fails:
    ledger.fail_next_calls(1);

    let chain_monitor = ChainMonitor::new(ledger.clone(), timer_client, 1);
    let (callback, mut heights) = collecting_callback();
    chain_monitor.register_callback(callback);
    let stopper = chain_monitor.start(spawner.clone()).unwrap();

    // Nothing happens until time passes:
    let mut ticks_sent = 0usize;
    let height = loop {
        if let Ok(Some(height)) = heights.try_next() {
            break height;
        }
        tick_sender.send(()).await.unwrap();
        ticks_sent += 1;
        assert!(ticks_sent < 10_000);
    };
    assert_eq!(height, 10);
    assert_eq!(chain_monitor.block_height(), Some(10));

    // The head stream breaks. The monitor subscribes again after the backoff:
    ledger.set_current_height(20);
    drop(head_sender1);

    let mut ticks_sent = 0usize;
    let height = loop {
        if let Ok(Some(height)) = heights.try_next() {
            break height;
        }
        tick_sender.send(()).await.unwrap();
        ticks_sent += 1;
        assert!(ticks_sent < 10_000);
    };
    assert_eq!(height, 20);

    head_sender2.send(21).await.unwrap();
    assert_eq!(heights.next().await, Some(21));

    stopper.stop().await;
}

#[test]
fn test_chain_monitor_retry() {
    let _ = env_logger::try_init();
    let thread_pool = ThreadPool::new().unwrap();
    block_on(task_chain_monitor_retry(thread_pool));
}

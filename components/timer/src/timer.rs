//! The time tick broadcast service.
//!
//! The timer sends a tick to all of its clients periodically. Components measure time in ticks,
//! which allows tests to drive time manually with `create_timer_incoming`.

use std::time::Duration;

use futures::channel::{mpsc, oneshot};
use futures::task::{Spawn, SpawnExt};
use futures::{future, stream, SinkExt, Stream, StreamExt};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerTick;

#[derive(Debug)]
pub enum TimerError {
    SpawnError,
}

#[derive(Debug)]
pub enum TimerClientError {
    SendFailure,
    ResponseCanceled,
}

struct TimerRequest {
    response_sender: oneshot::Sender<mpsc::Receiver<TimerTick>>,
}

#[derive(Clone)]
pub struct TimerClient {
    sender: mpsc::Sender<TimerRequest>,
}

impl TimerClient {
    fn new(sender: mpsc::Sender<TimerRequest>) -> TimerClient {
        TimerClient { sender }
    }

    /// Get a new stream of ticks. The stream yields one tick for every tick of the timer,
    /// starting from the next one.
    pub async fn request_timer_stream(
        &mut self,
    ) -> Result<mpsc::Receiver<TimerTick>, TimerClientError> {
        let (response_sender, response_receiver) = oneshot::channel();
        let timer_request = TimerRequest { response_sender };
        self.sender
            .send(timer_request)
            .await
            .map_err(|_| TimerClientError::SendFailure)?;
        response_receiver
            .await
            .map_err(|_| TimerClientError::ResponseCanceled)
    }
}

enum TimerEvent {
    Incoming,
    IncomingDone,
    Request(TimerRequest),
    RequestsDone,
}

async fn timer_loop<M>(incoming: M, from_client: mpsc::Receiver<TimerRequest>)
where
    M: Stream<Item = ()> + Unpin,
{
    let incoming = incoming
        .map(|_| TimerEvent::Incoming)
        .chain(stream::once(future::ready(TimerEvent::IncomingDone)));
    let from_client = from_client
        .map(TimerEvent::Request)
        .chain(stream::once(future::ready(TimerEvent::RequestsDone)));

    let mut events = stream::select(incoming, from_client);
    let mut tick_senders: Vec<mpsc::Sender<TimerTick>> = Vec::new();
    let mut requests_done = false;

    while let Some(event) = events.next().await {
        match event {
            TimerEvent::Incoming => {
                let mut temp_tick_senders = Vec::new();
                temp_tick_senders.append(&mut tick_senders);
                for mut tick_sender in temp_tick_senders {
                    // Clients that dropped their stream are forgotten:
                    if tick_sender.send(TimerTick).await.is_ok() {
                        tick_senders.push(tick_sender);
                    }
                }
            }
            TimerEvent::Request(timer_request) => {
                let (tick_sender, tick_receiver) = mpsc::channel(0);
                tick_senders.push(tick_sender);
                let _ = timer_request.response_sender.send(tick_receiver);
            }
            TimerEvent::IncomingDone => {
                debug!("timer_loop: incoming ticks stream was closed");
                break;
            }
            TimerEvent::RequestsDone => {
                requests_done = true;
            }
        };
        if requests_done && tick_senders.is_empty() {
            break;
        }
    }
}

/// Create a timer service that broadcasts everything from the incoming Stream.
/// Useful for testing, as this function allows full control on the rate of incoming signals.
pub fn create_timer_incoming<M>(incoming: M, spawner: impl Spawn) -> Result<TimerClient, TimerError>
where
    M: Stream<Item = ()> + Unpin + Send + 'static,
{
    let (sender, receiver) = mpsc::channel::<TimerRequest>(0);
    spawner
        .spawn(timer_loop(incoming, receiver))
        .map_err(|_| TimerError::SpawnError)?;
    Ok(TimerClient::new(sender))
}

/// Create a timer service that ticks every `dur`.
pub fn create_timer(dur: Duration, spawner: impl Spawn) -> Result<TimerClient, TimerError> {
    let interval = stream::unfold((), move |()| async move {
        async_std::task::sleep(dur).await;
        Some(((), ()))
    });
    create_timer_incoming(Box::pin(interval), spawner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::{LocalPool, ThreadPool};

    #[test]
    fn test_timer_single() {
        let mut local_pool = LocalPool::new();
        let spawner = local_pool.spawner();

        let dur = Duration::from_millis(1);
        let mut timer_client = create_timer(dur, spawner).unwrap();

        let timer_stream = local_pool
            .run_until(timer_client.request_timer_stream())
            .unwrap();
        let ticks = local_pool.run_until(timer_stream.take(10).collect::<Vec<TimerTick>>());
        assert_eq!(ticks.len(), 10);
    }

    async fn task_timer_incoming_multiple_clients(spawner: impl Spawn + Clone) {
        let (mut tick_sender, tick_receiver) = mpsc::channel::<()>(0);
        let mut timer_client = create_timer_incoming(tick_receiver, spawner).unwrap();

        let mut timer_streams = Vec::new();
        for _ in 0..4usize {
            timer_streams.push(timer_client.request_timer_stream().await.unwrap());
        }

        // Send a few ticks, and make sure every client sees all of them:
        let mut tick_receivers = Vec::new();
        for timer_stream in timer_streams {
            tick_receivers.push(timer_stream.take(3).collect::<Vec<TimerTick>>());
        }
        let ticks_fut = future::join_all(tick_receivers);

        let send_fut = async move {
            for _ in 0..3usize {
                tick_sender.send(()).await.unwrap();
            }
            tick_sender
        };
        let (all_ticks, _tick_sender) = future::join(ticks_fut, send_fut).await;
        for ticks in all_ticks {
            assert_eq!(ticks.len(), 3);
        }
    }

    #[test]
    fn test_timer_incoming_multiple_clients() {
        let thread_pool = ThreadPool::new().unwrap();
        futures::executor::block_on(task_timer_incoming_multiple_clients(thread_pool));
    }

    async fn task_timer_dropped_client(spawner: impl Spawn + Clone) {
        let (mut tick_sender, tick_receiver) = mpsc::channel::<()>(0);
        let mut timer_client = create_timer_incoming(tick_receiver, spawner).unwrap();

        let dropped_stream = timer_client.request_timer_stream().await.unwrap();
        let mut timer_stream = timer_client.request_timer_stream().await.unwrap();
        drop(dropped_stream);

        for _ in 0..5usize {
            tick_sender.send(()).await.unwrap();
            assert_eq!(timer_stream.next().await, Some(TimerTick));
        }
    }

    #[test]
    fn test_timer_dropped_client() {
        let thread_pool = ThreadPool::new().unwrap();
        futures::executor::block_on(task_timer_dropped_client(thread_pool));
    }
}

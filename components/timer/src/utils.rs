use futures::{future, StreamExt};

use common::int_convert::usize_to_u64;

use crate::timer::TimerClient;

#[derive(Debug)]
pub enum SleepTicksError {
    RequestTimerStreamError,
    ConversionError,
}

/// Sleep for a certain amount of time ticks
pub async fn sleep_ticks(
    ticks: usize,
    mut timer_client: TimerClient,
) -> Result<(), SleepTicksError> {
    let ticks_u64 = usize_to_u64(ticks).ok_or(SleepTicksError::ConversionError)?;
    let timer_stream = timer_client
        .request_timer_stream()
        .await
        .map_err(|_| SleepTicksError::RequestTimerStreamError)?;
    timer_stream
        .take(ticks_u64 as usize)
        .for_each(|_| future::ready(()))
        .await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::{mpsc, oneshot};
    use futures::executor::{block_on, ThreadPool};
    use futures::task::{Spawn, SpawnExt};
    use futures::SinkExt;

    use crate::timer::create_timer_incoming;

    async fn task_sleep_ticks(spawner: impl Spawn + Clone) {
        let (mut tick_sender, tick_receiver) = mpsc::channel::<()>(0);
        let timer_client = create_timer_incoming(tick_receiver, spawner.clone()).unwrap();

        let (done_sender, mut done_receiver) = oneshot::channel::<()>();
        let c_timer_client = timer_client.clone();
        spawner
            .spawn(async move {
                sleep_ticks(3, c_timer_client).await.unwrap();
                let _ = done_sender.send(());
            })
            .unwrap();

        // Ticks sent before the sleeper registered are not counted by the sleeper:
        let mut ticks_sent = 0usize;
        while let Ok(None) = done_receiver.try_recv() {
            tick_sender.send(()).await.unwrap();
            ticks_sent += 1;
            assert!(ticks_sent < 10_000);
        }
        assert!(ticks_sent >= 3);
        drop(timer_client);
    }

    #[test]
    fn test_sleep_ticks() {
        let thread_pool = ThreadPool::new().unwrap();
        block_on(task_sleep_ticks(thread_pool));
    }
}

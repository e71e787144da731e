use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::mpsc;

use proto::notify::messages::{Notice, NoticeLevel, ReceivedTransfer, SentTransfer};
use proto::transfer::messages::LockedTransfer;

struct NotifySenders {
    sent_transfers: mpsc::Sender<SentTransfer>,
    received_transfers: mpsc::Sender<ReceivedTransfer>,
    notices: mpsc::Sender<Notice>,
}

/// Reports to the application: completed transfers and notices.
///
/// Reporting never blocks. A report is dropped if its consumer is slow or gone.
#[derive(Clone)]
pub struct NotifyHandler {
    senders: Arc<Mutex<NotifySenders>>,
}

/// The application's side of a `NotifyHandler`.
pub struct NotifyReceivers {
    pub sent_transfers: mpsc::Receiver<SentTransfer>,
    pub received_transfers: mpsc::Receiver<ReceivedTransfer>,
    pub notices: mpsc::Receiver<Notice>,
}

/// `buffer`: amount of reports of every kind kept for a slow consumer.
pub fn create_notify_handler(buffer: usize) -> (NotifyHandler, NotifyReceivers) {
    let (sent_sender, sent_receiver) = mpsc::channel(buffer);
    let (received_sender, received_receiver) = mpsc::channel(buffer);
    let (notice_sender, notice_receiver) = mpsc::channel(buffer);

    let notify_handler = NotifyHandler {
        senders: Arc::new(Mutex::new(NotifySenders {
            sent_transfers: sent_sender,
            received_transfers: received_sender,
            notices: notice_sender,
        })),
    };
    let notify_receivers = NotifyReceivers {
        sent_transfers: sent_receiver,
        received_transfers: received_receiver,
        notices: notice_receiver,
    };
    (notify_handler, notify_receivers)
}

impl NotifyHandler {
    fn lock_senders(&self) -> MutexGuard<'_, NotifySenders> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Send a human readable notice. Empty notices are ignored.
    pub fn notify(&self, level: NoticeLevel, info: impl Into<String>) {
        let info = info.into();
        if info.is_empty() {
            return;
        }
        if let Err(e) = self.lock_senders().notices.try_send(Notice { level, info }) {
            trace!("notify: dropped notice: {:?}", e.into_inner());
        }
    }

    /// Notice about a locked transfer that arrived to us.
    pub fn notify_receive_locked_transfer(&self, locked_transfer: &LockedTransfer) {
        let info = format!(
            "received locked transfer: token_network={}, amount={}, secret_hash={}",
            locked_transfer.balance_proof.token_network,
            locked_transfer.lock.amount,
            locked_transfer.lock.secret_hash
        );
        self.notify(NoticeLevel::Info, info);
    }

    pub fn notify_sent_transfer(&self, sent_transfer: SentTransfer) {
        if let Err(e) = self.lock_senders().sent_transfers.try_send(sent_transfer) {
            trace!("notify: dropped sent transfer: {:?}", e.into_inner());
        }
    }

    pub fn notify_received_transfer(&self, received_transfer: ReceivedTransfer) {
        if let Err(e) = self
            .lock_senders()
            .received_transfers
            .try_send(received_transfer)
        {
            trace!("notify: dropped received transfer: {:?}", e.into_inner());
        }
    }
}

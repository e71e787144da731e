use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::channel::mpsc;

use proto::crypto::Address;
use proto::transfer::messages::Message;

/// Delivery of messages to other nodes.
///
/// Delivery is unreliable: a message may be lost, and the transfer state machines recover from
/// lost messages through lock expiration. Sending must not block.
pub trait PeerTransport: Send + Sync {
    fn send_message(&self, recipient: Address, message: Message);
}

/// A transport that hands messages to a local consumer, for example a task that encodes them
/// for the network.
/// Messages are dropped while the consumer is slow or gone.
pub struct ChannelTransport {
    sender: Mutex<mpsc::Sender<(Address, Message)>>,
}

impl ChannelTransport {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<(Address, Message)>) {
        let (sender, receiver) = mpsc::channel(buffer);
        let channel_transport = ChannelTransport {
            sender: Mutex::new(sender),
        };
        (channel_transport, receiver)
    }

    fn lock_sender(&self) -> MutexGuard<'_, mpsc::Sender<(Address, Message)>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl PeerTransport for ChannelTransport {
    fn send_message(&self, recipient: Address, message: Message) {
        if let Err(e) = self.lock_sender().try_send((recipient, message)) {
            let (recipient, _message) = e.into_inner();
            warn!("transport: dropped message to {}", recipient);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;
    use futures::StreamExt;

    use proto::crypto::{Secret, SecretHash};
    use proto::transfer::messages::{RevealSecret, SecretRequest};

    fn secret_request(payment_id: u64) -> Message {
        Message::SecretRequest(SecretRequest {
            payment_id,
            amount: 10,
            secret_hash: SecretHash::from(&[3; SecretHash::len()]),
        })
    }

    #[test]
    fn test_channel_transport_drops_when_full() {
        let (channel_transport, mut receiver) = ChannelTransport::new(0);
        let recipient = Address::from(&[1; Address::len()]);

        // One slot for the sender, the rest is dropped:
        channel_transport.send_message(recipient, secret_request(1));
        channel_transport.send_message(recipient, secret_request(2));

        let (recipient1, message1) = block_on(receiver.next()).unwrap();
        assert_eq!(recipient1, recipient);
        assert_eq!(message1, secret_request(1));

        channel_transport.send_message(recipient, secret_request(3));
        let (_, message3) = block_on(receiver.next()).unwrap();
        assert_eq!(message3, secret_request(3));

        drop(receiver);
        channel_transport.send_message(
            recipient,
            Message::RevealSecret(RevealSecret {
                secret: Secret::from(&[4; Secret::len()]),
            }),
        );
    }
}

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crypto::hash_lock::HashLock;

use proto::consts::BlockHeight;
use proto::crypto::{Address, ChannelId, SecretHash};
use proto::notify::messages::{NoticeLevel, ReceivedTransfer, SentTransfer, TransferStatus};
use proto::state_change::{
    ActionCancelRoute, ActionInitInitiator, ActionInitMediator, ActionInitTarget,
    BalanceProofKind, Block, ContractStateChange, ReceiveAnnounceDisposed, ReceiveBalanceProof,
    ReceiveSecretRequest, ReceiveSecretReveal, StateChange,
};
use proto::transfer::events::{ContractSend, Event};
use proto::transfer::messages::{
    AnnounceDisposed, LockedTransfer, LockedTransferState, Message, RemoveExpiredLock,
    RevealSecret, SecretRequest, Unlock,
};

use channel::{ChannelError, ChannelState, NetworkView};
use notify::NotifyHandler;

use crate::initiator;
use crate::mediator;
use crate::target;
use crate::types::{Role, TransferRole, TransitionResult};

#[derive(Debug)]
pub enum TransferManagerError {
    /// A transfer with the same role and secret hash is in progress.
    DuplicateTransfer,
}

/// Something the node has to do on behalf of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutput {
    /// Send a message to a peer.
    Message { recipient: Address, message: Message },
    /// Call the ledger. Retried until the deadline passes.
    ContractSend(ContractSend),
}

type TransferKey = (Role, SecretHash);

struct TransferManagerInner {
    block_number: BlockHeight,
    transfers: HashMap<TransferKey, Arc<Mutex<TransferRole>>>,
}

/// Runs the transfer state machines.
///
/// Every transfer is serialized by its own lock. Channel bookkeeping happens here: incoming
/// messages are validated against their channel before any state machine sees them, and
/// messages requested by the state machines are built by their channel.
pub struct TransferManager {
    network_view: Arc<NetworkView>,
    notify_handler: NotifyHandler,
    inner: Mutex<TransferManagerInner>,
}

fn lock_transfer(transfer: &Mutex<TransferRole>) -> MutexGuard<'_, TransferRole> {
    transfer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Apply a channel operation, after checking that `partner` is the partner of the channel.
fn with_partner_channel<F, R>(
    network_view: &NetworkView,
    channel_id: &ChannelId,
    partner: &Address,
    f: F,
) -> Result<R, ChannelError>
where
    F: FnOnce(&mut ChannelState) -> Result<R, ChannelError>,
{
    network_view
        .with_channel_mut(channel_id, |channel_state| {
            if channel_state.partner_address() != partner {
                return Err(ChannelError::WrongChannel);
            }
            f(channel_state)
        })
        .unwrap_or(Err(ChannelError::WrongChannel))
}

impl TransferManager {
    pub fn new(
        network_view: Arc<NetworkView>,
        notify_handler: NotifyHandler,
        block_number: BlockHeight,
    ) -> Self {
        TransferManager {
            network_view,
            notify_handler,
            inner: Mutex::new(TransferManagerInner {
                block_number,
                transfers: HashMap::new(),
            }),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, TransferManagerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn block_number(&self) -> BlockHeight {
        self.lock_inner().block_number
    }

    /// Amount of transfers in progress.
    pub fn num_transfers(&self) -> usize {
        self.lock_inner().transfers.len()
    }

    /// A copy of the state of a transfer in progress.
    pub fn transfer(&self, role: Role, secret_hash: &SecretHash) -> Option<TransferRole> {
        let transfer = self.lock_inner().transfers.get(&(role, *secret_hash))?.clone();
        let transfer_role = lock_transfer(&transfer).clone();
        Some(transfer_role)
    }

    /// Start paying `transfer.amount` to `transfer.target`. `transfer` must contain the secret.
    pub fn init_initiator(
        &self,
        transfer: LockedTransferState,
    ) -> Result<Vec<TransferOutput>, TransferManagerError> {
        let block_number = self.block_number();
        let routes = self.network_view.routes(&transfer.token_network);
        let action = ActionInitInitiator {
            our_address: *self.network_view.our_address(),
            transfer,
            routes,
        };
        let init_res = initiator::init(&action, block_number).map_state(TransferRole::Initiator);
        self.start_transfer(init_res)
    }

    fn start_transfer(
        &self,
        init_res: TransitionResult<TransferRole>,
    ) -> Result<Vec<TransferOutput>, TransferManagerError> {
        let TransitionResult { new_state, events } = init_res;
        let key = (new_state.role(), *new_state.secret_hash());
        let transfer = Arc::new(Mutex::new(new_state));
        let mut transfer_role = lock_transfer(&transfer);

        {
            let mut inner = self.lock_inner();
            if inner.transfers.contains_key(&key) {
                return Err(TransferManagerError::DuplicateTransfer);
            }
            inner.transfers.insert(key, transfer.clone());
        }

        let outputs = self.apply_events(&mut transfer_role, events);
        self.remove_if_terminal(&transfer_role);
        Ok(outputs)
    }

    fn remove_if_terminal(&self, transfer_role: &TransferRole) {
        if transfer_role.is_terminal() {
            let key = (transfer_role.role(), *transfer_role.secret_hash());
            debug!("transfer manager: {:?} {} is done", key.0, key.1);
            let _ = self.lock_inner().transfers.remove(&key);
        }
    }

    /// Feed a state change to one transfer.
    fn run_transition(
        &self,
        transfer: &Mutex<TransferRole>,
        state_change: StateChange,
    ) -> Vec<TransferOutput> {
        let mut transfer_role = lock_transfer(transfer);
        if transfer_role.is_terminal() {
            return Vec::new();
        }
        let res = transfer_role.clone().state_transition(&state_change);
        *transfer_role = res.new_state;
        let outputs = self.apply_events(&mut transfer_role, res.events);
        self.remove_if_terminal(&transfer_role);
        outputs
    }

    /// Turn the events of a transition into outputs and notifications. A locked transfer
    /// refused by its channel cancels the route, which is fed back to the same transfer.
    fn apply_events(
        &self,
        transfer_role: &mut TransferRole,
        events: Vec<Event>,
    ) -> Vec<TransferOutput> {
        let mut outputs = Vec::new();
        let mut pending_events: VecDeque<Event> = events.into_iter().collect();
        while let Some(event) = pending_events.pop_front() {
            if let Some(cancel_route) = self.apply_event(event, &mut outputs) {
                let res = transfer_role
                    .clone()
                    .state_transition(&StateChange::ActionCancelRoute(cancel_route));
                *transfer_role = res.new_state;
                pending_events.extend(res.events);
            }
        }
        outputs
    }

    fn apply_event(
        &self,
        event: Event,
        outputs: &mut Vec<TransferOutput>,
    ) -> Option<ActionCancelRoute> {
        let block_number = self.block_number();
        match event {
            Event::SendLockedTransfer(send) => {
                let res = with_partner_channel(
                    &self.network_view,
                    &send.channel_id,
                    &send.recipient,
                    |channel_state| channel_state.create_locked_transfer(&send.transfer, block_number),
                );
                match res {
                    Ok(locked_transfer) => outputs.push(TransferOutput::Message {
                        recipient: send.recipient,
                        message: Message::LockedTransfer(locked_transfer),
                    }),
                    Err(e) => {
                        return Some(ActionCancelRoute {
                            secret_hash: send.transfer.secret_hash,
                            channel_id: send.channel_id,
                            reason: format!("{:?}", e),
                        })
                    }
                }
            }
            Event::SendSecretRequest(send) => outputs.push(TransferOutput::Message {
                recipient: send.recipient,
                message: Message::SecretRequest(SecretRequest {
                    payment_id: send.payment_id,
                    secret_hash: send.secret_hash,
                    amount: send.amount,
                }),
            }),
            Event::SendRevealSecret(send) => outputs.push(TransferOutput::Message {
                recipient: send.recipient,
                message: Message::RevealSecret(RevealSecret {
                    secret: send.secret,
                }),
            }),
            Event::SendUnlock(send) => {
                let res = with_partner_channel(
                    &self.network_view,
                    &send.channel_id,
                    &send.recipient,
                    |channel_state| channel_state.create_unlock(send.payment_id, &send.secret),
                );
                match res {
                    Ok(unlock) => outputs.push(TransferOutput::Message {
                        recipient: send.recipient,
                        message: Message::Unlock(unlock),
                    }),
                    Err(e) => self.notify_handler.notify(
                        NoticeLevel::Error,
                        format!("could not unlock {}: {:?}", send.secret_hash, e),
                    ),
                }
            }
            Event::SendRemoveExpiredLock(send) => {
                let res = with_partner_channel(
                    &self.network_view,
                    &send.channel_id,
                    &send.recipient,
                    |channel_state| {
                        channel_state.create_remove_expired_lock(&send.secret_hash, block_number)
                    },
                );
                match res {
                    Ok(remove_expired_lock) => outputs.push(TransferOutput::Message {
                        recipient: send.recipient,
                        message: Message::RemoveExpiredLock(remove_expired_lock),
                    }),
                    Err(e) => warn!(
                        "transfer manager: could not remove expired lock {}: {:?}",
                        send.secret_hash, e
                    ),
                }
            }
            Event::SendAnnounceDisposed(send) => outputs.push(TransferOutput::Message {
                recipient: send.recipient,
                message: Message::AnnounceDisposed(AnnounceDisposed {
                    channel_id: send.channel_id,
                    lock: send.lock,
                }),
            }),
            Event::ContractSend(contract_send) => {
                outputs.push(TransferOutput::ContractSend(contract_send))
            }
            Event::TransferSentSuccess(success) => {
                self.notify_handler.notify_sent_transfer(SentTransfer {
                    payment_id: success.payment_id,
                    token_network: success.token_network,
                    target: success.target,
                    amount: success.amount,
                    secret_hash: success.secret_hash,
                    status: TransferStatus::Completed,
                    opt_reason: None,
                })
            }
            Event::TransferSentFailed(failed) => {
                self.notify_handler.notify_sent_transfer(SentTransfer {
                    payment_id: failed.payment_id,
                    token_network: failed.token_network,
                    target: failed.target,
                    amount: failed.amount,
                    secret_hash: failed.secret_hash,
                    status: failed.status,
                    opt_reason: Some(failed.reason),
                })
            }
            Event::TransferReceivedSuccess(received) => {
                self.notify_handler.notify_received_transfer(ReceivedTransfer {
                    payment_id: received.payment_id,
                    token_network: received.token_network,
                    initiator: received.initiator,
                    amount: received.amount,
                    secret_hash: received.secret_hash,
                })
            }
            Event::UnlockSuccess {
                payment_id,
                secret_hash,
            } => debug!(
                "transfer manager: unlocked {} (payment {})",
                secret_hash, payment_id
            ),
            Event::UnlockFailed {
                payment_id,
                secret_hash,
                reason,
            } => self.notify_handler.notify(
                NoticeLevel::Warning,
                format!(
                    "unlock of {} (payment {}) failed: {}",
                    secret_hash, payment_id, reason
                ),
            ),
            Event::Notice { level, info } => self.notify_handler.notify(level, info),
        }
        None
    }

    /// Feed a state change to the transfers of the given roles on `secret_hash`.
    fn dispatch(
        &self,
        roles: &[Role],
        secret_hash: &SecretHash,
        state_change: StateChange,
    ) -> Vec<TransferOutput> {
        let transfers: Vec<_> = {
            let inner = self.lock_inner();
            roles
                .iter()
                .filter_map(|role| inner.transfers.get(&(*role, *secret_hash)).cloned())
                .collect()
        };
        if transfers.is_empty() {
            trace!("transfer manager: no transfer for {}", secret_hash);
        }

        let mut outputs = Vec::new();
        for transfer in transfers {
            outputs.extend(self.run_transition(&transfer, state_change.clone()));
        }
        outputs
    }

    /// Feed a state change to every transfer.
    fn dispatch_all(&self, state_change: StateChange) -> Vec<TransferOutput> {
        let transfers: Vec<_> = self.lock_inner().transfers.values().cloned().collect();
        let mut outputs = Vec::new();
        for transfer in transfers {
            outputs.extend(self.run_transition(&transfer, state_change.clone()));
        }
        outputs
    }

    pub fn handle_block(&self, block_number: BlockHeight) -> Vec<TransferOutput> {
        {
            let mut inner = self.lock_inner();
            if block_number <= inner.block_number {
                return Vec::new();
            }
            inner.block_number = block_number;
        }
        let mut outputs = self.dispatch_all(StateChange::Block(Block { block_number }));
        outputs.extend(self.remove_abandoned_locks(block_number));
        outputs
    }

    /// Remove our expired locks that no transfer removed on its own. These are left behind by
    /// routes that were disposed or canceled after the lock was sent.
    fn remove_abandoned_locks(&self, block_number: BlockHeight) -> Vec<TransferOutput> {
        let mut outputs = Vec::new();
        for (channel_id, partner, secret_hash) in self.network_view.expired_our_locks(block_number) {
            let res = with_partner_channel(&self.network_view, &channel_id, &partner, |channel_state| {
                channel_state.create_remove_expired_lock(&secret_hash, block_number)
            });
            match res {
                Ok(remove_expired_lock) => {
                    debug!(
                        "transfer manager: removing abandoned lock {} from channel {}",
                        secret_hash, channel_id
                    );
                    outputs.push(TransferOutput::Message {
                        recipient: partner,
                        message: Message::RemoveExpiredLock(remove_expired_lock),
                    });
                }
                Err(e) => warn!(
                    "transfer manager: could not remove abandoned lock {}: {:?}",
                    secret_hash, e
                ),
            }
        }
        outputs
    }

    /// Chain-derived state changes, after they were applied to the network view.
    pub fn handle_contract_state_change(
        &self,
        contract_state_change: &ContractStateChange,
    ) -> Vec<TransferOutput> {
        let state_change = StateChange::Contract(contract_state_change.clone());
        match contract_state_change {
            ContractStateChange::SecretRegistered { secret_hash, .. } => self.dispatch(
                &[Role::Initiator, Role::Mediator, Role::Target],
                secret_hash,
                state_change,
            ),
            ContractStateChange::ChannelClosed { .. } => self.dispatch_all(state_change),
            _ => Vec::new(),
        }
    }

    /// A message from the peer `sender`.
    pub fn handle_message(&self, sender: Address, message: Message) -> Vec<TransferOutput> {
        match message {
            Message::LockedTransfer(locked_transfer) => {
                self.handle_locked_transfer(sender, locked_transfer)
            }
            Message::SecretRequest(secret_request) => {
                let secret_hash = secret_request.secret_hash;
                self.dispatch(
                    &[Role::Initiator],
                    &secret_hash,
                    StateChange::ReceiveSecretRequest(ReceiveSecretRequest {
                        sender,
                        payment_id: secret_request.payment_id,
                        amount: secret_request.amount,
                        secret_hash,
                    }),
                )
            }
            Message::RevealSecret(reveal_secret) => {
                let secret_hash = reveal_secret.secret.hash_lock();
                self.dispatch(
                    &[Role::Initiator, Role::Mediator, Role::Target],
                    &secret_hash,
                    StateChange::ReceiveSecretReveal(ReceiveSecretReveal {
                        sender,
                        secret: reveal_secret.secret,
                        secret_hash,
                    }),
                )
            }
            Message::Unlock(unlock) => self.handle_unlock(sender, unlock),
            Message::RemoveExpiredLock(remove_expired_lock) => {
                self.handle_remove_expired_lock(sender, remove_expired_lock)
            }
            Message::AnnounceDisposed(announce_disposed) => {
                let secret_hash = announce_disposed.lock.secret_hash;
                self.dispatch(
                    &[Role::Initiator, Role::Mediator],
                    &secret_hash,
                    StateChange::ReceiveAnnounceDisposed(ReceiveAnnounceDisposed {
                        sender,
                        channel_id: announce_disposed.channel_id,
                        lock: announce_disposed.lock,
                    }),
                )
            }
        }
    }

    fn reject(&self, sender: &Address, what: &str, e: ChannelError) -> Vec<TransferOutput> {
        warn!("transfer manager: rejected {} from {}: {:?}", what, sender, e);
        self.notify_handler.notify(
            NoticeLevel::Warning,
            format!("rejected {} from {}: {:?}", what, sender, e),
        );
        Vec::new()
    }

    fn handle_locked_transfer(
        &self,
        sender: Address,
        locked_transfer: LockedTransfer,
    ) -> Vec<TransferOutput> {
        let our_address = *self.network_view.our_address();
        if locked_transfer.sender != sender || locked_transfer.recipient != our_address {
            return self.reject(&sender, "locked transfer", ChannelError::WrongChannel);
        }

        let block_number = self.block_number();
        let res = with_partner_channel(
            &self.network_view,
            &locked_transfer.balance_proof.channel_id,
            &sender,
            |channel_state| {
                channel_state.handle_locked_transfer(&locked_transfer, block_number)?;
                Ok(channel_state.route_state())
            },
        );
        let from_route = match res {
            Ok(from_route) => from_route,
            Err(e) => return self.reject(&sender, "locked transfer", e),
        };
        self.notify_handler
            .notify_receive_locked_transfer(&locked_transfer);

        let init_res = if locked_transfer.target == our_address {
            let action = ActionInitTarget {
                our_address,
                from_route: from_route.clone(),
                from_transfer: locked_transfer.clone(),
            };
            target::init(&action, block_number).map_state(TransferRole::Target)
        } else {
            let routes = self
                .network_view
                .routes(&locked_transfer.balance_proof.token_network);
            let action = ActionInitMediator {
                our_address,
                from_route: from_route.clone(),
                from_transfer: locked_transfer.clone(),
                routes,
            };
            mediator::init(&action, block_number).map_state(TransferRole::Mediator)
        };

        match self.start_transfer(init_res) {
            Ok(outputs) => outputs,
            Err(TransferManagerError::DuplicateTransfer) => {
                // We already handle this secret hash. Give the new lock back.
                self.notify_handler.notify(
                    NoticeLevel::Warning,
                    format!(
                        "transfer {} is already in progress, disposing the new lock",
                        locked_transfer.lock.secret_hash
                    ),
                );
                vec![TransferOutput::Message {
                    recipient: sender,
                    message: Message::AnnounceDisposed(AnnounceDisposed {
                        channel_id: from_route.channel_id,
                        lock: locked_transfer.lock,
                    }),
                }]
            }
        }
    }

    fn handle_unlock(&self, sender: Address, unlock: Unlock) -> Vec<TransferOutput> {
        let res = with_partner_channel(
            &self.network_view,
            &unlock.balance_proof.channel_id,
            &sender,
            |channel_state| channel_state.handle_unlock(&unlock),
        );
        if let Err(e) = res {
            return self.reject(&sender, "unlock", e);
        }

        let secret_hash = unlock.secret.hash_lock();
        self.dispatch(
            &[Role::Mediator, Role::Target],
            &secret_hash,
            StateChange::ReceiveBalanceProof(ReceiveBalanceProof {
                sender,
                secret_hash,
                kind: BalanceProofKind::Unlock(unlock),
            }),
        )
    }

    fn handle_remove_expired_lock(
        &self,
        sender: Address,
        remove_expired_lock: RemoveExpiredLock,
    ) -> Vec<TransferOutput> {
        let block_number = self.block_number();
        let res = with_partner_channel(
            &self.network_view,
            &remove_expired_lock.balance_proof.channel_id,
            &sender,
            |channel_state| channel_state.handle_remove_expired_lock(&remove_expired_lock, block_number),
        );
        if let Err(e) = res {
            return self.reject(&sender, "expired lock removal", e);
        }

        let secret_hash = remove_expired_lock.secret_hash;
        self.dispatch(
            &[Role::Mediator, Role::Target],
            &secret_hash,
            StateChange::ReceiveBalanceProof(ReceiveBalanceProof {
                sender,
                secret_hash,
                kind: BalanceProofKind::RemoveExpiredLock(remove_expired_lock),
            }),
        )
    }
}

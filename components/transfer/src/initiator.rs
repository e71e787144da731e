//! The initiator of a payment.
//!
//! ```text
//! init -> WaitingSecretRequest -> WaitingUnlock -> Completed
//!                  |                   |
//!                  +-> Canceled        +-> Expired
//!                  +-> Expired
//! ```

use serde::{Deserialize, Serialize};

use proto::consts::BlockHeight;
use proto::crypto::{Address, ChannelId};
use proto::notify::messages::{NoticeLevel, TransferStatus};
use proto::state_change::{
    ActionCancelRoute, ActionInitInitiator, Block, ContractStateChange, ReceiveAnnounceDisposed,
    ReceiveSecretRequest, ReceiveSecretReveal, StateChange,
};
use proto::transfer::events::{
    ContractSend, Event, SendLockedTransfer, SendRemoveExpiredLock, SendRevealSecret, SendUnlock,
    TransferSentFailed, TransferSentSuccess,
};
use proto::transfer::messages::LockedTransferState;
use proto::transfer::route::{RouteState, RoutesState};

use crypto::hash_lock::verify_secret;

use crate::types::TransitionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitiatorStatus {
    /// A locked transfer was sent. The target did not ask for the secret yet.
    WaitingSecretRequest,
    /// The secret was released to the target. Waiting for our next hop to reveal it back.
    WaitingUnlock,
    Completed,
    Expired,
    Canceled,
}

impl InitiatorStatus {
    pub fn is_terminal(self) -> bool {
        match self {
            InitiatorStatus::WaitingSecretRequest | InitiatorStatus::WaitingUnlock => false,
            InitiatorStatus::Completed | InitiatorStatus::Expired | InitiatorStatus::Canceled => {
                true
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatorState {
    pub our_address: Address,
    /// Contains the secret.
    pub transfer: LockedTransferState,
    pub routes: RoutesState,
    /// The route our locked transfer currently goes through.
    pub opt_route: Option<RouteState>,
    pub block_number: BlockHeight,
    pub status: InitiatorStatus,
    /// The channel of the current route was closed on-chain.
    pub counterpart_on_chain: bool,
    /// A registration of the secret on-chain was requested.
    pub secret_registered: bool,
}

fn sent_failed(transfer: &LockedTransferState, status: TransferStatus, reason: &str) -> Event {
    Event::TransferSentFailed(TransferSentFailed {
        payment_id: transfer.payment_id,
        token_network: transfer.token_network,
        target: transfer.target,
        amount: transfer.amount,
        secret_hash: transfer.secret_hash,
        status,
        reason: reason.to_owned(),
    })
}

fn sent_success(transfer: &LockedTransferState) -> Event {
    Event::TransferSentSuccess(TransferSentSuccess {
        payment_id: transfer.payment_id,
        token_network: transfer.token_network,
        target: transfer.target,
        amount: transfer.amount,
        secret_hash: transfer.secret_hash,
    })
}

/// Start a new payment.
pub fn init(
    action: &ActionInitInitiator,
    block_number: BlockHeight,
) -> TransitionResult<InitiatorState> {
    let mut state = InitiatorState {
        our_address: action.our_address,
        transfer: action.transfer.clone(),
        routes: RoutesState::new(action.routes.clone()),
        opt_route: None,
        block_number,
        status: InitiatorStatus::WaitingSecretRequest,
        counterpart_on_chain: false,
        secret_registered: false,
    };

    let secret_matches = state
        .transfer
        .opt_secret
        .as_ref()
        .map(|secret| verify_secret(secret, &state.transfer.secret_hash))
        .unwrap_or(false);
    if !secret_matches {
        state.status = InitiatorStatus::Canceled;
        let events = vec![sent_failed(
            &state.transfer,
            TransferStatus::Canceled,
            "secret does not match the secret hash",
        )];
        return TransitionResult::new(state, events);
    }
    if state.transfer.expiration <= block_number {
        state.status = InitiatorStatus::Canceled;
        let events = vec![sent_failed(
            &state.transfer,
            TransferStatus::Canceled,
            "lock expiration is in the past",
        )];
        return TransitionResult::new(state, events);
    }

    try_new_route(state, Vec::new())
}

/// Send the locked transfer through the best remaining route.
fn try_new_route(mut state: InitiatorState, mut events: Vec<Event>) -> TransitionResult<InitiatorState> {
    let amount = state.transfer.amount;
    let expiration = state.transfer.expiration;
    let block_number = state.block_number;

    let opt_route = state.routes.pop_best(|route| {
        route.is_open()
            && route.available_balance >= amount
            && expiration > block_number.saturating_add(route.reveal_timeout)
    });

    match opt_route {
        Some(route) => {
            debug!(
                "initiator: sending transfer {} through channel {}",
                state.transfer.secret_hash, route.channel_id
            );
            events.push(Event::SendLockedTransfer(SendLockedTransfer {
                recipient: route.node_address,
                channel_id: route.channel_id,
                transfer: LockedTransferState {
                    opt_secret: None,
                    ..state.transfer.clone()
                },
            }));
            state.opt_route = Some(route);
            state.counterpart_on_chain = false;
            state.status = InitiatorStatus::WaitingSecretRequest;
        }
        None => {
            state.opt_route = None;
            state.status = InitiatorStatus::Canceled;
            events.push(sent_failed(
                &state.transfer,
                TransferStatus::Canceled,
                "no usable route",
            ));
        }
    }
    TransitionResult::new(state, events)
}

pub fn state_transition(
    state: InitiatorState,
    state_change: &StateChange,
) -> TransitionResult<InitiatorState> {
    if state.status.is_terminal() {
        return TransitionResult::unchanged(state);
    }

    match (state.status, state_change) {
        (_, StateChange::Block(block)) => handle_block(state, block),
        (InitiatorStatus::WaitingSecretRequest, StateChange::ActionCancelRoute(cancel_route)) => {
            handle_cancel_route(state, cancel_route)
        }
        (InitiatorStatus::WaitingSecretRequest, StateChange::ReceiveSecretRequest(request)) => {
            handle_secret_request(state, request)
        }
        (InitiatorStatus::WaitingSecretRequest, StateChange::ReceiveAnnounceDisposed(disposed)) => {
            handle_announce_disposed(state, disposed)
        }
        (InitiatorStatus::WaitingUnlock, StateChange::ReceiveAnnounceDisposed(_)) => {
            let events = vec![Event::notice(
                NoticeLevel::Warning,
                format!(
                    "ignoring dispose of transfer {}: secret was already released",
                    state.transfer.secret_hash
                ),
            )];
            TransitionResult::new(state, events)
        }
        (InitiatorStatus::WaitingUnlock, StateChange::ReceiveSecretReveal(reveal)) => {
            handle_secret_reveal(state, reveal)
        }
        (_, StateChange::Contract(contract_state_change)) => {
            handle_contract_state_change(state, contract_state_change)
        }
        _ => TransitionResult::unchanged(state),
    }
}

fn is_current_route(state: &InitiatorState, node_address: &Address, channel_id: &ChannelId) -> bool {
    match &state.opt_route {
        Some(route) => &route.node_address == node_address && &route.channel_id == channel_id,
        None => false,
    }
}

fn handle_cancel_route(
    mut state: InitiatorState,
    cancel_route: &ActionCancelRoute,
) -> TransitionResult<InitiatorState> {
    let route_matches = state
        .opt_route
        .as_ref()
        .map(|route| route.channel_id == cancel_route.channel_id)
        .unwrap_or(false);
    if cancel_route.secret_hash != state.transfer.secret_hash || !route_matches {
        return TransitionResult::unchanged(state);
    }

    warn!(
        "initiator: route {} canceled for transfer {}: {}",
        cancel_route.channel_id, state.transfer.secret_hash, cancel_route.reason
    );
    if let Some(route) = state.opt_route.take() {
        state.routes.cancel(route);
    }
    try_new_route(state, Vec::new())
}

fn handle_announce_disposed(
    mut state: InitiatorState,
    disposed: &ReceiveAnnounceDisposed,
) -> TransitionResult<InitiatorState> {
    if disposed.lock.secret_hash != state.transfer.secret_hash
        || !is_current_route(&state, &disposed.sender, &disposed.channel_id)
    {
        return TransitionResult::unchanged(state);
    }
    if disposed.lock != state.transfer.lock() {
        let events = vec![Event::notice(
            NoticeLevel::Warning,
            format!(
                "ignoring dispose of transfer {}: lock does not match",
                state.transfer.secret_hash
            ),
        )];
        return TransitionResult::new(state, events);
    }

    debug!(
        "initiator: next hop disposed transfer {}, trying another route",
        state.transfer.secret_hash
    );
    if let Some(route) = state.opt_route.take() {
        state.routes.cancel(route);
    }
    try_new_route(state, Vec::new())
}

fn handle_secret_request(
    mut state: InitiatorState,
    request: &ReceiveSecretRequest,
) -> TransitionResult<InitiatorState> {
    let transfer = &state.transfer;
    let is_valid = request.sender == transfer.target
        && request.secret_hash == transfer.secret_hash
        && request.amount == transfer.amount
        && request.payment_id == transfer.payment_id;

    let secret = match (&transfer.opt_secret, is_valid) {
        (Some(secret), true) => *secret,
        _ => {
            let events = vec![Event::notice(
                NoticeLevel::Warning,
                format!(
                    "ignoring invalid secret request from {} for transfer {}",
                    request.sender, transfer.secret_hash
                ),
            )];
            return TransitionResult::new(state, events);
        }
    };

    let events = vec![Event::SendRevealSecret(SendRevealSecret {
        recipient: transfer.target,
        secret,
    })];
    state.status = InitiatorStatus::WaitingUnlock;
    TransitionResult::new(state, events)
}

/// The next hop learned the secret. We can pay it.
fn handle_secret_reveal(
    mut state: InitiatorState,
    reveal: &ReceiveSecretReveal,
) -> TransitionResult<InitiatorState> {
    let route = match &state.opt_route {
        Some(route) if route.node_address == reveal.sender => route.clone(),
        _ => return TransitionResult::unchanged(state),
    };
    if reveal.secret_hash != state.transfer.secret_hash {
        let events = vec![Event::notice(
            NoticeLevel::Warning,
            format!("ignoring wrong secret from {}", reveal.sender),
        )];
        return TransitionResult::new(state, events);
    }

    let transfer = &state.transfer;
    let events = vec![
        Event::SendUnlock(SendUnlock {
            recipient: route.node_address,
            channel_id: route.channel_id,
            payment_id: transfer.payment_id,
            secret: reveal.secret,
            secret_hash: transfer.secret_hash,
        }),
        sent_success(transfer),
        Event::UnlockSuccess {
            payment_id: transfer.payment_id,
            secret_hash: transfer.secret_hash,
        },
    ];
    state.status = InitiatorStatus::Completed;
    TransitionResult::new(state, events)
}

fn handle_block(mut state: InitiatorState, block: &Block) -> TransitionResult<InitiatorState> {
    state.block_number = block.block_number;
    let mut events = Vec::new();

    let expiration = state.transfer.expiration;
    let reveal_timeout = state
        .opt_route
        .as_ref()
        .map(|route| route.reveal_timeout)
        .unwrap_or(0);

    // The next hop went on-chain and may claim the lock there. It needs the secret registered.
    if state.status == InitiatorStatus::WaitingUnlock
        && state.counterpart_on_chain
        && !state.secret_registered
        && state.block_number >= expiration.saturating_sub(reveal_timeout)
        && state.block_number < expiration
    {
        if let Some(secret) = state.transfer.opt_secret {
            events.push(Event::ContractSend(ContractSend::RegisterSecret {
                secret,
                deadline: expiration.saturating_sub(1),
            }));
            state.secret_registered = true;
        }
    }

    if state.block_number >= expiration {
        state.status = InitiatorStatus::Expired;
        let transfer = &state.transfer;
        if let Some(route) = &state.opt_route {
            if !state.counterpart_on_chain {
                events.push(Event::SendRemoveExpiredLock(SendRemoveExpiredLock {
                    recipient: route.node_address,
                    channel_id: route.channel_id,
                    secret_hash: transfer.secret_hash,
                }));
            }
        }
        events.push(sent_failed(transfer, TransferStatus::Expired, "lock expired"));
        events.push(Event::UnlockFailed {
            payment_id: transfer.payment_id,
            secret_hash: transfer.secret_hash,
            reason: "lock expired".to_owned(),
        });
    }

    TransitionResult::new(state, events)
}

fn handle_contract_state_change(
    mut state: InitiatorState,
    contract_state_change: &ContractStateChange,
) -> TransitionResult<InitiatorState> {
    match contract_state_change {
        ContractStateChange::ChannelClosed { channel_id, .. } => {
            let route_matches = state
                .opt_route
                .as_ref()
                .map(|route| &route.channel_id == channel_id)
                .unwrap_or(false);
            if route_matches {
                debug!(
                    "initiator: channel {} of transfer {} was closed",
                    channel_id, state.transfer.secret_hash
                );
                state.counterpart_on_chain = true;
            }
            TransitionResult::unchanged(state)
        }
        ContractStateChange::SecretRegistered { secret_hash, .. }
            if secret_hash == &state.transfer.secret_hash
                && state.status == InitiatorStatus::WaitingUnlock =>
        {
            // The secret is public: the payment can be claimed on-chain.
            let events = vec![sent_success(&state.transfer)];
            state.status = InitiatorStatus::Completed;
            TransitionResult::new(state, events)
        }
        _ => TransitionResult::unchanged(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proto::state_change::{ActionInitInitiator, ReceiveSecretRequest, ReceiveSecretReveal};
    use proto::transfer::messages::Lock;

    use crate::test_utils::*;

    fn init_action(routes: Vec<RouteState>) -> ActionInitInitiator {
        let mut transfer = transfer_state(10, 50);
        transfer.opt_secret = Some(secret(7));
        ActionInitInitiator {
            our_address: address(1),
            transfer,
            routes,
        }
    }

    fn secret_request(amount: u128) -> StateChange {
        StateChange::ReceiveSecretRequest(ReceiveSecretRequest {
            sender: address(9),
            payment_id: 0x1234,
            amount,
            secret_hash: secret_hash(7),
        })
    }

    fn sent_locked_transfer_channels(events: &[Event]) -> Vec<ChannelId> {
        events
            .iter()
            .filter_map(|event| match event {
                Event::SendLockedTransfer(send) => Some(send.channel_id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_initiator_picks_best_route() {
        let res = init(&init_action(vec![route(2, 20), route(3, 40), route(4, 5)]), 10);
        assert_eq!(res.new_state.status, InitiatorStatus::WaitingSecretRequest);
        assert_eq!(sent_locked_transfer_channels(&res.events), vec![channel_id(3)]);

        // The secret never leaves with the locked transfer:
        match &res.events[0] {
            Event::SendLockedTransfer(send) => assert!(send.transfer.opt_secret.is_none()),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_initiator_no_route() {
        // Not enough balance anywhere:
        let res = init(&init_action(vec![route(2, 5), route(3, 9)]), 10);
        assert_eq!(res.new_state.status, InitiatorStatus::Canceled);
        match &res.events[..] {
            [Event::TransferSentFailed(failed)] => assert_eq!(failed.status, TransferStatus::Canceled),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_initiator_wrong_secret() {
        let mut action = init_action(vec![route(2, 20)]);
        action.transfer.opt_secret = Some(secret(8));
        let res = init(&action, 10);
        assert_eq!(res.new_state.status, InitiatorStatus::Canceled);
        assert!(sent_locked_transfer_channels(&res.events).is_empty());
    }

    #[test]
    fn test_initiator_retries_routes() {
        let res = init(&init_action(vec![route(2, 20), route(3, 40)]), 10);
        let state = res.new_state;

        // The channel refused to carry the transfer:
        let cancel = StateChange::ActionCancelRoute(ActionCancelRoute {
            secret_hash: secret_hash(7),
            channel_id: channel_id(3),
            reason: "insufficient balance".to_owned(),
        });
        let res = state_transition(state, &cancel);
        assert_eq!(sent_locked_transfer_channels(&res.events), vec![channel_id(2)]);
        let state = res.new_state;
        assert_eq!(state.routes.canceled_routes.len(), 1);

        // The next hop disposed the lock:
        let disposed = StateChange::ReceiveAnnounceDisposed(ReceiveAnnounceDisposed {
            sender: address(2),
            channel_id: channel_id(2),
            lock: Lock {
                amount: 10,
                expiration: 50,
                secret_hash: secret_hash(7),
            },
        });
        let res = state_transition(state, &disposed);
        assert_eq!(res.new_state.status, InitiatorStatus::Canceled);
        match &res.events[..] {
            [Event::TransferSentFailed(failed)] => assert_eq!(failed.status, TransferStatus::Canceled),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_initiator_success() {
        let state = init(&init_action(vec![route(2, 20)]), 10).new_state;

        // Wrong amount is ignored, with a notice:
        let res = state_transition(state, &secret_request(11));
        assert_eq!(res.new_state.status, InitiatorStatus::WaitingSecretRequest);
        assert!(has_notice(&res.events));

        let res = state_transition(res.new_state, &secret_request(10));
        assert_eq!(res.new_state.status, InitiatorStatus::WaitingUnlock);
        assert_eq!(
            res.events,
            vec![Event::SendRevealSecret(SendRevealSecret {
                recipient: address(9),
                secret: secret(7),
            })]
        );

        // A reveal from a node that is not our next hop is ignored:
        let reveal = |sender| {
            StateChange::ReceiveSecretReveal(ReceiveSecretReveal {
                sender,
                secret: secret(7),
                secret_hash: secret_hash(7),
            })
        };
        let res = state_transition(res.new_state, &reveal(address(5)));
        assert!(res.events.is_empty());

        let res = state_transition(res.new_state, &reveal(address(2)));
        assert_eq!(res.new_state.status, InitiatorStatus::Completed);
        match &res.events[..] {
            [Event::SendUnlock(send_unlock), Event::TransferSentSuccess(_), Event::UnlockSuccess { .. }] => {
                assert_eq!(send_unlock.channel_id, channel_id(2));
                assert_eq!(send_unlock.secret, secret(7));
            }
            _ => unreachable!(),
        }

        // Terminal:
        let res = state_transition(res.new_state, &block(100));
        assert!(res.events.is_empty());
    }

    #[test]
    fn test_initiator_expires() {
        let state = init(&init_action(vec![route(2, 20)]), 10).new_state;
        let res = state_transition(state, &block(49));
        assert!(res.events.is_empty());

        let res = state_transition(res.new_state, &block(50));
        assert_eq!(res.new_state.status, InitiatorStatus::Expired);
        match &res.events[..] {
            [Event::SendRemoveExpiredLock(remove), Event::TransferSentFailed(failed), Event::UnlockFailed { .. }] =>
            {
                assert_eq!(remove.channel_id, channel_id(2));
                assert_eq!(failed.status, TransferStatus::Expired);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_initiator_registers_secret_on_chain() {
        let state = init(&init_action(vec![route(2, 20)]), 10).new_state;
        let state = state_transition(state, &secret_request(10)).new_state;

        let closed = StateChange::Contract(ContractStateChange::ChannelClosed {
            token_network: address(TOKEN_NETWORK),
            channel_id: channel_id(2),
            closing_participant: address(2),
            block_number: 20,
        });
        let state = state_transition(state, &closed).new_state;
        assert!(state.counterpart_on_chain);

        // Not yet:
        let res = state_transition(state, &block(44));
        assert!(res.events.is_empty());

        // expiration - reveal_timeout:
        let res = state_transition(res.new_state, &block(45));
        assert_eq!(
            res.events,
            vec![Event::ContractSend(ContractSend::RegisterSecret {
                secret: secret(7),
                deadline: 49,
            })]
        );
        // Only once:
        let res = state_transition(res.new_state, &block(46));
        assert!(res.events.is_empty());

        let registered = StateChange::Contract(ContractStateChange::SecretRegistered {
            secret: secret(7),
            secret_hash: secret_hash(7),
            block_number: 46,
        });
        let res = state_transition(res.new_state, &registered);
        assert_eq!(res.new_state.status, InitiatorStatus::Completed);
    }
}

//! A node in the middle of a payment route.
//!
//! The mediator receives a lock from its payer and offers a lock on the same secret hash to
//! a payee. The lock offered downstream expires at least `reveal_timeout` blocks before the
//! lock received from upstream, so that a secret learned at the last moment downstream can
//! still be claimed upstream.
//!
//! ```text
//! init -> ForwardedToNextHop -> WaitingSecretPropagation -> Completed
//!           |        |                    |
//!           |        +-> ExpiredBoth      +-> PartialUnlockOnChain
//!           +-> Canceled
//! ```

use serde::{Deserialize, Serialize};

use proto::consts::BlockHeight;
use proto::crypto::{Address, Secret};
use proto::notify::messages::NoticeLevel;
use proto::state_change::{
    ActionCancelRoute, ActionInitMediator, BalanceProofKind, Block, ContractStateChange,
    ReceiveAnnounceDisposed, ReceiveBalanceProof, ReceiveSecretReveal, StateChange,
};
use proto::transfer::events::{
    ContractSend, Event, SendAnnounceDisposed, SendLockedTransfer, SendRemoveExpiredLock,
    SendRevealSecret, SendUnlock,
};
use proto::transfer::messages::LockedTransferState;
use proto::transfer::route::{RouteState, RoutesState};

use crate::types::TransitionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediatorStatus {
    /// A lock was offered to the payee. Waiting for the secret.
    ForwardedToNextHop,
    /// The secret is known and was revealed to the payer. Waiting for the payer's unlock.
    WaitingSecretPropagation,
    Completed,
    /// Both locks expired and the secret was never learned.
    ExpiredBoth,
    /// The payer did not unlock in time. The lock is claimed on-chain.
    PartialUnlockOnChain,
    /// No route could carry the transfer. The lock was disposed upstream.
    Canceled,
}

impl MediatorStatus {
    pub fn is_terminal(self) -> bool {
        match self {
            MediatorStatus::ForwardedToNextHop | MediatorStatus::WaitingSecretPropagation => false,
            MediatorStatus::Completed
            | MediatorStatus::ExpiredBoth
            | MediatorStatus::PartialUnlockOnChain
            | MediatorStatus::Canceled => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediatorState {
    pub our_address: Address,
    /// The channel with our payer.
    pub from_route: RouteState,
    pub from_transfer: LockedTransferState,
    pub routes: RoutesState,
    /// The channel with our payee.
    pub opt_to_route: Option<RouteState>,
    pub opt_to_transfer: Option<LockedTransferState>,
    pub opt_secret: Option<Secret>,
    pub block_number: BlockHeight,
    pub status: MediatorStatus,
    pub downstream_lock_removed: bool,
    /// The channel with our payer was closed on-chain.
    pub payer_on_chain: bool,
}

impl MediatorState {
    /// Expiration of the lock we offer downstream.
    pub fn downstream_expiration(&self) -> BlockHeight {
        self.from_transfer
            .expiration
            .saturating_sub(self.from_route.reveal_timeout)
    }

    /// Last block at which the payer can still unlock off-chain, before we go on-chain.
    fn payer_deadline(&self) -> BlockHeight {
        self.from_transfer
            .expiration
            .saturating_sub(self.from_route.reveal_timeout)
    }

    fn is_payee(&self, address: &Address) -> bool {
        self.opt_to_route
            .as_ref()
            .map(|route| &route.node_address == address)
            .unwrap_or(false)
    }
}

pub fn init(action: &ActionInitMediator, block_number: BlockHeight) -> TransitionResult<MediatorState> {
    let state = MediatorState {
        our_address: action.our_address,
        from_route: action.from_route.clone(),
        from_transfer: LockedTransferState::from_locked_transfer(&action.from_transfer),
        routes: RoutesState::new(action.routes.clone()),
        opt_to_route: None,
        opt_to_transfer: None,
        opt_secret: None,
        block_number,
        status: MediatorStatus::ForwardedToNextHop,
        downstream_lock_removed: false,
        payer_on_chain: false,
    };
    try_new_route(state, Vec::new())
}

/// Forward the transfer through the best route that keeps the reveal margin. If there is
/// no such route, give the lock back to the payer.
fn try_new_route(mut state: MediatorState, mut events: Vec<Event>) -> TransitionResult<MediatorState> {
    let amount = state.from_transfer.amount;
    let upstream_expiration = state.from_transfer.expiration;
    let downstream_expiration = state.downstream_expiration();
    let block_number = state.block_number;
    let payer = state.from_route.node_address;

    let opt_route = state.routes.pop_best(|route| {
        route.is_open()
            && route.node_address != payer
            && route.available_balance >= amount
            && downstream_expiration < upstream_expiration
            && downstream_expiration > block_number.saturating_add(route.reveal_timeout)
    });

    match opt_route {
        Some(route) => {
            debug!(
                "mediator: forwarding transfer {} to {} (expiration {} -> {})",
                state.from_transfer.secret_hash,
                route.node_address,
                upstream_expiration,
                downstream_expiration
            );
            let to_transfer = LockedTransferState {
                expiration: downstream_expiration,
                opt_secret: None,
                ..state.from_transfer.clone()
            };
            events.push(Event::SendLockedTransfer(SendLockedTransfer {
                recipient: route.node_address,
                channel_id: route.channel_id,
                transfer: to_transfer.clone(),
            }));
            state.opt_to_route = Some(route);
            state.opt_to_transfer = Some(to_transfer);
            state.downstream_lock_removed = false;
            state.status = MediatorStatus::ForwardedToNextHop;
        }
        None => {
            events.push(Event::SendAnnounceDisposed(SendAnnounceDisposed {
                recipient: payer,
                channel_id: state.from_route.channel_id,
                lock: state.from_transfer.lock(),
            }));
            events.push(Event::notice(
                NoticeLevel::Info,
                format!(
                    "no route for mediated transfer {}, disposed upstream",
                    state.from_transfer.secret_hash
                ),
            ));
            state.opt_to_route = None;
            state.opt_to_transfer = None;
            state.status = MediatorStatus::Canceled;
        }
    }
    TransitionResult::new(state, events)
}

pub fn state_transition(
    state: MediatorState,
    state_change: &StateChange,
) -> TransitionResult<MediatorState> {
    if state.status.is_terminal() {
        return TransitionResult::unchanged(state);
    }

    match (state.status, state_change) {
        (_, StateChange::Block(block)) => handle_block(state, block),
        (MediatorStatus::ForwardedToNextHop, StateChange::ActionCancelRoute(cancel_route)) => {
            handle_cancel_route(state, cancel_route)
        }
        (MediatorStatus::ForwardedToNextHop, StateChange::ReceiveAnnounceDisposed(disposed)) => {
            handle_announce_disposed(state, disposed)
        }
        (MediatorStatus::WaitingSecretPropagation, StateChange::ReceiveAnnounceDisposed(_)) => {
            // The secret is known. A dispose does not change what we are owed.
            let events = vec![Event::notice(
                NoticeLevel::Warning,
                format!(
                    "ignoring dispose of transfer {}: secret is known",
                    state.from_transfer.secret_hash
                ),
            )];
            TransitionResult::new(state, events)
        }
        (MediatorStatus::ForwardedToNextHop, StateChange::ReceiveSecretReveal(reveal)) => {
            handle_secret_reveal(state, reveal)
        }
        (MediatorStatus::WaitingSecretPropagation, StateChange::ReceiveBalanceProof(balance_proof)) => {
            handle_payer_balance_proof(state, balance_proof)
        }
        (_, StateChange::Contract(contract_state_change)) => {
            handle_contract_state_change(state, contract_state_change)
        }
        _ => TransitionResult::unchanged(state),
    }
}

fn handle_cancel_route(
    mut state: MediatorState,
    cancel_route: &ActionCancelRoute,
) -> TransitionResult<MediatorState> {
    let route_matches = state
        .opt_to_route
        .as_ref()
        .map(|route| route.channel_id == cancel_route.channel_id)
        .unwrap_or(false);
    if cancel_route.secret_hash != state.from_transfer.secret_hash || !route_matches {
        return TransitionResult::unchanged(state);
    }

    warn!(
        "mediator: route {} canceled for transfer {}: {}",
        cancel_route.channel_id, state.from_transfer.secret_hash, cancel_route.reason
    );
    if let Some(route) = state.opt_to_route.take() {
        state.routes.cancel(route);
    }
    try_new_route(state, Vec::new())
}

fn handle_announce_disposed(
    mut state: MediatorState,
    disposed: &ReceiveAnnounceDisposed,
) -> TransitionResult<MediatorState> {
    let lock_matches = state
        .opt_to_transfer
        .as_ref()
        .map(|to_transfer| to_transfer.lock() == disposed.lock)
        .unwrap_or(false);
    let channel_matches = state
        .opt_to_route
        .as_ref()
        .map(|route| route.channel_id == disposed.channel_id)
        .unwrap_or(false);
    if !state.is_payee(&disposed.sender) || !channel_matches || !lock_matches {
        return TransitionResult::unchanged(state);
    }

    debug!(
        "mediator: payee disposed transfer {}, trying another route",
        state.from_transfer.secret_hash
    );
    if let Some(route) = state.opt_to_route.take() {
        state.routes.cancel(route);
    }
    try_new_route(state, Vec::new())
}

fn handle_secret_reveal(
    state: MediatorState,
    reveal: &ReceiveSecretReveal,
) -> TransitionResult<MediatorState> {
    if !state.is_payee(&reveal.sender) {
        return TransitionResult::unchanged(state);
    }
    if reveal.secret_hash != state.from_transfer.secret_hash {
        let events = vec![Event::notice(
            NoticeLevel::Warning,
            format!("ignoring wrong secret from {}", reveal.sender),
        )];
        return TransitionResult::new(state, events);
    }
    learn_secret(state, reveal.secret)
}

/// Pay the payee and ask the payer to pay us.
fn learn_secret(mut state: MediatorState, secret: Secret) -> TransitionResult<MediatorState> {
    let mut events = Vec::new();
    state.opt_secret = Some(secret);

    events.push(Event::SendRevealSecret(SendRevealSecret {
        recipient: state.from_route.node_address,
        secret,
    }));

    if let (Some(to_route), Some(to_transfer)) = (&state.opt_to_route, &state.opt_to_transfer) {
        if to_route.is_open() && state.block_number < to_transfer.expiration {
            events.push(Event::SendUnlock(SendUnlock {
                recipient: to_route.node_address,
                channel_id: to_route.channel_id,
                payment_id: to_transfer.payment_id,
                secret,
                secret_hash: to_transfer.secret_hash,
            }));
            events.push(Event::UnlockSuccess {
                payment_id: to_transfer.payment_id,
                secret_hash: to_transfer.secret_hash,
            });
        }
    }

    state.status = MediatorStatus::WaitingSecretPropagation;
    check_payer_deadline(state, events)
}

/// Go on-chain if the payer did not unlock early enough.
fn check_payer_deadline(mut state: MediatorState, mut events: Vec<Event>) -> TransitionResult<MediatorState> {
    if state.status != MediatorStatus::WaitingSecretPropagation
        || state.block_number < state.payer_deadline()
    {
        return TransitionResult::new(state, events);
    }
    let secret = match state.opt_secret {
        Some(secret) => secret,
        None => return TransitionResult::new(state, events),
    };

    let from_transfer = &state.from_transfer;
    let from_route = &state.from_route;
    let deadline = from_transfer.expiration.saturating_sub(1);

    warn!(
        "mediator: payer {} did not unlock transfer {}, going on-chain",
        from_route.node_address, from_transfer.secret_hash
    );
    events.push(Event::ContractSend(ContractSend::RegisterSecret { secret, deadline }));
    if !state.payer_on_chain {
        events.push(Event::ContractSend(ContractSend::ChannelClose {
            token_network: from_transfer.token_network,
            channel_id: from_route.channel_id,
            partner: from_route.node_address,
            deadline,
        }));
    }
    events.push(Event::ContractSend(ContractSend::Unlock {
        token_network: from_transfer.token_network,
        channel_id: from_route.channel_id,
        partner: from_route.node_address,
        secret_hash: from_transfer.secret_hash,
        deadline: deadline.saturating_add(from_route.settle_timeout),
    }));
    events.push(Event::notice(
        NoticeLevel::Warning,
        format!(
            "payer did not unlock transfer {}, claiming on-chain",
            from_transfer.secret_hash
        ),
    ));
    state.status = MediatorStatus::PartialUnlockOnChain;
    TransitionResult::new(state, events)
}

fn handle_payer_balance_proof(
    mut state: MediatorState,
    balance_proof: &ReceiveBalanceProof,
) -> TransitionResult<MediatorState> {
    if balance_proof.sender != state.from_route.node_address
        || balance_proof.secret_hash != state.from_transfer.secret_hash
    {
        return TransitionResult::unchanged(state);
    }
    match &balance_proof.kind {
        BalanceProofKind::Unlock(_) => {
            debug!(
                "mediator: transfer {} completed",
                state.from_transfer.secret_hash
            );
            state.status = MediatorStatus::Completed;
            TransitionResult::new(state, Vec::new())
        }
        BalanceProofKind::RemoveExpiredLock(_) => {
            let events = vec![Event::notice(
                NoticeLevel::Error,
                format!(
                    "payer removed lock {} although the secret is known",
                    state.from_transfer.secret_hash
                ),
            )];
            TransitionResult::new(state, events)
        }
    }
}

fn handle_block(mut state: MediatorState, block: &Block) -> TransitionResult<MediatorState> {
    state.block_number = block.block_number;
    let mut events = Vec::new();

    match state.status {
        MediatorStatus::ForwardedToNextHop => {
            if let (Some(to_route), Some(to_transfer)) = (&state.opt_to_route, &state.opt_to_transfer) {
                if !state.downstream_lock_removed && state.block_number >= to_transfer.expiration {
                    events.push(Event::SendRemoveExpiredLock(SendRemoveExpiredLock {
                        recipient: to_route.node_address,
                        channel_id: to_route.channel_id,
                        secret_hash: to_transfer.secret_hash,
                    }));
                    state.downstream_lock_removed = true;
                }
            }
            if state.block_number >= state.from_transfer.expiration {
                events.push(Event::UnlockFailed {
                    payment_id: state.from_transfer.payment_id,
                    secret_hash: state.from_transfer.secret_hash,
                    reason: "lock expired without secret".to_owned(),
                });
                state.status = MediatorStatus::ExpiredBoth;
            }
            TransitionResult::new(state, events)
        }
        MediatorStatus::WaitingSecretPropagation => check_payer_deadline(state, events),
        _ => TransitionResult::unchanged(state),
    }
}

fn handle_contract_state_change(
    mut state: MediatorState,
    contract_state_change: &ContractStateChange,
) -> TransitionResult<MediatorState> {
    match contract_state_change {
        ContractStateChange::ChannelClosed { channel_id, .. }
            if channel_id == &state.from_route.channel_id =>
        {
            state.payer_on_chain = true;
            state.from_route.opt_closed_block = Some(contract_state_change.block_number());
            TransitionResult::unchanged(state)
        }
        ContractStateChange::ChannelClosed { channel_id, .. } => {
            if let Some(to_route) = state.opt_to_route.as_mut() {
                if &to_route.channel_id == channel_id {
                    to_route.opt_closed_block = Some(contract_state_change.block_number());
                }
            }
            TransitionResult::unchanged(state)
        }
        ContractStateChange::SecretRegistered {
            secret,
            secret_hash,
            ..
        } if secret_hash == &state.from_transfer.secret_hash
            && state.status == MediatorStatus::ForwardedToNextHop =>
        {
            learn_secret(state, *secret)
        }
        _ => TransitionResult::unchanged(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use quickcheck_macros::quickcheck;

    use proto::state_change::ActionInitMediator;
    use proto::transfer::messages::Unlock;

    use crate::test_utils::*;

    /// Node 5 mediates a transfer from node 2, with an upstream lock expiring at 100.
    fn init_action(routes: Vec<RouteState>) -> ActionInitMediator {
        ActionInitMediator {
            our_address: address(5),
            from_route: route(2, 0),
            from_transfer: locked_transfer(2, 5, 10, 100),
            routes,
        }
    }

    fn reveal_from(sender: u8) -> StateChange {
        StateChange::ReceiveSecretReveal(ReceiveSecretReveal {
            sender: address(sender),
            secret: secret(7),
            secret_hash: secret_hash(7),
        })
    }

    fn payer_unlock() -> StateChange {
        let locked_transfer = locked_transfer(2, 5, 10, 100);
        StateChange::ReceiveBalanceProof(ReceiveBalanceProof {
            sender: address(2),
            secret_hash: secret_hash(7),
            kind: BalanceProofKind::Unlock(Unlock {
                payment_id: locked_transfer.payment_id,
                secret: secret(7),
                balance_proof: locked_transfer.balance_proof,
            }),
        })
    }

    #[test]
    fn test_mediator_keeps_reveal_margin() {
        let res = init(&init_action(vec![route(3, 50), route(4, 20)]), 10);
        assert_eq!(res.new_state.status, MediatorStatus::ForwardedToNextHop);
        match &res.events[..] {
            [Event::SendLockedTransfer(send)] => {
                assert_eq!(send.recipient, address(3));
                assert_eq!(send.transfer.expiration, 100 - REVEAL_TIMEOUT);
                assert!(send.transfer.expiration < 100);
                assert_eq!(send.transfer.amount, 10);
                assert_eq!(send.transfer.secret_hash, secret_hash(7));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_mediator_no_safe_route_cancels_upstream() {
        // Downstream lock would expire at 95. At block 90, no payee has enough time to reveal:
        let res = init(&init_action(vec![route(3, 50), route(4, 20)]), 90);
        assert_eq!(res.new_state.status, MediatorStatus::Canceled);
        let mut disposed = false;
        for event in &res.events {
            match event {
                Event::SendLockedTransfer(_) => unreachable!(),
                Event::SendAnnounceDisposed(send) => {
                    assert_eq!(send.recipient, address(2));
                    assert_eq!(send.channel_id, channel_id(2));
                    assert_eq!(send.lock.expiration, 100);
                    disposed = true;
                }
                _ => {}
            }
        }
        assert!(disposed);
    }

    #[test]
    fn test_mediator_never_routes_back_to_payer() {
        let res = init(&init_action(vec![route(2, 50)]), 10);
        assert_eq!(res.new_state.status, MediatorStatus::Canceled);
    }

    #[test]
    fn test_mediator_reroutes_on_dispose() {
        let state = init(&init_action(vec![route(3, 50), route(4, 20)]), 10).new_state;
        let disposed = StateChange::ReceiveAnnounceDisposed(ReceiveAnnounceDisposed {
            sender: address(3),
            channel_id: channel_id(3),
            lock: state.opt_to_transfer.as_ref().unwrap().lock(),
        });
        let res = state_transition(state, &disposed);
        assert_eq!(res.new_state.status, MediatorStatus::ForwardedToNextHop);
        match &res.events[..] {
            [Event::SendLockedTransfer(send)] => assert_eq!(send.recipient, address(4)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_mediator_secret_beats_dispose() {
        let state = init(&init_action(vec![route(3, 50)]), 10).new_state;
        let lock = state.opt_to_transfer.as_ref().unwrap().lock();
        let state = state_transition(state, &reveal_from(3)).new_state;
        assert_eq!(state.status, MediatorStatus::WaitingSecretPropagation);

        let disposed = StateChange::ReceiveAnnounceDisposed(ReceiveAnnounceDisposed {
            sender: address(3),
            channel_id: channel_id(3),
            lock,
        });
        let res = state_transition(state, &disposed);
        assert_eq!(res.new_state.status, MediatorStatus::WaitingSecretPropagation);
        assert!(has_notice(&res.events));
    }

    #[test]
    fn test_mediator_success() {
        let state = init(&init_action(vec![route(3, 50)]), 10).new_state;

        // Only the payee can reveal:
        let res = state_transition(state, &reveal_from(4));
        assert!(res.events.is_empty());

        let res = state_transition(res.new_state, &reveal_from(3));
        assert_eq!(res.new_state.status, MediatorStatus::WaitingSecretPropagation);
        match &res.events[..] {
            [Event::SendRevealSecret(reveal), Event::SendUnlock(unlock), Event::UnlockSuccess { .. }] => {
                assert_eq!(reveal.recipient, address(2));
                assert_eq!(unlock.recipient, address(3));
                assert_eq!(unlock.channel_id, channel_id(3));
            }
            _ => unreachable!(),
        }

        let res = state_transition(res.new_state, &payer_unlock());
        assert_eq!(res.new_state.status, MediatorStatus::Completed);
    }

    #[test]
    fn test_mediator_expired_both() {
        let state = init(&init_action(vec![route(3, 50)]), 10).new_state;
        let res = state_transition(state, &block(95));
        match &res.events[..] {
            [Event::SendRemoveExpiredLock(remove)] => assert_eq!(remove.recipient, address(3)),
            _ => unreachable!(),
        }
        let res = state_transition(res.new_state, &block(99));
        assert!(res.events.is_empty());

        let res = state_transition(res.new_state, &block(100));
        assert_eq!(res.new_state.status, MediatorStatus::ExpiredBoth);
        match &res.events[..] {
            [Event::UnlockFailed { .. }] => {}
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_mediator_unlocks_on_chain() {
        let state = init(&init_action(vec![route(3, 50)]), 10).new_state;
        let state = state_transition(state, &reveal_from(3)).new_state;

        let res = state_transition(state, &block(94));
        assert!(res.events.is_empty());

        let res = state_transition(res.new_state, &block(95));
        assert_eq!(res.new_state.status, MediatorStatus::PartialUnlockOnChain);
        let contract_sends: Vec<_> = res
            .events
            .iter()
            .filter_map(|event| match event {
                Event::ContractSend(contract_send) => Some(contract_send.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(contract_sends.len(), 3);
        assert_eq!(
            contract_sends[0],
            ContractSend::RegisterSecret {
                secret: secret(7),
                deadline: 99,
            }
        );
        match &contract_sends[1] {
            ContractSend::ChannelClose { channel_id: closed, partner, .. } => {
                assert_eq!(closed, &channel_id(2));
                assert_eq!(partner, &address(2));
            }
            _ => unreachable!(),
        }
        match &contract_sends[2] {
            ContractSend::Unlock { secret_hash: unlocked, .. } => assert_eq!(unlocked, &secret_hash(7)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_mediator_learns_secret_on_chain() {
        let state = init(&init_action(vec![route(3, 50)]), 10).new_state;
        let registered = StateChange::Contract(ContractStateChange::SecretRegistered {
            secret: secret(7),
            secret_hash: secret_hash(7),
            block_number: 20,
        });
        let res = state_transition(state, &registered);
        assert_eq!(res.new_state.status, MediatorStatus::WaitingSecretPropagation);
        assert_eq!(res.new_state.opt_secret, Some(secret(7)));
    }

    /// A secret learned before the upstream lock expires is always revealed upstream in the
    /// same transition, whatever the block it arrives at.
    #[quickcheck]
    fn qc_mediator_reveals_upstream_before_expiry(reveal_delay: u8, block_step: u8) -> bool {
        let upstream_expiration = 100;
        let start_block = 10;
        let reveal_block = start_block + BlockHeight::from(reveal_delay) % (upstream_expiration - start_block);
        let block_step = BlockHeight::from(block_step % 7) + 1;

        let mut state = init(&init_action(vec![route(3, 50)]), start_block).new_state;
        let mut block_number = start_block;
        while block_number < reveal_block {
            block_number = std::cmp::min(block_number + block_step, reveal_block);
            state = state_transition(state, &block(block_number)).new_state;
            if state.status.is_terminal() {
                return false;
            }
        }

        let res = state_transition(state, &reveal_from(3));
        let revealed_upstream = res.events.iter().any(|event| match event {
            Event::SendRevealSecret(reveal) => reveal.recipient == address(2),
            _ => false,
        });
        revealed_upstream && res.new_state.block_number < upstream_expiration
    }
}

//! The final receiver of a payment.
//!
//! ```text
//! init -> RequestedSecret -> WaitingUnlock -> Completed
//!   |            |
//!   +-> Idle     +-> Expired
//!         |
//!         +-> Expired
//! ```

use serde::{Deserialize, Serialize};

use proto::consts::BlockHeight;
use proto::crypto::{Address, Secret};
use proto::notify::messages::NoticeLevel;
use proto::state_change::{
    ActionInitTarget, BalanceProofKind, Block, ContractStateChange, ReceiveBalanceProof,
    ReceiveSecretReveal, StateChange,
};
use proto::transfer::events::{
    ContractSend, Event, SendAnnounceDisposed, SendRevealSecret, SendSecretRequest,
    TransferReceivedSuccess,
};
use proto::transfer::messages::LockedTransferState;
use proto::transfer::route::RouteState;

use crate::types::TransitionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetStatus {
    /// The lock leaves no time to learn the secret. Waiting for it to expire.
    Idle,
    RequestedSecret,
    /// The secret is known. Waiting for the payer's unlock.
    WaitingUnlock,
    Completed,
    Expired,
}

impl TargetStatus {
    pub fn is_terminal(self) -> bool {
        match self {
            TargetStatus::Idle | TargetStatus::RequestedSecret | TargetStatus::WaitingUnlock => {
                false
            }
            TargetStatus::Completed | TargetStatus::Expired => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetState {
    pub our_address: Address,
    /// The channel with our payer.
    pub from_route: RouteState,
    pub transfer: LockedTransferState,
    pub block_number: BlockHeight,
    pub status: TargetStatus,
    pub payer_on_chain: bool,
}

impl TargetState {
    /// Going on-chain starts at this block if the payer did not unlock.
    fn unlock_deadline(&self) -> BlockHeight {
        self.transfer
            .expiration
            .saturating_sub(self.from_route.reveal_timeout)
    }
}

pub fn init(action: &ActionInitTarget, block_number: BlockHeight) -> TransitionResult<TargetState> {
    let mut state = TargetState {
        our_address: action.our_address,
        from_route: action.from_route.clone(),
        transfer: LockedTransferState::from_locked_transfer(&action.from_transfer),
        block_number,
        status: TargetStatus::Idle,
        payer_on_chain: false,
    };

    let transfer = &state.transfer;
    if transfer.expiration <= block_number.saturating_add(state.from_route.reveal_timeout) {
        // The payer may still route the payment through someone else.
        let events = vec![
            Event::SendAnnounceDisposed(SendAnnounceDisposed {
                recipient: state.from_route.node_address,
                channel_id: state.from_route.channel_id,
                lock: transfer.lock(),
            }),
            Event::notice(
                NoticeLevel::Warning,
                format!(
                    "lock {} expires too soon to request the secret, disposed upstream",
                    transfer.secret_hash
                ),
            ),
        ];
        return TransitionResult::new(state, events);
    }

    let events = vec![Event::SendSecretRequest(SendSecretRequest {
        recipient: transfer.initiator,
        payment_id: transfer.payment_id,
        amount: transfer.amount,
        secret_hash: transfer.secret_hash,
    })];
    state.status = TargetStatus::RequestedSecret;
    TransitionResult::new(state, events)
}

pub fn state_transition(
    state: TargetState,
    state_change: &StateChange,
) -> TransitionResult<TargetState> {
    if state.status.is_terminal() {
        return TransitionResult::unchanged(state);
    }

    match (state.status, state_change) {
        (_, StateChange::Block(block)) => handle_block(state, block),
        (TargetStatus::RequestedSecret, StateChange::ReceiveSecretReveal(reveal)) => {
            handle_secret_reveal(state, reveal)
        }
        (TargetStatus::WaitingUnlock, StateChange::ReceiveBalanceProof(balance_proof)) => {
            handle_payer_balance_proof(state, balance_proof)
        }
        (_, StateChange::Contract(contract_state_change)) => {
            handle_contract_state_change(state, contract_state_change)
        }
        _ => TransitionResult::unchanged(state),
    }
}

fn handle_secret_reveal(
    state: TargetState,
    reveal: &ReceiveSecretReveal,
) -> TransitionResult<TargetState> {
    if reveal.secret_hash != state.transfer.secret_hash {
        let events = vec![Event::notice(
            NoticeLevel::Warning,
            format!("ignoring wrong secret from {}", reveal.sender),
        )];
        return TransitionResult::new(state, events);
    }
    learn_secret(state, reveal.secret)
}

/// The payment is received as soon as the secret is known. The payer still has to unlock.
fn learn_secret(mut state: TargetState, secret: Secret) -> TransitionResult<TargetState> {
    state.transfer.opt_secret = Some(secret);
    let transfer = &state.transfer;
    let events = vec![
        Event::TransferReceivedSuccess(TransferReceivedSuccess {
            payment_id: transfer.payment_id,
            token_network: transfer.token_network,
            initiator: transfer.initiator,
            amount: transfer.amount,
            secret_hash: transfer.secret_hash,
        }),
        Event::SendRevealSecret(SendRevealSecret {
            recipient: state.from_route.node_address,
            secret,
        }),
    ];
    state.status = TargetStatus::WaitingUnlock;
    check_unlock_deadline(state, events)
}

fn check_unlock_deadline(
    mut state: TargetState,
    mut events: Vec<Event>,
) -> TransitionResult<TargetState> {
    if state.status != TargetStatus::WaitingUnlock || state.block_number < state.unlock_deadline() {
        return TransitionResult::new(state, events);
    }
    let secret = match state.transfer.opt_secret {
        Some(secret) => secret,
        None => return TransitionResult::new(state, events),
    };

    let transfer = &state.transfer;
    let from_route = &state.from_route;
    let deadline = transfer.expiration.saturating_sub(1);

    warn!(
        "target: payer {} did not unlock transfer {}, going on-chain",
        from_route.node_address, transfer.secret_hash
    );
    events.push(Event::ContractSend(ContractSend::RegisterSecret { secret, deadline }));
    if !state.payer_on_chain {
        events.push(Event::ContractSend(ContractSend::ChannelClose {
            token_network: transfer.token_network,
            channel_id: from_route.channel_id,
            partner: from_route.node_address,
            deadline,
        }));
    }
    events.push(Event::ContractSend(ContractSend::Unlock {
        token_network: transfer.token_network,
        channel_id: from_route.channel_id,
        partner: from_route.node_address,
        secret_hash: transfer.secret_hash,
        deadline: deadline.saturating_add(from_route.settle_timeout),
    }));
    state.status = TargetStatus::Completed;
    TransitionResult::new(state, events)
}

fn handle_payer_balance_proof(
    mut state: TargetState,
    balance_proof: &ReceiveBalanceProof,
) -> TransitionResult<TargetState> {
    if balance_proof.sender != state.from_route.node_address
        || balance_proof.secret_hash != state.transfer.secret_hash
    {
        return TransitionResult::unchanged(state);
    }
    match &balance_proof.kind {
        BalanceProofKind::Unlock(_) => {
            let events = vec![Event::UnlockSuccess {
                payment_id: state.transfer.payment_id,
                secret_hash: state.transfer.secret_hash,
            }];
            state.status = TargetStatus::Completed;
            TransitionResult::new(state, events)
        }
        BalanceProofKind::RemoveExpiredLock(_) => {
            let events = vec![Event::notice(
                NoticeLevel::Error,
                format!(
                    "payer removed lock {} although the secret is known",
                    state.transfer.secret_hash
                ),
            )];
            TransitionResult::new(state, events)
        }
    }
}

fn handle_block(mut state: TargetState, block: &Block) -> TransitionResult<TargetState> {
    state.block_number = block.block_number;
    match state.status {
        TargetStatus::Idle | TargetStatus::RequestedSecret
            if state.block_number >= state.transfer.expiration =>
        {
            let events = vec![Event::UnlockFailed {
                payment_id: state.transfer.payment_id,
                secret_hash: state.transfer.secret_hash,
                reason: "lock expired".to_owned(),
            }];
            state.status = TargetStatus::Expired;
            TransitionResult::new(state, events)
        }
        TargetStatus::WaitingUnlock => check_unlock_deadline(state, Vec::new()),
        _ => TransitionResult::unchanged(state),
    }
}

fn handle_contract_state_change(
    mut state: TargetState,
    contract_state_change: &ContractStateChange,
) -> TransitionResult<TargetState> {
    match contract_state_change {
        ContractStateChange::ChannelClosed { channel_id, .. }
            if channel_id == &state.from_route.channel_id =>
        {
            state.payer_on_chain = true;
            state.from_route.opt_closed_block = Some(contract_state_change.block_number());
            TransitionResult::unchanged(state)
        }
        ContractStateChange::SecretRegistered {
            secret,
            secret_hash,
            ..
        } if secret_hash == &state.transfer.secret_hash
            && state.status != TargetStatus::WaitingUnlock
            && state.block_number < state.transfer.expiration =>
        {
            learn_secret(state, *secret)
        }
        _ => TransitionResult::unchanged(state),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proto::state_change::ActionInitTarget;
    use proto::transfer::messages::{RemoveExpiredLock, Unlock};

    use crate::test_utils::*;

    /// Node 9 receives from node 3 a lock expiring at 60.
    fn init_action() -> ActionInitTarget {
        ActionInitTarget {
            our_address: address(9),
            from_route: route(3, 0),
            from_transfer: locked_transfer(3, 9, 10, 60),
        }
    }

    fn reveal(seed: u8) -> StateChange {
        StateChange::ReceiveSecretReveal(ReceiveSecretReveal {
            sender: address(1),
            secret: secret(seed),
            secret_hash: secret_hash(seed),
        })
    }

    #[test]
    fn test_target_requests_secret() {
        let res = init(&init_action(), 10);
        assert_eq!(res.new_state.status, TargetStatus::RequestedSecret);
        assert_eq!(
            res.events,
            vec![Event::SendSecretRequest(SendSecretRequest {
                recipient: address(1),
                payment_id: 0x1234,
                amount: 10,
                secret_hash: secret_hash(7),
            })]
        );
    }

    #[test]
    fn test_target_lock_too_short() {
        // 60 <= 55 + reveal_timeout:
        let res = init(&init_action(), 55);
        assert_eq!(res.new_state.status, TargetStatus::Idle);
        assert!(has_notice(&res.events));
        // The payer learns that we will not ask for the secret:
        assert_eq!(
            res.events[0],
            Event::SendAnnounceDisposed(SendAnnounceDisposed {
                recipient: address(3),
                channel_id: channel_id(3),
                lock: init_action().from_transfer.lock,
            })
        );
        assert!(!res.events.iter().any(|event| match event {
            Event::SendSecretRequest(_) => true,
            _ => false,
        }));

        let res = state_transition(res.new_state, &block(60));
        assert_eq!(res.new_state.status, TargetStatus::Expired);
    }

    #[test]
    fn test_target_success() {
        let state = init(&init_action(), 10).new_state;

        let res = state_transition(state, &reveal(8));
        assert_eq!(res.new_state.status, TargetStatus::RequestedSecret);
        assert!(has_notice(&res.events));

        let res = state_transition(res.new_state, &reveal(7));
        assert_eq!(res.new_state.status, TargetStatus::WaitingUnlock);
        match &res.events[..] {
            [Event::TransferReceivedSuccess(received), Event::SendRevealSecret(send_reveal)] => {
                assert_eq!(received.amount, 10);
                assert_eq!(received.initiator, address(1));
                assert_eq!(send_reveal.recipient, address(3));
                assert_eq!(send_reveal.secret, secret(7));
            }
            _ => unreachable!(),
        }

        let locked_transfer = locked_transfer(3, 9, 10, 60);
        let unlock = StateChange::ReceiveBalanceProof(ReceiveBalanceProof {
            sender: address(3),
            secret_hash: secret_hash(7),
            kind: BalanceProofKind::Unlock(Unlock {
                payment_id: locked_transfer.payment_id,
                secret: secret(7),
                balance_proof: locked_transfer.balance_proof,
            }),
        });
        let res = state_transition(res.new_state, &unlock);
        assert_eq!(res.new_state.status, TargetStatus::Completed);
        match &res.events[..] {
            [Event::UnlockSuccess { .. }] => {}
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_target_goes_on_chain() {
        let state = init(&init_action(), 10).new_state;
        let state = state_transition(state, &reveal(7)).new_state;

        // The payer removing a lock whose secret we know is reported:
        let locked_transfer = locked_transfer(3, 9, 10, 60);
        let remove = StateChange::ReceiveBalanceProof(ReceiveBalanceProof {
            sender: address(3),
            secret_hash: secret_hash(7),
            kind: BalanceProofKind::RemoveExpiredLock(RemoveExpiredLock {
                secret_hash: secret_hash(7),
                balance_proof: locked_transfer.balance_proof,
            }),
        });
        let res = state_transition(state, &remove);
        assert!(has_notice(&res.events));
        assert_eq!(res.new_state.status, TargetStatus::WaitingUnlock);

        let res = state_transition(res.new_state, &block(54));
        assert!(res.events.is_empty());

        let res = state_transition(res.new_state, &block(55));
        assert_eq!(res.new_state.status, TargetStatus::Completed);
        match &res.events[..] {
            [Event::ContractSend(ContractSend::RegisterSecret { deadline, .. }), Event::ContractSend(ContractSend::ChannelClose { .. }), Event::ContractSend(ContractSend::Unlock { .. })] => {
                assert_eq!(*deadline, 59)
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_target_expires_without_secret() {
        let state = init(&init_action(), 10).new_state;
        let res = state_transition(state, &block(59));
        assert!(res.events.is_empty());
        let res = state_transition(res.new_state, &block(60));
        assert_eq!(res.new_state.status, TargetStatus::Expired);

        // A late reveal changes nothing:
        let res = state_transition(res.new_state, &reveal(7));
        assert!(res.events.is_empty());
        assert_eq!(res.new_state.status, TargetStatus::Expired);
    }
}

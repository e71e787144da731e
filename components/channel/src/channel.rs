use im::ordmap::OrdMap;
use serde::{Deserialize, Serialize};

use crypto::hash_lock::HashLock;
use crypto::locksroot::compute_locksroot;

use proto::consts::{BlockHeight, Nonce, TokenAmount};
use proto::crypto::{Address, ChannelId, Locksroot, Secret, SecretHash};
use proto::state_change::ContractStateChange;
use proto::transfer::messages::{
    BalanceProof, Lock, LockedTransfer, LockedTransferState, RemoveExpiredLock, Unlock,
};
use proto::transfer::route::RouteState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    ChannelNotOpen,
    WrongChannel,
    NonceNotIncreasing { previous: Nonce, received: Nonce },
    DuplicateSecretHash,
    UnknownLock,
    LockExpired,
    LockNotExpired,
    SecretMismatch,
    TransferredAmountMismatch,
    LockedAmountMismatch,
    LocksrootMismatch,
    InsufficientBalance,
    AmountOverflow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    Opened,
    Closed { block_number: BlockHeight },
    Settled { block_number: BlockHeight },
}

/// The state of one participant of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelEndState {
    pub address: Address,
    /// Total amount deposited on-chain.
    pub contract_balance: TokenAmount,
    /// Total amount withdrawn on-chain.
    pub withdrawn: TokenAmount,
    /// Latest balance proof sent by this participant.
    pub opt_balance_proof: Option<BalanceProof>,
    /// Locks sent by this participant, that were neither unlocked nor removed.
    pub pending_locks: OrdMap<SecretHash, Lock>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndMutation {
    SetContractBalance(TokenAmount),
    SetWithdrawn(TokenAmount),
    SetBalanceProof(BalanceProof),
    InsertLock(Lock),
    RemoveLock(SecretHash),
}

impl ChannelEndState {
    pub fn new(address: Address) -> Self {
        ChannelEndState {
            address,
            contract_balance: 0,
            withdrawn: 0,
            opt_balance_proof: None,
            pending_locks: OrdMap::new(),
        }
    }

    pub fn nonce(&self) -> Nonce {
        self.opt_balance_proof
            .as_ref()
            .map(|balance_proof| balance_proof.nonce)
            .unwrap_or(0)
    }

    pub fn transferred_amount(&self) -> TokenAmount {
        self.opt_balance_proof
            .as_ref()
            .map(|balance_proof| balance_proof.transferred_amount)
            .unwrap_or(0)
    }

    pub fn locked_amount(&self) -> TokenAmount {
        self.pending_locks
            .values()
            .fold(0u128, |acc, lock| acc.saturating_add(lock.amount))
    }

    pub fn locksroot(&self) -> Locksroot {
        compute_locksroot(self.pending_locks.values())
    }

    pub fn mutate(&mut self, end_mutation: &EndMutation) {
        match end_mutation {
            EndMutation::SetContractBalance(contract_balance) => {
                self.contract_balance = *contract_balance
            }
            EndMutation::SetWithdrawn(withdrawn) => self.withdrawn = *withdrawn,
            EndMutation::SetBalanceProof(balance_proof) => {
                self.opt_balance_proof = Some(balance_proof.clone())
            }
            EndMutation::InsertLock(lock) => {
                self.pending_locks.insert(lock.secret_hash, lock.clone());
            }
            EndMutation::RemoveLock(secret_hash) => {
                let _ = self.pending_locks.remove(secret_hash);
            }
        }
    }
}

/// Amount `sender` owns in the channel, including its pending locks.
pub fn balance(sender: &ChannelEndState, receiver: &ChannelEndState) -> TokenAmount {
    sender
        .contract_balance
        .saturating_add(receiver.transferred_amount())
        .saturating_sub(sender.withdrawn.saturating_add(sender.transferred_amount()))
}

/// Amount `sender` can still lock for `receiver`.
pub fn distributable(sender: &ChannelEndState, receiver: &ChannelEndState) -> TokenAmount {
    balance(sender, receiver).saturating_sub(sender.locked_amount())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMutation {
    Our(EndMutation),
    Partner(EndMutation),
    SetStatus(ChannelStatus),
}

/// A bilateral payment channel, as seen by us.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub channel_id: ChannelId,
    pub token_network: Address,
    pub our_state: ChannelEndState,
    pub partner_state: ChannelEndState,
    pub reveal_timeout: BlockHeight,
    pub settle_timeout: BlockHeight,
    pub opened_block: BlockHeight,
    pub status: ChannelStatus,
}

/// Everything a balance proof must commit to, computed from our bookkeeping.
struct ExpectedBalanceProof {
    transferred_amount: TokenAmount,
    locked_amount: TokenAmount,
    locksroot: Locksroot,
}

impl ChannelState {
    pub fn new(
        channel_id: ChannelId,
        token_network: Address,
        our_address: Address,
        partner_address: Address,
        reveal_timeout: BlockHeight,
        settle_timeout: BlockHeight,
        opened_block: BlockHeight,
    ) -> Self {
        ChannelState {
            channel_id,
            token_network,
            our_state: ChannelEndState::new(our_address),
            partner_state: ChannelEndState::new(partner_address),
            reveal_timeout,
            settle_timeout,
            opened_block,
            status: ChannelStatus::Opened,
        }
    }

    pub fn our_address(&self) -> &Address {
        &self.our_state.address
    }

    pub fn partner_address(&self) -> &Address {
        &self.partner_state.address
    }

    pub fn is_open(&self) -> bool {
        self.status == ChannelStatus::Opened
    }

    pub fn is_settled(&self) -> bool {
        match self.status {
            ChannelStatus::Settled { .. } => true,
            _ => false,
        }
    }

    pub fn opt_closed_block(&self) -> Option<BlockHeight> {
        match self.status {
            ChannelStatus::Opened => None,
            ChannelStatus::Closed { block_number } | ChannelStatus::Settled { block_number } => {
                Some(block_number)
            }
        }
    }

    /// Amount we can still lock for the partner.
    pub fn our_distributable(&self) -> TokenAmount {
        distributable(&self.our_state, &self.partner_state)
    }

    pub fn partner_distributable(&self) -> TokenAmount {
        distributable(&self.partner_state, &self.our_state)
    }

    /// Did the partner ever send us anything through this channel?
    pub fn has_received_transfers(&self) -> bool {
        self.partner_state.opt_balance_proof.is_some()
    }

    /// This channel as a candidate route for a payment we send.
    pub fn route_state(&self) -> RouteState {
        RouteState {
            node_address: *self.partner_address(),
            channel_id: self.channel_id,
            available_balance: self.our_distributable(),
            reveal_timeout: self.reveal_timeout,
            settle_timeout: self.settle_timeout,
            opt_closed_block: self.opt_closed_block(),
        }
    }

    pub fn mutate(&mut self, channel_mutation: &ChannelMutation) {
        match channel_mutation {
            ChannelMutation::Our(end_mutation) => self.our_state.mutate(end_mutation),
            ChannelMutation::Partner(end_mutation) => self.partner_state.mutate(end_mutation),
            ChannelMutation::SetStatus(status) => self.status = status.clone(),
        }
    }

    fn mutate_all(&mut self, channel_mutations: &[ChannelMutation]) {
        for channel_mutation in channel_mutations {
            self.mutate(channel_mutation);
        }
    }

    fn check_open(&self) -> Result<(), ChannelError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ChannelError::ChannelNotOpen)
        }
    }

    fn verify_balance_proof(
        &self,
        sender: &ChannelEndState,
        balance_proof: &BalanceProof,
        expected: &ExpectedBalanceProof,
    ) -> Result<(), ChannelError> {
        if balance_proof.channel_id != self.channel_id
            || balance_proof.token_network != self.token_network
        {
            return Err(ChannelError::WrongChannel);
        }
        if balance_proof.nonce <= sender.nonce() {
            return Err(ChannelError::NonceNotIncreasing {
                previous: sender.nonce(),
                received: balance_proof.nonce,
            });
        }
        if balance_proof.transferred_amount != expected.transferred_amount {
            return Err(ChannelError::TransferredAmountMismatch);
        }
        if balance_proof.locked_amount != expected.locked_amount {
            return Err(ChannelError::LockedAmountMismatch);
        }
        if balance_proof.locksroot != expected.locksroot {
            return Err(ChannelError::LocksrootMismatch);
        }
        Ok(())
    }

    /// Pending locks of `end` after inserting or removing one lock.
    fn locks_with(end: &ChannelEndState, add: Option<&Lock>, remove: Option<&SecretHash>) -> OrdMap<SecretHash, Lock> {
        let mut pending_locks = end.pending_locks.clone();
        if let Some(lock) = add {
            pending_locks.insert(lock.secret_hash, lock.clone());
        }
        if let Some(secret_hash) = remove {
            let _ = pending_locks.remove(secret_hash);
        }
        pending_locks
    }

    /// Validate a locked transfer sent by the partner, and register its lock.
    /// On error, the channel is left unchanged.
    pub fn handle_locked_transfer(
        &mut self,
        locked_transfer: &LockedTransfer,
        block_number: BlockHeight,
    ) -> Result<(), ChannelError> {
        self.check_open()?;
        let lock = &locked_transfer.lock;
        if self.partner_state.pending_locks.contains_key(&lock.secret_hash) {
            return Err(ChannelError::DuplicateSecretHash);
        }
        if lock.expiration <= block_number {
            return Err(ChannelError::LockExpired);
        }

        let pending_locks = ChannelState::locks_with(&self.partner_state, Some(lock), None);
        let expected = ExpectedBalanceProof {
            transferred_amount: self.partner_state.transferred_amount(),
            locked_amount: self
                .partner_state
                .locked_amount()
                .checked_add(lock.amount)
                .ok_or(ChannelError::AmountOverflow)?,
            locksroot: compute_locksroot(pending_locks.values()),
        };
        self.verify_balance_proof(&self.partner_state, &locked_transfer.balance_proof, &expected)?;

        if lock.amount > self.partner_distributable() {
            return Err(ChannelError::InsufficientBalance);
        }

        self.mutate_all(&[
            ChannelMutation::Partner(EndMutation::InsertLock(lock.clone())),
            ChannelMutation::Partner(EndMutation::SetBalanceProof(
                locked_transfer.balance_proof.clone(),
            )),
        ]);
        Ok(())
    }

    /// Validate an unlock sent by the partner: the amount of the lock moves to the
    /// transferred amount.
    pub fn handle_unlock(&mut self, unlock: &Unlock) -> Result<(), ChannelError> {
        self.check_open()?;
        let secret_hash = unlock.secret.hash_lock();
        let lock = self
            .partner_state
            .pending_locks
            .get(&secret_hash)
            .cloned()
            .ok_or(ChannelError::UnknownLock)?;

        let pending_locks = ChannelState::locks_with(&self.partner_state, None, Some(&secret_hash));
        let expected = ExpectedBalanceProof {
            transferred_amount: self
                .partner_state
                .transferred_amount()
                .checked_add(lock.amount)
                .ok_or(ChannelError::AmountOverflow)?,
            locked_amount: self.partner_state.locked_amount().saturating_sub(lock.amount),
            locksroot: compute_locksroot(pending_locks.values()),
        };
        self.verify_balance_proof(&self.partner_state, &unlock.balance_proof, &expected)?;

        self.mutate_all(&[
            ChannelMutation::Partner(EndMutation::RemoveLock(secret_hash)),
            ChannelMutation::Partner(EndMutation::SetBalanceProof(unlock.balance_proof.clone())),
        ]);
        Ok(())
    }

    /// Validate the removal of an expired lock by the partner.
    pub fn handle_remove_expired_lock(
        &mut self,
        remove_expired_lock: &RemoveExpiredLock,
        block_number: BlockHeight,
    ) -> Result<(), ChannelError> {
        self.check_open()?;
        let secret_hash = remove_expired_lock.secret_hash;
        let lock = self
            .partner_state
            .pending_locks
            .get(&secret_hash)
            .cloned()
            .ok_or(ChannelError::UnknownLock)?;
        if lock.expiration > block_number {
            return Err(ChannelError::LockNotExpired);
        }

        let pending_locks = ChannelState::locks_with(&self.partner_state, None, Some(&secret_hash));
        let expected = ExpectedBalanceProof {
            transferred_amount: self.partner_state.transferred_amount(),
            locked_amount: self.partner_state.locked_amount().saturating_sub(lock.amount),
            locksroot: compute_locksroot(pending_locks.values()),
        };
        self.verify_balance_proof(
            &self.partner_state,
            &remove_expired_lock.balance_proof,
            &expected,
        )?;

        self.mutate_all(&[
            ChannelMutation::Partner(EndMutation::RemoveLock(secret_hash)),
            ChannelMutation::Partner(EndMutation::SetBalanceProof(
                remove_expired_lock.balance_proof.clone(),
            )),
        ]);
        Ok(())
    }

    fn next_our_balance_proof(
        &self,
        transferred_amount: TokenAmount,
        pending_locks: &OrdMap<SecretHash, Lock>,
    ) -> BalanceProof {
        BalanceProof {
            token_network: self.token_network,
            channel_id: self.channel_id,
            nonce: self.our_state.nonce().wrapping_add(1),
            transferred_amount,
            locked_amount: pending_locks
                .values()
                .fold(0u128, |acc, lock| acc.saturating_add(lock.amount)),
            locksroot: compute_locksroot(pending_locks.values()),
        }
    }

    /// Lock `transfer.amount` of our funds for the partner.
    pub fn create_locked_transfer(
        &mut self,
        transfer: &LockedTransferState,
        block_number: BlockHeight,
    ) -> Result<LockedTransfer, ChannelError> {
        self.check_open()?;
        let lock = transfer.lock();
        if self.our_state.pending_locks.contains_key(&lock.secret_hash) {
            return Err(ChannelError::DuplicateSecretHash);
        }
        if lock.expiration <= block_number {
            return Err(ChannelError::LockExpired);
        }
        if lock.amount > self.our_distributable() {
            return Err(ChannelError::InsufficientBalance);
        }

        let pending_locks = ChannelState::locks_with(&self.our_state, Some(&lock), None);
        let balance_proof =
            self.next_our_balance_proof(self.our_state.transferred_amount(), &pending_locks);

        self.mutate_all(&[
            ChannelMutation::Our(EndMutation::InsertLock(lock.clone())),
            ChannelMutation::Our(EndMutation::SetBalanceProof(balance_proof.clone())),
        ]);

        Ok(LockedTransfer {
            payment_id: transfer.payment_id,
            initiator: transfer.initiator,
            target: transfer.target,
            sender: *self.our_address(),
            recipient: *self.partner_address(),
            lock,
            balance_proof,
        })
    }

    /// Release one of our locks to the partner.
    pub fn create_unlock(&mut self, payment_id: u64, secret: &Secret) -> Result<Unlock, ChannelError> {
        self.check_open()?;
        let secret_hash = secret.hash_lock();
        let lock = self
            .our_state
            .pending_locks
            .get(&secret_hash)
            .cloned()
            .ok_or(ChannelError::UnknownLock)?;

        let pending_locks = ChannelState::locks_with(&self.our_state, None, Some(&secret_hash));
        let transferred_amount = self
            .our_state
            .transferred_amount()
            .checked_add(lock.amount)
            .ok_or(ChannelError::AmountOverflow)?;
        let balance_proof = self.next_our_balance_proof(transferred_amount, &pending_locks);

        self.mutate_all(&[
            ChannelMutation::Our(EndMutation::RemoveLock(secret_hash)),
            ChannelMutation::Our(EndMutation::SetBalanceProof(balance_proof.clone())),
        ]);

        Ok(Unlock {
            payment_id,
            secret: *secret,
            balance_proof,
        })
    }

    /// Remove one of our locks that expired without being unlocked.
    pub fn create_remove_expired_lock(
        &mut self,
        secret_hash: &SecretHash,
        block_number: BlockHeight,
    ) -> Result<RemoveExpiredLock, ChannelError> {
        self.check_open()?;
        let lock = self
            .our_state
            .pending_locks
            .get(secret_hash)
            .cloned()
            .ok_or(ChannelError::UnknownLock)?;
        if lock.expiration > block_number {
            return Err(ChannelError::LockNotExpired);
        }

        let pending_locks = ChannelState::locks_with(&self.our_state, None, Some(secret_hash));
        let balance_proof =
            self.next_our_balance_proof(self.our_state.transferred_amount(), &pending_locks);

        self.mutate_all(&[
            ChannelMutation::Our(EndMutation::RemoveLock(*secret_hash)),
            ChannelMutation::Our(EndMutation::SetBalanceProof(balance_proof.clone())),
        ]);

        Ok(RemoveExpiredLock {
            secret_hash: *secret_hash,
            balance_proof,
        })
    }

    /// Mutations for the end of `participant`, if it belongs to this channel.
    fn end_mutation(&self, participant: &Address, end_mutation: EndMutation) -> Option<ChannelMutation> {
        if participant == self.our_address() {
            Some(ChannelMutation::Our(end_mutation))
        } else if participant == self.partner_address() {
            Some(ChannelMutation::Partner(end_mutation))
        } else {
            warn!(
                "channel {}: participant {} does not belong to the channel",
                self.channel_id, participant
            );
            None
        }
    }

    /// Apply a ledger event about this channel.
    pub fn apply_contract_state_change(&mut self, contract_state_change: &ContractStateChange) {
        if contract_state_change.opt_channel_id() != Some(&self.channel_id) {
            return;
        }

        let opt_mutation = match contract_state_change {
            ContractStateChange::ChannelNewDeposit {
                participant,
                total_deposit,
                ..
            } => self.end_mutation(participant, EndMutation::SetContractBalance(*total_deposit)),
            ContractStateChange::ChannelWithdrawn {
                participant,
                total_withdraw,
                ..
            } => self.end_mutation(participant, EndMutation::SetWithdrawn(*total_withdraw)),
            ContractStateChange::ChannelClosed { block_number, .. } => {
                if self.is_open() {
                    Some(ChannelMutation::SetStatus(ChannelStatus::Closed {
                        block_number: *block_number,
                    }))
                } else {
                    None
                }
            }
            ContractStateChange::ChannelSettled { block_number, .. }
            | ContractStateChange::ChannelCooperativeSettled { block_number, .. } => {
                Some(ChannelMutation::SetStatus(ChannelStatus::Settled {
                    block_number: *block_number,
                }))
            }
            ContractStateChange::ChannelUnlocked {
                participant,
                secret_hash,
                ..
            } => self.end_mutation(participant, EndMutation::RemoveLock(*secret_hash)),
            ContractStateChange::BalanceProofUpdated {
                participant, nonce, ..
            } => {
                debug!(
                    "channel {}: balance proof of {} updated on-chain, nonce {}",
                    self.channel_id, participant, nonce
                );
                None
            }
            ContractStateChange::ChannelOpened { .. }
            | ContractStateChange::TokenNetworkCreated { .. }
            | ContractStateChange::SecretRegistered { .. } => None,
        };

        if let Some(channel_mutation) = opt_mutation {
            self.mutate(&channel_mutation);
        }
    }
}

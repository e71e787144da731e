use std::collections::{BTreeMap, HashSet};

use proto::consts::BlockHeight;
use proto::crypto::ChannelId;
use proto::state_change::ContractStateChange;

/// Buffers chain-derived state changes and releases them in block order.
///
/// A state change is released once it is `confirm_blocks` deep. State changes of the same
/// block keep their arrival order. The settlement of a channel is held back until the closing
/// of the channel was released, for at most `settle_hold_blocks` blocks.
pub struct ChainEventOrderer {
    confirm_blocks: BlockHeight,
    settle_hold_blocks: BlockHeight,
    next_seq: u64,
    pending: BTreeMap<(BlockHeight, u64), ContractStateChange>,
    /// Channels whose closing was released, and whose settlement was not.
    closed_channels: HashSet<ChannelId>,
    opt_last_release: Option<BlockHeight>,
}

impl ChainEventOrderer {
    pub fn new(confirm_blocks: BlockHeight, settle_hold_blocks: BlockHeight) -> Self {
        ChainEventOrderer {
            confirm_blocks,
            settle_hold_blocks,
            next_seq: 0,
            pending: BTreeMap::new(),
            closed_channels: HashSet::new(),
            opt_last_release: None,
        }
    }

    fn is_ready(&self, block_number: BlockHeight, height: BlockHeight) -> bool {
        block_number.saturating_add(self.confirm_blocks) <= height
    }

    pub fn push(&mut self, contract_state_change: ContractStateChange) {
        let block_number = contract_state_change.block_number();
        if let Some(last_release) = self.opt_last_release {
            if self.is_ready(block_number, last_release) {
                warn!(
                    "chain event orderer: late event from block {} (released up to {})",
                    block_number, last_release
                );
            }
        }
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.pending.insert((block_number, seq), contract_state_change);
    }

    /// Amount of state changes waiting to be released.
    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    fn is_held(&self, contract_state_change: &ContractStateChange) -> bool {
        match contract_state_change {
            ContractStateChange::ChannelSettled { channel_id, .. } => {
                !self.closed_channels.contains(channel_id)
            }
            _ => false,
        }
    }

    /// Release every state change that is deep enough at `height`, in delivery order.
    pub fn release(&mut self, height: BlockHeight) -> Vec<ContractStateChange> {
        self.opt_last_release = Some(height);

        let mut released = Vec::new();
        loop {
            let ready_keys: Vec<(BlockHeight, u64)> = self
                .pending
                .keys()
                .take_while(|(block_number, _)| self.is_ready(*block_number, height))
                .cloned()
                .collect();

            let mut progress = false;
            for key in ready_keys {
                let is_held = match self.pending.get(&key) {
                    Some(contract_state_change) => self.is_held(contract_state_change),
                    None => continue,
                };
                if is_held {
                    let (block_number, _) = key;
                    if !self.is_ready(block_number.saturating_add(self.settle_hold_blocks), height) {
                        continue;
                    }
                    // The closing may never arrive.
                    warn!(
                        "chain event orderer: releasing settlement from block {} without its closing",
                        block_number
                    );
                }
                if let Some(contract_state_change) = self.pending.remove(&key) {
                    match &contract_state_change {
                        ContractStateChange::ChannelClosed { channel_id, .. } => {
                            self.closed_channels.insert(*channel_id);
                        }
                        ContractStateChange::ChannelSettled { channel_id, .. } => {
                            self.closed_channels.remove(channel_id);
                        }
                        _ => {}
                    }
                    released.push(contract_state_change);
                    progress = true;
                }
            }

            // A settlement may be waiting for a closing released in this round:
            if !progress {
                break;
            }
        }

        if !released.is_empty() {
            trace!(
                "chain event orderer: released {} events at {}",
                released.len(),
                height
            );
        }
        released
    }
}

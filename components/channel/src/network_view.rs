use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use proto::consts::BlockHeight;
use proto::crypto::{Address, ChannelId, SecretHash};
use proto::state_change::ContractStateChange;
use proto::transfer::route::RouteState;

use crate::channel::ChannelState;
use crate::graph::ChannelGraph;

#[derive(Debug, Default)]
struct TokenNetworkState {
    participants: BTreeSet<Address>,
    channels: HashMap<ChannelId, ChannelState>,
    /// Our latest channel with every partner.
    partner_channels: HashMap<Address, ChannelId>,
    blocked: bool,
}

struct NetworkViewInner {
    token_networks: HashMap<Address, TokenNetworkState>,
    /// Token network of every channel we take part in.
    channel_networks: HashMap<ChannelId, Address>,
}

/// Our view of the token networks: known participants, our channels and the networks we are
/// leaving. Chain-derived state changes are applied to it in order, and transfers update the
/// channels through `with_channel_mut`.
pub struct NetworkView {
    our_address: Address,
    reveal_timeout: BlockHeight,
    inner: Mutex<NetworkViewInner>,
}

impl NetworkView {
    pub fn new(our_address: Address, reveal_timeout: BlockHeight) -> Self {
        NetworkView {
            our_address,
            reveal_timeout,
            inner: Mutex::new(NetworkViewInner {
                token_networks: HashMap::new(),
                channel_networks: HashMap::new(),
            }),
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, NetworkViewInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn our_address(&self) -> &Address {
        &self.our_address
    }

    /// Learn about a node of a token network, for example through discovery.
    pub fn add_participant(&self, token_network: &Address, participant: Address) {
        self.lock_inner()
            .token_networks
            .entry(*token_network)
            .or_default()
            .participants
            .insert(participant);
    }

    pub fn apply_contract_state_change(&self, contract_state_change: &ContractStateChange) {
        let mut inner = self.lock_inner();
        match contract_state_change {
            ContractStateChange::TokenNetworkCreated { token_network, .. } => {
                inner.token_networks.entry(*token_network).or_default();
            }
            ContractStateChange::ChannelOpened {
                token_network,
                channel_id,
                participant1,
                participant2,
                settle_timeout,
                block_number,
            } => {
                let token_network_state = inner.token_networks.entry(*token_network).or_default();
                token_network_state.participants.insert(*participant1);
                token_network_state.participants.insert(*participant2);

                let partner = if participant1 == &self.our_address {
                    *participant2
                } else if participant2 == &self.our_address {
                    *participant1
                } else {
                    return;
                };
                if token_network_state.channels.contains_key(channel_id) {
                    warn!("network view: channel {} was already opened", channel_id);
                    return;
                }

                debug!(
                    "network view: opened channel {} with {} at block {}",
                    channel_id, partner, block_number
                );
                let channel_state = ChannelState::new(
                    *channel_id,
                    *token_network,
                    self.our_address,
                    partner,
                    self.reveal_timeout,
                    *settle_timeout,
                    *block_number,
                );
                token_network_state.channels.insert(*channel_id, channel_state);
                token_network_state
                    .partner_channels
                    .insert(partner, *channel_id);
                inner.channel_networks.insert(*channel_id, *token_network);
            }
            ContractStateChange::SecretRegistered { .. } => {}
            _ => {
                let channel_id = match contract_state_change.opt_channel_id() {
                    Some(channel_id) => *channel_id,
                    None => return,
                };
                let token_network = match inner.channel_networks.get(&channel_id) {
                    Some(token_network) => *token_network,
                    None => {
                        trace!("network view: ignoring event of unknown channel {}", channel_id);
                        return;
                    }
                };
                if let Some(channel_state) = inner
                    .token_networks
                    .get_mut(&token_network)
                    .and_then(|token_network_state| token_network_state.channels.get_mut(&channel_id))
                {
                    channel_state.apply_contract_state_change(contract_state_change);
                }
            }
        }
    }

    /// Run `f` over one of our channels. Returns None if the channel is unknown.
    pub fn with_channel_mut<F, R>(&self, channel_id: &ChannelId, f: F) -> Option<R>
    where
        F: FnOnce(&mut ChannelState) -> R,
    {
        let mut inner = self.lock_inner();
        let token_network = *inner.channel_networks.get(channel_id)?;
        let channel_state = inner
            .token_networks
            .get_mut(&token_network)?
            .channels
            .get_mut(channel_id)?;
        Some(f(channel_state))
    }

    /// Locks we sent through open channels that expired at `block_number`, as
    /// `(channel_id, partner, secret_hash)`.
    pub fn expired_our_locks(&self, block_number: BlockHeight) -> Vec<(ChannelId, Address, SecretHash)> {
        let inner = self.lock_inner();
        let mut expired = Vec::new();
        for token_network_state in inner.token_networks.values() {
            for channel_state in token_network_state.channels.values() {
                if !channel_state.is_open() {
                    continue;
                }
                for lock in channel_state.our_state.pending_locks.values() {
                    if lock.expiration <= block_number {
                        expired.push((
                            channel_state.channel_id,
                            *channel_state.partner_address(),
                            lock.secret_hash,
                        ));
                    }
                }
            }
        }
        expired.sort();
        expired
    }

    /// Our open channels in a token network, as candidate routes for a payment.
    pub fn routes(&self, token_network: &Address) -> Vec<RouteState> {
        self.open_channels(token_network)
            .iter()
            .map(ChannelState::route_state)
            .collect()
    }
}

impl ChannelGraph for NetworkView {
    fn participants(&self, token_network: &Address) -> Vec<Address> {
        self.lock_inner()
            .token_networks
            .get(token_network)
            .map(|token_network_state| token_network_state.participants.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn channels(&self, token_network: &Address) -> Vec<ChannelState> {
        let inner = self.lock_inner();
        let token_network_state = match inner.token_networks.get(token_network) {
            Some(token_network_state) => token_network_state,
            None => return Vec::new(),
        };
        let mut channels: Vec<ChannelState> =
            token_network_state.channels.values().cloned().collect();
        channels.sort_by(|a, b| a.channel_id.cmp(&b.channel_id));
        channels
    }

    fn open_channels(&self, token_network: &Address) -> Vec<ChannelState> {
        self.channels(token_network)
            .into_iter()
            .filter(ChannelState::is_open)
            .collect()
    }

    fn channel_by_partner(&self, token_network: &Address, partner: &Address) -> Option<ChannelState> {
        let inner = self.lock_inner();
        let token_network_state = inner.token_networks.get(token_network)?;
        let channel_id = token_network_state.partner_channels.get(partner)?;
        token_network_state.channels.get(channel_id).cloned()
    }

    fn channel(&self, channel_id: &ChannelId) -> Option<ChannelState> {
        let inner = self.lock_inner();
        let token_network = inner.channel_networks.get(channel_id)?;
        inner
            .token_networks
            .get(token_network)?
            .channels
            .get(channel_id)
            .cloned()
    }

    fn is_blocked(&self, token_network: &Address) -> bool {
        self.lock_inner()
            .token_networks
            .get(token_network)
            .map(|token_network_state| token_network_state.blocked)
            .unwrap_or(false)
    }

    fn set_blocked(&self, token_network: &Address, blocked: bool) {
        self.lock_inner()
            .token_networks
            .entry(*token_network)
            .or_default()
            .blocked = blocked;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address(seed: u8) -> Address {
        Address::from(&[seed; Address::len()])
    }

    fn channel_id(seed: u8) -> ChannelId {
        ChannelId::from(&[seed; ChannelId::len()])
    }

    fn opened(channel_seed: u8, p1: Address, p2: Address, block_number: BlockHeight) -> ContractStateChange {
        ContractStateChange::ChannelOpened {
            token_network: address(100),
            channel_id: channel_id(channel_seed),
            participant1: p1,
            participant2: p2,
            settle_timeout: 50,
            block_number,
        }
    }

    #[test]
    fn test_network_view_channels() {
        let network_view = NetworkView::new(address(1), 5);
        let token_network = address(100);

        network_view.apply_contract_state_change(&opened(1, address(1), address(2), 10));
        // A channel between other nodes only teaches us about participants:
        network_view.apply_contract_state_change(&opened(2, address(3), address(4), 11));
        network_view.apply_contract_state_change(&opened(3, address(5), address(1), 12));

        assert_eq!(
            network_view.participants(&token_network),
            vec![address(1), address(2), address(3), address(4), address(5)]
        );
        let open_channels = network_view.open_channels(&token_network);
        assert_eq!(open_channels.len(), 2);
        assert!(network_view.channel(&channel_id(2)).is_none());

        let channel_state = network_view
            .channel_by_partner(&token_network, &address(5))
            .unwrap();
        assert_eq!(channel_state.channel_id, channel_id(3));
        assert_eq!(channel_state.our_address(), &address(1));
        assert_eq!(channel_state.reveal_timeout, 5);

        network_view.apply_contract_state_change(&ContractStateChange::ChannelNewDeposit {
            token_network,
            channel_id: channel_id(3),
            participant: address(1),
            total_deposit: 40,
            block_number: 13,
        });
        let routes = network_view.routes(&token_network);
        let route = routes
            .iter()
            .find(|route| route.node_address == address(5))
            .unwrap();
        assert_eq!(route.available_balance, 40);
    }

    #[test]
    fn test_network_view_close_settle_reopen() {
        let network_view = NetworkView::new(address(1), 5);
        let token_network = address(100);

        network_view.apply_contract_state_change(&opened(1, address(1), address(2), 10));
        network_view.apply_contract_state_change(&ContractStateChange::ChannelClosed {
            token_network,
            channel_id: channel_id(1),
            closing_participant: address(2),
            block_number: 20,
        });
        assert!(network_view.open_channels(&token_network).is_empty());
        assert_eq!(
            network_view.channel(&channel_id(1)).unwrap().opt_closed_block(),
            Some(20)
        );

        network_view.apply_contract_state_change(&ContractStateChange::ChannelSettled {
            token_network,
            channel_id: channel_id(1),
            block_number: 70,
        });
        assert!(network_view.channel(&channel_id(1)).unwrap().is_settled());

        // A new channel with the same partner gets a new id:
        network_view.apply_contract_state_change(&opened(2, address(2), address(1), 80));
        let channel_state = network_view
            .channel_by_partner(&token_network, &address(2))
            .unwrap();
        assert_eq!(channel_state.channel_id, channel_id(2));
        assert!(channel_state.is_open());
        // The old channel is still known, and settled:
        assert!(network_view.channel(&channel_id(1)).unwrap().is_settled());
    }

    #[test]
    fn test_network_view_blocked() {
        let network_view = NetworkView::new(address(1), 5);
        let token_network = address(100);
        assert!(!network_view.is_blocked(&token_network));
        network_view.set_blocked(&token_network, true);
        assert!(network_view.is_blocked(&token_network));
        network_view.set_blocked(&token_network, false);
        assert!(!network_view.is_blocked(&token_network));
    }

    #[test]
    fn test_network_view_with_channel_mut() {
        let network_view = NetworkView::new(address(1), 5);
        network_view.apply_contract_state_change(&opened(1, address(1), address(2), 10));

        let res = network_view.with_channel_mut(&channel_id(1), |channel_state| {
            channel_state.settle_timeout = 77;
            channel_state.settle_timeout
        });
        assert_eq!(res, Some(77));
        assert_eq!(network_view.channel(&channel_id(1)).unwrap().settle_timeout, 77);
        assert_eq!(network_view.with_channel_mut(&channel_id(9), |_| ()), None);
    }
}

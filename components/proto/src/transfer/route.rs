use serde::{Deserialize, Serialize};

use crate::consts::{BlockHeight, TokenAmount};
use crate::crypto::{Address, ChannelId};

/// A candidate next hop for a payment.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct RouteState {
    /// Partner on the other side of the channel.
    pub node_address: Address,
    pub channel_id: ChannelId,
    /// Amount we can currently lock in this channel.
    pub available_balance: TokenAmount,
    pub reveal_timeout: BlockHeight,
    pub settle_timeout: BlockHeight,
    /// Set if the channel was closed on-chain.
    pub opt_closed_block: Option<BlockHeight>,
}

impl RouteState {
    pub fn is_open(&self) -> bool {
        self.opt_closed_block.is_none()
    }
}

/// Candidate routes for one payment, consumed best first.
///
/// A route is moved out of `available_routes` when it is tried. A failed route is kept in
/// `canceled_routes`, so that it is never tried twice.
#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutesState {
    pub available_routes: Vec<RouteState>,
    pub ignored_routes: Vec<RouteState>,
    pub canceled_routes: Vec<RouteState>,
}

impl RoutesState {
    /// Candidates with a larger available balance come first. Candidates with the same
    /// balance keep their original relative order.
    pub fn new(mut routes: Vec<RouteState>) -> Self {
        routes.sort_by(|a, b| b.available_balance.cmp(&a.available_balance));
        RoutesState {
            available_routes: routes,
            ignored_routes: Vec::new(),
            canceled_routes: Vec::new(),
        }
    }

    /// Take the best route satisfying `is_valid`.
    /// Routes that were skipped because they are not valid are moved to `ignored_routes`.
    pub fn pop_best<F>(&mut self, mut is_valid: F) -> Option<RouteState>
    where
        F: FnMut(&RouteState) -> bool,
    {
        while !self.available_routes.is_empty() {
            let route = self.available_routes.remove(0);
            if is_valid(&route) {
                return Some(route);
            }
            self.ignored_routes.push(route);
        }
        None
    }

    pub fn cancel(&mut self, route: RouteState) {
        self.canceled_routes.push(route);
    }

    pub fn is_exhausted(&self) -> bool {
        self.available_routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_route(index: u8, available_balance: TokenAmount) -> RouteState {
        RouteState {
            node_address: Address::from(&[index; Address::len()]),
            channel_id: ChannelId::from(&[index; ChannelId::len()]),
            available_balance,
            reveal_timeout: 5,
            settle_timeout: 50,
            opt_closed_block: None,
        }
    }

    #[test]
    fn test_routes_best_first() {
        let mut routes_state = RoutesState::new(vec![
            dummy_route(1, 10),
            dummy_route(2, 30),
            dummy_route(3, 20),
            dummy_route(4, 30),
        ]);

        let route = routes_state.pop_best(|_| true).unwrap();
        assert_eq!(route.node_address, Address::from(&[2; Address::len()]));
        let route = routes_state.pop_best(|_| true).unwrap();
        assert_eq!(route.node_address, Address::from(&[4; Address::len()]));

        // Only routes with enough balance:
        let route = routes_state.pop_best(|r| r.available_balance >= 15).unwrap();
        assert_eq!(route.node_address, Address::from(&[3; Address::len()]));
        assert!(routes_state.pop_best(|r| r.available_balance >= 15).is_none());
        assert_eq!(routes_state.ignored_routes.len(), 1);
        assert!(routes_state.is_exhausted());
    }
}

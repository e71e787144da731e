use std::sync::Arc;

use derive_more::From;

use futures::channel::oneshot;
use futures::lock::Mutex;
use futures::task::{Spawn, SpawnExt};

use common::int_convert::fraction_share;

use proto::consts::{BlockHeight, TokenAmount};
use proto::crypto::{Address, ChannelId};

use chain::{LedgerClient, LedgerError};
use channel::{ChannelGraph, ChannelState};
use timer::utils::sleep_ticks;
use timer::TimerClient;

#[derive(Debug, From)]
pub enum ConnectionManagerError {
    /// Zero funds, a zero channel target or a reserve fraction outside [0, 1].
    InvalidArgument,
    LedgerError(LedgerError),
    /// A channel we opened did not show up in the channel graph.
    ChannelNotVisible,
    NoChannelWithPartner,
    SleepTicksError,
    SpawnError,
}

/// The funding policy of a token network.
#[derive(Debug)]
struct ConnectionPolicy {
    funds: TokenAmount,
    initial_channel_target: usize,
    joinable_funds_target: f64,
}

impl ConnectionPolicy {
    fn empty() -> Self {
        ConnectionPolicy {
            funds: 0,
            initial_channel_target: 0,
            joinable_funds_target: 0.0,
        }
    }

    fn initial_funding_per_partner(&self) -> TokenAmount {
        fraction_share(
            self.funds,
            self.joinable_funds_target,
            self.initial_channel_target,
        )
        .unwrap_or(0)
    }
}

/// Keeps a node connected to one token network: decides how many channels to open, with whom
/// and how much to deposit into each of them.
///
/// Every operation that spends funds runs while holding the policy lock, so that two concurrent
/// operations never deposit the same funds twice.
pub struct ConnectionManager<L, G> {
    token_network: Address,
    our_address: Address,
    bootstrap_address: Address,
    settle_timeout: BlockHeight,
    settle_poll_ticks: usize,
    open_poll_ticks: usize,
    open_max_polls: usize,
    ledger: Arc<L>,
    graph: Arc<G>,
    timer_client: TimerClient,
    policy: Mutex<ConnectionPolicy>,
}

impl<L, G> ConnectionManager<L, G>
where
    L: LedgerClient,
    G: ChannelGraph,
{
    pub fn new(
        token_network: Address,
        our_address: Address,
        bootstrap_address: Address,
        settle_timeout: BlockHeight,
        settle_poll_ticks: usize,
        open_poll_ticks: usize,
        open_max_polls: usize,
        ledger: Arc<L>,
        graph: Arc<G>,
        timer_client: TimerClient,
    ) -> Self {
        ConnectionManager {
            token_network,
            our_address,
            bootstrap_address,
            settle_timeout,
            settle_poll_ticks,
            open_poll_ticks,
            open_max_polls,
            ledger,
            graph,
            timer_client,
            policy: Mutex::new(ConnectionPolicy::empty()),
        }
    }

    pub fn token_network(&self) -> &Address {
        &self.token_network
    }

    /// Join the token network with `funds`, opening up to `initial_channel_target` channels.
    /// A fraction `joinable_funds_target` of the funds is kept for channels opened by others.
    pub async fn connect(
        &self,
        funds: TokenAmount,
        initial_channel_target: usize,
        joinable_funds_target: f64,
    ) -> Result<(), ConnectionManagerError> {
        if funds == 0
            || initial_channel_target == 0
            || !(0.0..=1.0).contains(&joinable_funds_target)
        {
            return Err(ConnectionManagerError::InvalidArgument);
        }

        self.graph.set_blocked(&self.token_network, false);

        let mut policy = self.policy.lock().await;
        if policy.funds > 0 {
            info!(
                "connect() called on an already joined token network {}",
                self.token_network
            );
        }
        policy.funds = funds;
        policy.initial_channel_target = initial_channel_target;
        policy.joinable_funds_target = joinable_funds_target;

        if self.graph.participants(&self.token_network).is_empty() {
            debug!(
                "token network {} has no participants, bootstrapping",
                self.token_network
            );
            self.ledger
                .open_channel(
                    self.token_network,
                    self.bootstrap_address,
                    self.settle_timeout,
                )
                .await?;
        }

        self.add_new_partners(&policy).await
    }

    /// Open more channels if the policy asks for them. Called on every new block.
    pub async fn retry_connect(&self) -> Result<(), ConnectionManagerError> {
        let policy = self.policy.lock().await;
        if policy.funds == 0 || self.graph.is_blocked(&self.token_network) {
            return Ok(());
        }
        if self.funds_remaining_inner(&policy) == 0 || !self.wants_more_channels_inner(&policy) {
            return Ok(());
        }
        self.add_new_partners(&policy).await
    }

    /// Deposit into a channel that `partner` opened with us and funded with `partner_deposit`.
    pub async fn join_channel(
        &self,
        partner: &Address,
        partner_deposit: TokenAmount,
    ) -> Result<(), ConnectionManagerError> {
        let policy = self.policy.lock().await;
        if policy.funds == 0 || self.graph.is_blocked(&self.token_network) {
            return Ok(());
        }

        let joining_funds = partner_deposit
            .min(self.funds_remaining_inner(&policy))
            .min(policy.initial_funding_per_partner());
        if joining_funds == 0 {
            return Ok(());
        }

        let channel_state = self
            .graph
            .channel_by_partner(&self.token_network, partner)
            .ok_or(ConnectionManagerError::NoChannelWithPartner)?;

        debug!(
            "joining channel {} with {}: deposit {}",
            channel_state.channel_id, partner, joining_funds
        );
        self.ledger
            .deposit(self.token_network, channel_state.channel_id, joining_funds)
            .await?;
        Ok(())
    }

    /// Close our channels (only those that received transfers if `only_receiving`) and wait
    /// until all of them are settled. Automatic connection is disabled from here on.
    /// Returns the ids of the closed channels.
    pub async fn leave(&self, only_receiving: bool) -> Result<Vec<ChannelId>, ConnectionManagerError> {
        let closed = {
            let mut policy = self.policy.lock().await;
            self.graph.set_blocked(&self.token_network, true);
            policy.initial_channel_target = 0;

            let channels = if only_receiving {
                self.receiving_channels()
            } else {
                self.graph.open_channels(&self.token_network)
            };

            let mut closed = Vec::new();
            for channel_state in channels {
                match self
                    .ledger
                    .close_channel(
                        self.token_network,
                        channel_state.channel_id,
                        *channel_state.partner_address(),
                    )
                    .await
                {
                    Ok(()) => closed.push(channel_state.channel_id),
                    Err(e) => warn!(
                        "leave: could not close channel {}: {:?}",
                        channel_state.channel_id, e
                    ),
                }
            }
            closed
        };

        while !self.all_settled(&closed) {
            sleep_ticks(self.settle_poll_ticks, self.timer_client.clone())
                .await
                .map_err(|_| ConnectionManagerError::SleepTicksError)?;
        }
        Ok(closed)
    }

    /// Run `leave` in the background. The result is sent through the returned receiver.
    pub fn leave_async<S>(
        self: Arc<Self>,
        only_receiving: bool,
        spawner: S,
    ) -> Result<oneshot::Receiver<Result<Vec<ChannelId>, ConnectionManagerError>>, ConnectionManagerError>
    where
        S: Spawn,
        L: 'static,
        G: 'static,
    {
        let (sender, receiver) = oneshot::channel();
        spawner
            .spawn(async move {
                let _ = sender.send(self.leave(only_receiving).await);
            })
            .map_err(|_| ConnectionManagerError::SpawnError)?;
        Ok(receiver)
    }

    fn all_settled(&self, channel_ids: &[ChannelId]) -> bool {
        channel_ids.iter().all(|channel_id| {
            self.graph
                .channel(channel_id)
                .map(|channel_state| channel_state.is_settled())
                .unwrap_or(true)
        })
    }

    /// Are we leaving this token network, or not connected to it?
    pub async fn leave_state(&self) -> bool {
        let policy = self.policy.lock().await;
        self.graph.is_blocked(&self.token_network) || policy.initial_channel_target == 0
    }

    pub async fn wants_more_channels(&self) -> bool {
        let policy = self.policy.lock().await;
        self.wants_more_channels_inner(&policy)
    }

    fn wants_more_channels_inner(&self, policy: &ConnectionPolicy) -> bool {
        self.funds_remaining_inner(policy) > 0
            && !self.graph.is_blocked(&self.token_network)
            && self.graph.open_channels(&self.token_network).len() < policy.initial_channel_target
    }

    /// Funds not yet deposited into open channels.
    pub async fn funds_remaining(&self) -> TokenAmount {
        let policy = self.policy.lock().await;
        self.funds_remaining_inner(&policy)
    }

    fn funds_remaining_inner(&self, policy: &ConnectionPolicy) -> TokenAmount {
        policy.funds.saturating_sub(self.sum_deposits())
    }

    /// Our total deposit over the open channels.
    pub fn sum_deposits(&self) -> TokenAmount {
        self.graph
            .open_channels(&self.token_network)
            .iter()
            .map(|channel_state| channel_state.our_state.contract_balance)
            .fold(0, TokenAmount::saturating_add)
    }

    /// Open channels through which the partner sent us something.
    pub fn receiving_channels(&self) -> Vec<ChannelState> {
        self.graph
            .open_channels(&self.token_network)
            .into_iter()
            .filter(ChannelState::has_received_transfers)
            .collect()
    }

    /// Amount of blocks to wait, from `current_block`, until every channel that received
    /// transfers can be settled after we close it.
    pub fn min_settle_blocks(&self, current_block: BlockHeight) -> BlockHeight {
        self.graph
            .channels(&self.token_network)
            .iter()
            .filter(|channel_state| {
                channel_state.has_received_transfers() && !channel_state.is_settled()
            })
            .map(|channel_state| match channel_state.opt_closed_block() {
                Some(closed_block) => {
                    let since_closed = current_block.saturating_sub(closed_block);
                    channel_state.settle_timeout.saturating_sub(since_closed)
                }
                // Closing takes at least one more block:
                None => channel_state.settle_timeout + 1,
            })
            .max()
            .unwrap_or(0)
    }

    /// Nodes of the token network we could open a new channel with.
    pub fn find_new_partners(&self, number: usize) -> Vec<Address> {
        self.graph
            .participants(&self.token_network)
            .into_iter()
            .filter(|participant| {
                participant != &self.our_address
                    && participant != &self.bootstrap_address
                    && self
                        .graph
                        .channel_by_partner(&self.token_network, participant)
                        .map(|channel_state| !channel_state.is_open())
                        .unwrap_or(true)
            })
            .take(number)
            .collect()
    }

    async fn add_new_partners(&self, policy: &ConnectionPolicy) -> Result<(), ConnectionManagerError> {
        let num_open = self.graph.open_channels(&self.token_network).len();
        let num_missing = policy.initial_channel_target.saturating_sub(num_open);
        if num_missing == 0 {
            return Ok(());
        }

        let funding = policy.initial_funding_per_partner();
        let partners = self.find_new_partners(num_missing);
        if partners.len() < num_missing {
            debug!(
                "token network {}: only {} of {} wanted partners are available",
                self.token_network,
                partners.len(),
                num_missing
            );
        }

        for partner in partners {
            if let Err(e) = self.open_and_deposit(&partner, funding).await {
                warn!(
                    "token network {}: could not open a channel with {}: {:?}",
                    self.token_network, partner, e
                );
            }
        }
        Ok(())
    }

    /// Wait for a channel we opened to reach the channel graph. Chain events show up there only
    /// after they were confirmed.
    async fn wait_channel_visible(&self, channel_id: &ChannelId) -> Result<(), ConnectionManagerError> {
        let mut polls = 0usize;
        while self.graph.channel(channel_id).is_none() {
            if polls >= self.open_max_polls {
                return Err(ConnectionManagerError::ChannelNotVisible);
            }
            sleep_ticks(self.open_poll_ticks, self.timer_client.clone())
                .await
                .map_err(|_| ConnectionManagerError::SleepTicksError)?;
            polls += 1;
        }
        Ok(())
    }

    /// Open a channel with `partner` and deposit `funding` into it, once the channel is
    /// visible in the channel graph.
    pub async fn open_and_deposit(
        &self,
        partner: &Address,
        funding: TokenAmount,
    ) -> Result<ChannelId, ConnectionManagerError> {
        let channel_id = self
            .ledger
            .open_channel(self.token_network, *partner, self.settle_timeout)
            .await?;

        self.wait_channel_visible(&channel_id).await?;

        if funding > 0 {
            self.ledger
                .deposit(self.token_network, channel_id, funding)
                .await?;
        }
        debug!(
            "opened channel {} with {}, deposit {}",
            channel_id, partner, funding
        );
        Ok(channel_id)
    }
}

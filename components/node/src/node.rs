use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use derive_more::From;

use futures::task::Spawn;

use crypto::hash_lock::HashLock;
use crypto::rand::{CryptoRandom, RandGen};

use proto::consts::TokenAmount;
use proto::crypto::{Address, ChannelId, Secret, SecretHash};
use proto::state_change::ContractStateChange;
use proto::transfer::messages::{LockedTransferState, Message};

use chain::{ChainMonitor, ChainMonitorError, ChainMonitorStopper, LedgerClient};
use channel::NetworkView;
use connection::{ConnectionManager, ConnectionManagerError};
use notify::{create_notify_handler, NotifyReceivers};
use timer::TimerClient;
use transfer::{TransferManager, TransferManagerError};

use crate::config::{NodeConfig, NodeConfigError};
use crate::dispatcher::{create_block_callback, Dispatcher};
use crate::transport::PeerTransport;

#[derive(Debug, From)]
pub enum NodeError {
    NodeConfigError(NodeConfigError),
    ChainMonitorError(ChainMonitorError),
    ConnectionManagerError(ConnectionManagerError),
    TransferManagerError(TransferManagerError),
    RandError,
}

/// A payment channel node: follows the ledger, keeps token networks connected and runs
/// transfers.
pub struct Node<L, T, R, S> {
    config: NodeConfig,
    network_view: Arc<NetworkView>,
    transfer_manager: Arc<TransferManager>,
    dispatcher: Arc<Dispatcher<L, T, S>>,
    chain_monitor: ChainMonitor<L>,
    rng: Mutex<R>,
    spawner: S,
}

impl<L, T, R, S> Node<L, T, R, S>
where
    L: LedgerClient + 'static,
    T: PeerTransport + 'static,
    R: CryptoRandom,
    S: Spawn + Clone + Send + Sync + 'static,
{
    /// Returns the node, and the receivers of the notifications it produces.
    pub fn new(
        config: NodeConfig,
        ledger: Arc<L>,
        transport: Arc<T>,
        timer_client: TimerClient,
        rng: R,
        spawner: S,
    ) -> Result<(Self, NotifyReceivers), NodeError> {
        config.validate()?;

        let (notify_handler, notify_receivers) = create_notify_handler(config.notify_buffer);
        let network_view = Arc::new(NetworkView::new(config.our_address, config.reveal_timeout));
        let transfer_manager = Arc::new(TransferManager::new(
            network_view.clone(),
            notify_handler,
            0,
        ));
        let chain_monitor = ChainMonitor::new(
            ledger.clone(),
            timer_client.clone(),
            config.chain_backoff_ticks,
        );
        let dispatcher = Arc::new(Dispatcher::new(
            config.clone(),
            ledger,
            network_view.clone(),
            transfer_manager.clone(),
            transport,
            timer_client,
            spawner.clone(),
        ));

        let node = Node {
            config,
            network_view,
            transfer_manager,
            dispatcher,
            chain_monitor,
            rng: Mutex::new(rng),
            spawner,
        };
        Ok((node, notify_receivers))
    }

    fn lock_rng(&self) -> MutexGuard<'_, R> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start following the ledger. Can only be called once.
    pub fn start(&self) -> Result<ChainMonitorStopper, NodeError> {
        self.chain_monitor
            .register_callback(create_block_callback(self.dispatcher.clone()));
        Ok(self.chain_monitor.start(self.spawner.clone())?)
    }

    pub fn our_address(&self) -> &Address {
        &self.config.our_address
    }

    pub fn network_view(&self) -> &Arc<NetworkView> {
        &self.network_view
    }

    pub fn transfer_manager(&self) -> &Arc<TransferManager> {
        &self.transfer_manager
    }

    /// Queue a state change observed on the ledger. It is handled once it is deep enough.
    pub fn push_contract_state_change(&self, contract_state_change: ContractStateChange) {
        self.dispatcher
            .push_contract_state_change(contract_state_change);
    }

    /// A message from the peer `sender`.
    pub fn handle_message(&self, sender: Address, message: Message) {
        self.dispatcher.handle_message(sender, message);
    }

    pub fn connection_manager(&self, token_network: &Address) -> Arc<ConnectionManager<L, NetworkView>> {
        self.dispatcher.connection_manager(token_network)
    }

    /// Join a token network with `funds`, using the configured connection policy.
    pub async fn connect(
        &self,
        token_network: &Address,
        funds: TokenAmount,
    ) -> Result<(), NodeError> {
        let connection = &self.config.connection;
        self.connection_manager(token_network)
            .connect(
                funds,
                connection.initial_channel_target,
                connection.joinable_funds_target,
            )
            .await?;
        Ok(())
    }

    /// Close our channels in a token network and wait until they are settled.
    pub async fn leave(
        &self,
        token_network: &Address,
        only_receiving: bool,
    ) -> Result<Vec<ChannelId>, NodeError> {
        Ok(self
            .connection_manager(token_network)
            .leave(only_receiving)
            .await?)
    }

    /// Pay `amount` to `target`. Returns the secret hash that identifies the payment.
    /// The lock of the payment expires after half of the settle timeout.
    pub fn send_payment(
        &self,
        token_network: &Address,
        target: &Address,
        amount: TokenAmount,
        payment_id: u64,
    ) -> Result<SecretHash, NodeError> {
        let secret = Secret::rand_gen(&mut *self.lock_rng()).map_err(|_| NodeError::RandError)?;
        let secret_hash = secret.hash_lock();

        let block_number = self.transfer_manager.block_number();
        let transfer = LockedTransferState {
            payment_id,
            token_network: *token_network,
            amount,
            initiator: self.config.our_address,
            target: *target,
            expiration: block_number + self.config.settle_timeout / 2,
            secret_hash,
            opt_secret: Some(secret),
        };
        let outputs = self.transfer_manager.init_initiator(transfer)?;
        self.dispatcher.execute_outputs(outputs);
        Ok(secret_hash)
    }
}

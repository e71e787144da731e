use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::task::{Spawn, SpawnExt};

use proto::consts::BlockHeight;
use proto::crypto::Address;
use proto::state_change::ContractStateChange;
use proto::transfer::messages::Message;

use chain::{BlockCallback, LedgerClient};
use channel::{ChannelGraph, NetworkView};
use connection::ConnectionManager;
use timer::TimerClient;
use transfer::{TransferManager, TransferOutput};

use crate::config::NodeConfig;
use crate::effects::execute_contract_send;
use crate::orderer::ChainEventOrderer;
use crate::transport::PeerTransport;

/// Routes state changes to the components of a node, and carries out what they ask for.
///
/// Chain-derived state changes are buffered and handed out only from `handle_block`, which is
/// called by the chain monitor on every new block.
pub struct Dispatcher<L, T, S> {
    config: NodeConfig,
    ledger: Arc<L>,
    network_view: Arc<NetworkView>,
    transfer_manager: Arc<TransferManager>,
    transport: Arc<T>,
    timer_client: TimerClient,
    spawner: S,
    orderer: Mutex<ChainEventOrderer>,
    connection_managers: Mutex<HashMap<Address, Arc<ConnectionManager<L, NetworkView>>>>,
}

impl<L, T, S> Dispatcher<L, T, S>
where
    L: LedgerClient + 'static,
    T: PeerTransport,
    S: Spawn,
{
    pub fn new(
        config: NodeConfig,
        ledger: Arc<L>,
        network_view: Arc<NetworkView>,
        transfer_manager: Arc<TransferManager>,
        transport: Arc<T>,
        timer_client: TimerClient,
        spawner: S,
    ) -> Self {
        let orderer = ChainEventOrderer::new(config.confirm_blocks, config.settle_hold_blocks);
        Dispatcher {
            config,
            ledger,
            network_view,
            transfer_manager,
            transport,
            timer_client,
            spawner,
            orderer: Mutex::new(orderer),
            connection_managers: Mutex::new(HashMap::new()),
        }
    }

    fn lock_orderer(&self) -> MutexGuard<'_, ChainEventOrderer> {
        self.orderer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_connection_managers(
        &self,
    ) -> MutexGuard<'_, HashMap<Address, Arc<ConnectionManager<L, NetworkView>>>> {
        self.connection_managers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The connection manager of a token network. Created on first use.
    pub fn connection_manager(&self, token_network: &Address) -> Arc<ConnectionManager<L, NetworkView>> {
        self.lock_connection_managers()
            .entry(*token_network)
            .or_insert_with(|| {
                Arc::new(ConnectionManager::new(
                    *token_network,
                    self.config.our_address,
                    self.config.bootstrap_address,
                    self.config.settle_timeout,
                    self.config.settle_poll_ticks,
                    self.config.open_poll_ticks,
                    self.config.open_max_polls,
                    self.ledger.clone(),
                    self.network_view.clone(),
                    self.timer_client.clone(),
                ))
            })
            .clone()
    }

    fn opt_connection_manager(
        &self,
        token_network: &Address,
    ) -> Option<Arc<ConnectionManager<L, NetworkView>>> {
        self.lock_connection_managers().get(token_network).cloned()
    }

    /// Queue a state change observed on the ledger.
    pub fn push_contract_state_change(&self, contract_state_change: ContractStateChange) {
        self.lock_orderer().push(contract_state_change);
    }

    /// Handle a new block: chain events that became deep enough, then lock expirations, then
    /// connection retries.
    pub fn handle_block(&self, block_number: BlockHeight) {
        let released = self.lock_orderer().release(block_number);
        for contract_state_change in released {
            self.apply_contract_state_change(&contract_state_change);
        }

        let outputs = self.transfer_manager.handle_block(block_number);
        self.execute_outputs(outputs);

        let connection_managers: Vec<_> = self
            .lock_connection_managers()
            .values()
            .cloned()
            .collect();
        for connection_manager in connection_managers {
            let spawn_res = self.spawner.spawn(async move {
                if let Err(e) = connection_manager.retry_connect().await {
                    warn!(
                        "retry_connect() for {} failed: {:?}",
                        connection_manager.token_network(),
                        e
                    );
                }
            });
            if spawn_res.is_err() {
                error!("dispatcher: could not spawn retry_connect()");
            }
        }
    }

    fn apply_contract_state_change(&self, contract_state_change: &ContractStateChange) {
        self.network_view
            .apply_contract_state_change(contract_state_change);

        let outputs = self
            .transfer_manager
            .handle_contract_state_change(contract_state_change);
        self.execute_outputs(outputs);

        // A partner funded a channel with us that we did not fund yet:
        if let ContractStateChange::ChannelNewDeposit {
            token_network,
            channel_id,
            participant,
            total_deposit,
            ..
        } = contract_state_change
        {
            if participant == &self.config.our_address {
                return;
            }
            let should_join = self
                .network_view
                .channel(channel_id)
                .map(|channel_state| {
                    channel_state.is_open() && channel_state.our_state.contract_balance == 0
                })
                .unwrap_or(false);
            let connection_manager = match self.opt_connection_manager(token_network) {
                Some(connection_manager) if should_join => connection_manager,
                _ => return,
            };
            let partner = *participant;
            let partner_deposit = *total_deposit;
            let spawn_res = self.spawner.spawn(async move {
                if let Err(e) = connection_manager
                    .join_channel(&partner, partner_deposit)
                    .await
                {
                    warn!("join_channel() with {} failed: {:?}", partner, e);
                }
            });
            if spawn_res.is_err() {
                error!("dispatcher: could not spawn join_channel()");
            }
        }
    }

    /// A message from the peer `sender`.
    pub fn handle_message(&self, sender: Address, message: Message) {
        let outputs = self.transfer_manager.handle_message(sender, message);
        self.execute_outputs(outputs);
    }

    /// Send messages, and start on-chain calls in the background.
    pub fn execute_outputs(&self, outputs: Vec<TransferOutput>) {
        for output in outputs {
            match output {
                TransferOutput::Message { recipient, message } => {
                    self.transport.send_message(recipient, message)
                }
                TransferOutput::ContractSend(contract_send) => {
                    let ledger = self.ledger.clone();
                    let timer_client = self.timer_client.clone();
                    let backoff_ticks = self.config.chain_backoff_ticks;
                    let spawn_res = self.spawner.spawn(async move {
                        // Failures are logged by execute_contract_send():
                        let _ = execute_contract_send(
                            &*ledger,
                            &contract_send,
                            timer_client,
                            backoff_ticks,
                        )
                        .await;
                    });
                    if spawn_res.is_err() {
                        error!("dispatcher: could not spawn a contract send");
                    }
                }
            }
        }
    }
}

/// A chain monitor callback that drives `dispatcher` on every new block.
pub fn create_block_callback<L, T, S>(dispatcher: Arc<Dispatcher<L, T, S>>) -> BlockCallback
where
    L: LedgerClient + 'static,
    T: PeerTransport + 'static,
    S: Spawn + Send + Sync + 'static,
{
    Box::new(move |block_number| {
        dispatcher.handle_block(block_number);
        Ok(())
    })
}

use proto::transfer::events::ContractSend;

use chain::{LedgerClient, LedgerError};
use timer::utils::sleep_ticks;
use timer::TimerClient;

#[derive(Debug)]
pub enum ContractSendError {
    /// The ledger passed the deadline of the call before it succeeded.
    DeadlinePassed,
    LedgerError(LedgerError),
    SleepTicksError,
}

async fn call_contract<L>(ledger: &L, contract_send: &ContractSend) -> Result<(), LedgerError>
where
    L: LedgerClient + ?Sized,
{
    match contract_send {
        ContractSend::RegisterSecret { secret, .. } => ledger.register_secret(*secret).await,
        ContractSend::ChannelClose {
            token_network,
            channel_id,
            partner,
            ..
        } => {
            ledger
                .close_channel(*token_network, *channel_id, *partner)
                .await
        }
        ContractSend::Unlock {
            token_network,
            channel_id,
            partner,
            secret_hash,
            ..
        } => {
            ledger
                .unlock(*token_network, *channel_id, *partner, *secret_hash)
                .await
        }
    }
}

/// Perform an on-chain call, retrying every `backoff_ticks` until it succeeds or until the
/// ledger passes the deadline of the call.
pub async fn execute_contract_send<L>(
    ledger: &L,
    contract_send: &ContractSend,
    timer_client: TimerClient,
    backoff_ticks: usize,
) -> Result<(), ContractSendError>
where
    L: LedgerClient + ?Sized,
{
    let deadline = contract_send.deadline();
    loop {
        match ledger.current_block_height().await {
            Ok(height) if height > deadline => {
                error!(
                    "contract send: deadline {} passed (height {}): {:?}",
                    deadline, height, contract_send
                );
                return Err(ContractSendError::DeadlinePassed);
            }
            Ok(_) => match call_contract(ledger, contract_send).await {
                Ok(()) => {
                    debug!("contract send: done: {:?}", contract_send);
                    return Ok(());
                }
                Err(LedgerError::ChannelNotFound) => {
                    error!("contract send: unknown channel: {:?}", contract_send);
                    return Err(ContractSendError::LedgerError(LedgerError::ChannelNotFound));
                }
                Err(e) => warn!("contract send: {:?} failed: {:?}", contract_send, e),
            },
            Err(e) => warn!("contract send: could not obtain block height: {:?}", e),
        }

        sleep_ticks(backoff_ticks, timer_client.clone())
            .await
            .map_err(|_| ContractSendError::SleepTicksError)?;
    }
}

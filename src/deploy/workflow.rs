//! Two-step world deployment.

use super::DeployStage;
use crate::error::{MirrorError, Result};
use crate::schema::FieldValue;
use crate::types::{Address, BlockNumber};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Event emitted by the factory with the new world's address as first argument.
pub const WORLD_DEPLOYED_EVENT: &str = "WorldDeployed";

/// Transaction hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHash(pub [u8; 32]);

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({})", self)
    }
}

/// A contract function call to submit.
#[derive(Clone, Debug, PartialEq)]
pub struct ContractCall {
    pub address: Address,
    pub function: String,
    pub args: Vec<FieldValue>,
}

impl ContractCall {
    pub fn new(address: Address, function: &str, args: Vec<FieldValue>) -> Self {
        Self {
            address,
            function: function.to_string(),
            args,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

/// A decoded event log from a receipt.
#[derive(Clone, Debug, PartialEq)]
pub struct ReceiptLog {
    /// Emitting contract.
    pub address: Address,
    pub event: String,
    pub args: Vec<FieldValue>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransactionReceipt {
    pub tx_hash: TxHash,
    pub status: ReceiptStatus,
    pub block_number: BlockNumber,
    pub logs: Vec<ReceiptLog>,
}

/// Submits transactions and waits for their confirmation.
pub trait TransactionTransport {
    fn send_transaction(&self, call: &ContractCall) -> Result<TxHash>;

    /// Blocks until the transaction is mined.
    fn wait_for_receipt(&self, tx: &TxHash) -> Result<TransactionReceipt>;
}

/// Outcome of a successful deployment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorldDeploy {
    pub address: Address,
    /// Block of the `deployWorld` transaction.
    pub deploy_block: BlockNumber,
    /// Block of the `registerModuleFunctions` transaction. Remote reads
    /// of initial state happen here.
    pub state_block: BlockNumber,
}

/// Cancels an in-progress deployment between steps.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs the deployment workflow over a transport.
pub struct Deployer<T> {
    transport: T,
    cancel: CancelHandle,
}

impl<T: TransactionTransport> Deployer<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            cancel: CancelHandle::default(),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Deploy a world through `factory` and register its module functions.
    ///
    /// Steps run strictly in order. Nothing is retried and a failure at
    /// either step returns no partial result.
    pub fn deploy_world(&self, factory: Address, salt: [u8; 32]) -> Result<WorldDeploy> {
        tracing::info!("deploying world via factory {}", factory);
        let receipt = self.submit(
            DeployStage::DeployWorld,
            ContractCall::new(
                factory,
                "deployWorld",
                vec![FieldValue::FixedBytes(salt.to_vec())],
            ),
        )?;
        let address = world_address(&receipt)?;
        let deploy_block = receipt.block_number;
        tracing::info!("deployed world to {} at {:?}", address, deploy_block);

        tracing::info!("registering module functions");
        let receipt = self.submit(
            DeployStage::RegisterFunctions,
            ContractCall::new(
                factory,
                "registerModuleFunctions",
                vec![FieldValue::Address(address)],
            ),
        )?;

        Ok(WorldDeploy {
            address,
            deploy_block,
            state_block: receipt.block_number,
        })
    }

    /// Send one call, wait for it and require success.
    fn submit(&self, stage: DeployStage, call: ContractCall) -> Result<TransactionReceipt> {
        self.check_cancelled()?;

        let at_stage = |err: MirrorError| match err {
            MirrorError::Cancelled | MirrorError::Deployment { .. } => err,
            other => MirrorError::Deployment {
                stage,
                reason: other.to_string(),
            },
        };

        let tx = self.transport.send_transaction(&call).map_err(at_stage)?;
        tracing::debug!("waiting for {} ({})", call.function, tx);
        let receipt = self.transport.wait_for_receipt(&tx).map_err(at_stage)?;

        self.check_cancelled()?;

        if receipt.status != ReceiptStatus::Success {
            tracing::error!("{} failed: {:?}", call.function, receipt);
            return Err(MirrorError::Deployment {
                stage,
                reason: format!("transaction {} reverted", tx),
            });
        }
        Ok(receipt)
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(MirrorError::Cancelled);
        }
        Ok(())
    }
}

fn world_address(receipt: &TransactionReceipt) -> Result<Address> {
    receipt
        .logs
        .iter()
        .filter(|log| log.event == WORLD_DEPLOYED_EVENT)
        .find_map(|log| match log.args.first() {
            Some(FieldValue::Address(address)) => Some(*address),
            _ => None,
        })
        .ok_or_else(|| MirrorError::Deployment {
            stage: DeployStage::DeployWorld,
            reason: format!("receipt has no {} event", WORLD_DEPLOYED_EVENT),
        })
}

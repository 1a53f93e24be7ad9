//! World deployment and remote table reads.
//!
//! Transaction construction, signing and the network are external; they
//! sit behind [`TransactionTransport`] and [`TableReader`].

mod remote;
mod workflow;

pub use remote::{get_table_value, TableReader};
pub use workflow::{
    CancelHandle, ContractCall, Deployer, ReceiptLog, ReceiptStatus, TransactionReceipt,
    TransactionTransport, TxHash, WorldDeploy, WORLD_DEPLOYED_EVENT,
};

use std::fmt;

/// Step of the deployment workflow, carried by deployment errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeployStage {
    /// Step 1: `deployWorld` on the factory.
    DeployWorld,
    /// Step 2: `registerModuleFunctions` for the new world.
    RegisterFunctions,
}

impl DeployStage {
    /// 1-based step number.
    pub fn step(&self) -> u8 {
        match self {
            DeployStage::DeployWorld => 1,
            DeployStage::RegisterFunctions => 2,
        }
    }
}

impl fmt::Display for DeployStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeployStage::DeployWorld => write!(f, "step 1 (deploy world)"),
            DeployStage::RegisterFunctions => write!(f, "step 2 (register module functions)"),
        }
    }
}

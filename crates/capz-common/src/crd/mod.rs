//! Value types carried by the Azure infrastructure resources
//!
//! These mirror the shapes of the cluster, machine and pool objects the
//! host loop hands to scopes, plus the status types every owner shares.

mod cluster;
mod future;
mod machine;
mod machinepool;
mod managed;
mod status;
mod types;

pub use cluster::{
    AzureBastion, AzureClusterSpec, BastionSpec, IdentityRef, NatGatewaySpec, NetworkSpec,
    PublicIpSpec, ReconcileTimeouts, SecurityGroupProtocol, SecurityGroupSpec, SecurityRule,
    SecurityRuleAction, SecurityRuleDirection, SubnetRole, SubnetSpec, VnetSpec,
};
pub use future::{Future, FutureType};
pub use machine::{AzureMachineSpec, Image, OsDisk};
pub use machinepool::{
    AzureMachinePoolDeploymentStrategy, AzureMachinePoolInstance, AzureMachinePoolMachineTemplate,
    AzureMachinePoolSpec, DeletePolicy, DeploymentStrategyType, MachineRollingUpdateDeployment,
};
pub use managed::{AzureManagedMachinePoolSpec, ManagedMachinePoolScaling, NodePoolMode};
pub use status::AsyncStatus;
pub use types::*;

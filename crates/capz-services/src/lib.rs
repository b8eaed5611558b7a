//! Azure services for capz
//!
//! One module per resource kind. Each builds its specs from a scope, turns
//! them into ARM request bodies (or child custom resources for the
//! declarative path) and wires them into a service the controllers run in
//! dependency order:
//!
//! | Service | Kind | Condition |
//! |---|---|---|
//! | `group` | resource group | `ResourceGroupReady` |
//! | `virtualnetwork` | virtual network | `VNetReady` |
//! | `securitygroups` | network security groups | `SecurityGroupsReady` |
//! | `publicips` | public IP addresses | `PublicIPsReady` |
//! | `natgateways` | NAT gateways | `NATGatewaysReady` |
//! | `subnets` | subnets | `SubnetsReady` |
//! | `bastionhosts` | bastion hosts | `BastionHostReady` |
//! | `virtualmachine` | virtual machines | `VMRunning` |
//! | `scaleset` | virtual machine scale sets | `ScaleSetRunning` |
//! | `agentpools` | managed cluster agent pools | `AgentPoolsReady` |

#![deny(missing_docs)]

pub mod agentpools;
pub mod bastionhosts;
pub mod converters;
pub mod groups;
pub mod kubeconfig;
pub mod natgateways;
pub mod publicips;
pub mod scalesets;
pub mod scope;
pub mod securitygroups;
pub mod subnets;
pub mod virtualmachines;
pub mod virtualnetworks;

pub use scope::{
    ClusterInfo, ClusterScope, KubeStatusWriter, MachinePoolScope, MachineScope,
    ManagedMachinePoolScope, ScopeState, StatusWriter,
};

/// Provider namespace of network resources
pub(crate) const NETWORK_PROVIDER: &str = "Microsoft.Network";

/// Provider namespace of compute resources
pub(crate) const COMPUTE_PROVIDER: &str = "Microsoft.Compute";

/// Provider namespace of managed cluster resources
pub(crate) const CONTAINER_SERVICE_PROVIDER: &str = "Microsoft.ContainerService";

/// API version of network resources
pub(crate) const NETWORK_API_VERSION: &str = "2023-05-01";

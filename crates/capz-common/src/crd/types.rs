//! Supporting status types shared by every Azure-backed resource

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// Condition types and reasons
// =============================================================================

/// Condition reported by the resource group service
pub const RESOURCE_GROUP_READY_CONDITION: &str = "ResourceGroupReady";
/// Condition reported by the virtual network service
pub const VNET_READY_CONDITION: &str = "VNetReady";
/// Condition reported by the subnets service
pub const SUBNETS_READY_CONDITION: &str = "SubnetsReady";
/// Condition reported by the NAT gateways service
pub const NAT_GATEWAYS_READY_CONDITION: &str = "NATGatewaysReady";
/// Condition reported by the public IPs service
pub const PUBLIC_IPS_READY_CONDITION: &str = "PublicIPsReady";
/// Condition reported by the security groups service
pub const SECURITY_GROUPS_READY_CONDITION: &str = "SecurityGroupsReady";
/// Condition reported by the bastion host service
pub const BASTION_HOST_READY_CONDITION: &str = "BastionHostReady";
/// Condition reported by the virtual machine service
pub const VM_RUNNING_CONDITION: &str = "VMRunning";
/// Condition reported by the scale set service
pub const SCALE_SET_RUNNING_CONDITION: &str = "ScaleSetRunning";
/// Condition reported by the scale set service for model rollout
pub const SCALE_SET_MODEL_UPDATED_CONDITION: &str = "ScaleSetModelUpdated";
/// Condition reported by the agent pools service
pub const AGENT_POOLS_READY_CONDITION: &str = "AgentPoolsReady";

/// A long-running create is in flight
pub const CREATING_REASON: &str = "Creating";
/// A long-running update is in flight
pub const UPDATING_REASON: &str = "Updating";
/// A long-running delete is in flight
pub const DELETING_REASON: &str = "Deleting";
/// The resource was deleted
pub const DELETED_REASON: &str = "Deleted";
/// Reconciling the resource failed
pub const FAILED_REASON: &str = "Failed";
/// Deleting the resource failed
pub const DELETION_FAILED_REASON: &str = "DeletionFailed";

/// Condition status following Kubernetes conventions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// How serious a False condition is
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionSeverity {
    /// Reconciliation is blocked until the spec changes
    Error,
    /// Reconciliation will be retried
    Warning,
    /// Expected intermediate state (e.g. an operation in flight)
    Info,
}

impl std::fmt::Display for ConditionSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "Error"),
            Self::Warning => write!(f, "Warning"),
            Self::Info => write!(f, "Info"),
        }
    }
}

/// Kubernetes-style condition with a severity for False states
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., ResourceGroupReady)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Severity, set only when status is False
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<ConditionSeverity>,

    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            severity: None,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// A True condition with no reason
    pub fn true_(type_: impl Into<String>) -> Self {
        Self::new(type_, ConditionStatus::True, "", "")
    }

    /// A False condition with a severity
    pub fn false_(
        type_: impl Into<String>,
        reason: impl Into<String>,
        severity: ConditionSeverity,
        message: impl Into<String>,
    ) -> Self {
        let mut condition = Self::new(type_, ConditionStatus::False, reason, message);
        condition.severity = Some(severity);
        condition
    }

    /// Whether the condition is True
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    /// Whether two conditions describe the same state, ignoring timestamps
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.severity == other.severity
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Provisioning state reported by Azure Resource Manager
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ProvisioningState {
    /// Resource is being created
    Creating,
    /// Resource is being updated
    Updating,
    /// Resource is being deleted
    Deleting,
    /// Resource is being migrated
    Migrating,
    /// Last operation succeeded
    Succeeded,
    /// Last operation failed
    Failed,
    /// Last operation was canceled
    Canceled,
    /// Any state this client does not know about
    #[default]
    #[serde(other)]
    Unknown,
}

impl ProvisioningState {
    /// Whether no operation is running on the resource
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Canceled | Self::Failed)
    }
}

impl std::fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Creating => "Creating",
            Self::Updating => "Updating",
            Self::Deleting => "Deleting",
            Self::Migrating => "Migrating",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
            Self::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ProvisioningState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Creating" => Self::Creating,
            "Updating" => Self::Updating,
            "Deleting" => Self::Deleting,
            "Migrating" => Self::Migrating,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "Canceled" => Self::Canceled,
            _ => Self::Unknown,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_serializes_type_field() {
        let c = Condition::false_(
            VNET_READY_CONDITION,
            CREATING_REASON,
            ConditionSeverity::Info,
            "in progress",
        );
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["type"], "VNetReady");
        assert_eq!(json["severity"], "Info");
        assert!(json.get("lastTransitionTime").is_some());
    }

    #[test]
    fn test_true_condition_has_no_severity() {
        let c = Condition::true_(SUBNETS_READY_CONDITION);
        assert!(c.is_true());
        let json = serde_json::to_value(&c).unwrap();
        assert!(json.get("severity").is_none());
    }

    #[test]
    fn test_same_state_ignores_timestamp() {
        let a = Condition::true_("X");
        let mut b = Condition::true_("X");
        b.last_transition_time = a.last_transition_time - chrono::Duration::hours(1);
        assert!(a.same_state(&b));
        b.message = "changed".to_string();
        assert!(!a.same_state(&b));
    }

    #[test]
    fn test_provisioning_state_terminal_set() {
        assert!(ProvisioningState::Succeeded.is_terminal());
        assert!(ProvisioningState::Canceled.is_terminal());
        assert!(ProvisioningState::Failed.is_terminal());
        assert!(!ProvisioningState::Updating.is_terminal());
        assert!(!ProvisioningState::Unknown.is_terminal());
    }

    #[test]
    fn test_provisioning_state_unknown_strings() {
        let state: ProvisioningState = serde_json::from_str("\"Upgrading\"").unwrap();
        assert_eq!(state, ProvisioningState::Unknown);
        assert_eq!("Deleting".parse(), Ok(ProvisioningState::Deleting));
    }
}

//! Mappings between capz value types and Azure wire types
//!
//! All functions are pure. Wire types keep Azure's shapes (optional
//! values, nested `properties`); capz types are the flat ones users write.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use capz_azure::resource_id::provider_id;
use capz_common::crd::{
    AzureMachinePoolInstance, ProvisioningState, SecurityGroupProtocol, SecurityRule,
    SecurityRuleAction, SecurityRuleDirection,
};
use capz_common::tags::Tags;
use capz_common::{Error, Result};

use crate::scalesets::ScaleSetVm;
use crate::securitygroups::{AzureSecurityRule, SecurityRuleProperties};

/// Tags as ARM returns them; values may be null
pub type AzureTags = BTreeMap<String, Option<String>>;

/// Reference to another resource by ID
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct SubResource {
    /// ARM resource ID
    pub id: String,
}

impl SubResource {
    /// Reference `id`
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    /// Whether this references `id`; ARM IDs compare case-insensitively
    pub fn refers_to(&self, id: &str) -> bool {
        self.id.eq_ignore_ascii_case(id)
    }
}

/// SKU of a resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Sku {
    /// SKU name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Instance count, for scale sets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<i64>,
}

impl Sku {
    /// SKU with only a name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            capacity: None,
        }
    }
}

// =============================================================================
// Tags
// =============================================================================

/// Wire tags to a string map, dropping null values
pub fn tags_to_map(tags: Option<&AzureTags>) -> Tags {
    tags.map(|tags| {
        tags.iter()
            .filter_map(|(k, v)| v.as_ref().map(|v| (k.clone(), v.clone())))
            .collect()
    })
    .unwrap_or_default()
}

/// String map to wire tags; no tags at all is `None`
pub fn map_to_tags(tags: &Tags) -> Option<AzureTags> {
    if tags.is_empty() {
        return None;
    }
    Some(
        tags.iter()
            .map(|(k, v)| (k.clone(), Some(v.clone())))
            .collect(),
    )
}

// =============================================================================
// Security rules
// =============================================================================

const PROTOCOL_ALL: &str = "*";
const PROTOCOL_TCP: &str = "Tcp";
const PROTOCOL_UDP: &str = "Udp";
const PROTOCOL_ICMP: &str = "Icmp";

/// Security rule in ARM's shape
pub fn security_rule_to_azure(rule: &SecurityRule) -> AzureSecurityRule {
    let protocol = match rule.protocol {
        SecurityGroupProtocol::All => PROTOCOL_ALL,
        SecurityGroupProtocol::Tcp => PROTOCOL_TCP,
        SecurityGroupProtocol::Udp => PROTOCOL_UDP,
        SecurityGroupProtocol::Icmp => PROTOCOL_ICMP,
    };
    let direction = match rule.direction {
        SecurityRuleDirection::Inbound => "Inbound",
        SecurityRuleDirection::Outbound => "Outbound",
    };
    let access = match rule.action {
        SecurityRuleAction::Allow => "Allow",
        SecurityRuleAction::Deny => "Deny",
    };
    AzureSecurityRule {
        name: rule.name.clone(),
        properties: SecurityRuleProperties {
            description: (!rule.description.is_empty()).then(|| rule.description.clone()),
            protocol: protocol.to_string(),
            direction: direction.to_string(),
            priority: Some(rule.priority),
            source_address_prefix: rule.source.clone(),
            source_port_range: rule.source_ports.clone(),
            destination_address_prefix: rule.destination.clone(),
            destination_port_range: rule.destination_ports.clone(),
            access: Some(access.to_string()),
            ..Default::default()
        },
    }
}

/// Security rule from ARM's shape
///
/// An unknown protocol or direction is a validation error. A missing access
/// is `Allow`.
pub fn security_rule_from_azure(rule: &AzureSecurityRule) -> Result<SecurityRule> {
    let p = &rule.properties;
    let protocol = match p.protocol.as_str() {
        PROTOCOL_ALL => SecurityGroupProtocol::All,
        s if s.eq_ignore_ascii_case(PROTOCOL_TCP) => SecurityGroupProtocol::Tcp,
        s if s.eq_ignore_ascii_case(PROTOCOL_UDP) => SecurityGroupProtocol::Udp,
        s if s.eq_ignore_ascii_case(PROTOCOL_ICMP) => SecurityGroupProtocol::Icmp,
        other => {
            return Err(Error::validation(format!(
                "security rule {}: unsupported protocol {other:?}",
                rule.name
            )))
        }
    };
    let direction = match p.direction.as_str() {
        s if s.eq_ignore_ascii_case("Inbound") => SecurityRuleDirection::Inbound,
        s if s.eq_ignore_ascii_case("Outbound") => SecurityRuleDirection::Outbound,
        other => {
            return Err(Error::validation(format!(
                "security rule {}: unsupported direction {other:?}",
                rule.name
            )))
        }
    };
    let action = match p.access.as_deref() {
        None | Some("") => SecurityRuleAction::Allow,
        Some(s) if s.eq_ignore_ascii_case("Allow") => SecurityRuleAction::Allow,
        Some(s) if s.eq_ignore_ascii_case("Deny") => SecurityRuleAction::Deny,
        Some(other) => {
            return Err(Error::validation(format!(
                "security rule {}: unsupported access {other:?}",
                rule.name
            )))
        }
    };
    Ok(SecurityRule {
        name: rule.name.clone(),
        description: p.description.clone().unwrap_or_default(),
        protocol,
        direction,
        priority: p.priority.unwrap_or_default(),
        source: p.source_address_prefix.clone(),
        source_ports: p.source_port_range.clone(),
        destination: p.destination_address_prefix.clone(),
        destination_ports: p.destination_port_range.clone(),
        action,
    })
}

// =============================================================================
// Scale set instances
// =============================================================================

/// Machine pool member for a scale set VM
pub fn scale_set_vm_to_instance(vm: &ScaleSetVm) -> AzureMachinePoolInstance {
    let props = vm.properties.as_ref();
    let provisioning_state = props
        .and_then(|p| p.provisioning_state.as_deref())
        .map(|s| s.parse::<ProvisioningState>().unwrap_or_default())
        .unwrap_or_default();
    let name = props
        .and_then(|p| p.os_profile.as_ref())
        .and_then(|o| o.computer_name.clone())
        .unwrap_or_else(|| vm.name.clone());
    AzureMachinePoolInstance {
        provider_id: provider_id(&vm.id),
        instance_id: vm.instance_id.clone(),
        name,
        creation_timestamp: props
            .and_then(|p| p.time_created)
            .unwrap_or_else(DateTime::<Utc>::default),
        ready: provisioning_state == ProvisioningState::Succeeded,
        provisioning_state,
        latest_model_applied: props
            .and_then(|p| p.latest_model_applied)
            .unwrap_or_default(),
        delete_requested: false,
    }
}

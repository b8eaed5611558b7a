//! Network security groups
//!
//! Rules are merged into the existing group rather than replacing it:
//! declared rules are added or corrected, rules capz applied last time but
//! no longer declares are removed, and rules capz never declared are kept.
//! The names applied last time are remembered on the cluster through an
//! annotation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use capz_azure::resource_id::resource_id;
use capz_common::crd::{SecurityRule, SECURITY_GROUPS_READY_CONDITION};
use capz_common::tags::{
    build_cluster_tags, is_owned_by_cluster, BuildParams, ResourceLifecycle, Tags,
};
use capz_common::Result;
use capz_reconciler::{AsyncService, Reconciler, ResourceRef, ResourceSpec, ServiceHooks};

use crate::converters::{
    map_to_tags, security_rule_from_azure, security_rule_to_azure, tags_to_map, AzureTags,
};
use crate::scope::ClusterScope;
use crate::{NETWORK_API_VERSION, NETWORK_PROVIDER};

/// Service name of security groups
pub const SERVICE_NAME: &str = "securitygroups";

/// Security group as ARM returns it
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroup {
    /// ARM ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Azure region
    #[serde(default)]
    pub location: String,
    /// Concurrency token; sent back so a concurrent change fails the write
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Tags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<AzureTags>,
    /// Group properties
    #[serde(default)]
    pub properties: SecurityGroupProperties,
}

/// Properties of a security group
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupProperties {
    /// Rules
    #[serde(default)]
    pub security_rules: Vec<AzureSecurityRule>,
    /// Provisioning state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_state: Option<String>,
}

/// Security rule as ARM returns it
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureSecurityRule {
    /// Rule name
    pub name: String,
    /// Rule properties
    #[serde(default)]
    pub properties: SecurityRuleProperties,
}

/// Properties of a security rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRuleProperties {
    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// `*`, `Tcp`, `Udp` or `Icmp`
    #[serde(default)]
    pub protocol: String,
    /// `Inbound` or `Outbound`
    #[serde(default)]
    pub direction: String,
    /// Priority
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Source CIDR or tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address_prefix: Option<String>,
    /// Source ports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_port_range: Option<String>,
    /// Destination CIDR or tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_address_prefix: Option<String>,
    /// Destination ports
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_port_range: Option<String>,
    /// `Allow` or `Deny`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    /// Fields capz does not model, kept as read
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// Desired security group
#[derive(Clone, Debug, PartialEq)]
pub struct NsgSpec {
    /// Group name
    pub name: String,
    /// Resource group of the security group
    pub resource_group: String,
    /// Subscription holding the group
    pub subscription_id: String,
    /// Azure region
    pub location: String,
    /// Declared rules
    pub security_rules: Vec<SecurityRule>,
    /// Names of the rules capz applied last time
    pub last_applied_rules: BTreeSet<String>,
    /// Owning cluster
    pub cluster_name: String,
    /// User tags
    pub additional_tags: Tags,
}

impl NsgSpec {
    /// Merge the declared rules into `existing`; `None` when nothing changes
    fn merge_rules(&self, existing: &[AzureSecurityRule]) -> Option<Vec<AzureSecurityRule>> {
        let declared: BTreeMap<&str, &SecurityRule> = self
            .security_rules
            .iter()
            .map(|r| (r.name.as_str(), r))
            .collect();

        let mut changed = false;
        let mut merged = Vec::with_capacity(existing.len() + declared.len());
        let mut seen = BTreeSet::new();
        for rule in existing {
            match declared.get(rule.name.as_str()) {
                Some(want) => {
                    seen.insert(rule.name.as_str());
                    match security_rule_from_azure(rule) {
                        Ok(have) if have == **want => merged.push(rule.clone()),
                        _ => {
                            changed = true;
                            merged.push(security_rule_to_azure(want));
                        }
                    }
                }
                None if self.last_applied_rules.contains(&rule.name) => {
                    debug!(nsg = %self.name, rule = %rule.name, "removing rule no longer declared");
                    changed = true;
                }
                None => merged.push(rule.clone()),
            }
        }
        for rule in &self.security_rules {
            if !seen.contains(rule.name.as_str()) {
                changed = true;
                merged.push(security_rule_to_azure(rule));
            }
        }
        changed.then_some(merged)
    }
}

impl ResourceSpec for NsgSpec {
    type Resource = SecurityGroup;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        &self.resource_group
    }

    fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            id: resource_id(
                &self.subscription_id,
                &self.resource_group,
                NETWORK_PROVIDER,
                "networkSecurityGroups",
                &self.name,
            ),
            api_version: NETWORK_API_VERSION,
        }
    }

    fn parameters(&self, existing: Option<&SecurityGroup>) -> Result<Option<SecurityGroup>> {
        if let Some(existing) = existing {
            return Ok(self
                .merge_rules(&existing.properties.security_rules)
                .map(|security_rules| SecurityGroup {
                    properties: SecurityGroupProperties {
                        security_rules,
                        provisioning_state: None,
                    },
                    ..existing.clone()
                }));
        }
        let tags = build_cluster_tags(BuildParams {
            cluster_name: &self.cluster_name,
            lifecycle: ResourceLifecycle::Owned,
            name: Some(&self.name),
            role: None,
            additional: &self.additional_tags,
        });
        Ok(Some(SecurityGroup {
            location: self.location.clone(),
            tags: map_to_tags(&tags),
            properties: SecurityGroupProperties {
                security_rules: self.security_rules.iter().map(security_rule_to_azure).collect(),
                provisioning_state: None,
            },
            ..Default::default()
        }))
    }

    fn is_managed(&self, existing: &SecurityGroup) -> bool {
        is_owned_by_cluster(&tags_to_map(existing.tags.as_ref()), &self.cluster_name)
    }
}

/// Remembers the declared rule names once every group converged
struct RecordAppliedRules {
    applied: BTreeMap<String, BTreeSet<String>>,
}

impl ServiceHooks<ClusterScope, SecurityGroup> for RecordAppliedRules {
    fn post_reconcile(&self, scope: &ClusterScope, result: Result<()>) -> Result<()> {
        if result.is_ok() {
            scope.set_last_applied_security_rules(&self.applied)?;
        }
        result
    }
}

/// Security group service of a cluster
pub fn service(
    scope: Arc<ClusterScope>,
    reconciler: Arc<dyn Reconciler<NsgSpec, ClusterScope>>,
) -> Result<AsyncService<NsgSpec, ClusterScope>> {
    let specs = scope.nsg_specs()?;
    let applied = specs
        .iter()
        .map(|s| {
            let names = s.security_rules.iter().map(|r| r.name.clone()).collect();
            (s.name.clone(), names)
        })
        .collect();
    Ok(
        AsyncService::new(SERVICE_NAME, SECURITY_GROUPS_READY_CONDITION, scope, reconciler, specs)
            .with_hooks(RecordAppliedRules { applied }),
    )
}

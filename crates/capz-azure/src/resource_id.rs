//! ARM resource ID builders and parsing
//!
//! Resources reference each other by these IDs, never by in-memory links.

use capz_common::{Error, Result};

/// Prefix of provider IDs on Kubernetes nodes and machines
pub const PROVIDER_ID_PREFIX: &str = "azure://";

/// `/subscriptions/{sub}/resourceGroups/{rg}`
pub fn resource_group_id(subscription_id: &str, resource_group: &str) -> String {
    format!("/subscriptions/{subscription_id}/resourceGroups/{resource_group}")
}

/// ID of a top-level resource in a resource group
pub fn resource_id(
    subscription_id: &str,
    resource_group: &str,
    provider: &str,
    resource_type: &str,
    name: &str,
) -> String {
    format!(
        "{}/providers/{provider}/{resource_type}/{name}",
        resource_group_id(subscription_id, resource_group)
    )
}

/// ID of a child resource (e.g. a subnet of a virtual network)
#[allow(clippy::too_many_arguments)]
pub fn child_resource_id(
    subscription_id: &str,
    resource_group: &str,
    provider: &str,
    parent_type: &str,
    parent_name: &str,
    child_type: &str,
    child_name: &str,
) -> String {
    format!(
        "{}/{child_type}/{child_name}",
        resource_id(subscription_id, resource_group, provider, parent_type, parent_name)
    )
}

/// Parsed ARM resource ID
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceId {
    /// Subscription ID
    pub subscription_id: String,
    /// Resource group, absent for subscription-level resources
    pub resource_group: Option<String>,
    /// Provider namespace (e.g. Microsoft.Network), absent for resource groups
    pub provider: Option<String>,
    /// (type, name) pairs from the outermost resource inwards
    pub segments: Vec<(String, String)>,
}

impl ResourceId {
    /// Parse an ARM ID or an `azure://` provider ID
    pub fn parse(id: &str) -> Result<Self> {
        let trimmed = id.strip_prefix(PROVIDER_ID_PREFIX).unwrap_or(id);
        let parts: Vec<&str> = trimmed.split('/').filter(|p| !p.is_empty()).collect();
        let invalid = |why: &str| Error::validation(format!("invalid resource ID {id:?}: {why}"));

        let mut iter = parts.into_iter();
        match (iter.next(), iter.next()) {
            (Some(s), Some(sub)) if s.eq_ignore_ascii_case("subscriptions") => {
                let mut parsed = ResourceId {
                    subscription_id: sub.to_string(),
                    resource_group: None,
                    provider: None,
                    segments: Vec::new(),
                };
                let rest: Vec<&str> = iter.collect();
                let mut rest = rest.as_slice();

                if let [rg_kw, rg, tail @ ..] = rest {
                    if rg_kw.eq_ignore_ascii_case("resourceGroups") {
                        parsed.resource_group = Some(rg.to_string());
                        rest = tail;
                    }
                }
                if let [prov_kw, provider, tail @ ..] = rest {
                    if prov_kw.eq_ignore_ascii_case("providers") {
                        parsed.provider = Some(provider.to_string());
                        rest = tail;
                    }
                }
                if rest.len() % 2 != 0 {
                    return Err(invalid("unpaired type/name segment"));
                }
                parsed.segments = rest
                    .chunks(2)
                    .map(|pair| (pair[0].to_string(), pair[1].to_string()))
                    .collect();
                if parsed.provider.is_none() && !parsed.segments.is_empty() {
                    return Err(invalid("resource segments without a provider"));
                }
                Ok(parsed)
            }
            _ => Err(invalid("must start with /subscriptions/{id}")),
        }
    }

    /// Name of the innermost resource (or the resource group)
    pub fn name(&self) -> Option<&str> {
        self.segments
            .last()
            .map(|(_, name)| name.as_str())
            .or(self.resource_group.as_deref())
    }

    /// Type of the innermost resource, e.g. `virtualMachineScaleSets/virtualMachines`
    pub fn resource_type(&self) -> String {
        self.segments
            .iter()
            .map(|(t, _)| t.as_str())
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Provider ID for an ARM resource ID
pub fn provider_id(resource_id: &str) -> String {
    format!("{PROVIDER_ID_PREFIX}{resource_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        assert_eq!(resource_group_id("sub", "rg"), "/subscriptions/sub/resourceGroups/rg");
        assert_eq!(
            child_resource_id(
                "sub",
                "rg",
                "Microsoft.Network",
                "virtualNetworks",
                "vnet",
                "subnets",
                "nodes"
            ),
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks/vnet/subnets/nodes"
        );
    }

    #[test]
    fn test_parse_scale_set_instance_provider_id() {
        let id = ResourceId::parse(
            "azure:///subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/virtualMachineScaleSets/pool/virtualMachines/3",
        )
        .unwrap();
        assert_eq!(id.subscription_id, "sub");
        assert_eq!(id.resource_group.as_deref(), Some("rg"));
        assert_eq!(id.provider.as_deref(), Some("Microsoft.Compute"));
        assert_eq!(id.name(), Some("3"));
        assert_eq!(id.resource_type(), "virtualMachineScaleSets/virtualMachines");
    }

    #[test]
    fn test_parse_resource_group() {
        let id = ResourceId::parse("/subscriptions/sub/resourceGroups/rg1").unwrap();
        assert_eq!(id.name(), Some("rg1"));
        assert!(id.segments.is_empty());
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(ResourceId::parse("/resourceGroups/rg").is_err());
        assert!(ResourceId::parse(
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Network/virtualNetworks"
        )
        .is_err());
    }

    #[test]
    fn test_provider_id_round_trip() {
        let rid = resource_id("sub", "rg", "Microsoft.Compute", "virtualMachines", "vm0");
        let parsed = ResourceId::parse(&provider_id(&rid)).unwrap();
        assert_eq!(parsed.name(), Some("vm0"));
    }
}

//! Persisted handle to an in-flight Azure long-running operation

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kind of operation a Future tracks
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum FutureType {
    /// PUT of a resource that did not exist
    Create,
    /// PUT of an existing resource
    Update,
    /// DELETE of a resource
    Delete,
    /// PATCH of an existing resource
    Patch,
    /// Apply of a child resource owned by the declarative operator
    #[serde(rename = "ASOCreateOrUpdate")]
    AsoCreateOrUpdate,
    /// Delete of a child resource owned by the declarative operator
    #[serde(rename = "ASODelete")]
    AsoDelete,
}

impl FutureType {
    /// Future types written by the create-or-update path
    pub const PUT_TYPES: &'static [FutureType] =
        &[FutureType::Create, FutureType::Update, FutureType::Patch];

    /// Future types written by the delete path
    pub const DELETE_TYPES: &'static [FutureType] = &[FutureType::Delete];
}

impl std::fmt::Display for FutureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "Create",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::Patch => "Patch",
            Self::AsoCreateOrUpdate => "ASOCreateOrUpdate",
            Self::AsoDelete => "ASODelete",
        };
        write!(f, "{s}")
    }
}

/// Serializable record of an in-flight operation, stored on the owner's status
///
/// At most one Future per (service name, resource name) is live. `data` is
/// opaque here; the Azure crate encodes and decodes it.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Future {
    /// Operation kind
    #[serde(rename = "type")]
    pub type_: FutureType,

    /// Service that issued the operation (e.g. "group")
    pub service_name: String,

    /// Name of the Azure resource
    pub name: String,

    /// Resource group of the Azure resource
    #[serde(default)]
    pub resource_group: String,

    /// URL-safe base64 encoding of the poller state
    #[serde(default)]
    pub data: String,
}

impl Future {
    /// Whether this future tracks the given service and resource
    pub fn is_for(&self, service_name: &str, name: &str) -> bool {
        self.service_name == service_name && self.name == name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_future_wire_shape() {
        let f = Future {
            type_: FutureType::AsoCreateOrUpdate,
            service_name: "group".to_string(),
            name: "rg1".to_string(),
            resource_group: "rg1".to_string(),
            data: String::new(),
        };
        let json = serde_json::to_value(&f).unwrap();
        assert_eq!(json["type"], "ASOCreateOrUpdate");
        assert_eq!(json["serviceName"], "group");
        assert_eq!(json["resourceGroup"], "rg1");
    }

    #[test]
    fn test_future_type_display_matches_wire() {
        for t in [
            FutureType::Create,
            FutureType::Update,
            FutureType::Delete,
            FutureType::Patch,
            FutureType::AsoCreateOrUpdate,
            FutureType::AsoDelete,
        ] {
            let wire = serde_json::to_value(t).unwrap();
            assert_eq!(wire, serde_json::Value::String(t.to_string()));
        }
    }
}

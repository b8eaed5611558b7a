//! The contract every Azure resource kind implements

use serde::de::DeserializeOwned;
use serde::Serialize;

use capz_common::Result;

/// Address of a resource in ARM
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceRef {
    /// Full ARM resource ID
    pub id: String,
    /// API version used for every call against this resource
    pub api_version: &'static str,
}

/// How an existing resource is brought to its desired state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpdateMethod {
    /// Replace the resource with a PUT of the full parameters
    #[default]
    Put,
    /// Send the parameters as a PATCH
    Patch,
}

/// Describes one Azure resource a service reconciles
///
/// Implementations hold the desired state for a single resource and know
/// how to turn it into the request body for a create or update, given the
/// resource as it exists in Azure.
pub trait ResourceSpec: Send + Sync {
    /// Wire representation of the resource, as returned by a GET
    type Resource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    /// Name of the resource
    fn resource_name(&self) -> &str;

    /// Resource group the resource lives in
    fn resource_group_name(&self) -> &str;

    /// Parent resource name for child resources (e.g. the VNet of a subnet)
    fn owner_resource_name(&self) -> Option<&str> {
        None
    }

    /// Where the resource lives in ARM
    fn resource_ref(&self) -> ResourceRef;

    /// Desired parameters, given the existing resource if there is one
    ///
    /// `Ok(None)` means the existing resource already matches and no write
    /// is needed. Returning `Ok(None)` without an existing resource is an
    /// error in the engine.
    fn parameters(&self, existing: Option<&Self::Resource>) -> Result<Option<Self::Resource>>;

    /// Whether the existing resource is owned by the cluster and may be deleted
    fn is_managed(&self, _existing: &Self::Resource) -> bool {
        true
    }

    /// How an existing resource is updated
    fn update_method(&self) -> UpdateMethod {
        UpdateMethod::Put
    }
}

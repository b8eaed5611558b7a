//! Common types for capz: errors, status types, tags, and utilities

#![deny(missing_docs)]

use std::time::Duration;

pub mod config;
pub mod crd;
pub mod error;
pub mod metrics;
pub mod retry;
pub mod tags;
pub mod telemetry;

pub use error::{AzureError, Error, ErrorKind};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Default requeue interval for transient errors and in-flight operations
pub const DEFAULT_REQUEUE_AFTER: Duration = Duration::from_secs(20);

/// Default timeout for a single Azure call, including in-window LRO polling
pub const DEFAULT_AZURE_CALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Default timeout for one service's reconcile or delete pass
pub const DEFAULT_AZURE_SERVICE_RECONCILE_TIMEOUT: Duration = Duration::from_secs(12);

/// Default interval between LRO status polls inside the call timeout
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Field manager used for server-side apply of child resources
pub const FIELD_MANAGER: &str = "capz-manager";

// =============================================================================
// Labels and Annotations
// =============================================================================

/// Label marking a child resource as owned by a cluster (value: cluster name)
pub const OWNED_BY_CLUSTER_LABEL: &str = "sigs.k8s.io/cluster-api-provider-azure/owned-by-cluster";

/// Annotation telling the declarative operator whether to write through to Azure
pub const RECONCILE_POLICY_ANNOTATION: &str = "serviceoperator.azure.com/reconcile-policy";

/// Reconcile policy: the operator converges the Azure resource
pub const RECONCILE_POLICY_MANAGE: &str = "manage";

/// Reconcile policy: the operator only observes the Azure resource
pub const RECONCILE_POLICY_SKIP: &str = "skip";

/// Annotation holding the JSON map of tags last applied by capz
pub const LAST_APPLIED_TAGS_ANNOTATION: &str = "sigs.k8s.io/last-applied-tags";

/// Annotation requesting a kubeconfig refresh for a managed cluster
pub const KUBECONFIG_REFRESH_NEEDED_ANNOTATION: &str = "aro.azure.com/kubeconfig-refresh-needed";

/// Annotation recording the last kubeconfig refresh (RFC 3339)
pub const KUBECONFIG_LAST_UPDATED_ANNOTATION: &str = "aro.azure.com/kubeconfig-last-updated";

/// Annotation a user or the autoscaler sets on a machine to prioritize its deletion
pub const DELETE_MACHINE_ANNOTATION: &str = "cluster.x-k8s.io/delete-machine";

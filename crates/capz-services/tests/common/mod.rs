//! In-memory stand-ins for ARM, the child resource API and status writes

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DynamicObject};
use kube::ResourceExt;
use parking_lot::Mutex;
use serde_json::{json, Value};

use capz_azure::lro::POLLER_STATE_VERSION;
use capz_azure::{ArmClient, HttpMethod, OperationStatus, PollMode, PollerState};
use capz_common::config::TimeoutConfig;
use capz_common::crd::{AsyncStatus, AzureClusterSpec, NetworkSpec, VnetSpec};
use capz_common::{AzureError, Result};
use capz_reconciler::ChildResourceClient;
use capz_services::scope::{ClusterScope, ClusterScopeParams};
use capz_services::StatusWriter;

pub const CLUSTER: &str = "my-cluster";
pub const NAMESPACE: &str = "default";
pub const SUBSCRIPTION: &str = "sub";

// =============================================================================
// ARM
// =============================================================================

/// ARM backed by a map of resource ID to body
///
/// Writes finish at once unless `pending` is set, in which case every
/// operation stays in progress forever.
#[derive(Default)]
pub struct FakeArm {
    resources: Mutex<HashMap<String, Value>>,
    deletes: Mutex<Vec<String>>,
    pending: AtomicBool,
    puts: AtomicUsize,
    polls: AtomicUsize,
}

impl FakeArm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Keep every operation in progress
    pub fn pending() -> Arc<Self> {
        let arm = Self::default();
        arm.pending.store(true, Ordering::SeqCst);
        Arc::new(arm)
    }

    pub fn insert(&self, id: &str, body: Value) {
        self.resources.lock().insert(id.to_string(), body);
    }

    pub fn resource(&self, id: &str) -> Option<Value> {
        self.resources.lock().get(id).cloned()
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> Vec<String> {
        self.deletes.lock().clone()
    }

    fn in_progress(&self, method: HttpMethod, id: &str) -> PollerState {
        PollerState {
            version: POLLER_STATE_VERSION,
            method,
            resource_url: format!("https://management.azure.com{id}"),
            poll_url: Some("https://management.azure.com/operations/1".to_string()),
            poll_mode: PollMode::AsyncOperation,
            status: OperationStatus::InProgress,
            retry_after_secs: None,
        }
    }

    fn write(&self, method: HttpMethod, id: &str, mut body: Value) -> PollerState {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.pending.load(Ordering::SeqCst) {
            return self.in_progress(method, id);
        }
        body["id"] = json!(id);
        body["properties"]["provisioningState"] = json!("Succeeded");
        self.insert(id, body);
        PollerState::done(method, id)
    }
}

#[async_trait]
impl ArmClient for FakeArm {
    async fn get(&self, resource_id: &str, _api_version: &str) -> Result<Value> {
        self.resource(resource_id)
            .ok_or_else(|| AzureError::new(404, "ResourceNotFound", "not found").into())
    }

    async fn begin_put(&self, resource_id: &str, _api_version: &str, body: Value) -> Result<PollerState> {
        Ok(self.write(HttpMethod::Put, resource_id, body))
    }

    async fn begin_patch(&self, resource_id: &str, _api_version: &str, body: Value) -> Result<PollerState> {
        Ok(self.write(HttpMethod::Patch, resource_id, body))
    }

    async fn begin_delete(&self, resource_id: &str, _api_version: &str) -> Result<PollerState> {
        self.deletes.lock().push(resource_id.to_string());
        if self.pending.load(Ordering::SeqCst) {
            return Ok(self.in_progress(HttpMethod::Delete, resource_id));
        }
        self.resources.lock().remove(resource_id);
        Ok(PollerState::done(HttpMethod::Delete, resource_id))
    }

    async fn poll(&self, state: PollerState) -> Result<PollerState> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        Ok(state)
    }
}

// =============================================================================
// Child resources
// =============================================================================

/// Child resource API backed by a map of namespace/name to object
#[derive(Default)]
pub struct FakeChildClient {
    objects: Mutex<HashMap<(String, String), DynamicObject>>,
    applied: Mutex<Vec<DynamicObject>>,
    deleted: Mutex<Vec<String>>,
}

impl FakeChildClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, obj: DynamicObject) {
        let key = (obj.namespace().unwrap_or_default(), obj.name_any());
        self.objects.lock().insert(key, obj);
    }

    pub fn applied(&self) -> Vec<DynamicObject> {
        self.applied.lock().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl ChildResourceClient for FakeChildClient {
    async fn get(
        &self,
        _ar: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self
            .objects
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn apply(&self, _ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        self.applied.lock().push(obj.clone());
        self.insert(obj.clone());
        Ok(obj.clone())
    }

    async fn delete(&self, _ar: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        self.deleted.lock().push(format!("{namespace}/{name}"));
        self.objects
            .lock()
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }

    async fn list(
        &self,
        _ar: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>> {
        let (key, value) = label_selector.split_once('=').unwrap_or((label_selector, ""));
        Ok(self
            .objects
            .lock()
            .iter()
            .filter(|((ns, _), obj)| {
                ns == namespace && obj.labels().get(key).map(String::as_str) == Some(value)
            })
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn patch_annotations(
        &self,
        _ar: &ApiResource,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        if let Some(obj) = self
            .objects
            .lock()
            .get_mut(&(namespace.to_string(), name.to_string()))
        {
            obj.annotations_mut().extend(annotations);
        }
        Ok(())
    }
}

// =============================================================================
// Status
// =============================================================================

/// Remembers the last status written per owner
#[derive(Default)]
pub struct RecordingWriter {
    statuses: Mutex<HashMap<String, AsyncStatus>>,
}

impl RecordingWriter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn status_of(&self, name: &str) -> Option<AsyncStatus> {
        self.statuses.lock().get(name).cloned()
    }
}

#[async_trait]
impl StatusWriter for RecordingWriter {
    async fn patch_status(
        &self,
        owner: &OwnerReference,
        _namespace: &str,
        status: &AsyncStatus,
    ) -> Result<()> {
        self.statuses.lock().insert(owner.name.clone(), status.clone());
        Ok(())
    }

    async fn patch_annotations(
        &self,
        _owner: &OwnerReference,
        _namespace: &str,
        _annotations: &BTreeMap<String, String>,
    ) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Scopes
// =============================================================================

pub fn cluster_spec(additional_tags: &[(&str, &str)]) -> AzureClusterSpec {
    AzureClusterSpec {
        subscription_id: SUBSCRIPTION.to_string(),
        resource_group: "rg1".to_string(),
        location: "eastus".to_string(),
        additional_tags: additional_tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        network_spec: NetworkSpec {
            vnet: VnetSpec {
                name: "vnet1".to_string(),
                cidr_blocks: vec!["10.0.0.0/8".to_string()],
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    }
}

pub fn cluster_scope(
    spec: AzureClusterSpec,
    status: AsyncStatus,
    writer: Arc<RecordingWriter>,
) -> Arc<ClusterScope> {
    let scope = ClusterScope::new(ClusterScopeParams {
        name: CLUSTER.to_string(),
        namespace: NAMESPACE.to_string(),
        uid: "uid-1".to_string(),
        spec,
        status,
        annotations: BTreeMap::new(),
        timeouts: TimeoutConfig::default(),
        writer,
    })
    .expect("valid cluster spec");
    Arc::new(scope)
}

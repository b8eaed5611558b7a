//! In-memory scope and specs shared by the unit tests

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use mockall::mock;
use parking_lot::Mutex;
use serde_json::{json, Value};

use capz_azure::lro::{HttpMethod, OperationStatus, PollMode, PollerState, POLLER_STATE_VERSION};
use capz_azure::ArmClient;
use capz_common::crd::{AsyncStatus, Future, FutureType};
use capz_common::tags::Tags;
use capz_common::{Error, Result};

use crate::scope::{AsoScope, ClusterDescriber, ConditionScope, FutureScope, TimeoutScope};
use crate::spec::{ResourceRef, ResourceSpec};

mock! {
    pub Arm {}

    #[async_trait]
    impl ArmClient for Arm {
        async fn get(&self, resource_id: &str, api_version: &str) -> Result<Value>;
        async fn begin_put(&self, resource_id: &str, api_version: &str, body: Value) -> Result<PollerState>;
        async fn begin_patch(&self, resource_id: &str, api_version: &str, body: Value) -> Result<PollerState>;
        async fn begin_delete(&self, resource_id: &str, api_version: &str) -> Result<PollerState>;
        async fn poll(&self, state: PollerState) -> Result<PollerState>;
    }
}

pub const CLUSTER: &str = "my-cluster";

/// Scope backed by an [`AsyncStatus`] in memory
#[derive(Default)]
pub struct FakeScope {
    pub status: Mutex<AsyncStatus>,
}

impl FakeScope {
    pub fn with_future(future: Future) -> Self {
        let scope = Self::default();
        scope.status.lock().set_future(future);
        scope
    }

    pub fn future(&self, service: &str, name: &str) -> Option<Future> {
        self.status.lock().get_future(service, name).cloned()
    }

    pub fn condition(&self, type_: &str) -> Option<capz_common::crd::Condition> {
        self.status.lock().get_condition(type_).cloned()
    }
}

impl FutureScope for FakeScope {
    fn get_long_running_operation_state(
        &self,
        name: &str,
        service_name: &str,
        types: &[FutureType],
    ) -> Option<Future> {
        self.status
            .lock()
            .get_future_of(service_name, name, types)
            .cloned()
    }

    fn set_long_running_operation_state(&self, future: Future) {
        self.status.lock().set_future(future);
    }

    fn delete_long_running_operation_state(&self, name: &str, service_name: &str) {
        self.status.lock().delete_future(service_name, name);
    }
}

impl ConditionScope for FakeScope {
    fn update_put_status(&self, condition_type: &str, service_name: &str, err: Option<&Error>) {
        self.status
            .lock()
            .update_put_status(condition_type, service_name, err);
    }

    fn update_patch_status(&self, condition_type: &str, service_name: &str, err: Option<&Error>) {
        self.status
            .lock()
            .update_patch_status(condition_type, service_name, err);
    }

    fn update_delete_status(&self, condition_type: &str, service_name: &str, err: Option<&Error>) {
        self.status
            .lock()
            .update_delete_status(condition_type, service_name, err);
    }
}

impl TimeoutScope for FakeScope {
    fn default_azure_call_timeout(&self) -> Duration {
        capz_common::DEFAULT_AZURE_CALL_TIMEOUT
    }

    fn default_service_reconcile_timeout(&self) -> Duration {
        capz_common::DEFAULT_AZURE_SERVICE_RECONCILE_TIMEOUT
    }

    fn default_requeue_after(&self) -> Duration {
        capz_common::DEFAULT_REQUEUE_AFTER
    }

    fn default_poll_interval(&self) -> Duration {
        capz_common::DEFAULT_POLL_INTERVAL
    }
}

impl ClusterDescriber for FakeScope {
    fn cluster_name(&self) -> &str {
        CLUSTER
    }

    fn namespace(&self) -> &str {
        "default"
    }

    fn subscription_id(&self) -> &str {
        "sub"
    }

    fn resource_group(&self) -> &str {
        "rg1"
    }

    fn location(&self) -> &str {
        "eastus"
    }

    fn additional_tags(&self) -> Tags {
        Tags::new()
    }
}

impl AsoScope for FakeScope {
    fn aso_owner(&self) -> OwnerReference {
        OwnerReference {
            api_version: "infrastructure.cluster.x-k8s.io/v1beta1".to_string(),
            kind: "AzureCluster".to_string(),
            name: CLUSTER.to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }
}

/// Spec whose resource is plain JSON
pub struct TestSpec {
    pub name: String,
    pub desired: Value,
    pub managed: bool,
    pub fail_parameters: bool,
}

impl TestSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            desired: json!({"name": name, "location": "eastus"}),
            managed: true,
            fail_parameters: false,
        }
    }
}

impl ResourceSpec for TestSpec {
    type Resource = Value;

    fn resource_name(&self) -> &str {
        &self.name
    }

    fn resource_group_name(&self) -> &str {
        "rg1"
    }

    fn resource_ref(&self) -> ResourceRef {
        ResourceRef {
            id: format!("/subscriptions/sub/resourceGroups/{}", self.name),
            api_version: "2021-04-01",
        }
    }

    fn parameters(&self, existing: Option<&Value>) -> Result<Option<Value>> {
        if self.fail_parameters {
            return Err(Error::validation("bad spec"));
        }
        match existing {
            Some(existing) if *existing == self.desired => Ok(None),
            _ => Ok(Some(self.desired.clone())),
        }
    }

    fn is_managed(&self, _existing: &Value) -> bool {
        self.managed
    }
}

pub fn poller(method: HttpMethod, status: OperationStatus) -> PollerState {
    PollerState {
        version: POLLER_STATE_VERSION,
        method,
        resource_url: "https://management.azure.com/subscriptions/sub/resourceGroups/rg1"
            .to_string(),
        poll_url: Some("https://management.azure.com/operations/op-1".to_string()),
        poll_mode: PollMode::AsyncOperation,
        status,
        retry_after_secs: None,
    }
}

pub fn not_found() -> Error {
    capz_common::AzureError::new(404, "ResourceNotFound", "not found").into()
}

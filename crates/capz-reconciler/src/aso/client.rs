//! Access to child custom resources

use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::api::{Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::json;
use tracing::trace;

#[cfg(test)]
use mockall::automock;

use capz_common::{Error, Result, FIELD_MANAGER};

/// Reads and writes child resources of arbitrary kinds
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChildResourceClient: Send + Sync {
    /// Get a child; a missing child is `None`
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    /// Server-side apply a child, taking ownership of the fields it sets
    async fn apply(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject>;

    /// Delete a child; deleting a missing child succeeds
    async fn delete(&self, ar: &ApiResource, namespace: &str, name: &str) -> Result<()>;

    /// List children matching a label selector
    async fn list(
        &self,
        ar: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>>;

    /// Merge annotations into a child without touching other fields
    async fn patch_annotations(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<()>;
}

/// [`ChildResourceClient`] backed by the Kubernetes API
pub struct KubeChildResourceClient {
    client: Client,
}

impl KubeChildResourceClient {
    /// Create a client using the given Kubernetes client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, ar: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, ar)
    }
}

#[async_trait]
impl ChildResourceClient for KubeChildResourceClient {
    async fn get(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        Ok(self.api(ar, namespace).get_opt(name).await?)
    }

    async fn apply(&self, ar: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject> {
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| Error::validation_for_field("metadata.name", "child resource has no name"))?;
        let namespace = obj
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| {
                Error::validation_for_field("metadata.namespace", "child resource has no namespace")
            })?;
        trace!(kind = %ar.kind, %namespace, %name, "applying child resource");
        let params = PatchParams::apply(FIELD_MANAGER).force();
        Ok(self
            .api(ar, namespace)
            .patch(name, &params, &Patch::Apply(obj))
            .await?)
    }

    async fn delete(&self, ar: &ApiResource, namespace: &str, name: &str) -> Result<()> {
        match self
            .api(ar, namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(
        &self,
        ar: &ApiResource,
        namespace: &str,
        label_selector: &str,
    ) -> Result<Vec<DynamicObject>> {
        let list = self
            .api(ar, namespace)
            .list(&ListParams::default().labels(label_selector))
            .await?;
        Ok(list.items)
    }

    async fn patch_annotations(
        &self,
        ar: &ApiResource,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<()> {
        let patch = json!({ "metadata": { "annotations": annotations } });
        self.api(ar, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

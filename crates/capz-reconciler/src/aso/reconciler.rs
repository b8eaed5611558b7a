//! Create, adopt, pause and delete one Azure Service Operator child resource
//!
//! The child is written with server-side apply; the operator's `Ready`
//! condition decides whether the pass is done, still in progress or failed.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::api::{ApiResource, DynamicObject, ObjectMeta};
use kube::core::TypeMeta;
use kube::ResourceExt;
use serde_json::{json, Value};
use tracing::{debug, info, instrument};

use capz_common::crd::{Future, FutureType};
use capz_common::error::DEFAULT_TERMINAL_REASON;
use capz_common::{
    Error, Result, OWNED_BY_CLUSTER_LABEL, RECONCILE_POLICY_ANNOTATION, RECONCILE_POLICY_MANAGE,
    RECONCILE_POLICY_SKIP,
};

use super::client::ChildResourceClient;
use super::AsoResourceSpec;
use crate::scope::AsoScope;
use crate::tags::reconcile_tags;

/// Condition the operator reports convergence on
pub const READY_CONDITION: &str = "Ready";

/// Ready reason while the operator is still converging the resource
pub const REASON_RECONCILING: &str = "Reconciling";

/// Ready reason when the Azure resource does not exist
pub const REASON_AZURE_RESOURCE_NOT_FOUND: &str = "AzureResourceNotFound";

const SEVERITY_ERROR: &str = "Error";

/// The child's `Ready` condition as the operator writes it
#[derive(Debug, Default)]
struct ReadyCondition {
    status: String,
    reason: String,
    severity: String,
    message: String,
}

fn ready_condition(obj: &DynamicObject) -> Option<ReadyCondition> {
    let field = |c: &Value, key: &str| c.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    obj.data
        .pointer("/status/conditions")?
        .as_array()?
        .iter()
        .find(|c| c.get("type").and_then(Value::as_str) == Some(READY_CONDITION))
        .map(|c| ReadyCondition {
            status: field(c, "status"),
            reason: field(c, "reason"),
            severity: field(c, "severity"),
            message: field(c, "message"),
        })
}

fn owned_by_cluster(obj: &DynamicObject, cluster_name: &str) -> bool {
    obj.labels().get(OWNED_BY_CLUSTER_LABEL).map(String::as_str) == Some(cluster_name)
}

fn reconcile_policy(obj: &DynamicObject) -> Option<&str> {
    obj.annotations()
        .get(RECONCILE_POLICY_ANNOTATION)
        .map(String::as_str)
}

/// Reconciles child resources for declarative services
#[derive(Clone)]
pub struct AsoReconciler {
    client: Arc<dyn ChildResourceClient>,
}

impl AsoReconciler {
    /// Create a reconciler over `client`
    pub fn new(client: Arc<dyn ChildResourceClient>) -> Self {
        Self { client }
    }

    /// The client children are read and written through
    pub fn client(&self) -> &Arc<dyn ChildResourceClient> {
        &self.client
    }

    /// Create or update the child described by `spec`
    ///
    /// Writing the child returns an operation-not-done error; the operator
    /// reports completion through the child's `Ready` condition, which the
    /// next pass reads.
    #[instrument(skip_all, fields(service = %service_name))]
    pub async fn create_or_update_resource<S, Sc>(
        &self,
        scope: &Sc,
        spec: &S,
        service_name: &str,
    ) -> Result<Option<DynamicObject>>
    where
        S: AsoResourceSpec + ?Sized,
        Sc: AsoScope + ?Sized,
    {
        let ar = spec.api_resource();
        let (name, namespace) = child_key(scope, &spec.resource_ref());
        let requeue_after = scope.default_requeue_after();

        let existing = self
            .client
            .get(&ar, &namespace, &name)
            .await
            .map_err(|e| {
                e.wrap(format!(
                    "failed to get existing resource {namespace}/{name} (service: {service_name})"
                ))
            })?;

        let mut adopt = false;
        let mut ready_err = None;
        if let Some(existing) = &existing {
            if !owned_by_cluster(existing, scope.cluster_name()) {
                debug!(%name, "skipping reconcile of resource not owned by the cluster");
                return Ok(Some(existing.clone()));
            }

            let Some(ready) = ready_condition(existing) else {
                return Err(Error::transient(
                    format!("ready status unknown for {namespace}/{name}"),
                    requeue_after,
                ));
            };
            if ready.status != "True" {
                if ready.reason == REASON_AZURE_RESOURCE_NOT_FOUND
                    && reconcile_policy(existing) == Some(RECONCILE_POLICY_SKIP)
                {
                    info!(%name, "resource not found in Azure with reconcile-policy skip, adopting");
                    adopt = true;
                } else if ready.reason == REASON_RECONCILING {
                    return Err(Error::operation_not_done(
                        aso_future(FutureType::AsoCreateOrUpdate, service_name, &name, &namespace),
                        requeue_after,
                    ));
                } else {
                    let message = format!("resource is not Ready: {}", ready.message);
                    ready_err = Some(if ready.severity == SEVERITY_ERROR {
                        let reason = if ready.reason.is_empty() {
                            DEFAULT_TERMINAL_REASON.to_string()
                        } else {
                            ready.reason
                        };
                        Error::terminal(reason, message)
                    } else {
                        Error::transient(message, requeue_after)
                    });
                }
            }
        }

        let parameters = spec.parameters(existing.as_ref()).map_err(|e| {
            e.wrap(format!(
                "failed to get desired parameters for resource {namespace}/{name} (service: {service_name})"
            ))
        })?;
        let mut desired = match parameters {
            Some(parameters) => parameters,
            None => existing.clone().unwrap_or_else(|| spec.resource_ref()),
        };
        desired.metadata.name = Some(name.clone());
        desired.metadata.namespace = Some(namespace.clone());

        let mut labels = desired.metadata.labels.take().unwrap_or_default();
        let mut annotations = desired.metadata.annotations.take().unwrap_or_default();
        if let Some(existing) = &existing {
            labels.extend(existing.labels().clone());
            annotations.extend(existing.annotations().clone());
        }
        labels.insert(OWNED_BY_CLUSTER_LABEL.to_string(), scope.cluster_name().to_string());
        if existing.is_none() || adopt {
            annotations.insert(
                RECONCILE_POLICY_ANNOTATION.to_string(),
                RECONCILE_POLICY_MANAGE.to_string(),
            );
        }
        let managed = annotations.get(RECONCILE_POLICY_ANNOTATION).map(String::as_str)
            == Some(RECONCILE_POLICY_MANAGE);
        desired.metadata.labels = Some(labels);
        desired.metadata.annotations = Some(annotations);
        desired.metadata.owner_references = Some(vec![scope.aso_owner()]);

        if let (Some(tags), true) = (spec.tags(), managed) {
            reconcile_tags(tags, existing.as_ref(), &mut desired)
                .map_err(|e| e.wrap("failed to reconcile tags"))?;
        }

        if let Some(existing) = &existing {
            if !differs(existing, &desired) {
                return match ready_err {
                    Some(err) => Err(err),
                    None => {
                        debug!(%name, "resource up to date");
                        Ok(Some(existing.clone()))
                    }
                };
            }
        }

        let verb = if existing.is_some() { "update" } else { "create" };
        info!(%name, verb, "applying child resource");
        self.client
            .apply(&ar, &apply_object(&ar, &desired))
            .await
            .map_err(|e| {
                e.wrap(format!(
                    "failed to {verb} resource {namespace}/{name} (service: {service_name})"
                ))
            })?;

        Err(Error::operation_not_done(
            aso_future(FutureType::AsoCreateOrUpdate, service_name, &name, &namespace),
            requeue_after,
        ))
    }

    /// Delete the child described by `reference` if the cluster owns it
    ///
    /// Deletion is finished by the operator, so a delete that was issued
    /// returns an operation-not-done error until the child is gone.
    #[instrument(skip_all, fields(service = %service_name))]
    pub async fn delete_resource<Sc>(
        &self,
        scope: &Sc,
        ar: &ApiResource,
        reference: &DynamicObject,
        service_name: &str,
    ) -> Result<()>
    where
        Sc: AsoScope + ?Sized,
    {
        let (name, namespace) = child_key(scope, reference);
        let existing = self.client.get(ar, &namespace, &name).await.map_err(|e| {
            e.wrap(format!(
                "failed to get existing resource {namespace}/{name} (service: {service_name})"
            ))
        })?;
        let Some(existing) = existing else {
            debug!(%name, "resource already deleted");
            return Ok(());
        };
        if !owned_by_cluster(&existing, scope.cluster_name()) {
            info!(%name, "skipping delete of resource not owned by the cluster");
            return Ok(());
        }

        info!(%name, "deleting child resource");
        self.client
            .delete(ar, &namespace, &name)
            .await
            .map_err(|e| {
                e.wrap(format!(
                    "failed to delete resource {namespace}/{name} (service: {service_name})"
                ))
            })?;

        Err(Error::operation_not_done(
            aso_future(FutureType::AsoDelete, service_name, &name, &namespace),
            scope.default_requeue_after(),
        ))
    }

    /// Stop the operator from converging the child without deleting it
    #[instrument(skip_all, fields(service = %service_name))]
    pub async fn pause_resource<Sc>(
        &self,
        scope: &Sc,
        ar: &ApiResource,
        reference: &DynamicObject,
        service_name: &str,
    ) -> Result<()>
    where
        Sc: AsoScope + ?Sized,
    {
        let (name, namespace) = child_key(scope, reference);
        let Some(existing) = self.client.get(ar, &namespace, &name).await? else {
            return Ok(());
        };
        if !owned_by_cluster(&existing, scope.cluster_name()) {
            debug!(%name, "skipping pause of resource not owned by the cluster");
            return Ok(());
        }
        if reconcile_policy(&existing) == Some(RECONCILE_POLICY_SKIP) {
            return Ok(());
        }

        info!(%name, "setting reconcile-policy to skip");
        let annotations = BTreeMap::from([(
            RECONCILE_POLICY_ANNOTATION.to_string(),
            RECONCILE_POLICY_SKIP.to_string(),
        )]);
        self.client
            .patch_annotations(ar, &namespace, &name, annotations)
            .await
    }
}

/// Name and namespace of a child, defaulting the namespace to the scope's
fn child_key<Sc: AsoScope + ?Sized>(scope: &Sc, reference: &DynamicObject) -> (String, String) {
    let namespace = reference
        .metadata
        .namespace
        .clone()
        .unwrap_or_else(|| scope.namespace().to_string());
    (reference.name_any(), namespace)
}

fn aso_future(type_: FutureType, service_name: &str, name: &str, namespace: &str) -> Future {
    Future {
        type_,
        service_name: service_name.to_string(),
        name: name.to_string(),
        resource_group: namespace.to_string(),
        data: String::new(),
    }
}

/// Whether any field capz owns differs between the existing and desired child
fn differs(existing: &DynamicObject, desired: &DynamicObject) -> bool {
    existing.labels() != desired.labels()
        || existing.annotations() != desired.annotations()
        || existing.owner_references() != desired.owner_references()
        || existing.data.get("spec") != desired.data.get("spec")
}

/// The fields capz applies, without server-populated metadata or status
fn apply_object(ar: &ApiResource, desired: &DynamicObject) -> DynamicObject {
    DynamicObject {
        types: Some(TypeMeta {
            api_version: ar.api_version.clone(),
            kind: ar.kind.clone(),
        }),
        metadata: ObjectMeta {
            name: desired.metadata.name.clone(),
            namespace: desired.metadata.namespace.clone(),
            labels: desired.metadata.labels.clone(),
            annotations: desired.metadata.annotations.clone(),
            owner_references: desired.metadata.owner_references.clone(),
            ..Default::default()
        },
        data: json!({ "spec": desired.data.get("spec").cloned().unwrap_or_else(|| json!({})) }),
    }
}

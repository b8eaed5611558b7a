//! Services: one per resource kind, fanned out over that kind's specs
//!
//! A service reconciles every spec independently, keeps the most pressing
//! error (anything other than operation-not-done wins over
//! operation-not-done, which wins over success), lets hooks adjust the
//! outcome and records it as the service's condition on the owner.

use std::sync::Arc;

use async_trait::async_trait;
use kube::api::{ApiResource, DynamicObject};
use kube::ResourceExt;
use tracing::{debug, info, warn};

use capz_common::metrics::ServiceTimer;
use capz_common::{Error, Result, OWNED_BY_CLUSTER_LABEL};

use crate::aso::{AsoReconciler, AsoResourceSpec};
use crate::async_reconciler::Reconciler;
use crate::scope::{AsoScope, AsyncReconcileScope, ConditionScope};
use crate::spec::ResourceSpec;

/// A service the cluster and machine controllers drive
#[async_trait]
pub trait ServiceReconciler: Send + Sync {
    /// Service name, used in Futures, logs and metrics
    fn name(&self) -> &str;

    /// Create or update every resource of the service
    async fn reconcile(&self) -> Result<()>;

    /// Delete every resource of the service
    async fn delete(&self) -> Result<()>;
}

/// A service whose resources can be detached from their operator
#[async_trait]
pub trait Pauser: Send + Sync {
    /// Stop converging every resource of the service without deleting it
    async fn pause(&self) -> Result<()>;
}

/// Per-service adjustments to reconcile and delete outcomes
///
/// Every hook receives the outcome so far and returns the outcome to keep.
pub trait ServiceHooks<Sc: ?Sized, R>: Send + Sync {
    /// Runs after each spec's create or update
    fn post_create_or_update(&self, _scope: &Sc, result: Result<Option<R>>) -> Result<()> {
        result.map(|_| ())
    }

    /// Runs once after all specs were reconciled, even when there are none
    fn post_reconcile(&self, _scope: &Sc, result: Result<()>) -> Result<()> {
        result
    }

    /// Runs once after all specs were deleted
    fn post_delete(&self, _scope: &Sc, result: Result<()>) -> Result<()> {
        result
    }
}

/// Hooks that keep every outcome as it is
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl<Sc: ?Sized, R> ServiceHooks<Sc, R> for NoHooks {}

/// Keep the more pressing of two errors
fn keep_most_pressing(current: Option<Error>, next: Error) -> Option<Error> {
    match current {
        Some(current) if next.is_operation_not_done() => Some(current),
        _ => Some(next),
    }
}

/// Run `work` within the service reconcile timeout
async fn within<F>(service: &str, budget: std::time::Duration, work: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    match tokio::time::timeout(budget, work).await {
        Ok(result) => result,
        Err(_) => {
            warn!(service, ?budget, "service pass timed out");
            Err(Error::timeout(format!("service {service}"), budget))
        }
    }
}

// =============================================================================
// Async services
// =============================================================================

/// Service over resources managed directly through ARM
pub struct AsyncService<S: ResourceSpec, Sc: ?Sized> {
    name: String,
    condition_type: String,
    scope: Arc<Sc>,
    reconciler: Arc<dyn Reconciler<S, Sc>>,
    specs: Vec<S>,
    hooks: Arc<dyn ServiceHooks<Sc, S::Resource>>,
}

impl<S, Sc> AsyncService<S, Sc>
where
    S: ResourceSpec + 'static,
    Sc: AsyncReconcileScope + ConditionScope + ?Sized + 'static,
{
    /// Create a service reporting on `condition_type`
    pub fn new(
        name: impl Into<String>,
        condition_type: impl Into<String>,
        scope: Arc<Sc>,
        reconciler: Arc<dyn Reconciler<S, Sc>>,
        specs: Vec<S>,
    ) -> Self {
        Self {
            name: name.into(),
            condition_type: condition_type.into(),
            scope,
            reconciler,
            specs,
            hooks: Arc::new(NoHooks),
        }
    }

    /// Replace the default hooks
    pub fn with_hooks(mut self, hooks: impl ServiceHooks<Sc, S::Resource> + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Specs the service reconciles
    pub fn specs(&self) -> &[S] {
        &self.specs
    }

    async fn create_or_update_all(&self) -> Result<()> {
        let scope = self.scope.as_ref();
        let mut most_pressing = None;
        for spec in &self.specs {
            let result = self
                .reconciler
                .create_or_update_resource(scope, spec, &self.name)
                .await;
            if let Err(err) = self.hooks.post_create_or_update(scope, result) {
                debug!(service = %self.name, resource = %spec.resource_name(), error = %err, "resource not reconciled");
                most_pressing = keep_most_pressing(most_pressing, err);
            }
        }
        most_pressing.map_or(Ok(()), Err)
    }

    async fn delete_all(&self) -> Result<()> {
        let scope = self.scope.as_ref();
        let mut most_pressing = None;
        for spec in &self.specs {
            if let Err(err) = self
                .reconciler
                .delete_resource(scope, spec, &self.name)
                .await
            {
                debug!(service = %self.name, resource = %spec.resource_name(), error = %err, "resource not deleted");
                most_pressing = keep_most_pressing(most_pressing, err);
            }
        }
        most_pressing.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl<S, Sc> ServiceReconciler for AsyncService<S, Sc>
where
    S: ResourceSpec + 'static,
    Sc: AsyncReconcileScope + ConditionScope + ?Sized + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn reconcile(&self) -> Result<()> {
        let timer = ServiceTimer::start(&self.name, "reconcile");
        let scope = self.scope.as_ref();
        let result = within(
            &self.name,
            scope.default_service_reconcile_timeout(),
            self.create_or_update_all(),
        )
        .await;
        let result = self.hooks.post_reconcile(scope, result);
        scope.update_put_status(&self.condition_type, &self.name, result.as_ref().err());
        timer.finish(result.as_ref().err());
        result
    }

    async fn delete(&self) -> Result<()> {
        if self.specs.is_empty() {
            return Ok(());
        }
        let timer = ServiceTimer::start(&self.name, "delete");
        let scope = self.scope.as_ref();
        let result = within(
            &self.name,
            scope.default_service_reconcile_timeout(),
            self.delete_all(),
        )
        .await;
        let result = self.hooks.post_delete(scope, result);
        scope.update_delete_status(&self.condition_type, &self.name, result.as_ref().err());
        timer.finish(result.as_ref().err());
        result
    }
}

// =============================================================================
// Declarative services
// =============================================================================

/// Service over child resources reconciled by Azure Service Operator
pub struct AsoService<S: AsoResourceSpec, Sc: ?Sized> {
    name: String,
    condition_type: String,
    scope: Arc<Sc>,
    reconciler: AsoReconciler,
    specs: Vec<S>,
    hooks: Arc<dyn ServiceHooks<Sc, DynamicObject>>,
    stale_kind: Option<ApiResource>,
}

impl<S, Sc> AsoService<S, Sc>
where
    S: AsoResourceSpec + 'static,
    Sc: AsoScope + ConditionScope + ?Sized + 'static,
{
    /// Create a service reporting on `condition_type`
    pub fn new(
        name: impl Into<String>,
        condition_type: impl Into<String>,
        scope: Arc<Sc>,
        reconciler: AsoReconciler,
        specs: Vec<S>,
    ) -> Self {
        Self {
            name: name.into(),
            condition_type: condition_type.into(),
            scope,
            reconciler,
            specs,
            hooks: Arc::new(NoHooks),
            stale_kind: None,
        }
    }

    /// Replace the default hooks
    pub fn with_hooks(mut self, hooks: impl ServiceHooks<Sc, DynamicObject> + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Delete children of `kind` owned by the cluster that no spec names
    pub fn with_stale_sweep(mut self, kind: ApiResource) -> Self {
        self.stale_kind = Some(kind);
        self
    }

    /// Specs the service reconciles
    pub fn specs(&self) -> &[S] {
        &self.specs
    }

    /// Delete owned children no spec describes any more
    async fn delete_stale(&self, ar: &ApiResource) -> Result<()> {
        let scope = self.scope.as_ref();
        let selector = format!("{OWNED_BY_CLUSTER_LABEL}={}", scope.cluster_name());
        let wanted: Vec<String> = self.specs.iter().map(|s| s.resource_ref().name_any()).collect();
        let children = self
            .reconciler
            .client()
            .list(ar, scope.namespace(), &selector)
            .await
            .map_err(|e| e.wrap(format!("failed to list {} resources", ar.kind)))?;

        let mut most_pressing = None;
        for child in children.iter().filter(|c| !wanted.contains(&c.name_any())) {
            info!(service = %self.name, name = %child.name_any(), "deleting stale resource");
            if let Err(err) = self
                .reconciler
                .delete_resource(scope, ar, child, &self.name)
                .await
            {
                most_pressing = keep_most_pressing(most_pressing, err);
            }
        }
        most_pressing.map_or(Ok(()), Err)
    }

    async fn create_or_update_all(&self) -> Result<()> {
        let scope = self.scope.as_ref();
        let mut most_pressing = None;
        if let Some(ar) = &self.stale_kind {
            if let Err(err) = self.delete_stale(ar).await {
                most_pressing = keep_most_pressing(most_pressing, err);
            }
        }
        for spec in &self.specs {
            let result = self
                .reconciler
                .create_or_update_resource(scope, spec, &self.name)
                .await;
            if let Err(err) = self.hooks.post_create_or_update(scope, result) {
                debug!(service = %self.name, error = %err, "resource not reconciled");
                most_pressing = keep_most_pressing(most_pressing, err);
            }
        }
        most_pressing.map_or(Ok(()), Err)
    }

    async fn delete_all(&self) -> Result<()> {
        let scope = self.scope.as_ref();
        let mut most_pressing = None;
        for spec in &self.specs {
            if let Err(err) = self
                .reconciler
                .delete_resource(scope, &spec.api_resource(), &spec.resource_ref(), &self.name)
                .await
            {
                debug!(service = %self.name, error = %err, "resource not deleted");
                most_pressing = keep_most_pressing(most_pressing, err);
            }
        }
        most_pressing.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl<S, Sc> ServiceReconciler for AsoService<S, Sc>
where
    S: AsoResourceSpec + 'static,
    Sc: AsoScope + ConditionScope + ?Sized + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn reconcile(&self) -> Result<()> {
        let timer = ServiceTimer::start(&self.name, "reconcile");
        let scope = self.scope.as_ref();
        let result = within(
            &self.name,
            scope.default_service_reconcile_timeout(),
            self.create_or_update_all(),
        )
        .await;
        let result = self.hooks.post_reconcile(scope, result);
        scope.update_put_status(&self.condition_type, &self.name, result.as_ref().err());
        timer.finish(result.as_ref().err());
        result
    }

    async fn delete(&self) -> Result<()> {
        if self.specs.is_empty() {
            return Ok(());
        }
        let timer = ServiceTimer::start(&self.name, "delete");
        let scope = self.scope.as_ref();
        let result = within(
            &self.name,
            scope.default_service_reconcile_timeout(),
            self.delete_all(),
        )
        .await;
        let result = self.hooks.post_delete(scope, result);
        scope.update_delete_status(&self.condition_type, &self.name, result.as_ref().err());
        timer.finish(result.as_ref().err());
        result
    }
}

#[async_trait]
impl<S, Sc> Pauser for AsoService<S, Sc>
where
    S: AsoResourceSpec + 'static,
    Sc: AsoScope + ConditionScope + ?Sized + 'static,
{
    async fn pause(&self) -> Result<()> {
        let timer = ServiceTimer::start(&self.name, "pause");
        let scope = self.scope.as_ref();
        let mut first_err = None;
        for spec in &self.specs {
            let reference = spec.resource_ref();
            if let Err(err) = self
                .reconciler
                .pause_resource(scope, &spec.api_resource(), &reference, &self.name)
                .await
            {
                let err = err.wrap(format!(
                    "failed to pause resource {}/{}",
                    reference.namespace().unwrap_or_default(),
                    reference.name_any()
                ));
                warn!(service = %self.name, error = %err, "pause failed");
                first_err.get_or_insert(err);
            }
        }
        let result = first_err.map_or(Ok(()), Err);
        timer.finish(result.as_ref().err());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeScope, TestSpec};
    use capz_common::crd::{ConditionSeverity, ConditionStatus, Future, FutureType};
    use serde_json::Value;
    use std::collections::HashMap;
    use std::time::Duration;

    const SERVICE: &str = "group";
    const CONDITION: &str = "ResourceGroupReady";

    fn pending(name: &str) -> Error {
        Error::operation_not_done(
            Future {
                type_: FutureType::Create,
                service_name: SERVICE.to_string(),
                name: name.to_string(),
                resource_group: "rg1".to_string(),
                data: String::new(),
            },
            Duration::from_secs(20),
        )
    }

    /// Reconciler answering per resource name
    #[derive(Default)]
    struct ScriptedReconciler {
        outcomes: HashMap<String, fn(&str) -> Result<()>>,
        delay: Option<Duration>,
    }

    impl ScriptedReconciler {
        fn with(mut self, name: &str, outcome: fn(&str) -> Result<()>) -> Self {
            self.outcomes.insert(name.to_string(), outcome);
            self
        }

        async fn outcome(&self, name: &str) -> Result<()> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.outcomes.get(name).map_or(Ok(()), |f| f(name))
        }
    }

    #[async_trait]
    impl Reconciler<TestSpec, FakeScope> for ScriptedReconciler {
        async fn create_or_update_resource(
            &self,
            _scope: &FakeScope,
            spec: &TestSpec,
            _service_name: &str,
        ) -> Result<Option<Value>> {
            self.outcome(&spec.name).await.map(|_| Some(spec.desired.clone()))
        }

        async fn delete_resource(
            &self,
            _scope: &FakeScope,
            spec: &TestSpec,
            _service_name: &str,
        ) -> Result<()> {
            self.outcome(&spec.name).await
        }
    }

    fn service(
        scope: Arc<FakeScope>,
        reconciler: ScriptedReconciler,
        names: &[&str],
    ) -> AsyncService<TestSpec, FakeScope> {
        AsyncService::new(
            SERVICE,
            CONDITION,
            scope,
            Arc::new(reconciler),
            names.iter().map(|n| TestSpec::new(n)).collect(),
        )
    }

    // =========================================================================
    // Story Tests: Aggregating spec outcomes
    // =========================================================================

    /// Story: a real failure outranks an operation still in progress,
    /// whichever spec reported first
    #[tokio::test]
    async fn story_failure_outranks_in_progress() {
        let reconciler = ScriptedReconciler::default()
            .with("a", |_| Err(Error::terminal("Failed", "quota exceeded")))
            .with("b", |n| Err(pending(n)));
        let scope = Arc::new(FakeScope::default());

        let err = service(scope.clone(), reconciler, &["a", "b"])
            .reconcile()
            .await
            .unwrap_err();

        assert!(err.is_terminal());
        let condition = scope.condition(CONDITION).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.severity, Some(ConditionSeverity::Error));
    }

    /// Story: with only in-progress work the service reports Creating
    #[tokio::test]
    async fn story_in_progress_reports_creating() {
        let reconciler = ScriptedReconciler::default().with("b", |n| Err(pending(n)));
        let scope = Arc::new(FakeScope::default());

        let err = service(scope.clone(), reconciler, &["a", "b"])
            .reconcile()
            .await
            .unwrap_err();

        assert!(err.is_operation_not_done());
        let condition = scope.condition(CONDITION).unwrap();
        assert_eq!(condition.reason, "Creating");
        assert_eq!(condition.severity, Some(ConditionSeverity::Info));
    }

    #[tokio::test]
    async fn test_all_succeed_marks_condition_true() {
        let scope = Arc::new(FakeScope::default());
        service(scope.clone(), ScriptedReconciler::default(), &["a", "b"])
            .reconcile()
            .await
            .unwrap();
        assert!(scope.condition(CONDITION).unwrap().is_true());
    }

    #[tokio::test]
    async fn test_later_failure_replaces_earlier_failure() {
        let reconciler = ScriptedReconciler::default()
            .with("a", |_| Err(Error::transient("busy", Duration::from_secs(5))))
            .with("b", |_| Err(Error::terminal("Conflict", "name taken")));
        let err = service(Arc::new(FakeScope::default()), reconciler, &["a", "b"])
            .reconcile()
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "Conflict");
    }

    // =========================================================================
    // Story Tests: Hooks and timeouts
    // =========================================================================

    struct ClearOnEmpty;

    impl ServiceHooks<FakeScope, Value> for ClearOnEmpty {
        fn post_create_or_update(&self, _scope: &FakeScope, result: Result<Option<Value>>) -> Result<()> {
            match result {
                Err(e) if e.is_not_found() => Ok(()),
                other => other.map(|_| ()),
            }
        }

        fn post_reconcile(&self, scope: &FakeScope, result: Result<()>) -> Result<()> {
            scope.status.lock().delete_condition("Marker");
            result
        }
    }

    /// Story: the post-reconcile hook runs even without specs
    #[tokio::test]
    async fn story_post_reconcile_runs_without_specs() {
        let scope = Arc::new(FakeScope::default());
        scope.update_put_status("Marker", "other", None);

        service(scope.clone(), ScriptedReconciler::default(), &[])
            .with_hooks(ClearOnEmpty)
            .reconcile()
            .await
            .unwrap();

        assert!(scope.condition("Marker").is_none());
        assert!(scope.condition(CONDITION).unwrap().is_true());
    }

    #[tokio::test]
    async fn test_post_create_hook_can_swallow_errors() {
        let reconciler = ScriptedReconciler::default()
            .with("a", |n| Err(Error::not_found("ResourceGroup", n)));
        service(Arc::new(FakeScope::default()), reconciler, &["a"])
            .with_hooks(ClearOnEmpty)
            .reconcile()
            .await
            .unwrap();
    }

    /// Story: a slow service is cut off and reported as transient
    #[tokio::test(start_paused = true)]
    async fn story_service_timeout_is_transient() {
        let reconciler = ScriptedReconciler {
            delay: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let scope = Arc::new(FakeScope::default());

        let err = service(scope.clone(), reconciler, &["a"])
            .reconcile()
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert!(!err.is_operation_not_done());
        assert_eq!(
            scope.condition(CONDITION).unwrap().severity,
            Some(ConditionSeverity::Warning)
        );
    }

    // =========================================================================
    // Story Tests: Delete
    // =========================================================================

    #[tokio::test]
    async fn test_delete_without_specs_records_nothing() {
        let scope = Arc::new(FakeScope::default());
        service(scope.clone(), ScriptedReconciler::default(), &[])
            .delete()
            .await
            .unwrap();
        assert!(scope.condition(CONDITION).is_none());
    }

    #[tokio::test]
    async fn test_delete_marks_condition_deleted() {
        let scope = Arc::new(FakeScope::default());
        service(scope.clone(), ScriptedReconciler::default(), &["a"])
            .delete()
            .await
            .unwrap();
        let condition = scope.condition(CONDITION).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, "Deleted");
    }
}

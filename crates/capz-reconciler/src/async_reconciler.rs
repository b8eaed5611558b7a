//! Reconciler for resources managed directly through ARM
//!
//! Writes are long-running operations. The reconciler polls for at most the
//! scope's call timeout; an operation still running after that is stored as
//! a [`Future`] on the owner and the caller gets an operation-not-done
//! error. The next pass picks the stored operation up again instead of
//! issuing a new write, so a resource never has more than one write in
//! flight from this engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, instrument};

use capz_azure::future::{future_from_poller, poller_from_future};
use capz_azure::lro::{HttpMethod, PollerState};
use capz_azure::ArmClient;
use capz_common::crd::{Future, FutureType};
use capz_common::error::DEFAULT_TERMINAL_REASON;
use capz_common::metrics::{record_azure_operation, record_lro_poll};
use capz_common::{Error, Result};

use crate::scope::AsyncReconcileScope;
use crate::spec::{ResourceRef, ResourceSpec, UpdateMethod};

/// Creates, updates and deletes a single resource described by a spec
///
/// Services depend on this trait rather than on [`AsyncReconciler`] so
/// their aggregation can be tested without ARM.
#[async_trait]
pub trait Reconciler<S: ResourceSpec, Sc: ?Sized>: Send + Sync {
    /// Bring the resource to the state the spec describes
    async fn create_or_update_resource(
        &self,
        scope: &Sc,
        spec: &S,
        service_name: &str,
    ) -> Result<Option<S::Resource>>;

    /// Delete the resource if the cluster manages it
    async fn delete_resource(&self, scope: &Sc, spec: &S, service_name: &str) -> Result<()>;
}

/// Outcome of polling within the call timeout
enum Polled {
    Done,
    Pending(PollerState),
}

/// [`Reconciler`] backed by an [`ArmClient`]
#[derive(Clone)]
pub struct AsyncReconciler {
    client: Arc<dyn ArmClient>,
}

impl AsyncReconciler {
    /// Create a reconciler issuing calls through `client`
    pub fn new(client: Arc<dyn ArmClient>) -> Self {
        Self { client }
    }

    /// Create or update the resource described by `spec`
    ///
    /// Returns the resource as it exists afterwards, or an
    /// operation-not-done error carrying the stored [`Future`] while the
    /// write is still running.
    #[instrument(skip_all, fields(service = %service_name, resource = %spec.resource_name()))]
    pub async fn create_or_update_resource<S, Sc>(
        &self,
        scope: &Sc,
        spec: &S,
        service_name: &str,
    ) -> Result<Option<S::Resource>>
    where
        S: ResourceSpec,
        Sc: AsyncReconcileScope + ?Sized,
    {
        let name = spec.resource_name();
        let rg = spec.resource_group_name();
        let rref = spec.resource_ref();

        // An in-flight write is resumed; no new write is issued this pass.
        if let Some(future) =
            scope.get_long_running_operation_state(name, service_name, FutureType::PUT_TYPES)
        {
            let verb = if future.type_ == FutureType::Create { "create" } else { "update" };
            self.resume(scope, service_name, &future)
                .await
                .map_err(|e| wrap_unless_pending(e, verb, rg, name, service_name))?;
            info!(verb, "resumed operation finished");

            let refreshed = self
                .get_existing::<S::Resource>(&rref, service_name)
                .await
                .map_err(|e| get_error(e, rg, name, service_name))?;
            return match refreshed {
                Some(existing) => match spec
                    .parameters(Some(&existing))
                    .map_err(|e| parameters_error(e, rg, name, service_name))?
                {
                    None => Ok(Some(existing)),
                    Some(_) => Err(Error::transient(
                        format!(
                            "resource {rg}/{name} still differs from its desired state (service: {service_name})"
                        ),
                        scope.default_requeue_after(),
                    )),
                },
                None => Err(Error::transient(
                    format!("resource {rg}/{name} not found after {verb} finished (service: {service_name})"),
                    scope.default_requeue_after(),
                )),
            };
        }

        let existing = self
            .get_existing::<S::Resource>(&rref, service_name)
            .await
            .map_err(|e| get_error(e, rg, name, service_name))?;
        if existing.is_some() {
            debug!("got existing resource");
        }

        let parameters = spec
            .parameters(existing.as_ref())
            .map_err(|e| parameters_error(e, rg, name, service_name))?;
        let Some(parameters) = parameters else {
            return match existing {
                Some(existing) => {
                    debug!("resource up to date");
                    Ok(Some(existing))
                }
                None => Err(Error::terminal(
                    DEFAULT_TERMINAL_REASON,
                    format!(
                        "parameters for resource {rg}/{name} cannot be empty when the resource does not exist (service: {service_name})"
                    ),
                )),
            };
        };

        let (verb, future_type, method) = match (&existing, spec.update_method()) {
            (None, _) => ("create", FutureType::Create, HttpMethod::Put),
            (Some(_), UpdateMethod::Put) => ("update", FutureType::Update, HttpMethod::Put),
            (Some(_), UpdateMethod::Patch) => ("update", FutureType::Patch, HttpMethod::Patch),
        };
        let body = serde_json::to_value(&parameters)?;
        info!(verb, "writing resource");

        let call_timeout = scope.default_azure_call_timeout();
        let begin = async {
            match method {
                HttpMethod::Patch => {
                    self.client
                        .begin_patch(&rref.id, rref.api_version, body)
                        .await
                }
                _ => self.client.begin_put(&rref.id, rref.api_version, body).await,
            }
        };
        let poller = match timeout_at(Instant::now() + call_timeout, begin).await {
            Ok(Ok(poller)) => poller,
            Ok(Err(e)) => {
                record_azure_operation(service_name, method_label(method), "error");
                return Err(write_error(e, verb, rg, name, service_name));
            }
            Err(_) => {
                return Err(write_error(
                    Error::timeout(format!("{verb} of {rg}/{name}"), call_timeout),
                    verb,
                    rg,
                    name,
                    service_name,
                ))
            }
        };

        // Stored before polling so a cancelled pass leaves it resumable.
        scope.set_long_running_operation_state(future_from_poller(
            &poller,
            future_type,
            service_name,
            name,
            rg,
        )?);
        self.wait(scope, service_name, future_type, name, rg, poller, false)
            .await
            .map_err(|e| wrap_unless_pending(e, verb, rg, name, service_name))?;
        info!(verb, "operation finished");

        self.get_existing::<S::Resource>(&rref, service_name)
            .await
            .map_err(|e| get_error(e, rg, name, service_name))
    }

    /// Delete the resource described by `spec`
    ///
    /// A resource that does not exist, or that the cluster does not manage,
    /// is left alone and reported as deleted.
    #[instrument(skip_all, fields(service = %service_name, resource = %spec.resource_name()))]
    pub async fn delete_resource<S, Sc>(&self, scope: &Sc, spec: &S, service_name: &str) -> Result<()>
    where
        S: ResourceSpec,
        Sc: AsyncReconcileScope + ?Sized,
    {
        let name = spec.resource_name();
        let rg = spec.resource_group_name();
        let rref = spec.resource_ref();

        if let Some(future) =
            scope.get_long_running_operation_state(name, service_name, FutureType::DELETE_TYPES)
        {
            return match self.resume(scope, service_name, &future).await {
                Ok(()) => {
                    info!("resumed delete finished");
                    Ok(())
                }
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(wrap_unless_pending(e, "delete", rg, name, service_name)),
            };
        }

        let existing = match self.get_existing::<S::Resource>(&rref, service_name).await {
            Ok(Some(existing)) => existing,
            Ok(None) => {
                debug!("resource already deleted");
                return Ok(());
            }
            Err(e) => return Err(get_error(e, rg, name, service_name)),
        };
        if !spec.is_managed(&existing) {
            info!("skipping delete of resource not managed by the cluster");
            return Ok(());
        }

        info!("deleting resource");
        let call_timeout = scope.default_azure_call_timeout();
        let begin = self.client.begin_delete(&rref.id, rref.api_version);
        let poller = match timeout_at(Instant::now() + call_timeout, begin).await {
            Ok(Ok(poller)) => poller,
            Ok(Err(e)) if e.is_not_found() => return Ok(()),
            Ok(Err(e)) => {
                record_azure_operation(service_name, "delete", "error");
                return Err(write_error(e, "delete", rg, name, service_name));
            }
            Err(_) => {
                return Err(write_error(
                    Error::timeout(format!("delete of {rg}/{name}"), call_timeout),
                    "delete",
                    rg,
                    name,
                    service_name,
                ))
            }
        };

        scope.set_long_running_operation_state(future_from_poller(
            &poller,
            FutureType::Delete,
            service_name,
            name,
            rg,
        )?);
        match self
            .wait(scope, service_name, FutureType::Delete, name, rg, poller, false)
            .await
        {
            Ok(()) => {
                info!("resource deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(wrap_unless_pending(e, "delete", rg, name, service_name)),
        }
    }

    // =========================================================================
    // Polling
    // =========================================================================

    /// Continue polling a stored operation
    async fn resume<Sc>(&self, scope: &Sc, service_name: &str, future: &Future) -> Result<()>
    where
        Sc: AsyncReconcileScope + ?Sized,
    {
        let poller = match poller_from_future(future) {
            Ok(poller) => poller,
            Err(e) => {
                scope.delete_long_running_operation_state(&future.name, service_name);
                return Err(e.wrap("could not decode future data, resetting long-running operation state"));
            }
        };
        debug!(future_type = %future.type_, "resuming long-running operation");
        self.wait(
            scope,
            service_name,
            future.type_,
            &future.name,
            &future.resource_group,
            poller,
            true,
        )
        .await
    }

    /// Poll within the call timeout and keep the stored Future in step
    ///
    /// Finished operations (successful or not) clear the Future; pending
    /// ones replace it with the latest poller state.
    #[allow(clippy::too_many_arguments)]
    async fn wait<Sc>(
        &self,
        scope: &Sc,
        service_name: &str,
        future_type: FutureType,
        name: &str,
        resource_group: &str,
        poller: PollerState,
        poll_now: bool,
    ) -> Result<()>
    where
        Sc: AsyncReconcileScope + ?Sized,
    {
        let outcome = self
            .poll_until_done(
                service_name,
                poller,
                scope.default_azure_call_timeout(),
                scope.default_poll_interval(),
                poll_now,
            )
            .await;
        match outcome {
            Ok(Polled::Done) => {
                scope.delete_long_running_operation_state(name, service_name);
                Ok(())
            }
            Ok(Polled::Pending(poller)) => {
                let future =
                    future_from_poller(&poller, future_type, service_name, name, resource_group)?;
                scope.set_long_running_operation_state(future.clone());
                debug!("operation still in progress");
                Err(Error::operation_not_done(future, scope.default_requeue_after()))
            }
            Err(e) => {
                scope.delete_long_running_operation_state(name, service_name);
                Err(e)
            }
        }
    }

    async fn poll_until_done(
        &self,
        service_name: &str,
        mut poller: PollerState,
        budget: Duration,
        interval: Duration,
        poll_now: bool,
    ) -> Result<Polled> {
        let started = Instant::now();
        let deadline = started + budget;
        let mut skip_wait = poll_now;

        let outcome = loop {
            if poller.is_done() {
                break Ok(Polled::Done);
            }
            if !skip_wait {
                let remaining = deadline.saturating_duration_since(Instant::now());
                tokio::time::sleep(poller.retry_after().unwrap_or(interval).min(remaining)).await;
            }
            skip_wait = false;
            if Instant::now() >= deadline {
                break Ok(Polled::Pending(poller));
            }
            match timeout_at(deadline, self.client.poll(poller.clone())).await {
                Ok(Ok(next)) => {
                    record_azure_operation(service_name, "poll", "success");
                    poller = next;
                }
                Ok(Err(e)) => {
                    record_azure_operation(service_name, "poll", "error");
                    break Err(e);
                }
                Err(_) => break Ok(Polled::Pending(poller)),
            }
        };

        record_lro_poll(
            service_name,
            started.elapsed(),
            matches!(outcome, Ok(Polled::Done)),
        );
        outcome
    }

    async fn get_existing<R: DeserializeOwned>(
        &self,
        rref: &ResourceRef,
        service_name: &str,
    ) -> Result<Option<R>> {
        match self.client.get(&rref.id, rref.api_version).await {
            Ok(value) => {
                record_azure_operation(service_name, "get", "success");
                let resource = serde_json::from_value(value)
                    .map_err(|e| Error::serialization_for_kind(service_name, e.to_string()))?;
                Ok(Some(resource))
            }
            Err(e) if e.is_not_found() => {
                record_azure_operation(service_name, "get", "not_found");
                Ok(None)
            }
            Err(e) => {
                record_azure_operation(service_name, "get", "error");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl<S, Sc> Reconciler<S, Sc> for AsyncReconciler
where
    S: ResourceSpec,
    Sc: AsyncReconcileScope + ?Sized,
{
    async fn create_or_update_resource(
        &self,
        scope: &Sc,
        spec: &S,
        service_name: &str,
    ) -> Result<Option<S::Resource>> {
        AsyncReconciler::create_or_update_resource(self, scope, spec, service_name).await
    }

    async fn delete_resource(&self, scope: &Sc, spec: &S, service_name: &str) -> Result<()> {
        AsyncReconciler::delete_resource(self, scope, spec, service_name).await
    }
}

fn method_label(method: HttpMethod) -> &'static str {
    match method {
        HttpMethod::Put => "put",
        HttpMethod::Patch => "patch",
        HttpMethod::Delete => "delete",
    }
}

fn get_error(e: Error, rg: &str, name: &str, service_name: &str) -> Error {
    e.wrap(format!(
        "failed to get existing resource {rg}/{name} (service: {service_name})"
    ))
}

fn parameters_error(e: Error, rg: &str, name: &str, service_name: &str) -> Error {
    e.wrap(format!(
        "failed to get desired parameters for resource {rg}/{name} (service: {service_name})"
    ))
}

fn write_error(e: Error, verb: &str, rg: &str, name: &str, service_name: &str) -> Error {
    e.wrap(format!(
        "failed to {verb} resource {rg}/{name} (service: {service_name})"
    ))
}

fn wrap_unless_pending(e: Error, verb: &str, rg: &str, name: &str, service_name: &str) -> Error {
    if e.is_operation_not_done() {
        e
    } else {
        write_error(e, verb, rg, name, service_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{not_found, poller, FakeScope, MockArm, TestSpec};
    use capz_azure::future::future_from_poller;
    use capz_azure::lro::OperationStatus;
    use capz_common::AzureError;
    use serde_json::{json, Value};

    const SERVICE: &str = "group";

    fn reconciler(mock: MockArm) -> AsyncReconciler {
        AsyncReconciler::new(Arc::new(mock))
    }

    fn stored_future(type_: FutureType, method: HttpMethod) -> Future {
        future_from_poller(
            &poller(method, OperationStatus::InProgress),
            type_,
            SERVICE,
            "rg1",
            "rg1",
        )
        .unwrap()
    }

    // =========================================================================
    // Story Tests: Create and update
    // =========================================================================

    mod create_or_update {
        use super::*;

        /// Story: a new resource whose PUT outlives the call timeout is
        /// stored as a Create future and reported as not done
        #[tokio::test(start_paused = true)]
        async fn story_create_outlives_call_timeout() {
            let mut mock = MockArm::new();
            mock.expect_get().times(1).returning(|_, _| Err(not_found()));
            mock.expect_begin_put()
                .times(1)
                .returning(|_, _, _| Ok(poller(HttpMethod::Put, OperationStatus::InProgress)));
            mock.expect_poll().returning(Ok);

            let scope = FakeScope::default();
            let err = reconciler(mock)
                .create_or_update_resource(&scope, &TestSpec::new("rg1"), SERVICE)
                .await
                .unwrap_err();

            assert!(err.is_operation_not_done());
            assert_eq!(err.requeue_after(), Some(capz_common::DEFAULT_REQUEUE_AFTER));
            let future = scope.future(SERVICE, "rg1").expect("future stored");
            assert_eq!(future.type_, FutureType::Create);
            assert_eq!(future.resource_group, "rg1");
            assert!(!future.data.is_empty());
            assert_eq!(err.future(), Some(&future));
        }

        /// Story: a stored future is resumed without issuing a new write,
        /// and finishing it clears the future
        #[tokio::test(start_paused = true)]
        async fn story_resume_finishes_without_new_write() {
            let mut mock = MockArm::new();
            mock.expect_poll().times(1).returning(|mut s| {
                s.status = OperationStatus::Succeeded;
                Ok(s)
            });
            mock.expect_get()
                .times(1)
                .returning(|_, _| Ok(json!({"name": "rg1", "location": "eastus"})));
            mock.expect_begin_put().times(0);

            let scope =
                FakeScope::with_future(stored_future(FutureType::Create, HttpMethod::Put));
            let result = reconciler(mock)
                .create_or_update_resource(&scope, &TestSpec::new("rg1"), SERVICE)
                .await
                .unwrap();

            assert_eq!(result, Some(json!({"name": "rg1", "location": "eastus"})));
            assert!(scope.future(SERVICE, "rg1").is_none());
        }

        /// Story: a resumed operation still running keeps its future and
        /// neither reads nor writes the resource
        #[tokio::test(start_paused = true)]
        async fn story_resume_still_running() {
            let mut mock = MockArm::new();
            mock.expect_poll().returning(Ok);
            mock.expect_get().times(0);
            mock.expect_begin_put().times(0);

            let scope =
                FakeScope::with_future(stored_future(FutureType::Update, HttpMethod::Put));
            let err = reconciler(mock)
                .create_or_update_resource(&scope, &TestSpec::new("rg1"), SERVICE)
                .await
                .unwrap_err();

            assert!(err.is_operation_not_done());
            assert_eq!(scope.future(SERVICE, "rg1").unwrap().type_, FutureType::Update);
        }

        /// Story: undecodable future data is dropped and reported as terminal
        #[tokio::test]
        async fn story_corrupt_future_is_reset() {
            let mut mock = MockArm::new();
            mock.expect_poll().times(0);
            mock.expect_begin_put().times(0);

            let mut future = stored_future(FutureType::Create, HttpMethod::Put);
            future.data = "not-a-poller".to_string();
            let scope = FakeScope::with_future(future);
            let err = reconciler(mock)
                .create_or_update_resource(&scope, &TestSpec::new("rg1"), SERVICE)
                .await
                .unwrap_err();

            assert!(err.is_terminal());
            assert!(scope.future(SERVICE, "rg1").is_none());
        }

        /// Story: an operation that fails while resumed clears the future
        #[tokio::test(start_paused = true)]
        async fn story_resumed_operation_fails() {
            let mut mock = MockArm::new();
            mock.expect_poll().times(1).returning(|_| {
                Err(AzureError::new(0, "QuotaExceeded", "quota exceeded").into())
            });

            let scope =
                FakeScope::with_future(stored_future(FutureType::Create, HttpMethod::Put));
            let err = reconciler(mock)
                .create_or_update_resource(&scope, &TestSpec::new("rg1"), SERVICE)
                .await
                .unwrap_err();

            assert!(err.is_terminal());
            assert!(err.to_string().contains("failed to create resource rg1/rg1"));
            assert!(scope.future(SERVICE, "rg1").is_none());
        }

        #[tokio::test]
        async fn test_up_to_date_resource_is_returned_without_write() {
            let mut mock = MockArm::new();
            mock.expect_get()
                .times(1)
                .returning(|_, _| Ok(json!({"name": "rg1", "location": "eastus"})));
            mock.expect_begin_put().times(0);

            let scope = FakeScope::default();
            let result = reconciler(mock)
                .create_or_update_resource(&scope, &TestSpec::new("rg1"), SERVICE)
                .await
                .unwrap();
            assert!(result.is_some());
        }

        #[tokio::test(start_paused = true)]
        async fn test_update_finishing_in_window_returns_resource() {
            let mut mock = MockArm::new();
            let mut gets = 0;
            mock.expect_get().times(2).returning(move |_, _| {
                gets += 1;
                if gets == 1 {
                    Ok(json!({"name": "rg1", "location": "westus"}))
                } else {
                    Ok(json!({"name": "rg1", "location": "eastus"}))
                }
            });
            mock.expect_begin_put()
                .times(1)
                .returning(|_, _, _| Ok(poller(HttpMethod::Put, OperationStatus::InProgress)));
            mock.expect_poll().times(1).returning(|mut s| {
                s.status = OperationStatus::Succeeded;
                Ok(s)
            });

            let scope = FakeScope::default();
            let result = reconciler(mock)
                .create_or_update_resource(&scope, &TestSpec::new("rg1"), SERVICE)
                .await
                .unwrap();

            assert_eq!(result.unwrap()["location"], "eastus");
            assert!(scope.future(SERVICE, "rg1").is_none());
        }

        #[tokio::test]
        async fn test_get_failure_keeps_classification() {
            let mut mock = MockArm::new();
            mock.expect_get()
                .returning(|_, _| Err(AzureError::new(403, "AuthorizationFailed", "denied").into()));
            let err = reconciler(mock)
                .create_or_update_resource(&FakeScope::default(), &TestSpec::new("rg1"), SERVICE)
                .await
                .unwrap_err();
            assert!(err.is_terminal());
            assert!(err.to_string().contains("failed to get existing resource"));

            let mut mock = MockArm::new();
            mock.expect_get()
                .returning(|_, _| Err(AzureError::new(503, "ServiceUnavailable", "busy").into()));
            let err = reconciler(mock)
                .create_or_update_resource(&FakeScope::default(), &TestSpec::new("rg1"), SERVICE)
                .await
                .unwrap_err();
            assert!(err.is_transient());
        }

        #[tokio::test]
        async fn test_parameters_error_is_wrapped() {
            let mut mock = MockArm::new();
            mock.expect_get().returning(|_, _| Err(not_found()));
            mock.expect_begin_put().times(0);

            let mut spec = TestSpec::new("rg1");
            spec.fail_parameters = true;
            let err = reconciler(mock)
                .create_or_update_resource(&FakeScope::default(), &spec, SERVICE)
                .await
                .unwrap_err();
            assert!(err.is_terminal());
            assert!(err.to_string().contains("failed to get desired parameters"));
        }

        #[tokio::test]
        async fn test_begin_failure_stores_no_future() {
            let mut mock = MockArm::new();
            mock.expect_get().returning(|_, _| Err(not_found()));
            mock.expect_begin_put().returning(|_, _, _| {
                Err(AzureError::new(400, "InvalidParameter", "bad location").into())
            });

            let scope = FakeScope::default();
            let err = reconciler(mock)
                .create_or_update_resource(&scope, &TestSpec::new("rg1"), SERVICE)
                .await
                .unwrap_err();
            assert!(err.is_terminal());
            assert!(scope.future(SERVICE, "rg1").is_none());
        }
    }

    // =========================================================================
    // Story Tests: Delete
    // =========================================================================

    mod delete {
        use super::*;

        /// Story: a resource the cluster does not own is never deleted
        #[tokio::test]
        async fn story_unmanaged_resource_is_skipped() {
            let mut mock = MockArm::new();
            mock.expect_get()
                .returning(|_, _| Ok(json!({"name": "byo", "location": "eastus"})));
            mock.expect_begin_delete().times(0);

            let mut spec = TestSpec::new("byo");
            spec.managed = false;
            reconciler(mock)
                .delete_resource(&FakeScope::default(), &spec, SERVICE)
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn test_missing_resource_is_already_deleted() {
            let mut mock = MockArm::new();
            mock.expect_get().returning(|_, _| Err(not_found()));
            mock.expect_begin_delete().times(0);

            reconciler(mock)
                .delete_resource(&FakeScope::default(), &TestSpec::new("rg1"), SERVICE)
                .await
                .unwrap();
        }

        /// Story: a slow delete is stored and resumed on the next pass
        #[tokio::test(start_paused = true)]
        async fn story_slow_delete_is_resumed() {
            let mut mock = MockArm::new();
            mock.expect_get()
                .times(1)
                .returning(|_, _| Ok(json!({"name": "rg1", "location": "eastus"})));
            mock.expect_begin_delete()
                .times(1)
                .returning(|_, _| Ok(poller(HttpMethod::Delete, OperationStatus::InProgress)));
            mock.expect_poll().returning(Ok);

            let scope = FakeScope::default();
            let err = reconciler(mock)
                .delete_resource(&scope, &TestSpec::new("rg1"), SERVICE)
                .await
                .unwrap_err();
            assert!(err.is_operation_not_done());
            assert_eq!(scope.future(SERVICE, "rg1").unwrap().type_, FutureType::Delete);

            let mut mock = MockArm::new();
            mock.expect_get().times(0);
            mock.expect_begin_delete().times(0);
            mock.expect_poll().times(1).returning(|mut s| {
                s.status = OperationStatus::Succeeded;
                Ok(s)
            });
            reconciler(mock)
                .delete_resource(&scope, &TestSpec::new("rg1"), SERVICE)
                .await
                .unwrap();
            assert!(scope.future(SERVICE, "rg1").is_none());
        }

        #[tokio::test]
        async fn test_put_future_is_not_resumed_by_delete() {
            let mut mock = MockArm::new();
            mock.expect_get().returning(|_, _| Err(not_found()));
            mock.expect_poll().times(0);

            let scope =
                FakeScope::with_future(stored_future(FutureType::Create, HttpMethod::Put));
            reconciler(mock)
                .delete_resource(&scope, &TestSpec::new("rg1"), SERVICE)
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn test_delete_reaching_not_found_is_success() {
            let mut mock = MockArm::new();
            mock.expect_get().returning(|_, _| Ok(Value::Null));
            mock.expect_begin_delete().returning(|_, _| Err(not_found()));

            let mut spec = TestSpec::new("rg1");
            spec.desired = Value::Null;
            reconciler(mock)
                .delete_resource(&FakeScope::default(), &spec, SERVICE)
                .await
                .unwrap();
        }
    }
}

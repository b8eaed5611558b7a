//! Reconcile engine for Azure infrastructure
//!
//! A service owns a list of [`ResourceSpec`]s (or [`AsoResourceSpec`]s) and
//! drives each one to its desired state:
//!
//! - [`AsyncReconciler`] talks to ARM directly. Long-running operations
//!   are polled for a bounded time and, when still running, persisted as a
//!   `Future` on the owner's status so the next pass resumes them.
//! - [`AsoReconciler`] writes child custom resources and reads their Ready
//!   condition, leaving the Azure calls to an operator.
//!
//! [`AsyncService`] and [`AsoService`] fan a service out over its specs,
//! aggregate the results and record them as a condition on the owner.

#![deny(missing_docs)]

pub mod aso;
pub mod async_reconciler;
pub mod scope;
pub mod service;
pub mod spec;
pub mod tags;

#[cfg(test)]
mod testing;

pub use aso::{AsoReconciler, AsoResourceSpec, ChildResourceClient, KubeChildResourceClient};
pub use async_reconciler::{AsyncReconciler, Reconciler};
pub use scope::{
    AsoScope, AsyncReconcileScope, ClusterDescriber, ConditionScope, FutureScope, TimeoutScope,
};
pub use service::{AsoService, AsyncService, NoHooks, Pauser, ServiceHooks, ServiceReconciler};
pub use spec::{ResourceRef, ResourceSpec, UpdateMethod};
pub use tags::{reconcile_tags, TagsGetterSetter, TagsOutcome};

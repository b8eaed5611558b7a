//! Async status shared by every owner of Azure resources
//!
//! Holds the per-service conditions and the list of in-flight operations.
//! The condition writers map an error's classification to status, severity
//! and reason so every service reports progress the same way.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::future::{Future, FutureType};
use super::types::{
    Condition, ConditionSeverity, CREATING_REASON, DELETED_REASON, DELETING_REASON,
    DELETION_FAILED_REASON, FAILED_REASON, UPDATING_REASON,
};
use crate::Error;

/// Conditions and long-running operation states of an owner resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AsyncStatus {
    /// Per-service conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// In-flight operations, at most one per (service, resource)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub long_running_operation_states: Vec<Future>,
}

/// Which writer produced a condition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Operation {
    Put,
    Patch,
    Delete,
}

impl AsyncStatus {
    // =========================================================================
    // Futures
    // =========================================================================

    /// Store a future, replacing any future for the same service and resource
    pub fn set_future(&mut self, future: Future) {
        match self
            .long_running_operation_states
            .iter_mut()
            .find(|f| f.is_for(&future.service_name, &future.name))
        {
            Some(existing) => *existing = future,
            None => self.long_running_operation_states.push(future),
        }
    }

    /// The future for a service and resource, of any type
    pub fn get_future(&self, service_name: &str, name: &str) -> Option<&Future> {
        self.long_running_operation_states
            .iter()
            .find(|f| f.is_for(service_name, name))
    }

    /// The future for a service and resource if it has one of the given types
    pub fn get_future_of(
        &self,
        service_name: &str,
        name: &str,
        types: &[FutureType],
    ) -> Option<&Future> {
        self.get_future(service_name, name)
            .filter(|f| types.contains(&f.type_))
    }

    /// Remove the future for a service and resource
    pub fn delete_future(&mut self, service_name: &str, name: &str) {
        self.long_running_operation_states
            .retain(|f| !f.is_for(service_name, name));
    }

    // =========================================================================
    // Conditions
    // =========================================================================

    /// The condition of the given type
    pub fn get_condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Set a condition, keeping the transition time when the status is unchanged
    pub fn set_condition(&mut self, mut condition: Condition) {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }

    /// Remove a condition
    pub fn delete_condition(&mut self, type_: &str) {
        self.conditions.retain(|c| c.type_ != type_);
    }

    /// Record the outcome of a create-or-update pass
    pub fn update_put_status(&mut self, condition_type: &str, service_name: &str, err: Option<&Error>) {
        let condition = match err {
            None => Condition::true_(condition_type),
            Some(err) => error_condition(condition_type, service_name, err, Operation::Put),
        };
        self.set_condition(condition);
    }

    /// Record the outcome of a patch pass
    pub fn update_patch_status(&mut self, condition_type: &str, service_name: &str, err: Option<&Error>) {
        let condition = match err {
            None => Condition::true_(condition_type),
            Some(err) => error_condition(condition_type, service_name, err, Operation::Patch),
        };
        self.set_condition(condition);
    }

    /// Record the outcome of a delete pass
    pub fn update_delete_status(&mut self, condition_type: &str, service_name: &str, err: Option<&Error>) {
        let condition = match err {
            None => Condition::false_(
                condition_type,
                DELETED_REASON,
                ConditionSeverity::Info,
                format!("{service_name} successfully deleted"),
            ),
            Some(err) => error_condition(condition_type, service_name, err, Operation::Delete),
        };
        self.set_condition(condition);
    }
}

fn error_condition(condition_type: &str, service_name: &str, err: &Error, op: Operation) -> Condition {
    if err.is_operation_not_done() {
        let reason = match err.future().map(|f| f.type_) {
            Some(FutureType::Create | FutureType::AsoCreateOrUpdate) => CREATING_REASON,
            Some(FutureType::Update | FutureType::Patch) => UPDATING_REASON,
            Some(FutureType::Delete | FutureType::AsoDelete) => DELETING_REASON,
            None => match op {
                Operation::Put => CREATING_REASON,
                Operation::Patch => UPDATING_REASON,
                Operation::Delete => DELETING_REASON,
            },
        };
        debug!(service = %service_name, condition = %condition_type, reason, "operation in progress");
        return Condition::false_(condition_type, reason, ConditionSeverity::Info, err.to_string());
    }

    let failed_reason = match op {
        Operation::Delete => DELETION_FAILED_REASON,
        Operation::Put | Operation::Patch => FAILED_REASON,
    };

    if err.is_terminal() {
        let reason = match err.reason() {
            crate::error::DEFAULT_TERMINAL_REASON => failed_reason,
            custom => custom,
        };
        Condition::false_(condition_type, reason, ConditionSeverity::Error, err.to_string())
    } else {
        Condition::false_(
            condition_type,
            failed_reason,
            ConditionSeverity::Warning,
            err.to_string(),
        )
    }
}

//! Metrics for the reconcile engine
//!
//! Instruments are created lazily against the global meter, so they are
//! no-ops until telemetry installs a meter provider.

use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

use crate::{Error, ErrorKind};

static METER: Lazy<Meter> = Lazy::new(|| global::meter("capz"));

// ============================================================================
// Azure API Metrics
// ============================================================================

/// Counter of Azure operations issued by the engine
///
/// Labels:
/// - `service`: service name (group, virtualnetwork, ...)
/// - `operation`: get, put, patch, delete, poll
/// - `outcome`: success, not_found, in_progress, error
pub static AZURE_OPERATIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("capz_azure_operations_total")
        .with_description("Total number of Azure operations issued")
        .with_unit("{operations}")
        .build()
});

/// Histogram of time spent polling a long-running operation within one call
///
/// Labels:
/// - `service`: service name
/// - `done`: true, false
pub static LRO_POLL_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("capz_lro_poll_duration_seconds")
        .with_description("Duration of in-window long-running operation polling in seconds")
        .with_unit("s")
        .build()
});

// ============================================================================
// Service Metrics
// ============================================================================

/// Histogram of service reconcile and delete passes
///
/// Labels:
/// - `service`: service name
/// - `action`: reconcile, delete, pause
/// - `result`: success, error
pub static SERVICE_RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("capz_service_reconcile_duration_seconds")
        .with_description("Duration of service passes in seconds")
        .with_unit("s")
        .build()
});

/// Counter of errors returned by service passes
///
/// Labels:
/// - `service`: service name
/// - `kind`: not_found, terminal, transient, operation_not_done
pub static SERVICE_RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("capz_service_reconcile_errors_total")
        .with_description("Total number of service pass errors by kind")
        .with_unit("{errors}")
        .build()
});

/// Label value for an error kind
pub fn kind_label(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NotFound => "not_found",
        ErrorKind::Terminal => "terminal",
        ErrorKind::Transient => "transient",
        ErrorKind::OperationNotDone => "operation_not_done",
    }
}

/// Record one Azure operation
pub fn record_azure_operation(service: &str, operation: &'static str, outcome: &'static str) {
    AZURE_OPERATIONS.add(
        1,
        &[
            KeyValue::new("service", service.to_string()),
            KeyValue::new("operation", operation),
            KeyValue::new("outcome", outcome),
        ],
    );
}

/// Record time spent polling a long-running operation within one call
pub fn record_lro_poll(service: &str, elapsed: Duration, done: bool) {
    LRO_POLL_DURATION.record(
        elapsed.as_secs_f64(),
        &[
            KeyValue::new("service", service.to_string()),
            KeyValue::new("done", done.to_string()),
        ],
    );
}

/// Times one service pass and records its outcome
pub struct ServiceTimer {
    service: String,
    action: &'static str,
    start: Instant,
}

impl ServiceTimer {
    /// Start timing a pass of `service`
    pub fn start(service: impl Into<String>, action: &'static str) -> Self {
        Self {
            service: service.into(),
            action,
            start: Instant::now(),
        }
    }

    /// Record the pass result
    pub fn finish(self, result: Option<&Error>) {
        let elapsed = self.start.elapsed().as_secs_f64();
        let outcome = if result.is_some() { "error" } else { "success" };
        SERVICE_RECONCILE_DURATION.record(
            elapsed,
            &[
                KeyValue::new("service", self.service.clone()),
                KeyValue::new("action", self.action),
                KeyValue::new("result", outcome),
            ],
        );
        if let Some(err) = result {
            SERVICE_RECONCILE_ERRORS.add(
                1,
                &[
                    KeyValue::new("service", self.service),
                    KeyValue::new("kind", kind_label(err.kind())),
                ],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kind_labels() {
        assert_eq!(kind_label(ErrorKind::Terminal), "terminal");
        assert_eq!(kind_label(ErrorKind::OperationNotDone), "operation_not_done");
    }

    #[test]
    fn test_recording_without_provider_is_noop() {
        record_azure_operation("group", "put", "success");
        ServiceTimer::start("group", "reconcile").finish(None);
        let err = Error::transient("throttled", Duration::from_secs(1));
        ServiceTimer::start("group", "reconcile").finish(Some(&err));
    }
}

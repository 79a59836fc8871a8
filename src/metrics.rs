//! Metrics for BYOH reconciliation
//!
//! Provides OpenTelemetry metrics for:
//! - Reconciliation passes (duration, errors)
//! - Actions taken per pass (configure, skip, deconfigure)
//!
//! Instruments resolve against the global meter provider; without an installed
//! exporter they are no-ops.

use once_cell::sync::Lazy;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

/// Global meter for BYOH metrics
static METER: Lazy<Meter> = Lazy::new(|| global::meter("byoh"));

/// Histogram of reconciliation pass duration
///
/// Labels:
/// - `result`: success, error
pub static RECONCILE_DURATION: Lazy<Histogram<f64>> = Lazy::new(|| {
    METER
        .f64_histogram("byoh_reconcile_duration_seconds")
        .with_description("Duration of reconciliation passes in seconds")
        .with_unit("s")
        .build()
});

/// Counter of failed reconciliation passes
///
/// Labels:
/// - `error_kind`: see [`crate::Error::kind`]
/// - `error_type`: transient, permanent
pub static RECONCILE_ERRORS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("byoh_reconcile_errors_total")
        .with_description("Total number of failed reconciliation passes")
        .with_unit("{errors}")
        .build()
});

/// Counter of reconcile actions
///
/// Labels:
/// - `action`: configure, skip, deconfigure
/// - `result`: success, error
pub static RECONCILE_ACTIONS: Lazy<Counter<u64>> = Lazy::new(|| {
    METER
        .u64_counter("byoh_reconcile_actions_total")
        .with_description("Total number of reconcile actions by kind")
        .with_unit("{actions}")
        .build()
});

/// Result label for a pass or action
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Completed without error
    Success,
    /// Failed
    Error,
}

impl Outcome {
    fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Error => "error",
        }
    }
}

impl<T, E> From<&Result<T, E>> for Outcome {
    fn from(r: &Result<T, E>) -> Self {
        if r.is_ok() {
            Outcome::Success
        } else {
            Outcome::Error
        }
    }
}

/// Record a finished pass
pub fn record_pass(duration_secs: f64, outcome: Outcome) {
    RECONCILE_DURATION.record(duration_secs, &[KeyValue::new("result", outcome.as_str())]);
}

/// Record a failed pass
pub fn record_pass_error(error: &crate::Error) {
    let error_type = if error.is_retryable() {
        "transient"
    } else {
        "permanent"
    };
    RECONCILE_ERRORS.add(
        1,
        &[
            KeyValue::new("error_kind", error.kind()),
            KeyValue::new("error_type", error_type),
        ],
    );
}

/// Record one executed action
pub fn record_action(action: &'static str, outcome: Outcome) {
    RECONCILE_ACTIONS.add(
        1,
        &[
            KeyValue::new("action", action),
            KeyValue::new("result", outcome.as_str()),
        ],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_follows_result() {
        let ok: Result<(), ()> = Ok(());
        let err: Result<(), ()> = Err(());
        assert_eq!(Outcome::from(&ok), Outcome::Success);
        assert_eq!(Outcome::from(&err), Outcome::Error);
        assert_eq!(Outcome::Error.as_str(), "error");
    }

    #[test]
    fn recording_without_exporter_is_a_noop() {
        record_pass(0.5, Outcome::Success);
        record_pass_error(&crate::Error::Cancelled);
        record_action("configure", Outcome::Error);
    }
}

//! Kubeconfig refresh bookkeeping on managed cluster objects
//!
//! A refresh is due when someone asked for it through the refresh-needed
//! annotation, or when the last refresh is missing, unreadable or older
//! than the allowed age.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

use capz_common::{KUBECONFIG_LAST_UPDATED_ANNOTATION, KUBECONFIG_REFRESH_NEEDED_ANNOTATION};

/// Age after which a kubeconfig is refreshed without being asked
pub const DEFAULT_KUBECONFIG_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Whether the kubeconfig should be fetched again
pub fn is_refresh_needed(
    annotations: &BTreeMap<String, String>,
    now: DateTime<Utc>,
    max_age: Duration,
) -> bool {
    if annotations
        .get(KUBECONFIG_REFRESH_NEEDED_ANNOTATION)
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    {
        return true;
    }
    let Some(raw) = annotations.get(KUBECONFIG_LAST_UPDATED_ANNOTATION) else {
        return true;
    };
    let last_updated = match DateTime::parse_from_rfc3339(raw) {
        Ok(t) => t.with_timezone(&Utc),
        Err(e) => {
            debug!(value = %raw, error = %e, "unreadable kubeconfig last-updated annotation");
            return true;
        }
    };
    let Ok(max_age) = chrono::Duration::from_std(max_age) else {
        return false;
    };
    now - last_updated >= max_age
}

/// Ask for a refresh on the next pass
pub fn request_refresh(annotations: &mut BTreeMap<String, String>) {
    annotations.insert(
        KUBECONFIG_REFRESH_NEEDED_ANNOTATION.to_string(),
        "true".to_string(),
    );
}

/// Record a completed refresh at `now`
pub fn stamp_last_updated(annotations: &mut BTreeMap<String, String>, now: DateTime<Utc>) {
    annotations.remove(KUBECONFIG_REFRESH_NEEDED_ANNOTATION);
    annotations.insert(
        KUBECONFIG_LAST_UPDATED_ANNOTATION.to_string(),
        now.to_rfc3339_opts(SecondsFormat::Secs, true),
    );
}

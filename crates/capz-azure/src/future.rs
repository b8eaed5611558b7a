//! Conversion between poller state and the persisted [`Future`]

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;

use capz_common::crd::{Future, FutureType};
use capz_common::{Error, Result};

use crate::lro::{PollerState, POLLER_STATE_VERSION};

const FUTURE_DATA: &str = "future data";

/// Encode poller state as URL-safe base64 of its JSON
pub fn encode_poller_state(state: &PollerState) -> Result<String> {
    let json = serde_json::to_vec(state)
        .map_err(|e| Error::serialization_for_kind("PollerState", e.to_string()))?;
    Ok(URL_SAFE.encode(json))
}

/// Decode poller state from a Future's data
///
/// Empty data, invalid base64, invalid JSON and unknown schema versions all
/// fail with an unmarshal error, which is terminal.
pub fn decode_poller_state(data: &str) -> Result<PollerState> {
    if data.is_empty() {
        return Err(Error::unmarshal(FUTURE_DATA, "data is empty"));
    }
    let raw = URL_SAFE
        .decode(data)
        .map_err(|e| Error::unmarshal(FUTURE_DATA, format!("invalid base64: {e}")))?;
    let state: PollerState = serde_json::from_slice(&raw)
        .map_err(|e| Error::unmarshal(FUTURE_DATA, format!("invalid poller state: {e}")))?;
    if state.version != POLLER_STATE_VERSION {
        return Err(Error::unmarshal(
            FUTURE_DATA,
            format!(
                "unsupported poller state version {} (expected {POLLER_STATE_VERSION})",
                state.version
            ),
        ));
    }
    Ok(state)
}

/// Build the Future persisted for an in-flight operation
pub fn future_from_poller(
    state: &PollerState,
    type_: FutureType,
    service_name: &str,
    name: &str,
    resource_group: &str,
) -> Result<Future> {
    Ok(Future {
        type_,
        service_name: service_name.to_string(),
        name: name.to_string(),
        resource_group: resource_group.to_string(),
        data: encode_poller_state(state)?,
    })
}

/// Recover the poller state carried by a Future
pub fn poller_from_future(future: &Future) -> Result<PollerState> {
    decode_poller_state(&future.data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lro::{HttpMethod, OperationStatus, PollMode};

    fn state() -> PollerState {
        PollerState {
            version: POLLER_STATE_VERSION,
            method: HttpMethod::Put,
            resource_url: "https://management.azure.com/subscriptions/s/resourceGroups/rg1?api-version=2021-04-01".to_string(),
            poll_url: Some("https://management.azure.com/operations/abc?x=y+z".to_string()),
            poll_mode: PollMode::AsyncOperation,
            status: OperationStatus::InProgress,
            retry_after_secs: Some(15),
        }
    }

    #[test]
    fn test_future_data_round_trips() {
        let s = state();
        let f = future_from_poller(&s, FutureType::Create, "group", "rg1", "rg1").unwrap();
        assert_eq!(f.type_, FutureType::Create);
        assert_eq!(f.service_name, "group");
        assert!(!f.data.contains('+') && !f.data.contains('/'));
        assert_eq!(poller_from_future(&f).unwrap(), s);
    }

    #[test]
    fn test_empty_data_is_terminal_unmarshal_error() {
        let err = decode_poller_state("").unwrap_err();
        assert!(matches!(err, Error::Unmarshal { .. }));
        assert!(err.is_terminal());
    }

    #[test]
    fn test_invalid_base64_is_unmarshal_error() {
        let err = decode_poller_state("!!!not-base64!!!").unwrap_err();
        assert!(matches!(err, Error::Unmarshal { .. }));
    }

    #[test]
    fn test_unknown_version_is_rejected() {
        let mut s = state();
        s.version = 99;
        let data = URL_SAFE.encode(serde_json::to_vec(&s).unwrap());
        let err = decode_poller_state(&data).unwrap_err();
        assert!(err.to_string().contains("version 99"));
    }
}

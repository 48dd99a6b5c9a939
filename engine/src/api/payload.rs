//! Wire schema of station responses
//!
//! Every response is wrapped in `{"success": bool, "data": ..., "error": {"code": n}}`.
//! The typed snapshot decoders below turn the `data` document into cache
//! records; anything that does not fit is a [`ApiError::MalformedResponse`].

use crate::db::{SearchItem, Statistic, Task, VpnProfile};
use crate::error::ApiError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

/// Outer response envelope
#[derive(Debug, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
pub struct ErrorBody {
    pub code: i64,
}

impl Envelope {
    /// The `data` document, or the station error code on failure
    pub fn into_data(self) -> Result<Value, i64> {
        if self.success {
            Ok(self.data)
        } else {
            Err(self.error.map(|e| e.code).unwrap_or(100))
        }
    }
}

pub fn decode_envelope(body: &[u8]) -> Result<Envelope, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::MalformedResponse(e.to_string()))
}

fn decode<T: DeserializeOwned>(data: Value) -> Result<T, ApiError> {
    serde_json::from_value(data).map_err(|e| ApiError::MalformedResponse(e.to_string()))
}

/// Result list of a `SYNO.Entry.Request` compound call
#[derive(Debug, Deserialize)]
struct Compound<T> {
    #[serde(default)]
    has_fail: bool,
    #[serde(default = "Vec::new")]
    result: Vec<CompoundEntry<T>>,
}

#[derive(Debug, Deserialize)]
struct CompoundEntry<T> {
    #[serde(default)]
    success: bool,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TaskList {
    tasks: Vec<Task>,
}

pub fn tasks(data: Value) -> Result<Vec<Task>, ApiError> {
    Ok(decode::<TaskList>(data)?.tasks)
}

pub fn statistic(data: Value) -> Result<Statistic, ApiError> {
    if !data.is_object() {
        return Err(ApiError::MalformedResponse(
            "statistic payload is not an object".into(),
        ));
    }
    decode(data)
}

/// Profiles of every protocol that answered; protocols that failed are skipped
pub fn vpn_profiles(data: Value) -> Result<Vec<VpnProfile>, ApiError> {
    let outer: Compound<Compound<Value>> = decode(data)?;
    let inner = outer
        .result
        .into_iter()
        .next()
        .and_then(|entry| entry.data)
        .ok_or_else(|| ApiError::MalformedResponse("empty VPN compound result".into()))?;

    let mut profiles = Vec::new();
    for entry in inner.result.into_iter().filter(|e| e.success) {
        match entry.data {
            Some(Value::Array(items)) => {
                for item in items {
                    profiles.push(decode(item)?);
                }
            }
            Some(Value::Null) | None => {}
            Some(other) => {
                return Err(ApiError::MalformedResponse(format!(
                    "unexpected VPN list payload: {}",
                    other
                )))
            }
        }
    }
    Ok(profiles)
}

#[derive(Debug, Deserialize)]
struct SearchStarted {
    id: String,
}

/// Id of a search that was just started
pub fn search_id(data: Value) -> Result<String, ApiError> {
    Ok(decode::<SearchStarted>(data)?.id)
}

/// One poll of a running search
#[derive(Debug, Clone, PartialEq)]
pub struct SearchPage {
    pub has_fail: bool,
    pub is_running: bool,
    pub items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchList {
    #[serde(default)]
    is_running: bool,
    #[serde(default)]
    results: Vec<SearchItem>,
}

pub fn search_page(data: Value) -> Result<SearchPage, ApiError> {
    let compound: Compound<SearchList> = decode(data)?;
    if compound.has_fail {
        return Ok(SearchPage {
            has_fail: true,
            is_running: false,
            items: Vec::new(),
        });
    }

    let list = compound
        .result
        .into_iter()
        .next()
        .and_then(|entry| entry.data)
        .ok_or_else(|| ApiError::MalformedResponse("empty search result".into()))?;

    Ok(SearchPage {
        has_fail: false,
        is_running: list.is_running,
        items: list.results,
    })
}

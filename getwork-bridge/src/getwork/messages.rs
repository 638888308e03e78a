//! Getwork JSON-RPC envelopes.
//!
//! Requests carry an arbitrary `id` that is echoed back, and optionally a
//! `params` array whose first element is solved work being submitted:
//!
//! ```text
//! {"method": "getwork", "params": [], "id": 7}           fetch
//! {"method": "getwork", "params": ["0000..."], "id": 7}  submit
//! ```
//!
//! Some clients send the submitted data as a top-level `data` field instead;
//! both forms are accepted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::work::Work;
use crate::error::Result;

/// Inbound getwork request.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct GetworkRequest {
    /// Request identifier, echoed in the response
    #[serde(default)]
    pub id: Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl GetworkRequest {
    /// Decode a request body. An empty body is a fetch with a null id,
    /// which is what long-poll GETs look like.
    pub fn from_body(body: &str) -> Result<Self> {
        if body.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(body)?)
    }

    /// Submitted work, if this request carries any.
    pub fn submitted_data(&self) -> Option<&str> {
        self.data
            .as_deref()
            .or_else(|| self.params.first().and_then(Value::as_str))
            .filter(|data| !data.is_empty())
    }
}

/// Work handed to a miner.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkResult {
    pub data: String,
    pub target: String,
}

impl From<Work> for WorkResult {
    fn from(work: Work) -> Self {
        Self {
            data: work.data,
            target: work.target,
        }
    }
}

/// Response to a work fetch (plain or long-poll).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct GetworkResponse {
    pub id: Value,
    pub result: Option<WorkResult>,
    pub error: Option<String>,
}

impl GetworkResponse {
    pub fn new(id: Value, work: Option<Work>) -> Self {
        match work {
            Some(work) => Self {
                id,
                result: Some(work.into()),
                error: None,
            },
            None => Self {
                id,
                result: None,
                error: Some("No work available".to_string()),
            },
        }
    }
}

/// Response to a share submission.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SubmitResponse {
    pub id: Value,
    /// Whether the share was accepted
    pub result: bool,
    pub error: Option<String>,
}

impl SubmitResponse {
    pub fn new(id: Value, accepted: bool) -> Self {
        Self {
            id,
            result: accepted,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fetch_request() {
        let req = GetworkRequest::from_body(r#"{"method":"getwork","params":[],"id":"7"}"#).unwrap();
        assert_eq!(req.id, json!("7"));
        assert_eq!(req.submitted_data(), None);
    }

    #[test]
    fn test_submit_via_params() {
        let req =
            GetworkRequest::from_body(r#"{"method":"getwork","params":["abcd"],"id":1}"#).unwrap();
        assert_eq!(req.submitted_data(), Some("abcd"));
    }

    #[test]
    fn test_submit_via_data_field() {
        let req = GetworkRequest::from_body(r#"{"id":"7","data":"abcd"}"#).unwrap();
        assert_eq!(req.submitted_data(), Some("abcd"));
    }

    #[test]
    fn test_empty_data_is_not_a_submission() {
        let req = GetworkRequest::from_body(r#"{"id":"7","data":""}"#).unwrap();
        assert_eq!(req.submitted_data(), None);
        let req = GetworkRequest::from_body(r#"{"id":"7","params":[""]}"#).unwrap();
        assert_eq!(req.submitted_data(), None);
    }

    #[test]
    fn test_empty_body() {
        let req = GetworkRequest::from_body("  \n").unwrap();
        assert_eq!(req.id, Value::Null);
        assert_eq!(req.submitted_data(), None);
    }

    #[test]
    fn test_malformed_body() {
        assert!(GetworkRequest::from_body("{not json").is_err());
        assert!(GetworkRequest::from_body(r#"{"params": 5}"#).is_err());
    }

    #[test]
    fn test_response_shapes() {
        let resp = GetworkResponse::new(json!("7"), Some(Work::new("aa", "bb")));
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"id": "7", "result": {"data": "aa", "target": "bb"}, "error": null})
        );

        let resp = GetworkResponse::new(json!(3), None);
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"id": 3, "result": null, "error": "No work available"})
        );

        let resp = SubmitResponse::new(json!("7"), false);
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"id": "7", "result": false, "error": null})
        );
    }
}

// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ApiAction, RESPONSE_ERROR, RESPONSE_OK, RESPONSE_UNKNOWN_ACTION};
use crate::{AppError, AppResult};

/// A request as it travels on the wire.
///
/// `action` is kept as the raw string so an unknown action can still be answered with
/// its trace id echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub trace_id: i64,
    pub action: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
}

impl RequestEnvelope {
    pub fn new(trace_id: i64, action: ApiAction) -> Self {
        RequestEnvelope {
            trace_id,
            action: action.as_str().to_string(),
            params: HashMap::new(),
            body: None,
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn param(&self, key: &str) -> AppResult<&str> {
        self.params.get(key).map(String::as_str).ok_or_else(|| {
            AppError::MalformedProtocol(format!(
                "action {} is missing param {}",
                self.action, key
            ))
        })
    }

    pub fn optional_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> AppResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| AppError::MalformedProtocol(format!("bad request envelope: {}", e)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseEnvelope {
    pub trace_id: i64,
    pub code: i32,
    #[serde(default)]
    pub data: Value,
}

impl ResponseEnvelope {
    pub fn ok(trace_id: i64, data: Value) -> Self {
        ResponseEnvelope {
            trace_id,
            code: RESPONSE_OK,
            data,
        }
    }

    pub fn unknown_action(trace_id: i64, action: &str) -> Self {
        ResponseEnvelope {
            trace_id,
            code: RESPONSE_UNKNOWN_ACTION,
            data: Value::String(format!("unknown action: {}", action)),
        }
    }

    pub fn error(trace_id: i64, error: &AppError) -> Self {
        ResponseEnvelope {
            trace_id,
            code: RESPONSE_ERROR,
            data: Value::String(error.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == RESPONSE_OK
    }

    /// The payload of a successful response, the failure text as `RemoteError` otherwise.
    pub fn into_data(self) -> AppResult<Value> {
        match self.code {
            RESPONSE_OK => Ok(self.data),
            code => Err(AppError::RemoteError(format!(
                "trace {} failed with code {}: {}",
                self.trace_id,
                code,
                match &self.data {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                }
            ))),
        }
    }

    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> AppResult<Self> {
        serde_json::from_str(text)
            .map_err(|e| AppError::MalformedProtocol(format!("bad response envelope: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::protocol::{PARAM_CONSUMER_ID, PARAM_TOPIC};

    #[test]
    fn request_uses_camel_case() {
        let request = RequestEnvelope::new(7, ApiAction::Receive)
            .with_param(PARAM_TOPIC, "t1")
            .with_param(PARAM_CONSUMER_ID, "c1");
        let value: Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();
        assert_eq!(value["traceId"], json!(7));
        assert_eq!(value["action"], json!("receive"));
        assert_eq!(value["params"]["t"], json!("t1"));
        assert_eq!(value["body"], Value::Null);
    }

    #[test]
    fn request_without_params_or_body() {
        let request = RequestEnvelope::from_json(r#"{"traceId":3,"action":"stat"}"#).unwrap();
        assert!(request.params.is_empty());
        assert!(request.body.is_none());
        assert!(matches!(
            request.param(PARAM_TOPIC),
            Err(AppError::MalformedProtocol(_))
        ));
        assert!(RequestEnvelope::from_json("{not json").is_err());
    }

    #[test]
    fn response_codes() {
        let ok = ResponseEnvelope::ok(1, json!("12"));
        assert!(ok.is_ok());
        assert_eq!(ok.into_data().unwrap(), json!("12"));

        let unknown = ResponseEnvelope::unknown_action(2, "publish");
        assert_eq!(unknown.code, RESPONSE_UNKNOWN_ACTION);
        assert!(matches!(unknown.into_data(), Err(AppError::RemoteError(_))));

        let failed = ResponseEnvelope::error(3, &AppError::TopicNotFound("t9".to_string()));
        assert_eq!(failed.code, RESPONSE_ERROR);
        let text = failed.into_data().unwrap_err().to_string();
        assert!(text.contains("t9"), "{}", text);
    }

    #[test]
    fn response_parses_null_data() {
        let response =
            ResponseEnvelope::from_json(r#"{"traceId":9,"code":1,"data":null}"#).unwrap();
        assert_eq!(response.data, Value::Null);
    }
}

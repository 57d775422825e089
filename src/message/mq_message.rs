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
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

/// Header carrying the storage offset, stamped by the broker at write time.
pub const OFFSET_HEADER: &str = "X-offset";

static NEXT_MESSAGE_ID: AtomicI64 = AtomicI64::new(0);

/// A message as produced by clients and persisted in the topic log.
///
/// The body is opaque text, usually a json document of the producer's own type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub body: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Message {
    pub fn new(id: i64, body: impl Into<String>, headers: HashMap<String, String>) -> Self {
        Message {
            id,
            body: body.into(),
            headers,
        }
    }

    /// Builds a message with a process wide increasing id.
    pub fn create(body: impl Into<String>) -> Self {
        Self::new(Self::next_id(), body, HashMap::new())
    }

    pub fn next_id() -> i64 {
        NEXT_MESSAGE_ID.fetch_add(1, Ordering::Relaxed)
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// The offset stamped by the broker, `None` for messages never written.
    pub fn offset(&self) -> Option<i64> {
        self.headers
            .get(OFFSET_HEADER)
            .and_then(|offset| offset.parse().ok())
    }

    pub fn set_offset(&mut self, offset: i64) {
        self.headers
            .insert(OFFSET_HEADER.to_string(), offset.to_string());
    }

    pub fn to_json(&self) -> AppResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> AppResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            AppError::MalformedProtocol(format!("message is not valid json: {}", e))
        })
    }
}

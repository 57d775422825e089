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

use serde::{Deserialize, Serialize};

/// Cursor value of a subscription that has not acked anything yet.
pub const NO_OFFSET: i64 = -1;

/// A consumer's read cursor on one topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub topic: String,
    pub consumer_id: String,
    /// offset of the last acked message, `NO_OFFSET` before the first ack
    pub offset: i64,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, consumer_id: impl Into<String>) -> Self {
        Subscription {
            topic: topic.into(),
            consumer_id: consumer_id.into(),
            offset: NO_OFFSET,
        }
    }
}

/// Read only snapshot returned by `stat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistical {
    pub subscription: Option<Subscription>,
    /// messages ever written to the topic
    pub total: usize,
    /// current global write offset
    pub position: i64,
}

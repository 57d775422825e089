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

use serde_json::Value;

use crate::protocol::{RequestEnvelope, PARAM_CONSUMER_ID, PARAM_TOPIC};
use crate::request::RequestContext;
use crate::AppResult;

use super::ApiHandler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatRequest {
    pub topic: String,
    pub consumer_id: String,
}

impl StatRequest {
    pub fn from_envelope(envelope: &RequestEnvelope) -> AppResult<Self> {
        Ok(StatRequest {
            topic: envelope.param(PARAM_TOPIC)?.to_string(),
            consumer_id: envelope.param(PARAM_CONSUMER_ID)?.to_string(),
        })
    }
}

pub struct StatRequestHandler;

impl ApiHandler for StatRequestHandler {
    type Request = StatRequest;

    async fn handle_request(
        &self,
        request: StatRequest,
        context: &RequestContext,
    ) -> AppResult<Value> {
        let stat = context
            .queue_manager
            .stat(&request.topic, &request.consumer_id)?;
        Ok(serde_json::to_value(stat)?)
    }
}

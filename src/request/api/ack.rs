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

use crate::protocol::{RequestEnvelope, ACK_REJECTED, PARAM_CONSUMER_ID, PARAM_OFFSET, PARAM_TOPIC};
use crate::request::RequestContext;
use crate::{AppError, AppResult};

use super::ApiHandler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckRequest {
    pub topic: String,
    pub consumer_id: String,
    pub offset: i64,
}

impl AckRequest {
    pub fn from_envelope(envelope: &RequestEnvelope) -> AppResult<Self> {
        let offset = envelope.param(PARAM_OFFSET)?;
        Ok(AckRequest {
            topic: envelope.param(PARAM_TOPIC)?.to_string(),
            consumer_id: envelope.param(PARAM_CONSUMER_ID)?.to_string(),
            offset: offset
                .parse::<i64>()
                .map_err(|_| AppError::InvalidValue(format!("ack offset: {}", offset)))?,
        })
    }
}

pub struct AckRequestHandler;

impl ApiHandler for AckRequestHandler {
    type Request = AckRequest;

    /// Answers with the accepted offset, or `ACK_REJECTED` for a stale or unknown offset.
    async fn handle_request(
        &self,
        request: AckRequest,
        context: &RequestContext,
    ) -> AppResult<Value> {
        let accepted = context
            .queue_manager
            .ack(&request.topic, &request.consumer_id, request.offset)?;
        Ok(Value::String(match accepted {
            Some(offset) => offset.to_string(),
            None => ACK_REJECTED.to_string(),
        }))
    }
}

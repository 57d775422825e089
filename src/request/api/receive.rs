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

use crate::protocol::{
    RequestEnvelope, BATCH_FRAME_RESERVE, DEFAULT_BATCH_SIZE, PARAM_CONSUMER_ID, PARAM_SIZE,
    PARAM_TOPIC,
};
use crate::request::RequestContext;
use crate::{AppError, AppResult};

use super::ApiHandler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub topic: String,
    pub consumer_id: String,
}

impl ReceiveRequest {
    pub fn from_envelope(envelope: &RequestEnvelope) -> AppResult<Self> {
        Ok(ReceiveRequest {
            topic: envelope.param(PARAM_TOPIC)?.to_string(),
            consumer_id: envelope.param(PARAM_CONSUMER_ID)?.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReceiveRequest {
    pub topic: String,
    pub consumer_id: String,
    pub size: usize,
}

impl BatchReceiveRequest {
    pub fn from_envelope(envelope: &RequestEnvelope) -> AppResult<Self> {
        let size = match envelope.optional_param(PARAM_SIZE) {
            Some(size) => size
                .parse::<usize>()
                .map_err(|_| AppError::InvalidValue(format!("batch size: {}", size)))?,
            None => DEFAULT_BATCH_SIZE,
        };
        Ok(BatchReceiveRequest {
            topic: envelope.param(PARAM_TOPIC)?.to_string(),
            consumer_id: envelope.param(PARAM_CONSUMER_ID)?.to_string(),
            size,
        })
    }
}

pub struct ReceiveRequestHandler;

impl ApiHandler for ReceiveRequestHandler {
    type Request = ReceiveRequest;

    async fn handle_request(
        &self,
        request: ReceiveRequest,
        context: &RequestContext,
    ) -> AppResult<Value> {
        let message = context
            .queue_manager
            .receive(&request.topic, &request.consumer_id)?;
        Ok(serde_json::to_value(message)?)
    }
}

pub struct BatchReceiveRequestHandler;

impl ApiHandler for BatchReceiveRequestHandler {
    type Request = BatchReceiveRequest;

    async fn handle_request(
        &self,
        request: BatchReceiveRequest,
        context: &RequestContext,
    ) -> AppResult<Value> {
        // the whole response has to fit in one frame
        let max_bytes = context
            .config
            .network
            .max_frame_length
            .saturating_sub(BATCH_FRAME_RESERVE);
        let messages = context.queue_manager.batch_receive(
            &request.topic,
            &request.consumer_id,
            request.size,
            max_bytes,
        )?;
        Ok(serde_json::to_value(messages)?)
    }
}

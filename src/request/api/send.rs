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
use tracing::trace;

use crate::message::Message;
use crate::protocol::{RequestEnvelope, PARAM_TOPIC};
use crate::request::RequestContext;
use crate::{AppError, AppResult};

use super::ApiHandler;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub topic: String,
    pub message: Message,
    /// length of the serialized message as received
    pub size: usize,
}

impl SendRequest {
    pub fn from_envelope(envelope: &RequestEnvelope) -> AppResult<Self> {
        let topic = envelope.param(PARAM_TOPIC)?.to_string();
        let body = envelope
            .body
            .as_deref()
            .ok_or_else(|| AppError::MalformedProtocol("send request without body".to_string()))?;
        Ok(SendRequest {
            topic,
            message: Message::from_json(body)?,
            size: body.len(),
        })
    }
}

pub struct SendRequestHandler;

impl ApiHandler for SendRequestHandler {
    type Request = SendRequest;

    async fn handle_request(
        &self,
        request: SendRequest,
        context: &RequestContext,
    ) -> AppResult<Value> {
        let max_msg_size = context.config.general.max_msg_size;
        if request.size > max_msg_size {
            return Err(AppError::MessageTooLarge(format!(
                "message of {} bytes exceeds max_msg_size {}",
                request.size, max_msg_size
            )));
        }
        let offset = context.queue_manager.send(&request.topic, request.message)?;
        trace!("trace {} stored at {}:{}", context.trace_id, request.topic, offset);
        Ok(Value::String(offset.to_string()))
    }
}

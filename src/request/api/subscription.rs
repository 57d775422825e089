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

use crate::message::Subscription;
use crate::protocol::{RequestEnvelope, PARAM_CONSUMER_ID, PARAM_TOPIC, REPLY_OK};
use crate::request::RequestContext;
use crate::AppResult;

use super::ApiHandler;

/// Shared by `sub` and `unsub`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    pub topic: String,
    pub consumer_id: String,
}

impl SubscriptionRequest {
    pub fn from_envelope(envelope: &RequestEnvelope) -> AppResult<Self> {
        Ok(SubscriptionRequest {
            topic: envelope.param(PARAM_TOPIC)?.to_string(),
            consumer_id: envelope.param(PARAM_CONSUMER_ID)?.to_string(),
        })
    }
}

pub struct SubscribeRequestHandler;

impl ApiHandler for SubscribeRequestHandler {
    type Request = SubscriptionRequest;

    async fn handle_request(
        &self,
        request: SubscriptionRequest,
        context: &RequestContext,
    ) -> AppResult<Value> {
        context
            .queue_manager
            .subscribe(Subscription::new(request.topic, request.consumer_id))?;
        Ok(Value::String(REPLY_OK.to_string()))
    }
}

pub struct UnsubscribeRequestHandler;

impl ApiHandler for UnsubscribeRequestHandler {
    type Request = SubscriptionRequest;

    async fn handle_request(
        &self,
        request: SubscriptionRequest,
        context: &RequestContext,
    ) -> AppResult<Value> {
        context
            .queue_manager
            .unsubscribe(&request.topic, &request.consumer_id)?;
        Ok(Value::String(REPLY_OK.to_string()))
    }
}

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

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, trace};

use crate::protocol::{ApiAction, RequestEnvelope, ResponseEnvelope};
use crate::queue::QueueManager;
use crate::service::BrokerConfig;
use crate::request::api::{
    AckRequestHandler, BatchReceiveRequestHandler, ReceiveRequestHandler, SendRequestHandler,
    StatRequestHandler, SubscribeRequestHandler, UnsubscribeRequestHandler,
};
use crate::request::{ApiRequest, RequestContext};
use crate::AppResult;

use super::api::ApiHandler;

/// general async handler
async fn execute_handler<H>(
    handler: H,
    request: H::Request,
    context: &RequestContext,
) -> AppResult<Value>
where
    H: ApiHandler + Sync,
{
    handler.handle_request(request, context).await
}

pub struct RequestProcessor;

impl RequestProcessor {
    /// Answers one request envelope. Failures become error responses, the trace id is
    /// always echoed.
    pub async fn process_request(
        envelope: RequestEnvelope,
        queue_manager: Arc<QueueManager>,
        config: Arc<BrokerConfig>,
    ) -> ResponseEnvelope {
        let trace_id = envelope.trace_id;
        let action = match ApiAction::from_name(&envelope.action) {
            Ok(action) => action,
            Err(_) => {
                debug!("trace {} has unknown action {}", trace_id, envelope.action);
                return ResponseEnvelope::unknown_action(trace_id, &envelope.action);
            }
        };
        trace!("Processing request: {:?}", envelope);

        let context = RequestContext::new(trace_id, queue_manager, config);
        let result = match ApiRequest::parse(action, &envelope) {
            Ok(request) => Self::dispatch(request, &context).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(data) => ResponseEnvelope::ok(trace_id, data),
            Err(e) => {
                debug!("trace {} action {} failed: {}", trace_id, action, e);
                ResponseEnvelope::error(trace_id, &e)
            }
        }
    }

    async fn dispatch(request: ApiRequest, context: &RequestContext) -> AppResult<Value> {
        match request {
            ApiRequest::Send(request) => {
                execute_handler(SendRequestHandler, request, context).await
            }
            ApiRequest::Receive(request) => {
                execute_handler(ReceiveRequestHandler, request, context).await
            }
            ApiRequest::BatchReceive(request) => {
                execute_handler(BatchReceiveRequestHandler, request, context).await
            }
            ApiRequest::Ack(request) => execute_handler(AckRequestHandler, request, context).await,
            ApiRequest::Subscribe(request) => {
                execute_handler(SubscribeRequestHandler, request, context).await
            }
            ApiRequest::Unsubscribe(request) => {
                execute_handler(UnsubscribeRequestHandler, request, context).await
            }
            ApiRequest::Stat(request) => {
                execute_handler(StatRequestHandler, request, context).await
            }
        }
    }
}

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

mod api;
mod request_context;
mod request_processor;

pub use api::{
    AckRequest, BatchReceiveRequest, ReceiveRequest, SendRequest, StatRequest,
    SubscriptionRequest,
};
pub use request_context::RequestContext;
pub use request_processor::RequestProcessor;

use crate::protocol::{ApiAction, RequestEnvelope};
use crate::AppResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    Send(SendRequest),
    Receive(ReceiveRequest),
    BatchReceive(BatchReceiveRequest),
    Ack(AckRequest),
    Subscribe(SubscriptionRequest),
    Unsubscribe(SubscriptionRequest),
    Stat(StatRequest),
}

impl ApiRequest {
    /// Reads the typed request for `action` out of the envelope's params and body.
    pub fn parse(action: ApiAction, envelope: &RequestEnvelope) -> AppResult<ApiRequest> {
        let request = match action {
            ApiAction::Send => ApiRequest::Send(SendRequest::from_envelope(envelope)?),
            ApiAction::Receive => ApiRequest::Receive(ReceiveRequest::from_envelope(envelope)?),
            ApiAction::BatchReceive => {
                ApiRequest::BatchReceive(BatchReceiveRequest::from_envelope(envelope)?)
            }
            ApiAction::Ack => ApiRequest::Ack(AckRequest::from_envelope(envelope)?),
            ApiAction::Subscribe => {
                ApiRequest::Subscribe(SubscriptionRequest::from_envelope(envelope)?)
            }
            ApiAction::Unsubscribe => {
                ApiRequest::Unsubscribe(SubscriptionRequest::from_envelope(envelope)?)
            }
            ApiAction::Stat => ApiRequest::Stat(StatRequest::from_envelope(envelope)?),
        };
        Ok(request)
    }
}

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

//! Request and response envelopes exchanged between clients and the broker.
//!
//! Every frame is one JSON document followed by [`DELIMITER`]. Requests carry a client
//! chosen trace id that the broker echoes back, which lets a client keep many requests
//! in flight on one connection.

mod api_action;
mod envelope;

pub use api_action::ApiAction;
pub use envelope::{RequestEnvelope, ResponseEnvelope};

/// Separates frames on the byte stream.
pub const DELIMITER: &[u8] = b"\r\n$$\r\n";

pub const RESPONSE_OK: i32 = 1;
pub const RESPONSE_UNKNOWN_ACTION: i32 = 0;
pub const RESPONSE_ERROR: i32 = -1;

pub const PARAM_TOPIC: &str = "t";
pub const PARAM_CONSUMER_ID: &str = "cid";
pub const PARAM_OFFSET: &str = "offset";
pub const PARAM_SIZE: &str = "size";

/// Batch size used when a `batch-receive` request carries no `size`.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Room kept in a response frame for the envelope around a batch.
pub const BATCH_FRAME_RESERVE: usize = 256;

/// `ack` response data when the ack was not accepted.
pub const ACK_REJECTED: &str = "-1";
/// `sub` and `unsub` response data.
pub const REPLY_OK: &str = "OK";

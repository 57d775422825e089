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

use std::fmt::{Display, Formatter};

use crate::{AppError, AppResult};

/// The operations a client can ask the broker for.
///
/// On the wire an action is its lower case name, see `as_str`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ApiAction {
    Send,
    Receive,
    BatchReceive,
    Ack,
    Subscribe,
    Unsubscribe,
    Stat,
}

impl ApiAction {
    pub const ALL: [ApiAction; 7] = [
        ApiAction::Send,
        ApiAction::Receive,
        ApiAction::BatchReceive,
        ApiAction::Ack,
        ApiAction::Subscribe,
        ApiAction::Unsubscribe,
        ApiAction::Stat,
    ];

    pub fn from_name(name: &str) -> AppResult<Self> {
        match name {
            "send" => Ok(ApiAction::Send),
            "receive" => Ok(ApiAction::Receive),
            "batch-receive" => Ok(ApiAction::BatchReceive),
            "ack" => Ok(ApiAction::Ack),
            "sub" => Ok(ApiAction::Subscribe),
            "unsub" => Ok(ApiAction::Unsubscribe),
            "stat" => Ok(ApiAction::Stat),
            invalid => Err(AppError::MalformedProtocol(format!(
                "action:{} is invalid",
                invalid
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiAction::Send => "send",
            ApiAction::Receive => "receive",
            ApiAction::BatchReceive => "batch-receive",
            ApiAction::Ack => "ack",
            ApiAction::Subscribe => "sub",
            ApiAction::Unsubscribe => "unsub",
            ApiAction::Stat => "stat",
        }
    }
}

impl Display for ApiAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

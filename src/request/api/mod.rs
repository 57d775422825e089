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

mod ack;
mod handler;
mod receive;
mod send;
mod stat;
mod subscription;

pub use handler::ApiHandler;

pub use ack::{AckRequest, AckRequestHandler};
pub use receive::{
    BatchReceiveRequest, BatchReceiveRequestHandler, ReceiveRequest, ReceiveRequestHandler,
};
pub use send::{SendRequest, SendRequestHandler};
pub use stat::{StatRequest, StatRequestHandler};
pub use subscription::{SubscribeRequestHandler, SubscriptionRequest, UnsubscribeRequestHandler};

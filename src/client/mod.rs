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

//! Client library: a pooled, multiplexed connection to the broker plus the
//! producer/consumer/listener API on top of it.

mod broker;
mod correlator;
mod listener;
mod mq_client;
mod pool;
mod service;

pub use broker::{DeadLetter, MqBroker, MqConsumer, MqProducer};
pub use correlator::{Correlator, PendingResponse};
pub use listener::MessageListener;
pub use mq_client::{MqClient, MqClientFactory};
pub use pool::{ConnectionFactory, Pool, PoolConfig, PooledConnection};
pub use service::ClientService;

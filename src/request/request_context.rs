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

use crate::queue::QueueManager;
use crate::service::BrokerConfig;

#[derive(Debug)]
pub struct RequestContext {
    pub queue_manager: Arc<QueueManager>,
    pub config: Arc<BrokerConfig>,
    pub trace_id: i64,
}

impl RequestContext {
    pub fn new(trace_id: i64, queue_manager: Arc<QueueManager>, config: Arc<BrokerConfig>) -> Self {
        RequestContext {
            queue_manager,
            config,
            trace_id,
        }
    }
}

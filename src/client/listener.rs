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

use crate::message::Message;
use crate::AppResult;

/// Application callback for messages delivered by the polling task.
///
/// Returning an error, or panicking, marks the delivery failed and it is retried.
pub trait MessageListener: Send + Sync + 'static {
    fn on_message(&self, message: &Message) -> AppResult<()>;
}

impl<F> MessageListener for F
where
    F: Fn(&Message) -> AppResult<()> + Send + Sync + 'static,
{
    fn on_message(&self, message: &Message) -> AppResult<()> {
        self(message)
    }
}

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

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

use crate::protocol::ResponseEnvelope;
use crate::{AppError, AppResult};

/// Matches responses to the requests waiting for them.
///
/// A caller registers its trace id before the request is written, so a response that
/// arrives immediately always finds its handle.
#[derive(Debug)]
pub struct Correlator {
    next_trace_id: AtomicI64,
    pending: DashMap<i64, oneshot::Sender<ResponseEnvelope>>,
}

/// Handle for one in-flight request.
#[derive(Debug)]
pub struct PendingResponse {
    pub trace_id: i64,
    receiver: oneshot::Receiver<ResponseEnvelope>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Correlator {
            next_trace_id: AtomicI64::new(1),
            pending: DashMap::new(),
        }
    }

    pub fn next_trace_id(&self) -> i64 {
        self.next_trace_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn register(&self) -> PendingResponse {
        let trace_id = self.next_trace_id();
        let (sender, receiver) = oneshot::channel();
        self.pending.insert(trace_id, sender);
        PendingResponse { trace_id, receiver }
    }

    /// Hands the response to its waiting caller. Returns false when nobody waits for it.
    pub fn complete(&self, response: ResponseEnvelope) -> bool {
        let trace_id = response.trace_id;
        match self.pending.remove(&trace_id) {
            Some((_, sender)) => {
                if sender.send(response).is_err() {
                    debug!("caller of trace {} went away before its response", trace_id);
                }
                true
            }
            None => {
                debug!("dropped response for unknown trace {}", trace_id);
                false
            }
        }
    }

    pub fn cancel(&self, trace_id: i64) {
        self.pending.remove(&trace_id);
    }

    /// Fails every waiting caller, used when the connection is lost.
    pub fn fail_all(&self) {
        self.pending.clear();
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Waits for the response of `pending`, giving up after `timeout`.
    pub async fn wait(
        &self,
        pending: PendingResponse,
        timeout: Duration,
    ) -> AppResult<ResponseEnvelope> {
        let trace_id = pending.trace_id;
        match tokio::time::timeout(timeout, pending.receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(AppError::TransportUnavailable(format!(
                "connection lost while waiting for trace {}",
                trace_id
            ))),
            Err(_) => {
                self.cancel(trace_id);
                Err(AppError::RequestTimeout(trace_id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn completes_out_of_order() {
        let correlator = Correlator::new();
        let first = correlator.register();
        let second = correlator.register();
        assert_ne!(first.trace_id, second.trace_id);

        assert!(correlator.complete(ResponseEnvelope::ok(second.trace_id, json!("b"))));
        assert!(correlator.complete(ResponseEnvelope::ok(first.trace_id, json!("a"))));

        let timeout = Duration::from_secs(1);
        assert_eq!(correlator.wait(second, timeout).await.unwrap().data, json!("b"));
        assert_eq!(correlator.wait(first, timeout).await.unwrap().data, json!("a"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn unknown_and_duplicate_responses_are_dropped() {
        let correlator = Correlator::new();
        let pending = correlator.register();
        assert!(!correlator.complete(ResponseEnvelope::ok(9999, json!(null))));
        assert!(correlator.complete(ResponseEnvelope::ok(pending.trace_id, json!(1))));
        assert!(!correlator.complete(ResponseEnvelope::ok(pending.trace_id, json!(2))));
        let response = correlator.wait(pending, Duration::from_secs(1)).await.unwrap();
        assert_eq!(response.data, json!(1));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_removes_the_handle() {
        let correlator = Correlator::new();
        let pending = correlator.register();
        let trace_id = pending.trace_id;
        let result = correlator.wait(pending, Duration::from_millis(50)).await;
        assert!(matches!(result, Err(AppError::RequestTimeout(id)) if id == trace_id));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[tokio::test]
    async fn fail_all_wakes_callers() {
        let correlator = Correlator::new();
        let pending = correlator.register();
        correlator.fail_all();
        assert!(matches!(
            correlator.wait(pending, Duration::from_secs(1)).await,
            Err(AppError::TransportUnavailable(_))
        ));
    }
}

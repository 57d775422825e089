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

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::log::{MessageStore, RECORD_HEADER_WIDTH};
use crate::message::{Message, Statistical, Subscription, NO_OFFSET};
use crate::{AppError, AppResult};

/// One topic: its message log and the cursors of its subscribers.
///
/// Delivery is pull based. `receive` and `batch_receive` never move a cursor, only an
/// explicit `ack` does, so a message is delivered again until it is acked.
#[derive(Debug)]
pub struct TopicQueue {
    topic: String,
    store: MessageStore,
    subscriptions: DashMap<String, Subscription>,
}

impl TopicQueue {
    pub fn new(store: MessageStore) -> Self {
        TopicQueue {
            topic: store.topic().to_string(),
            store,
            subscriptions: DashMap::new(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Adds the subscription unless the consumer is already subscribed, an existing cursor is kept.
    pub fn subscribe(&self, subscription: Subscription) {
        let consumer_id = subscription.consumer_id.clone();
        self.subscriptions
            .entry(consumer_id.clone())
            .or_insert(subscription);
        debug!("consumer {} subscribed to {}", consumer_id, self.topic);
    }

    pub fn unsubscribe(&self, consumer_id: &str) {
        if self.subscriptions.remove(consumer_id).is_some() {
            debug!("consumer {} unsubscribed from {}", consumer_id, self.topic);
        }
    }

    pub fn subscription(&self, consumer_id: &str) -> Option<Subscription> {
        self.subscriptions.get(consumer_id).map(|s| s.clone())
    }

    fn cursor(&self, consumer_id: &str) -> AppResult<i64> {
        self.subscriptions
            .get(consumer_id)
            .map(|s| s.offset)
            .ok_or_else(|| AppError::SubscriptionNotFound {
                topic: self.topic.clone(),
                consumer_id: consumer_id.to_string(),
            })
    }

    /// Offset of the first message after `offset`, `None` when the message at `offset` is unknown.
    fn next_unread(&self, offset: i64) -> Option<i64> {
        if offset == NO_OFFSET {
            return Some(0);
        }
        let entry = self.store.entry(offset)?;
        Some(self.store.next_offset(offset, &entry))
    }

    /// Appends the message and returns its offset.
    pub fn send(&self, mut message: Message) -> AppResult<i64> {
        let offset = self.store.write(&mut message)?;
        trace!("topic {} stored message {} at {}", self.topic, message.id, offset);
        Ok(offset)
    }

    /// The first message after the consumer's cursor, `None` when nothing new is stored.
    pub fn receive(&self, consumer_id: &str) -> AppResult<Option<Message>> {
        let cursor = self.cursor(consumer_id)?;
        match self.next_unread(cursor) {
            Some(next) => self.store.read(next),
            None => Ok(None),
        }
    }

    /// Up to `size` consecutive messages after the consumer's cursor.
    ///
    /// The batch also stops before its serialized messages pass `max_bytes`, but it always
    /// holds at least one message when one is available.
    pub fn batch_receive(
        &self,
        consumer_id: &str,
        size: usize,
        max_bytes: usize,
    ) -> AppResult<Vec<Message>> {
        let mut offset = self.cursor(consumer_id)?;
        let mut messages = Vec::new();
        let mut bytes = 0usize;
        while messages.len() < size {
            let next = match self.next_unread(offset) {
                Some(next) => next,
                None => break,
            };
            let Some(entry) = self.store.entry(next) else {
                break;
            };
            // payload plus the separating comma
            let message_bytes = entry.length - RECORD_HEADER_WIDTH + 1;
            if !messages.is_empty() && bytes.saturating_add(message_bytes) > max_bytes {
                debug!(
                    "batch for {} on {} cut at {} messages, {} bytes",
                    consumer_id,
                    self.topic,
                    messages.len(),
                    bytes
                );
                break;
            }
            match self.store.read(next)? {
                Some(message) => messages.push(message),
                None => break,
            }
            bytes += message_bytes;
            offset = next;
        }
        Ok(messages)
    }

    /// Moves the consumer's cursor forward to `offset`.
    ///
    /// Returns `Ok(None)` for an ack that is not past the cursor or does not name a stored
    /// message, which is what a duplicate or stale ack looks like.
    pub fn ack(&self, consumer_id: &str, offset: i64) -> AppResult<Option<i64>> {
        let mut subscription =
            self.subscriptions
                .get_mut(consumer_id)
                .ok_or_else(|| AppError::SubscriptionNotFound {
                    topic: self.topic.clone(),
                    consumer_id: consumer_id.to_string(),
                })?;
        if offset <= subscription.offset
            || offset >= self.store.pos()
            || self.store.entry(offset).is_none()
        {
            debug!(
                "rejected ack of {} by {} on {}, cursor at {}",
                offset, consumer_id, self.topic, subscription.offset
            );
            return Ok(None);
        }
        subscription.offset = offset;
        trace!("consumer {} acked {} on {}", consumer_id, offset, self.topic);
        Ok(Some(offset))
    }

    pub fn stat(&self, consumer_id: &str) -> Statistical {
        Statistical {
            subscription: self.subscription(consumer_id),
            total: self.store.total(),
            position: self.store.pos(),
        }
    }
}

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

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::log::{Indexer, MessageStore};
use crate::message::{Message, Statistical, Subscription};
use crate::service::LogConfig;
use crate::{AppError, AppResult};

use super::TopicQueue;

/// Registry of the topics served by one broker.
///
/// Owns the offset index shared by all topic stores. Topics are looked up by exact name.
#[derive(Debug)]
pub struct QueueManager {
    storage_dir: PathBuf,
    segment_size: usize,
    auto_create_topics: bool,
    indexer: Arc<Indexer>,
    topics: DashMap<String, Arc<TopicQueue>>,
}

impl QueueManager {
    pub fn new(log_config: &LogConfig) -> Self {
        QueueManager {
            storage_dir: PathBuf::from(&log_config.storage_dir),
            segment_size: log_config.segment_size,
            auto_create_topics: log_config.auto_create_topics,
            indexer: Arc::new(Indexer::new()),
            topics: DashMap::new(),
        }
    }

    /// Registers the configured topics and every topic directory already on disk.
    pub fn startup(log_config: &LogConfig) -> AppResult<Self> {
        let manager = Self::new(log_config);
        std::fs::create_dir_all(&manager.storage_dir).map_err(|e| {
            AppError::DetailedIoError(format!(
                "create storage dir: {} error: {}",
                manager.storage_dir.display(),
                e
            ))
        })?;

        for topic in &log_config.topics {
            manager.create_topic(topic)?;
        }
        for topic in Self::topics_on_disk(&manager.storage_dir)? {
            manager.create_topic(&topic)?;
        }
        info!(
            "queue manager loaded {} topics from {}",
            manager.topics.len(),
            manager.storage_dir.display()
        );
        Ok(manager)
    }

    fn topics_on_disk(storage_dir: &Path) -> AppResult<Vec<String>> {
        let mut topics = Vec::new();
        for entry in std::fs::read_dir(storage_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => topics.push(name),
                Err(name) => warn!("skip topic dir with non utf-8 name: {:?}", name),
            }
        }
        Ok(topics)
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    /// Registers `topic`, opening its store. Registering an existing topic is a no-op.
    pub fn create_topic(&self, topic: &str) -> AppResult<Arc<TopicQueue>> {
        if topic.is_empty() || topic.contains(['/', '\\']) || topic == "." || topic == ".." {
            return Err(AppError::InvalidValue(format!("invalid topic name: {:?}", topic)));
        }
        match self.topics.entry(topic.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(queue) => Ok(queue.get().clone()),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let store = MessageStore::open(
                    topic,
                    &self.storage_dir,
                    self.segment_size,
                    &self.indexer,
                )?;
                let queue = Arc::new(TopicQueue::new(store));
                slot.insert(queue.clone());
                info!("registered topic {}", topic);
                Ok(queue)
            }
        }
    }

    pub fn get(&self, topic: &str) -> AppResult<Arc<TopicQueue>> {
        if let Some(queue) = self.topics.get(topic) {
            return Ok(queue.clone());
        }
        if self.auto_create_topics {
            return self.create_topic(topic);
        }
        Err(AppError::TopicNotFound(topic.to_string()))
    }

    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn send(&self, topic: &str, message: Message) -> AppResult<i64> {
        self.get(topic)?.send(message)
    }

    pub fn subscribe(&self, subscription: Subscription) -> AppResult<()> {
        self.get(&subscription.topic)?.subscribe(subscription);
        Ok(())
    }

    pub fn unsubscribe(&self, topic: &str, consumer_id: &str) -> AppResult<()> {
        self.get(topic)?.unsubscribe(consumer_id);
        Ok(())
    }

    pub fn receive(&self, topic: &str, consumer_id: &str) -> AppResult<Option<Message>> {
        self.get(topic)?.receive(consumer_id)
    }

    pub fn batch_receive(
        &self,
        topic: &str,
        consumer_id: &str,
        size: usize,
        max_bytes: usize,
    ) -> AppResult<Vec<Message>> {
        self.get(topic)?.batch_receive(consumer_id, size, max_bytes)
    }

    pub fn ack(&self, topic: &str, consumer_id: &str, offset: i64) -> AppResult<Option<i64>> {
        self.get(topic)?.ack(consumer_id, offset)
    }

    pub fn stat(&self, topic: &str, consumer_id: &str) -> AppResult<Statistical> {
        Ok(self.get(topic)?.stat(consumer_id))
    }

    /// Flushes every topic's active segment.
    pub fn flush(&self) -> AppResult<()> {
        for queue in self.topics.iter() {
            queue.store().flush()?;
        }
        Ok(())
    }
}

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

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{ClientService, MessageListener};
use crate::message::{Message, Statistical};
use crate::service::{ClientConfig, ConsumerConfig};
use crate::{AppError, AppResult};

/// A message the listener kept failing on, acked so delivery could move on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub topic: String,
    pub consumer_id: String,
    pub message: Message,
    pub attempts: u32,
    pub error: String,
}

struct Registration {
    consumer: MqConsumer,
    topics: Vec<String>,
    listener: Arc<dyn MessageListener>,
}

struct BrokerInner {
    service: Arc<ClientService>,
    consumer_config: ConsumerConfig,
    next_consumer_id: AtomicU64,
    registrations: RwLock<Vec<Arc<Registration>>>,
    dead_letters: Mutex<VecDeque<DeadLetter>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

/// Client side entry point: hands out producers and consumers sharing one connection
/// pool, and runs registered listeners from a single polling task.
#[derive(Clone)]
pub struct MqBroker {
    inner: Arc<BrokerInner>,
}

impl MqBroker {
    pub fn new(client_config: &ClientConfig, consumer_config: ConsumerConfig) -> Self {
        Self::with_service(Arc::new(ClientService::new(client_config)), consumer_config)
    }

    /// Like `new`, opening the pool's `min_idle` connections first.
    pub async fn connect(
        client_config: &ClientConfig,
        consumer_config: ConsumerConfig,
    ) -> AppResult<Self> {
        let service = ClientService::connect(client_config).await?;
        Ok(Self::with_service(Arc::new(service), consumer_config))
    }

    pub fn with_service(service: Arc<ClientService>, consumer_config: ConsumerConfig) -> Self {
        MqBroker {
            inner: Arc::new(BrokerInner {
                service,
                dead_letters: Mutex::new(VecDeque::with_capacity(
                    consumer_config.dead_letter_capacity,
                )),
                consumer_config,
                next_consumer_id: AtomicU64::new(0),
                registrations: RwLock::new(Vec::new()),
                poller: Mutex::new(None),
            }),
        }
    }

    pub fn service(&self) -> &Arc<ClientService> {
        &self.inner.service
    }

    pub fn create_producer(&self) -> MqProducer {
        MqProducer {
            service: self.inner.service.clone(),
        }
    }

    fn new_consumer(&self) -> MqConsumer {
        let id = self.inner.next_consumer_id.fetch_add(1, Ordering::Relaxed);
        MqConsumer {
            id: format!("CID{}", id),
            service: self.inner.service.clone(),
        }
    }

    /// A consumer with a fresh id, already subscribed to `topic`.
    pub async fn create_consumer(&self, topic: &str) -> AppResult<MqConsumer> {
        let consumer = self.new_consumer();
        consumer.subscribe(topic).await?;
        Ok(consumer)
    }

    /// Subscribes a new consumer to `topics` and has the polling task feed their
    /// messages to `listener`. Must be called inside a tokio runtime.
    pub async fn register_handler<L: MessageListener>(
        &self,
        topics: &[&str],
        listener: L,
    ) -> AppResult<MqConsumer> {
        let consumer = self.new_consumer();
        for topic in topics {
            consumer.subscribe(topic).await?;
        }
        self.inner.registrations.write().push(Arc::new(Registration {
            consumer: consumer.clone(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            listener: Arc::new(listener),
        }));
        info!("consumer {} listening on {:?}", consumer.id, topics);
        self.start_polling();
        Ok(consumer)
    }

    fn start_polling(&self) {
        let mut poller = self.inner.poller.lock();
        if poller.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let interval = Duration::from_millis(self.inner.consumer_config.poll_interval_ms);
        *poller = Some(tokio::spawn(poll_loop(weak, interval)));
    }

    /// Dead letters recorded so far, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.inner.dead_letters.lock().iter().cloned().collect()
    }

    /// Stops the polling task and closes the pool.
    pub fn shutdown(&self) {
        if let Some(handle) = self.inner.poller.lock().take() {
            handle.abort();
        }
        self.inner.service.close();
    }
}

async fn poll_loop(broker: Weak<BrokerInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(broker) = broker.upgrade() else {
            debug!("broker dropped, polling stops");
            return;
        };
        let registrations: Vec<Arc<Registration>> = broker.registrations.read().clone();
        for registration in registrations {
            for topic in &registration.topics {
                poll_once(&broker, &registration, topic).await;
            }
        }
    }
}

async fn poll_once(broker: &BrokerInner, registration: &Registration, topic: &str) {
    let consumer = &registration.consumer;
    let message = match consumer.receive(topic).await {
        Ok(Some(message)) => message,
        Ok(None) => return,
        Err(e) => {
            warn!("consumer {} receive from {} failed: {}", consumer.id, topic, e);
            return;
        }
    };
    deliver(broker, registration, topic, &message).await;
    match consumer.ack_message(topic, &message).await {
        Ok(true) => {}
        Ok(false) => debug!("ack of {:?} on {} not accepted", message.offset(), topic),
        Err(e) => warn!("consumer {} ack on {} failed: {}", consumer.id, topic, e),
    }
}

fn invoke(listener: &dyn MessageListener, message: &Message) -> AppResult<()> {
    match catch_unwind(AssertUnwindSafe(|| listener.on_message(message))) {
        Ok(result) => result,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&'static str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(AppError::ListenerFailed(format!("listener panicked: {}", reason)))
        }
    }
}

/// Runs the listener with retries, recording a dead letter once attempts run out.
async fn deliver(
    broker: &BrokerInner,
    registration: &Registration,
    topic: &str,
    message: &Message,
) {
    let config = &broker.consumer_config;
    let max_attempts = config.max_delivery_attempts.max(1);
    let mut attempt = 1;
    loop {
        let error = match invoke(registration.listener.as_ref(), message) {
            Ok(()) => return,
            Err(e) => e,
        };
        if attempt >= max_attempts {
            record_dead_letter(
                broker,
                DeadLetter {
                    topic: topic.to_string(),
                    consumer_id: registration.consumer.id.clone(),
                    message: message.clone(),
                    attempts: attempt,
                    error: error.to_string(),
                },
            );
            return;
        }
        let delay = retry_delay(config.retry_backoff_ms, attempt);
        debug!(
            "listener failed on {:?} of {} (attempt {}), retry in {:?}: {}",
            message.offset(),
            topic,
            attempt,
            delay,
            error
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

/// Exponential backoff with up to one base interval of jitter.
fn retry_delay(base_ms: u64, attempt: u32) -> Duration {
    let exponential = base_ms.saturating_mul(1u64 << (attempt - 1).min(16));
    let jitter = if base_ms > 0 {
        rand::thread_rng().gen_range(0..base_ms)
    } else {
        0
    };
    Duration::from_millis(exponential.saturating_add(jitter))
}

fn record_dead_letter(broker: &BrokerInner, dead_letter: DeadLetter) {
    warn!(
        target: "dead_letter",
        topic = %dead_letter.topic,
        consumer = %dead_letter.consumer_id,
        offset = ?dead_letter.message.offset(),
        attempts = dead_letter.attempts,
        "giving up on message: {}",
        dead_letter.error
    );
    let capacity = broker.consumer_config.dead_letter_capacity;
    if capacity == 0 {
        return;
    }
    let mut dead_letters = broker.dead_letters.lock();
    while dead_letters.len() >= capacity {
        dead_letters.pop_front();
    }
    dead_letters.push_back(dead_letter);
}

#[derive(Clone)]
pub struct MqProducer {
    service: Arc<ClientService>,
}

impl MqProducer {
    pub async fn send(&self, topic: &str, message: &Message) -> AppResult<i64> {
        self.service.send(topic, message).await
    }
}

#[derive(Clone)]
pub struct MqConsumer {
    id: String,
    service: Arc<ClientService>,
}

impl MqConsumer {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn subscribe(&self, topic: &str) -> AppResult<()> {
        self.service.subscribe(topic, &self.id).await
    }

    pub async fn unsubscribe(&self, topic: &str) -> AppResult<()> {
        self.service.unsubscribe(topic, &self.id).await
    }

    pub async fn receive(&self, topic: &str) -> AppResult<Option<Message>> {
        self.service.receive(topic, &self.id).await
    }

    pub async fn batch_receive(&self, topic: &str, size: usize) -> AppResult<Vec<Message>> {
        self.service.batch_receive(topic, &self.id, size).await
    }

    pub async fn ack(&self, topic: &str, offset: i64) -> AppResult<bool> {
        self.service.ack(topic, &self.id, offset).await
    }

    /// Acks `message` by the offset the broker stamped on it.
    pub async fn ack_message(&self, topic: &str, message: &Message) -> AppResult<bool> {
        match message.offset() {
            Some(offset) => self.ack(topic, offset).await,
            None => {
                error!("message {} carries no offset header", message.id);
                Err(AppError::InvalidValue(format!(
                    "message {} has no offset",
                    message.id
                )))
            }
        }
    }

    pub async fn stat(&self, topic: &str) -> AppResult<Statistical> {
        self.service.stat(topic, &self.id).await
    }
}

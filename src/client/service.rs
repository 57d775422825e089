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

use serde_json::Value;
use tracing::debug;

use super::{MqClientFactory, Pool, PoolConfig};
use crate::message::{Message, Statistical};
use crate::protocol::{
    ApiAction, ACK_REJECTED, PARAM_CONSUMER_ID, PARAM_OFFSET, PARAM_SIZE, PARAM_TOPIC,
};
use crate::service::ClientConfig;
use crate::{AppError, AppResult};

/// Typed broker operations over a pool of connections.
pub struct ClientService {
    pool: Pool<MqClientFactory>,
}

impl ClientService {
    pub fn new(config: &ClientConfig) -> Self {
        ClientService {
            pool: Pool::new(MqClientFactory::new(config.clone()), PoolConfig::from(config)),
        }
    }

    /// Like `new`, with `min_idle` connections opened up front.
    pub async fn connect(config: &ClientConfig) -> AppResult<Self> {
        let service = Self::new(config);
        service.pool.prefill().await?;
        Ok(service)
    }

    pub fn pool(&self) -> &Pool<MqClientFactory> {
        &self.pool
    }

    async fn call(
        &self,
        action: ApiAction,
        params: &[(&str, &str)],
        body: Option<String>,
    ) -> AppResult<Value> {
        let client = self.pool.borrow().await?;
        let result = client.request(action, params, body).await;
        match result {
            Ok(response) => response.into_data(),
            Err(e) => {
                if e.is_transport_error() {
                    debug!("dropping connection to {} after {}", client.address(), e);
                    client.invalidate();
                }
                Err(e)
            }
        }
    }

    /// Stores the message, returning its offset.
    pub async fn send(&self, topic: &str, message: &Message) -> AppResult<i64> {
        let data = self
            .call(ApiAction::Send, &[(PARAM_TOPIC, topic)], Some(message.to_json()?))
            .await?;
        parse_offset(&data)
    }

    pub async fn subscribe(&self, topic: &str, consumer_id: &str) -> AppResult<()> {
        self.call(
            ApiAction::Subscribe,
            &[(PARAM_TOPIC, topic), (PARAM_CONSUMER_ID, consumer_id)],
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn unsubscribe(&self, topic: &str, consumer_id: &str) -> AppResult<()> {
        self.call(
            ApiAction::Unsubscribe,
            &[(PARAM_TOPIC, topic), (PARAM_CONSUMER_ID, consumer_id)],
            None,
        )
        .await?;
        Ok(())
    }

    pub async fn receive(&self, topic: &str, consumer_id: &str) -> AppResult<Option<Message>> {
        let data = self
            .call(
                ApiAction::Receive,
                &[(PARAM_TOPIC, topic), (PARAM_CONSUMER_ID, consumer_id)],
                None,
            )
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    pub async fn batch_receive(
        &self,
        topic: &str,
        consumer_id: &str,
        size: usize,
    ) -> AppResult<Vec<Message>> {
        let size = size.to_string();
        let data = self
            .call(
                ApiAction::BatchReceive,
                &[
                    (PARAM_TOPIC, topic),
                    (PARAM_CONSUMER_ID, consumer_id),
                    (PARAM_SIZE, size.as_str()),
                ],
                None,
            )
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Returns whether the broker moved the cursor to `offset`.
    pub async fn ack(&self, topic: &str, consumer_id: &str, offset: i64) -> AppResult<bool> {
        let offset = offset.to_string();
        let data = self
            .call(
                ApiAction::Ack,
                &[
                    (PARAM_TOPIC, topic),
                    (PARAM_CONSUMER_ID, consumer_id),
                    (PARAM_OFFSET, offset.as_str()),
                ],
                None,
            )
            .await?;
        Ok(data.as_str().is_some_and(|accepted| accepted != ACK_REJECTED))
    }

    pub async fn stat(&self, topic: &str, consumer_id: &str) -> AppResult<Statistical> {
        let data = self
            .call(
                ApiAction::Stat,
                &[(PARAM_TOPIC, topic), (PARAM_CONSUMER_ID, consumer_id)],
                None,
            )
            .await?;
        Ok(serde_json::from_value(data)?)
    }

    pub fn close(&self) {
        self.pool.close();
    }
}

fn parse_offset(data: &Value) -> AppResult<i64> {
    data.as_str()
        .and_then(|offset| offset.parse().ok())
        .ok_or_else(|| AppError::MalformedProtocol(format!("expected an offset, got {}", data)))
}

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

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{AppError, AppResult};

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    pub id: i32,
    /// largest serialized message the broker accepts
    pub max_msg_size: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub ip: String,
    pub port: u16,
    pub max_connection: usize,
    pub max_frame_length: usize,
    pub conn_read_buffer_size: usize,
}

/// Storage layout of the topic logs.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Root directory, one sub directory per topic.
    pub storage_dir: String,
    /// Fixed size of every segment file.
    pub segment_size: usize,
    /// Topics registered at startup.
    pub topics: Vec<String>,
    /// Register unknown topics on first use instead of failing with `TopicNotFound`.
    pub auto_create_topics: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestHandlerPool {
    pub channel_capacity: usize,
    /// 0 means one worker per cpu
    pub num_channels: usize,
    pub monitor_interval: u64,
    pub worker_check_timeout: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub pool_max_total: usize,
    pub pool_max_idle: usize,
    pub pool_min_idle: usize,
    pub borrow_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub max_frame_length: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub poll_interval_ms: u64,
    pub max_delivery_attempts: u32,
    pub retry_backoff_ms: u64,
    pub dead_letter_capacity: usize,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub general: GeneralConfig,
    pub network: NetworkConfig,
    pub log: LogConfig,
    pub request_handler_pool: RequestHandlerPool,
    pub client: ClientConfig,
    pub consumer: ConsumerConfig,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            id: 0,
            max_msg_size: 1024 * 1024,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            ip: "127.0.0.1".to_string(),
            port: 6666,
            max_connection: 1024,
            max_frame_length: 1024 * 1024,
            conn_read_buffer_size: 4 * 1024,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            storage_dir: "storage".to_string(),
            segment_size: 10 * 1024,
            topics: vec![],
            auto_create_topics: false,
        }
    }
}

impl Default for RequestHandlerPool {
    fn default() -> Self {
        RequestHandlerPool {
            channel_capacity: 1024,
            num_channels: 0,
            monitor_interval: 5,
            worker_check_timeout: 10,
        }
    }
}

impl RequestHandlerPool {
    pub fn worker_count(&self) -> usize {
        if self.num_channels == 0 {
            num_cpus::get()
        } else {
            self.num_channels
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            host: "127.0.0.1".to_string(),
            port: 6666,
            pool_max_total: 10,
            pool_max_idle: 5,
            pool_min_idle: 2,
            borrow_timeout_ms: 3000,
            connect_timeout_ms: 2000,
            request_timeout_ms: 5000,
            max_frame_length: 1024 * 1024,
        }
    }
}

impl ClientConfig {
    pub fn borrow_timeout(&self) -> Duration {
        Duration::from_millis(self.borrow_timeout_ms)
    }
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        ConsumerConfig {
            poll_interval_ms: 100,
            max_delivery_attempts: 3,
            retry_backoff_ms: 50,
            dead_letter_capacity: 1024,
        }
    }
}

impl BrokerConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<BrokerConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or(AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            )))?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .add_source(config::Environment::with_prefix("PEBBLEMQ").separator("__"))
            .build()?;

        let broker_config: BrokerConfig = config.try_deserialize()?;
        broker_config.validate()?;

        Ok(broker_config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.log.segment_size <= crate::log::RECORD_HEADER_WIDTH {
            return Err(AppError::InvalidValue(format!(
                "log.segment_size {} must be larger than the record header",
                self.log.segment_size
            )));
        }
        if self.client.pool_max_total == 0 {
            return Err(AppError::InvalidValue(
                "client.pool_max_total must be positive".to_string(),
            ));
        }
        if self.client.pool_min_idle > self.client.pool_max_idle
            || self.client.pool_max_idle > self.client.pool_max_total
        {
            return Err(AppError::InvalidValue(format!(
                "client pool bounds must satisfy min_idle <= max_idle <= max_total, got {}/{}/{}",
                self.client.pool_min_idle, self.client.pool_max_idle, self.client.pool_max_total
            )));
        }
        Ok(())
    }
}

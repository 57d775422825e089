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

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use pebblemq::service::{ClientConfig, ConsumerConfig};
use pebblemq::{setup_local_tracing, BrokerConfig, QueueManager, Server};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

pub struct TestBroker {
    pub config: BrokerConfig,
    pub queue_manager: Arc<QueueManager>,
    notify_shutdown: broadcast::Sender<()>,
    server: JoinHandle<()>,
    _dir: TempDir,
}

impl TestBroker {
    pub fn client_config(&self) -> ClientConfig {
        self.config.client.clone()
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        self.config.consumer.clone()
    }
}

impl Drop for TestBroker {
    fn drop(&mut self) {
        let _ = self.notify_shutdown.send(());
        self.server.abort();
    }
}

/// Starts a broker on an ephemeral port with small segments and fast polling.
pub async fn start_broker(topics: &[&str]) -> TestBroker {
    start_broker_with(topics, |_| {}).await
}

/// Like `start_broker`, letting `configure` adjust the config before the server starts.
pub async fn start_broker_with<F: FnOnce(&mut BrokerConfig)>(
    topics: &[&str],
    configure: F,
) -> TestBroker {
    let _ = setup_local_tracing();
    let dir = tempfile::tempdir().unwrap();

    let mut config = BrokerConfig::default();
    config.log.storage_dir = dir.path().to_string_lossy().to_string();
    config.log.segment_size = 1024;
    config.log.topics = topics.iter().map(|t| t.to_string()).collect();
    config.network.port = 0;
    config.request_handler_pool.num_channels = 4;
    config.consumer.poll_interval_ms = 10;
    config.consumer.retry_backoff_ms = 5;
    config.client.pool_min_idle = 1;
    config.client.request_timeout_ms = 3000;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    config.client.host = address.ip().to_string();
    config.client.port = address.port();
    configure(&mut config);

    let queue_manager = Arc::new(QueueManager::startup(&config.log).unwrap());
    let (notify_shutdown, _) = broadcast::channel(1);
    let (shutdown_complete_tx, _shutdown_complete_rx) = mpsc::channel(1);
    let server = Server::new(
        listener,
        notify_shutdown.clone(),
        shutdown_complete_tx,
        queue_manager.clone(),
        Arc::new(config.clone()),
    );
    let server = tokio::spawn(async move {
        let _ = server.run().await;
    });

    TestBroker {
        config,
        queue_manager,
        notify_shutdown,
        server,
        _dir: dir,
    }
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..500 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

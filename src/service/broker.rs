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

use tokio::net::TcpListener;
use tokio::sync::mpsc::Sender;
use tokio::sync::{broadcast, mpsc};
use tokio::{runtime, signal};
use tracing::{error, info, trace};

use crate::queue::QueueManager;
use crate::service::{BrokerConfig, Server};
use crate::AppError::IllegalStateError;
use crate::AppResult;

/// A broker process: the topic registry plus the tcp server in front of it.
pub struct Broker {
    config: Arc<BrokerConfig>,
}

impl Broker {
    pub fn new(config: Arc<BrokerConfig>) -> Self {
        Broker { config }
    }

    /// Opens the storage, serves until ctrl-c, then waits for every connection to finish.
    pub fn start(&mut self) -> AppResult<()> {
        let (notify_shutdown, _) = broadcast::channel(1);
        let (shutdown_complete_tx, mut shutdown_complete_rx) = mpsc::channel(1);

        // startup tokio runtime
        let rt = runtime::Builder::new_multi_thread().enable_all().build()?;

        let queue_manager = Arc::new(QueueManager::startup(&self.config.log)?);

        rt.block_on(Self::run_tcp_server(
            queue_manager.clone(),
            self.config.clone(),
            notify_shutdown.clone(),
            shutdown_complete_tx,
        ))?;

        // tcp server has been shutdown, tell connections and workers
        if notify_shutdown.send(()).is_err() {
            trace!("no task is listening for shutdown");
        }
        trace!("waiting for shutdown complete...");
        rt.block_on(shutdown_complete_rx.recv());
        queue_manager.flush()?;
        info!("broker shutdown complete");
        Ok(())
    }

    async fn run_tcp_server(
        queue_manager: Arc<QueueManager>,
        config: Arc<BrokerConfig>,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: Sender<()>,
    ) -> AppResult<()> {
        let listen_address = format!("{}:{}", config.network.ip, config.network.port);

        let listener = match TcpListener::bind(&listen_address).await {
            Ok(listener) => listener,
            Err(err) => {
                let error_msg = format!(
                    "Failed to bind server to address: {} - Error: {}",
                    listen_address, err
                );
                error!(error_msg);
                return Err(IllegalStateError(error_msg));
            }
        };
        info!("tcp server binding to {} for listening", &listen_address);
        let server = Server::new(
            listener,
            notify_shutdown,
            shutdown_complete_tx,
            queue_manager,
            config,
        );
        tokio::select! {
          res = server.run() => {
              if let Err(err) = res {
                  error!(cause = %err, "failed to accept");
              }
          }
          _ = signal::ctrl_c() => {
              info!("get shutdown signal");
          }
        }

        Ok(())
    }
}

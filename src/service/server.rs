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

use std::any::type_name;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::BufWriter;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, trace, warn};

use crate::network::{write_frame, Connection};
use crate::protocol::RequestEnvelope;
use crate::queue::QueueManager;
use crate::request::RequestProcessor;
use crate::AppError;
use crate::AppResult;

use super::config::RequestHandlerPool;
use super::{BrokerConfig, Shutdown};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One decoded request waiting for a worker.
///
/// The response goes back through the connection's writer channel, so requests from the
/// same connection may be answered in any order.
#[derive(Debug)]
pub struct RequestTask {
    connection_id: u64,
    envelope: RequestEnvelope,
    response_tx: mpsc::Sender<String>,
    overloaded: Arc<Notify>,
}

fn get_type_name<T>(_: &T) -> &'static str {
    type_name::<T>()
}

fn spawn_worker(
    id: usize,
    rx: async_channel::Receiver<RequestTask>,
    queue_manager: Arc<QueueManager>,
    config: Arc<BrokerConfig>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        debug!("request handler worker {} started", id);
        while let Ok(request) = rx.recv().await {
            process_request(request, queue_manager.clone(), config.clone()).await;
        }
        debug!("request handler worker {} exited", id);
    })
}

fn start_request_handler(
    queue_manager: Arc<QueueManager>,
    config: Arc<BrokerConfig>,
    notify_shutdown: broadcast::Sender<()>,
) -> async_channel::Sender<RequestTask> {
    let request_handler_config: &RequestHandlerPool = &config.request_handler_pool;
    let (request_tx, request_rx) = async_channel::bounded(request_handler_config.channel_capacity);
    let num_workers = request_handler_config.worker_count();
    let monitor_interval = request_handler_config.monitor_interval;
    let worker_check_timeout = request_handler_config.worker_check_timeout;
    let mut workers = HashMap::with_capacity(num_workers);
    tokio::spawn(async move {
        // a request that panics its worker takes that worker down, the monitor below respawns it
        for i in 0..num_workers {
            workers.insert(
                i,
                spawn_worker(i, request_rx.clone(), queue_manager.clone(), config.clone()),
            );
        }

        let mut shutdown = Shutdown::new(notify_shutdown.subscribe());
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("request handler monitor received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(monitor_interval)) => {}
            }
            for id in 0..num_workers {
                let Some(handle) = workers.remove(&id) else {
                    continue;
                };
                if !handle.is_finished() {
                    workers.insert(id, handle);
                    continue;
                }
                match time::timeout(Duration::from_millis(worker_check_timeout), handle).await {
                    Ok(Ok(_)) => {
                        info!("request handler monitor found worker {} is exited normally", id);
                    }
                    Ok(Err(join_error)) if join_error.is_panic() => {
                        let payload = join_error.into_panic();
                        if let Some(message) = payload.downcast_ref::<&'static str>() {
                            error!("worker {} panicked with message: {}", id, message);
                        } else if let Some(message) = payload.downcast_ref::<String>() {
                            error!("worker {} panicked with message: {}", id, message);
                        } else {
                            error!(
                                "worker {} panicked with an unknown type: {}",
                                id,
                                get_type_name(&payload)
                            );
                        }
                        workers.insert(
                            id,
                            spawn_worker(
                                id,
                                request_rx.clone(),
                                queue_manager.clone(),
                                config.clone(),
                            ),
                        );
                    }
                    Ok(Err(_)) => {
                        error!("worker {} failed for unknown reasons", id);
                    }
                    Err(_) => {
                        // finished but not joinable yet, look again next round
                        debug!("worker {} join timed out", id);
                    }
                }
            }
        }
        debug!("request handler exit monitor loop");
    });
    request_tx
}

async fn process_request(
    request: RequestTask,
    queue_manager: Arc<QueueManager>,
    config: Arc<BrokerConfig>,
) {
    let RequestTask {
        connection_id,
        envelope,
        response_tx,
        overloaded,
    } = request;
    let response = RequestProcessor::process_request(envelope, queue_manager, config).await;
    let payload = match response.to_json() {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to encode response {}: {:?}", response.trace_id, e);
            return;
        }
    };
    queue_response(connection_id, response.trace_id, payload, &response_tx, &overloaded);
}

/// Hands a response to the connection's writer without waiting for room.
///
/// Workers are shared by all connections. When a peer stops reading, its queue fills up
/// and the connection is flagged through `overloaded` to be closed.
fn queue_response(
    connection_id: u64,
    trace_id: i64,
    payload: String,
    response_tx: &mpsc::Sender<String>,
    overloaded: &Notify,
) -> bool {
    match response_tx.try_send(payload) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(
                "connection {} response queue is full, dropping response {} and closing",
                connection_id, trace_id
            );
            overloaded.notify_one();
            false
        }
        Err(TrySendError::Closed(_)) => {
            // the connection is gone, nobody is waiting for this response
            debug!(
                "connection {} closed before response {} was written",
                connection_id, trace_id
            );
            false
        }
    }
}

/// Writes responses of one connection in the order workers finish them.
async fn write_responses(
    connection_id: u64,
    mut writer: BufWriter<OwnedWriteHalf>,
    mut response_rx: mpsc::Receiver<String>,
) {
    while let Some(payload) = response_rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &payload).await {
            error!("connection {} write response error: {}", connection_id, e);
            break;
        }
    }
    trace!("connection {} writer exited", connection_id);
}

// handler for each connection
struct ConnectionHandler {
    notify_shutdown: broadcast::Sender<()>,
    _shutdown_complete_tx: mpsc::Sender<()>,
    connection_id: u64,
    connection: Connection<tokio::net::tcp::OwnedReadHalf>,
    response_tx: mpsc::Sender<String>,
    overloaded: Arc<Notify>,
    writer: JoinHandle<()>,
    request_tx: async_channel::Sender<RequestTask>,
}

impl ConnectionHandler {
    async fn handle_connection(&mut self) -> AppResult<()> {
        let mut shutdown = Shutdown::new(self.notify_shutdown.subscribe());
        loop {
            let maybe_frame = tokio::select! {
                res = self.connection.read_frame() => res?,
                _ = shutdown.recv() => {
                    debug!("connection handler exit read loop after recv shutdown signal");
                    return Ok(());
                }
                _ = self.overloaded.notified() => {
                    self.writer.abort();
                    return Err(AppError::IllegalStateError(format!(
                        "connection {} stopped reading its responses",
                        self.connection_id
                    )));
                }
            };

            let frame = match maybe_frame {
                Some(frame) => frame,
                // client close the connection gracefully
                None => break,
            };

            // a frame that is not an envelope means the stream can no longer be trusted
            let envelope = RequestEnvelope::from_json(&frame.payload)?;

            let request = RequestTask {
                connection_id: self.connection_id,
                envelope,
                response_tx: self.response_tx.clone(),
                overloaded: self.overloaded.clone(),
            };
            if let Err(e) = self.request_tx.send(request).await {
                error!("Failed to send request: {:?}", e);
                return Err(AppError::ChannelSendError(e.to_string()));
            }
        }
        debug!("connection handler exit read loop");

        Ok(())
    }
}

#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    notify_shutdown: broadcast::Sender<()>,
    shutdown_complete_tx: mpsc::Sender<()>,
    queue_manager: Arc<QueueManager>,
    config: Arc<BrokerConfig>,
}

impl Server {
    pub fn new(
        listener: TcpListener,
        notify_shutdown: broadcast::Sender<()>,
        shutdown_complete_tx: mpsc::Sender<()>,
        queue_manager: Arc<QueueManager>,
        config: Arc<BrokerConfig>,
    ) -> Self {
        Server {
            listener,
            limit_connections: Arc::new(Semaphore::new(config.network.max_connection)),
            notify_shutdown,
            shutdown_complete_tx,
            queue_manager,
            config,
        }
    }

    pub fn local_addr(&self) -> AppResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections until accepting fails.
    ///
    /// Each connection gets a reader that decodes envelopes onto the shared request
    /// channel, and a writer task fed by the workers. A connection holds one permit of
    /// the `max_connection` semaphore for its lifetime.
    ///
    // Graceful shutdown sequence:
    // 1. The run loop is canceled by the caller on the shutdown signal.
    // 2. Connection handlers stop reading when they receive the broadcast.
    // 3. Once all handlers are gone, their request senders are dropped and the workers'
    //    `recv` fails, so the workers exit. The monitor exits on the broadcast.
    // 4. The caller waits until every `shutdown_complete_tx` clone is dropped.
    pub async fn run(&self) -> AppResult<()> {
        let request_sender = start_request_handler(
            self.queue_manager.clone(),
            self.config.clone(),
            self.notify_shutdown.clone(),
        );
        let buffer_size = self.config.network.conn_read_buffer_size;
        let max_frame_length = self.config.network.max_frame_length;

        loop {
            let permit = self
                .limit_connections
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| AppError::IllegalStateError(format!("connection limiter: {}", e)))?;

            let socket = self.accept().await?;
            let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
            debug!(
                "accept new connection {} from {:?}",
                connection_id,
                socket.peer_addr().ok()
            );
            let (reader, writer) = socket.into_split();

            let (response_tx, response_rx) =
                mpsc::channel(self.config.request_handler_pool.channel_capacity);
            let writer = tokio::spawn(write_responses(
                connection_id,
                BufWriter::new(writer),
                response_rx,
            ));

            let mut handler = ConnectionHandler {
                _shutdown_complete_tx: self.shutdown_complete_tx.clone(),
                notify_shutdown: self.notify_shutdown.clone(),
                connection_id,
                connection: Connection::new(reader, buffer_size, max_frame_length),
                response_tx,
                overloaded: Arc::new(Notify::new()),
                writer,
                request_tx: request_sender.clone(),
            };

            tokio::spawn(async move {
                if let Err(err) = handler.handle_connection().await {
                    error!("Connection {} error: {:?}", connection_id, err);
                }
                // whether gracefully or unexpectedly closed, release connection
                drop(permit);
            });
        }
    }

    async fn accept(&self) -> AppResult<TcpStream> {
        let mut backoff = 1;

        loop {
            match self.listener.accept().await {
                Ok((socket, _)) => return Ok(socket),
                Err(err) => {
                    if backoff > 64 {
                        return Err(AppError::DetailedIoError(format!(
                            "accept tcp server error: {}",
                            err
                        )));
                    }
                }
            }

            time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        debug!("tcp server dropped");
    }
}
impl Drop for ConnectionHandler {
    fn drop(&mut self) {
        debug!("connection {} handler dropped", self.connection_id);
    }
}

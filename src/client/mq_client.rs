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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufWriter;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{ConnectionFactory, Correlator};
use crate::network::{write_frame, Connection};
use crate::protocol::{ApiAction, RequestEnvelope, ResponseEnvelope};
use crate::service::ClientConfig;
use crate::{AppError, AppResult};

const WRITE_QUEUE_CAPACITY: usize = 1024;
const READ_BUFFER_SIZE: usize = 4 * 1024;

/// One long lived connection to the broker.
///
/// Many requests can be in flight at once, the correlator pairs each response with its
/// caller by trace id. Once the socket fails the client stays inactive, callers get
/// `TransportUnavailable` right away and the pool drops it.
#[derive(Debug)]
pub struct MqClient {
    address: String,
    correlator: Arc<Correlator>,
    request_tx: mpsc::Sender<String>,
    active: Arc<AtomicBool>,
    request_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl MqClient {
    pub async fn connect(config: &ClientConfig) -> AppResult<MqClient> {
        let address = format!("{}:{}", config.host, config.port);
        let connect = TcpStream::connect(&address);
        let socket = match tokio::time::timeout(config.connect_timeout(), connect).await {
            Ok(Ok(socket)) => socket,
            Ok(Err(e)) => {
                return Err(AppError::TransportUnavailable(format!(
                    "connect to {} error: {}",
                    address, e
                )))
            }
            Err(_) => {
                return Err(AppError::TransportUnavailable(format!(
                    "connect to {} timed out",
                    address
                )))
            }
        };
        socket.set_nodelay(true)?;
        let (reader, writer) = socket.into_split();

        let correlator = Arc::new(Correlator::new());
        let active = Arc::new(AtomicBool::new(true));
        let (request_tx, request_rx) = mpsc::channel(WRITE_QUEUE_CAPACITY);

        let reader = tokio::spawn(read_responses(
            Connection::new(reader, READ_BUFFER_SIZE, config.max_frame_length),
            correlator.clone(),
            active.clone(),
        ));
        let writer = tokio::spawn(write_requests(
            BufWriter::new(writer),
            request_rx,
            correlator.clone(),
            active.clone(),
        ));
        debug!("connected to broker {}", address);

        Ok(MqClient {
            address,
            correlator,
            request_tx,
            active,
            request_timeout: config.request_timeout(),
            reader,
            writer,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn pending_requests(&self) -> usize {
        self.correlator.pending_count()
    }

    /// Sends one request and waits for its response.
    pub async fn request(
        &self,
        action: ApiAction,
        params: &[(&str, &str)],
        body: Option<String>,
    ) -> AppResult<ResponseEnvelope> {
        if !self.is_active() {
            return Err(AppError::TransportUnavailable(format!(
                "connection to {} is closed",
                self.address
            )));
        }
        // registered before the frame is queued, the response can not overtake it
        let pending = self.correlator.register();
        let mut envelope = RequestEnvelope::new(pending.trace_id, action);
        for (key, value) in params {
            envelope = envelope.with_param(key, *value);
        }
        envelope.body = body;

        let payload = match envelope.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                self.correlator.cancel(pending.trace_id);
                return Err(e);
            }
        };
        if self.request_tx.send(payload).await.is_err() {
            self.correlator.cancel(pending.trace_id);
            self.active.store(false, Ordering::Release);
            return Err(AppError::TransportUnavailable(format!(
                "writer of {} is gone",
                self.address
            )));
        }
        trace!("sent {} as trace {}", action, pending.trace_id);
        self.correlator.wait(pending, self.request_timeout).await
    }

    pub fn close(&self) {
        self.active.store(false, Ordering::Release);
        self.reader.abort();
        self.writer.abort();
        self.correlator.fail_all();
    }
}

impl Drop for MqClient {
    fn drop(&mut self) {
        self.close();
    }
}

async fn read_responses(
    mut connection: Connection<OwnedReadHalf>,
    correlator: Arc<Correlator>,
    active: Arc<AtomicBool>,
) {
    loop {
        match connection.read_frame().await {
            Ok(Some(frame)) => match ResponseEnvelope::from_json(&frame.payload) {
                Ok(response) => {
                    correlator.complete(response);
                }
                Err(e) => {
                    warn!("closing connection after bad response frame: {}", e);
                    break;
                }
            },
            Ok(None) => {
                debug!("broker closed the connection");
                break;
            }
            Err(e) => {
                warn!("read response error: {}", e);
                break;
            }
        }
    }
    active.store(false, Ordering::Release);
    correlator.fail_all();
}

async fn write_requests(
    mut writer: BufWriter<OwnedWriteHalf>,
    mut request_rx: mpsc::Receiver<String>,
    correlator: Arc<Correlator>,
    active: Arc<AtomicBool>,
) {
    while let Some(payload) = request_rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &payload).await {
            warn!("write request error: {}", e);
            active.store(false, Ordering::Release);
            correlator.fail_all();
            break;
        }
    }
    trace!("request writer exited");
}

/// Opens [`MqClient`] connections for the pool.
#[derive(Debug, Clone)]
pub struct MqClientFactory {
    config: ClientConfig,
}

impl MqClientFactory {
    pub fn new(config: ClientConfig) -> Self {
        MqClientFactory { config }
    }
}

impl ConnectionFactory for MqClientFactory {
    type Connection = MqClient;

    async fn create(&self) -> AppResult<MqClient> {
        MqClient::connect(&self.config).await
    }

    fn validate(&self, connection: &MqClient) -> bool {
        connection.is_active()
    }

    fn destroy(&self, connection: MqClient) {
        trace!("closing connection to {}", connection.address());
        connection.close();
    }
}

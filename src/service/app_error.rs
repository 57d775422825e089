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

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// broker level errors
    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("subscription not found: topic={topic} consumer={consumer_id}")]
    SubscriptionNotFound { topic: String, consumer_id: String },

    #[error("message too large: {0}")]
    MessageTooLarge(String),

    /// client side errors
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("request {0} timed out")]
    RequestTimeout(i64),

    #[error("connection pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("remote error: {0}")]
    RemoteError(String),

    #[error("listener failed: {0}")]
    ListenerFailed(String),

    /// general errors
    #[error("illegal state: {0}")]
    IllegalStateError(String),

    #[error("malformed protocol : {0}")]
    MalformedProtocol(String),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("I/O error: {0}")]
    DetailedIoError(String),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("channel send error: {0}")]
    ChannelSendError(String),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),

    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// marker error, the frame buffer does not hold a full frame yet
    #[error("incomplete frame")]
    Incomplete,
}

impl AppError {
    /// Errors that mean the connection itself is unusable and should not go back to the pool.
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            AppError::TransportUnavailable(_)
                | AppError::IoError(_)
                | AppError::DetailedIoError(_)
                | AppError::MalformedProtocol(_)
        )
    }
}

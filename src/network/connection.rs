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

use std::io::{self, ErrorKind};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::Frame;
use crate::AppResult;

/// Read side of a framed connection.
///
/// Owns the read half of a socket and a buffer that accumulates bytes until a whole
/// delimited frame is available. Used by both the broker and the client.
#[derive(Debug)]
pub struct Connection<R> {
    reader: R,
    buffer: BytesMut,
    max_frame_length: usize,
}

impl<R: AsyncRead + Unpin> Connection<R> {
    pub fn new(reader: R, buffer_size: usize, max_frame_length: usize) -> Connection<R> {
        Connection {
            reader,
            buffer: BytesMut::with_capacity(buffer_size),
            max_frame_length,
        }
    }

    /// Reads the next frame.
    ///
    /// An oversized frame is an error and the connection should be closed. Returns `None`
    /// when the peer closed the connection between frames, an error when it closed in the
    /// middle of one.
    pub async fn read_frame(&mut self) -> AppResult<Option<Frame>> {
        loop {
            if let Some(frame) = Frame::parse(&mut self.buffer, self.max_frame_length)? {
                return Ok(Some(frame));
            }
            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(
                        io::Error::new(ErrorKind::ConnectionReset, "connection reset by peer")
                            .into(),
                    )
                };
            }
        }
    }
}

/// Writes `payload` as one frame and flushes it.
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, payload: &str) -> AppResult<()> {
    let frame = Frame::encode(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use tokio::io::duplex;

    use super::*;
    use crate::AppError;

    #[tokio::test]
    async fn reads_frames_written_in_pieces() {
        let (client, server) = duplex(64);
        let (_, mut writer) = tokio::io::split(client);
        let (reader, _) = tokio::io::split(server);
        let mut connection = Connection::new(reader, 16, 1024);

        let writing = tokio::spawn(async move {
            write_frame(&mut writer, "first").await.unwrap();
            writer.write_all(b"sec").await.unwrap();
            writer.write_all(b"ond\r\n$$\r\n").await.unwrap();
        });

        assert_eq!(connection.read_frame().await.unwrap().unwrap().payload, "first");
        assert_eq!(connection.read_frame().await.unwrap().unwrap().payload, "second");
        writing.await.unwrap();
        assert!(connection.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_inside_a_frame_is_an_error() {
        let (mut client, server) = duplex(64);
        let mut connection = Connection::new(server, 16, 1024);
        client.write_all(b"half a fra").await.unwrap();
        drop(client);
        assert!(matches!(
            connection.read_frame().await,
            Err(AppError::IoError(_))
        ));
    }
}

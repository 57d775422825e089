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

use bytes::{Buf, BufMut, BytesMut};

use crate::protocol::DELIMITER;
use crate::AppError::Incomplete;
use crate::{AppError, AppResult};

/// One delimited frame read off the wire, without its delimiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: String,
}

impl Frame {
    /// Returns the length of the payload in front of the first delimiter.
    pub fn check(buffer: &BytesMut, max_frame_length: usize) -> AppResult<usize> {
        match find_delimiter(buffer) {
            Some(length) if length > max_frame_length => Err(AppError::MalformedProtocol(
                format!("Frame of length {} is too large.", length),
            )),
            Some(length) => Ok(length),
            // keep the delimiter's own bytes out of the length check, it may be half read
            None if buffer.remaining() > max_frame_length + DELIMITER.len() => {
                Err(AppError::MalformedProtocol(format!(
                    "no delimiter within {} bytes",
                    max_frame_length
                )))
            }
            None => Err(Incomplete),
        }
    }

    pub fn parse(buffer: &mut BytesMut, max_frame_length: usize) -> AppResult<Option<Frame>> {
        match Frame::check(buffer, max_frame_length) {
            Ok(length) => {
                let payload = buffer.split_to(length);
                buffer.advance(DELIMITER.len());
                let payload = String::from_utf8(payload.to_vec()).map_err(|e| {
                    AppError::MalformedProtocol(format!("frame is not utf-8: {}", e))
                })?;
                Ok(Some(Frame { payload }))
            }
            Err(AppError::Incomplete) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Payload followed by the delimiter, ready for the socket.
    pub fn encode(payload: &str) -> BytesMut {
        let mut buffer = BytesMut::with_capacity(payload.len() + DELIMITER.len());
        buffer.put_slice(payload.as_bytes());
        buffer.put_slice(DELIMITER);
        buffer
    }
}

fn find_delimiter(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(DELIMITER.len())
        .position(|window| window == DELIMITER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_back_to_back_frames() {
        let mut buffer = Frame::encode("{\"a\":1}");
        buffer.extend_from_slice(&Frame::encode("second"));
        buffer.extend_from_slice(b"part");

        let first = Frame::parse(&mut buffer, 64).unwrap().unwrap();
        assert_eq!(first.payload, "{\"a\":1}");
        let second = Frame::parse(&mut buffer, 64).unwrap().unwrap();
        assert_eq!(second.payload, "second");
        assert!(Frame::parse(&mut buffer, 64).unwrap().is_none());
        assert_eq!(&buffer[..], b"part");
    }

    #[test]
    fn waits_for_split_delimiter() {
        let mut buffer = BytesMut::from(&b"hello\r\n$"[..]);
        assert!(Frame::parse(&mut buffer, 64).unwrap().is_none());
        buffer.extend_from_slice(b"$\r\n");
        assert_eq!(Frame::parse(&mut buffer, 64).unwrap().unwrap().payload, "hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn rejects_oversized_frames() {
        let mut buffer = Frame::encode(&"x".repeat(20));
        assert!(matches!(
            Frame::parse(&mut buffer, 10),
            Err(AppError::MalformedProtocol(_))
        ));

        let mut unterminated = BytesMut::from(&[b'y'; 40][..]);
        assert!(matches!(
            Frame::parse(&mut unterminated, 10),
            Err(AppError::MalformedProtocol(_))
        ));
    }

    #[test]
    fn empty_frame() {
        let mut buffer = Frame::encode("");
        assert_eq!(Frame::parse(&mut buffer, 10).unwrap().unwrap().payload, "");
    }
}

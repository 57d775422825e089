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

//! Record framing: a fixed width ascii decimal length header followed by the payload.

use crate::{AppError, AppResult};

/// Width of the zero padded decimal length header in front of every record.
pub const RECORD_HEADER_WIDTH: usize = 10;

const MAX_PAYLOAD_LEN: usize = 9_999_999_999;

pub fn encode_header(payload_len: usize) -> AppResult<String> {
    if payload_len > MAX_PAYLOAD_LEN {
        return Err(AppError::MessageTooLarge(format!(
            "payload of {} bytes does not fit the record header",
            payload_len
        )));
    }
    Ok(format!(
        "{:0width$}",
        payload_len,
        width = RECORD_HEADER_WIDTH
    ))
}

/// Decodes a record header, `None` for unused space or anything that is not a positive length.
pub fn decode_header(header: &[u8]) -> Option<usize> {
    if header.len() != RECORD_HEADER_WIDTH || header[RECORD_HEADER_WIDTH - 1] == 0 {
        return None;
    }
    let text = std::str::from_utf8(header).ok()?;
    match text.trim().parse::<usize>() {
        Ok(len) if len > 0 => Some(len),
        _ => None,
    }
}

/// Header and payload in one buffer, so the record is written with a single copy.
pub fn frame_payload(payload: &[u8]) -> AppResult<Vec<u8>> {
    let header = encode_header(payload.len())?;
    let mut record = Vec::with_capacity(RECORD_HEADER_WIDTH + payload.len());
    record.extend_from_slice(header.as_bytes());
    record.extend_from_slice(payload);
    Ok(record)
}

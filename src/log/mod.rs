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

//! Topic log storage.
//!
//! This module provides:
//! - fixed size, memory mapped segment files
//! - record framing with a fixed width length header
//! - the in memory offset index, rebuilt by replaying the segments at startup
//! - the per topic message store tying them together

mod indexer;
mod message_store;
mod record;
mod segment_file;

// Re-exports
pub use indexer::{IndexEntry, Indexer, SegmentBoundary, TopicIndex};
pub use message_store::MessageStore;
pub use record::{decode_header, encode_header, frame_payload, RECORD_HEADER_WIDTH};
pub use segment_file::{ReplayedRecord, SegmentFile};

/// Suffix of segment file names, `<segment index>.dat`.
pub const SEGMENT_FILE_SUFFIX: &str = "dat";

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

//! In memory offset index.
//!
//! For every topic the indexer maps a global offset to the record's length and segment,
//! keeps the records in write order, and remembers the sealed boundary of every segment
//! that is no longer the active one. Entries are only ever added; the index of a topic
//! is dropped as a whole when its store is reopened.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

/// Location of one stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// global offset
    pub offset: i64,
    /// header plus payload
    pub length: usize,
    pub segment_index: u32,
}

/// End of the last record of a sealed segment, as a global offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentBoundary {
    pub segment_index: u32,
    pub max_offset: i64,
}

/// The index of a single topic.
#[derive(Debug, Default)]
pub struct TopicIndex {
    mappings: DashMap<i64, IndexEntry>,
    entries: RwLock<Vec<IndexEntry>>,
    boundaries: DashMap<u32, SegmentBoundary>,
}

impl TopicIndex {
    pub fn add_entry(&self, offset: i64, length: usize, segment_index: u32) {
        let entry = IndexEntry {
            offset,
            length,
            segment_index,
        };
        self.entries.write().push(entry);
        self.mappings.insert(offset, entry);
    }

    /// Records the boundary of a sealed segment, the first one recorded wins.
    pub fn add_file_segment(&self, segment_index: u32, max_offset: i64) {
        self.boundaries
            .entry(segment_index)
            .or_insert(SegmentBoundary {
                segment_index,
                max_offset,
            });
    }

    pub fn get_entry(&self, offset: i64) -> Option<IndexEntry> {
        self.mappings.get(&offset).map(|entry| *entry)
    }

    pub fn get_file_segment(&self, segment_index: u32) -> Option<SegmentBoundary> {
        self.boundaries.get(&segment_index).map(|b| *b)
    }

    pub fn get_entries(&self) -> Vec<IndexEntry> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Offset index of every topic owned by one broker.
#[derive(Debug, Default)]
pub struct Indexer {
    topics: DashMap<String, Arc<TopicIndex>>,
}

impl Indexer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The index of `topic`, created empty on first use.
    pub fn topic(&self, topic: &str) -> Arc<TopicIndex> {
        if let Some(index) = self.topics.get(topic) {
            return index.clone();
        }
        self.topics
            .entry(topic.to_string())
            .or_default()
            .clone()
    }

    /// Replaces the index of `topic` with an empty one, used before a store replays its segments.
    pub fn reset_topic(&self, topic: &str) -> Arc<TopicIndex> {
        let index = Arc::new(TopicIndex::default());
        self.topics.insert(topic.to_string(), index.clone());
        index
    }

    pub fn add_entry(&self, topic: &str, offset: i64, length: usize, segment_index: u32) {
        self.topic(topic).add_entry(offset, length, segment_index);
    }

    pub fn add_file_segment(&self, topic: &str, segment_index: u32, max_offset: i64) {
        self.topic(topic)
            .add_file_segment(segment_index, max_offset);
    }

    pub fn get_entry(&self, topic: &str, offset: i64) -> Option<IndexEntry> {
        self.topics.get(topic)?.get_entry(offset)
    }

    pub fn get_file_segment(&self, topic: &str, segment_index: u32) -> Option<SegmentBoundary> {
        self.topics.get(topic)?.get_file_segment(segment_index)
    }

    pub fn get_entries(&self, topic: &str) -> Option<Vec<IndexEntry>> {
        self.topics.get(topic).map(|index| index.get_entries())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_by_topic_and_offset() {
        let indexer = Indexer::new();
        indexer.add_entry("t1", 0, 120, 0);
        indexer.add_entry("t1", 120, 98, 0);
        indexer.add_entry("t2", 0, 50, 0);

        assert_eq!(
            indexer.get_entry("t1", 120),
            Some(IndexEntry {
                offset: 120,
                length: 98,
                segment_index: 0
            })
        );
        assert_eq!(indexer.get_entry("t1", 50), None);
        assert_eq!(indexer.get_entry("t3", 0), None);
        assert_eq!(indexer.get_entries("t1").unwrap().len(), 2);
        assert_eq!(indexer.get_entries("t2").unwrap().len(), 1);
        assert!(indexer.get_entries("t3").is_none());
    }

    #[test]
    fn first_boundary_wins() {
        let indexer = Indexer::new();
        indexer.add_file_segment("t1", 0, 10200);
        indexer.add_file_segment("t1", 0, 9000);
        assert_eq!(
            indexer.get_file_segment("t1", 0),
            Some(SegmentBoundary {
                segment_index: 0,
                max_offset: 10200
            })
        );
        assert_eq!(indexer.get_file_segment("t1", 1), None);
    }

    #[test]
    fn reset_drops_previous_entries() {
        let indexer = Indexer::new();
        indexer.add_entry("t1", 0, 10, 0);
        let fresh = indexer.reset_topic("t1");
        assert!(fresh.is_empty());
        assert_eq!(indexer.get_entry("t1", 0), None);
    }
}

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

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use crate::message::Message;
use crate::{AppError, AppResult};

use super::indexer::{IndexEntry, Indexer, TopicIndex};
use super::record::{frame_payload, RECORD_HEADER_WIDTH};
use super::segment_file::SegmentFile;
use super::SEGMENT_FILE_SUFFIX;

/// Write side of the store: the segment being appended to and the local write position.
#[derive(Debug)]
struct ActiveSegment {
    segment: Arc<SegmentFile>,
    position: usize,
}

impl ActiveSegment {
    fn remaining(&self) -> usize {
        self.segment.capacity() - self.position
    }
}

/// Append only message log of one topic.
///
/// The log is a sequence of fixed size segment files `<index>.dat` in the topic's
/// directory. A message's offset is its byte position in the log:
/// `segment_index * segment_size + position_in_segment`.
///
/// Writes are serialized by the active segment lock, which also covers the decision to
/// roll to a new segment. Reads take no lock, they resolve the offset through the index
/// and copy the record out of the segment mapping.
#[derive(Debug)]
pub struct MessageStore {
    topic: String,
    dir: PathBuf,
    segment_size: usize,
    index: Arc<TopicIndex>,
    segments: DashMap<u32, Arc<SegmentFile>>,
    active: Mutex<ActiveSegment>,
}

impl MessageStore {
    /// Opens the log of `topic` under `storage_dir`, replaying every existing segment into
    /// `indexer`. A topic without segments starts with an empty segment 0.
    pub fn open(
        topic: &str,
        storage_dir: impl AsRef<Path>,
        segment_size: usize,
        indexer: &Indexer,
    ) -> AppResult<Self> {
        if segment_size <= RECORD_HEADER_WIDTH {
            return Err(AppError::InvalidValue(format!(
                "segment size {} is too small",
                segment_size
            )));
        }
        let dir = storage_dir.as_ref().join(topic);
        std::fs::create_dir_all(&dir).map_err(|e| {
            AppError::DetailedIoError(format!(
                "create topic dir: {} error: {}",
                dir.display(),
                e
            ))
        })?;

        let mut segment_indexes = Self::list_segments(&dir)?;
        segment_indexes.sort_unstable();

        let index = indexer.reset_topic(topic);
        let segments = DashMap::new();

        let active = match segment_indexes.last().copied() {
            None => {
                let segment = Arc::new(SegmentFile::open(&dir, 0, segment_size)?);
                segments.insert(0, segment.clone());
                info!("topic {} has no segments, created segment 0", topic);
                ActiveSegment {
                    segment,
                    position: 0,
                }
            }
            Some(last_index) => {
                let mut active = None;
                for segment_index in segment_indexes {
                    let segment = Arc::new(SegmentFile::open(&dir, segment_index, segment_size)?);
                    let base_offset = segment_index as i64 * segment_size as i64;
                    let (records, end) = segment.replay();
                    for record in &records {
                        index.add_entry(
                            base_offset + record.position as i64,
                            record.length,
                            segment_index,
                        );
                    }
                    debug!(
                        "replayed segment {} of topic {}: {} records, end at {}",
                        segment_index,
                        topic,
                        records.len(),
                        end
                    );
                    if segment_index == last_index {
                        active = Some(ActiveSegment {
                            segment: segment.clone(),
                            position: end,
                        });
                    } else {
                        index.add_file_segment(segment_index, base_offset + end as i64);
                    }
                    segments.insert(segment_index, segment);
                }
                active.ok_or_else(|| {
                    AppError::IllegalStateError(format!("no active segment for topic {}", topic))
                })?
            }
        };

        info!(
            "opened topic {} with {} segments, {} messages, write position {}",
            topic,
            segments.len(),
            index.len(),
            active.segment.index() as i64 * segment_size as i64 + active.position as i64
        );

        Ok(MessageStore {
            topic: topic.to_string(),
            dir,
            segment_size,
            index,
            segments,
            active: Mutex::new(active),
        })
    }

    fn list_segments(dir: &Path) -> AppResult<Vec<u32>> {
        let mut indexes = Vec::new();
        let read_dir = std::fs::read_dir(dir).map_err(|e| {
            AppError::DetailedIoError(format!("read dir: {} error: {}", dir.display(), e))
        })?;
        for file in read_dir {
            let file = file?;
            if !file.file_type()?.is_file() {
                continue;
            }
            let path = file.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(SEGMENT_FILE_SUFFIX) {
                continue;
            }
            match path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.parse::<u32>().ok())
            {
                Some(segment_index) => indexes.push(segment_index),
                None => warn!("invalid segment file name: {}", path.display()),
            }
        }
        Ok(indexes)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn global_offset(&self, segment_index: u32, position: usize) -> i64 {
        segment_index as i64 * self.segment_size as i64 + position as i64
    }

    /// Stamps `offset` into the message and frames its final serialized form.
    fn frame(message: &mut Message, offset: i64) -> AppResult<Vec<u8>> {
        message.set_offset(offset);
        let payload = message.to_json()?;
        frame_payload(payload.as_bytes())
    }

    /// Appends `message`, stamping the assigned offset into its headers. Returns the offset.
    pub fn write(&self, message: &mut Message) -> AppResult<i64> {
        let mut active = self.active.lock();

        let mut segment_index = active.segment.index();
        let mut offset = self.global_offset(segment_index, active.position);
        let mut record = Self::frame(message, offset)?;

        if record.len() > active.remaining() {
            // the stamped offset changes the serialized size, frame again for the next segment
            let next_offset = self.global_offset(segment_index + 1, 0);
            let rolled = Self::frame(message, next_offset)?;
            if rolled.len() > self.segment_size {
                return Err(AppError::MessageTooLarge(format!(
                    "record of {} bytes does not fit a segment of {} bytes",
                    rolled.len(),
                    self.segment_size
                )));
            }
            self.roll(&mut active)?;
            segment_index = active.segment.index();
            offset = next_offset;
            record = rolled;
        }

        // SAFETY: we hold the write lock, and bytes from `position` on are not indexed yet.
        unsafe {
            active.segment.write_at(active.position, &record)?;
        }
        // publish only after the bytes are in place
        self.index.add_entry(offset, record.len(), segment_index);
        active.position += record.len();

        trace!(
            "topic {} wrote {} bytes at offset {}",
            self.topic,
            record.len(),
            offset
        );
        Ok(offset)
    }

    /// Seals the active segment and opens the next one.
    fn roll(&self, active: &mut ActiveSegment) -> AppResult<()> {
        let sealed = active.segment.index();
        let max_offset = self.global_offset(sealed, active.position);
        self.index.add_file_segment(sealed, max_offset);
        if let Err(e) = active.segment.flush() {
            error!("flush sealed segment {} of topic {}: {}", sealed, self.topic, e);
        }

        let next = Arc::new(SegmentFile::open(&self.dir, sealed + 1, self.segment_size)?);
        self.segments.insert(sealed + 1, next.clone());
        info!(
            "topic {} sealed segment {} at offset {}, rolled to segment {}",
            self.topic,
            sealed,
            max_offset,
            sealed + 1
        );
        active.segment = next;
        active.position = 0;
        Ok(())
    }

    /// Reads the message stored at `offset`, `None` when nothing is stored there (yet).
    pub fn read(&self, offset: i64) -> AppResult<Option<Message>> {
        if offset < 0 {
            return Ok(None);
        }
        let segment_index = (offset / self.segment_size as i64) as u32;
        let position = (offset % self.segment_size as i64) as usize;

        let segment = match self.segments.get(&segment_index) {
            Some(segment) => segment.clone(),
            None => return Ok(None),
        };
        let entry = match self.index.get_entry(offset) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let payload = segment
            .read_at(
                position + RECORD_HEADER_WIDTH,
                entry.length - RECORD_HEADER_WIDTH,
            )
            .ok_or_else(|| {
                AppError::IllegalStateError(format!(
                    "index entry {:?} of topic {} points outside its segment",
                    entry, self.topic
                ))
            })?;
        let json = String::from_utf8(payload).map_err(|e| {
            AppError::MalformedProtocol(format!(
                "record at offset {} of topic {} is not utf-8: {}",
                offset, self.topic, e
            ))
        })?;
        Message::from_json(&json).map(Some)
    }

    pub fn entry(&self, offset: i64) -> Option<IndexEntry> {
        self.index.get_entry(offset)
    }

    /// Offset of the record following the one at `offset`.
    ///
    /// When the record is the last one of a sealed segment the next record lives at the
    /// start of the following segment, not right after it.
    pub fn next_offset(&self, offset: i64, entry: &IndexEntry) -> i64 {
        let expected = offset + entry.length as i64;
        if let Some(boundary) = self.index.get_file_segment(entry.segment_index) {
            let next_index = entry.segment_index + 1;
            if expected >= boundary.max_offset && self.segments.contains_key(&next_index) {
                return self.global_offset(next_index, 0);
            }
        }
        expected
    }

    /// Current global write offset.
    pub fn pos(&self) -> i64 {
        let active = self.active.lock();
        self.global_offset(active.segment.index(), active.position)
    }

    /// Number of messages ever written.
    pub fn total(&self) -> usize {
        self.index.len()
    }

    pub fn flush(&self) -> AppResult<()> {
        self.active.lock().segment.flush()
    }
}

impl Drop for MessageStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            error!("flush topic {} on close: {}", self.topic, e);
        }
        debug!("message store of topic {} closed", self.topic);
    }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};
    use tempfile::{tempdir, TempDir};

    use super::*;
    use crate::message::OFFSET_HEADER;

    const SEGMENT_SIZE: usize = 1024;

    #[fixture]
    fn storage() -> TempDir {
        tempdir().unwrap()
    }

    fn message(body: &str) -> Message {
        Message::create(body)
    }

    #[rstest]
    fn offsets_are_monotonic(storage: TempDir) {
        let indexer = Indexer::new();
        let store = MessageStore::open("t1", storage.path(), SEGMENT_SIZE, &indexer).unwrap();
        let mut last = -1;
        for i in 0..50 {
            let offset = store.write(&mut message(&format!("body-{}", i))).unwrap();
            assert!(offset > last);
            last = offset;
        }
        assert_eq!(store.total(), 50);
    }

    #[rstest]
    fn read_returns_written_message(storage: TempDir) {
        let indexer = Indexer::new();
        let store = MessageStore::open("t1", storage.path(), SEGMENT_SIZE, &indexer).unwrap();
        let mut sent = message("{\"order\":1}").with_header("k", "v");
        let offset = store.write(&mut sent).unwrap();
        assert_eq!(offset, 0);
        assert_eq!(sent.headers.get(OFFSET_HEADER).unwrap(), "0");

        let read = store.read(offset).unwrap().unwrap();
        assert_eq!(read, sent);
        assert_eq!(read.offset(), Some(0));
        assert_eq!(read.headers.get("k").unwrap(), "v");
    }

    #[rstest]
    fn missing_offsets_read_none(storage: TempDir) {
        let indexer = Indexer::new();
        let store = MessageStore::open("t1", storage.path(), SEGMENT_SIZE, &indexer).unwrap();
        let offset = store.write(&mut message("a")).unwrap();
        assert!(store.read(offset + 1).unwrap().is_none());
        assert!(store.read(store.pos()).unwrap().is_none());
        assert!(store.read(-1).unwrap().is_none());
        assert!(store.read(SEGMENT_SIZE as i64 * 7).unwrap().is_none());
    }

    #[rstest]
    fn rolls_to_new_segment_when_full(storage: TempDir) {
        let indexer = Indexer::new();
        let store = MessageStore::open("t1", storage.path(), SEGMENT_SIZE, &indexer).unwrap();
        let body = "x".repeat(200);
        let mut offsets = vec![];
        for _ in 0..12 {
            offsets.push(store.write(&mut message(&body)).unwrap());
        }
        assert!(store.segment_count() >= 3);
        assert!(storage.path().join("t1").join("1.dat").exists());
        assert!(storage.path().join("t1").join("2.dat").exists());

        for offset in &offsets {
            let read = store.read(*offset).unwrap().unwrap();
            assert_eq!(read.offset(), Some(*offset));
            assert_eq!(read.body, body);
        }

        // walking with next_offset visits every record across segment boundaries
        let mut walked = vec![];
        let mut offset = 0;
        while let Some(entry) = store.entry(offset) {
            walked.push(offset);
            offset = store.next_offset(offset, &entry);
        }
        assert_eq!(walked, offsets);
    }

    #[rstest]
    fn sealed_boundary_is_end_of_last_record(storage: TempDir) {
        let indexer = Indexer::new();
        let store = MessageStore::open("t1", storage.path(), SEGMENT_SIZE, &indexer).unwrap();
        let body = "y".repeat(300);
        let mut offsets = vec![];
        while store.segment_count() < 2 {
            offsets.push(store.write(&mut message(&body)).unwrap());
        }
        let last_in_first = offsets[offsets.len() - 2];
        let entry = store.entry(last_in_first).unwrap();
        let boundary = indexer.get_file_segment("t1", 0).unwrap();
        assert_eq!(boundary.max_offset, last_in_first + entry.length as i64);
        assert_eq!(*offsets.last().unwrap(), SEGMENT_SIZE as i64);
    }

    #[rstest]
    fn message_larger_than_segment_is_rejected(storage: TempDir) {
        let indexer = Indexer::new();
        let store = MessageStore::open("t1", storage.path(), SEGMENT_SIZE, &indexer).unwrap();
        store.write(&mut message("small")).unwrap();
        let result = store.write(&mut message(&"z".repeat(SEGMENT_SIZE)));
        assert!(matches!(result, Err(AppError::MessageTooLarge(_))));
        // no empty segment was created for the rejected record
        assert_eq!(store.segment_count(), 1);
        assert_eq!(store.total(), 1);
    }

    #[rstest]
    fn reopen_replays_segments(storage: TempDir) {
        let body = "r".repeat(150);
        let (offsets, pos) = {
            let indexer = Indexer::new();
            let store = MessageStore::open("t1", storage.path(), SEGMENT_SIZE, &indexer).unwrap();
            let offsets: Vec<i64> = (0..20)
                .map(|_| store.write(&mut message(&body)).unwrap())
                .collect();
            (offsets, store.pos())
        };

        let indexer = Indexer::new();
        let store = MessageStore::open("t1", storage.path(), SEGMENT_SIZE, &indexer).unwrap();
        assert_eq!(store.total(), 20);
        assert_eq!(store.pos(), pos);
        for offset in &offsets {
            assert_eq!(store.read(*offset).unwrap().unwrap().offset(), Some(*offset));
        }
        // every segment but the newest got its boundary back
        let last_segment = (pos / SEGMENT_SIZE as i64) as u32;
        for segment_index in 0..last_segment {
            assert!(indexer.get_file_segment("t1", segment_index).is_some());
        }
        assert!(indexer.get_file_segment("t1", last_segment).is_none());

        // writing continues after the replayed tail
        let next = store.write(&mut message("after restart")).unwrap();
        assert_eq!(next, pos);
    }

    #[rstest]
    fn reopen_with_same_indexer_does_not_duplicate(storage: TempDir) {
        let indexer = Indexer::new();
        {
            let store = MessageStore::open("t1", storage.path(), SEGMENT_SIZE, &indexer).unwrap();
            store.write(&mut message("one")).unwrap();
            store.write(&mut message("two")).unwrap();
        }
        let store = MessageStore::open("t1", storage.path(), SEGMENT_SIZE, &indexer).unwrap();
        assert_eq!(store.total(), 2);
    }

    #[rstest]
    fn concurrent_writers_get_distinct_offsets(storage: TempDir) {
        let indexer = Indexer::new();
        let store = Arc::new(
            MessageStore::open("t1", storage.path(), SEGMENT_SIZE, &indexer).unwrap(),
        );
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..25)
                        .map(|i| {
                            store
                                .write(&mut Message::create(format!("{}-{}", t, i)))
                                .unwrap()
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut offsets: Vec<i64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        offsets.sort_unstable();
        offsets.dedup();
        assert_eq!(offsets.len(), 100);
        assert_eq!(store.total(), 100);
        for offset in offsets {
            assert!(store.read(offset).unwrap().is_some());
        }
    }
}

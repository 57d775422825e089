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

use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::{MmapOptions, MmapRaw};
use tracing::trace;

use crate::{AppError, AppResult};

use super::record::{decode_header, RECORD_HEADER_WIDTH};
use super::SEGMENT_FILE_SUFFIX;

/// One fixed size segment file of a topic log, mapped into memory.
///
/// The mapping is shared: the store's single writer appends through `write_at`,
/// readers copy committed byte ranges out with `read_at`. Neither side keeps a
/// cursor in the mapping, every access is positional.
#[derive(Debug)]
pub struct SegmentFile {
    index: u32,
    path: PathBuf,
    capacity: usize,
    mmap: MmapRaw,
    writable: bool,
    _file: File,
}

/// A record found while replaying a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayedRecord {
    /// position inside the segment
    pub position: usize,
    /// header plus payload
    pub length: usize,
}

impl SegmentFile {
    pub fn file_name(dir: impl AsRef<Path>, index: u32) -> PathBuf {
        dir.as_ref()
            .join(format!("{}.{}", index, SEGMENT_FILE_SUFFIX))
    }

    /// Opens the segment, creating and zero filling it when it does not exist yet.
    pub fn open(dir: impl AsRef<Path>, index: u32, capacity: usize) -> AppResult<Self> {
        let path = Self::file_name(dir, index);
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                AppError::DetailedIoError(format!(
                    "open segment file {} error: {}",
                    path.display(),
                    e
                ))
            })?;

        let len = file.metadata()?.len() as usize;
        if len > capacity {
            return Err(AppError::InvalidValue(format!(
                "segment file {} is {} bytes, larger than the configured segment size {}",
                path.display(),
                len,
                capacity
            )));
        }
        if len < capacity {
            file.set_len(capacity as u64)?;
        }

        let mmap = MmapOptions::new().len(capacity).map_raw(&file)?;
        trace!("mapped segment file {}", path.display());

        Ok(SegmentFile {
            index,
            path,
            capacity,
            mmap,
            writable: true,
            _file: file,
        })
    }

    /// Maps an existing segment for reading only. The file is never created or resized,
    /// and its length must be exactly `capacity`.
    pub fn open_read_only(dir: impl AsRef<Path>, index: u32, capacity: usize) -> AppResult<Self> {
        let path = Self::file_name(dir, index);
        let file = File::open(&path).map_err(|e| {
            AppError::DetailedIoError(format!(
                "open segment file {} error: {}",
                path.display(),
                e
            ))
        })?;

        let len = file.metadata()?.len() as usize;
        if len != capacity {
            return Err(AppError::InvalidValue(format!(
                "segment file {} is {} bytes, expected segment size {}",
                path.display(),
                len,
                capacity
            )));
        }

        let mmap = MmapOptions::new().len(capacity).map_raw_read_only(&file)?;
        trace!("mapped segment file {} read only", path.display());

        Ok(SegmentFile {
            index,
            path,
            capacity,
            mmap,
            writable: false,
            _file: file,
        })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copies `len` bytes starting at `position`, `None` when the range leaves the segment.
    pub fn read_at(&self, position: usize, len: usize) -> Option<Vec<u8>> {
        let end = position.checked_add(len)?;
        if end > self.capacity {
            return None;
        }
        let mut buf = vec![0u8; len];
        // SAFETY: the range is inside the mapping. Callers only read ranges that were
        // fully written before their index entry was published, and the writer never
        // touches a byte twice, so nothing writes this range concurrently.
        unsafe {
            std::ptr::copy_nonoverlapping(self.mmap.as_ptr().add(position), buf.as_mut_ptr(), len);
        }
        Some(buf)
    }

    /// Appends `bytes` at `position`.
    ///
    /// # Safety
    ///
    /// Only the owner of the topic's write lock may call this, and only on bytes that no
    /// index entry points at yet.
    pub(super) unsafe fn write_at(&self, position: usize, bytes: &[u8]) -> AppResult<()> {
        if !self.writable {
            return Err(AppError::IllegalStateError(format!(
                "segment {} is mapped read only",
                self.index
            )));
        }
        let end = position
            .checked_add(bytes.len())
            .filter(|end| *end <= self.capacity)
            .ok_or_else(|| {
                AppError::IllegalStateError(format!(
                    "write of {} bytes at {} overflows segment {}",
                    bytes.len(),
                    position,
                    self.index
                ))
            })?;
        std::ptr::copy_nonoverlapping(
            bytes.as_ptr(),
            self.mmap.as_mut_ptr().add(position),
            end - position,
        );
        Ok(())
    }

    pub fn flush(&self) -> AppResult<()> {
        if !self.writable {
            return Ok(());
        }
        self.mmap.flush().map_err(|e| {
            AppError::DetailedIoError(format!(
                "flush segment file {} error: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Walks the framed records from the start of the segment.
    ///
    /// Stops at the first header that does not decode to a positive length (zero filled
    /// tail space), or at a record that would run past the end of the segment.
    /// Returns the records and the position right after the last one.
    pub fn replay(&self) -> (Vec<ReplayedRecord>, usize) {
        let mut records = Vec::new();
        let mut position = 0usize;
        while position + RECORD_HEADER_WIDTH <= self.capacity {
            let header = match self.read_at(position, RECORD_HEADER_WIDTH) {
                Some(header) => header,
                None => break,
            };
            let payload_len = match decode_header(&header) {
                Some(len) => len,
                None => break,
            };
            let length = RECORD_HEADER_WIDTH + payload_len;
            if position + length > self.capacity {
                break;
            }
            records.push(ReplayedRecord { position, length });
            position += length;
        }
        (records, position)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::log::record::frame_payload;

    #[test]
    fn new_segment_is_zero_filled() {
        let dir = tempdir().unwrap();
        let segment = SegmentFile::open(dir.path(), 0, 256).unwrap();
        assert_eq!(std::fs::metadata(segment.path()).unwrap().len(), 256);
        assert_eq!(segment.read_at(0, 16).unwrap(), vec![0u8; 16]);
        assert!(segment.read_at(250, 10).is_none());
        let (records, end) = segment.replay();
        assert!(records.is_empty());
        assert_eq!(end, 0);
    }

    #[test]
    fn replay_finds_written_records() {
        let dir = tempdir().unwrap();
        let segment = SegmentFile::open(dir.path(), 3, 256).unwrap();
        let first = frame_payload(b"hello").unwrap();
        let second = frame_payload(b"segment").unwrap();
        unsafe {
            segment.write_at(0, &first).unwrap();
            segment.write_at(first.len(), &second).unwrap();
        }
        segment.flush().unwrap();
        drop(segment);

        let segment = SegmentFile::open(dir.path(), 3, 256).unwrap();
        let (records, end) = segment.replay();
        assert_eq!(
            records,
            vec![
                ReplayedRecord {
                    position: 0,
                    length: 15
                },
                ReplayedRecord {
                    position: 15,
                    length: 17
                },
            ]
        );
        assert_eq!(end, 32);
        assert_eq!(segment.read_at(25, 7).unwrap(), b"segment".to_vec());
    }

    #[test]
    fn oversized_existing_file_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(SegmentFile::file_name(dir.path(), 0), vec![0u8; 512]).unwrap();
        assert!(SegmentFile::open(dir.path(), 0, 256).is_err());
    }

    #[test]
    fn read_only_open_leaves_the_file_alone() {
        let dir = tempdir().unwrap();
        {
            let segment = SegmentFile::open(dir.path(), 0, 128).unwrap();
            unsafe { segment.write_at(0, &frame_payload(b"kept").unwrap()).unwrap() };
            segment.flush().unwrap();
        }
        let path = SegmentFile::file_name(dir.path(), 0);
        let before = std::fs::read(&path).unwrap();

        // a wrong size is refused instead of resizing the file
        assert!(matches!(
            SegmentFile::open_read_only(dir.path(), 0, 256),
            Err(AppError::InvalidValue(_))
        ));
        assert!(SegmentFile::open_read_only(dir.path(), 1, 128).is_err());
        assert!(!SegmentFile::file_name(dir.path(), 1).exists());

        let segment = SegmentFile::open_read_only(dir.path(), 0, 128).unwrap();
        let (records, end) = segment.replay();
        assert_eq!(records.len(), 1);
        assert_eq!(end, 14);
        assert_eq!(segment.read_at(10, 4).unwrap(), b"kept".to_vec());
        assert!(unsafe { segment.write_at(end, b"x") }.is_err());
        segment.flush().unwrap();
        drop(segment);

        assert_eq!(std::fs::read(&path).unwrap(), before);
    }

    #[test]
    fn write_past_end_fails() {
        let dir = tempdir().unwrap();
        let segment = SegmentFile::open(dir.path(), 0, 32).unwrap();
        let result = unsafe { segment.write_at(30, b"abcd") };
        assert!(result.is_err());
    }
}

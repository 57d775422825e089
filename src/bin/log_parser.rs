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

use chrono::{DateTime, Local};
use clap::{Parser, Subcommand};
use pebblemq::log::{SegmentFile, RECORD_HEADER_WIDTH, SEGMENT_FILE_SUFFIX};
use pebblemq::message::Message;
use pebblemq::{AppError, AppResult};

#[derive(Parser)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// dump every record of a topic directory
    Segments {
        #[arg(short, long)]
        dir: PathBuf,
        /// defaults to the length of the first segment file
        #[arg(short, long)]
        segment_size: Option<usize>,
        /// print offsets and lengths only
        #[arg(short, long)]
        quiet: bool,
    },
}

fn main() -> AppResult<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Segments {
            dir,
            segment_size,
            quiet,
        } => parse_segments(dir, *segment_size, *quiet),
    }
}

fn segment_indexes(dir: &Path) -> AppResult<Vec<u32>> {
    let mut indexes = vec![];
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_FILE_SUFFIX) {
            continue;
        }
        if let Some(index) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u32>().ok())
        {
            indexes.push(index);
        }
    }
    indexes.sort_unstable();
    Ok(indexes)
}

fn detect_segment_size(dir: &Path, indexes: &[u32]) -> AppResult<usize> {
    let first = indexes.first().ok_or_else(|| {
        AppError::InvalidValue(format!("no segment files in {}", dir.display()))
    })?;
    let len = std::fs::metadata(SegmentFile::file_name(dir, *first))?.len();
    Ok(len as usize)
}

fn parse_segments(dir: &Path, segment_size: Option<usize>, quiet: bool) -> AppResult<()> {
    let indexes = segment_indexes(dir)?;
    let segment_size = match segment_size {
        Some(size) => size,
        None => detect_segment_size(dir, &indexes)?,
    };
    let mut total = 0;
    for index in indexes {
        let segment = SegmentFile::open_read_only(dir, index, segment_size)?;
        let modified: Option<DateTime<Local>> = std::fs::metadata(segment.path())
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::from);
        let (records, end) = segment.replay();
        println!(
            "segment {} ({}), {} records, {} of {} bytes used, modified {}",
            index,
            segment.path().display(),
            records.len(),
            end,
            segment_size,
            modified.map_or_else(
                || "-".to_string(),
                |t| t.format("%Y-%m-%d %H:%M:%S").to_string()
            )
        );
        let base = index as i64 * segment_size as i64;
        for record in &records {
            let offset = base + record.position as i64;
            if quiet {
                println!("  offset {} length {}", offset, record.length);
                continue;
            }
            let payload = segment
                .read_at(
                    record.position + RECORD_HEADER_WIDTH,
                    record.length - RECORD_HEADER_WIDTH,
                )
                .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default();
            match Message::from_json(&payload) {
                Ok(message) => println!(
                    "  offset {} id {} body {:?} headers {:?}",
                    offset, message.id, message.body, message.headers
                ),
                Err(_) => println!("  offset {} undecodable payload {:?}", offset, payload),
            }
        }
        if let Some(last) = records.last() {
            println!("  boundary {}", base + (last.position + last.length) as i64);
        }
        total += records.len();
    }
    println!("{} records in total", total);
    Ok(())
}

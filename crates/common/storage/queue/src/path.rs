// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Directory layout and data file naming.
//!
//! ```text
//! <root>/Data/2026.01.14.12.00.00.1234567.0000000001.dat
//! <root>/Poison/<same name as the data file it came from>
//! ```
//!
//! A name is the UTC creation time at 100ns resolution followed by a
//! disambiguating sequence number that starts at 1 and only grows when the
//! name for the same tick is already taken. Both parts are fixed width, so
//! plain string order equals enqueue order.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use snafu::ensure;

use crate::{Result, error::NameSpaceExhaustedSnafu, fs::FileSystem};

pub const DATA_DIR: &str = "Data";
pub const POISON_DIR: &str = "Poison";
pub const DATA_EXTENSION: &str = "dat";

/// Largest disambiguating sequence number for a single tick.
pub const MAX_SEQUENCE: u32 = i32::MAX as u32;

const TIMESTAMP_FORMAT: &str = "%Y.%m.%d.%H.%M.%S";
const TICKS_PER_SECOND: u32 = 10_000_000;
const NANOS_PER_TICK: u32 = 100;

pub fn data_dir<P: AsRef<Path>>(root: P) -> PathBuf { root.as_ref().join(DATA_DIR) }

pub fn poison_dir<P: AsRef<Path>>(root: P) -> PathBuf { root.as_ref().join(POISON_DIR) }

/// Formats `time` as `yyyy.MM.dd.HH.mm.ss.fffffff`.
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    // Leap seconds report nanoseconds past 1e9; clamp to keep the width fixed.
    let ticks = (time.nanosecond() / NANOS_PER_TICK).min(TICKS_PER_SECOND - 1);
    format!("{}.{ticks:07}", time.format(TIMESTAMP_FORMAT))
}

/// Generates a data file name: `<timestamp>.<sequence>.dat`.
pub fn data_file_name(timestamp: &str, sequence: u32) -> String {
    format!("{timestamp}.{sequence:010}.{DATA_EXTENSION}")
}

/// Parses a data file name back into its creation time and sequence.
pub fn parse_data_file_name(name: &str) -> Option<(DateTime<Utc>, u32)> {
    let stem = name.strip_suffix(DATA_EXTENSION)?.strip_suffix('.')?;
    let (timestamp, sequence) = stem.rsplit_once('.')?;
    let (seconds, ticks) = timestamp.rsplit_once('.')?;

    if ticks.len() != 7 || sequence.len() != 10 {
        return None;
    }
    let ticks: u32 = ticks.parse().ok()?;
    let sequence: u32 = sequence.parse().ok()?;
    if sequence == 0 || sequence > MAX_SEQUENCE {
        return None;
    }

    let naive = NaiveDateTime::parse_from_str(seconds, TIMESTAMP_FORMAT).ok()?;
    let time = naive.and_utc().with_nanosecond(ticks * NANOS_PER_TICK)?;
    Some((time, sequence))
}

pub fn is_data_file_name(name: &str) -> bool { parse_data_file_name(name).is_some() }

/// Finds the first sequence `>= start` whose name for `timestamp` is not
/// present in `dir`.
///
/// Returns the name and the sequence used. A name that cannot be stat'ed is
/// returned as free and left to `create_new` to settle. Running past
/// [`MAX_SEQUENCE`] is fatal.
pub fn next_free_name(
    fs: &dyn FileSystem,
    dir: &Path,
    timestamp: &str,
    start: u32,
) -> Result<(String, u32)> {
    let mut sequence = start.max(1);
    loop {
        ensure!(
            sequence <= MAX_SEQUENCE,
            NameSpaceExhaustedSnafu { timestamp }
        );
        let name = data_file_name(timestamp, sequence);
        if !matches!(fs.try_exists(&dir.join(&name)), Ok(true)) {
            return Ok((name, sequence));
        }
        sequence += 1;
    }
}

/// Async counterpart of [`next_free_name`].
pub async fn next_free_name_async(
    fs: &dyn FileSystem,
    dir: &Path,
    timestamp: &str,
    start: u32,
) -> Result<(String, u32)> {
    let mut sequence = start.max(1);
    loop {
        ensure!(
            sequence <= MAX_SEQUENCE,
            NameSpaceExhaustedSnafu { timestamp }
        );
        let name = data_file_name(timestamp, sequence);
        if !matches!(fs.try_exists_async(&dir.join(&name)).await, Ok(true)) {
            return Ok((name, sequence));
        }
        sequence += 1;
    }
}

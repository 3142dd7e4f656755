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

//! CRC32 checksum helpers for the [`Checksummed`](crate::Checksummed)
//! serializer adapter.
//!
//! Uses CRC-32 (IEEE polynomial) via crc32fast. The trailer is stored
//! little-endian after the payload.

use crc32fast::Hasher;

/// Size of the checksum trailer in bytes.
pub(crate) const CRC_SIZE: usize = 4;

#[inline]
pub(crate) fn calculate_crc(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Splits `framed` into payload and stored trailer.
///
/// Returns `None` when the buffer is too short to hold a trailer.
pub(crate) fn split_trailer(framed: &[u8]) -> Option<(&[u8], u32)> {
    let split = framed.len().checked_sub(CRC_SIZE)?;
    let (payload, trailer) = framed.split_at(split);
    let stored = u32::from_le_bytes(trailer.try_into().ok()?);
    Some((payload, stored))
}

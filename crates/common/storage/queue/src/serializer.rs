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

//! Serializer port.
//!
//! The queue never interprets the bytes of a data file; it hands a writer or
//! reader to a [`Serializer`] and treats the outcome as opaque. Any error
//! from [`Serializer::deserialize`] marks the file as corrupt.

use std::io::{Read, Write};

use serde::{Serialize, de::DeserializeOwned};
use snafu::{ResultExt, Snafu, ensure};

use crate::crc::{calculate_crc, split_trailer};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SerializerError {
    #[snafu(display("JSON codec error"))]
    Json { source: serde_json::Error },

    #[snafu(display("bincode encode error"))]
    BincodeEncode {
        source: bincode::error::EncodeError,
    },

    #[snafu(display("bincode decode error"))]
    BincodeDecode {
        source: bincode::error::DecodeError,
    },

    #[snafu(display("Checksum mismatch: stored {stored:#010x}, computed {computed:#010x}"))]
    ChecksumMismatch { stored: u32, computed: u32 },

    #[snafu(display("Payload of {len} bytes is too short to carry a checksum"))]
    Truncated { len: usize },

    #[snafu(display("Stream error"))]
    Stream { source: std::io::Error },
}

/// Converts items to and from an opaque byte stream.
pub trait Serializer<T>: Send + Sync {
    /// Write `item` to `writer`.
    fn serialize(&self, item: &T, writer: &mut dyn Write) -> Result<(), SerializerError>;

    /// Read one item from `reader`.
    fn deserialize(&self, reader: &mut dyn Read) -> Result<T, SerializerError>;
}

/// JSON via serde_json. The default serializer.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<T> Serializer<T> for JsonSerializer
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, item: &T, writer: &mut dyn Write) -> Result<(), SerializerError> {
        serde_json::to_writer(writer, item).context(JsonSnafu)
    }

    fn deserialize(&self, reader: &mut dyn Read) -> Result<T, SerializerError> {
        serde_json::from_reader(reader).context(JsonSnafu)
    }
}

/// Compact binary encoding via bincode's serde bridge.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeSerializer;

impl<T> Serializer<T> for BincodeSerializer
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, item: &T, mut writer: &mut dyn Write) -> Result<(), SerializerError> {
        bincode::serde::encode_into_std_write(item, &mut writer, bincode::config::standard())
            .context(BincodeEncodeSnafu)?;
        Ok(())
    }

    fn deserialize(&self, mut reader: &mut dyn Read) -> Result<T, SerializerError> {
        bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
            .context(BincodeDecodeSnafu)
    }
}

/// Wraps another serializer and appends a CRC32 trailer, so truncated or
/// bit-flipped files are detected even when the inner format would still
/// parse them.
#[derive(Debug, Clone, Copy, Default)]
pub struct Checksummed<S> {
    inner: S,
}

impl<S> Checksummed<S> {
    pub const fn new(inner: S) -> Self { Self { inner } }

    pub fn into_inner(self) -> S { self.inner }
}

impl<T, S> Serializer<T> for Checksummed<S>
where
    S: Serializer<T>,
{
    fn serialize(&self, item: &T, writer: &mut dyn Write) -> Result<(), SerializerError> {
        let mut payload = Vec::new();
        self.inner.serialize(item, &mut payload)?;
        let crc = calculate_crc(&payload);
        writer.write_all(&payload).context(StreamSnafu)?;
        writer.write_all(&crc.to_le_bytes()).context(StreamSnafu)
    }

    fn deserialize(&self, reader: &mut dyn Read) -> Result<T, SerializerError> {
        let mut framed = Vec::new();
        reader.read_to_end(&mut framed).context(StreamSnafu)?;
        let Some((payload, stored)) = split_trailer(&framed) else {
            return TruncatedSnafu { len: framed.len() }.fail();
        };
        let computed = calculate_crc(payload);
        ensure!(stored == computed, ChecksumMismatchSnafu { stored, computed });
        let mut payload = payload;
        self.inner.deserialize(&mut payload)
    }
}

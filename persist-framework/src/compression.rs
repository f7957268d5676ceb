/*!
Frame compression for binary sub-formats.

Each binary frame carries a flags byte saying how its payload was encoded,
so a reader always decodes with the codec the writer used, regardless of
the reader's own policy.
*/

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::io::{Read, Write};

use crate::{PersistError, Result};

/// Flag bit marking a gzip-compressed payload
pub const FLAG_GZIP: u8 = 0x01;

/// Payload codec selected from policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameCodec {
    /// Payload stored as-is
    Plain,
    /// DEFLATE (gzip) at the given level, 0-9
    Gzip { level: u32 },
}

impl FrameCodec {
    /// Build a gzip codec, validating the level
    pub fn gzip(level: u32) -> Result<Self> {
        if level > 9 {
            return Err(PersistError::configuration(format!(
                "Compression level {level} is out of range 0-9"
            )));
        }
        Ok(FrameCodec::Gzip { level })
    }

    /// Flags byte written in front of each frame
    pub fn flags(&self) -> u8 {
        match self {
            FrameCodec::Plain => 0,
            FrameCodec::Gzip { .. } => FLAG_GZIP,
        }
    }

    pub fn algorithm_name(&self) -> &'static str {
        match self {
            FrameCodec::Plain => "none",
            FrameCodec::Gzip { .. } => "gzip",
        }
    }

    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>> {
        match self {
            FrameCodec::Plain => Ok(payload.to_vec()),
            FrameCodec::Gzip { level } => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::new(*level));
                encoder.write_all(payload).map_err(|e| {
                    PersistError::storage(format!("Failed to write data for compression: {e}"))
                })?;
                encoder
                    .finish()
                    .map_err(|e| PersistError::storage(format!("Failed to finish compression: {e}")))
            }
        }
    }
}

/// Decode a frame payload according to its flags byte
///
/// Decompression stops once the output would exceed `max_len` bytes.
///
/// # Errors
/// * `PersistError::Format` - On unknown flag bits, corrupt compressed data,
///   or a payload that inflates past `max_len`
pub fn decode_frame(flags: u8, payload: &[u8], max_len: u32) -> Result<Vec<u8>> {
    if flags & !FLAG_GZIP != 0 {
        return Err(PersistError::format(format!(
            "Unknown frame flags {flags:#04x}"
        )));
    }
    if flags & FLAG_GZIP == 0 {
        return Ok(payload.to_vec());
    }

    let mut decoder = GzDecoder::new(payload).take(u64::from(max_len) + 1);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| PersistError::format(format!("Failed to decompress frame: {e}")))?;
    if decompressed.len() as u64 > u64::from(max_len) {
        return Err(PersistError::format(format!(
            "Decompressed frame exceeds the {max_len} byte limit"
        )));
    }
    Ok(decompressed)
}

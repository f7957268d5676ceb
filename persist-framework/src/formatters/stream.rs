/*!
Sequence layouts for byte-stream storages.

Text sequences are newline-delimited JSON:

```text
{"format":"persist-text","version":1}
["PropertySet",1,2,"visitId",1,903334,...]
...
```

Binary sequences start with a 4-byte header followed by one frame per object:

```text
"PSB" 0x01 | flags u8 | len u32 BE | payload | flags u8 | len u32 BE | payload | ...
```
*/

use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, Write};

use crate::compression::{decode_frame, FrameCodec};
use crate::{PersistError, Result};

/// Magic bytes plus layout version opening every binary sequence
pub const BINARY_HEADER: [u8; 4] = *b"PSB\x01";

/// Largest frame payload a reader accepts, both as stored and once decoded
pub const MAX_FRAME_LEN: u32 = 256 * 1024 * 1024;

const TEXT_FORMAT_NAME: &str = "persist-text";
const TEXT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct TextHeader {
    format: String,
    version: u32,
}

/// Whether the reader has no bytes left
pub fn at_end(reader: &mut dyn BufRead) -> Result<bool> {
    Ok(reader.fill_buf()?.is_empty())
}

pub fn write_text_header(writer: &mut dyn Write) -> Result<()> {
    let header = TextHeader {
        format: TEXT_FORMAT_NAME.to_string(),
        version: TEXT_VERSION,
    };
    let line = serde_json::to_string(&header)?;
    writeln!(writer, "{line}")?;
    Ok(())
}

pub fn write_text_record(writer: &mut dyn Write, line: &str) -> Result<()> {
    writeln!(writer, "{line}")?;
    Ok(())
}

/// Next line without its terminator, `None` at end of stream
pub fn read_text_line(reader: &mut dyn BufRead) -> Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    if line.ends_with('\n') {
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
    }
    Ok(Some(line))
}

/// Consume and validate the header line of a text sequence
///
/// # Errors
/// * `PersistError::Format` - If the first line is not a supported header
pub fn read_text_header(reader: &mut dyn BufRead) -> Result<()> {
    let line = read_text_line(reader)?
        .ok_or_else(|| PersistError::format("Text sequence is missing its header"))?;
    let header: TextHeader = serde_json::from_str(&line)
        .map_err(|e| PersistError::format(format!("Invalid text sequence header: {e}")))?;
    if header.format != TEXT_FORMAT_NAME {
        return Err(PersistError::format(format!(
            "Unexpected text sequence format '{}'",
            header.format
        )));
    }
    if header.version != TEXT_VERSION {
        return Err(PersistError::format(format!(
            "Unsupported text sequence version {}",
            header.version
        )));
    }
    Ok(())
}

pub fn write_binary_header(writer: &mut dyn Write) -> Result<()> {
    writer.write_all(&BINARY_HEADER)?;
    Ok(())
}

/// Consume and validate the header of a binary sequence
pub fn read_binary_header(reader: &mut dyn BufRead) -> Result<()> {
    let mut header = [0u8; 4];
    reader.read_exact(&mut header)?;
    if header != BINARY_HEADER {
        return Err(PersistError::format(format!(
            "Invalid binary sequence header {header:02x?}"
        )));
    }
    Ok(())
}

/// Encode `payload` with `codec` and write it as one frame
pub fn write_frame(writer: &mut dyn Write, codec: FrameCodec, payload: &[u8]) -> Result<()> {
    let encoded = codec.encode(payload)?;
    let len = u32::try_from(encoded.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_LEN)
        .ok_or_else(|| {
            PersistError::storage(format!(
                "Frame of {} bytes exceeds the {MAX_FRAME_LEN} byte limit",
                encoded.len()
            ))
        })?;

    let mut frame = BytesMut::with_capacity(5 + encoded.len());
    frame.put_u8(codec.flags());
    frame.put_u32(len);
    frame.put_slice(&encoded);
    writer.write_all(&frame)?;
    Ok(())
}

/// Read the next frame and return its decoded payload
///
/// # Errors
/// * `PersistError::Format` - On a truncated or oversized frame (before or
///   after decompression), or bad flags
pub fn read_frame(reader: &mut dyn BufRead) -> Result<Vec<u8>> {
    let mut prefix = [0u8; 5];
    reader.read_exact(&mut prefix)?;
    let flags = prefix[0];
    let len = u32::from_be_bytes([prefix[1], prefix[2], prefix[3], prefix[4]]);
    if len > MAX_FRAME_LEN {
        return Err(PersistError::format(format!(
            "Frame length {len} exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload)?;
    decode_frame(flags, &payload, MAX_FRAME_LEN)
}

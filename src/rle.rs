//! Run-length expansion of the base payload delivered by the backend.
//!
//! The payload is the header prefix followed by an opcode stream. The
//! expanded buffer keeps the prefix verbatim so that every offset recorded
//! in the header resolves against the expanded font.

use crate::editor::FontScanner;
use crate::error::{FontError, Result};

const OP_MASK: u8 = 0xC0;
const OP_COPY: u8 = 0x40;
const OP_FILL: u8 = 0x80;
const COUNT_WIDTH_MASK: u8 = 0x3F;

/// Expand `payload` (header prefix of `header_size` bytes, then the RLE
/// stream) into prefix + raw font bytes.
pub fn expand_base(payload: &[u8], header_size: usize) -> Result<Vec<u8>> {
    if header_size > payload.len() {
        return Err(FontError::CorruptRle(format!(
            "header prefix of {} byte(s) exceeds payload of {}",
            header_size,
            payload.len()
        )));
    }

    let mut scanner = FontScanner::new(payload);
    scanner.seek(header_size).map_err(stream_truncated)?;
    let expanded_size = scanner.get_u32().map_err(stream_truncated)? as usize;

    let mut out = Vec::with_capacity(header_size + expanded_size);
    out.extend_from_slice(&payload[..header_size]);

    let mut written = 0usize;
    while scanner.remaining() > 0 {
        let op = scanner.get_u8().map_err(stream_truncated)?;
        let count = read_count(&mut scanner, op)?;

        match op & OP_MASK {
            OP_COPY => {
                let bytes = scanner.get_bytes(count).map_err(stream_truncated)?;
                out.extend_from_slice(&bytes);
            }
            OP_FILL => {
                let fill = scanner.get_u8().map_err(stream_truncated)?;
                out.resize(out.len() + count, fill);
            }
            other => {
                return Err(FontError::CorruptRle(format!(
                    "unknown operation {:#04x} at offset {}",
                    other,
                    scanner.tell() - 1
                )));
            }
        }

        written += count;
        if written > expanded_size {
            return Err(FontError::CorruptRle(format!(
                "stream expands to at least {} byte(s), expected {}",
                written, expanded_size
            )));
        }
    }

    if written != expanded_size {
        return Err(FontError::CorruptRle(format!(
            "stream expanded to {} byte(s), expected {}",
            written, expanded_size
        )));
    }

    Ok(out)
}

fn read_count(scanner: &mut FontScanner, op: u8) -> Result<usize> {
    let width = (op & COUNT_WIDTH_MASK) as usize;
    match width {
        1 => Ok(scanner.get_u8().map_err(stream_truncated)? as usize),
        2 => Ok(scanner.get_u16().map_err(stream_truncated)? as usize),
        4 => Ok(scanner.get_u32().map_err(stream_truncated)? as usize),
        _ => Err(FontError::CorruptRle(format!(
            "count width of {} byte(s) is not valid",
            width
        ))),
    }
}

fn stream_truncated(_: FontError) -> FontError {
    FontError::CorruptRle("stream truncated".to_string())
}

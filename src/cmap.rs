//! In-place maintenance of the base font's cmap format-4 and format-12
//! subtables.
//!
//! At base load the subtables are overwritten wholesale from the compact
//! segment descriptors in the header prefix. When the base was built with
//! one code point per segment the initial write points everything at
//! .notdef; each arriving glyph then flips exactly one segment to the real
//! glyph id.

use log::warn;

use crate::editor::{FontEditor, FontScanner};
use crate::error::{FontError, Result};
use crate::header::{BaseHeader, CmapMapping};

/// Byte distance from a format-4 subtable start to its `segCountX2` field.
const FORMAT4_SEGCOUNT_OFFSET: usize = 6;
/// Byte distance from a format-4 subtable start to its `endCode` array.
const FORMAT4_ARRAYS_OFFSET: usize = 14;
/// Fixed bytes in a format-4 subtable outside the five per-segment arrays:
/// the 14-byte header plus the reserved pad word.
const FORMAT4_FIXED_BYTES: usize = 16;

/// Overwrite the in-font format-12 group array from the compact segments.
/// Start glyph ids are withheld (written as zero) when the base has one
/// code point per segment, so unloaded characters keep resolving to
/// .notdef.
pub fn write_cmap12(header: &BaseHeader, data: &mut [u8]) -> Result<()> {
    let Some(info) = header.cmap12 else {
        return Ok(());
    };
    let segments = &header.compact_gos.segments12;
    if segments.len() != info.n_groups as usize {
        return Err(FontError::CorruptFont(format!(
            "cmap12 has {} group(s), compact data has {}",
            info.n_groups,
            segments.len()
        )));
    }

    let mut editor = FontEditor::new(data);
    editor.seek(info.offset as usize)?;
    for seg in segments {
        if seg.length == 0 {
            return Err(FontError::CorruptFont(format!(
                "cmap12 segment at U+{:04X} has zero length",
                seg.start_code
            )));
        }
        editor.set_u32(seg.start_code)?;
        editor.set_u32(seg.start_code + seg.length - 1)?;
        if header.has_one_char_per_seg {
            editor.set_u32(0)?;
        } else {
            editor.set_u32(seg.start_glyph_id)?;
        }
    }
    Ok(())
}

/// Overwrite the full format-4 payload (endCode, pad, startCode, idDelta,
/// idRangeOffset, glyphIdArray) from the compact segments. With one code
/// point per segment the idDelta written maps the segment to glyph 0; the
/// real delta is installed later by per-glyph activation.
pub fn write_cmap4(header: &BaseHeader, data: &mut [u8]) -> Result<()> {
    let Some(info) = header.cmap4 else {
        return Ok(());
    };
    let segments = &header.compact_gos.segments4;
    let seg_count = check_format4_seg_count(header, data)?;

    let gid_array_space = (info.length as usize)
        .checked_sub(FORMAT4_FIXED_BYTES + 8 * seg_count)
        .map(|bytes| bytes / 2)
        .ok_or_else(|| {
            FontError::CorruptFont(format!(
                "cmap4 length {} cannot hold {} segment(s)",
                info.length, seg_count
            ))
        })?;
    if header.compact_gos.glyph_id_array.len() != gid_array_space {
        return Err(FontError::CorruptFont(format!(
            "cmap4 glyphIdArray holds {} entries, compact data has {}",
            gid_array_space,
            header.compact_gos.glyph_id_array.len()
        )));
    }

    let mut editor = FontEditor::new(data);
    editor.seek(info.offset as usize + FORMAT4_ARRAYS_OFFSET)?;
    for seg in segments {
        editor.set_u16(seg.end_code)?;
    }
    editor.set_u16(0)?; // reservedPad
    for seg in segments {
        editor.set_u16(seg.start_code)?;
    }
    for seg in segments {
        if header.has_one_char_per_seg {
            editor.set_u16(notdef_delta(seg.start_code))?;
        } else {
            editor.set_u16(seg.id_delta)?;
        }
    }
    for seg in segments {
        editor.set_u16(seg.id_range_offset)?;
    }
    for gid in &header.compact_gos.glyph_id_array {
        editor.set_u16(*gid)?;
    }
    Ok(())
}

/// The idDelta that maps a one-code-point segment at `start_code` to
/// glyph 0.
fn notdef_delta(start_code: u16) -> u16 {
    ((0x1_0000 - start_code as u32) & 0xFFFF) as u16
}

/// Expose newly injected glyphs through the format-12 subtable: each pair's
/// segment gets its real start glyph id. A no-op when the cmap was fully
/// populated at build time.
pub fn activate_format12(
    header: &BaseHeader,
    mapping: &CmapMapping,
    pairs: &[(u16, u32)],
    data: &mut [u8],
) -> Result<()> {
    let Some(info) = header.cmap12 else {
        return Ok(());
    };
    if !header.has_one_char_per_seg {
        return Ok(());
    }

    let mut editor = FontEditor::new(data);
    for &(glyph_id, code_point) in pairs {
        let Some(char_info) = mapping.get(code_point) else {
            warn!(
                "glyph {} delivered for unmapped code point U+{:04X}",
                glyph_id, code_point
            );
            continue;
        };
        let Some(seg) = char_info.format12_seg else {
            continue;
        };
        if seg >= info.n_groups as usize {
            return Err(FontError::CorruptFont(format!(
                "format-12 segment {} out of range ({} groups)",
                seg, info.n_groups
            )));
        }
        let start_glyph_id = header.compact_gos.segments12[seg].start_glyph_id;
        editor.seek(info.offset as usize + seg * 12 + 8)?;
        editor.set_u32(start_glyph_id)?;
    }
    Ok(())
}

/// Expose newly injected glyphs through the format-4 subtable by restoring
/// each affected segment's real idDelta. A no-op (beyond the consistency
/// check) when the cmap was fully populated at build time.
pub fn activate_format4(
    header: &BaseHeader,
    mapping: &CmapMapping,
    pairs: &[(u16, u32)],
    data: &mut [u8],
) -> Result<()> {
    let Some(info) = header.cmap4 else {
        return Ok(());
    };
    let seg_count = check_format4_seg_count(header, data)?;
    if !header.has_one_char_per_seg {
        return Ok(());
    }

    let id_delta_base = info.offset as usize + FORMAT4_ARRAYS_OFFSET + 2 * seg_count + 2 + 2 * seg_count;
    let mut editor = FontEditor::new(data);
    for &(glyph_id, code_point) in pairs {
        let Some(char_info) = mapping.get(code_point) else {
            warn!(
                "glyph {} delivered for unmapped code point U+{:04X}",
                glyph_id, code_point
            );
            continue;
        };
        let Some(seg) = char_info.format4_seg else {
            if code_point <= 0xFFFF {
                return Err(FontError::CorruptFont(format!(
                    "U+{:04X} is in the BMP but has no format-4 segment",
                    code_point
                )));
            }
            continue;
        };
        if seg >= seg_count {
            return Err(FontError::CorruptFont(format!(
                "format-4 segment {} out of range ({} segments)",
                seg, seg_count
            )));
        }
        editor.seek(id_delta_base + seg * 2)?;
        editor.set_u16(header.compact_gos.segments4[seg].id_delta)?;
    }
    Ok(())
}

/// Verify that the in-font segment count matches the compact data. Returns
/// the segment count.
fn check_format4_seg_count(header: &BaseHeader, data: &[u8]) -> Result<usize> {
    let Some(info) = header.cmap4 else {
        return Ok(0);
    };
    let mut s = FontScanner::new(data);
    s.seek(info.offset as usize + FORMAT4_SEGCOUNT_OFFSET)?;
    let in_font = (s.get_u16()? / 2) as usize;
    let compact = header.compact_gos.segments4.len();
    if in_font != compact {
        return Err(FontError::CorruptFont(format!(
            "cmap4 has {} segment(s) in the font but {} in the header",
            in_font, compact
        )));
    }
    Ok(in_font)
}

/// Look a code point up through the live in-font format-12 group array.
/// `Ok(None)` when no group covers it.
pub fn lookup_format12(header: &BaseHeader, data: &[u8], code_point: u32) -> Result<Option<u32>> {
    let Some(info) = header.cmap12 else {
        return Ok(None);
    };
    let mut s = FontScanner::new(data);
    let mut lo = 0usize;
    let mut hi = info.n_groups as usize;
    while lo < hi {
        let mid = (lo + hi) / 2;
        s.seek(info.offset as usize + mid * 12)?;
        let start = s.get_u32()?;
        let end = s.get_u32()?;
        let start_glyph_id = s.get_u32()?;
        if code_point < start {
            hi = mid;
        } else if code_point > end {
            lo = mid + 1;
        } else {
            return Ok(Some(start_glyph_id + (code_point - start)));
        }
    }
    Ok(None)
}

/// Look a code point up through the live in-font format-4 subtable,
/// including the glyphIdArray indirection. `Ok(None)` when no segment
/// covers it.
pub fn lookup_format4(header: &BaseHeader, data: &[u8], code_point: u32) -> Result<Option<u32>> {
    let Some(info) = header.cmap4 else {
        return Ok(None);
    };
    if code_point > 0xFFFF {
        return Ok(None);
    }
    let cp = code_point as u16;

    let mut s = FontScanner::new(data);
    s.seek(info.offset as usize + FORMAT4_SEGCOUNT_OFFSET)?;
    let seg_count = (s.get_u16()? / 2) as usize;
    let end_codes = info.offset as usize + FORMAT4_ARRAYS_OFFSET;
    let start_codes = end_codes + 2 * seg_count + 2;
    let id_deltas = start_codes + 2 * seg_count;
    let id_range_offsets = id_deltas + 2 * seg_count;

    for seg in 0..seg_count {
        s.seek(end_codes + seg * 2)?;
        let end = s.get_u16()?;
        if cp > end {
            continue;
        }
        s.seek(start_codes + seg * 2)?;
        let start = s.get_u16()?;
        if cp < start {
            return Ok(None);
        }
        s.seek(id_deltas + seg * 2)?;
        let id_delta = s.get_u16()?;
        let slot = id_range_offsets + seg * 2;
        s.seek(slot)?;
        let id_range_offset = s.get_u16()?;
        if id_range_offset == 0 {
            return Ok(Some((cp as u32).wrapping_add(id_delta as u32) & 0xFFFF));
        }
        let entry = slot + id_range_offset as usize + 2 * (cp - start) as usize;
        s.seek(entry)?;
        let gid = s.get_u16()?;
        if gid == 0 {
            return Ok(Some(0));
        }
        return Ok(Some((gid as u32).wrapping_add(id_delta as u32) & 0xFFFF));
    }
    Ok(None)
}

//! Post-decode pass that makes a mostly-empty glyph region acceptable to
//! OpenType sanitizers.
//!
//! The expanded base carries real data for only a handful of glyphs; every
//! other slot must still parse as a valid glyph. TrueType slots get a
//! composite-header sentinel, CFF slots get the shortest valid charstring.

use crate::editor::FontEditor;
use crate::error::{FontError, Result};
use crate::header::BaseHeader;

/// Every `LOCA_BLOCK_SIZE`-th TrueType glyph slot receives a sentinel.
pub const LOCA_BLOCK_SIZE: usize = 64;

/// The CFF `endchar` operator: a one-byte valid charstring.
pub const CFF_ENDCHAR: u8 = 14;

/// Sentinel written at the head of a placeholder TrueType slot. A contour
/// count of -1 reads as a composite glyph with no components.
pub const GLYF_SENTINEL: i16 = -1;

/// Install sentinel glyphs across the empty glyph region. Returns whether
/// the buffer was modified (the caller marks the base dirty).
pub fn sanitize(header: &BaseHeader, data: &mut [u8]) -> Result<bool> {
    if header.is_ttf {
        sanitize_truetype(header, data)
    } else {
        sanitize_cff(header, data)
    }
}

fn sanitize_truetype(header: &BaseHeader, data: &mut [u8]) -> Result<bool> {
    let mut editor = FontEditor::new(data);
    let table = header.glyph_data_offset as usize;
    let osz = header.offset_size as usize;
    let divisor = header.offset_divisor();
    let num_glyphs = header.num_glyphs as usize;
    let mut touched = false;

    let mut glyph_id = 0usize;
    while glyph_id < num_glyphs {
        let raw = editor.get_glyph_data_offset(table, osz, glyph_id)?;
        let raw_next = editor.get_glyph_data_offset(table, osz, glyph_id + 1)?;
        if raw_next > raw {
            let byte_offset = raw
                .checked_mul(divisor)
                .ok_or_else(|| FontError::CorruptFont("loca entry overflows".to_string()))?;
            editor.seek(header.glyph_offset as usize + byte_offset as usize)?;
            editor.set_i16(GLYF_SENTINEL)?;
            touched = true;
        }
        glyph_id += LOCA_BLOCK_SIZE;
    }

    Ok(touched)
}

fn sanitize_cff(header: &BaseHeader, data: &mut [u8]) -> Result<bool> {
    let mut editor = FontEditor::new(data);
    let table = header.glyph_data_offset as usize;
    let osz = header.offset_size as usize;
    let num_glyphs = header.num_glyphs as usize;
    let mut touched = false;

    // The build tool emits identical consecutive offsets to mark empty
    // slots. Give each such slot a one-byte endchar and shift the following
    // offsets by the accumulated delta so the array stays monotone.
    let mut delta = 0u32;
    let mut prev = editor.get_glyph_data_offset(table, osz, 0)?;
    for glyph_id in 1..=num_glyphs {
        let raw = editor.get_glyph_data_offset(table, osz, glyph_id)?;
        let mut adjusted = raw
            .checked_add(delta)
            .ok_or_else(|| FontError::CorruptFont("charstring offset overflows".to_string()))?;
        if adjusted <= prev {
            adjusted = prev + 1;
            delta = adjusted - raw;
            editor.seek(header.glyph_offset as usize + prev as usize)?;
            editor.set_u8(CFF_ENDCHAR)?;
            touched = true;
        }
        if adjusted != raw {
            editor.set_glyph_data_offset(table, osz, glyph_id, adjusted)?;
            touched = true;
        }
        prev = adjusted;
    }

    Ok(touched)
}

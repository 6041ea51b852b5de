//! Splices delivered glyph bundles into the live base buffer.
//!
//! For each record the offset array (loca or CFF CharStrings INDEX) is
//! rewritten around the injected slot, neighbouring placeholder slots are
//! repaired so every intermediate state stays parseable, the glyph bytes
//! are copied, and finally the cmap subtables are activated for the
//! affected code points.

use std::collections::BTreeMap;

use log::debug;

use crate::bundle::{BundleFlags, GlyphBundle};
use crate::cmap;
use crate::editor::FontEditor;
use crate::error::{FontError, Result};
use crate::header::BaseHeader;
use crate::sanitizer::{CFF_ENDCHAR, GLYF_SENTINEL};

/// Glyph id → code points that requested it; drives cmap activation after
/// the glyph bytes are in place.
pub type GlyphToCodeMap = BTreeMap<u16, Vec<u32>>;

/// Patch every record of `bundle` into `base`, then activate the cmap
/// entries for `glyph_to_code`. Records are processed in delivery order;
/// the build step guarantees non-overlapping byte allocations.
pub fn inject(
    header: &BaseHeader,
    mapping: &crate::header::CmapMapping,
    base: &mut [u8],
    bundle: &GlyphBundle,
    glyph_to_code: &GlyphToCodeMap,
) -> Result<()> {
    if !header.is_ttf && !bundle.flags.contains(BundleFlags::HAS_CFF) && !bundle.records.is_empty()
    {
        debug!("CFF base receiving a bundle without HAS_CFF; treating records as charstrings");
    }

    for record in &bundle.records {
        if record.glyph_id >= header.num_glyphs {
            return Err(FontError::CorruptFont(format!(
                "bundle glyph {} out of range ({} glyphs)",
                record.glyph_id, header.num_glyphs
            )));
        }
        inject_metrics(header, base, record.glyph_id, record.hmtx, record.vmtx)?;
        if header.is_ttf {
            update_loca(header, base, record.glyph_id, record.offset, record.length())?;
        } else {
            update_charstrings(header, base, record.glyph_id, record.offset, record.length())?;
        }
        copy_glyph_bytes(header, base, record.offset, &record.data)?;
    }

    let pairs: Vec<(u16, u32)> = glyph_to_code
        .iter()
        .flat_map(|(gid, cps)| cps.iter().map(move |cp| (*gid, *cp)))
        .collect();
    cmap::activate_format12(header, mapping, &pairs, base)?;
    cmap::activate_format4(header, mapping, &pairs, base)?;
    Ok(())
}

fn inject_metrics(
    header: &BaseHeader,
    base: &mut [u8],
    glyph_id: u16,
    hmtx: Option<u16>,
    vmtx: Option<u16>,
) -> Result<()> {
    let mut editor = FontEditor::new(base);
    if let Some(value) = hmtx {
        editor.set_mtx_side_bearing(
            header.hmtx_offset as usize,
            header.hmetric_count as usize,
            glyph_id as usize,
            value,
        )?;
    }
    if let Some(value) = vmtx {
        if header.vmtx_offset == 0 {
            return Err(FontError::CorruptFont(
                "bundle carries vertical metrics but the base has no vmtx".to_string(),
            ));
        }
        editor.set_mtx_side_bearing(
            header.vmtx_offset as usize,
            header.vmetric_count as usize,
            glyph_id as usize,
            value,
        )?;
    }
    Ok(())
}

/// TrueType path: point `loca[id]`/`loca[id+1]` at the new bytes, repair
/// stale placeholder entries on both sides, and keep the following slot a
/// valid composite sentinel.
fn update_loca(
    header: &BaseHeader,
    base: &mut [u8],
    glyph_id: u16,
    offset: u32,
    length: u16,
) -> Result<()> {
    let table = header.glyph_data_offset as usize;
    let osz = header.offset_size as usize;
    let divisor = header.offset_divisor();
    let id = glyph_id as usize;
    let end = offset
        .checked_add(length as u32)
        .ok_or_else(|| FontError::CorruptFont("glyph extent overflows".to_string()))?;

    let mut editor = FontEditor::new(base);
    editor.set_glyph_data_offset(table, osz, id, offset / divisor)?;
    let old_next = editor.get_glyph_data_offset(table, osz, id + 1)?;
    editor.set_glyph_data_offset(table, osz, id + 1, end / divisor)?;

    // Placeholder entries left of the injection may still point past the
    // new glyph's start; walk them back.
    let mut prev = id;
    while prev > 0 {
        prev -= 1;
        if editor.get_glyph_data_offset(table, osz, prev)? <= offset {
            break;
        }
        editor.set_glyph_data_offset(table, osz, prev, offset / divisor)?;
    }

    if old_next != end && id + 1 < header.num_glyphs as usize {
        let sentinel_pos = header.glyph_offset as usize + end as usize;
        if length > 0 {
            editor.seek(sentinel_pos)?;
            editor.set_i16(GLYF_SENTINEL)?;
        } else {
            // Only re-stamp an empty slot that is still untouched.
            editor.seek(sentinel_pos)?;
            let a = editor.get_u32()?;
            let b = editor.get_u32()?;
            if a == 0 && b == 0 {
                editor.seek(sentinel_pos)?;
                editor.set_i16(GLYF_SENTINEL)?;
            }
        }
    }
    Ok(())
}

/// CFF path: point `cs[id]`/`cs[id+1]` at the new bytes, then push any
/// following collapsed offsets up one byte at a time, giving each displaced
/// empty slot a fresh endchar.
fn update_charstrings(
    header: &BaseHeader,
    base: &mut [u8],
    glyph_id: u16,
    offset: u32,
    length: u16,
) -> Result<()> {
    let table = header.glyph_data_offset as usize;
    let osz = header.offset_size as usize;
    let num_glyphs = header.num_glyphs as usize;
    let id = glyph_id as usize;
    let end = offset
        .checked_add(length as u32)
        .ok_or_else(|| FontError::CorruptFont("charstring extent overflows".to_string()))?;

    let mut editor = FontEditor::new(base);
    editor.set_glyph_data_offset(table, osz, id, offset)?;
    let old_next = editor.get_glyph_data_offset(table, osz, id + 1)?;
    editor.set_glyph_data_offset(table, osz, id + 1, end)?;

    if old_next < end && id + 1 < num_glyphs {
        editor.seek(header.glyph_offset as usize + end as usize)?;
        editor.set_u8(CFF_ENDCHAR)?;

        let mut current = end;
        for next_id in id + 2..=num_glyphs {
            let value = editor.get_glyph_data_offset(table, osz, next_id)?;
            if value > current {
                break;
            }
            current += 1;
            editor.set_glyph_data_offset(table, osz, next_id, current)?;
            if next_id < num_glyphs {
                editor.seek(header.glyph_offset as usize + current as usize)?;
                editor.set_u8(CFF_ENDCHAR)?;
            }
        }
    }
    Ok(())
}

fn copy_glyph_bytes(header: &BaseHeader, base: &mut [u8], offset: u32, data: &[u8]) -> Result<()> {
    if data.is_empty() {
        return Ok(());
    }
    let mut editor = FontEditor::new(base);
    editor.seek(header.glyph_offset as usize + offset as usize)?;
    editor.set_bytes(data)
}

//! The header prefix the build tool prepends to every base font, and the
//! compact cmap descriptors it carries.
//!
//! The prefix is a magic + version + TLV record area. All offsets inside it
//! point into the *expanded* font (prefix included). The prefix is input
//! only: after parsing it drives every later table write but is never
//! mutated itself.

use std::collections::BTreeMap;

use log::warn;

use crate::editor::FontScanner;
use crate::error::{FontError, Result};

pub const HEADER_MAGIC: u32 = 0x4249_4646; // "BIFF"
pub const HEADER_VERSION_MAJOR: u8 = 1;

/// A compact cmap format-4 segment: `(startCode, endCode, idDelta,
/// idRangeOffset)` exactly as the build tool laid the subtable out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment4 {
    pub start_code: u16,
    pub end_code: u16,
    pub id_delta: u16,
    pub id_range_offset: u16,
}

/// A compact cmap format-12 segment: `(startCode, length, startGlyphId)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment12 {
    pub start_code: u32,
    pub length: u32,
    pub start_glyph_id: u32,
}

/// The authoritative, compact glyph-ordering data produced by the build
/// step. The in-font cmap subtables are rewritten from these arrays at base
/// load and re-activated from them per glyph.
#[derive(Debug, Clone, Default)]
pub struct CompactGos {
    pub segments4: Vec<Segment4>,
    pub glyph_id_array: Vec<u16>,
    pub segments12: Vec<Segment12>,
}

#[derive(Debug, Clone, Copy)]
pub struct Cmap4Info {
    /// Offset of the format-4 subtable start (the `format` field).
    pub offset: u32,
    /// Subtable length in bytes, as stored in its `length` field.
    pub length: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Cmap12Info {
    /// Offset of the first sequential map group (not the subtable header).
    pub offset: u32,
    pub n_groups: u32,
}

/// CFF charset descriptor, retained from the prefix but never patched.
#[derive(Debug, Clone)]
pub struct CharsetInfo {
    pub offset: u32,
    pub gos_type: u8,
    pub segments: Vec<(u32, u16)>,
}

/// Parsed header prefix: everything the engine needs to know about the
/// base's layout without parsing the font proper.
#[derive(Debug, Clone)]
pub struct BaseHeader {
    pub header_size: usize,
    pub is_ttf: bool,
    /// Start of the glyph byte region (glyf data / CFF CharStrings data).
    pub glyph_offset: u32,
    /// Start of the glyph offset array (loca / CharStrings INDEX offsets).
    pub glyph_data_offset: u32,
    pub offset_size: u8,
    pub num_glyphs: u16,
    pub hmtx_offset: u32,
    pub hmetric_count: u16,
    pub vmtx_offset: u32,
    pub vmetric_count: u16,
    pub cmap4: Option<Cmap4Info>,
    pub cmap12: Option<Cmap12Info>,
    pub charset: Option<CharsetInfo>,
    pub compact_gos: CompactGos,
    /// True when every format-4 segment covers exactly one code point with
    /// no range-offset indirection and every format-12 segment has length 1.
    /// The engine then keeps the cmap pointing at .notdef until each glyph
    /// actually arrives.
    pub has_one_char_per_seg: bool,
}

impl BaseHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut s = FontScanner::new(data);

        let magic = s.get_u32()?;
        if magic != HEADER_MAGIC {
            return Err(FontError::CorruptFont(format!(
                "bad header magic {:#010x}",
                magic
            )));
        }
        let major = s.get_u8()?;
        let _minor = s.get_u8()?;
        if major != HEADER_VERSION_MAJOR {
            return Err(FontError::CorruptFont(format!(
                "unsupported header version {}",
                major
            )));
        }
        let header_size = s.get_u16()? as usize;
        if header_size > data.len() {
            return Err(FontError::CorruptFont(format!(
                "header size {} exceeds buffer of {} byte(s)",
                header_size,
                data.len()
            )));
        }
        let record_count = s.get_u16()?;

        let mut is_ttf = None;
        let mut glyph_offset = None;
        let mut glyph_data_offset = None;
        let mut offset_size = None;
        let mut num_glyphs = None;
        let mut hmtx_offset = None;
        let mut hmetric_count = None;
        let mut vmtx_offset = 0u32;
        let mut vmetric_count = 0u16;
        let mut cmap4 = None;
        let mut cmap12 = None;
        let mut charset = None;
        let mut compact_gos = None;

        for _ in 0..record_count {
            let tag = s.get_tag()?;
            let len = s.get_u16()? as usize;
            let record_end = s.tell() + len;
            if record_end > header_size {
                return Err(FontError::CorruptFont(format!(
                    "record {} overruns the header area",
                    String::from_utf8_lossy(&tag)
                )));
            }

            match &tag {
                b"TYPE" => {
                    expect_len(&tag, len, 1)?;
                    is_ttf = Some(s.get_u8()? != 0);
                }
                b"GLOF" => {
                    expect_len(&tag, len, 4)?;
                    glyph_offset = Some(s.get_u32()?);
                }
                b"GLCN" => {
                    expect_len(&tag, len, 2)?;
                    num_glyphs = Some(s.get_u16()?);
                }
                b"LCOF" => {
                    expect_len(&tag, len, 4)?;
                    glyph_data_offset = Some(s.get_u32()?);
                }
                b"LCFM" => {
                    expect_len(&tag, len, 1)?;
                    offset_size = Some(s.get_u8()?);
                }
                b"HMOF" => {
                    expect_len(&tag, len, 4)?;
                    hmtx_offset = Some(s.get_u32()?);
                }
                b"HMMC" => {
                    expect_len(&tag, len, 2)?;
                    hmetric_count = Some(s.get_u16()?);
                }
                b"VMOF" => {
                    expect_len(&tag, len, 4)?;
                    vmtx_offset = s.get_u32()?;
                }
                b"VMMC" => {
                    expect_len(&tag, len, 2)?;
                    vmetric_count = s.get_u16()?;
                }
                b"CM04" => {
                    expect_len(&tag, len, 8)?;
                    cmap4 = Some(Cmap4Info {
                        offset: s.get_u32()?,
                        length: s.get_u32()?,
                    });
                }
                b"CM12" => {
                    expect_len(&tag, len, 8)?;
                    cmap12 = Some(Cmap12Info {
                        offset: s.get_u32()?,
                        n_groups: s.get_u32()?,
                    });
                }
                b"CCMP" => {
                    compact_gos = Some(parse_compact_gos(&mut s, record_end)?);
                }
                b"CS02" => {
                    charset = Some(parse_charset(&mut s, record_end)?);
                }
                _ => {
                    // Unknown tags are skipped so the build tool can evolve.
                    s.seek(record_end)?;
                }
            }

            if s.tell() != record_end {
                return Err(FontError::CorruptFont(format!(
                    "record {} has {} trailing byte(s)",
                    String::from_utf8_lossy(&tag),
                    record_end - s.tell()
                )));
            }
        }

        let is_ttf = require(is_ttf, "TYPE")?;
        let offset_size = require(offset_size, "LCFM")?;
        if is_ttf && offset_size != 2 && offset_size != 4 {
            return Err(FontError::CorruptFont(format!(
                "loca entries must be 2 or 4 bytes, got {}",
                offset_size
            )));
        }
        if !(1..=4).contains(&offset_size) {
            return Err(FontError::CorruptFont(format!(
                "glyph offset entries must be 1..=4 bytes, got {}",
                offset_size
            )));
        }

        let compact_gos = compact_gos.unwrap_or_default();
        let has_one_char_per_seg = compact_gos
            .segments4
            .iter()
            .all(|seg| seg.start_code == seg.end_code && seg.id_range_offset == 0)
            && compact_gos.segments12.iter().all(|seg| seg.length == 1);

        Ok(BaseHeader {
            header_size,
            is_ttf,
            glyph_offset: require(glyph_offset, "GLOF")?,
            glyph_data_offset: require(glyph_data_offset, "LCOF")?,
            offset_size,
            num_glyphs: require(num_glyphs, "GLCN")?,
            hmtx_offset: require(hmtx_offset, "HMOF")?,
            hmetric_count: require(hmetric_count, "HMMC")?,
            vmtx_offset,
            vmetric_count,
            cmap4,
            cmap12,
            charset,
            compact_gos,
            has_one_char_per_seg,
        })
    }

    /// The divisor applied to byte offsets before they are stored in the
    /// offset array: 2 for short loca, 1 otherwise.
    pub fn offset_divisor(&self) -> u32 {
        if self.is_ttf && self.offset_size == 2 {
            2
        } else {
            1
        }
    }
}

fn expect_len(tag: &[u8; 4], got: usize, want: usize) -> Result<()> {
    if got != want {
        return Err(FontError::CorruptFont(format!(
            "record {} is {} byte(s), expected {}",
            String::from_utf8_lossy(tag),
            got,
            want
        )));
    }
    Ok(())
}

fn require<T>(value: Option<T>, tag: &str) -> Result<T> {
    value.ok_or_else(|| FontError::CorruptFont(format!("missing required record {}", tag)))
}

fn parse_compact_gos(s: &mut FontScanner, record_end: usize) -> Result<CompactGos> {
    let seg4_count = s.get_u16()? as usize;
    let mut segments4 = Vec::with_capacity(seg4_count);
    for _ in 0..seg4_count {
        segments4.push(Segment4 {
            start_code: s.get_u16()?,
            end_code: s.get_u16()?,
            id_delta: s.get_u16()?,
            id_range_offset: s.get_u16()?,
        });
    }

    let gid_array_len = s.get_u16()? as usize;
    let mut glyph_id_array = Vec::with_capacity(gid_array_len);
    for _ in 0..gid_array_len {
        glyph_id_array.push(s.get_u16()?);
    }

    let seg12_count = s.get_u32()? as usize;
    let mut segments12 = Vec::with_capacity(seg12_count);
    for _ in 0..seg12_count {
        segments12.push(Segment12 {
            start_code: s.get_u32()?,
            length: s.get_u32()?,
            start_glyph_id: s.get_u32()?,
        });
    }

    if s.tell() > record_end {
        return Err(FontError::CorruptFont(
            "compact cmap record overruns its length".to_string(),
        ));
    }
    Ok(CompactGos {
        segments4,
        glyph_id_array,
        segments12,
    })
}

fn parse_charset(s: &mut FontScanner, record_end: usize) -> Result<CharsetInfo> {
    let offset = s.get_u32()?;
    let gos_type = s.get_u8()?;
    let seg_count = s.get_u16()? as usize;
    let mut segments = Vec::with_capacity(seg_count);
    for _ in 0..seg_count {
        segments.push((s.get_u32()?, s.get_u16()?));
    }
    if s.tell() > record_end {
        return Err(FontError::CorruptFont(
            "charset record overruns its length".to_string(),
        ));
    }
    Ok(CharsetInfo {
        offset,
        gos_type,
        segments,
    })
}

/// Everything the engine knows about one mapped code point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharCmapInfo {
    pub code_point: u32,
    pub glyph_id: u32,
    pub format4_seg: Option<usize>,
    pub format12_seg: Option<usize>,
}

/// Code point → glyph mapping derived once per font from the compact GOS.
/// Never mutated after construction.
#[derive(Debug, Clone, Default)]
pub struct CmapMapping {
    map: BTreeMap<u32, CharCmapInfo>,
}

impl CmapMapping {
    pub fn from_compact(gos: &CompactGos) -> Self {
        let mut map = BTreeMap::new();
        let seg_count = gos.segments4.len();

        for (i, seg) in gos.segments4.iter().enumerate() {
            for cp in seg.start_code..=seg.end_code {
                let glyph_id = if seg.id_range_offset == 0 {
                    (cp as u32).wrapping_add(seg.id_delta as u32) & 0xFFFF
                } else {
                    // Mirror the in-table semantics: the range offset is
                    // measured from this segment's idRangeOffset slot, and
                    // the glyphIdArray starts right after that array.
                    let slot_relative =
                        seg.id_range_offset as usize / 2 + (cp - seg.start_code) as usize;
                    let Some(index) = slot_relative.checked_sub(seg_count - i) else {
                        warn!(
                            "format-4 segment {} range offset points before glyphIdArray",
                            i
                        );
                        continue;
                    };
                    match gos.glyph_id_array.get(index) {
                        Some(&g) if g != 0 => {
                            (g as u32).wrapping_add(seg.id_delta as u32) & 0xFFFF
                        }
                        Some(_) => continue,
                        None => {
                            warn!(
                                "format-4 segment {} indexes past glyphIdArray ({} >= {})",
                                i,
                                index,
                                gos.glyph_id_array.len()
                            );
                            continue;
                        }
                    }
                };
                if glyph_id == 0 {
                    continue;
                }
                map.insert(
                    cp as u32,
                    CharCmapInfo {
                        code_point: cp as u32,
                        glyph_id,
                        format4_seg: Some(i),
                        format12_seg: None,
                    },
                );
            }
        }

        for (i, seg) in gos.segments12.iter().enumerate() {
            for delta in 0..seg.length {
                let cp = seg.start_code + delta;
                let glyph_id = seg.start_glyph_id + delta;
                if glyph_id == 0 {
                    continue;
                }
                map.entry(cp)
                    .and_modify(|info| {
                        if info.glyph_id != glyph_id {
                            warn!(
                                "U+{:04X}: format-4 maps to glyph {}, format-12 to {}",
                                cp, info.glyph_id, glyph_id
                            );
                            info.glyph_id = glyph_id;
                        }
                        info.format12_seg = Some(i);
                    })
                    .or_insert(CharCmapInfo {
                        code_point: cp,
                        glyph_id,
                        format4_seg: None,
                        format12_seg: Some(i),
                    });
            }
        }

        CmapMapping { map }
    }

    pub fn get(&self, code_point: u32) -> Option<&CharCmapInfo> {
        self.map.get(&code_point)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &CharCmapInfo)> {
        self.map.iter()
    }
}

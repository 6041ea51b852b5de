//! The glyph bundle wire format delivered by the backend.

use crate::editor::FontScanner;
use crate::error::{FontError, Result};

bitflags::bitflags! {
    /// Header flags of a glyph bundle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BundleFlags: u16 {
        const HAS_HMTX = 1;
        const HAS_VMTX = 2;
        const HAS_CFF = 4;
    }
}

/// One glyph record: where its bytes land in the base's glyph region and
/// the optional metrics that come with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphRecord {
    pub glyph_id: u16,
    pub hmtx: Option<u16>,
    pub vmtx: Option<u16>,
    /// Byte offset inside the base's glyph region.
    pub offset: u32,
    pub data: Vec<u8>,
}

impl GlyphRecord {
    pub fn length(&self) -> u16 {
        self.data.len() as u16
    }
}

/// A parsed backend response carrying glyphs to splice into the base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphBundle {
    pub flags: BundleFlags,
    pub records: Vec<GlyphRecord>,
}

impl GlyphBundle {
    /// Parse the big-endian wire format:
    /// `u16 flags; u16 glyphCount;` then per glyph
    /// `u16 glyphId; [u16 hmtx]; [u16 vmtx]; u32 offset; u16 length; u8 bytes[length]`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut s = FontScanner::new(data);
        let raw_flags = s.get_u16().map_err(truncated)?;
        let flags = BundleFlags::from_bits(raw_flags).ok_or_else(|| {
            FontError::CorruptFont(format!("unknown bundle flag bits in {:#06x}", raw_flags))
        })?;
        let glyph_count = s.get_u16().map_err(truncated)?;

        let mut records = Vec::with_capacity(glyph_count as usize);
        for _ in 0..glyph_count {
            let glyph_id = s.get_u16().map_err(truncated)?;
            let hmtx = if flags.contains(BundleFlags::HAS_HMTX) {
                Some(s.get_u16().map_err(truncated)?)
            } else {
                None
            };
            let vmtx = if flags.contains(BundleFlags::HAS_VMTX) {
                Some(s.get_u16().map_err(truncated)?)
            } else {
                None
            };
            let offset = s.get_u32().map_err(truncated)?;
            let length = s.get_u16().map_err(truncated)?;
            let data = s.get_bytes(length as usize).map_err(truncated)?;
            records.push(GlyphRecord {
                glyph_id,
                hmtx,
                vmtx,
                offset,
                data,
            });
        }

        if s.remaining() != 0 {
            return Err(FontError::CorruptFont(format!(
                "bundle has {} trailing byte(s)",
                s.remaining()
            )));
        }

        Ok(GlyphBundle { flags, records })
    }

    /// Total glyph bytes carried. Zero means nothing worth re-installing
    /// the font face for.
    pub fn data_len(&self) -> usize {
        self.records.iter().map(|r| r.data.len()).sum()
    }
}

fn truncated(_: FontError) -> FontError {
    FontError::CorruptFont("bundle truncated".to_string())
}

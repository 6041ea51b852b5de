//! Structural validation of a (possibly patched) base font.
//!
//! Checks the invariants every injection must preserve: monotone glyph
//! offset arrays, sorted cmap format-4 segments, sorted format-12 groups.
//! Used by tests after every mutation and by the `base-info` tool.

use crate::editor::FontScanner;
use crate::error::Result;
use crate::header::BaseHeader;

/// Validation outcome for a base buffer.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    GlyphOffsetsNotMonotone,
    GlyphDataOutOfBounds,
    Cmap4SegmentsUnsorted,
    Cmap4SegmentInverted,
    Cmap12GroupsUnsorted,
    HeaderMismatch,
}

/// Validate the glyph offset array and both cmap subtables of `data`
/// against the parsed header. IO-level failures (offsets outside the
/// buffer) surface as errors in the report, not as `Err`.
pub fn validate_base(header: &BaseHeader, data: &[u8]) -> ValidationReport {
    let mut report = ValidationReport {
        is_valid: true,
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    if let Err(e) = check_glyph_offsets(header, data, &mut report) {
        report.push_error(ValidationErrorKind::GlyphDataOutOfBounds, e.to_string());
    }
    if let Err(e) = check_cmap4(header, data, &mut report) {
        report.push_error(ValidationErrorKind::HeaderMismatch, e.to_string());
    }
    if let Err(e) = check_cmap12(header, data, &mut report) {
        report.push_error(ValidationErrorKind::HeaderMismatch, e.to_string());
    }

    report
}

fn check_glyph_offsets(
    header: &BaseHeader,
    data: &[u8],
    report: &mut ValidationReport,
) -> Result<()> {
    let mut s = FontScanner::new(data);
    let table = header.glyph_data_offset as usize;
    let osz = header.offset_size as usize;

    let mut prev = s.glyph_data_offset(table, osz, 0)?;
    for glyph_id in 1..=header.num_glyphs as usize {
        let value = s.glyph_data_offset(table, osz, glyph_id)?;
        if value < prev {
            report.push_error(
                ValidationErrorKind::GlyphOffsetsNotMonotone,
                format!(
                    "offset entry {} ({}) is below its predecessor ({})",
                    glyph_id, value, prev
                ),
            );
        }
        prev = value;
    }

    let end_bytes = prev as u64 * header.offset_divisor() as u64;
    if header.glyph_offset as u64 + end_bytes > data.len() as u64 {
        report.push_error(
            ValidationErrorKind::GlyphDataOutOfBounds,
            format!(
                "final glyph offset {} points past the end of the buffer",
                end_bytes
            ),
        );
    }
    Ok(())
}

fn check_cmap4(header: &BaseHeader, data: &[u8], report: &mut ValidationReport) -> Result<()> {
    let Some(info) = header.cmap4 else {
        return Ok(());
    };
    let mut s = FontScanner::new(data);
    s.seek(info.offset as usize + 6)?;
    let seg_count = (s.get_u16()? / 2) as usize;
    if seg_count != header.compact_gos.segments4.len() {
        report.push_error(
            ValidationErrorKind::HeaderMismatch,
            format!(
                "cmap4 has {} segment(s) in the font but {} in the header",
                seg_count,
                header.compact_gos.segments4.len()
            ),
        );
        return Ok(());
    }

    let end_codes = info.offset as usize + 14;
    let start_codes = end_codes + 2 * seg_count + 2;
    let mut prev_end: Option<u16> = None;
    for seg in 0..seg_count {
        s.seek(end_codes + seg * 2)?;
        let end = s.get_u16()?;
        s.seek(start_codes + seg * 2)?;
        let start = s.get_u16()?;
        if end < start {
            report.push_error(
                ValidationErrorKind::Cmap4SegmentInverted,
                format!("segment {} covers U+{:04X}..U+{:04X}", seg, start, end),
            );
        }
        if let Some(prev) = prev_end {
            if start <= prev {
                report.push_error(
                    ValidationErrorKind::Cmap4SegmentsUnsorted,
                    format!(
                        "segment {} starts at U+{:04X}, at or before the previous end U+{:04X}",
                        seg, start, prev
                    ),
                );
            }
        }
        prev_end = Some(end);
    }
    if prev_end != Some(0xFFFF) {
        report.warnings.push(ValidationWarning {
            message: "cmap4 does not end with the U+FFFF sentinel segment".to_string(),
        });
    }
    Ok(())
}

fn check_cmap12(header: &BaseHeader, data: &[u8], report: &mut ValidationReport) -> Result<()> {
    let Some(info) = header.cmap12 else {
        return Ok(());
    };
    let mut s = FontScanner::new(data);
    let mut prev_end: Option<u32> = None;
    for group in 0..info.n_groups as usize {
        s.seek(info.offset as usize + group * 12)?;
        let start = s.get_u32()?;
        let end = s.get_u32()?;
        let _start_glyph_id = s.get_u32()?;
        if end < start {
            report.push_error(
                ValidationErrorKind::Cmap12GroupsUnsorted,
                format!("group {} covers U+{:04X}..U+{:04X}", group, start, end),
            );
        }
        if let Some(prev) = prev_end {
            if start <= prev {
                report.push_error(
                    ValidationErrorKind::Cmap12GroupsUnsorted,
                    format!(
                        "group {} starts at U+{:04X}, at or before the previous end U+{:04X}",
                        group, start, prev
                    ),
                );
            }
        }
        prev_end = Some(end);
    }
    Ok(())
}

impl ValidationReport {
    fn push_error(&mut self, kind: ValidationErrorKind, message: String) {
        self.errors.push(ValidationError { kind, message });
        self.is_valid = false;
    }

    /// Human-readable summary of the report.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        if self.is_valid {
            out.push_str("base is structurally valid\n");
        } else {
            out.push_str("base is INVALID\n");
        }
        for error in &self.errors {
            out.push_str(&format!("  error [{:?}]: {}\n", error.kind, error.message));
        }
        for warning in &self.warnings {
            out.push_str(&format!("  warning: {}\n", warning.message));
        }
        out
    }
}

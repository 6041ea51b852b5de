//! The backend seam: the transport that serves base payloads and glyph
//! bundles lives outside this crate.

use crate::error::Result;

/// Identity of one font as the backend and the store know it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontInfo {
    /// Store/database key, e.g. `"NotoSansCJK-Regular"`.
    pub name: String,
    /// CSS family the face binder installs under.
    pub family: String,
    pub weight: u16,
}

impl FontInfo {
    pub fn new(name: impl Into<String>, family: impl Into<String>, weight: u16) -> Self {
        Self {
            name: name.into(),
            family: family.into(),
            weight,
        }
    }
}

/// Serves font data. Failures map to `FontError::Backend`; transport-level
/// timeouts are the implementation's concern.
pub trait Backend {
    /// Fetch the base payload: header prefix + RLE-encoded body.
    fn request_font_base(&mut self, font: &FontInfo) -> Result<Vec<u8>>;

    /// Fetch a glyph bundle for the given code points, in the wire format
    /// `GlyphBundle::parse` understands. Callers never pass more code
    /// points than the configured request size.
    fn request_codepoints(&mut self, font: &FontInfo, codepoints: &[u32]) -> Result<Vec<u8>>;
}

//! The font-face seam: installing byte blobs under a family name and
//! toggling visibility is the host's job (style sheets, `@font-face`,
//! FontFace API). The manager drives the two-stage swap through this trait.

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Hidden,
    Visible,
}

/// Host-side font-face plumbing.
pub trait FaceBinder {
    /// Set the CSS visibility of the elements styled with this family.
    fn set_visibility(&mut self, family: &str, visibility: Visibility) -> Result<()>;

    /// Install (or replace) a face for `family`/`weight` from raw bytes.
    fn define_face(&mut self, family: &str, weight: u16, bytes: &[u8]) -> Result<()>;

    /// Force the face through the host's sanitizer and rasterizer, e.g. by
    /// synchronously loading a short string at a small size. Returns once
    /// glyphs would render.
    fn preload_face(&mut self, family: &str, weight: u16) -> Result<()>;

    /// Remove any face registered for `family`/`weight`.
    fn drop_face(&mut self, family: &str, weight: u16) -> Result<()>;

    /// Rename an installed face's family, completing the swap.
    fn rename_face(&mut self, from_family: &str, to_family: &str, weight: u16) -> Result<()>;
}

use std::io;

use crate::store::Slot;

pub type Result<T> = std::result::Result<T, FontError>;

#[derive(Debug, thiserror::Error)]
pub enum FontError {
    /// Structural inconsistency in the base font: bad header prefix, table
    /// mismatch, or an out-of-bounds access. Fatal for the font.
    #[error("corrupt font: {0}")]
    CorruptFont(String),

    /// The RLE-encoded base payload is malformed. Fatal for the font.
    #[error("corrupt RLE stream: {0}")]
    CorruptRle(String),

    /// A persistent slot that was expected to hold data is empty.
    /// Recovered by fetching the data from the backend.
    #[error("persistent slot {0} is empty")]
    PersistMiss(Slot),

    /// The persistent store failed to read or write. Dirty flags stay set so
    /// a later persist retries.
    #[error("persistent store I/O failure: {0}")]
    PersistIo(#[from] io::Error),

    /// The backend rejected or failed a request. The char list is left
    /// untouched so the next load retries the same code points.
    #[error("backend request failed: {0}")]
    Backend(String),

    /// A bundle delivered a glyph whose code point is absent from the cmap
    /// mapping. Non-fatal: the glyph bytes are injected, no cmap activation.
    #[error("no cmap mapping for code point U+{0:04X}")]
    MappingMiss(u32),

    /// A public operation was invoked in a state that does not allow it.
    #[error("font manager is not ready: {0}")]
    NotReady(String),
}

impl FontError {
    /// Fatal errors put the owning font manager into the `Failed` state and
    /// abort all queued work for that font.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FontError::CorruptFont(_) | FontError::CorruptRle(_))
    }
}

// incrfont: incremental font loading engine.
//
// Ships a compact base font to the client and patches glyph bundles into it
// in place as the page demands new characters, keeping the cmap and glyph
// location tables structurally valid at every step.

mod backend;
mod binder;
mod bundle;
mod cmap;
mod editor;
mod error;
mod header;
mod injector;
mod manager;
mod rle;
mod sanitizer;
mod store;
mod validator;

pub use backend::{Backend, FontInfo};
pub use binder::{FaceBinder, Visibility};
pub use bundle::{BundleFlags, GlyphBundle, GlyphRecord};
pub use cmap::{
    activate_format4, activate_format12, lookup_format4, lookup_format12, write_cmap4,
    write_cmap12,
};
pub use editor::{FontEditor, FontScanner};
pub use error::{FontError, Result};
pub use header::{
    BaseHeader, CharCmapInfo, CharsetInfo, Cmap4Info, Cmap12Info, CmapMapping, CompactGos,
    HEADER_MAGIC, HEADER_VERSION_MAJOR, Segment4, Segment12,
};
pub use injector::{GlyphToCodeMap, inject};
pub use manager::{
    DEFAULT_MAX_VISIBILITY_TIMEOUT_MS, DEFAULT_PERSIST_DELAY_MS, DEFAULT_REQ_SIZE, DirtyFlags,
    FontManager, FontManagerOptions, FontState, MINIMUM_NON_OBFUSCATION_LENGTH,
    OBFUSCATION_RANGE,
};
pub use rle::expand_base;
pub use sanitizer::{CFF_ENDCHAR, GLYF_SENTINEL, LOCA_BLOCK_SIZE, sanitize};
pub use store::{
    DirStore, FontStore, MemoryStore, SCHEMA_VERSION, Slot, decode_char_list, encode_char_list,
};
pub use validator::{
    ValidationError, ValidationErrorKind, ValidationReport, ValidationWarning, validate_base,
};

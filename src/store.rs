//! Keyed byte-blob persistence for a font's base and char list.
//!
//! Each font uses its own database named `incrfonts/<fontName>` so there is
//! no cross-font contention. Schema version 1: two slots, `base` and
//! `charlist`. A version change drops both slots and recreates them empty.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use log::warn;

use crate::editor::FontScanner;
use crate::error::{FontError, Result};

pub const SCHEMA_VERSION: u32 = 1;

/// The two persisted slots of a font database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    Base,
    CharList,
}

impl Slot {
    pub fn name(&self) -> &'static str {
        match self {
            Slot::Base => "base",
            Slot::CharList => "charlist",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Persistent byte-blob storage for one font. Implementations own schema
/// versioning: an incompatible existing database must come up empty.
pub trait FontStore {
    /// Read a slot. `PersistMiss` when the slot holds no value.
    fn get(&mut self, slot: Slot) -> Result<Vec<u8>>;

    /// Write a slot atomically.
    fn put(&mut self, slot: Slot, bytes: &[u8]) -> Result<()>;

    /// Drop a slot's value, if any.
    fn clear(&mut self, slot: Slot) -> Result<()>;
}

/// In-memory store for tests and for hosts that opt out of persistence.
#[derive(Debug, Default)]
pub struct MemoryStore {
    slots: HashMap<Slot, Vec<u8>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store carrying pre-populated slots, as a warm start would
    /// find them.
    pub fn with_slots(slots: impl IntoIterator<Item = (Slot, Vec<u8>)>) -> Self {
        Self {
            slots: slots.into_iter().collect(),
        }
    }
}

impl FontStore for MemoryStore {
    fn get(&mut self, slot: Slot) -> Result<Vec<u8>> {
        self.slots
            .get(&slot)
            .cloned()
            .ok_or(FontError::PersistMiss(slot))
    }

    fn put(&mut self, slot: Slot, bytes: &[u8]) -> Result<()> {
        self.slots.insert(slot, bytes.to_vec());
        Ok(())
    }

    fn clear(&mut self, slot: Slot) -> Result<()> {
        self.slots.remove(&slot);
        Ok(())
    }
}

/// Directory-backed store: `<root>/incrfonts/<fontName>/` holds a version
/// marker and one file per slot. Writes go through a temp file + rename so
/// a crash never leaves a half-written slot.
#[derive(Debug)]
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    pub fn open(root: &Path, font_name: &str) -> Result<Self> {
        let dir = root.join("incrfonts").join(font_name);
        fs::create_dir_all(&dir)?;

        let version_path = dir.join("version");
        let existing = match fs::read_to_string(&version_path) {
            Ok(text) => text.trim().parse::<u32>().ok(),
            Err(_) => None,
        };
        if existing != Some(SCHEMA_VERSION) {
            if existing.is_some() {
                warn!(
                    "store {} has schema {:?}; dropping slots for version {}",
                    dir.display(),
                    existing,
                    SCHEMA_VERSION
                );
            }
            for slot in [Slot::Base, Slot::CharList] {
                let path = dir.join(slot.name());
                if path.exists() {
                    fs::remove_file(&path)?;
                }
            }
            fs::write(&version_path, format!("{}\n", SCHEMA_VERSION))?;
        }

        Ok(Self { dir })
    }

    fn slot_path(&self, slot: Slot) -> PathBuf {
        self.dir.join(slot.name())
    }
}

impl FontStore for DirStore {
    fn get(&mut self, slot: Slot) -> Result<Vec<u8>> {
        let path = self.slot_path(slot);
        if !path.exists() {
            return Err(FontError::PersistMiss(slot));
        }
        Ok(fs::read(&path)?)
    }

    fn put(&mut self, slot: Slot, bytes: &[u8]) -> Result<()> {
        let tmp = self.dir.join(format!("{}.tmp", slot.name()));
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, self.slot_path(slot))?;
        Ok(())
    }

    fn clear(&mut self, slot: Slot) -> Result<()> {
        let path = self.slot_path(slot);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

/// Serialize a char list for the `charlist` slot: `u32 count`, then the
/// code points in ascending order.
pub fn encode_char_list(chars: &BTreeSet<u32>) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + chars.len() * 4);
    out.extend_from_slice(&(chars.len() as u32).to_be_bytes());
    for cp in chars {
        out.extend_from_slice(&cp.to_be_bytes());
    }
    out
}

/// Parse a persisted char list. Rejects truncation and out-of-order
/// entries.
pub fn decode_char_list(data: &[u8]) -> Result<BTreeSet<u32>> {
    let mut s = FontScanner::new(data);
    let count = s.get_u32()?;
    let mut chars = BTreeSet::new();
    let mut prev: Option<u32> = None;
    for _ in 0..count {
        let cp = s.get_u32()?;
        if prev.is_some_and(|p| cp <= p) {
            return Err(FontError::CorruptFont(
                "persisted char list is not strictly ascending".to_string(),
            ));
        }
        prev = Some(cp);
        chars.insert(cp);
    }
    if s.remaining() != 0 {
        return Err(FontError::CorruptFont(format!(
            "persisted char list has {} trailing byte(s)",
            s.remaining()
        )));
    }
    Ok(chars)
}

//! Per-font façade: owns the base buffer, serializes character loads,
//! persistence and font-face swaps, and reconciles persisted state with
//! memory.
//!
//! The engine is single-threaded cooperative. The deferred-work chains of
//! the original design are an explicit FIFO here: every public operation
//! either runs to completion or appends follow-up tasks (split request
//! remainders, face swaps) that drain in submission order. Time is a
//! logical clock the host advances through `advance_time`; the delayed
//! persist and the visibility guard hang off it.

use std::collections::{BTreeSet, VecDeque};

use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::backend::{Backend, FontInfo};
use crate::binder::{FaceBinder, Visibility};
use crate::bundle::GlyphBundle;
use crate::cmap;
use crate::error::{FontError, Result};
use crate::header::{BaseHeader, CmapMapping};
use crate::injector::{self, GlyphToCodeMap};
use crate::rle;
use crate::sanitizer;
use crate::store::{self, FontStore, Slot};

/// Maximum code points per backend request.
pub const DEFAULT_REQ_SIZE: usize = 2200;
/// Upper bound on how long text stays hidden waiting for the font.
pub const DEFAULT_MAX_VISIBILITY_TIMEOUT_MS: u64 = 3000;
/// Delay before dirty state is flushed to the store.
pub const DEFAULT_PERSIST_DELAY_MS: u64 = 1000;
/// Requests below this size are padded with spurious code points.
pub const MINIMUM_NON_OBFUSCATION_LENGTH: usize = 20;
/// Spurious code points are drawn from +/- half this range around a real
/// one.
pub const OBFUSCATION_RANGE: u32 = 256;

bitflags::bitflags! {
    /// Which persisted slots have diverged from the store since the last
    /// successful save.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DirtyFlags: u8 {
        const BASE = 1;
        const CHARLIST = 2;
    }
}

#[derive(Debug, Clone)]
pub struct FontManagerOptions {
    /// Initial CSS visibility of the font's class.
    pub visibility: Visibility,
    pub max_visibility_timeout_ms: u64,
    pub req_size: usize,
    /// When false the store is never read or written.
    pub persist_data: bool,
    pub persist_delay_ms: u64,
    /// When false, small requests go out unpadded. Leave on outside tests.
    pub obfuscate: bool,
    pub obfuscation_seed: u64,
}

impl Default for FontManagerOptions {
    fn default() -> Self {
        Self {
            visibility: Visibility::Hidden,
            max_visibility_timeout_ms: DEFAULT_MAX_VISIBILITY_TIMEOUT_MS,
            req_size: DEFAULT_REQ_SIZE,
            persist_data: true,
            persist_delay_ms: DEFAULT_PERSIST_DELAY_MS,
            obfuscate: true,
            obfuscation_seed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FontState {
    Opening,
    Loading,
    Ready,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    LoadChars,
    SetFont,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    Persist,
    Reveal,
}

#[derive(Debug, Clone, Copy)]
struct Timer {
    fire_at: u64,
    kind: TimerKind,
}

/// The base and everything derived from its header prefix.
struct LoadedFont {
    header: BaseHeader,
    mapping: CmapMapping,
    base: Vec<u8>,
}

pub struct FontManager<B: Backend, S: FontStore, F: FaceBinder> {
    info: FontInfo,
    opts: FontManagerOptions,
    backend: B,
    store: S,
    binder: F,
    state: FontState,
    font: Option<LoadedFont>,
    char_list: BTreeSet<u32>,
    chars_to_load: BTreeSet<u32>,
    dirty: DirtyFlags,
    need_set_font: bool,
    tasks: VecDeque<Task>,
    timers: Vec<Timer>,
    revealed: bool,
    now_ms: u64,
    rng: StdRng,
}

impl<B: Backend, S: FontStore, F: FaceBinder> FontManager<B, S, F> {
    /// Create the manager in `Opening` state: the font's class starts at
    /// the configured visibility and the reveal guard is armed so text is
    /// never hidden longer than `max_visibility_timeout_ms`.
    pub fn new(
        info: FontInfo,
        opts: FontManagerOptions,
        backend: B,
        store: S,
        mut binder: F,
    ) -> Result<Self> {
        binder.set_visibility(&info.family, opts.visibility)?;
        let revealed = opts.visibility == Visibility::Visible;
        let timers = vec![Timer {
            fire_at: opts.max_visibility_timeout_ms,
            kind: TimerKind::Reveal,
        }];
        let rng = StdRng::seed_from_u64(opts.obfuscation_seed);
        Ok(Self {
            info,
            opts,
            backend,
            store,
            binder,
            state: FontState::Opening,
            font: None,
            char_list: BTreeSet::new(),
            chars_to_load: BTreeSet::new(),
            dirty: DirtyFlags::empty(),
            need_set_font: false,
            tasks: VecDeque::new(),
            timers,
            revealed,
            now_ms: 0,
            rng,
        })
    }

    pub fn state(&self) -> FontState {
        self.state
    }

    pub fn char_list(&self) -> &BTreeSet<u32> {
        &self.char_list
    }

    pub fn dirty(&self) -> DirtyFlags {
        self.dirty
    }

    pub fn base_bytes(&self) -> Option<&[u8]> {
        self.font.as_ref().map(|f| f.base.as_slice())
    }

    pub fn header(&self) -> Option<&BaseHeader> {
        self.font.as_ref().map(|f| &f.header)
    }

    pub fn mapping(&self) -> Option<&CmapMapping> {
        self.font.as_ref().map(|f| &f.mapping)
    }

    /// Bring the base into memory: from the store on a warm start, from the
    /// backend (RLE decode + sanitize + cmap write) on a cold one. On
    /// success the manager is `Ready` and a face install is queued.
    pub fn initialize(&mut self) -> Result<()> {
        // Loading is allowed back in so a recoverable fetch failure can be
        // retried.
        if !matches!(self.state, FontState::Opening | FontState::Loading) {
            return Err(FontError::NotReady(format!(
                "initialize called in state {:?}",
                self.state
            )));
        }
        self.state = FontState::Loading;
        let result = self.load_base();
        let result = self.fatal_guard(result);
        match result {
            Ok(()) => {
                self.state = FontState::Ready;
                self.tasks.push_back(Task::SetFont);
                self.pump()
            }
            Err(e) => Err(e),
        }
    }

    /// Queue every code point of `text` for loading.
    pub fn request_text(&mut self, text: &str) {
        for ch in text.chars() {
            self.chars_to_load.insert(ch as u32);
        }
    }

    /// Queue explicit code points for loading.
    pub fn request_codepoints(&mut self, codepoints: &[u32]) {
        self.chars_to_load.extend(codepoints.iter().copied());
    }

    /// Fetch and inject glyphs for every queued code point not already in
    /// the base. Returns whether anything was loaded. Requests larger than
    /// `req_size` are split; the remainder drains as a follow-up task
    /// before this call returns.
    pub fn load_chars(&mut self) -> Result<bool> {
        self.ensure_ready()?;
        let result = self.run_load_chars();
        let result = self.fatal_guard(result);
        let loaded = result?;
        self.pump()?;
        Ok(loaded)
    }

    /// Install the current base bytes as the live font face using the
    /// two-stage swap, then reveal the text.
    pub fn set_font(&mut self) -> Result<()> {
        self.ensure_ready()?;
        let result = self.run_set_font();
        let result = self.fatal_guard(result);
        result?;
        self.pump()
    }

    /// Mark a slot dirty and arm the single-shot persist timer. Rapid calls
    /// coalesce: the flags are sticky and each firing only writes what is
    /// dirty at that moment.
    pub fn persist_delayed(&mut self, slot: Slot) {
        if !self.opts.persist_data {
            return;
        }
        self.dirty |= match slot {
            Slot::Base => DirtyFlags::BASE,
            Slot::CharList => DirtyFlags::CHARLIST,
        };
        self.timers.push(Timer {
            fire_at: self.now_ms + self.opts.persist_delay_ms,
            kind: TimerKind::Persist,
        });
    }

    /// Advance the logical clock and fire every timer that has come due, in
    /// deadline order. The reveal guard fires even for a failed font so
    /// fallback text becomes visible.
    pub fn advance_time(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
        loop {
            let due = self
                .timers
                .iter()
                .enumerate()
                .filter(|(_, t)| t.fire_at <= self.now_ms)
                .min_by_key(|(_, t)| t.fire_at)
                .map(|(i, _)| i);
            let Some(index) = due else {
                break;
            };
            let timer = self.timers.remove(index);
            match timer.kind {
                TimerKind::Reveal => {
                    if let Err(e) = self.reveal() {
                        warn!("visibility reveal failed: {}", e);
                    }
                }
                TimerKind::Persist => {
                    if self.state != FontState::Failed {
                        self.run_persist();
                    }
                }
            }
        }
    }

    /// Look a code point up through the live in-font cmap, format 12 first.
    pub fn lookup_glyph_id(&self, code_point: u32) -> Result<Option<u32>> {
        let Some(font) = &self.font else {
            return Err(FontError::NotReady("no base loaded".to_string()));
        };
        if let Some(gid) = cmap::lookup_format12(&font.header, &font.base, code_point)? {
            return Ok(Some(gid));
        }
        cmap::lookup_format4(&font.header, &font.base, code_point)
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            FontState::Ready => Ok(()),
            state => Err(FontError::NotReady(format!(
                "operation requires Ready, state is {:?}",
                state
            ))),
        }
    }

    fn fatal_guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_fatal() {
                warn!("font {} failed: {}", self.info.name, e);
                self.state = FontState::Failed;
                self.tasks.clear();
            }
        }
        result
    }

    /// Drain the task FIFO. Recoverable task failures are logged and do not
    /// poison the queue; fatal ones abort it.
    fn pump(&mut self) -> Result<()> {
        while let Some(task) = self.tasks.pop_front() {
            let result = match task {
                Task::LoadChars => self.run_load_chars().map(|_| ()),
                Task::SetFont => self.run_set_font(),
            };
            if let Err(e) = self.fatal_guard(result) {
                if e.is_fatal() {
                    return Err(e);
                }
                warn!("queued {:?} task failed: {}", task, e);
            }
        }
        Ok(())
    }

    fn load_base(&mut self) -> Result<()> {
        if self.opts.persist_data {
            match self.store.get(Slot::Base) {
                Ok(bytes) => {
                    debug!("font {}: warm start from store", self.info.name);
                    return self.adopt_persisted(bytes);
                }
                Err(FontError::PersistMiss(_)) => {
                    debug!("font {}: store empty, fetching base", self.info.name);
                }
                Err(e) => {
                    warn!("font {}: store read failed ({}), fetching base", self.info.name, e);
                }
            }
        }
        self.fetch_base()
    }

    fn adopt_persisted(&mut self, bytes: Vec<u8>) -> Result<()> {
        let header = BaseHeader::parse(&bytes)?;
        let mapping = CmapMapping::from_compact(&header.compact_gos);
        self.font = Some(LoadedFont {
            header,
            mapping,
            base: bytes,
        });
        self.char_list = match self.store.get(Slot::CharList) {
            Ok(bytes) => store::decode_char_list(&bytes)?,
            Err(FontError::PersistMiss(_)) => BTreeSet::new(),
            Err(e) => {
                warn!("font {}: char list read failed: {}", self.info.name, e);
                BTreeSet::new()
            }
        };
        Ok(())
    }

    fn fetch_base(&mut self) -> Result<()> {
        let payload = self.backend.request_font_base(&self.info)?;
        let header = BaseHeader::parse(&payload)?;
        let mut base = rle::expand_base(&payload, header.header_size)?;
        sanitizer::sanitize(&header, &mut base)?;
        cmap::write_cmap12(&header, &mut base)?;
        cmap::write_cmap4(&header, &mut base)?;
        let mapping = CmapMapping::from_compact(&header.compact_gos);
        self.font = Some(LoadedFont {
            header,
            mapping,
            base,
        });
        self.char_list.clear();
        self.persist_delayed(Slot::Base);
        Ok(())
    }

    /// One character-load batch: steps 1-12 of the load algorithm.
    fn run_load_chars(&mut self) -> Result<bool> {
        if self.chars_to_load.is_empty() {
            return Ok(false);
        }
        let requested: BTreeSet<u32> = self.chars_to_load.clone();
        let needed: BTreeSet<u32> = requested.difference(&self.char_list).copied().collect();
        if needed.is_empty() {
            for cp in &requested {
                self.chars_to_load.remove(cp);
            }
            return Ok(false);
        }

        let augmented = if self.opts.obfuscate {
            self.obfuscate(&needed)
        } else {
            needed.clone()
        };
        let mut to_request: Vec<u32> = augmented.into_iter().collect();

        if to_request.len() > self.opts.req_size {
            let remaining = to_request.split_off(self.opts.req_size);
            debug!(
                "font {}: splitting request, {} code point(s) deferred",
                self.info.name,
                remaining.len()
            );
            self.chars_to_load.extend(remaining);
            self.tasks.push_back(Task::LoadChars);
        }

        let bundle_bytes = self.backend.request_codepoints(&self.info, &to_request)?;

        // The backend answered: from here on these characters count as
        // present, and a failure below is a font-level corruption, not a
        // retryable fetch.
        self.char_list.extend(to_request.iter().copied());
        for cp in &to_request {
            self.chars_to_load.remove(cp);
        }
        for cp in &requested {
            if self.char_list.contains(cp) {
                self.chars_to_load.remove(cp);
            }
        }

        let font = self.font.as_mut().ok_or_else(|| {
            FontError::NotReady("no base loaded".to_string())
        })?;
        let mut glyph_to_code = GlyphToCodeMap::new();
        for cp in &to_request {
            match font.mapping.get(*cp) {
                Some(info) => glyph_to_code
                    .entry(info.glyph_id as u16)
                    .or_default()
                    .push(*cp),
                None => warn!(
                    "font {}: requested U+{:04X} has no cmap mapping",
                    self.info.name, cp
                ),
            }
        }

        let bundle = GlyphBundle::parse(&bundle_bytes)?;
        injector::inject(
            &font.header,
            &font.mapping,
            &mut font.base,
            &bundle,
            &glyph_to_code,
        )?;

        if bundle.data_len() > 0 {
            self.need_set_font = true;
            self.tasks.push_back(Task::SetFont);
        }

        self.persist_delayed(Slot::Base);
        self.persist_delayed(Slot::CharList);
        Ok(true)
    }

    /// Two-stage face swap: install the new bytes under a temporary family,
    /// preload so the host's sanitizer and rasterizer have accepted them,
    /// then drop the real face and rename the temporary one into place.
    fn run_set_font(&mut self) -> Result<()> {
        let Some(font) = &self.font else {
            return Err(FontError::NotReady("no base loaded".to_string()));
        };
        let snapshot = font.base.clone();
        let family = self.info.family.clone();
        let weight = self.info.weight;
        let tmp_family = format!("tmp-{}", family);

        self.binder.define_face(&tmp_family, weight, &snapshot)?;
        self.binder.preload_face(&tmp_family, weight)?;
        self.binder.drop_face(&family, weight)?;
        self.binder.rename_face(&tmp_family, &family, weight)?;

        self.need_set_font = false;
        self.reveal()
    }

    fn reveal(&mut self) -> Result<()> {
        if !self.revealed {
            self.binder
                .set_visibility(&self.info.family, Visibility::Visible)?;
            self.revealed = true;
        }
        Ok(())
    }

    /// Flush whatever is dirty right now. Failed writes keep their flags so
    /// a later persist retries.
    fn run_persist(&mut self) {
        let flags = self.dirty;
        self.dirty = DirtyFlags::empty();
        if flags.is_empty() {
            return;
        }

        let mut failed = DirtyFlags::empty();
        if flags.contains(DirtyFlags::BASE) {
            if let Some(font) = &self.font {
                if let Err(e) = self.store.put(Slot::Base, &font.base) {
                    warn!("font {}: base persist failed: {}", self.info.name, e);
                    failed |= DirtyFlags::BASE;
                }
            }
        }
        if flags.contains(DirtyFlags::CHARLIST) {
            let encoded = store::encode_char_list(&self.char_list);
            if let Err(e) = self.store.put(Slot::CharList, &encoded) {
                warn!("font {}: char list persist failed: {}", self.info.name, e);
                failed |= DirtyFlags::CHARLIST;
            }
        }
        self.dirty |= failed;
    }

    /// Pad a small request with spurious nearby code points so an observer
    /// of backend traffic cannot reconstruct the page's text.
    fn obfuscate(&mut self, needed: &BTreeSet<u32>) -> BTreeSet<u32> {
        if needed.len() >= MINIMUM_NON_OBFUSCATION_LENGTH {
            return needed.clone();
        }
        let deficit = MINIMUM_NON_OBFUSCATION_LENGTH - needed.len();
        let attempts = 10 * deficit + 100;
        let targets: Vec<u32> = needed.iter().copied().collect();
        let mut augmented = needed.clone();
        let mut working: BTreeSet<u32> = self.char_list.union(needed).copied().collect();

        for attempt in 0..attempts {
            if augmented.len() >= MINIMUM_NON_OBFUSCATION_LENGTH {
                break;
            }
            let around = targets[attempt % targets.len()];
            let lo = around.saturating_sub(OBFUSCATION_RANGE / 2);
            let hi = around + OBFUSCATION_RANGE / 2;
            let candidate = self.rng.random_range(lo..=hi);
            if working.insert(candidate) {
                augmented.insert(candidate);
            }
        }
        augmented
    }
}

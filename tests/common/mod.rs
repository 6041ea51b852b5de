// Shared builders for the integration tests: a synthetic base font (both
// outline flavors), the matching RLE payload, and fake collaborators with
// call recording.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use incrfont::{
    Backend, BaseHeader, BundleFlags, CmapMapping, FaceBinder, FontError, FontInfo, FontStore,
    GlyphBundle, GlyphToCodeMap, Result, Segment4, Segment12, Slot, Visibility, sanitize,
    write_cmap4, write_cmap12,
};

/// Where one synthetic glyph's bytes live inside the glyph region.
#[derive(Debug, Clone)]
pub struct GlyphSource {
    pub glyph_id: u16,
    pub offset: u32,
    pub data: Vec<u8>,
}

/// A finished synthetic base: the raw expanded buffer (as RLE decode would
/// produce it, before sanitizing), the backend payload, and the glyph
/// allocations the fake backend serves bundles from.
pub struct BuiltBase {
    pub header: BaseHeader,
    pub expanded: Vec<u8>,
    pub payload: Vec<u8>,
    pub glyphs: BTreeMap<u32, GlyphSource>,
}

pub struct BaseBuilder {
    is_ttf: bool,
    offset_size: u8,
    num_glyphs: u16,
    hmetric_count: u16,
    vmetric_count: u16,
    glyph_region_size: u32,
    chars: Vec<(u32, u16)>,
    glyph_len: u16,
    glyph_stride: u32,
}

impl BaseBuilder {
    /// TrueType flavor with long loca. Allocations are tightly packed (each
    /// glyph's planned end is the next glyph's planned start), as the build
    /// plan lays them out; `glyph_bytes` models shorter-than-allocated
    /// deliveries.
    pub fn truetype(num_glyphs: u16) -> Self {
        Self {
            is_ttf: true,
            offset_size: 4,
            num_glyphs,
            hmetric_count: num_glyphs,
            vmetric_count: 1,
            glyph_region_size: num_glyphs as u32 * 16 + 64,
            chars: Vec::new(),
            glyph_len: 12,
            glyph_stride: 12,
        }
    }

    /// CFF flavor with 2-byte CharStrings INDEX offsets and tightly packed
    /// charstring allocations.
    pub fn cff(num_glyphs: u16) -> Self {
        Self {
            is_ttf: false,
            offset_size: 2,
            num_glyphs,
            hmetric_count: num_glyphs,
            vmetric_count: 1,
            glyph_region_size: num_glyphs as u32 * 16 + 64,
            chars: Vec::new(),
            glyph_len: 12,
            glyph_stride: 12,
        }
    }

    pub fn short_loca(mut self) -> Self {
        assert!(self.is_ttf);
        self.offset_size = 2;
        self
    }

    /// Map a code point to a glyph id (one segment per code point).
    pub fn map_char(mut self, code_point: u32, glyph_id: u16) -> Self {
        assert!(glyph_id != 0 && glyph_id < self.num_glyphs);
        self.chars.push((code_point, glyph_id));
        self
    }

    pub fn glyph_bytes(mut self, len: u16, stride: u32) -> Self {
        assert!(len as u32 <= stride);
        self.glyph_len = len;
        self.glyph_stride = stride;
        self
    }

    pub fn build(mut self) -> BuiltBase {
        self.chars.sort();
        let bmp_chars: Vec<(u32, u16)> = self
            .chars
            .iter()
            .copied()
            .filter(|(cp, _)| *cp <= 0xFFFF)
            .collect();

        let mut segments4: Vec<Segment4> = bmp_chars
            .iter()
            .map(|(cp, gid)| Segment4 {
                start_code: *cp as u16,
                end_code: *cp as u16,
                id_delta: (*gid as u32).wrapping_sub(*cp) as u16,
                id_range_offset: 0,
            })
            .collect();
        if segments4.last().map(|s| s.end_code) != Some(0xFFFF) {
            // Required cmap4 sentinel segment; maps U+FFFF to .notdef.
            segments4.push(Segment4 {
                start_code: 0xFFFF,
                end_code: 0xFFFF,
                id_delta: 1,
                id_range_offset: 0,
            });
        }
        let segments12: Vec<Segment12> = self
            .chars
            .iter()
            .map(|(cp, gid)| Segment12 {
                start_code: *cp,
                length: 1,
                start_glyph_id: *gid as u32,
            })
            .collect();

        let n4 = segments4.len();
        let n12 = segments12.len();
        let ccmp_len = 2 + 8 * n4 + 2 + 4 + 12 * n12;
        // 10 fixed bytes, then 12 TLV records of 6 bytes tag+length each.
        let header_size = 10 + 12 * 6 + (1 + 4 + 2 + 4 + 1 + 4 + 2 + 4 + 2 + 8 + 8 + ccmp_len);

        let n = self.num_glyphs as usize;
        let cm04_off = header_size;
        let cm04_len = 16 + 8 * n4;
        let cm12_off = cm04_off + cm04_len;
        let lcof = cm12_off + 12 * n12;
        let loca_len = (n + 1) * self.offset_size as usize;
        let hmof = lcof + loca_len;
        let hmtx_len = self.hmetric_count as usize * 4 + (n - self.hmetric_count as usize) * 2;
        let vmof = hmof + hmtx_len;
        let vmtx_len = self.vmetric_count as usize * 4 + (n - self.vmetric_count as usize) * 2;
        let glof = vmof + vmtx_len;
        let total = glof + self.glyph_region_size as usize;

        let mut prefix = Vec::with_capacity(header_size);
        prefix.extend_from_slice(&incrfont::HEADER_MAGIC.to_be_bytes());
        prefix.push(incrfont::HEADER_VERSION_MAJOR);
        prefix.push(0);
        prefix.extend_from_slice(&(header_size as u16).to_be_bytes());
        prefix.extend_from_slice(&12u16.to_be_bytes());
        push_record(&mut prefix, b"TYPE", &[u8::from(self.is_ttf)]);
        push_record(&mut prefix, b"GLOF", &(glof as u32).to_be_bytes());
        push_record(&mut prefix, b"GLCN", &self.num_glyphs.to_be_bytes());
        push_record(&mut prefix, b"LCOF", &(lcof as u32).to_be_bytes());
        push_record(&mut prefix, b"LCFM", &[self.offset_size]);
        push_record(&mut prefix, b"HMOF", &(hmof as u32).to_be_bytes());
        push_record(&mut prefix, b"HMMC", &self.hmetric_count.to_be_bytes());
        push_record(&mut prefix, b"VMOF", &(vmof as u32).to_be_bytes());
        push_record(&mut prefix, b"VMMC", &self.vmetric_count.to_be_bytes());
        let mut cm04 = Vec::new();
        cm04.extend_from_slice(&(cm04_off as u32).to_be_bytes());
        cm04.extend_from_slice(&(cm04_len as u32).to_be_bytes());
        push_record(&mut prefix, b"CM04", &cm04);
        let mut cm12 = Vec::new();
        cm12.extend_from_slice(&(cm12_off as u32).to_be_bytes());
        cm12.extend_from_slice(&(n12 as u32).to_be_bytes());
        push_record(&mut prefix, b"CM12", &cm12);
        let mut ccmp = Vec::new();
        ccmp.extend_from_slice(&(n4 as u16).to_be_bytes());
        for seg in &segments4 {
            ccmp.extend_from_slice(&seg.start_code.to_be_bytes());
            ccmp.extend_from_slice(&seg.end_code.to_be_bytes());
            ccmp.extend_from_slice(&seg.id_delta.to_be_bytes());
            ccmp.extend_from_slice(&seg.id_range_offset.to_be_bytes());
        }
        ccmp.extend_from_slice(&0u16.to_be_bytes()); // empty glyphIdArray
        ccmp.extend_from_slice(&(n12 as u32).to_be_bytes());
        for seg in &segments12 {
            ccmp.extend_from_slice(&seg.start_code.to_be_bytes());
            ccmp.extend_from_slice(&seg.length.to_be_bytes());
            ccmp.extend_from_slice(&seg.start_glyph_id.to_be_bytes());
        }
        push_record(&mut prefix, b"CCMP", &ccmp);
        assert_eq!(prefix.len(), header_size);

        let mut expanded = vec![0u8; total];
        expanded[..header_size].copy_from_slice(&prefix);

        // cmap4 subtable header; the engine overwrites the arrays later.
        let seg_count_x2 = (n4 * 2) as u16;
        expanded[cm04_off..cm04_off + 2].copy_from_slice(&4u16.to_be_bytes());
        expanded[cm04_off + 2..cm04_off + 4].copy_from_slice(&(cm04_len as u16).to_be_bytes());
        expanded[cm04_off + 6..cm04_off + 8].copy_from_slice(&seg_count_x2.to_be_bytes());

        // A TrueType base ships with the build plan's loca staircase: every
        // glyph already owns its allocated byte range, the data is just
        // zeros until bundles arrive. CFF bases ship collapsed (all-equal)
        // offsets instead; the sanitizer staircases those.
        if self.is_ttf {
            let divisor = if self.offset_size == 2 { 2 } else { 1 };
            for i in 0..=n {
                let planned = if i == 0 {
                    0
                } else {
                    (i as u32 - 1) * self.glyph_stride
                };
                let stored = planned / divisor;
                let pos = lcof + i * self.offset_size as usize;
                let be = stored.to_be_bytes();
                expanded[pos..pos + self.offset_size as usize]
                    .copy_from_slice(&be[4 - self.offset_size as usize..]);
            }
        }

        let body = expanded[header_size..].to_vec();
        let mut payload = prefix.clone();
        payload.extend_from_slice(&rle_encode(&body));

        let header = BaseHeader::parse(&expanded).expect("builder produced a bad header");

        let mut glyphs = BTreeMap::new();
        for (cp, gid) in &self.chars {
            let offset = (*gid as u32 - 1) * self.glyph_stride;
            assert!(offset + self.glyph_len as u32 <= self.glyph_region_size);
            let data = vec![*gid as u8; self.glyph_len as usize];
            glyphs.insert(
                *cp,
                GlyphSource {
                    glyph_id: *gid,
                    offset,
                    data,
                },
            );
        }

        BuiltBase {
            header,
            expanded,
            payload,
            glyphs,
        }
    }
}

/// Run the base-load pipeline the manager performs after an RLE decode:
/// sanitize, write both cmap subtables, derive the mapping.
pub fn loaded_base(built: &BuiltBase) -> (BaseHeader, Vec<u8>, CmapMapping) {
    let header = built.header.clone();
    let mut base = built.expanded.clone();
    sanitize(&header, &mut base).unwrap();
    write_cmap12(&header, &mut base).unwrap();
    write_cmap4(&header, &mut base).unwrap();
    let mapping = CmapMapping::from_compact(&header.compact_gos);
    (header, base, mapping)
}

/// Build the bundle and glyph→code map the backend and manager would
/// produce for `codepoints`.
pub fn bundle_for(
    built: &BuiltBase,
    flags: BundleFlags,
    codepoints: &[u32],
) -> (GlyphBundle, GlyphToCodeMap) {
    let mut records = Vec::new();
    let mut glyph_to_code = GlyphToCodeMap::new();
    for cp in codepoints {
        let glyph = built.glyphs.get(cp).expect("unmapped test code point");
        records.push((
            glyph.glyph_id,
            Some(10u16),
            Some(20u16),
            glyph.offset,
            glyph.data.clone(),
        ));
        glyph_to_code.entry(glyph.glyph_id).or_default().push(*cp);
    }
    let bytes = encode_bundle(flags, &records);
    (GlyphBundle::parse(&bytes).unwrap(), glyph_to_code)
}

fn push_record(out: &mut Vec<u8>, tag: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(tag);
    out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    out.extend_from_slice(payload);
}

/// Encode `body` in the base RLE format: long equal runs become FILL ops,
/// everything else COPY ops.
pub fn rle_encode(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    let mut i = 0;
    while i < body.len() {
        let end = run_end(body, i);
        if end - i >= 8 {
            out.push(0x80 | 4); // FILL, u32 count
            out.extend_from_slice(&((end - i) as u32).to_be_bytes());
            out.push(body[i]);
            i = end;
        } else {
            let mut k = i;
            while k < body.len() && run_end(body, k) - k < 8 {
                k = run_end(body, k);
            }
            out.push(0x40 | 4); // COPY, u32 count
            out.extend_from_slice(&((k - i) as u32).to_be_bytes());
            out.extend_from_slice(&body[i..k]);
            i = k;
        }
    }
    out
}

fn run_end(body: &[u8], start: usize) -> usize {
    let b = body[start];
    let mut end = start + 1;
    while end < body.len() && body[end] == b {
        end += 1;
    }
    end
}

/// Encode a glyph bundle in the backend wire format.
pub fn encode_bundle(
    flags: BundleFlags,
    records: &[(u16, Option<u16>, Option<u16>, u32, Vec<u8>)],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&flags.bits().to_be_bytes());
    out.extend_from_slice(&(records.len() as u16).to_be_bytes());
    for (gid, hmtx, vmtx, offset, data) in records {
        out.extend_from_slice(&gid.to_be_bytes());
        if flags.contains(BundleFlags::HAS_HMTX) {
            out.extend_from_slice(&hmtx.unwrap_or(0).to_be_bytes());
        }
        if flags.contains(BundleFlags::HAS_VMTX) {
            out.extend_from_slice(&vmtx.unwrap_or(0).to_be_bytes());
        }
        out.extend_from_slice(&offset.to_be_bytes());
        out.extend_from_slice(&(data.len() as u16).to_be_bytes());
        out.extend_from_slice(data);
    }
    out
}

/// Backend double: serves the built base payload and synthesizes bundles
/// from the builder's glyph allocations, recording every call.
pub struct FakeBackend {
    pub base_payload: Vec<u8>,
    pub glyphs: BTreeMap<u32, GlyphSource>,
    pub flags: BundleFlags,
    pub base_calls: usize,
    pub codepoint_calls: Vec<Vec<u32>>,
    pub fail_next_codepoints: bool,
}

impl FakeBackend {
    pub fn new(built: &BuiltBase) -> Self {
        Self {
            base_payload: built.payload.clone(),
            glyphs: built.glyphs.clone(),
            flags: BundleFlags::empty(),
            base_calls: 0,
            codepoint_calls: Vec::new(),
            fail_next_codepoints: false,
        }
    }

    pub fn with_flags(mut self, flags: BundleFlags) -> Self {
        self.flags = flags;
        self
    }

    fn bundle_for(&self, codepoints: &[u32]) -> Vec<u8> {
        let mut seen = Vec::new();
        let mut records = Vec::new();
        for cp in codepoints {
            let Some(glyph) = self.glyphs.get(cp) else {
                continue;
            };
            if seen.contains(&glyph.glyph_id) {
                continue;
            }
            seen.push(glyph.glyph_id);
            records.push((
                glyph.glyph_id,
                Some(10u16),
                Some(20u16),
                glyph.offset,
                glyph.data.clone(),
            ));
        }
        encode_bundle(self.flags, &records)
    }
}

#[derive(Clone)]
pub struct SharedBackend(pub Rc<RefCell<FakeBackend>>);

impl SharedBackend {
    pub fn new(built: &BuiltBase) -> Self {
        Self(Rc::new(RefCell::new(FakeBackend::new(built))))
    }
}

impl Backend for SharedBackend {
    fn request_font_base(&mut self, _font: &FontInfo) -> Result<Vec<u8>> {
        let mut inner = self.0.borrow_mut();
        inner.base_calls += 1;
        Ok(inner.base_payload.clone())
    }

    fn request_codepoints(&mut self, _font: &FontInfo, codepoints: &[u32]) -> Result<Vec<u8>> {
        let mut inner = self.0.borrow_mut();
        inner.codepoint_calls.push(codepoints.to_vec());
        if inner.fail_next_codepoints {
            inner.fail_next_codepoints = false;
            return Err(FontError::Backend("injected failure".to_string()));
        }
        Ok(inner.bundle_for(codepoints))
    }
}

/// Store double with slot inspection and per-put recording.
#[derive(Default)]
pub struct FakeStore {
    pub slots: HashMap<Slot, Vec<u8>>,
    pub puts: Vec<Slot>,
    pub fail_puts: bool,
}

#[derive(Clone, Default)]
pub struct SharedStore(pub Rc<RefCell<FakeStore>>);

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slots(slots: impl IntoIterator<Item = (Slot, Vec<u8>)>) -> Self {
        let store = FakeStore {
            slots: slots.into_iter().collect(),
            ..FakeStore::default()
        };
        Self(Rc::new(RefCell::new(store)))
    }

    pub fn put_count(&self, slot: Slot) -> usize {
        self.0.borrow().puts.iter().filter(|s| **s == slot).count()
    }

    pub fn slot(&self, slot: Slot) -> Option<Vec<u8>> {
        self.0.borrow().slots.get(&slot).cloned()
    }
}

impl FontStore for SharedStore {
    fn get(&mut self, slot: Slot) -> Result<Vec<u8>> {
        self.0
            .borrow()
            .slots
            .get(&slot)
            .cloned()
            .ok_or(FontError::PersistMiss(slot))
    }

    fn put(&mut self, slot: Slot, bytes: &[u8]) -> Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.fail_puts {
            return Err(FontError::PersistIo(std::io::Error::other(
                "injected store failure",
            )));
        }
        inner.puts.push(slot);
        inner.slots.insert(slot, bytes.to_vec());
        Ok(())
    }

    fn clear(&mut self, slot: Slot) -> Result<()> {
        self.0.borrow_mut().slots.remove(&slot);
        Ok(())
    }
}

/// Face-binder double recording the call sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinderEvent {
    Visibility(String, Visibility),
    Define(String, u16, usize),
    Preload(String, u16),
    Drop(String, u16),
    Rename(String, String, u16),
}

#[derive(Default)]
pub struct RecordingBinder {
    pub events: Vec<BinderEvent>,
}

#[derive(Clone, Default)]
pub struct SharedBinder(pub Rc<RefCell<RecordingBinder>>);

impl SharedBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BinderEvent> {
        self.0.borrow().events.clone()
    }
}

impl FaceBinder for SharedBinder {
    fn set_visibility(&mut self, family: &str, visibility: Visibility) -> Result<()> {
        self.0
            .borrow_mut()
            .events
            .push(BinderEvent::Visibility(family.to_string(), visibility));
        Ok(())
    }

    fn define_face(&mut self, family: &str, weight: u16, bytes: &[u8]) -> Result<()> {
        self.0
            .borrow_mut()
            .events
            .push(BinderEvent::Define(family.to_string(), weight, bytes.len()));
        Ok(())
    }

    fn preload_face(&mut self, family: &str, weight: u16) -> Result<()> {
        self.0
            .borrow_mut()
            .events
            .push(BinderEvent::Preload(family.to_string(), weight));
        Ok(())
    }

    fn drop_face(&mut self, family: &str, weight: u16) -> Result<()> {
        self.0
            .borrow_mut()
            .events
            .push(BinderEvent::Drop(family.to_string(), weight));
        Ok(())
    }

    fn rename_face(&mut self, from_family: &str, to_family: &str, weight: u16) -> Result<()> {
        self.0.borrow_mut().events.push(BinderEvent::Rename(
            from_family.to_string(),
            to_family.to_string(),
            weight,
        ));
        Ok(())
    }
}

pub fn font_info() -> FontInfo {
    FontInfo::new("TestSans-Regular", "Test Sans", 400)
}

//! Coded character sets and their registry.
//!
//! A charset maps code points (byte-tuple values laid out per-dimension)
//! to character codes. Five methods exist: `Offset` (arithmetic),
//! `Map` (table-driven, loaded lazily from the database), `Unify`
//! (map plus a synthesized tail), `Subset` (a window into one parent)
//! and `Superset` (first-match over several parents).
//!
//! The registry is process-wide and seeded with the builtin charsets at
//! first use. `binary` is the identity over bytes 0..=0xFF and is what
//! lenient decoders tag invalid input with.
//!
//! Definition entries use the form
//! `(NAME KEY VALUE …)` with the keys `method`, `dimension`,
//! `min-range`, `max-range`, `min-code`, `max-code`, `ascii-compatible`,
//! `final-byte`, `revision`, `min-char`, `mapfile`, `parents`,
//! `subset-offset`, `define-coding` and `aliases`.

use crate::chartab::CharTable;
use crate::database::{self, Tags};
use crate::error::{Error, Result};
use crate::plist::Value;
use crate::symbol::Symbol;
use ahash::AHashMap;
use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Sentinel stored in encoder tables for "no mapping".
pub const INVALID_CODE: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharsetMethod {
    Offset,
    Map,
    Unify,
    Subset,
    Superset,
}

/// Loaded decoder/encoder pair for Map and Unify charsets.
#[derive(Debug)]
pub struct CharsetData {
    /// Index (grid position) to character code; -1 means unmapped.
    pub decoder: Vec<i32>,
    /// Character code to code point.
    pub encoder: CharTable<u32>,
}

/// A coded character set. Process-global; lives for the library session.
#[derive(Debug)]
pub struct Charset {
    pub name: Symbol,
    pub aliases: Vec<Symbol>,
    pub method: CharsetMethod,
    pub dimension: usize,
    /// Per byte position, least significant first.
    pub min_range: [u8; 4],
    pub max_range: [u8; 4],
    pub min_code: u32,
    pub max_code: u32,
    pub ascii_compatible: bool,
    pub final_byte: Option<u8>,
    pub revision: Option<u8>,
    /// 96-character set (byte range 0x20..0x7F or 0xA0..0xFF).
    pub chars96: bool,
    pub min_char: u32,
    pub max_char: u32,
    pub unified_max: u32,
    pub parents: Vec<Arc<Charset>>,
    pub subset_offset: i64,
    pub mapfile: Option<Tags>,
    pub define_coding: bool,
    width: [u32; 4],
    nchars: u32,
    data: RwLock<Option<Arc<CharsetData>>>,
}

impl Charset {
    /// Grid index of `code`, or `None` when any byte is out of range.
    pub fn code_to_index(&self, code: u32) -> Option<u32> {
        if code < self.min_code || code > self.max_code {
            return None;
        }
        let mut idx = 0u32;
        let mut stride = 1u32;
        for i in 0..self.dimension {
            let b = ((code >> (8 * i)) & 0xFF) as u8;
            if b < self.min_range[i] || b > self.max_range[i] {
                return None;
            }
            idx += (b - self.min_range[i]) as u32 * stride;
            stride *= self.width[i];
        }
        Some(idx)
    }

    /// Inverse of [`code_to_index`](Self::code_to_index).
    pub fn index_to_code(&self, mut idx: u32) -> Option<u32> {
        if idx >= self.nchars {
            return None;
        }
        let mut code = 0u32;
        for i in 0..self.dimension {
            let b = self.min_range[i] as u32 + idx % self.width[i];
            idx /= self.width[i];
            code |= b << (8 * i);
        }
        (code >= self.min_code && code <= self.max_code).then_some(code)
    }

    /// Total number of grid positions.
    pub fn index_count(&self) -> u32 {
        self.nchars
    }

    fn data(&self) -> Result<Arc<CharsetData>> {
        {
            let guard = self.data.read().expect("charset data poisoned");
            if let Some(d) = guard.as_ref() {
                return Ok(d.clone());
            }
        }
        let tags = self.mapfile.ok_or_else(|| {
            Error::Charset(format!("charset {} has no map source", self.name))
        })?;
        let pairs = database::load_charset_pairs(tags)?;
        let mut decoder = vec![-1i32; self.nchars as usize];
        let mut encoder = CharTable::new(INVALID_CODE);
        for &(code, ch) in &pairs {
            match self.code_to_index(code) {
                Some(idx) => {
                    decoder[idx as usize] = ch as i32;
                    encoder.set(ch, code)?;
                }
                None => {
                    debug!(charset = %self.name, code, "map entry outside code ranges");
                }
            }
        }
        let data = Arc::new(CharsetData { decoder, encoder });
        *self.data.write().expect("charset data poisoned") = Some(data.clone());
        debug!(charset = %self.name, entries = pairs.len(), "charset map loaded");
        Ok(data)
    }

    /// Decode one code point to a character code.
    pub fn decode_char(&self, code: u32) -> Option<u32> {
        match self.method {
            CharsetMethod::Offset => {
                let idx = self.code_to_index(code)?;
                Some(self.min_char + idx)
            }
            CharsetMethod::Map => {
                let idx = self.code_to_index(code)?;
                let data = self.data().ok()?;
                let v = *data.decoder.get(idx as usize)?;
                (v >= 0).then_some(v as u32)
            }
            CharsetMethod::Unify => {
                let idx = self.code_to_index(code)?;
                if let Ok(data) = self.data() {
                    if let Some(&v) = data.decoder.get(idx as usize) {
                        if v >= 0 {
                            return Some(v as u32);
                        }
                    }
                }
                Some(self.unified_max + 1 + idx)
            }
            CharsetMethod::Subset => {
                if code < self.min_code || code > self.max_code {
                    return None;
                }
                let parent = self.parents.first()?;
                let shifted = (code as i64 - self.subset_offset).try_into().ok()?;
                let ch = parent.decode_char(shifted)?;
                (ch >= self.min_char && ch <= self.max_char).then_some(ch)
            }
            CharsetMethod::Superset => {
                if code < self.min_code || code > self.max_code {
                    return None;
                }
                self.parents.iter().find_map(|p| p.decode_char(code))
            }
        }
    }

    /// Encode one character code to a code point.
    pub fn encode_char(&self, ch: u32) -> Option<u32> {
        match self.method {
            CharsetMethod::Offset => {
                if ch < self.min_char || ch > self.max_char {
                    return None;
                }
                self.index_to_code(ch - self.min_char)
            }
            CharsetMethod::Map => {
                let data = self.data().ok()?;
                let code = *data.encoder.get(ch).ok()?;
                (code != INVALID_CODE).then_some(code)
            }
            CharsetMethod::Unify => {
                if ch > self.unified_max {
                    let idx = ch - self.unified_max - 1;
                    return self.index_to_code(idx);
                }
                let data = self.data().ok()?;
                let code = *data.encoder.get(ch).ok()?;
                (code != INVALID_CODE).then_some(code)
            }
            CharsetMethod::Subset => {
                if ch < self.min_char || ch > self.max_char {
                    return None;
                }
                let parent = self.parents.first()?;
                let code = parent.encode_char(ch)? as i64 + self.subset_offset;
                let code: u32 = code.try_into().ok()?;
                (code >= self.min_code && code <= self.max_code).then_some(code)
            }
            CharsetMethod::Superset => self.parents.iter().find_map(|p| p.encode_char(ch)),
        }
    }

    /// Force the lazy map to load now (full-fidelity use).
    pub fn ensure_loaded(&self) -> Result<()> {
        match self.method {
            CharsetMethod::Map | CharsetMethod::Unify => self.data().map(|_| ()),
            _ => Ok(()),
        }
    }
}

/// Parameters for defining a charset.
#[derive(Debug, Clone)]
pub struct CharsetDef {
    pub name: Symbol,
    pub method: CharsetMethod,
    pub dimension: usize,
    pub min_range: Vec<u8>,
    pub max_range: Vec<u8>,
    pub min_code: Option<u32>,
    pub max_code: Option<u32>,
    pub ascii_compatible: bool,
    pub final_byte: Option<u8>,
    pub revision: Option<u8>,
    pub min_char: u32,
    pub max_char: Option<u32>,
    pub unified_max: Option<u32>,
    pub mapfile: Option<Tags>,
    pub parents: Vec<Symbol>,
    pub subset_offset: i64,
    pub define_coding: bool,
    pub aliases: Vec<Symbol>,
}

impl CharsetDef {
    pub fn new(name: &str, method: CharsetMethod, dimension: usize) -> Self {
        CharsetDef {
            name: Symbol::intern(name),
            method,
            dimension,
            min_range: Vec::new(),
            max_range: Vec::new(),
            min_code: None,
            max_code: None,
            ascii_compatible: false,
            final_byte: None,
            revision: None,
            min_char: 0,
            max_char: None,
            unified_max: None,
            mapfile: None,
            parents: Vec::new(),
            subset_offset: 0,
            define_coding: false,
            aliases: Vec::new(),
        }
    }

    pub fn range(mut self, position: usize, min: u8, max: u8) -> Self {
        while self.min_range.len() <= position {
            self.min_range.push(0);
            self.max_range.push(0);
        }
        self.min_range[position] = min;
        self.max_range[position] = max;
        self
    }
}

struct Registry {
    by_name: AHashMap<Symbol, Arc<Charset>>,
    ordered: Vec<Arc<Charset>>,
}

static REGISTRY: Lazy<RwLock<Registry>> = Lazy::new(|| {
    let mut reg = Registry {
        by_name: AHashMap::new(),
        ordered: Vec::new(),
    };
    define_builtins(&mut reg);
    RwLock::new(reg)
});

/// Define a charset; replaces any earlier definition with the same name.
pub fn define(def: CharsetDef) -> Result<Arc<Charset>> {
    let mut reg = REGISTRY.write().expect("charset registry poisoned");
    define_in(&mut reg, def)
}

fn define_in(reg: &mut Registry, def: CharsetDef) -> Result<Arc<Charset>> {
    if !(1..=4).contains(&def.dimension) {
        return Err(Error::Charset(format!(
            "charset {}: dimension {} out of 1..4",
            def.name, def.dimension
        )));
    }
    if def.min_range.len() < def.dimension {
        return Err(Error::Charset(format!(
            "charset {}: missing byte ranges",
            def.name
        )));
    }
    let mut min_range = [0u8; 4];
    let mut max_range = [0u8; 4];
    let mut width = [1u32; 4];
    let mut nchars = 1u32;
    for i in 0..def.dimension {
        if def.max_range[i] < def.min_range[i] {
            return Err(Error::Charset(format!(
                "charset {}: empty range at byte {}",
                def.name, i
            )));
        }
        min_range[i] = def.min_range[i];
        max_range[i] = def.max_range[i];
        width[i] = (def.max_range[i] - def.min_range[i]) as u32 + 1;
        nchars *= width[i];
    }
    let mut grid_min = 0u32;
    let mut grid_max = 0u32;
    for i in 0..def.dimension {
        grid_min |= (min_range[i] as u32) << (8 * i);
        grid_max |= (max_range[i] as u32) << (8 * i);
    }
    let min_code = def.min_code.unwrap_or(grid_min);
    let max_code = def.max_code.unwrap_or(grid_max);
    if min_code < grid_min || max_code > grid_max || min_code > max_code {
        return Err(Error::Charset(format!(
            "charset {}: code bounds {:#x}..{:#x} outside ranges",
            def.name, min_code, max_code
        )));
    }
    let parents: Vec<Arc<Charset>> = def
        .parents
        .iter()
        .map(|p| {
            reg.by_name
                .get(p)
                .cloned()
                .ok_or_else(|| Error::Charset(format!("unknown parent charset {}", p)))
        })
        .collect::<Result<_>>()?;
    match def.method {
        CharsetMethod::Subset => {
            let parent = parents.first().ok_or_else(|| {
                Error::Charset(format!("subset charset {} has no parent", def.name))
            })?;
            let lo = min_code as i64 - def.subset_offset;
            let hi = max_code as i64 - def.subset_offset;
            if lo < parent.min_code as i64 || hi > parent.max_code as i64 {
                return Err(Error::Charset(format!(
                    "subset charset {}: window outside parent {}",
                    def.name, parent.name
                )));
            }
        }
        CharsetMethod::Superset => {
            if parents.is_empty() {
                return Err(Error::Charset(format!(
                    "superset charset {} has no parents",
                    def.name
                )));
            }
            let lo = parents.iter().map(|p| p.min_code).min().unwrap_or(0);
            let hi = parents.iter().map(|p| p.max_code).max().unwrap_or(0);
            if min_code < lo || max_code > hi {
                return Err(Error::Charset(format!(
                    "superset charset {}: bounds not covered by parents",
                    def.name
                )));
            }
        }
        _ => {}
    }
    let chars96 = matches!(min_range[0], 0x20 | 0xA0);
    let max_char = def.max_char.unwrap_or(match def.method {
        CharsetMethod::Offset => def.min_char + nchars - 1,
        _ => crate::chartab::MAX_CHAR,
    });
    let cs = Arc::new(Charset {
        name: def.name,
        aliases: def.aliases.clone(),
        method: def.method,
        dimension: def.dimension,
        min_range,
        max_range,
        min_code,
        max_code,
        ascii_compatible: def.ascii_compatible,
        final_byte: def.final_byte,
        revision: def.revision,
        chars96,
        min_char: def.min_char,
        max_char,
        unified_max: def.unified_max.unwrap_or(max_char),
        parents,
        subset_offset: def.subset_offset,
        mapfile: def.mapfile,
        define_coding: def.define_coding,
        width,
        nchars,
        data: RwLock::new(None),
    });
    reg.by_name.insert(def.name, cs.clone());
    for alias in &def.aliases {
        reg.by_name.insert(*alias, cs.clone());
    }
    reg.ordered.retain(|c| c.name != def.name);
    reg.ordered.push(cs.clone());
    Ok(cs)
}

/// Look a charset up by name or alias.
pub fn charset(name: Symbol) -> Option<Arc<Charset>> {
    REGISTRY
        .read()
        .expect("charset registry poisoned")
        .by_name
        .get(&name)
        .cloned()
}

/// All charsets in definition order.
pub fn list() -> Vec<Arc<Charset>> {
    REGISTRY
        .read()
        .expect("charset registry poisoned")
        .ordered
        .clone()
}

/// Find the charset designated by an ISO-2022 final byte.
pub fn charset_by_final(
    final_byte: u8,
    dimension: usize,
    chars96: bool,
    revision: Option<u8>,
) -> Option<Arc<Charset>> {
    let reg = REGISTRY.read().expect("charset registry poisoned");
    let matches = |c: &&Arc<Charset>| {
        c.final_byte == Some(final_byte) && c.dimension == dimension && c.chars96 == chars96
    };
    if revision.is_some() {
        // A revision-annotated designation prefers the exact revision
        // but falls back to the unannotated charset.
        if let Some(cs) = reg
            .ordered
            .iter()
            .find(|c| matches(c) && c.revision == revision)
        {
            return Some(cs.clone());
        }
    }
    reg.ordered.iter().find(matches).cloned()
}

/// Define a charset from its database plist form:
/// `(NAME KEY VALUE …)`.
pub fn define_from_plist(form: &Value) -> Result<Arc<Charset>> {
    let items = form
        .as_list()
        .ok_or_else(|| Error::Charset("charset definition is not a list".into()))?;
    let name = items
        .first()
        .and_then(|v| v.as_symbol())
        .ok_or_else(|| Error::Charset("charset definition lacks a name".into()))?;
    let mut def = CharsetDef::new(&name.name(), CharsetMethod::Offset, 1);
    let mut i = 1;
    while i < items.len() {
        let Some(key) = items.get(i).and_then(|v| v.as_symbol()) else {
            break;
        };
        let Some(value) = items.get(i + 1) else {
            return Err(Error::Charset(format!(
                "charset {}: key {} lacks a value",
                name, key
            )));
        };
        i += 2;
        match key.name().as_str() {
            "method" => {
                let m = value
                    .as_symbol()
                    .ok_or_else(|| Error::Charset("method must be a symbol".into()))?;
                def.method = match m.name().as_str() {
                    "offset" => CharsetMethod::Offset,
                    "map" => CharsetMethod::Map,
                    "unify" => CharsetMethod::Unify,
                    "subset" => CharsetMethod::Subset,
                    "superset" => CharsetMethod::Superset,
                    other => {
                        return Err(Error::Charset(format!("unknown method {}", other)));
                    }
                };
            }
            "dimension" => {
                def.dimension = value.as_int().unwrap_or(1) as usize;
            }
            "min-range" => def.min_range = int_list(value)?,
            "max-range" => def.max_range = int_list(value)?,
            "min-code" => def.min_code = Some(value.as_int().unwrap_or(0) as u32),
            "max-code" => def.max_code = Some(value.as_int().unwrap_or(0) as u32),
            "ascii-compatible" => def.ascii_compatible = !value.is_nil(),
            "final-byte" => def.final_byte = value.as_int().map(|v| v as u8),
            "revision" => def.revision = value.as_int().map(|v| v as u8),
            "min-char" => def.min_char = value.as_int().unwrap_or(0) as u32,
            "max-char" => def.max_char = value.as_int().map(|v| v as u32),
            "unified-max" => def.unified_max = value.as_int().map(|v| v as u32),
            "subset-offset" => def.subset_offset = value.as_int().unwrap_or(0),
            "define-coding" => def.define_coding = !value.is_nil(),
            "mapfile" => {
                def.mapfile = Some((
                    Symbol::intern("charset"),
                    Symbol::intern(value.as_text().unwrap_or(&name.name())),
                    Symbol::nil(),
                    Symbol::nil(),
                ));
            }
            "parents" => {
                def.parents = value
                    .as_list()
                    .map(|l| l.iter().filter_map(|v| v.as_symbol()).collect())
                    .unwrap_or_default();
            }
            "aliases" => {
                def.aliases = value
                    .as_list()
                    .map(|l| l.iter().filter_map(|v| v.as_symbol()).collect())
                    .unwrap_or_default();
            }
            other => {
                warn!(charset = %name, key = other, "ignoring unknown charset key");
            }
        }
    }
    def.name = name;
    define(def)
}

fn int_list(value: &Value) -> Result<Vec<u8>> {
    match value {
        Value::Int(i) => Ok(vec![*i as u8]),
        Value::List(items) => Ok(items
            .iter()
            .filter_map(|v| v.as_int())
            .map(|v| v as u8)
            .collect()),
        _ => Err(Error::Charset("expected integer or integer list".into())),
    }
}

fn define_builtins(reg: &mut Registry) {
    let defs = [
        CharsetDef::new("ascii", CharsetMethod::Offset, 1)
            .range(0, 0x00, 0x7F),
        CharsetDef::new("iso-8859-1", CharsetMethod::Offset, 1)
            .range(0, 0x00, 0xFF),
        CharsetDef::new("latin-iso8859-1", CharsetMethod::Offset, 1)
            .range(0, 0xA0, 0xFF),
        CharsetDef::new("unicode", CharsetMethod::Offset, 3)
            .range(0, 0x00, 0xFF)
            .range(1, 0x00, 0xFF)
            .range(2, 0x00, 0x10),
        CharsetDef::new("binary", CharsetMethod::Offset, 1)
            .range(0, 0x00, 0xFF),
        CharsetDef::new("japanese-jisx0201-kana", CharsetMethod::Offset, 1)
            .range(0, 0x21, 0x5F),
        CharsetDef::new("latin-jisx0201", CharsetMethod::Map, 1)
            .range(0, 0x21, 0x7E),
        CharsetDef::new("japanese-jisx0208", CharsetMethod::Map, 2)
            .range(0, 0x21, 0x7E)
            .range(1, 0x21, 0x7E),
    ];
    let mut defs: Vec<CharsetDef> = defs.into();
    for def in &mut defs {
        match def.name.name().as_str() {
            "ascii" => {
                def.ascii_compatible = true;
                def.final_byte = Some(0x42);
            }
            "iso-8859-1" => {
                def.ascii_compatible = true;
            }
            "latin-iso8859-1" => {
                def.min_char = 0xA0;
                def.final_byte = Some(0x41);
            }
            "unicode" => {
                def.ascii_compatible = true;
                def.max_code = Some(0x10FFFF);
            }
            "binary" => {
                def.ascii_compatible = true;
            }
            "japanese-jisx0201-kana" => {
                def.min_char = 0xFF61;
                def.final_byte = Some(0x49);
            }
            "latin-jisx0201" => {
                def.final_byte = Some(0x4A);
                def.min_char = 0x21;
                def.max_char = Some(0x203E);
                def.mapfile = Some(database::tags(&["charset", "latin-jisx0201"]));
            }
            "japanese-jisx0208" => {
                def.final_byte = Some(0x42);
                def.min_char = 0x100;
                def.max_char = Some(0xFFFF);
                def.mapfile = Some(database::tags(&["charset", "japanese-jisx0208"]));
            }
            _ => {}
        }
    }
    // The JIS X 0201 Roman map is tiny; ship it as an in-memory blob so
    // the charset works without an on-disk database.
    database::register_blob(
        database::tags(&["charset", "latin-jisx0201"]),
        b"(0x21 0x5B 0x21) (0x5C 0xA5) (0x5D 0x7D 0x5D) (0x7E 0x203E)".to_vec(),
    );
    for def in defs {
        let name = def.name;
        if let Err(e) = define_in(reg, def) {
            warn!(charset = %name, error = %e, "builtin charset failed to register");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_offset_is_identity() {
        let cs = charset(Symbol::intern("ascii")).unwrap();
        for code in 0..=0x7F {
            assert_eq!(cs.decode_char(code), Some(code));
            assert_eq!(cs.encode_char(code), Some(code));
        }
        assert_eq!(cs.decode_char(0x80), None);
    }

    #[test]
    fn kana_offset_arithmetic() {
        let cs = charset(Symbol::intern("japanese-jisx0201-kana")).unwrap();
        assert_eq!(cs.decode_char(0x21), Some(0xFF61));
        assert_eq!(cs.decode_char(0x5F), Some(0xFF9F));
        assert_eq!(cs.encode_char(0xFF66), Some(0x26));
        assert_eq!(cs.encode_char(0x3042), None);
    }

    #[test]
    fn roman_map_loads_from_blob() {
        let cs = charset(Symbol::intern("latin-jisx0201")).unwrap();
        assert_eq!(cs.decode_char(0x41), Some(0x41));
        assert_eq!(cs.decode_char(0x5C), Some(0xA5));
        assert_eq!(cs.decode_char(0x7E), Some(0x203E));
        assert_eq!(cs.encode_char(0xA5), Some(0x5C));
    }

    #[test]
    fn map_charset_via_blob() {
        database::register_blob(
            database::tags(&["charset", "test-map-cs"]),
            b"(0x2422 0x3042) (0x2424 0x3044)".to_vec(),
        );
        let mut def = CharsetDef::new("test-map-cs", CharsetMethod::Map, 2)
            .range(0, 0x21, 0x7E)
            .range(1, 0x21, 0x7E);
        def.mapfile = Some(database::tags(&["charset", "test-map-cs"]));
        def.min_char = 0x100;
        let cs = define(def).unwrap();
        assert_eq!(cs.decode_char(0x2422), Some(0x3042));
        assert_eq!(cs.encode_char(0x3044), Some(0x2424));
        assert_eq!(cs.decode_char(0x2423), None);
        assert_eq!(cs.encode_char(0x3043), None);
    }

    #[test]
    fn unify_synthesizes_past_the_map() {
        database::register_blob(
            database::tags(&["charset", "test-unify-cs"]),
            b"(0x21 0x4E00)".to_vec(),
        );
        let mut def = CharsetDef::new("test-unify-cs", CharsetMethod::Unify, 1)
            .range(0, 0x21, 0x7E);
        def.mapfile = Some(database::tags(&["charset", "test-unify-cs"]));
        def.min_char = 0x4E00;
        def.unified_max = Some(0x2FFFF);
        let cs = define(def).unwrap();
        // Mapped entry wins.
        assert_eq!(cs.decode_char(0x21), Some(0x4E00));
        // Unmapped codes synthesize beyond unified_max.
        assert_eq!(cs.decode_char(0x22), Some(0x2FFFF + 1 + 1));
        assert_eq!(cs.encode_char(0x2FFFF + 1 + 1), Some(0x22));
        assert_eq!(cs.encode_char(0x4E00), Some(0x21));
    }

    #[test]
    fn subset_window() {
        let mut def = CharsetDef::new("test-subset", CharsetMethod::Subset, 1)
            .range(0, 0x00, 0x7F);
        def.parents = vec![Symbol::intern("iso-8859-1")];
        def.subset_offset = 0;
        def.min_char = 0;
        def.max_char = Some(0x7F);
        let cs = define(def).unwrap();
        assert_eq!(cs.decode_char(0x41), Some(0x41));
        assert_eq!(cs.decode_char(0x80), None);
    }

    #[test]
    fn superset_tries_parents_in_order() {
        let mut def = CharsetDef::new("test-superset", CharsetMethod::Superset, 1)
            .range(0, 0x00, 0xFF);
        def.parents = vec![
            Symbol::intern("ascii"),
            Symbol::intern("iso-8859-1"),
        ];
        let cs = define(def).unwrap();
        assert_eq!(cs.decode_char(0x41), Some(0x41));
        assert_eq!(cs.decode_char(0xE9), Some(0xE9)); // only in the second parent
    }

    #[test]
    fn final_byte_lookup() {
        let cs = charset_by_final(0x42, 2, false, None).unwrap();
        assert_eq!(cs.name, Symbol::intern("japanese-jisx0208"));
        let cs = charset_by_final(0x42, 1, false, None).unwrap();
        assert_eq!(cs.name, Symbol::intern("ascii"));
    }

    #[test]
    fn validation_rejects_bad_dimension() {
        let def = CharsetDef::new("bad-dim", CharsetMethod::Offset, 5);
        assert!(define(def).is_err());
    }

    #[test]
    fn define_from_plist_form() {
        let form = crate::plist::parse_one(
            "(test-plist-cs method offset dimension 1 min-range 0x30 max-range 0x39 \
             min-char 0x660 ascii-compatible nil)",
        )
        .unwrap();
        let cs = define_from_plist(&form).unwrap();
        assert_eq!(cs.decode_char(0x35), Some(0x665));
        assert_eq!(cs.encode_char(0x660), Some(0x30));
    }
}

//! libmtext-coding
//!
//! The coding-system engine: named byte-to-character codecs over a
//! pluggable `Codec` trait, instantiated per converter. Four codec
//! families are built in (charset-list, UTF-8/16/32, Shift-JIS and the
//! ISO-2022 state machine); hosts may register additional `Misc`
//! codecs by name.
//!
//! Public API:
//! - `CodingSystem` - named codec definition (registry-held)
//! - `Converter` - stateful decoder/encoder over a buffer or stream
//! - `ConvResult` - per-converter result code
//! - `define`/`define_from_plist`/`coding` - registry operations

use ahash::AHashMap;
use libmtext_core::charset::{self, Charset};
use libmtext_core::error::{Error, Result};
use libmtext_core::mtext::MText;
use libmtext_core::plist::Value;
use libmtext_core::symbol::Symbol;
use once_cell::sync::Lazy;
use std::sync::{Arc, RwLock};
use tracing::warn;

pub mod charset_codec;
pub mod converter;
pub mod iso2022;
pub mod sjis;
pub mod utf;

pub use converter::Converter;

/// Hard cap on the charsets a coding system may list.
pub const MAX_CHARSETS: usize = 32;

/// ISO-2022 behavior flags (see [`Iso2022Info::flags`]).
pub mod iso_flags {
    pub const RESET_AT_EOL: u32 = 1 << 0;
    pub const RESET_AT_CNTL: u32 = 1 << 1;
    pub const EIGHT_BIT: u32 = 1 << 2;
    pub const LONG_FORM: u32 = 1 << 3;
    pub const DESIGNATION_G0: u32 = 1 << 4;
    pub const DESIGNATION_G1: u32 = 1 << 5;
    pub const DESIGNATION_CTEXT: u32 = 1 << 6;
    pub const DESIGNATION_CTEXT_EXT: u32 = 1 << 7;
    pub const LOCKING_SHIFT: u32 = 1 << 8;
    pub const SINGLE_SHIFT: u32 = 1 << 9;
    pub const SINGLE_SHIFT_7: u32 = 1 << 10;
    pub const EUC_TW_SHIFT: u32 = 1 << 11;
    pub const ISO6429: u32 = 1 << 12;
    pub const REVISION_NUMBER: u32 = 1 << 13;
    pub const FULL_SUPPORT: u32 = 1 << 14;
}

/// Result code of the last converter operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvResult {
    Ok,
    InvalidByte,
    InvalidChar,
    InsufficientSrc,
    InsufficientDst,
    Io,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodingType {
    Charset,
    Utf,
    Iso2022,
    Misc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BomMode {
    No,
    Maybe,
    Yes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Big,
    Little,
}

/// UTF family parameters.
#[derive(Debug, Clone, Copy)]
pub struct UtfInfo {
    /// Code-unit width in bits: 8, 16 or 32.
    pub code_unit_bits: u8,
    pub bom: BomMode,
    pub endian: Endian,
    /// Accept surrogates and codes beyond U+10FFFF.
    pub full_range: bool,
}

/// ISO-2022 family parameters.
#[derive(Debug, Clone)]
pub struct Iso2022Info {
    /// Initial invocation for GL and GR: a register 0..3, or -1.
    pub initial_invocation: [i32; 2],
    /// Designation policy per charset (parallel to the charsets list):
    /// 0..3 designates that register initially; -4..-1 designates
    /// register `-v - 1` on first use; anything else never designates.
    pub designation: Vec<i32>,
    /// `iso_flags` bit set.
    pub flags: u32,
}

/// Which concrete codec a coding system instantiates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecKind {
    CharsetList,
    Utf,
    Iso2022,
    ShiftJis,
    /// Host-registered codec, by name.
    Custom(Symbol),
}

/// A named codec definition. Process-global; converters hold an `Arc`.
#[derive(Debug)]
pub struct CodingSystem {
    pub name: Symbol,
    pub aliases: Vec<Symbol>,
    pub ctype: CodingType,
    pub kind: CodecKind,
    pub charsets: Vec<Arc<Charset>>,
    pub utf: Option<UtfInfo>,
    pub iso: Option<Iso2022Info>,
    pub ascii_compatible: bool,
}

impl CodingSystem {
    /// Instantiate the codec for a new converter.
    pub fn make_codec(self: &Arc<Self>) -> Result<Box<dyn Codec>> {
        match &self.kind {
            CodecKind::CharsetList => Ok(Box::new(charset_codec::CharsetListCodec::new(self))),
            CodecKind::Utf => {
                let info = self.utf.ok_or_else(|| {
                    Error::Coding(format!("coding {} lacks UTF parameters", self.name))
                })?;
                Ok(utf::make_codec(info))
            }
            CodecKind::Iso2022 => Ok(Box::new(iso2022::Iso2022Codec::new(self)?)),
            CodecKind::ShiftJis => Ok(Box::new(sjis::ShiftJisCodec::new()?)),
            CodecKind::Custom(name) => {
                let factories = MISC_CODECS.read().expect("misc codecs poisoned");
                let factory = factories.get(name).ok_or_else(|| {
                    Error::Coding(format!("no codec registered under {}", name))
                })?;
                Ok(factory(self))
            }
        }
    }
}

/// Decode-side bookkeeping shared by every codec: leniency, the block
/// flag, the `at_most` cap, and charset-provenance run tracking.
pub struct DecodeCtl {
    pub lenient: bool,
    pub last_block: bool,
    limit: Option<usize>,
    pub produced: usize,
    run_start: usize,
    run_charset: Option<Symbol>,
}

impl DecodeCtl {
    pub fn new(lenient: bool, last_block: bool, limit: Option<usize>) -> Self {
        DecodeCtl {
            lenient,
            last_block,
            limit,
            produced: 0,
            run_start: 0,
            run_charset: None,
        }
    }

    /// Has the `at_most` cap been reached?
    pub fn full(&self) -> bool {
        self.limit.map_or(false, |l| self.produced >= l)
    }

    /// Append one character, tagged with its source charset.
    pub fn emit(&mut self, out: &mut MText, code: u32, cs: Symbol) {
        if self.run_charset != Some(cs) {
            self.flush(out);
            self.run_start = out.len();
            self.run_charset = Some(cs);
        }
        out.push_code(code);
        self.produced += 1;
    }

    /// Lenient invalid-input passthrough: the byte becomes a
    /// `binary`-tagged character.
    pub fn emit_binary(&mut self, out: &mut MText, byte: u8) {
        self.emit(out, byte as u32, Symbol::intern("binary"));
    }

    /// Close the open charset run, attaching the `charset` property.
    pub fn flush(&mut self, out: &mut MText) {
        if let Some(cs) = self.run_charset.take() {
            let _ = out.put_prop(
                self.run_start,
                out.len(),
                Symbol::intern("charset"),
                Value::Symbol(cs),
            );
        }
    }
}

/// Encode-side bookkeeping.
pub struct EncodeCtl {
    pub lenient: bool,
}

impl EncodeCtl {
    pub fn new(lenient: bool) -> Self {
        EncodeCtl { lenient }
    }

    /// Lenient substitution for an unencodable character: the literal
    /// ASCII sequence `<U+XXXX>` (`<M+…>` outside the scalar space).
    pub fn encode_sub(&self, out: &mut Vec<u8>, code: u32) {
        let surrogate = (0xD800..=0xDFFF).contains(&code);
        let s = if code <= 0xFFFF {
            if surrogate {
                format!("<M+{:04X}>", code)
            } else {
                format!("<U+{:04X}>", code)
            }
        } else if code <= 0x10FFFF {
            format!("<U+{:06X}>", code)
        } else {
            format!("<M+{:06X}>", code)
        };
        out.extend_from_slice(s.as_bytes());
    }
}

/// Codec step outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// All input consumed (or the `at_most` cap reached).
    Done,
    /// A character straddles the block end; unconsumed bytes become
    /// carry-over. Never returned in lenient mode at the last block.
    NeedMore,
    /// Strict-mode invalid input at the consumed position.
    Invalid,
}

/// One stateful codec instance. `reset` returns to the coding system's
/// initial state; `finish_encode` lets stateful encoders append their
/// closing sequences at the last block.
pub trait Codec: Send {
    fn reset(&mut self);
    fn decode(&mut self, src: &[u8], out: &mut MText, ctl: &mut DecodeCtl) -> (usize, Flow);
    fn encode(
        &mut self,
        src: &MText,
        from: usize,
        to: usize,
        out: &mut Vec<u8>,
        ctl: &mut EncodeCtl,
    ) -> (usize, Flow);
    fn finish_encode(&mut self, _out: &mut Vec<u8>) {}
}

pub type MiscFactory = Arc<dyn Fn(&Arc<CodingSystem>) -> Box<dyn Codec> + Send + Sync>;

static MISC_CODECS: Lazy<RwLock<AHashMap<Symbol, MiscFactory>>> =
    Lazy::new(|| RwLock::new(AHashMap::new()));

/// Register a host-defined codec factory for `Misc` coding systems.
pub fn register_misc_codec(name: Symbol, factory: MiscFactory) {
    MISC_CODECS
        .write()
        .expect("misc codecs poisoned")
        .insert(name, factory);
}

/// Parameters for defining a coding system.
#[derive(Debug, Clone)]
pub struct CodingDef {
    pub name: Symbol,
    pub ctype: CodingType,
    pub kind: Option<CodecKind>,
    pub charsets: Vec<Symbol>,
    pub utf: Option<UtfInfo>,
    pub iso: Option<Iso2022Info>,
    pub aliases: Vec<Symbol>,
}

impl CodingDef {
    pub fn new(name: &str, ctype: CodingType) -> Self {
        CodingDef {
            name: Symbol::intern(name),
            ctype,
            kind: None,
            charsets: Vec::new(),
            utf: None,
            iso: None,
            aliases: Vec::new(),
        }
    }
}

struct Registry {
    by_name: AHashMap<Symbol, Arc<CodingSystem>>,
    ordered: Vec<Arc<CodingSystem>>,
}

static REGISTRY: Lazy<RwLock<Registry>> = Lazy::new(|| {
    let mut reg = Registry {
        by_name: AHashMap::new(),
        ordered: Vec::new(),
    };
    define_builtins(&mut reg);
    RwLock::new(reg)
});

/// Define a coding system; replaces any earlier one with the same name.
pub fn define(def: CodingDef) -> Result<Arc<CodingSystem>> {
    let mut reg = REGISTRY.write().expect("coding registry poisoned");
    define_in(&mut reg, def)
}

fn define_in(reg: &mut Registry, def: CodingDef) -> Result<Arc<CodingSystem>> {
    if def.charsets.len() > MAX_CHARSETS {
        return Err(Error::Coding(format!(
            "coding {}: more than {} charsets",
            def.name, MAX_CHARSETS
        )));
    }
    let charsets: Vec<Arc<Charset>> = def
        .charsets
        .iter()
        .map(|name| {
            charset::charset(*name)
                .ok_or_else(|| Error::Coding(format!("unknown charset {}", name)))
        })
        .collect::<Result<_>>()?;
    if let Some(iso) = &def.iso {
        if iso.designation.len() != charsets.len() {
            return Err(Error::Coding(format!(
                "coding {}: designation list does not match charsets",
                def.name
            )));
        }
    }
    let kind = def.kind.clone().unwrap_or(match def.ctype {
        CodingType::Charset => CodecKind::CharsetList,
        CodingType::Utf => CodecKind::Utf,
        CodingType::Iso2022 => CodecKind::Iso2022,
        CodingType::Misc => CodecKind::Custom(def.name),
    });
    let ascii_compatible = match kind {
        CodecKind::Utf => def
            .utf
            .map(|u| u.code_unit_bits == 8)
            .unwrap_or(false),
        CodecKind::ShiftJis => true,
        _ => charsets.first().map(|c| c.ascii_compatible).unwrap_or(false),
    };
    let cs = Arc::new(CodingSystem {
        name: def.name,
        aliases: def.aliases.clone(),
        ctype: def.ctype,
        kind,
        charsets,
        utf: def.utf,
        iso: def.iso,
        ascii_compatible,
    });
    reg.by_name.insert(def.name, cs.clone());
    for alias in &def.aliases {
        reg.by_name.insert(*alias, cs.clone());
    }
    reg.ordered.retain(|c| c.name != def.name);
    reg.ordered.push(cs.clone());
    Ok(cs)
}

/// Look a coding system up by name or alias.
pub fn coding(name: Symbol) -> Option<Arc<CodingSystem>> {
    REGISTRY
        .read()
        .expect("coding registry poisoned")
        .by_name
        .get(&name)
        .cloned()
}

/// Convenience lookup by string name.
pub fn coding_by_name(name: &str) -> Option<Arc<CodingSystem>> {
    coding(Symbol::intern(name))
}

/// All coding systems in definition order.
pub fn list() -> Vec<Arc<CodingSystem>> {
    REGISTRY
        .read()
        .expect("coding registry poisoned")
        .ordered
        .clone()
}

/// Define a coding system from its database plist form:
/// `(NAME KEY VALUE …)` with the keys `type`, `charsets`, `flags`,
/// `designation`, `invocation`, `code-unit`, `bom`, `little-endian`
/// and `aliases`.
pub fn define_from_plist(form: &Value) -> Result<Arc<CodingSystem>> {
    let items = form
        .as_list()
        .ok_or_else(|| Error::Coding("coding definition is not a list".into()))?;
    let name = items
        .first()
        .and_then(|v| v.as_symbol())
        .ok_or_else(|| Error::Coding("coding definition lacks a name".into()))?;
    let mut ctype = CodingType::Charset;
    let mut charsets = Vec::new();
    let mut aliases = Vec::new();
    let mut flags = 0u32;
    let mut designation = Vec::new();
    let mut invocation = [0i32, -1];
    let mut code_unit = 8u8;
    let mut bom = BomMode::No;
    let mut endian = Endian::Big;
    let mut i = 1;
    while i < items.len() {
        let Some(key) = items.get(i).and_then(|v| v.as_symbol()) else {
            break;
        };
        let Some(value) = items.get(i + 1) else {
            return Err(Error::Coding(format!(
                "coding {}: key {} lacks a value",
                name, key
            )));
        };
        i += 2;
        match key.name().as_str() {
            "type" => {
                ctype = match value {
                    v if v.is_nil() => CodingType::Misc,
                    Value::Symbol(s) => match s.name().as_str() {
                        "charset" => CodingType::Charset,
                        "utf" => CodingType::Utf,
                        "iso-2022" => CodingType::Iso2022,
                        other => {
                            return Err(Error::Coding(format!("unknown coding type {}", other)));
                        }
                    },
                    _ => return Err(Error::Coding("bad coding type".into())),
                };
            }
            "charsets" => {
                charsets = value
                    .as_list()
                    .map(|l| l.iter().filter_map(|v| v.as_symbol()).collect())
                    .unwrap_or_default();
            }
            "flags" => {
                for f in value.as_list().unwrap_or(&[]) {
                    if let Some(s) = f.as_symbol() {
                        flags |= flag_bit(&s.name()).unwrap_or_else(|| {
                            warn!(coding = %name, flag = %s, "unknown ISO-2022 flag");
                            0
                        });
                    }
                }
            }
            "designation" => {
                designation = value
                    .as_list()
                    .map(|l| l.iter().filter_map(|v| v.as_int()).map(|v| v as i32).collect())
                    .unwrap_or_default();
            }
            "invocation" => {
                let ints: Vec<i32> = value
                    .as_list()
                    .map(|l| l.iter().filter_map(|v| v.as_int()).map(|v| v as i32).collect())
                    .unwrap_or_default();
                invocation[0] = ints.first().copied().unwrap_or(0);
                invocation[1] = ints.get(1).copied().unwrap_or(-1);
            }
            "code-unit" => code_unit = value.as_int().unwrap_or(8) as u8,
            "bom" => {
                bom = match value {
                    v if v.is_nil() => BomMode::No,
                    Value::Symbol(s) if s.name() == "maybe" => BomMode::Maybe,
                    _ => BomMode::Yes,
                };
            }
            "little-endian" => {
                endian = if value.is_nil() {
                    Endian::Big
                } else {
                    Endian::Little
                };
            }
            "aliases" => {
                aliases = value
                    .as_list()
                    .map(|l| l.iter().filter_map(|v| v.as_symbol()).collect())
                    .unwrap_or_default();
            }
            other => {
                warn!(coding = %name, key = other, "ignoring unknown coding key");
            }
        }
    }
    let mut def = CodingDef::new(&name.name(), ctype);
    def.name = name;
    def.charsets = charsets;
    def.aliases = aliases;
    match ctype {
        CodingType::Utf => {
            def.utf = Some(UtfInfo {
                code_unit_bits: code_unit,
                bom,
                endian,
                full_range: false,
            });
        }
        CodingType::Iso2022 => {
            def.iso = Some(Iso2022Info {
                initial_invocation: invocation,
                designation,
                flags,
            });
        }
        _ => {}
    }
    define(def)
}

/// Define a charset from its database plist form, honoring the
/// `define-coding` key: when set, a `Charset`-type coding system of the
/// same name (and aliases) is registered alongside the charset.
pub fn define_charset_from_plist(form: &Value) -> Result<Arc<Charset>> {
    let cs = charset::define_from_plist(form)?;
    if cs.define_coding {
        let mut def = CodingDef::new(&cs.name.name(), CodingType::Charset);
        def.charsets = vec![cs.name];
        def.aliases = cs.aliases.clone();
        define(def)?;
    }
    Ok(cs)
}

fn flag_bit(name: &str) -> Option<u32> {
    use iso_flags::*;
    Some(match name {
        "reset-at-eol" => RESET_AT_EOL,
        "reset-at-cntl" => RESET_AT_CNTL,
        "eight-bit" => EIGHT_BIT,
        "long-form" => LONG_FORM,
        "designation-g0" => DESIGNATION_G0,
        "designation-g1" => DESIGNATION_G1,
        "designation-ctext" => DESIGNATION_CTEXT,
        "designation-ctext-ext" => DESIGNATION_CTEXT_EXT,
        "locking-shift" => LOCKING_SHIFT,
        "single-shift" => SINGLE_SHIFT,
        "single-shift-7" => SINGLE_SHIFT_7,
        "euc-tw-shift" => EUC_TW_SHIFT,
        "iso-6429" => ISO6429,
        "revision-number" => REVISION_NUMBER,
        "full-support" => FULL_SUPPORT,
        _ => return None,
    })
}

fn define_builtins(reg: &mut Registry) {
    use iso_flags::*;
    let utf = |name: &str, bits: u8, bom: BomMode, endian: Endian, full: bool| {
        let mut d = CodingDef::new(name, CodingType::Utf);
        d.utf = Some(UtfInfo {
            code_unit_bits: bits,
            bom,
            endian,
            full_range: full,
        });
        d
    };
    let mut defs = vec![
        utf("utf-8", 8, BomMode::Maybe, Endian::Big, false),
        utf("utf-8-full", 8, BomMode::No, Endian::Big, true),
        utf("utf-16", 16, BomMode::Maybe, Endian::Big, false),
        utf("utf-16be", 16, BomMode::No, Endian::Big, false),
        utf("utf-16le", 16, BomMode::No, Endian::Little, false),
        utf("utf-32", 32, BomMode::Maybe, Endian::Big, false),
        utf("utf-32be", 32, BomMode::No, Endian::Big, false),
        utf("utf-32le", 32, BomMode::No, Endian::Little, false),
    ];
    let mut us_ascii = CodingDef::new("us-ascii", CodingType::Charset);
    us_ascii.charsets = vec![Symbol::intern("ascii")];
    defs.push(us_ascii);
    let mut latin1 = CodingDef::new("iso-8859-1", CodingType::Charset);
    latin1.charsets = vec![Symbol::intern("iso-8859-1")];
    defs.push(latin1);
    let mut binary = CodingDef::new("binary", CodingType::Charset);
    binary.charsets = vec![Symbol::intern("binary")];
    defs.push(binary);

    let mut sjis = CodingDef::new("sjis", CodingType::Misc);
    sjis.kind = Some(CodecKind::ShiftJis);
    sjis.charsets = vec![
        Symbol::intern("latin-jisx0201"),
        Symbol::intern("japanese-jisx0208"),
        Symbol::intern("japanese-jisx0201-kana"),
    ];
    sjis.aliases = vec![Symbol::intern("shift-jis"), Symbol::intern("shift_jis")];
    defs.push(sjis);

    let mut jp = CodingDef::new("iso-2022-jp", CodingType::Iso2022);
    jp.charsets = vec![
        Symbol::intern("ascii"),
        Symbol::intern("japanese-jisx0208"),
        Symbol::intern("latin-jisx0201"),
    ];
    jp.iso = Some(Iso2022Info {
        initial_invocation: [0, -1],
        designation: vec![0, -1, -1],
        flags: RESET_AT_EOL | RESET_AT_CNTL | DESIGNATION_G0,
    });
    defs.push(jp);

    let mut eucjp = CodingDef::new("euc-jp", CodingType::Iso2022);
    eucjp.charsets = vec![
        Symbol::intern("ascii"),
        Symbol::intern("japanese-jisx0208"),
        Symbol::intern("japanese-jisx0201-kana"),
    ];
    eucjp.iso = Some(Iso2022Info {
        initial_invocation: [0, 1],
        designation: vec![0, 1, 2],
        flags: EIGHT_BIT | SINGLE_SHIFT,
    });
    defs.push(eucjp);

    let mut ctext = CodingDef::new("compound-text", CodingType::Iso2022);
    ctext.charsets = vec![
        Symbol::intern("ascii"),
        Symbol::intern("latin-iso8859-1"),
    ];
    ctext.iso = Some(Iso2022Info {
        initial_invocation: [0, 1],
        designation: vec![0, 1],
        flags: EIGHT_BIT
            | DESIGNATION_G0
            | DESIGNATION_G1
            | DESIGNATION_CTEXT
            | DESIGNATION_CTEXT_EXT,
    });
    ctext.aliases = vec![Symbol::intern("ctext")];
    defs.push(ctext);

    for def in defs {
        let name = def.name;
        if let Err(e) = define_in(reg, def) {
            warn!(coding = %name, error = %e, "builtin coding system failed to register");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lookup_and_aliases() {
        assert!(coding_by_name("utf-8").is_some());
        assert!(coding_by_name("utf-16le").is_some());
        let a = coding_by_name("sjis").unwrap();
        let b = coding_by_name("shift-jis").unwrap();
        assert_eq!(a.name, b.name);
    }

    #[test]
    fn define_from_plist_utf16() {
        let form = libmtext_core::plist::parse_one(
            "(test-utf16-def type utf code-unit 16 bom maybe little-endian nil)",
        )
        .unwrap();
        let cs = define_from_plist(&form).unwrap();
        let info = cs.utf.unwrap();
        assert_eq!(info.code_unit_bits, 16);
        assert_eq!(info.bom, BomMode::Maybe);
        assert_eq!(info.endian, Endian::Big);
    }

    #[test]
    fn define_coding_key_registers_a_coding_system() {
        let form = libmtext_core::plist::parse_one(
            "(test-dc-cs method offset dimension 1 min-range 0xA0 max-range 0xFF \
             min-char 0xA0 define-coding t)",
        )
        .unwrap();
        let cs = define_charset_from_plist(&form).unwrap();
        assert!(cs.define_coding);
        let coding = coding_by_name("test-dc-cs").unwrap();
        assert_eq!(coding.ctype, CodingType::Charset);
        assert_eq!(coding.charsets[0].name, cs.name);
    }

    #[test]
    fn designation_arity_is_checked() {
        let mut def = CodingDef::new("test-bad-iso", CodingType::Iso2022);
        def.charsets = vec![Symbol::intern("ascii")];
        def.iso = Some(Iso2022Info {
            initial_invocation: [0, -1],
            designation: vec![0, 1],
            flags: 0,
        });
        assert!(define(def).is_err());
    }
}

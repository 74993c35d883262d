//! Key symbols and their alias rings.
//!
//! Every byte 0x00..=0xFF gets a pre-interned key symbol; each spelling
//! of the same key (`C-a` / `C-A`, `Escape` / `C-[`, …) is interned and
//! the full ring is stored as a property on every member, so alias
//! lookup is a bounded walk (rings never exceed eight entries). Named
//! function keys beyond the byte range (`Left`, `F1`, …) intern plain
//! symbols without a code.
//!
//! Key-sequence sources accept both spellings: an M-text whose
//! characters are one-char keys, or a list of key symbols and integer
//! codes.

use libmtext_core::error::{Error, Result};
use libmtext_core::plist::Value;
use libmtext_core::symbol::Symbol;
use once_cell::sync::Lazy;
use phf::phf_map;

/// Well-known names for control and whitespace codes.
static NAMED_KEYS: phf::Map<&'static str, u8> = phf_map! {
    "BackSpace" => 0x08,
    "Tab" => 0x09,
    "Linefeed" => 0x0A,
    "Return" => 0x0D,
    "Escape" => 0x1B,
    "space" => 0x20,
    "Delete" => 0x7F,
};

static PROP_RING: Lazy<Symbol> = Lazy::new(|| Symbol::intern("key-aliases"));
static PROP_CODE: Lazy<Symbol> = Lazy::new(|| Symbol::intern("key-code"));

/// Canonical key symbol per byte, built once.
static KEYS: Lazy<Vec<Symbol>> = Lazy::new(build_key_table);

fn spellings_for(code: u8) -> Vec<String> {
    let mut names = Vec::new();
    for (name, &c) in NAMED_KEYS.entries() {
        if c == code {
            names.push((*name).to_string());
        }
    }
    match code {
        0x00 => {
            names.push("C-@".to_string());
            names.push("C-Space".to_string());
        }
        0x01..=0x1A => {
            let base = (code + 0x60) as char; // C-a for 0x01
            names.push(format!("C-{}", base));
            names.push(format!("C-{}", base.to_ascii_uppercase()));
        }
        0x1B..=0x1F => {
            // C-[ C-\ C-] C-^ C-_
            names.push(format!("C-{}", (code + 0x40) as char));
        }
        0x20..=0x7E => {
            let ch = code as char;
            names.push(ch.to_string());
            if ch.is_ascii_uppercase() {
                names.push(format!("S-{}", ch.to_ascii_lowercase()));
                names.push(format!("S-{}", ch));
            }
        }
        0x7F => {
            names.push("C-?".to_string());
        }
        0x80..=0xFF => {
            // Meta plane: M- prefix over the low half's canonical name.
            let low = code & 0x7F;
            let base = canonical_low_name(low);
            names.push(format!("M-{}", base));
        }
    }
    names.dedup();
    names
}

fn canonical_low_name(code: u8) -> String {
    match code {
        0x00 => "C-@".to_string(),
        0x01..=0x1A => format!("C-{}", (code + 0x60) as char),
        0x1B..=0x1F => format!("C-{}", (code + 0x40) as char),
        0x20 => "space".to_string(),
        0x7F => "Delete".to_string(),
        _ => (code as char).to_string(),
    }
}

fn build_key_table() -> Vec<Symbol> {
    let mut keys = Vec::with_capacity(256);
    for code in 0u16..=0xFF {
        let code = code as u8;
        let names = spellings_for(code);
        let syms: Vec<Symbol> = names.iter().map(|n| Symbol::intern(n)).collect();
        let ring = Value::List(syms.iter().map(|&s| Value::Symbol(s)).collect());
        for &s in &syms {
            s.put_prop(*PROP_RING, ring.clone());
            s.put_prop(*PROP_CODE, Value::Int(code as i64));
        }
        keys.push(syms[0]);
    }
    keys
}

/// The canonical key symbol for a byte code.
pub fn key_for_code(code: u8) -> Symbol {
    KEYS[code as usize]
}

/// The key symbol for a character: one-char keys for ASCII, plain
/// interned symbols beyond.
pub fn key_for_char(ch: char) -> Symbol {
    if (ch as u32) < 0x100 {
        key_for_code(ch as u8)
    } else {
        Symbol::intern(&ch.to_string())
    }
}

/// The alias ring of `key` (contains `key` itself). Unringed symbols
/// yield a singleton.
pub fn alias_ring(key: Symbol) -> Vec<Symbol> {
    Lazy::force(&KEYS);
    match key.get_prop(*PROP_RING) {
        Some(Value::List(items)) => items.iter().filter_map(|v| v.as_symbol()).collect(),
        _ => vec![key],
    }
}

/// The byte code behind a key symbol, when it has one.
pub fn key_code(key: Symbol) -> Option<u8> {
    Lazy::force(&KEYS);
    match key.get_prop(*PROP_CODE) {
        Some(Value::Int(i)) => Some(i as u8),
        _ => None,
    }
}

/// Parse a key name. Spellings with modifier prefixes (`S- C- M-`)
/// that denote byte keys are already interned with ring and code
/// properties; anything else (function keys, host-specific names)
/// interns as-is.
pub fn parse_key(name: &str) -> Result<Symbol> {
    if name.is_empty() {
        return Err(Error::Im("empty key name".into()));
    }
    Lazy::force(&KEYS);
    Ok(Symbol::intern(name))
}

/// Parse one key-sequence value: an M-text (each char one key) or a
/// list of key symbols / integer codes.
pub fn parse_keyseq(value: &Value) -> Result<Vec<Symbol>> {
    match value {
        Value::Text(s) => Ok(s.chars().map(key_for_char).collect()),
        Value::List(items) => items
            .iter()
            .map(|item| match item {
                Value::Symbol(s) => parse_key(&s.name()),
                Value::Int(i) => {
                    if (0..=0xFF).contains(i) {
                        Ok(key_for_code(*i as u8))
                    } else {
                        Err(Error::Im(format!("key code {} out of range", i)))
                    }
                }
                other => Err(Error::Im(format!("bad key in sequence: {:?}", other))),
            })
            .collect(),
        other => Err(Error::Im(format!("bad key sequence: {:?}", other))),
    }
}

/// Do two key symbols denote the same key (directly or via the ring)?
pub fn keys_match(a: Symbol, b: Symbol) -> bool {
    if a == b {
        return true;
    }
    alias_ring(a).contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_aliases_share_a_ring() {
        let ca = Symbol::intern("C-a");
        let ring = alias_ring(ca);
        assert!(ring.contains(&Symbol::intern("C-A")));
        assert!(ring.contains(&ca));
        assert!(ring.len() <= 8);
    }

    #[test]
    fn escape_is_c_bracket() {
        assert!(keys_match(
            Symbol::intern("Escape"),
            Symbol::intern("C-[")
        ));
        assert_eq!(key_code(Symbol::intern("Escape")), Some(0x1B));
    }

    #[test]
    fn every_byte_ring_closes() {
        for code in 0u16..=0xFF {
            let key = key_for_code(code as u8);
            let ring = alias_ring(key);
            assert!(ring.contains(&key), "ring of {} misses itself", key);
            assert!(ring.len() <= 8, "ring of {} too long", key);
            for member in ring {
                assert_eq!(key_code(member), Some(code as u8));
            }
        }
    }

    #[test]
    fn keyseq_from_text_and_list() {
        let seq = parse_keyseq(&Value::Text("ka".into())).unwrap();
        assert_eq!(seq, vec![Symbol::intern("k"), Symbol::intern("a")]);
        let form = libmtext_core::plist::parse_one("(C-x Return 0x61)").unwrap();
        let seq = parse_keyseq(&form).unwrap();
        assert_eq!(seq[1], Symbol::intern("Return"));
        assert_eq!(seq[2], Symbol::intern("a"));
    }

    #[test]
    fn shift_alias_on_uppercase() {
        assert!(keys_match(Symbol::intern("A"), Symbol::intern("S-a")));
        assert!(!keys_match(Symbol::intern("a"), Symbol::intern("A")));
    }
}

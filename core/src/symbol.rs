//! Interned symbols with per-symbol property plists.
//!
//! A `Symbol` is a small copyable id; two symbols interned from equal
//! names compare equal and refer to the same slot in the process-wide
//! table. Each slot additionally carries a property list keyed by other
//! symbols, which the charset registry and the input-method key tables
//! use for cheap side data (alias rings, key codes).
//!
//! The table lives for the whole process behind a read-mostly `RwLock`;
//! interning an already-known name only takes the read lock.

use crate::plist::Value;
use ahash::AHashMap;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::RwLock;

/// An interned, immortal name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

struct SymbolData {
    name: String,
    props: Vec<(Symbol, Value)>,
}

struct Interner {
    data: Vec<SymbolData>,
    by_name: AHashMap<String, u32>,
}

impl Interner {
    fn new() -> Self {
        let mut it = Interner {
            data: Vec::new(),
            by_name: AHashMap::new(),
        };
        // Slots 0 and 1 are fixed so nil/t need no lock to construct.
        it.intern("nil");
        it.intern("t");
        it
    }

    fn intern(&mut self, name: &str) -> u32 {
        if let Some(&id) = self.by_name.get(name) {
            return id;
        }
        let id = self.data.len() as u32;
        self.data.push(SymbolData {
            name: name.to_string(),
            props: Vec::new(),
        });
        self.by_name.insert(name.to_string(), id);
        id
    }
}

static INTERNER: Lazy<RwLock<Interner>> = Lazy::new(|| RwLock::new(Interner::new()));

impl Symbol {
    /// Intern `name`, returning the canonical symbol for it.
    pub fn intern(name: &str) -> Symbol {
        {
            let it = INTERNER.read().expect("symbol table poisoned");
            if let Some(&id) = it.by_name.get(name) {
                return Symbol(id);
            }
        }
        let mut it = INTERNER.write().expect("symbol table poisoned");
        Symbol(it.intern(name))
    }

    /// The `nil` symbol, used for empty tag slots and absent values.
    pub const fn nil() -> Symbol {
        Symbol(0)
    }

    /// The `t` symbol.
    pub const fn t() -> Symbol {
        Symbol(1)
    }

    pub fn is_nil(self) -> bool {
        self.0 == 0
    }

    /// The symbol's name. Returns an owned string because the table may
    /// reallocate behind the lock.
    pub fn name(self) -> String {
        let it = INTERNER.read().expect("symbol table poisoned");
        it.data[self.0 as usize].name.clone()
    }

    /// Attach or replace property `key` on this symbol.
    pub fn put_prop(self, key: Symbol, value: Value) {
        let mut it = INTERNER.write().expect("symbol table poisoned");
        let props = &mut it.data[self.0 as usize].props;
        for slot in props.iter_mut() {
            if slot.0 == key {
                slot.1 = value;
                return;
            }
        }
        props.push((key, value));
    }

    /// Fetch property `key`, if present.
    pub fn get_prop(self, key: Symbol) -> Option<Value> {
        let it = INTERNER.read().expect("symbol table poisoned");
        it.data[self.0 as usize]
            .props
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.clone())
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.name())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Symbol {
        Symbol::intern(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let a = Symbol::intern("utf-8");
        let b = Symbol::intern("utf-8");
        assert_eq!(a, b);
        assert_eq!(a.name(), "utf-8");
    }

    #[test]
    fn nil_and_t_are_fixed() {
        assert_eq!(Symbol::intern("nil"), Symbol::nil());
        assert_eq!(Symbol::intern("t"), Symbol::t());
        assert!(Symbol::nil().is_nil());
        assert!(!Symbol::t().is_nil());
    }

    #[test]
    fn properties_replace_by_key() {
        let s = Symbol::intern("prop-test-sym");
        let k = Symbol::intern("prop-test-key");
        assert!(s.get_prop(k).is_none());
        s.put_prop(k, Value::Int(1));
        s.put_prop(k, Value::Int(2));
        assert_eq!(s.get_prop(k), Some(Value::Int(2)));
    }
}

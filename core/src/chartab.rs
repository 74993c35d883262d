//! Sparse map from character code to value.
//!
//! A `CharTable` is the universal "function over code points" container:
//! charset encoders, category assignments and user data all store into
//! one. It is a four-level trie whose levels cover 2^22, 2^16, 2^12 and
//! 2^7 codes respectively, so a lookup costs at most four hops. Slots
//! that were never set answer the table default without allocating, and
//! `set_range` re-collapses sub-trees that become uniform.
//!
//! ASCII gets a separate inline array so the common case never touches
//! the tree.

use crate::error::{Error, Result};

/// Index shift per depth; a slot at depth d spans `1 << SHIFT[d]` codes.
const SHIFT: [u32; 4] = [16, 12, 7, 0];

/// Slot count per depth: 64, 16, 32, 128.
const SIZE: [usize; 4] = [64, 16, 32, 128];

const ASCII_LIMIT: u32 = 0x80;

/// Highest valid character code.
pub const MAX_CHAR: u32 = 0x10FFFF;

#[derive(Clone, Debug)]
enum Slot<V> {
    /// Never set; the table default applies.
    Empty,
    /// Uniform value over the slot's whole span.
    Val(V),
    /// Subdivided (never at depth 3).
    Sub(Box<Node<V>>),
}

#[derive(Clone, Debug)]
struct Node<V> {
    slots: Vec<Slot<V>>,
}

impl<V: Clone + PartialEq> Node<V> {
    fn new(depth: usize) -> Self {
        let mut slots = Vec::with_capacity(SIZE[depth]);
        for _ in 0..SIZE[depth] {
            slots.push(Slot::Empty);
        }
        Node { slots }
    }

    fn filled(depth: usize, v: &Slot<V>) -> Self {
        let mut slots = Vec::with_capacity(SIZE[depth]);
        for _ in 0..SIZE[depth] {
            slots.push(match v {
                Slot::Empty => Slot::Empty,
                Slot::Val(x) => Slot::Val(x.clone()),
                Slot::Sub(_) => unreachable!("uniform slot cannot be subdivided"),
            });
        }
        Node { slots }
    }
}

/// Sparse map from 21-bit character code to `V`.
#[derive(Clone, Debug)]
pub struct CharTable<V> {
    default: V,
    max_char: u32,
    ascii: Vec<Option<V>>,
    root: Node<V>,
}

impl<V: Clone + PartialEq> CharTable<V> {
    /// New table answering `default` everywhere, covering codes up to
    /// [`MAX_CHAR`].
    pub fn new(default: V) -> Self {
        Self::with_max(default, MAX_CHAR)
    }

    /// New table covering codes `0..=max_char`.
    pub fn with_max(default: V, max_char: u32) -> Self {
        CharTable {
            default,
            max_char: max_char.min(MAX_CHAR),
            ascii: vec![None; ASCII_LIMIT as usize],
            root: Node::new(0),
        }
    }

    pub fn default_value(&self) -> &V {
        &self.default
    }

    pub fn max_char(&self) -> u32 {
        self.max_char
    }

    fn check(&self, c: u32) -> Result<()> {
        if c > self.max_char {
            return Err(Error::Range(format!(
                "character code {:#x} exceeds table maximum {:#x}",
                c, self.max_char
            )));
        }
        Ok(())
    }

    /// Value at `c`.
    pub fn get(&self, c: u32) -> Result<&V> {
        self.check(c)?;
        if c < ASCII_LIMIT {
            return Ok(self.ascii[c as usize].as_ref().unwrap_or(&self.default));
        }
        let mut node = &self.root;
        for depth in 0..4 {
            let idx = ((c >> SHIFT[depth]) as usize) & (SIZE[depth] - 1);
            match &node.slots[idx] {
                Slot::Empty => return Ok(&self.default),
                Slot::Val(v) => return Ok(v),
                Slot::Sub(sub) => node = sub,
            }
        }
        unreachable!("depth-3 slots are never subdivided")
    }

    /// Set `c` to `v`.
    pub fn set(&mut self, c: u32, v: V) -> Result<()> {
        self.check(c)?;
        if c < ASCII_LIMIT {
            self.ascii[c as usize] = Some(v);
            return Ok(());
        }
        let mut node = &mut self.root;
        for depth in 0..3 {
            let idx = ((c >> SHIFT[depth]) as usize) & (SIZE[depth] - 1);
            let slot = &mut node.slots[idx];
            if !matches!(slot, Slot::Sub(_)) {
                let filled = Node::filled(depth + 1, slot);
                *slot = Slot::Sub(Box::new(filled));
            }
            match slot {
                Slot::Sub(sub) => node = sub,
                _ => unreachable!(),
            }
        }
        let idx = (c as usize) & (SIZE[3] - 1);
        node.slots[idx] = Slot::Val(v);
        Ok(())
    }

    /// Set every code in `from..=to` to `v`. Sub-trees that become
    /// uniform collapse back to a single slot.
    pub fn set_range(&mut self, from: u32, to: u32, v: V) -> Result<()> {
        if from > to {
            return Err(Error::Range(format!(
                "empty range {:#x}..={:#x}",
                from, to
            )));
        }
        self.check(to)?;
        if from < ASCII_LIMIT {
            let hi = to.min(ASCII_LIMIT - 1);
            for c in from..=hi {
                self.ascii[c as usize] = Some(v.clone());
            }
        }
        if to >= ASCII_LIMIT {
            let lo = from.max(ASCII_LIMIT);
            let store = if v == self.default {
                Slot::Empty
            } else {
                Slot::Val(v)
            };
            Self::range_rec(&mut self.root, 0, 0, lo, to, &store);
        }
        Ok(())
    }

    fn range_rec(node: &mut Node<V>, depth: usize, base: u32, from: u32, to: u32, v: &Slot<V>) {
        let span = 1u32 << SHIFT[depth];
        for idx in 0..SIZE[depth] {
            let lo = base + idx as u32 * span;
            let hi = lo + span - 1;
            if hi < from || lo > to {
                continue;
            }
            let slot = &mut node.slots[idx];
            if lo >= from && hi <= to {
                *slot = match v {
                    Slot::Empty => Slot::Empty,
                    Slot::Val(x) => Slot::Val(x.clone()),
                    Slot::Sub(_) => unreachable!(),
                };
                continue;
            }
            // Partial overlap: subdivide and recurse.
            debug_assert!(depth < 3, "depth-3 slots span a single code");
            if !matches!(slot, Slot::Sub(_)) {
                let filled = Node::filled(depth + 1, slot);
                *slot = Slot::Sub(Box::new(filled));
            }
            if let Slot::Sub(sub) = slot {
                Self::range_rec(sub, depth + 1, lo, from, to, v);
                Self::collapse(slot);
            }
        }
    }

    /// Replace a subdivided slot whose children all agree with one slot.
    fn collapse(slot: &mut Slot<V>) {
        let uniform = match slot {
            Slot::Sub(node) => {
                let mut it = node.slots.iter();
                let first = it.next();
                match first {
                    Some(Slot::Sub(_)) | None => None,
                    Some(f) => {
                        if it.all(|s| match (f, s) {
                            (Slot::Empty, Slot::Empty) => true,
                            (Slot::Val(a), Slot::Val(b)) => a == b,
                            _ => false,
                        }) {
                            match f {
                                Slot::Empty => Some(Slot::Empty),
                                Slot::Val(x) => Some(Slot::Val(x.clone())),
                                Slot::Sub(_) => None,
                            }
                        } else {
                            None
                        }
                    }
                }
            }
            _ => None,
        };
        if let Some(u) = uniform {
            *slot = u;
        }
    }

    /// Call `f(from, to, value)` for every maximal run of consecutive
    /// codes whose value differs from the table default.
    pub fn for_each_run<F: FnMut(u32, u32, &V)>(&self, mut f: F) {
        let mut run: Option<(u32, u32, V)> = None;
        {
            let mut feed = |from: u32, to: u32, v: &V| {
                if *v == self.default {
                    return;
                }
                if let Some((_, rto, rv)) = &mut run {
                    if *rto + 1 == from && &*rv == v {
                        *rto = to;
                        return;
                    }
                }
                if let Some((rfrom, rto, rv)) = run.take() {
                    f(rfrom, rto, &rv);
                }
                run = Some((from, to, v.clone()));
            };
            for (i, slot) in self.ascii.iter().enumerate() {
                if let Some(v) = slot {
                    feed(i as u32, i as u32, v);
                }
            }
            Self::runs_rec(&self.root, 0, 0, self.max_char, &mut feed);
        }
        if let Some((from, to, v)) = run {
            f(from, to, &v);
        }
    }

    fn runs_rec<F: FnMut(u32, u32, &V)>(
        node: &Node<V>,
        depth: usize,
        base: u32,
        max_char: u32,
        feed: &mut F,
    ) {
        let span = 1u32 << SHIFT[depth];
        for (idx, slot) in node.slots.iter().enumerate() {
            let lo = base + idx as u32 * span;
            if lo > max_char {
                return;
            }
            // The tree region below ASCII is shadowed by the inline array.
            let hi = (lo + span - 1).min(max_char);
            if hi < ASCII_LIMIT {
                continue;
            }
            let lo = lo.max(ASCII_LIMIT);
            match slot {
                Slot::Empty => {}
                Slot::Val(v) => feed(lo, hi, v),
                Slot::Sub(sub) => Self::runs_rec(sub, depth + 1, base + idx as u32 * span, max_char, feed),
            }
        }
    }

    /// Smallest code whose value differs from the default.
    pub fn min_nondefault(&self) -> Option<u32> {
        let mut found = None;
        self.for_each_run(|from, _, _| {
            if found.is_none() {
                found = Some(from);
            }
        });
        found
    }

    /// Largest code whose value differs from the default.
    pub fn max_nondefault(&self) -> Option<u32> {
        let mut found = None;
        self.for_each_run(|_, to, _| {
            found = Some(to);
        });
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_everywhere() {
        let t: CharTable<i32> = CharTable::new(-1);
        assert_eq!(*t.get(0).unwrap(), -1);
        assert_eq!(*t.get(0x3042).unwrap(), -1);
        assert_eq!(*t.get(MAX_CHAR).unwrap(), -1);
        assert!(t.get(MAX_CHAR + 1).is_err());
    }

    #[test]
    fn set_then_get() {
        let mut t = CharTable::new(0u32);
        t.set(0x41, 7).unwrap();
        t.set(0x3042, 9).unwrap();
        t.set(0x3042, 10).unwrap();
        assert_eq!(*t.get(0x41).unwrap(), 7);
        assert_eq!(*t.get(0x3042).unwrap(), 10);
        assert_eq!(*t.get(0x3043).unwrap(), 0);
    }

    #[test]
    fn set_range_covers_every_code() {
        let mut t = CharTable::new(0i32);
        t.set_range(0x60, 0x2100, 5).unwrap();
        assert_eq!(*t.get(0x5F).unwrap(), 0);
        assert_eq!(*t.get(0x60).unwrap(), 5);
        assert_eq!(*t.get(0x7F).unwrap(), 5);
        assert_eq!(*t.get(0x80).unwrap(), 5);
        assert_eq!(*t.get(0x1000).unwrap(), 5);
        assert_eq!(*t.get(0x2100).unwrap(), 5);
        assert_eq!(*t.get(0x2101).unwrap(), 0);
    }

    #[test]
    fn set_range_back_to_default_collapses() {
        let mut t = CharTable::new(0i32);
        t.set_range(0x1000, 0x1FFF, 3).unwrap();
        t.set_range(0x1000, 0x1FFF, 0).unwrap();
        assert_eq!(t.min_nondefault(), None);
    }

    #[test]
    fn runs_report_maximal_spans() {
        let mut t = CharTable::new(0i32);
        t.set_range(0x100, 0x1FF, 1).unwrap();
        t.set_range(0x200, 0x2FF, 1).unwrap();
        t.set_range(0x400, 0x40F, 2).unwrap();
        let mut runs = Vec::new();
        t.for_each_run(|from, to, v| runs.push((from, to, *v)));
        assert_eq!(runs, vec![(0x100, 0x2FF, 1), (0x400, 0x40F, 2)]);
    }

    #[test]
    fn runs_cross_ascii_boundary() {
        let mut t = CharTable::new(0i32);
        t.set_range(0x70, 0x8F, 4).unwrap();
        let mut runs = Vec::new();
        t.for_each_run(|from, to, v| runs.push((from, to, *v)));
        assert_eq!(runs, vec![(0x70, 0x8F, 4)]);
    }

    #[test]
    fn min_max_nondefault() {
        let mut t = CharTable::new(0i32);
        assert_eq!(t.min_nondefault(), None);
        t.set(0x3042, 1).unwrap();
        t.set(0x41, 1).unwrap();
        t.set(0x10FF00, 1).unwrap();
        assert_eq!(t.min_nondefault(), Some(0x41));
        assert_eq!(t.max_nondefault(), Some(0x10FF00));
    }
}

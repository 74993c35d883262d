//! The per-session interpreter state and key-handling loop.
//!
//! A context walks the current state's map trie one key at a time.
//! Descending rewinds the pre-edit to the state-entry snapshot and runs
//! the node's map actions; bottoming out runs branch actions and falls
//! back to the state root; an unmatched key at the initial root is
//! reported unhandled. Shifting to the initial state commits the
//! pre-edit. `filter` drives `handle_key` until the key buffer drains,
//! with a defensive reset after 100 iterations.

use crate::action::{Action, ArithOp, Expr, OpKind, Pos, Pushback, SelectArg};
use crate::definition::ImDef;
use crate::keysym;
use crate::InputMethod;
use ahash::AHashMap;
use libmtext_core::error::Result;
use libmtext_core::mtext::MText;
use libmtext_core::plist::Value;
use libmtext_core::symbol::Symbol;
use std::sync::Arc;
use tracing::{debug, warn};

pub const CHANGED_PREEDIT: u32 = 1 << 0;
pub const CHANGED_CANDIDATES: u32 = 1 << 1;
pub const CHANGED_STATE: u32 = 1 << 2;
pub const CHANGED_CURSOR: u32 = 1 << 3;
pub const CHANGED_PRODUCED: u32 = 1 << 4;

const MAX_HANDLE_ITERATIONS: usize = 100;
const MAX_MACRO_DEPTH: usize = 64;

/// Host callbacks for surrounding text.
pub trait ImHost: Send {
    fn surrounding_supported(&self) -> bool {
        false
    }
    /// Character at `offset` from the host cursor (negative = before).
    fn surrounding_char(&mut self, _offset: i64) -> u32 {
        0
    }
    fn delete_surrounding(&mut self, _before: usize, _after: usize) {}
}

#[derive(Debug, Clone)]
pub struct CandState {
    pub groups: Vec<Vec<String>>,
    pub index: usize,
    pub from: usize,
    pub to: usize,
}

impl CandState {
    fn total(&self) -> usize {
        self.groups.iter().map(|g| g.len()).sum()
    }

    fn text(&self, index: usize) -> Option<&str> {
        let mut i = index;
        for g in &self.groups {
            if i < g.len() {
                return Some(&g[i]);
            }
            i -= g.len();
        }
        None
    }

    /// Index of the first candidate of the group containing `index`,
    /// and of the next group.
    fn group_bounds(&self, index: usize) -> (usize, usize) {
        let mut start = 0;
        for g in &self.groups {
            if index < start + g.len() {
                return (start, start + g.len());
            }
            start += g.len();
        }
        (0, self.total())
    }
}

enum Control {
    Normal,
    Stop,
}

/// One input session over an opened input method.
pub struct InputContext {
    im: Arc<InputMethod>,
    generation: u64,
    state: usize,
    prev_state: Option<usize>,
    node: usize,
    keys: Vec<Symbol>,
    key_head: usize,
    state_key_head: usize,
    preedit: MText,
    preedit_saved: MText,
    cursor: usize,
    saved_cursor: usize,
    produced: MText,
    markers: AHashMap<Symbol, usize>,
    vars: AHashMap<Symbol, Value>,
    candidates: Option<CandState>,
    saved_candidates: Option<CandState>,
    candidate_show: bool,
    pending_combining: Option<u32>,
    cluster_start: Option<usize>,
    key_unhandled: bool,
    state_shifted: bool,
    /// Whether the key under processing was consumed by a descend.
    cur_key_consumed: bool,
    changed: u32,
    host: Option<Box<dyn ImHost>>,
}

impl InputContext {
    pub fn new(im: Arc<InputMethod>) -> Self {
        let def = im.def();
        let generation = im.generation();
        let vars = im.merged_variables();
        InputContext {
            im,
            generation,
            state: 0,
            prev_state: None,
            node: def.states[0].root,
            keys: Vec::new(),
            key_head: 0,
            state_key_head: 0,
            preedit: MText::new(),
            preedit_saved: MText::new(),
            cursor: 0,
            saved_cursor: 0,
            produced: MText::new(),
            markers: AHashMap::new(),
            vars,
            candidates: None,
            saved_candidates: None,
            candidate_show: false,
            pending_combining: None,
            cluster_start: None,
            key_unhandled: false,
            state_shifted: false,
            cur_key_consumed: false,
            changed: 0,
            host: None,
        }
    }

    pub fn set_host(&mut self, host: Box<dyn ImHost>) {
        self.host = Some(host);
    }

    // ---- observers --------------------------------------------------

    pub fn preedit(&self) -> &MText {
        &self.preedit
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn produced(&self) -> &MText {
        &self.produced
    }

    /// Drain the committed text accumulated so far.
    pub fn take_produced(&mut self) -> MText {
        std::mem::take(&mut self.produced)
    }

    pub fn candidates(&self) -> Option<&CandState> {
        self.candidates.as_ref()
    }

    pub fn candidates_shown(&self) -> bool {
        self.candidate_show
    }

    pub fn state_name(&self) -> Symbol {
        self.im.def().states[self.state].name
    }

    pub fn variable(&self, name: Symbol) -> Option<Value> {
        self.vars.get(&name).cloned()
    }

    pub fn set_variable(&mut self, name: Symbol, value: Value) {
        self.vars.insert(name, value);
    }

    /// Change flags accumulated since the caller last cleared them.
    pub fn changed(&self) -> u32 {
        self.changed
    }

    pub fn clear_changed(&mut self) {
        self.changed = 0;
    }

    // ---- lifecycle --------------------------------------------------

    /// Discard composition state, keeping produced text and variables.
    pub fn reset(&mut self) {
        let def = self.im.def();
        self.reinit(&def);
        self.keys.clear();
        self.key_head = 0;
    }

    fn reinit(&mut self, def: &ImDef) {
        self.state = 0;
        self.prev_state = None;
        self.node = def.states[0].root;
        self.preedit.clear();
        self.preedit_saved.clear();
        self.cursor = 0;
        self.saved_cursor = 0;
        self.markers.clear();
        self.candidates = None;
        self.saved_candidates = None;
        self.pending_combining = None;
        self.cluster_start = None;
        self.key_head = 0;
        self.state_key_head = 0;
        self.changed |= CHANGED_PREEDIT | CHANGED_CANDIDATES | CHANGED_STATE;
    }

    // ---- main loop --------------------------------------------------

    /// Feed one key. Returns `Ok(true)` when the input method consumed
    /// it, `Ok(false)` when the caller should handle it itself.
    pub fn filter(&mut self, key: Symbol) -> Result<bool> {
        if self.maybe_reload(key)? {
            return Ok(true);
        }
        let def = self.im.def();
        if self.generation != self.im.generation() {
            self.reinit(&def);
            self.keys.clear();
            self.generation = self.im.generation();
        }
        self.key_unhandled = false;
        self.keys.push(key);
        let mut steps = 0;
        while self.key_head < self.keys.len() {
            steps += 1;
            if steps >= MAX_HANDLE_ITERATIONS {
                warn!(im = %self.im.name, "key handling did not settle; resetting");
                self.reinit(&def);
                self.keys.clear();
                break;
            }
            self.handle_key(&def)?;
            if self.key_unhandled {
                break;
            }
        }
        Ok(!self.key_unhandled)
    }

    /// Re-load the definition when the configured reload key arrives.
    fn maybe_reload(&mut self, key: Symbol) -> Result<bool> {
        let Some(seqs) = self.im.command_keys(Symbol::intern("reload")) else {
            return Ok(false);
        };
        let hit = seqs
            .iter()
            .any(|seq| seq.len() == 1 && keysym::keys_match(seq[0], key));
        if !hit {
            return Ok(false);
        }
        debug!(im = %self.im.name, "reloading input method");
        self.im.reload()?;
        let def = self.im.def();
        self.reinit(&def);
        self.keys.clear();
        self.generation = self.im.generation();
        self.vars = self.im.merged_variables();
        Ok(true)
    }

    fn handle_key(&mut self, def: &ImDef) -> Result<()> {
        let key = self.keys[self.key_head];
        if let Some(child) = def.submap(self.node, key) {
            self.key_head += 1;
            self.cur_key_consumed = true;
            // Rewind to the state-entry snapshot before replaying the
            // deeper node's actions.
            self.preedit = self.preedit_saved.clone();
            self.cursor = self.saved_cursor;
            self.candidates = self.saved_candidates.clone();
            self.changed |= CHANGED_PREEDIT;
            self.node = child;
            self.state_shifted = false;
            if let Some(acts) = def.nodes[child].map_actions.clone() {
                self.run_actions(def, &acts, 0)?;
            }
            if self.key_unhandled {
                return Ok(());
            }
            let terminal = def.nodes[child].submaps.is_empty();
            if terminal || self.state_shifted {
                if let Some(acts) = def.nodes[child].branch_actions.clone() {
                    self.run_actions(def, &acts, 0)?;
                }
                if self.key_unhandled {
                    return Ok(());
                }
                if self.node != def.states[self.state].root {
                    self.shift_to(def, self.state);
                }
            }
            return Ok(());
        }
        // No submap accepts this key.
        self.cur_key_consumed = false;
        let at_init_root = self.state == 0 && self.node == def.states[0].root;
        let branch = def.nodes[self.node].branch_actions.clone();
        match branch {
            Some(acts) => {
                self.state_shifted = false;
                let before = self.changed;
                self.run_actions(def, &acts, 0)?;
                if self.key_unhandled {
                    return Ok(());
                }
                if at_init_root && before == self.changed && !self.state_shifted {
                    self.mark_unhandled();
                    return Ok(());
                }
                if at_init_root {
                    // A second look at the same key from the root
                    // cannot match anything new; consume it.
                    self.key_head += 1;
                }
                if !self.state_shifted {
                    self.shift_to(def, 0);
                }
            }
            None => {
                if at_init_root {
                    self.mark_unhandled();
                } else {
                    self.shift_to(def, 0);
                }
            }
        }
        Ok(())
    }

    fn mark_unhandled(&mut self) {
        self.key_unhandled = true;
        if self.key_head < self.keys.len() {
            self.keys.remove(self.key_head);
        }
    }

    fn shift_to(&mut self, def: &ImDef, target: usize) {
        if target == 0 {
            self.commit();
        }
        if target != self.state {
            self.prev_state = Some(self.state);
        }
        self.state = target;
        self.node = def.states[target].root;
        self.preedit_saved = self.preedit.clone();
        self.saved_cursor = self.cursor;
        self.saved_candidates = self.candidates.clone();
        self.state_key_head = self.key_head;
        self.state_shifted = true;
        self.changed |= CHANGED_STATE;
    }

    fn commit(&mut self) {
        if !self.preedit.is_empty() {
            self.produced.append(&self.preedit);
            self.changed |= CHANGED_PRODUCED;
        }
        self.preedit.clear();
        self.preedit_saved.clear();
        self.cursor = 0;
        self.saved_cursor = 0;
        self.markers.clear();
        self.candidates = None;
        self.saved_candidates = None;
        self.cluster_start = None;
        self.keys.drain(..self.key_head);
        self.key_head = 0;
        self.state_key_head = 0;
        self.changed |= CHANGED_PREEDIT | CHANGED_CANDIDATES;
    }

    // ---- actions ----------------------------------------------------

    fn run_actions(&mut self, def: &ImDef, actions: &[Action], depth: usize) -> Result<Control> {
        if depth >= MAX_MACRO_DEPTH {
            warn!(im = %self.im.name, "macro recursion too deep; stopping");
            return Ok(Control::Stop);
        }
        for act in actions {
            if let Control::Stop = self.run_action(def, act, depth)? {
                return Ok(Control::Stop);
            }
        }
        Ok(Control::Normal)
    }

    fn run_action(&mut self, def: &ImDef, action: &Action, depth: usize) -> Result<Control> {
        match action {
            Action::Insert(expr) => {
                match expr {
                    Expr::Text(t) => self.insert_text(t),
                    Expr::Var(s) => match self.vars.get(s).cloned() {
                        Some(Value::Text(t)) => self.insert_text(&t),
                        _ => {
                            let v = self.eval(expr);
                            if v > 0 {
                                self.insert_code(v as u32);
                            }
                        }
                    },
                    _ => {
                        let v = self.eval(expr);
                        if v > 0 {
                            self.insert_code(v as u32);
                        }
                    }
                }
                Ok(Control::Normal)
            }
            Action::InsertCandidates(groups) => {
                self.insert_candidates(groups.clone());
                Ok(Control::Normal)
            }
            Action::Delete(pos) => {
                let p = self.resolve_pos(pos);
                self.delete_to(p);
                Ok(Control::Normal)
            }
            Action::Move(pos) => {
                let p = self.resolve_pos(pos);
                self.cursor = p.clamp(0, self.preedit.len() as i64) as usize;
                self.changed |= CHANGED_CURSOR;
                Ok(Control::Normal)
            }
            Action::Mark(sym) => {
                self.markers.insert(*sym, self.cursor);
                Ok(Control::Normal)
            }
            Action::Pushback(arg) => {
                match arg {
                    Pushback::Count(n) => {
                        let n = (*n).max(0) as usize;
                        // Keys from before the current state stay consumed.
                        self.key_head = self
                            .key_head
                            .saturating_sub(n)
                            .max(self.state_key_head.min(self.key_head));
                    }
                    Pushback::Keys(keys) => {
                        for (i, &k) in keys.iter().enumerate() {
                            self.keys.insert(self.key_head + i, k);
                        }
                    }
                }
                Ok(Control::Normal)
            }
            Action::Pop => {
                if self.key_head < self.keys.len() {
                    self.keys.remove(self.key_head);
                }
                Ok(Control::Normal)
            }
            Action::Undo(n) => {
                let len = self.keys.len() as i64;
                let target = match n {
                    None => len - 2,
                    Some(v) if *v < 0 => len + *v,
                    Some(v) => *v,
                };
                let target = target.clamp(0, len) as usize;
                self.keys.truncate(target);
                self.reinit(def);
                Ok(Control::Stop)
            }
            Action::Commit => {
                self.commit();
                Ok(Control::Normal)
            }
            Action::Unhandle => {
                // Give the key back to the caller: un-consume it when
                // a descend already took it.
                if self.cur_key_consumed && self.key_head > 0 {
                    self.key_head -= 1;
                }
                self.mark_unhandled();
                Ok(Control::Stop)
            }
            Action::Shift(sym) => {
                let target = if *sym == Symbol::t() {
                    // prev_state holds one level; nested shifts do not stack.
                    self.prev_state.unwrap_or(self.state)
                } else {
                    match def.state_index.get(sym) {
                        Some(&idx) => idx,
                        None => {
                            warn!(state = %sym, "shift to unknown state ignored");
                            return Ok(Control::Normal);
                        }
                    }
                };
                self.shift_to(def, target);
                Ok(Control::Normal)
            }
            Action::Select(arg) => {
                self.select_candidate(arg);
                Ok(Control::Normal)
            }
            Action::Show => {
                self.candidate_show = true;
                self.changed |= CHANGED_CANDIDATES;
                Ok(Control::Normal)
            }
            Action::Hide => {
                self.candidate_show = false;
                self.changed |= CHANGED_CANDIDATES;
                Ok(Control::Normal)
            }
            Action::SetVar(op, var, expr) => {
                let rhs = self.eval(expr);
                let old = match self.vars.get(var) {
                    Some(Value::Int(i)) => *i,
                    _ => 0,
                };
                let new = match op {
                    ArithOp::Set => rhs,
                    ArithOp::Add => old + rhs,
                    ArithOp::Sub => old - rhs,
                    ArithOp::Mul => old * rhs,
                    ArithOp::Div => {
                        if rhs == 0 {
                            0
                        } else {
                            old / rhs
                        }
                    }
                };
                self.vars.insert(*var, Value::Int(new));
                Ok(Control::Normal)
            }
            Action::Cond(clauses) => {
                for (test, actions) in clauses {
                    if self.eval(test) != 0 {
                        return self.run_actions(def, actions, depth + 1);
                    }
                }
                Ok(Control::Normal)
            }
            Action::If(kind, a, b, then_a, else_a) => {
                let x = self.eval(a);
                let y = self.eval(b);
                let hit = match kind {
                    OpKind::Eq => x == y,
                    OpKind::Lt => x < y,
                    OpKind::Gt => x > y,
                    OpKind::Le => x <= y,
                    OpKind::Ge => x >= y,
                    _ => false,
                };
                if hit {
                    self.run_actions(def, then_a, depth + 1)
                } else {
                    self.run_actions(def, else_a, depth + 1)
                }
            }
            Action::Call(module, func, args) => {
                match self.im.module_fn(*module, *func) {
                    Some(f) => {
                        f(self, args);
                    }
                    None => {
                        warn!(module = %module, func = %func, "call to unregistered function");
                    }
                }
                Ok(Control::Normal)
            }
            Action::Combining(code) => {
                self.pending_combining = Some(*code);
                Ok(Control::Normal)
            }
            Action::ClusterBegin => {
                self.cluster_start = Some(self.cursor);
                Ok(Control::Normal)
            }
            Action::ClusterEnd => {
                if let Some(start) = self.cluster_start.take() {
                    if start < self.cursor {
                        let _ = self.preedit.put_prop(
                            start,
                            self.cursor,
                            Symbol::intern("cluster"),
                            Value::Int(1),
                        );
                    }
                }
                Ok(Control::Normal)
            }
            Action::Separator => {
                self.insert_code(0x200B);
                Ok(Control::Normal)
            }
            Action::Macro(name) => match def.macros.get(name).cloned() {
                Some(acts) => self.run_actions(def, &acts, depth + 1),
                None => {
                    warn!(name = %name, "undefined macro treated as absent");
                    Ok(Control::Normal)
                }
            },
        }
    }

    // ---- editing helpers --------------------------------------------

    fn insert_text(&mut self, s: &str) {
        for ch in s.chars() {
            self.insert_code(ch as u32);
        }
    }

    fn insert_code(&mut self, code: u32) {
        let _ = self.preedit.insert_code(self.cursor, code);
        if let Some(cc) = self.pending_combining.take() {
            let _ = self.preedit.put_prop(
                self.cursor,
                self.cursor + 1,
                Symbol::intern("combining"),
                Value::Int(cc as i64),
            );
        }
        self.cursor += 1;
        self.changed |= CHANGED_PREEDIT;
    }

    fn delete_to(&mut self, pos: i64) {
        let len = self.preedit.len() as i64;
        if pos < 0 {
            // Deletion reaching before the pre-edit start goes to the
            // surrounding text.
            let before = (-pos) as usize;
            if let Some(host) = &mut self.host {
                host.delete_surrounding(before, 0);
            }
            let _ = self.preedit.delete(0, self.cursor);
            self.cursor = 0;
        } else if pos > len {
            let after = (pos - len) as usize;
            if let Some(host) = &mut self.host {
                host.delete_surrounding(0, after);
            }
            let _ = self.preedit.delete(self.cursor, len as usize);
        } else {
            let p = pos as usize;
            let (a, b) = if p < self.cursor {
                (p, self.cursor)
            } else {
                (self.cursor, p)
            };
            let _ = self.preedit.delete(a, b);
            self.cursor = a;
        }
        self.changed |= CHANGED_PREEDIT | CHANGED_CURSOR;
    }

    fn insert_candidates(&mut self, groups: Vec<Vec<String>>) {
        let Some(first) = groups.iter().flat_map(|g| g.iter()).next().cloned() else {
            return;
        };
        let from = self.cursor;
        self.insert_text(&first);
        let to = self.cursor;
        let flat: Vec<Value> = groups
            .iter()
            .flat_map(|g| g.iter())
            .map(|t| Value::Text(t.clone()))
            .collect();
        let _ = self
            .preedit
            .put_prop(from, to, Symbol::intern("candidates"), Value::List(flat));
        self.candidates = Some(CandState {
            groups,
            index: 0,
            from,
            to,
        });
        self.changed |= CHANGED_CANDIDATES;
    }

    fn select_candidate(&mut self, arg: &SelectArg) {
        let Some(cand) = self.candidates.clone() else {
            return;
        };
        let total = cand.total();
        if total == 0 {
            return;
        }
        let (gstart, gend) = cand.group_bounds(cand.index);
        let new_index = match arg {
            SelectArg::Index(i) => (*i).clamp(0, total as i64 - 1) as usize,
            SelectArg::Keyword(sym) => match sym.name().as_str() {
                "@<" => 0,
                "@>" => total - 1,
                "@-" => {
                    if cand.index == 0 {
                        total - 1
                    } else {
                        cand.index - 1
                    }
                }
                "@+" => {
                    if cand.index + 1 >= total {
                        0
                    } else {
                        cand.index + 1
                    }
                }
                "@[" => {
                    if gstart == 0 {
                        0
                    } else {
                        cand.group_bounds(gstart - 1).0
                    }
                }
                "@]" => {
                    if gend >= total {
                        gstart
                    } else {
                        gend
                    }
                }
                _ => cand.index,
            },
        };
        let Some(text) = cand.text(new_index).map(String::from) else {
            return;
        };
        let _ = self.preedit.delete(cand.from, cand.to);
        self.cursor = cand.from;
        self.insert_text(&text);
        let to = self.cursor;
        let _ = self.preedit.put_prop(
            cand.from,
            to,
            Symbol::intern("candidates"),
            Value::List(
                cand.groups
                    .iter()
                    .flat_map(|g| g.iter())
                    .map(|t| Value::Text(t.clone()))
                    .collect(),
            ),
        );
        self.candidates = Some(CandState {
            groups: cand.groups,
            index: new_index,
            from: cand.from,
            to,
        });
        self.changed |= CHANGED_CANDIDATES | CHANGED_PREEDIT;
    }

    // ---- positions and expressions ----------------------------------

    fn resolve_pos(&mut self, pos: &Pos) -> i64 {
        match pos {
            Pos::Int(i) => *i,
            Pos::Marker(sym) => self.marker_pos(*sym),
        }
    }

    fn marker_pos(&mut self, sym: Symbol) -> i64 {
        let name = sym.name();
        match name.as_str() {
            "@<" => 0,
            "@>" => self.preedit.len() as i64,
            "@=" => self.cursor as i64,
            "@-" => self.cursor as i64 - 1,
            "@+" => self.cursor as i64 + 1,
            "@[" => self
                .candidates
                .as_ref()
                .map(|c| c.from as i64)
                .unwrap_or(self.cursor as i64),
            "@]" => self
                .candidates
                .as_ref()
                .map(|c| c.to as i64)
                .unwrap_or(self.cursor as i64),
            _ => {
                let b = name.as_bytes();
                // @0..@9 are absolute pre-edit positions.
                if b.len() == 2 && b[0] == b'@' && b[1].is_ascii_digit() {
                    return ((b[1] - b'0') as i64).min(self.preedit.len() as i64);
                }
                if let Some(rest) = name.strip_prefix("@-") {
                    if let Ok(n) = rest.parse::<i64>() {
                        return self.cursor as i64 - n;
                    }
                }
                if let Some(rest) = name.strip_prefix("@+") {
                    if let Ok(n) = rest.parse::<i64>() {
                        return self.cursor as i64 + n;
                    }
                }
                self.markers.get(&sym).map(|&p| p as i64).unwrap_or(0)
            }
        }
    }

    fn eval(&mut self, expr: &Expr) -> i64 {
        match expr {
            Expr::Int(i) => *i,
            Expr::Text(t) => t.chars().next().map(|c| c as i64).unwrap_or(0),
            Expr::Var(s) => self.symbol_value(*s),
            Expr::Op(kind, args) => {
                let vals: Vec<i64> = args.iter().map(|a| self.eval(a)).collect();
                match kind {
                    OpKind::Add => vals.iter().sum(),
                    OpKind::Sub => match vals.split_first() {
                        Some((first, rest)) if !rest.is_empty() => {
                            rest.iter().fold(*first, |acc, v| acc - v)
                        }
                        Some((first, _)) => -first,
                        None => 0,
                    },
                    OpKind::Mul => vals.iter().product(),
                    OpKind::Div => match vals.split_first() {
                        Some((first, rest)) => rest.iter().fold(*first, |acc, v| {
                            if *v == 0 {
                                0
                            } else {
                                acc / v
                            }
                        }),
                        None => 0,
                    },
                    OpKind::And => vals.iter().all(|&v| v != 0) as i64,
                    OpKind::Or => vals.iter().any(|&v| v != 0) as i64,
                    OpKind::Not => (vals.first().copied().unwrap_or(0) == 0) as i64,
                    OpKind::Eq => (vals.first() == vals.get(1)) as i64,
                    OpKind::Lt => (vals.first() < vals.get(1)) as i64,
                    OpKind::Gt => (vals.first() > vals.get(1)) as i64,
                    OpKind::Le => (vals.first() <= vals.get(1)) as i64,
                    OpKind::Ge => (vals.first() >= vals.get(1)) as i64,
                }
            }
        }
    }

    /// Resolve a symbol in expression position: `@`-specials first,
    /// then the variable environment; undefined variables are 0.
    fn symbol_value(&mut self, sym: Symbol) -> i64 {
        let name = sym.name();
        match name.as_str() {
            "@@" => return self.keys.len() as i64,
            "@@0" => {
                let supported = self
                    .host
                    .as_ref()
                    .map(|h| h.surrounding_supported())
                    .unwrap_or(false);
                return supported as i64;
            }
            "@=" => return self.cursor as i64,
            "@<" => return 0,
            "@>" => return self.preedit.len() as i64,
            _ => {}
        }
        if name.starts_with("@-") || name.starts_with("@+") {
            // Surrounding or pre-edit character at a cursor offset.
            if let Ok(n) = name[1..].parse::<i64>() {
                let pos = self.cursor as i64 + n;
                if pos >= 0 && (pos as usize) < self.preedit.len() {
                    return self.preedit.code_at(pos as usize).unwrap_or(0) as i64;
                }
                if let Some(host) = &mut self.host {
                    return host.surrounding_char(n) as i64;
                }
                return 0;
            }
        }
        if name.starts_with('@') {
            return self.marker_pos(sym);
        }
        match self.vars.get(&sym) {
            Some(Value::Int(i)) => *i,
            Some(Value::Text(t)) => t.chars().next().map(|c| c as i64).unwrap_or(0),
            _ => 0,
        }
    }
}

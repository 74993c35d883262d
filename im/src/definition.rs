//! Input-method definitions: parsing the s-expression form into maps,
//! states, commands, variables, macros and modules.
//!
//! Maps are tries over key symbols held in one arena per definition;
//! a state's root merges the tries of its branches, attaching each
//! branch's actions to every node that came from that branch's map.
//! Bad rules are logged and dropped; a definition never fails to load
//! because one rule is malformed.

use crate::action::{self, Action};
use crate::keysym;
use ahash::AHashMap;
use libmtext_core::database::{self, Tags};
use libmtext_core::error::{Error, Result};
use libmtext_core::plist::Value;
use libmtext_core::symbol::Symbol;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct MapNode {
    pub map_actions: Option<Arc<Vec<Action>>>,
    pub submaps: AHashMap<Symbol, usize>,
    pub branch_actions: Option<Arc<Vec<Action>>>,
}

#[derive(Debug, Clone)]
pub struct StateDef {
    pub name: Symbol,
    pub title: Option<String>,
    pub root: usize,
}

#[derive(Debug, Clone)]
pub struct CommandDef {
    pub name: Symbol,
    pub description: Option<String>,
    pub keyseqs: Vec<Vec<Symbol>>,
}

#[derive(Debug, Clone)]
pub struct VariableDef {
    pub name: Symbol,
    pub description: Option<String>,
    pub value: Value,
}

#[derive(Debug, Clone)]
pub struct ModuleDef {
    pub name: Symbol,
    pub functions: Vec<Symbol>,
}

/// A parsed input-method definition.
#[derive(Debug, Clone)]
pub struct ImDef {
    pub language: Symbol,
    pub name: Symbol,
    pub title: String,
    pub description: Option<String>,
    pub commands: Vec<CommandDef>,
    pub variables: Vec<VariableDef>,
    pub macros: AHashMap<Symbol, Arc<Vec<Action>>>,
    pub modules: Vec<ModuleDef>,
    pub nodes: Vec<MapNode>,
    pub maps: AHashMap<Symbol, usize>,
    pub states: Vec<StateDef>,
    pub state_index: AHashMap<Symbol, usize>,
}

impl ImDef {
    pub fn initial_state(&self) -> &StateDef {
        &self.states[0]
    }

    pub fn node(&self, id: usize) -> &MapNode {
        &self.nodes[id]
    }

    /// Follow a submap edge, walking the key's alias ring.
    pub fn submap(&self, node: usize, key: Symbol) -> Option<usize> {
        let submaps = &self.nodes[node].submaps;
        if let Some(&id) = submaps.get(&key) {
            return Some(id);
        }
        for alias in keysym::alias_ring(key) {
            if let Some(&id) = submaps.get(&alias) {
                return Some(id);
            }
        }
        None
    }
}

/// Parse a whole definition from its top-level forms.
pub fn parse_definition(language: Symbol, name: Symbol, forms: &[Value]) -> Result<ImDef> {
    let mut def = ImDef {
        language,
        name,
        title: name.name(),
        description: None,
        commands: Vec::new(),
        variables: Vec::new(),
        macros: AHashMap::new(),
        modules: Vec::new(),
        nodes: Vec::new(),
        maps: AHashMap::new(),
        states: Vec::new(),
        state_index: AHashMap::new(),
    };
    // States reference maps regardless of section order; collect map
    // sections first, then build states.
    let mut state_forms: Vec<&[Value]> = Vec::new();
    for form in forms {
        let Some(items) = form.as_list() else {
            continue;
        };
        let Some(head) = items.first().and_then(|v| v.as_symbol()) else {
            continue;
        };
        match head.name().as_str() {
            "input-method" => {} // header, already identified by tags
            "title" => {
                if let Some(t) = items.get(1).and_then(|v| v.as_text()) {
                    def.title = t.to_string();
                }
            }
            "description" => {
                def.description = description_text(items.get(1));
            }
            "command" => {
                for c in &items[1..] {
                    match parse_command(c) {
                        Ok(cmd) => def.commands.push(cmd),
                        Err(e) => warn!(im = %name, error = %e, "dropping bad command"),
                    }
                }
            }
            "variable" => {
                for v in &items[1..] {
                    match parse_variable(v) {
                        Ok(var) => def.variables.push(var),
                        Err(e) => warn!(im = %name, error = %e, "dropping bad variable"),
                    }
                }
            }
            "module" => {
                for m in &items[1..] {
                    if let Some(parts) = m.as_list() {
                        if let Some(modname) = parts.first().and_then(|v| v.as_symbol()) {
                            def.modules.push(ModuleDef {
                                name: modname,
                                functions: parts[1..]
                                    .iter()
                                    .filter_map(|v| v.as_symbol())
                                    .collect(),
                            });
                        }
                    }
                }
            }
            "macro" => {
                for m in &items[1..] {
                    let Some(parts) = m.as_list() else { continue };
                    let Some(mname) = parts.first().and_then(|v| v.as_symbol()) else {
                        continue;
                    };
                    match action::parse_actions(&parts[1..]) {
                        Ok(acts) => {
                            def.macros.insert(mname, Arc::new(acts));
                        }
                        Err(e) => warn!(im = %name, error = %e, "dropping bad macro"),
                    }
                }
            }
            "map" => {
                for m in &items[1..] {
                    if let Err(e) = parse_map(&mut def, m) {
                        warn!(im = %name, error = %e, "dropping bad map");
                    }
                }
            }
            "state" => {
                state_forms.push(&items[1..]);
            }
            "include" => {
                if let Err(e) = include_section(&mut def, &items[1..]) {
                    warn!(im = %name, error = %e, "dropping bad include");
                }
            }
            other => {
                debug!(im = %name, section = other, "ignoring unknown section");
            }
        }
    }
    for states in state_forms {
        for s in states {
            if let Err(e) = parse_state(&mut def, s) {
                warn!(im = %name, error = %e, "dropping bad state");
            }
        }
    }
    if def.states.is_empty() {
        return Err(Error::Im(format!(
            "input method {}-{} defines no state",
            language, name
        )));
    }
    Ok(def)
}

fn description_text(value: Option<&Value>) -> Option<String> {
    match value {
        Some(Value::Text(t)) => Some(t.clone()),
        // Gettext form: (_ "text")
        Some(Value::List(items)) => items.get(1).and_then(|v| v.as_text()).map(String::from),
        _ => None,
    }
}

fn parse_command(value: &Value) -> Result<CommandDef> {
    let parts = value
        .as_list()
        .ok_or_else(|| Error::Im("command is not a list".into()))?;
    let name = parts
        .first()
        .and_then(|v| v.as_symbol())
        .ok_or_else(|| Error::Im("command lacks a name".into()))?;
    let mut description = None;
    let mut keyseqs = Vec::new();
    for (idx, p) in parts[1..].iter().enumerate() {
        match p {
            Value::Text(t) if idx == 0 => description = Some(t.clone()),
            other => keyseqs.push(keysym::parse_keyseq(other)?),
        }
    }
    Ok(CommandDef {
        name,
        description,
        keyseqs,
    })
}

fn parse_variable(value: &Value) -> Result<VariableDef> {
    let parts = value
        .as_list()
        .ok_or_else(|| Error::Im("variable is not a list".into()))?;
    let name = parts
        .first()
        .and_then(|v| v.as_symbol())
        .ok_or_else(|| Error::Im("variable lacks a name".into()))?;
    let mut description = None;
    let mut val = Value::Int(0);
    match parts.len() {
        1 => {}
        2 => val = parts[1].clone(),
        _ => {
            if let Some(t) = parts[1].as_text() {
                description = Some(t.to_string());
            }
            val = parts[2].clone();
        }
    }
    Ok(VariableDef {
        name,
        description,
        value: val,
    })
}

fn new_node(def: &mut ImDef) -> usize {
    def.nodes.push(MapNode::default());
    def.nodes.len() - 1
}

fn parse_map(def: &mut ImDef, value: &Value) -> Result<()> {
    let parts = value
        .as_list()
        .ok_or_else(|| Error::Im("map is not a list".into()))?;
    let name = parts
        .first()
        .and_then(|v| v.as_symbol())
        .ok_or_else(|| Error::Im("map lacks a name".into()))?;
    let root = match def.maps.get(&name) {
        Some(&id) => id,
        None => {
            let id = new_node(def);
            def.maps.insert(name, id);
            id
        }
    };
    for rule in &parts[1..] {
        let Some(rule_parts) = rule.as_list() else {
            warn!(map = %name, "map rule is not a list");
            continue;
        };
        let Some(keyseq_value) = rule_parts.first() else {
            continue;
        };
        let keyseq = match keysym::parse_keyseq(keyseq_value) {
            Ok(k) => k,
            Err(e) => {
                warn!(map = %name, error = %e, "dropping rule with bad key sequence");
                continue;
            }
        };
        let actions = match action::parse_actions(&rule_parts[1..]) {
            Ok(a) => a,
            Err(e) => {
                warn!(map = %name, error = %e, "dropping rule with bad actions");
                continue;
            }
        };
        let mut node = root;
        for key in keyseq {
            node = match def.nodes[node].submaps.get(&key) {
                Some(&id) => id,
                None => {
                    let id = new_node(def);
                    def.nodes[node].submaps.insert(key, id);
                    id
                }
            };
        }
        if !actions.is_empty() {
            def.nodes[node].map_actions = Some(Arc::new(actions));
        }
    }
    Ok(())
}

fn parse_state(def: &mut ImDef, value: &Value) -> Result<()> {
    let parts = value
        .as_list()
        .ok_or_else(|| Error::Im("state is not a list".into()))?;
    let name = parts
        .first()
        .and_then(|v| v.as_symbol())
        .ok_or_else(|| Error::Im("state lacks a name".into()))?;
    let mut title = None;
    let root = new_node(def);
    for branch in &parts[1..] {
        match branch {
            Value::Text(t) => title = Some(t.clone()),
            Value::List(bparts) => {
                let Some(map_name) = bparts.first().and_then(|v| v.as_symbol()) else {
                    warn!(state = %name, "branch lacks a map name");
                    continue;
                };
                let actions = match action::parse_actions(&bparts[1..]) {
                    Ok(a) => a,
                    Err(e) => {
                        warn!(state = %name, error = %e, "dropping branch with bad actions");
                        continue;
                    }
                };
                let actions = if actions.is_empty() {
                    None
                } else {
                    Some(Arc::new(actions))
                };
                if map_name.is_nil() {
                    // Fallback branch: actions for keys no map consumes.
                    def.nodes[root].branch_actions = actions;
                    continue;
                }
                let Some(&map_root) = def.maps.get(&map_name) else {
                    warn!(state = %name, map = %map_name, "branch names an unknown map");
                    continue;
                };
                merge_map(def, root, map_root, &actions);
            }
            _ => {}
        }
    }
    let idx = def.states.len();
    def.states.push(StateDef { name, title, root });
    def.state_index.insert(name, idx);
    Ok(())
}

/// Copy `src` (a map root) into `dst` (a state root), tagging every
/// node below the root with the branch's actions. The root itself
/// keeps only the `nil`-branch fallback, so "no map consumed this key"
/// stays distinguishable.
fn merge_map(def: &mut ImDef, dst: usize, src: usize, branch: &Option<Arc<Vec<Action>>>) {
    if let Some(acts) = def.nodes[src].map_actions.clone() {
        if def.nodes[dst].map_actions.is_none() {
            def.nodes[dst].map_actions = Some(acts);
        }
    }
    let edges: Vec<(Symbol, usize)> = def.nodes[src]
        .submaps
        .iter()
        .map(|(&k, &v)| (k, v))
        .collect();
    for (key, child_src) in edges {
        let child_dst = match def.nodes[dst].submaps.get(&key) {
            Some(&id) => id,
            None => {
                let id = new_node(def);
                def.nodes[dst].submaps.insert(key, id);
                id
            }
        };
        merge_sub(def, child_dst, child_src, branch);
    }
}

fn merge_sub(def: &mut ImDef, dst: usize, src: usize, branch: &Option<Arc<Vec<Action>>>) {
    if let Some(acts) = def.nodes[src].map_actions.clone() {
        if def.nodes[dst].map_actions.is_none() {
            def.nodes[dst].map_actions = Some(acts);
        }
    }
    if branch.is_some() && def.nodes[dst].branch_actions.is_none() {
        def.nodes[dst].branch_actions = branch.clone();
    }
    let edges: Vec<(Symbol, usize)> = def.nodes[src]
        .submaps
        .iter()
        .map(|(&k, &v)| (k, v))
        .collect();
    for (key, child_src) in edges {
        let child_dst = match def.nodes[dst].submaps.get(&key) {
            Some(&id) => id,
            None => {
                let id = new_node(def);
                def.nodes[dst].submaps.insert(key, id);
                id
            }
        };
        merge_sub(def, child_dst, child_src, branch);
    }
}

/// `(include (LANG NAME) SECTION)`: splice another definition's maps
/// and macros (or everything when the section is omitted).
fn include_section(def: &mut ImDef, args: &[Value]) -> Result<()> {
    let tag_list = args
        .first()
        .and_then(|v| v.as_list())
        .ok_or_else(|| Error::Im("include lacks a tag list".into()))?;
    let lang = tag_list
        .first()
        .and_then(|v| v.as_symbol())
        .ok_or_else(|| Error::Im("include lacks a language".into()))?;
    let name = tag_list
        .get(1)
        .and_then(|v| v.as_symbol())
        .ok_or_else(|| Error::Im("include lacks a name".into()))?;
    let section = args.get(1).and_then(|v| v.as_symbol()).map(|s| s.name());
    let other = load_definition(lang, name)?;
    let take_maps = section.as_deref().map_or(true, |s| s == "map");
    let take_macros = section.as_deref().map_or(true, |s| s == "macro");
    if take_macros {
        for (k, v) in &other.macros {
            def.macros.entry(*k).or_insert_with(|| v.clone());
        }
    }
    if take_maps {
        for (map_name, &root) in &other.maps {
            let dst = match def.maps.get(map_name) {
                Some(&id) => id,
                None => {
                    let id = new_node(def);
                    def.maps.insert(*map_name, id);
                    id
                }
            };
            copy_nodes(def, dst, &other, root);
        }
    }
    Ok(())
}

fn copy_nodes(def: &mut ImDef, dst: usize, other: &ImDef, src: usize) {
    if def.nodes[dst].map_actions.is_none() {
        def.nodes[dst].map_actions = other.nodes[src].map_actions.clone();
    }
    let edges: Vec<(Symbol, usize)> = other.nodes[src]
        .submaps
        .iter()
        .map(|(&k, &v)| (k, v))
        .collect();
    for (key, child_src) in edges {
        let child_dst = match def.nodes[dst].submaps.get(&key) {
            Some(&id) => id,
            None => {
                let id = new_node(def);
                def.nodes[dst].submaps.insert(key, id);
                id
            }
        };
        copy_nodes(def, child_dst, other, child_src);
    }
}

/// The database tags of an input-method definition.
pub fn im_tags(language: Symbol, name: Symbol) -> Tags {
    (
        Symbol::intern("input-method"),
        language,
        name,
        Symbol::nil(),
    )
}

/// Load and parse a definition from the database.
pub fn load_definition(language: Symbol, name: Symbol) -> Result<ImDef> {
    let forms = database::load(im_tags(language, name))?;
    let mut def = parse_definition(language, name, &forms)?;
    inherit_globals(&mut def);
    Ok(def)
}

/// Merge global command/variable declarations (`(t nil global)`) into
/// locals that left description or value unspecified.
fn inherit_globals(def: &mut ImDef) {
    let tags = (
        Symbol::intern("input-method"),
        Symbol::t(),
        Symbol::nil(),
        Symbol::intern("global"),
    );
    if !database::find(tags) {
        return;
    }
    let Ok(forms) = database::load(tags) else {
        return;
    };
    let Ok(global) = parse_definition(Symbol::t(), Symbol::intern("global"), &forms) else {
        return;
    };
    for cmd in &mut def.commands {
        if let Some(g) = global.commands.iter().find(|g| g.name == cmd.name) {
            if cmd.description.is_none() {
                cmd.description = g.description.clone();
            }
            if cmd.keyseqs.is_empty() {
                cmd.keyseqs = g.keyseqs.clone();
            }
        }
    }
    for var in &mut def.variables {
        if let Some(g) = global.variables.iter().find(|g| g.name == var.name) {
            if var.description.is_none() {
                var.description = g.description.clone();
            }
            if matches!(var.value, Value::Int(0)) {
                var.value = g.value.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libmtext_core::plist::parse_all;

    fn demo_def() -> ImDef {
        let src = r#"
            (input-method t test)
            (title "TEST")
            (description "A tiny test input method.")
            (variable (tone "current tone" 0))
            (macro (clear (set tone 0)))
            (map (m ("k" "k") ("ka" "ka")))
            (state (init (m (commit))))
        "#;
        let forms = parse_all(src).unwrap();
        parse_definition(Symbol::t(), Symbol::intern("test"), &forms).unwrap()
    }

    #[test]
    fn sections_parse() {
        let def = demo_def();
        assert_eq!(def.title, "TEST");
        assert!(def.description.is_some());
        assert_eq!(def.variables.len(), 1);
        assert!(def.macros.contains_key(&Symbol::intern("clear")));
        assert_eq!(def.states.len(), 1);
    }

    #[test]
    fn map_trie_structure() {
        let def = demo_def();
        let root = def.initial_state().root;
        let k = def.submap(root, Symbol::intern("k")).unwrap();
        assert!(def.node(k).map_actions.is_some());
        let ka = def.submap(k, Symbol::intern("a")).unwrap();
        assert!(def.node(ka).map_actions.is_some());
        assert!(def.node(ka).submaps.is_empty());
        // Branch actions ride along every node of the merged map.
        assert!(def.node(ka).branch_actions.is_some());
        assert!(def.node(k).branch_actions.is_some());
    }

    #[test]
    fn state_with_no_maps_fails() {
        let forms = parse_all("(title \"X\")").unwrap();
        assert!(parse_definition(Symbol::t(), Symbol::intern("bad"), &forms).is_err());
    }

    #[test]
    fn nil_branch_sets_root_fallback() {
        let src = r#"
            (map (m ("a" "a")))
            (state (init (m) (nil (unhandle))))
        "#;
        let forms = parse_all(src).unwrap();
        let def = parse_definition(Symbol::t(), Symbol::intern("fb"), &forms).unwrap();
        let root = def.initial_state().root;
        assert!(def.node(root).branch_actions.is_some());
    }
}

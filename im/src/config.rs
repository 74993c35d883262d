//! Per-input-method configuration layering.
//!
//! Command key bindings and variable values merge from three layers:
//! the definition's own declarations, the user's `config.mic`, and
//! whatever the session sets through the API. Session wins over user,
//! user over base. Saving writes only the merged user layer back to
//! `config.mic`, under an on-disk lock file with bounded retry so
//! concurrent editors do not clobber each other.
//!
//! `config.mic` is UTF-8 s-expression text with a mode-line header and
//! one top-level form per input method:
//! `((LANG NAME) (command (NAME KEYSEQ…)…) (variable (NAME VALUE)…))`.

use crate::keysym;
use ahash::AHashMap;
use libmtext_core::error::{Error, Result};
use libmtext_core::plist::{self, Value};
use libmtext_core::symbol::Symbol;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const CONFIG_HEADER: &str = ";; -*- mode:lisp; coding:utf-8 -*-\n";
const LOCK_RETRIES: u32 = 10;
const LOCK_WAIT_MS: u64 = 100;

/// One layer of settings.
#[derive(Debug, Clone, Default)]
pub struct ImSettings {
    pub commands: AHashMap<Symbol, Vec<Vec<Symbol>>>,
    pub variables: AHashMap<Symbol, Value>,
}

/// The three-layer configuration of one input method.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayers {
    pub base: ImSettings,
    pub user: ImSettings,
    pub session: ImSettings,
}

impl ConfigLayers {
    /// Effective value of a variable.
    pub fn variable(&self, name: Symbol) -> Option<Value> {
        self.session
            .variables
            .get(&name)
            .or_else(|| self.user.variables.get(&name))
            .or_else(|| self.base.variables.get(&name))
            .cloned()
    }

    /// Effective key sequences of a command.
    pub fn command(&self, name: Symbol) -> Option<Vec<Vec<Symbol>>> {
        self.session
            .commands
            .get(&name)
            .or_else(|| self.user.commands.get(&name))
            .or_else(|| self.base.commands.get(&name))
            .cloned()
    }

    /// All effective variables, lowest layer first.
    pub fn merged_variables(&self) -> AHashMap<Symbol, Value> {
        let mut out = self.base.variables.clone();
        for (k, v) in &self.user.variables {
            out.insert(*k, v.clone());
        }
        for (k, v) in &self.session.variables {
            out.insert(*k, v.clone());
        }
        out
    }

    pub fn set_session_variable(&mut self, name: Symbol, value: Value) {
        self.session.variables.insert(name, value);
    }

    pub fn set_session_command(&mut self, name: Symbol, keyseqs: Vec<Vec<Symbol>>) {
        self.session.commands.insert(name, keyseqs);
    }

    /// Fold the session layer into the user layer (done before save).
    fn fold_session_into_user(&mut self) {
        for (k, v) in self.session.variables.drain() {
            self.user.variables.insert(k, v);
        }
        for (k, v) in self.session.commands.drain() {
            self.user.commands.insert(k, v);
        }
    }
}

/// Default user configuration path:
/// `$XDG_DATA_HOME/m17n/config.mic` or `$HOME/.m17n.d/config.mic`.
pub fn default_config_path() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        if !xdg.is_empty() {
            return Path::new(&xdg).join("m17n").join("config.mic");
        }
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".m17n.d").join("config.mic")
}

fn settings_from_form(items: &[Value]) -> ImSettings {
    let mut settings = ImSettings::default();
    for section in items {
        let Some(parts) = section.as_list() else {
            continue;
        };
        let Some(head) = parts.first().and_then(|v| v.as_symbol()) else {
            continue;
        };
        match head.name().as_str() {
            "command" => {
                for c in &parts[1..] {
                    let Some(cp) = c.as_list() else { continue };
                    let Some(name) = cp.first().and_then(|v| v.as_symbol()) else {
                        continue;
                    };
                    let mut seqs = Vec::new();
                    for s in &cp[1..] {
                        match keysym::parse_keyseq(s) {
                            Ok(seq) => seqs.push(seq),
                            Err(e) => warn!(command = %name, error = %e, "bad key sequence"),
                        }
                    }
                    settings.commands.insert(name, seqs);
                }
            }
            "variable" => {
                for v in &parts[1..] {
                    let Some(vp) = v.as_list() else { continue };
                    let Some(name) = vp.first().and_then(|v| v.as_symbol()) else {
                        continue;
                    };
                    if let Some(val) = vp.get(1) {
                        settings.variables.insert(name, val.clone());
                    }
                }
            }
            _ => {}
        }
    }
    settings
}

fn form_matches(form: &Value, language: Symbol, name: Symbol) -> bool {
    let Some(items) = form.as_list() else {
        return false;
    };
    let Some(tags) = items.first().and_then(|v| v.as_list()) else {
        return false;
    };
    tags.first().and_then(|v| v.as_symbol()) == Some(language)
        && tags.get(1).and_then(|v| v.as_symbol()) == Some(name)
}

/// Load the user layer for `(language, name)` from `path`.
pub fn load_user_layer(path: &Path, language: Symbol, name: Symbol) -> ImSettings {
    let Ok(text) = std::fs::read_to_string(path) else {
        return ImSettings::default();
    };
    let forms = match plist::parse_all(&text) {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unparsable config.mic");
            return ImSettings::default();
        }
    };
    for form in &forms {
        if form_matches(form, language, name) {
            let items = form.as_list().expect("matched form is a list");
            debug!(im = %name, "user configuration loaded");
            return settings_from_form(&items[1..]);
        }
    }
    ImSettings::default()
}

fn settings_to_form(language: Symbol, name: Symbol, settings: &ImSettings) -> Value {
    let mut items = vec![Value::List(vec![
        Value::Symbol(language),
        Value::Symbol(name),
    ])];
    if !settings.commands.is_empty() {
        let mut cmds: Vec<(Symbol, &Vec<Vec<Symbol>>)> =
            settings.commands.iter().map(|(&k, v)| (k, v)).collect();
        cmds.sort_by_key(|(k, _)| k.name());
        let mut section = vec![Value::Symbol(Symbol::intern("command"))];
        for (cname, seqs) in cmds {
            let mut entry = vec![Value::Symbol(cname)];
            for seq in seqs {
                entry.push(Value::List(
                    seq.iter().map(|&k| Value::Symbol(k)).collect(),
                ));
            }
            section.push(Value::List(entry));
        }
        items.push(Value::List(section));
    }
    if !settings.variables.is_empty() {
        let mut vars: Vec<(Symbol, &Value)> =
            settings.variables.iter().map(|(&k, v)| (k, v)).collect();
        vars.sort_by_key(|(k, _)| k.name());
        let mut section = vec![Value::Symbol(Symbol::intern("variable"))];
        for (vname, val) in vars {
            section.push(Value::List(vec![Value::Symbol(vname), val.clone()]));
        }
        items.push(Value::List(section));
    }
    Value::List(items)
}

struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Take the on-disk lock, retrying a bounded number of times.
    fn acquire(target: &Path) -> Result<LockFile> {
        let path = target.with_extension("mic.lock");
        for attempt in 0..LOCK_RETRIES {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(_) => return Ok(LockFile { path }),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    debug!(attempt, lock = %path.display(), "config lock busy");
                    std::thread::sleep(std::time::Duration::from_millis(LOCK_WAIT_MS));
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Err(Error::Im(format!(
            "could not take configuration lock {}",
            path.display()
        )))
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Save the merged user layer for `(language, name)` into `path`,
/// preserving the other input methods' forms.
pub fn save_user_layer(
    path: &Path,
    language: Symbol,
    name: Symbol,
    layers: &mut ConfigLayers,
) -> Result<()> {
    layers.fold_session_into_user();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _lock = LockFile::acquire(path)?;
    let mut forms = match std::fs::read_to_string(path) {
        Ok(text) => plist::parse_all(&text).unwrap_or_default(),
        Err(_) => Vec::new(),
    };
    forms.retain(|f| !form_matches(f, language, name));
    forms.push(settings_to_form(language, name, &layers.user));
    let mut out = String::from(CONFIG_HEADER);
    for form in &forms {
        plist::write_value(&mut out, form);
        out.push('\n');
    }
    std::fs::write(path, out)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_config(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "libmtext-im-config-{}-{}.mic",
            name,
            std::process::id()
        ))
    }

    #[test]
    fn layering_precedence() {
        let mut layers = ConfigLayers::default();
        let v = Symbol::intern("tone");
        layers.base.variables.insert(v, Value::Int(1));
        assert_eq!(layers.variable(v), Some(Value::Int(1)));
        layers.user.variables.insert(v, Value::Int(2));
        assert_eq!(layers.variable(v), Some(Value::Int(2)));
        layers.set_session_variable(v, Value::Int(3));
        assert_eq!(layers.variable(v), Some(Value::Int(3)));
    }

    #[test]
    fn save_and_reload_user_layer() {
        let path = scratch_config("roundtrip");
        let _ = std::fs::remove_file(&path);
        let lang = Symbol::intern("ja");
        let name = Symbol::intern("test-im");
        let mut layers = ConfigLayers::default();
        layers.set_session_variable(Symbol::intern("tone"), Value::Int(4));
        layers.set_session_command(
            Symbol::intern("reload"),
            vec![vec![Symbol::intern("C-r")]],
        );
        save_user_layer(&path, lang, name, &mut layers).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with(";; -*- mode:lisp"));

        let loaded = load_user_layer(&path, lang, name);
        assert_eq!(
            loaded.variables.get(&Symbol::intern("tone")),
            Some(&Value::Int(4))
        );
        assert_eq!(
            loaded.commands.get(&Symbol::intern("reload")),
            Some(&vec![vec![Symbol::intern("C-r")]])
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn save_preserves_other_forms() {
        let path = scratch_config("preserve");
        let _ = std::fs::remove_file(&path);
        std::fs::write(&path, "((ko other) (variable (x 9)))\n").unwrap();
        let lang = Symbol::intern("ja");
        let name = Symbol::intern("mine");
        let mut layers = ConfigLayers::default();
        layers.set_session_variable(Symbol::intern("y"), Value::Int(1));
        save_user_layer(&path, lang, name, &mut layers).unwrap();
        let other = load_user_layer(&path, Symbol::intern("ko"), Symbol::intern("other"));
        assert_eq!(
            other.variables.get(&Symbol::intern("x")),
            Some(&Value::Int(9))
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn lock_blocks_until_released() {
        let path = scratch_config("lock");
        let _ = std::fs::remove_file(&path);
        let lock = LockFile::acquire(&path).unwrap();
        let lock_path = lock.path.clone();
        assert!(lock_path.exists());
        drop(lock);
        assert!(!lock_path.exists());
    }
}

//! libmtext-im
//!
//! Table-driven input methods: definitions load from the database by
//! `(input-method LANGUAGE NAME)` tags, a per-session `InputContext`
//! interprets key symbols against the definition's state machine, and
//! configuration merges library defaults, the user's `config.mic` and
//! session overrides.
//!
//! Public API:
//! - `open_im`/`close_im` - load and release input methods
//! - `InputMethod::create_ic` - per-session interpreter contexts
//! - `InputContext::filter` - feed one key, read pre-edit/produced
//! - `keysym` - key symbols, alias rings, key-sequence parsing
//! - `register_module_fn` - host-side `call` targets

use ahash::AHashMap;
use libmtext_core::error::Result;
use libmtext_core::plist::Value;
use libmtext_core::symbol::Symbol;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

pub mod action;
pub mod config;
pub mod context;
pub mod definition;
pub mod keysym;

pub use context::{ImHost, InputContext};
pub use definition::ImDef;

use config::ConfigLayers;

/// Host-registered function reachable through the `call` action.
pub type ModuleFn = Arc<dyn Fn(&mut InputContext, &[Value]) -> Option<Value> + Send + Sync>;

static MODULE_FNS: Lazy<RwLock<AHashMap<(Symbol, Symbol), ModuleFn>>> =
    Lazy::new(|| RwLock::new(AHashMap::new()));

/// Register the implementation of `(call MODULE FUNC …)`.
pub fn register_module_fn(module: Symbol, func: Symbol, f: ModuleFn) {
    MODULE_FNS
        .write()
        .expect("module functions poisoned")
        .insert((module, func), f);
}

/// An opened input method: the parsed definition plus its layered
/// configuration. Contexts hold an `Arc` and watch the generation
/// counter for reloads.
pub struct InputMethod {
    pub language: Symbol,
    pub name: Symbol,
    def: RwLock<Arc<ImDef>>,
    generation: AtomicU64,
    config: RwLock<ConfigLayers>,
}

impl InputMethod {
    fn load(language: Symbol, name: Symbol) -> Result<InputMethod> {
        let def = definition::load_definition(language, name)?;
        let mut layers = ConfigLayers::default();
        for cmd in &def.commands {
            layers.base.commands.insert(cmd.name, cmd.keyseqs.clone());
        }
        for var in &def.variables {
            layers.base.variables.insert(var.name, var.value.clone());
        }
        layers.user = config::load_user_layer(&config::default_config_path(), language, name);
        Ok(InputMethod {
            language,
            name,
            def: RwLock::new(Arc::new(def)),
            generation: AtomicU64::new(0),
            config: RwLock::new(layers),
        })
    }

    /// The current definition snapshot.
    pub fn def(&self) -> Arc<ImDef> {
        self.def.read().expect("im definition poisoned").clone()
    }

    /// Bumped on every reload; contexts re-sync when it moves.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Re-load the definition from the database.
    pub fn reload(&self) -> Result<()> {
        let fresh = definition::load_definition(self.language, self.name)?;
        {
            let mut layers = self.config.write().expect("im config poisoned");
            layers.base.commands.clear();
            layers.base.variables.clear();
            for cmd in &fresh.commands {
                layers.base.commands.insert(cmd.name, cmd.keyseqs.clone());
            }
            for var in &fresh.variables {
                layers.base.variables.insert(var.name, var.value.clone());
            }
        }
        *self.def.write().expect("im definition poisoned") = Arc::new(fresh);
        self.generation.fetch_add(1, Ordering::AcqRel);
        debug!(im = %self.name, "input method reloaded");
        Ok(())
    }

    pub fn title(&self) -> String {
        self.def().title.clone()
    }

    pub fn description(&self) -> Option<String> {
        self.def().description.clone()
    }

    /// Effective variable values across all layers.
    pub fn merged_variables(&self) -> AHashMap<Symbol, Value> {
        self.config
            .read()
            .expect("im config poisoned")
            .merged_variables()
    }

    /// Effective key bindings of a command.
    pub fn command_keys(&self, name: Symbol) -> Option<Vec<Vec<Symbol>>> {
        self.config.read().expect("im config poisoned").command(name)
    }

    /// Session-layer variable override.
    pub fn set_variable(&self, name: Symbol, value: Value) {
        self.config
            .write()
            .expect("im config poisoned")
            .set_session_variable(name, value);
    }

    /// Session-layer command rebinding.
    pub fn set_command(&self, name: Symbol, keyseqs: Vec<Vec<Symbol>>) {
        self.config
            .write()
            .expect("im config poisoned")
            .set_session_command(name, keyseqs);
    }

    /// Persist the merged user layer into `config.mic`.
    pub fn save_config(&self) -> Result<()> {
        let mut layers = self.config.write().expect("im config poisoned");
        config::save_user_layer(
            &config::default_config_path(),
            self.language,
            self.name,
            &mut layers,
        )
    }

    pub(crate) fn module_fn(&self, module: Symbol, func: Symbol) -> Option<ModuleFn> {
        MODULE_FNS
            .read()
            .expect("module functions poisoned")
            .get(&(module, func))
            .cloned()
    }

    /// Create a new interpreter context over this input method.
    pub fn create_ic(self: &Arc<Self>) -> InputContext {
        InputContext::new(self.clone())
    }
}

static OPEN_IMS: Lazy<RwLock<AHashMap<(Symbol, Symbol), Arc<InputMethod>>>> =
    Lazy::new(|| RwLock::new(AHashMap::new()));

/// Open (or fetch the already-open) input method `(language, name)`.
pub fn open_im(language: Symbol, name: Symbol) -> Result<Arc<InputMethod>> {
    {
        let open = OPEN_IMS.read().expect("open im registry poisoned");
        if let Some(im) = open.get(&(language, name)) {
            return Ok(im.clone());
        }
    }
    let im = Arc::new(InputMethod::load(language, name)?);
    OPEN_IMS
        .write()
        .expect("open im registry poisoned")
        .insert((language, name), im.clone());
    Ok(im)
}

/// Close an input method; existing contexts keep their `Arc` alive.
pub fn close_im(language: Symbol, name: Symbol) {
    OPEN_IMS
        .write()
        .expect("open im registry poisoned")
        .remove(&(language, name));
}

/// Input methods visible in the database.
pub fn list_input_methods() -> Vec<(Symbol, Symbol)> {
    libmtext_core::database::list(Symbol::intern("input-method"))
        .into_iter()
        .filter(|t| t.1 != Symbol::t())
        .map(|t| (t.1, t.2))
        .collect()
}

/// Open an input method by string names.
pub fn open_im_by_name(language: &str, name: &str) -> Result<Arc<InputMethod>> {
    open_im(Symbol::intern(language), Symbol::intern(name))
}

/// Convenience used by tests and hosts: register a definition blob.
pub fn register_im_blob(language: &str, name: &str, source: &str) {
    libmtext_core::database::register_blob(
        definition::im_tags(Symbol::intern(language), Symbol::intern(name)),
        source.as_bytes().to_vec(),
    );
}

/// Ensure `open_im` sees a fresh definition after a blob re-register.
pub fn reopen_im(language: &str, name: &str) -> Result<Arc<InputMethod>> {
    close_im(Symbol::intern(language), Symbol::intern(name));
    open_im_by_name(language, name)
}

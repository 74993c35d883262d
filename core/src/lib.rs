//! libmtext-core
//!
//! Shared foundation for the multilingual text toolkit: interned
//! symbols, the sparse char-table, M-texts with text properties, the
//! s-expression plist reader/writer, the tag-indexed definition
//! database and the charset registry. The `libmtext-coding` and
//! `libmtext-im` crates build the codec engine and the input-method
//! interpreter on top of these pieces.
//!
//! Public API:
//! - `Symbol` - Interned name with a property plist
//! - `CharTable` - Sparse map from character code to value
//! - `MText` - Unicode buffer with text properties
//! - `plist` - Database text format reader/writer
//! - `database` - Tag-indexed lazy definition store
//! - `charset` - Coded-character-set registry
//! - `Config` - Process-level configuration and feature flags

pub mod error;
pub use error::{Error, Result};

pub mod symbol;
pub use symbol::Symbol;

pub mod chartab;
pub use chartab::CharTable;

pub mod mtext;
pub use mtext::MText;

pub mod plist;
pub use plist::Value;

pub mod database;

pub mod charset;
pub use charset::{Charset, CharsetDef, CharsetMethod, INVALID_CODE};

use serde::{Deserialize, Serialize};

/// Process-level configuration.
///
/// This covers only settings shared by every consumer crate; the
/// input-method user customizations live in their own `config.mic`
/// s-expression file (see `libmtext-im`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Database directories scanned for `mdb.dir` manifests, in
    /// priority order (system, application, user).
    pub database_dirs: Vec<String>,

    /// Default leniency for newly created converters. Lenient decoders
    /// pass invalid bytes through as `binary`-tagged characters instead
    /// of failing.
    pub lenient: bool,

    /// Candidates shown per page by input-method front ends.
    pub candidate_page_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_dirs: vec![],
            lenient: false,
            candidate_page_size: 10,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_toml<P: AsRef<std::path::Path>>(
        path: P,
    ) -> std::result::Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Register every configured database directory.
    pub fn apply_database_dirs(&self) {
        for dir in &self.database_dirs {
            database::add_directory(dir);
        }
    }
}

/// Utility helpers.
pub mod utils {
    /// Render bytes as space-separated uppercase hex, the form used in
    /// diagnostics and the `mconv` listing output.
    pub fn hex(bytes: &[u8]) -> String {
        let mut out = String::with_capacity(bytes.len() * 3);
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&format!("{:02X}", b));
        }
        out
    }

    /// Parse space-separated hex back into bytes. Ignores extra
    /// whitespace; returns `None` on a malformed token.
    pub fn from_hex(s: &str) -> Option<Vec<u8>> {
        s.split_whitespace()
            .map(|tok| u8::from_str_radix(tok, 16).ok())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_round_trips_through_toml() {
        let mut cfg = Config::default();
        cfg.database_dirs.push("/usr/share/mtext".to_string());
        cfg.lenient = true;
        let s = toml::to_string_pretty(&cfg).unwrap();
        let back = Config::from_toml_str(&s).unwrap();
        assert_eq!(back.database_dirs, cfg.database_dirs);
        assert!(back.lenient);
    }

    #[test]
    fn hex_round_trip() {
        let bytes = vec![0x68, 0xC3, 0xA9];
        let s = utils::hex(&bytes);
        assert_eq!(s, "68 C3 A9");
        assert_eq!(utils::from_hex(&s).unwrap(), bytes);
    }
}

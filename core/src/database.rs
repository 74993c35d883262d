//! Tag-indexed definition database.
//!
//! Entries are identified by a quadruple of symbols (trailing slots may
//! be `nil`) and resolve to a definition file on disk or an in-memory
//! blob. Directories are scanned through their `mdb.dir` manifest, a
//! plist of `((T0 T1 T2 T3) "relative/path")` forms; a `*` tag
//! glob-expands against the directory contents. Manifests are restated
//! before every lookup so on-disk changes become visible to a running
//! process.
//!
//! Loading parses the referenced plist; `char-table` and `charset`
//! entries get dedicated loaders that produce the table or code/char
//! pair list directly. Charset pair lists may also live in a bincode
//! `.bin` artifact, the fast-load alternative to the textual table.

use crate::chartab::CharTable;
use crate::error::{Error, Result};
use crate::plist::{self, Value};
use crate::symbol::Symbol;
use ahash::AHashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::SystemTime;
use tracing::{debug, warn};

/// Entry identity: four tag symbols, trailing ones `nil`.
pub type Tags = (Symbol, Symbol, Symbol, Symbol);

/// Build a tag quadruple from up to four names.
pub fn tags(names: &[&str]) -> Tags {
    let get = |i: usize| {
        names
            .get(i)
            .map(|n| Symbol::intern(n))
            .unwrap_or_else(Symbol::nil)
    };
    (get(0), get(1), get(2), get(3))
}

#[derive(Debug, Clone)]
enum EntrySource {
    File(PathBuf),
    Blob(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Entry {
    source: EntrySource,
    /// Index of the originating directory for manifest entries;
    /// programmatic registrations carry `None` and survive rescans.
    from_dir: Option<usize>,
    /// Change signature (modified time + length) of the last load.
    sig: Option<(SystemTime, u64)>,
}

#[derive(Debug, Default)]
struct Database {
    dirs: Vec<PathBuf>,
    manifest_sig: Vec<Option<(SystemTime, u64)>>,
    entries: AHashMap<Tags, Entry>,
}

static DATABASE: Lazy<RwLock<Database>> = Lazy::new(|| RwLock::new(Database::default()));

fn file_sig(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// Add a database directory (scanned for an `mdb.dir` manifest).
pub fn add_directory<P: AsRef<Path>>(path: P) {
    let mut db = DATABASE.write().expect("database poisoned");
    let path = path.as_ref().to_path_buf();
    if !db.dirs.contains(&path) {
        db.dirs.push(path);
        db.manifest_sig.push(None);
    }
}

/// Register a definition file under `tags`.
pub fn register_file<P: AsRef<Path>>(t: Tags, path: P) {
    let mut db = DATABASE.write().expect("database poisoned");
    db.entries.insert(
        t,
        Entry {
            source: EntrySource::File(path.as_ref().to_path_buf()),
            from_dir: None,
            sig: None,
        },
    );
}

/// Register an in-memory definition blob under `tags`.
pub fn register_blob(t: Tags, bytes: Vec<u8>) {
    let mut db = DATABASE.write().expect("database poisoned");
    db.entries.insert(
        t,
        Entry {
            source: EntrySource::Blob(bytes),
            from_dir: None,
            sig: None,
        },
    );
}

/// Restate every manifest, dropping and re-adding entries from
/// directories whose `mdb.dir` changed.
pub fn update() {
    let mut db = DATABASE.write().expect("database poisoned");
    for i in 0..db.dirs.len() {
        let manifest = db.dirs[i].join("mdb.dir");
        let sig = file_sig(&manifest);
        if sig == db.manifest_sig[i] {
            continue;
        }
        db.manifest_sig[i] = sig;
        db.entries.retain(|_, e| e.from_dir != Some(i));
        if sig.is_none() {
            continue;
        }
        let text = match std::fs::read_to_string(&manifest) {
            Ok(t) => t,
            Err(e) => {
                warn!(manifest = %manifest.display(), error = %e, "unreadable manifest");
                continue;
            }
        };
        let forms = match plist::parse_all(&text) {
            Ok(f) => f,
            Err(e) => {
                warn!(manifest = %manifest.display(), error = %e, "bad manifest syntax");
                continue;
            }
        };
        let dir = db.dirs[i].clone();
        for form in &forms {
            if let Err(e) = scan_manifest_form(&mut db, i, &dir, form) {
                debug!(manifest = %manifest.display(), error = %e, "skipping manifest form");
            }
        }
    }
}

fn scan_manifest_form(db: &mut Database, dir_idx: usize, dir: &Path, form: &Value) -> Result<()> {
    let items = form
        .as_list()
        .ok_or_else(|| Error::Database("manifest form is not a list".into()))?;
    let tag_list = items
        .first()
        .and_then(|v| v.as_list())
        .ok_or_else(|| Error::Database("manifest form lacks a tag list".into()))?;
    let rel = items
        .get(1)
        .and_then(|v| v.as_text())
        .ok_or_else(|| Error::Database("manifest form lacks a path".into()))?;
    let star = Symbol::intern("*");
    let mut entry_tags = [Symbol::nil(); 4];
    let mut wildcard = false;
    for (k, v) in tag_list.iter().take(4).enumerate() {
        let s = v
            .as_symbol()
            .ok_or_else(|| Error::Database("non-symbol tag in manifest".into()))?;
        if s == star {
            wildcard = true;
        }
        entry_tags[k] = s;
    }
    if !wildcard {
        db.entries.insert(
            (entry_tags[0], entry_tags[1], entry_tags[2], entry_tags[3]),
            Entry {
                source: EntrySource::File(dir.join(rel)),
                from_dir: Some(dir_idx),
                sig: None,
            },
        );
        return Ok(());
    }
    expand_wildcard(db, dir_idx, dir, rel, &entry_tags, star)
}

/// Glob a wildcard manifest entry. The concrete tags come from the
/// matched file's leading plist when it carries one, otherwise from the
/// hyphen-separated components of the file stem.
fn expand_wildcard(
    db: &mut Database,
    dir_idx: usize,
    dir: &Path,
    rel: &str,
    entry_tags: &[Symbol; 4],
    star: Symbol,
) -> Result<()> {
    let rel_path = Path::new(rel);
    let parent = rel_path.parent().unwrap_or_else(|| Path::new(""));
    let pattern = rel_path
        .file_name()
        .and_then(|f| f.to_str())
        .ok_or_else(|| Error::Database(format!("bad wildcard path {:?}", rel)))?;
    let mut re = String::from("^");
    for ch in pattern.chars() {
        if ch == '*' {
            re.push_str(".*");
        } else {
            re.push_str(&regex::escape(&ch.to_string()));
        }
    }
    re.push('$');
    let re = Regex::new(&re).map_err(|e| Error::Database(format!("bad glob: {}", e)))?;
    let scan_dir = dir.join(parent);
    let rd = std::fs::read_dir(&scan_dir)
        .map_err(|e| Error::Database(format!("cannot scan {}: {}", scan_dir.display(), e)))?;
    for item in rd.flatten() {
        let fname = item.file_name();
        let Some(fname) = fname.to_str() else { continue };
        if !re.is_match(fname) {
            continue;
        }
        let path = scan_dir.join(fname);
        let concrete = match tags_from_file_head(&path, entry_tags, star) {
            Some(t) => t,
            None => match tags_from_stem(fname, entry_tags, star) {
                Some(t) => t,
                None => {
                    debug!(file = %path.display(), "cannot derive tags for wildcard entry");
                    continue;
                }
            },
        };
        db.entries.insert(
            concrete,
            Entry {
                source: EntrySource::File(path),
                from_dir: Some(dir_idx),
                sig: None,
            },
        );
    }
    Ok(())
}

/// Read the file's first form; accept it as the tag list when its
/// symbols agree with the manifest's non-wildcard tags.
fn tags_from_file_head(path: &Path, entry_tags: &[Symbol; 4], star: Symbol) -> Option<Tags> {
    let text = std::fs::read_to_string(path).ok()?;
    let forms = plist::parse_all(&text).ok()?;
    let head = forms.first()?.as_list()?;
    let mut out = [Symbol::nil(); 4];
    for (i, v) in head.iter().take(4).enumerate() {
        out[i] = v.as_symbol()?;
    }
    for i in 0..4 {
        if entry_tags[i] != star && !entry_tags[i].is_nil() && entry_tags[i] != out[i] {
            return None;
        }
    }
    Some((out[0], out[1], out[2], out[3]))
}

/// Fallback: `LANG-NAME.ext` stems fill the wildcard tags in order.
fn tags_from_stem(fname: &str, entry_tags: &[Symbol; 4], star: Symbol) -> Option<Tags> {
    let stem = fname.split('.').next().unwrap_or(fname);
    let mut parts = stem.split('-');
    let mut out = [Symbol::nil(); 4];
    for i in 0..4 {
        if entry_tags[i] == star {
            out[i] = Symbol::intern(parts.next()?);
        } else {
            out[i] = entry_tags[i];
        }
    }
    Some((out[0], out[1], out[2], out[3]))
}

/// Does an entry exist under `tags`?
pub fn find(t: Tags) -> bool {
    update();
    let db = DATABASE.read().expect("database poisoned");
    db.entries.contains_key(&t)
}

/// All registered tag quadruples whose first tag is `t0`.
pub fn list(t0: Symbol) -> Vec<Tags> {
    update();
    let db = DATABASE.read().expect("database poisoned");
    let mut out: Vec<Tags> = db.entries.keys().filter(|k| k.0 == t0).copied().collect();
    out.sort_by_key(|t| (t.0.name(), t.1.name(), t.2.name(), t.3.name()));
    out
}

fn read_entry(t: Tags) -> Result<(Vec<u8>, Option<PathBuf>)> {
    update();
    let mut db = DATABASE.write().expect("database poisoned");
    let entry = db
        .entries
        .get_mut(&t)
        .ok_or_else(|| Error::Database(format!("no entry for tags {:?}", t)))?;
    match &entry.source {
        EntrySource::Blob(bytes) => Ok((bytes.clone(), None)),
        EntrySource::File(path) => {
            let path = path.clone();
            entry.sig = file_sig(&path);
            let bytes = std::fs::read(&path)
                .map_err(|e| Error::Database(format!("cannot read {}: {}", path.display(), e)))?;
            Ok((bytes, Some(path)))
        }
    }
}

/// Load the entry as a sequence of plist forms.
pub fn load(t: Tags) -> Result<Vec<Value>> {
    let (bytes, path) = read_entry(t)?;
    let text = String::from_utf8(bytes)
        .map_err(|_| Error::Database("definition file is not UTF-8".into()))?;
    debug!(tags = ?t, path = ?path, "loading database entry");
    plist::parse_all(&text)
}

/// Load a `char-table` entry: an optional `(default N)` header followed
/// by `(CODE VALUE)` and `(FROM TO VALUE)` forms.
pub fn load_chartable(t: Tags) -> Result<CharTable<i64>> {
    let forms = load(t)?;
    let mut default = 0i64;
    let mut rest = forms.as_slice();
    if let Some(head) = forms.first().and_then(|v| v.as_list()) {
        if head.first().and_then(|v| v.as_symbol()) == Some(Symbol::intern("default")) {
            default = head
                .get(1)
                .and_then(|v| v.as_int())
                .ok_or_else(|| Error::Database("bad char-table default".into()))?;
            rest = &forms[1..];
        }
    }
    let mut table = CharTable::new(default);
    for form in rest {
        let items = form
            .as_list()
            .ok_or_else(|| Error::Database("char-table form is not a list".into()))?;
        match items {
            [a, b] => {
                let code = int_as_code(a)?;
                table.set(code, b.as_int().unwrap_or(default))?;
            }
            [a, b, c] => {
                let from = int_as_code(a)?;
                let to = int_as_code(b)?;
                table.set_range(from, to, c.as_int().unwrap_or(default))?;
            }
            _ => return Err(Error::Database("char-table form has bad arity".into())),
        }
    }
    Ok(table)
}

/// Load a `charset` map entry as `(code, char)` pairs. Textual entries
/// hold `(CODE CHAR)` pairs and `(FROM TO CHAR)` ranges; `.bin` files
/// hold the bincode-serialized pair vector.
pub fn load_charset_pairs(t: Tags) -> Result<Vec<(u32, u32)>> {
    let (bytes, path) = read_entry(t)?;
    if path
        .as_ref()
        .and_then(|p| p.extension())
        .map(|e| e == "bin")
        .unwrap_or(false)
    {
        return bincode::deserialize(&bytes)
            .map_err(|e| Error::Database(format!("bad charset map artifact: {}", e)));
    }
    let text = String::from_utf8(bytes)
        .map_err(|_| Error::Database("charset map file is not UTF-8".into()))?;
    let forms = plist::parse_all(&text)?;
    let mut pairs = Vec::new();
    for form in &forms {
        let items = form
            .as_list()
            .ok_or_else(|| Error::Database("charset map form is not a list".into()))?;
        match items {
            [a, b] => pairs.push((int_as_code(a)?, int_as_code(b)?)),
            [a, b, c] => {
                let from = int_as_code(a)?;
                let to = int_as_code(b)?;
                let ch = int_as_code(c)?;
                if to < from {
                    return Err(Error::Database("descending charset map range".into()));
                }
                for (k, code) in (from..=to).enumerate() {
                    pairs.push((code, ch + k as u32));
                }
            }
            _ => return Err(Error::Database("charset map form has bad arity".into())),
        }
    }
    Ok(pairs)
}

/// Serialize a charset pair list into the `.bin` artifact format.
pub fn charset_pairs_to_bin(pairs: &[(u32, u32)]) -> Result<Vec<u8>> {
    bincode::serialize(pairs).map_err(|e| Error::Database(format!("serialize map: {}", e)))
}

fn int_as_code(v: &Value) -> Result<u32> {
    let i = v
        .as_int()
        .ok_or_else(|| Error::Database(format!("expected integer, got {:?}", v)))?;
    u32::try_from(i).map_err(|_| Error::Database(format!("negative code {}", i)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trip() {
        let t = tags(&["test-db", "blob-entry"]);
        register_blob(t, b"(a 1) (b 2)".to_vec());
        assert!(find(t));
        let forms = load(t).unwrap();
        assert_eq!(forms.len(), 2);
    }

    #[test]
    fn chartable_loader() {
        let t = tags(&["char-table", "test-categories"]);
        register_blob(t, b"(default -1) (0x41 1) (0x100 0x10F 2)".to_vec());
        let table = load_chartable(t).unwrap();
        assert_eq!(*table.get(0x41).unwrap(), 1);
        assert_eq!(*table.get(0x105).unwrap(), 2);
        assert_eq!(*table.get(0x42).unwrap(), -1);
    }

    #[test]
    fn charset_pairs_loader_expands_ranges() {
        let t = tags(&["charset", "test-pairs"]);
        register_blob(t, b"(0x2422 0x3042) (0x30 0x32 0x60)".to_vec());
        let pairs = load_charset_pairs(t).unwrap();
        assert!(pairs.contains(&(0x2422, 0x3042)));
        assert!(pairs.contains(&(0x31, 0x61)));
        assert_eq!(pairs.len(), 4);
    }

    #[test]
    fn bincode_artifact_round_trip() {
        let pairs = vec![(0x2422u32, 0x3042u32), (0x2424, 0x3044)];
        let bin = charset_pairs_to_bin(&pairs).unwrap();
        let path = std::env::temp_dir().join(format!(
            "libmtext-test-pairs-{}.bin",
            std::process::id()
        ));
        std::fs::write(&path, &bin).unwrap();
        let t = tags(&["charset", "test-bin-pairs"]);
        register_file(t, &path);
        assert_eq!(load_charset_pairs(t).unwrap(), pairs);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_entry_is_an_error() {
        let t = tags(&["no-such", "entry"]);
        assert!(load(t).is_err());
    }
}

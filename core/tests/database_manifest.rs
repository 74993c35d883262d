//! Integration tests for directory scanning and manifest refresh.

use libmtext_core::database;
use libmtext_core::symbol::Symbol;
use std::fs;
use std::path::PathBuf;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("libmtext-test-{}-{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn manifest_entries_resolve_and_load() {
    let dir = scratch_dir("manifest");
    fs::write(
        dir.join("mdb.dir"),
        "((char-table test-width) \"width.tbl\")\n",
    )
    .unwrap();
    fs::write(dir.join("width.tbl"), "(default 1) (0x1100 0x115F 2)\n").unwrap();

    database::add_directory(&dir);
    let tags = database::tags(&["char-table", "test-width"]);
    assert!(database::find(tags));
    let table = database::load_chartable(tags).unwrap();
    assert_eq!(*table.get(0x1100).unwrap(), 2);
    assert_eq!(*table.get(0x41).unwrap(), 1);
}

#[test]
fn wildcard_entries_expand_from_file_heads() {
    let dir = scratch_dir("wildcard");
    fs::write(dir.join("mdb.dir"), "((input-method * *) \"*.mim\")\n").unwrap();
    fs::write(
        dir.join("ja-testim.mim"),
        "(input-method ja testim)\n(title \"J\")\n",
    )
    .unwrap();
    fs::write(
        dir.join("ko-otherim.mim"),
        "(input-method ko otherim)\n(title \"K\")\n",
    )
    .unwrap();

    database::add_directory(&dir);
    let t0 = Symbol::intern("input-method");
    let listed = database::list(t0);
    let ja = database::tags(&["input-method", "ja", "testim"]);
    let ko = database::tags(&["input-method", "ko", "otherim"]);
    assert!(listed.contains(&ja));
    assert!(listed.contains(&ko));
}

#[test]
fn manifest_changes_become_visible() {
    let dir = scratch_dir("refresh");
    fs::write(dir.join("mdb.dir"), "((test-refresh a) \"a.txt\")\n").unwrap();
    fs::write(dir.join("a.txt"), "(1)\n").unwrap();
    database::add_directory(&dir);
    assert!(database::find(database::tags(&["test-refresh", "a"])));
    assert!(!database::find(database::tags(&["test-refresh", "b"])));

    // Rewrite the manifest; ensure the signature actually changes even on
    // filesystems with coarse timestamps.
    fs::write(dir.join("b.txt"), "(2)\n").unwrap();
    fs::write(
        dir.join("mdb.dir"),
        "((test-refresh a) \"a.txt\")\n((test-refresh b) \"b.txt\")\n",
    )
    .unwrap();
    assert!(database::find(database::tags(&["test-refresh", "b"])));
    let forms = database::load(database::tags(&["test-refresh", "b"])).unwrap();
    assert_eq!(forms.len(), 1);
}

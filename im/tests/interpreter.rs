//! End-to-end interpreter behavior over blob-registered definitions.

use libmtext_core::plist::Value;
use libmtext_core::symbol::Symbol;
use libmtext_im::keysym;
use libmtext_im::{open_im_by_name, register_im_blob};

fn key(name: &str) -> Symbol {
    keysym::parse_key(name).unwrap()
}

#[test]
fn two_key_commit_sequence() {
    register_im_blob(
        "t",
        "seq-test",
        r#"
        (input-method t seq-test)
        (title "SEQ")
        (map (m ("k" "k") ("ka" "ka")))
        (state (init (m (commit))))
        "#,
    );
    let im = open_im_by_name("t", "seq-test").unwrap();
    let mut ic = im.create_ic();

    assert!(ic.filter(key("k")).unwrap());
    assert_eq!(ic.preedit().to_string_lossy(), "k");
    assert_eq!(ic.produced().to_string_lossy(), "");

    assert!(ic.filter(key("a")).unwrap());
    assert_eq!(ic.preedit().to_string_lossy(), "");
    assert_eq!(ic.produced().to_string_lossy(), "ka");
}

#[test]
fn unmatched_key_is_unhandled_at_init_root() {
    register_im_blob(
        "t",
        "unhandled-test",
        r#"
        (input-method t unhandled-test)
        (map (m ("a" "A")))
        (state (init (m (commit))))
        "#,
    );
    let im = open_im_by_name("t", "unhandled-test").unwrap();
    let mut ic = im.create_ic();
    assert!(!ic.filter(key("z")).unwrap());
    assert!(ic.filter(key("a")).unwrap());
    assert_eq!(ic.produced().to_string_lossy(), "A");
}

#[test]
fn partial_match_commits_and_reprocesses() {
    register_im_blob(
        "t",
        "partial-test",
        r#"
        (input-method t partial-test)
        (map (m ("k" "k") ("ka" "ka") ("z" "Z")))
        (state (init (m (commit))))
        "#,
    );
    let im = open_im_by_name("t", "partial-test").unwrap();
    let mut ic = im.create_ic();
    assert!(ic.filter(key("k")).unwrap());
    // 'z' cannot extend "k": the stuck branch commits "k", then the
    // key replays from the initial state and commits "Z".
    assert!(ic.filter(key("z")).unwrap());
    assert_eq!(ic.produced().to_string_lossy(), "kZ");
    assert_eq!(ic.preedit().to_string_lossy(), "");
}

#[test]
fn state_shift_and_back() {
    register_im_blob(
        "t",
        "shift-test",
        r#"
        (input-method t shift-test)
        (map (m ("a" "a" (shift second)))
             (n ("b" "b")))
        (state (init (m)) (second (n (commit))))
        "#,
    );
    let im = open_im_by_name("t", "shift-test").unwrap();
    let mut ic = im.create_ic();
    assert!(ic.filter(key("a")).unwrap());
    assert_eq!(ic.state_name(), Symbol::intern("second"));
    assert!(ic.filter(key("b")).unwrap());
    assert_eq!(ic.produced().to_string_lossy(), "ab");
}

#[test]
fn variables_and_conditionals() {
    register_im_blob(
        "t",
        "var-test",
        r#"
        (input-method t var-test)
        (variable (count "keys so far" 0))
        (map (m ("x" (add count 1) (= count 3 ((insert "!") (commit)))) ))
        (state (init (m)))
        "#,
    );
    let im = open_im_by_name("t", "var-test").unwrap();
    let mut ic = im.create_ic();
    for _ in 0..2 {
        ic.filter(key("x")).unwrap();
        assert_eq!(ic.produced().to_string_lossy(), "");
    }
    ic.filter(key("x")).unwrap();
    assert_eq!(ic.produced().to_string_lossy(), "!");
    assert_eq!(ic.variable(Symbol::intern("count")), Some(Value::Int(3)));
}

#[test]
fn candidate_selection() {
    register_im_blob(
        "t",
        "cand-test",
        r#"
        (input-method t cand-test)
        (map (starter ("a" (insert (("X" "Y" "Z"))) (show) (shift choose)))
             (chooser ("n" (select @+))
                      ("p" (select @-))
                      ("c" (commit) (shift init))))
        (state (init (starter)) (choose (chooser)))
        "#,
    );
    let im = open_im_by_name("t", "cand-test").unwrap();
    let mut ic = im.create_ic();
    assert!(ic.filter(key("a")).unwrap());
    assert_eq!(ic.preedit().to_string_lossy(), "X");
    assert!(ic.candidates_shown());
    assert!(ic.filter(key("n")).unwrap());
    assert_eq!(ic.preedit().to_string_lossy(), "Y");
    assert!(ic.filter(key("n")).unwrap());
    assert_eq!(ic.preedit().to_string_lossy(), "Z");
    assert!(ic.filter(key("p")).unwrap());
    assert_eq!(ic.preedit().to_string_lossy(), "Y");
    assert!(ic.filter(key("c")).unwrap());
    assert_eq!(ic.produced().to_string_lossy(), "Y");
    assert_eq!(ic.preedit().to_string_lossy(), "");
}

#[test]
fn delete_and_move_edit_the_preedit() {
    register_im_blob(
        "t",
        "edit-test",
        r#"
        (input-method t edit-test)
        (map (m ("abc" "abc" (move @<) (insert "x") (move @>) (delete @-))))
        (state (init (m (commit))))
        "#,
    );
    let im = open_im_by_name("t", "edit-test").unwrap();
    let mut ic = im.create_ic();
    for k in ["a", "b"] {
        assert!(ic.filter(key(k)).unwrap());
    }
    assert!(ic.filter(key("c")).unwrap());
    // "abc" -> insert x at start -> delete last char -> "xab".
    assert_eq!(ic.produced().to_string_lossy(), "xab");
}

#[test]
fn positional_markers_address_the_preedit() {
    register_im_blob(
        "t",
        "posmark-test",
        r#"
        (input-method t posmark-test)
        (map (m ("abc" "abc" (move @1) (insert "x"))))
        (state (init (m (commit))))
        "#,
    );
    let im = open_im_by_name("t", "posmark-test").unwrap();
    let mut ic = im.create_ic();
    for k in ["a", "b"] {
        assert!(ic.filter(key(k)).unwrap());
    }
    assert!(ic.filter(key("c")).unwrap());
    // "abc" -> cursor to position 1 -> "axbc".
    assert_eq!(ic.produced().to_string_lossy(), "axbc");
}

#[test]
fn undo_replays_the_key_buffer() {
    register_im_blob(
        "t",
        "undo-test",
        r#"
        (input-method t undo-test)
        (map (m ("a" "a") ("ab" "ab") ((a b BackSpace) (undo))))
        (state (init (m)))
        "#,
    );
    let im = open_im_by_name("t", "undo-test").unwrap();
    let mut ic = im.create_ic();
    assert!(ic.filter(key("a")).unwrap());
    assert!(ic.filter(key("b")).unwrap());
    assert_eq!(ic.preedit().to_string_lossy(), "ab");
    assert!(ic.filter(key("BackSpace")).unwrap());
    // undo drops the BackSpace and the previous key, replaying "a".
    assert_eq!(ic.preedit().to_string_lossy(), "a");
}

#[test]
fn pushback_requeues_keys() {
    register_im_blob(
        "t",
        "pushback-test",
        r#"
        (input-method t pushback-test)
        (map (m ("q" (pushback "ka")) ("k" "k") ("ka" "ka")))
        (state (init (m (commit))))
        "#,
    );
    let im = open_im_by_name("t", "pushback-test").unwrap();
    let mut ic = im.create_ic();
    assert!(ic.filter(key("q")).unwrap());
    assert_eq!(ic.produced().to_string_lossy(), "ka");
}

#[test]
fn alias_ring_matches_spellings() {
    register_im_blob(
        "t",
        "alias-test",
        r#"
        (input-method t alias-test)
        (map (m ((C-a) "ctrl")))
        (state (init (m (commit))))
        "#,
    );
    let im = open_im_by_name("t", "alias-test").unwrap();
    let mut ic = im.create_ic();
    // C-A spells the same key as C-a.
    assert!(ic.filter(key("C-A")).unwrap());
    assert_eq!(ic.produced().to_string_lossy(), "ctrl");
}

#[test]
fn session_config_overrides_definition() {
    register_im_blob(
        "t",
        "config-test",
        r#"
        (input-method t config-test)
        (variable (greeting "inserted text" "hi"))
        (map (m ("g" (insert greeting))))
        (state (init (m (commit))))
        "#,
    );
    let im = open_im_by_name("t", "config-test").unwrap();
    im.set_variable(Symbol::intern("greeting"), Value::Text("yo".into()));
    let mut ic = im.create_ic();
    assert!(ic.filter(key("g")).unwrap());
    assert_eq!(ic.produced().to_string_lossy(), "yo");
}

#[test]
fn macros_expand() {
    register_im_blob(
        "t",
        "macro-test",
        r#"
        (input-method t macro-test)
        (macro (bang (insert "!") (commit)))
        (map (m ("b" bang)))
        (state (init (m)))
        "#,
    );
    let im = open_im_by_name("t", "macro-test").unwrap();
    let mut ic = im.create_ic();
    assert!(ic.filter(key("b")).unwrap());
    assert_eq!(ic.produced().to_string_lossy(), "!");
}

#[test]
fn module_call_reaches_host_function() {
    register_im_blob(
        "t",
        "call-test",
        r#"
        (input-method t call-test)
        (module (demo greet))
        (map (m ("c" (call demo greet))))
        (state (init (m (commit))))
        "#,
    );
    libmtext_im::register_module_fn(
        Symbol::intern("demo"),
        Symbol::intern("greet"),
        std::sync::Arc::new(|ic, _args| {
            ic.set_variable(Symbol::intern("called"), Value::Int(1));
            None
        }),
    );
    let im = open_im_by_name("t", "call-test").unwrap();
    let mut ic = im.create_ic();
    assert!(ic.filter(key("c")).unwrap());
    assert_eq!(ic.variable(Symbol::intern("called")), Some(Value::Int(1)));
}

#[test]
fn include_splices_foreign_maps() {
    register_im_blob(
        "t",
        "include-source",
        r#"
        (input-method t include-source)
        (map (shared ("s" "S")))
        (state (init (shared)))
        "#,
    );
    register_im_blob(
        "t",
        "include-user",
        r#"
        (input-method t include-user)
        (include (t include-source) map)
        (state (init (shared (commit))))
        "#,
    );
    let im = open_im_by_name("t", "include-user").unwrap();
    let mut ic = im.create_ic();
    assert!(ic.filter(key("s")).unwrap());
    assert_eq!(ic.produced().to_string_lossy(), "S");
}

#[test]
fn reload_command_reloads_definition() {
    register_im_blob(
        "t",
        "reload-test",
        r#"
        (input-method t reload-test)
        (command (reload "reload the input method" (C-r)))
        (map (m ("a" "old")))
        (state (init (m (commit))))
        "#,
    );
    let im = open_im_by_name("t", "reload-test").unwrap();
    let mut ic = im.create_ic();
    assert!(ic.filter(key("a")).unwrap());
    assert_eq!(ic.take_produced().to_string_lossy(), "old");

    register_im_blob(
        "t",
        "reload-test",
        r#"
        (input-method t reload-test)
        (command (reload "reload the input method" (C-r)))
        (map (m ("a" "new")))
        (state (init (m (commit))))
        "#,
    );
    assert!(ic.filter(key("C-r")).unwrap());
    assert!(ic.filter(key("a")).unwrap());
    assert_eq!(ic.take_produced().to_string_lossy(), "new");
}

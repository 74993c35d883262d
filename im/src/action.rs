//! The input-method action language.
//!
//! Actions are parsed from definition plists into a closed vocabulary;
//! expressions are prefix s-expressions over integers with variables
//! resolving against the context environment. A rule that fails to
//! parse is reported by the caller and treated as absent, never fatal.

use crate::keysym;
use libmtext_core::error::{Error, Result};
use libmtext_core::plist::Value;
use libmtext_core::symbol::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Set,
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Not,
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Int(i64),
    Text(String),
    Var(Symbol),
    Op(OpKind, Vec<Expr>),
}

/// Position argument of `delete`, `move` and friends.
#[derive(Debug, Clone)]
pub enum Pos {
    Int(i64),
    Marker(Symbol),
}

#[derive(Debug, Clone)]
pub enum Pushback {
    Count(i64),
    Keys(Vec<Symbol>),
}

#[derive(Debug, Clone)]
pub enum SelectArg {
    Index(i64),
    Keyword(Symbol),
}

#[derive(Debug, Clone)]
pub enum Action {
    Insert(Expr),
    /// Candidate groups: each inner vector is one group of candidate
    /// strings shown together.
    InsertCandidates(Vec<Vec<String>>),
    Delete(Pos),
    Move(Pos),
    Mark(Symbol),
    Pushback(Pushback),
    Pop,
    Undo(Option<i64>),
    Commit,
    Unhandle,
    Shift(Symbol),
    Select(SelectArg),
    Show,
    Hide,
    SetVar(ArithOp, Symbol, Expr),
    Cond(Vec<(Expr, Vec<Action>)>),
    If(OpKind, Expr, Expr, Vec<Action>, Vec<Action>),
    Call(Symbol, Symbol, Vec<Value>),
    /// Combining-position token; alters placement of the next insert.
    Combining(u32),
    ClusterBegin,
    ClusterEnd,
    Separator,
    Macro(Symbol),
}

/// Pack a combining-position token into the code stored on the next
/// inserted character: bit 8 marks a combining code, the high nibble is
/// the vertical anchor (top/middle/bottom) and the low nibble the
/// horizontal one (left/center/right).
pub fn combining_code(token: &str) -> Option<u32> {
    let b = token.as_bytes();
    if b.len() != 2 {
        return None;
    }
    let v = match b[0] {
        b't' => 0u32,
        b'm' => 1,
        b'b' => 2,
        _ => return None,
    };
    let h = match b[1] {
        b'l' => 0u32,
        b'c' => 1,
        b'r' => 2,
        _ => return None,
    };
    Some(0x100 | (v << 4) | h)
}

fn op_kind(name: &str) -> Option<OpKind> {
    Some(match name {
        "+" => OpKind::Add,
        "-" => OpKind::Sub,
        "*" => OpKind::Mul,
        "/" => OpKind::Div,
        "&" => OpKind::And,
        "|" => OpKind::Or,
        "!" => OpKind::Not,
        "=" => OpKind::Eq,
        "<" => OpKind::Lt,
        ">" => OpKind::Gt,
        "<=" => OpKind::Le,
        ">=" => OpKind::Ge,
        _ => return None,
    })
}

pub fn parse_expr(value: &Value) -> Result<Expr> {
    match value {
        Value::Int(i) => Ok(Expr::Int(*i)),
        Value::Text(t) => Ok(Expr::Text(t.clone())),
        Value::Symbol(s) => Ok(Expr::Var(*s)),
        Value::List(items) => {
            let head = items
                .first()
                .and_then(|v| v.as_symbol())
                .ok_or_else(|| Error::Im("expression lacks an operator".into()))?;
            let kind = op_kind(&head.name())
                .ok_or_else(|| Error::Im(format!("unknown operator {}", head)))?;
            let args = items[1..]
                .iter()
                .map(parse_expr)
                .collect::<Result<Vec<_>>>()?;
            Ok(Expr::Op(kind, args))
        }
    }
}

fn parse_pos(value: &Value) -> Result<Pos> {
    match value {
        Value::Int(i) => Ok(Pos::Int(*i)),
        Value::Symbol(s) => Ok(Pos::Marker(*s)),
        other => Err(Error::Im(format!("bad position argument: {:?}", other))),
    }
}

/// Candidate groups from the argument of `(insert (GROUPS…))`: an
/// M-text contributes its characters as one group, a list of M-texts
/// contributes the texts as one group.
fn parse_candidates(items: &[Value]) -> Result<Vec<Vec<String>>> {
    let mut groups = Vec::new();
    for item in items {
        match item {
            Value::Text(t) => {
                groups.push(t.chars().map(|c| c.to_string()).collect());
            }
            Value::List(texts) => {
                let mut group = Vec::new();
                for t in texts {
                    group.push(
                        t.as_text()
                            .ok_or_else(|| Error::Im("candidate group holds a non-text".into()))?
                            .to_string(),
                    );
                }
                groups.push(group);
            }
            other => return Err(Error::Im(format!("bad candidate group: {:?}", other))),
        }
    }
    Ok(groups)
}

pub fn parse_actions(values: &[Value]) -> Result<Vec<Action>> {
    values.iter().map(parse_action).collect()
}

pub fn parse_action(value: &Value) -> Result<Action> {
    match value {
        Value::Text(t) => Ok(Action::Insert(Expr::Text(t.clone()))),
        Value::Int(i) => Ok(Action::Insert(Expr::Int(*i))),
        Value::Symbol(s) => {
            let name = s.name();
            match name.as_str() {
                "<" => Ok(Action::ClusterBegin),
                ">" => Ok(Action::ClusterEnd),
                "|" => Ok(Action::Separator),
                "commit" => Ok(Action::Commit),
                "unhandle" => Ok(Action::Unhandle),
                "show" => Ok(Action::Show),
                "hide" => Ok(Action::Hide),
                "pop" => Ok(Action::Pop),
                _ => match combining_code(&name) {
                    Some(code) => Ok(Action::Combining(code)),
                    None => Ok(Action::Macro(*s)),
                },
            }
        }
        Value::List(items) => parse_list_action(items),
    }
}

fn parse_list_action(items: &[Value]) -> Result<Action> {
    let head = items
        .first()
        .and_then(|v| v.as_symbol())
        .ok_or_else(|| Error::Im("action list lacks a head symbol".into()))?;
    let name = head.name();
    let arg = items.get(1);
    match name.as_str() {
        "insert" => match arg {
            Some(Value::List(groups)) => Ok(Action::InsertCandidates(parse_candidates(groups)?)),
            Some(v) => Ok(Action::Insert(parse_expr(v)?)),
            None => Err(Error::Im("insert lacks an argument".into())),
        },
        "delete" => Ok(Action::Delete(parse_pos(arg.ok_or_else(|| {
            Error::Im("delete lacks an argument".into())
        })?)?)),
        "move" => Ok(Action::Move(parse_pos(arg.ok_or_else(|| {
            Error::Im("move lacks an argument".into())
        })?)?)),
        "mark" => arg
            .and_then(|v| v.as_symbol())
            .map(Action::Mark)
            .ok_or_else(|| Error::Im("mark needs a marker symbol".into())),
        "pushback" => match arg {
            Some(Value::Int(n)) => Ok(Action::Pushback(Pushback::Count(*n))),
            Some(v) => Ok(Action::Pushback(Pushback::Keys(keysym::parse_keyseq(v)?))),
            None => Err(Error::Im("pushback lacks an argument".into())),
        },
        "pop" => Ok(Action::Pop),
        "undo" => Ok(Action::Undo(arg.and_then(|v| v.as_int()))),
        "commit" => Ok(Action::Commit),
        "unhandle" => Ok(Action::Unhandle),
        "shift" => arg
            .and_then(|v| v.as_symbol())
            .map(Action::Shift)
            .ok_or_else(|| Error::Im("shift needs a state name".into())),
        "select" => match arg {
            Some(Value::Int(i)) => Ok(Action::Select(SelectArg::Index(*i))),
            Some(Value::Symbol(s)) => Ok(Action::Select(SelectArg::Keyword(*s))),
            _ => Err(Error::Im("select needs an index or keyword".into())),
        },
        "show" => Ok(Action::Show),
        "hide" => Ok(Action::Hide),
        "set" | "add" | "sub" | "mul" | "div" => {
            let op = match name.as_str() {
                "set" => ArithOp::Set,
                "add" => ArithOp::Add,
                "sub" => ArithOp::Sub,
                "mul" => ArithOp::Mul,
                _ => ArithOp::Div,
            };
            let var = arg
                .and_then(|v| v.as_symbol())
                .ok_or_else(|| Error::Im(format!("{} needs a variable", name)))?;
            let expr = parse_expr(
                items
                    .get(2)
                    .ok_or_else(|| Error::Im(format!("{} lacks an expression", name)))?,
            )?;
            Ok(Action::SetVar(op, var, expr))
        }
        "cond" => {
            let mut clauses = Vec::new();
            for clause in &items[1..] {
                let parts = clause
                    .as_list()
                    .ok_or_else(|| Error::Im("cond clause is not a list".into()))?;
                let test = parse_expr(
                    parts
                        .first()
                        .ok_or_else(|| Error::Im("empty cond clause".into()))?,
                )?;
                clauses.push((test, parse_actions(&parts[1..])?));
            }
            Ok(Action::Cond(clauses))
        }
        "=" | "<" | ">" | "<=" | ">=" => {
            let kind = op_kind(&name).expect("comparison operator");
            let a = parse_expr(arg.ok_or_else(|| Error::Im("comparison lacks operands".into()))?)?;
            let b = parse_expr(
                items
                    .get(2)
                    .ok_or_else(|| Error::Im("comparison lacks operands".into()))?,
            )?;
            let then_actions = match items.get(3) {
                Some(Value::List(acts)) => parse_actions(acts)?,
                Some(v) => vec![parse_action(v)?],
                None => Vec::new(),
            };
            let else_actions = match items.get(4) {
                Some(Value::List(acts)) => parse_actions(acts)?,
                Some(v) => vec![parse_action(v)?],
                None => Vec::new(),
            };
            Ok(Action::If(kind, a, b, then_actions, else_actions))
        }
        "call" => {
            let module = arg
                .and_then(|v| v.as_symbol())
                .ok_or_else(|| Error::Im("call lacks a module".into()))?;
            let func = items
                .get(2)
                .and_then(|v| v.as_symbol())
                .ok_or_else(|| Error::Im("call lacks a function".into()))?;
            Ok(Action::Call(module, func, items[3..].to_vec()))
        }
        _ => Err(Error::Im(format!("unknown action {}", name))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libmtext_core::plist::parse_one;

    fn act(src: &str) -> Action {
        parse_action(&parse_one(src).unwrap()).unwrap()
    }

    #[test]
    fn literals_become_inserts() {
        assert!(matches!(act("\"ka\""), Action::Insert(Expr::Text(_))));
        assert!(matches!(act("0x3042"), Action::Insert(Expr::Int(0x3042))));
    }

    #[test]
    fn candidate_groups_parse() {
        match act("(insert ((\"你\" \"尼\") \"上下\"))") {
            Action::InsertCandidates(groups) => {
                assert_eq!(groups.len(), 2);
                assert_eq!(groups[0], vec!["你".to_string(), "尼".to_string()]);
                assert_eq!(groups[1], vec!["上".to_string(), "下".to_string()]);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn conditional_with_else() {
        match act("(= x 1 ((shift init)) ((insert \"n\")))") {
            Action::If(OpKind::Eq, _, _, then_a, else_a) => {
                assert_eq!(then_a.len(), 1);
                assert_eq!(else_a.len(), 1);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn nested_expression() {
        let e = parse_expr(&parse_one("(+ x (* 2 y))").unwrap()).unwrap();
        match e {
            Expr::Op(OpKind::Add, args) => assert_eq!(args.len(), 2),
            other => panic!("unexpected expr {:?}", other),
        }
    }

    #[test]
    fn combining_tokens_pack() {
        assert_eq!(combining_code("tl"), Some(0x100));
        assert_eq!(combining_code("bc"), Some(0x121));
        assert_eq!(combining_code("xx"), None);
        assert!(matches!(act("bc"), Action::Combining(0x121)));
    }

    #[test]
    fn unknown_symbols_are_macros() {
        assert!(matches!(act("apply-tone"), Action::Macro(_)));
    }
}

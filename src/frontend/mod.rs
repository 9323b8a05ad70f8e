/*
 * Copyright (c) 2020 - 2021.  Shoyo Inokuchi.
 * Please refer to github.com/shoyo/jin for more information about this project and its license.
 */

use crate::common::Op;
use crate::engine::Engine;
use crate::error::Result;
use crate::relation::{AttrType, AttrValue, Record};

/// The command-line front end: parses one statement per line and dispatches
/// it to the schema and algebra facades. Queries without an INTO clause are
/// materialized into a scratch relation, printed, and dropped.

/// Name of the scratch relation used to print query results.
const TEMP_REL: &str = ".temp";

/// Intermediate scratch relation for attribute-list selects with a
/// predicate (select first, then project).
const TEMP_SELECT_REL: &str = ".tmpsel";

/// A parsed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateTable {
        rel: String,
        attrs: Vec<(String, AttrType)>,
    },
    DropTable {
        rel: String,
    },
    OpenTable {
        rel: String,
    },
    CloseTable {
        rel: String,
    },
    RenameTable {
        from: String,
        to: String,
    },
    RenameColumn {
        rel: String,
        from: String,
        to: String,
    },
    CreateIndex {
        rel: String,
        attr: String,
    },
    DropIndex {
        rel: String,
        attr: String,
    },
    Insert {
        rel: String,
        values: Vec<String>,
    },
    Select {
        src: String,
        target: Option<String>,
        attrs: Option<Vec<String>>,
        predicate: Option<(String, Op, String)>,
    },
    Join {
        src1: String,
        src2: String,
        target: Option<String>,
        attr1: String,
        attr2: String,
    },
    Help,
    Exit,
}

/// The result of executing a command.
pub enum Output {
    Done,
    Table {
        header: Vec<String>,
        rows: Vec<Record>,
    },
    Help,
}

/// Split a statement into tokens: identifier/value words, punctuation, and
/// comparison operators. A trailing semicolon is ignored.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut word = String::new();
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '(' | ')' | ',' | ';' => {
                if !word.is_empty() {
                    tokens.push(std::mem::take(&mut word));
                }
                if c != ';' {
                    tokens.push(c.to_string());
                }
            }
            '=' | '<' | '>' | '!' => {
                if !word.is_empty() {
                    tokens.push(std::mem::take(&mut word));
                }
                let mut op = c.to_string();
                if let Some(&'=') = chars.peek() {
                    op.push('=');
                    chars.next();
                }
                tokens.push(op);
            }
            c if c.is_whitespace() => {
                if !word.is_empty() {
                    tokens.push(std::mem::take(&mut word));
                }
            }
            c => word.push(c),
        }
    }
    if !word.is_empty() {
        tokens.push(word);
    }
    tokens
}

fn is_kw(token: &str, keyword: &str) -> bool {
    token.eq_ignore_ascii_case(keyword)
}

fn parse_op(token: &str) -> Option<Op> {
    match token {
        "=" | "==" => Some(Op::Eq),
        "!=" => Some(Op::Ne),
        "<" => Some(Op::Lt),
        "<=" => Some(Op::Le),
        ">" => Some(Op::Gt),
        ">=" => Some(Op::Ge),
        _ => None,
    }
}

fn parse_type(token: &str) -> Option<AttrType> {
    if is_kw(token, "NUM") || is_kw(token, "NUMBER") {
        Some(AttrType::Number)
    } else if is_kw(token, "STR") || is_kw(token, "STRING") {
        Some(AttrType::String)
    } else {
        None
    }
}

/// Split a `rel.attr` token into its two halves.
fn parse_qualified(token: &str) -> std::result::Result<(String, String), String> {
    let mut parts = token.splitn(2, '.');
    match (parts.next(), parts.next()) {
        (Some(rel), Some(attr)) if !rel.is_empty() && !attr.is_empty() => {
            Ok((rel.to_string(), attr.to_string()))
        }
        _ => Err(format!("expected rel.attr, got '{}'", token)),
    }
}

/// Parse one statement. Returns a description of what went wrong on a
/// malformed line.
pub fn parse(line: &str) -> std::result::Result<Command, String> {
    let tokens = tokenize(line);
    if tokens.is_empty() {
        return Err("empty statement".to_string());
    }
    let t: Vec<&str> = tokens.iter().map(|s| s.as_str()).collect();

    if is_kw(t[0], "EXIT") || is_kw(t[0], "QUIT") {
        return Ok(Command::Exit);
    }
    if is_kw(t[0], "HELP") {
        return Ok(Command::Help);
    }

    if is_kw(t[0], "CREATE") && t.len() > 1 && is_kw(t[1], "TABLE") {
        return parse_create_table(&t);
    }
    if is_kw(t[0], "DROP") && t.len() > 1 && is_kw(t[1], "TABLE") {
        if t.len() != 3 {
            return Err("usage: DROP TABLE name".to_string());
        }
        return Ok(Command::DropTable {
            rel: t[2].to_string(),
        });
    }
    if is_kw(t[0], "OPEN") && t.len() > 1 && is_kw(t[1], "TABLE") {
        if t.len() != 3 {
            return Err("usage: OPEN TABLE name".to_string());
        }
        return Ok(Command::OpenTable {
            rel: t[2].to_string(),
        });
    }
    if is_kw(t[0], "CLOSE") && t.len() > 1 && is_kw(t[1], "TABLE") {
        if t.len() != 3 {
            return Err("usage: CLOSE TABLE name".to_string());
        }
        return Ok(Command::CloseTable {
            rel: t[2].to_string(),
        });
    }
    if is_kw(t[0], "ALTER") {
        return parse_alter(&t);
    }
    if is_kw(t[0], "CREATE") && t.len() > 1 && is_kw(t[1], "INDEX") {
        // CREATE INDEX ON rel.attr
        if t.len() != 4 || !is_kw(t[2], "ON") {
            return Err("usage: CREATE INDEX ON rel.attr".to_string());
        }
        let (rel, attr) = parse_qualified(t[3])?;
        return Ok(Command::CreateIndex { rel, attr });
    }
    if is_kw(t[0], "DROP") && t.len() > 1 && is_kw(t[1], "INDEX") {
        if t.len() != 4 || !is_kw(t[2], "ON") {
            return Err("usage: DROP INDEX ON rel.attr".to_string());
        }
        let (rel, attr) = parse_qualified(t[3])?;
        return Ok(Command::DropIndex { rel, attr });
    }
    if is_kw(t[0], "INSERT") {
        return parse_insert(&t);
    }
    if is_kw(t[0], "SELECT") {
        return parse_select(&t);
    }

    Err(format!("unrecognized statement '{}'", t[0]))
}

/// CREATE TABLE name(attr TYPE, attr TYPE, ...)
fn parse_create_table(t: &[&str]) -> std::result::Result<Command, String> {
    if t.len() < 7 || t[3] != "(" || t[t.len() - 1] != ")" {
        return Err("usage: CREATE TABLE name(a NUM, b STR, ...)".to_string());
    }
    let rel = t[2].to_string();

    let mut attrs = Vec::new();
    let inner = &t[4..t.len() - 1];
    for group in inner.split(|&tok| tok == ",") {
        match group {
            &[name, ty] => match parse_type(ty) {
                Some(attr_type) => attrs.push((name.to_string(), attr_type)),
                None => return Err(format!("unknown attribute type '{}'", ty)),
            },
            _ => return Err("each attribute must be 'name TYPE'".to_string()),
        }
    }
    Ok(Command::CreateTable { rel, attrs })
}

/// ALTER TABLE RENAME old TO new
/// ALTER TABLE RENAME COLUMN rel old TO new
fn parse_alter(t: &[&str]) -> std::result::Result<Command, String> {
    if t.len() >= 2 && is_kw(t[1], "TABLE") && t.len() >= 3 && is_kw(t[2], "RENAME") {
        if t.len() == 6 && is_kw(t[4], "TO") {
            return Ok(Command::RenameTable {
                from: t[3].to_string(),
                to: t[5].to_string(),
            });
        }
        if t.len() == 8 && is_kw(t[3], "COLUMN") && is_kw(t[6], "TO") {
            return Ok(Command::RenameColumn {
                rel: t[4].to_string(),
                from: t[5].to_string(),
                to: t[7].to_string(),
            });
        }
    }
    Err("usage: ALTER TABLE RENAME old TO new | ALTER TABLE RENAME COLUMN rel old TO new"
        .to_string())
}

/// INSERT INTO rel VALUES (v1, v2, ...)
fn parse_insert(t: &[&str]) -> std::result::Result<Command, String> {
    if t.len() < 7
        || !is_kw(t[1], "INTO")
        || !is_kw(t[3], "VALUES")
        || t[4] != "("
        || t[t.len() - 1] != ")"
    {
        return Err("usage: INSERT INTO rel VALUES (v1, v2, ...)".to_string());
    }
    let rel = t[2].to_string();

    let mut values = Vec::new();
    let inner = &t[5..t.len() - 1];
    for group in inner.split(|&tok| tok == ",") {
        match group {
            &[value] => values.push(value.to_string()),
            _ => return Err("each value must be a single token".to_string()),
        }
    }
    Ok(Command::Insert { rel, values })
}

/// SELECT */attrs FROM src [JOIN src2] [INTO tgt] [WHERE pred]
fn parse_select(t: &[&str]) -> std::result::Result<Command, String> {
    // Locate FROM.
    let from_pos = match t.iter().position(|tok| is_kw(tok, "FROM")) {
        Some(pos) if pos > 1 => pos,
        _ => return Err("usage: SELECT */attrs FROM rel ...".to_string()),
    };

    // Projection list.
    let attrs = if from_pos == 2 && t[1] == "*" {
        None
    } else {
        let mut list = Vec::new();
        for group in t[1..from_pos].split(|&tok| tok == ",") {
            match group {
                &[name] if name != "*" => list.push(name.to_string()),
                _ => return Err("projection must be * or a comma-separated list".to_string()),
            }
        }
        Some(list)
    };

    let mut rest = &t[from_pos + 1..];
    if rest.is_empty() {
        return Err("missing relation after FROM".to_string());
    }
    let src = rest[0].to_string();
    rest = &rest[1..];

    // Optional JOIN.
    let mut join_src = None;
    if !rest.is_empty() && is_kw(rest[0], "JOIN") {
        if rest.len() < 2 {
            return Err("missing relation after JOIN".to_string());
        }
        join_src = Some(rest[1].to_string());
        rest = &rest[2..];
    }

    // Optional INTO.
    let mut target = None;
    if !rest.is_empty() && is_kw(rest[0], "INTO") {
        if rest.len() < 2 {
            return Err("missing relation after INTO".to_string());
        }
        target = Some(rest[1].to_string());
        rest = &rest[2..];
    }

    // Optional WHERE.
    let mut predicate = None;
    if !rest.is_empty() {
        if !is_kw(rest[0], "WHERE") || rest.len() != 4 {
            return Err("usage: ... WHERE attr op value".to_string());
        }
        let op = match parse_op(rest[2]) {
            Some(op) => op,
            None => return Err(format!("unknown operator '{}'", rest[2])),
        };
        predicate = Some((rest[1].to_string(), op, rest[3].to_string()));
        rest = &rest[4..];
    }
    debug_assert!(rest.is_empty());

    match join_src {
        None => Ok(Command::Select {
            src,
            target,
            attrs,
            predicate,
        }),
        Some(src2) => {
            // A join's predicate must be rel1.attr = rel2.attr.
            let (attr_token1, op, attr_token2) = match predicate {
                Some(p) => p,
                None => return Err("a JOIN needs WHERE r1.a = r2.b".to_string()),
            };
            if op != Op::Eq || attrs.is_some() {
                return Err("joins support only SELECT * ... WHERE r1.a = r2.b".to_string());
            }
            let (rel1, attr1) = parse_qualified(&attr_token1)?;
            let (rel2, attr2) = parse_qualified(&attr_token2)?;
            if rel1 != src || rel2 != src2 {
                return Err("join predicate must name the joined relations".to_string());
            }
            Ok(Command::Join {
                src1: src,
                src2,
                target,
                attr1,
                attr2,
            })
        }
    }
}

/// Execute a parsed command against the engine.
pub fn execute(engine: &mut Engine, command: Command) -> Result<Output> {
    match command {
        Command::CreateTable { rel, attrs } => {
            engine.create_table(&rel, &attrs)?;
            Ok(Output::Done)
        }
        Command::DropTable { rel } => {
            engine.drop_table(&rel)?;
            Ok(Output::Done)
        }
        Command::OpenTable { rel } => {
            engine.open_table(&rel)?;
            Ok(Output::Done)
        }
        Command::CloseTable { rel } => {
            engine.close_table(&rel)?;
            Ok(Output::Done)
        }
        Command::RenameTable { from, to } => {
            engine.rename_table(&from, &to)?;
            Ok(Output::Done)
        }
        Command::RenameColumn { rel, from, to } => {
            engine.rename_column(&rel, &from, &to)?;
            Ok(Output::Done)
        }
        Command::CreateIndex { rel, attr } => {
            engine.create_index(&rel, &attr)?;
            Ok(Output::Done)
        }
        Command::DropIndex { rel, attr } => {
            engine.drop_index(&rel, &attr)?;
            Ok(Output::Done)
        }
        Command::Insert { rel, values } => {
            engine.insert_into(&rel, &values)?;
            Ok(Output::Done)
        }
        Command::Select {
            src,
            target,
            attrs,
            predicate,
        } => run_select(engine, &src, target, attrs, predicate),
        Command::Join {
            src1,
            src2,
            target,
            attr1,
            attr2,
        } => run_join(engine, &src1, &src2, target, &attr1, &attr2),
        Command::Help => Ok(Output::Help),
        Command::Exit => Ok(Output::Done),
    }
}

/// Materialize a select into the target, or print it through the scratch
/// relation when no target was given.
fn run_select(
    engine: &mut Engine,
    src: &str,
    target: Option<String>,
    attrs: Option<Vec<String>>,
    predicate: Option<(String, Op, String)>,
) -> Result<Output> {
    if let Some(target) = target {
        materialize_select(engine, src, &target, attrs, predicate)?;
        return Ok(Output::Done);
    }

    // A bare full scan prints the open relation directly.
    if attrs.is_none() && predicate.is_none() {
        let header = header_of(engine, src)?;
        let rows = engine.rows(src)?;
        return Ok(Output::Table { header, rows });
    }

    materialize_select(engine, src, TEMP_REL, attrs, predicate)?;
    print_and_drop_temp(engine)
}

fn run_join(
    engine: &mut Engine,
    src1: &str,
    src2: &str,
    target: Option<String>,
    attr1: &str,
    attr2: &str,
) -> Result<Output> {
    match target {
        Some(target) => {
            engine.join(src1, src2, &target, attr1, attr2)?;
            Ok(Output::Done)
        }
        None => {
            engine.join(src1, src2, TEMP_REL, attr1, attr2)?;
            print_and_drop_temp(engine)
        }
    }
}

fn materialize_select(
    engine: &mut Engine,
    src: &str,
    target: &str,
    attrs: Option<Vec<String>>,
    predicate: Option<(String, Op, String)>,
) -> Result<()> {
    match (attrs, predicate) {
        (None, None) => engine.project_all(src, target),
        (None, Some((attr, op, value))) => engine.select(src, target, &attr, op, &value),
        (Some(attrs), None) => engine.project(src, target, &attrs),
        (Some(attrs), Some((attr, op, value))) => {
            // Select the matching records first, then project the requested
            // attributes out of the intermediate result.
            engine.select(src, TEMP_SELECT_REL, &attr, op, &value)?;
            engine.open_table(TEMP_SELECT_REL)?;
            let result = engine.project(TEMP_SELECT_REL, target, &attrs);
            let _ = engine.close_table(TEMP_SELECT_REL);
            let _ = engine.drop_table(TEMP_SELECT_REL);
            result
        }
    }
}

/// Open the scratch relation, collect its rows, and drop it.
fn print_and_drop_temp(engine: &mut Engine) -> Result<Output> {
    engine.open_table(TEMP_REL)?;
    let header = header_of(engine, TEMP_REL)?;
    let rows = engine.rows(TEMP_REL);
    let _ = engine.close_table(TEMP_REL);
    let _ = engine.drop_table(TEMP_REL);
    Ok(Output::Table {
        header,
        rows: rows?,
    })
}

fn header_of(engine: &mut Engine, rel: &str) -> Result<Vec<String>> {
    Ok(engine
        .table_schema(rel)?
        .into_iter()
        .map(|(name, _)| name)
        .collect())
}

/// Render an attribute value the way the shell prints it: numbers lose a
/// trailing ".0", strings print as-is.
pub fn format_value(value: &AttrValue) -> String {
    match value {
        AttrValue::Number(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        AttrValue::String(s) => s.clone(),
    }
}

pub const HELP_TEXT: &str = "\
commands:
  CREATE TABLE name(a NUM, b STR, ...)
  DROP TABLE name | OPEN TABLE name | CLOSE TABLE name
  ALTER TABLE RENAME old TO new
  ALTER TABLE RENAME COLUMN rel old TO new
  CREATE INDEX ON rel.attr | DROP INDEX ON rel.attr
  INSERT INTO rel VALUES (v1, v2, ...)
  SELECT * FROM rel [INTO tgt] [WHERE attr op value]
  SELECT a1, a2 FROM rel [INTO tgt] [WHERE attr op value]
  SELECT * FROM r1 JOIN r2 [INTO tgt] WHERE r1.a = r2.b
  EXIT";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_create_table() {
        let cmd = parse("CREATE TABLE Students(id NUM, name STR);").unwrap();
        assert_eq!(
            cmd,
            Command::CreateTable {
                rel: "Students".to_string(),
                attrs: vec![
                    ("id".to_string(), AttrType::Number),
                    ("name".to_string(), AttrType::String),
                ],
            }
        );
    }

    #[test]
    fn test_parse_insert() {
        let cmd = parse("INSERT INTO Students VALUES (1, alice)").unwrap();
        assert_eq!(
            cmd,
            Command::Insert {
                rel: "Students".to_string(),
                values: vec!["1".to_string(), "alice".to_string()],
            }
        );
    }

    #[test]
    fn test_parse_select_variants() {
        assert_eq!(
            parse("SELECT * FROM T").unwrap(),
            Command::Select {
                src: "T".to_string(),
                target: None,
                attrs: None,
                predicate: None,
            }
        );

        assert_eq!(
            parse("SELECT * FROM T INTO U WHERE a >= 5").unwrap(),
            Command::Select {
                src: "T".to_string(),
                target: Some("U".to_string()),
                attrs: None,
                predicate: Some(("a".to_string(), Op::Ge, "5".to_string())),
            }
        );

        assert_eq!(
            parse("SELECT a, b FROM T").unwrap(),
            Command::Select {
                src: "T".to_string(),
                target: None,
                attrs: Some(vec!["a".to_string(), "b".to_string()]),
                predicate: None,
            }
        );
    }

    #[test]
    fn test_parse_join() {
        assert_eq!(
            parse("SELECT * FROM T1 JOIN T2 INTO J WHERE T1.k = T2.k").unwrap(),
            Command::Join {
                src1: "T1".to_string(),
                src2: "T2".to_string(),
                target: Some("J".to_string()),
                attr1: "k".to_string(),
                attr2: "k".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_alter() {
        assert_eq!(
            parse("ALTER TABLE RENAME T TO U").unwrap(),
            Command::RenameTable {
                from: "T".to_string(),
                to: "U".to_string(),
            }
        );
        assert_eq!(
            parse("ALTER TABLE RENAME COLUMN T a TO b").unwrap(),
            Command::RenameColumn {
                rel: "T".to_string(),
                from: "a".to_string(),
                to: "b".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_index_commands() {
        assert_eq!(
            parse("CREATE INDEX ON T.a").unwrap(),
            Command::CreateIndex {
                rel: "T".to_string(),
                attr: "a".to_string(),
            }
        );
        assert_eq!(
            parse("DROP INDEX ON T.a").unwrap(),
            Command::DropIndex {
                rel: "T".to_string(),
                attr: "a".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("").is_err());
        assert!(parse("FLY TABLE T").is_err());
        assert!(parse("CREATE TABLE T(a BOOL)").is_err());
        assert!(parse("SELECT FROM T").is_err());
        assert!(parse("SELECT * FROM T1 JOIN T2").is_err());
    }

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(&AttrValue::Number(2.0)), "2");
        assert_eq!(format_value(&AttrValue::Number(2.5)), "2.5");
        assert_eq!(format_value(&AttrValue::String("x".to_string())), "x");
    }
}

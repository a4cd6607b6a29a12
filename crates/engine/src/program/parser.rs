// Program parser - splits program text into blocks and statements
// Statements: watches (~ #t.c), table definitions (#t = [..]), column sets
// (#t.c := expr, #t.c{i} :+= expr), appends (#t += [..]) and locals (x = expr)
// Expressions: literals, #t / #t.c / #t.c{i}, locals, unary - !, and binary
// ^ * / + - comparisons & |

use tabflow_core::Value;

use crate::error::CompileError;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Boolean(bool),
    /// `#t`, `#t.c` or `#t.c{i}`. Without a column name, the first column.
    Column {
        table: String,
        column: Option<String>,
        index: Option<Box<Expr>>,
    },
    Local(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    BinaryOp {
        op: Op,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg, // -
    Not, // !
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Pow, // ^
    Mul,
    Div,
    Add,
    Sub,
    Lt,    // <
    Gt,    // >
    LtEq,  // <=
    GtEq,  // >=
    Eq,    // ==
    NotEq, // !=
    And,   // &
    Or,    // |
}

impl Expr {
    /// Value of a literal (or negated number) expression.
    pub fn constant(&self) -> Option<Value> {
        match self {
            Expr::Number(n) => Some(Value::Number(*n)),
            Expr::Text(s) => Some(Value::Text(s.clone())),
            Expr::Boolean(b) => Some(Value::Bool(*b)),
            Expr::Unary { op: UnaryOp::Neg, operand } => match operand.as_ref() {
                Expr::Number(n) => Some(Value::Number(-n)),
                _ => None,
            },
            _ => None,
        }
    }

    /// Call `f(table, column)` for every table read in this expression.
    pub fn visit_reads(&self, f: &mut impl FnMut(&str, Option<&str>)) {
        match self {
            Expr::Column { table, column, index } => {
                f(table, column.as_deref());
                if let Some(index) = index {
                    index.visit_reads(f);
                }
            }
            Expr::Unary { operand, .. } => operand.visit_reads(f),
            Expr::BinaryOp { left, right, .. } => {
                left.visit_reads(f);
                right.visit_reads(f);
            }
            Expr::Number(_) | Expr::Text(_) | Expr::Boolean(_) | Expr::Local(_) => {}
        }
    }

    /// Call `f(name)` for every local referenced in this expression.
    pub fn visit_locals(&self, f: &mut impl FnMut(&str)) {
        match self {
            Expr::Local(name) => f(name),
            Expr::Column { index: Some(index), .. } => index.visit_locals(f),
            Expr::Unary { operand, .. } => operand.visit_locals(f),
            Expr::BinaryOp { left, right, .. } => {
                left.visit_locals(f);
                right.visit_locals(f);
            }
            _ => {}
        }
    }
}

/// Bracketed table literal: `[a b | 1 2; 3 4]`, `[1 2 3]` or `[a: 1, b: 2]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TableLiteral {
    /// Column names; empty for positional columns.
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Expr>>,
}

impl TableLiteral {
    pub fn width(&self) -> usize {
        if self.columns.is_empty() {
            self.rows.first().map_or(0, Vec::len)
        } else {
            self.columns.len()
        }
    }

    /// All cells as constants, if every cell is a literal.
    pub fn constant_rows(&self) -> Option<Vec<Vec<Value>>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(Expr::constant).collect::<Option<Vec<_>>>())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Assign, // :=
    Add,    // :+=
    Sub,    // :-=
    Mul,    // :*=
    Div,    // :/=
}

#[derive(Debug, Clone, PartialEq)]
pub enum TableValue {
    Literal(TableLiteral),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `~ #t.c` or `~ #t`
    Watch { table: String, column: Option<String> },
    /// `#t = [..]` or `#t = expr`
    Define { table: String, value: TableValue },
    /// `#t.c := expr`, `#t.c{i} :+= expr`, ...
    Set {
        table: String,
        column: String,
        index: Option<Expr>,
        op: SetOp,
        value: Expr,
    },
    /// `#t += [..]`
    Append { table: String, rows: TableLiteral },
    /// `name = expr`
    Local { name: String, value: Expr },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    /// 1-based source line where the statement starts.
    pub number: usize,
    pub statement: Statement,
}

/// One blank-line-separated block of statements.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSource {
    /// Text of a `--` comment directly above the block, if any.
    pub title: Option<String>,
    pub first_line: usize,
    pub lines: Vec<Line>,
}

/// Statement spanning several physical lines (an open `[`).
struct OpenLine {
    start: usize,
    text: String,
    depth: i32,
}

/// Split program text into blocks and parse every statement.
pub fn parse_program(text: &str) -> Result<Vec<BlockSource>, CompileError> {
    let mut blocks = Vec::new();
    let mut current: Option<BlockSource> = None;
    let mut title: Option<String> = None;
    let mut open_line: Option<OpenLine> = None;

    for (i, raw) in text.lines().enumerate() {
        let number = i + 1;
        let line = raw.trim();

        if let Some(mut open) = open_line.take() {
            if !line.is_empty() && !line.starts_with("--") {
                open.text.push('\n');
                open.text.push_str(line);
                open.depth += bracket_depth(line);
            }
            if open.depth > 0 {
                open_line = Some(open);
                continue;
            }
            let statement = parse_statement(&open.text).map_err(|m| CompileError::new(open.start, m))?;
            push_line(&mut current, &mut title, open.start, statement);
            continue;
        }

        if line.is_empty() {
            if let Some(block) = current.take() {
                blocks.push(block);
            }
            title = None;
            continue;
        }

        if let Some(comment) = line.strip_prefix("--") {
            let comment = comment.trim();
            if current.is_none() && title.is_none() && !comment.is_empty() {
                title = Some(comment.to_string());
            }
            continue;
        }

        let depth = bracket_depth(line);
        if depth > 0 {
            open_line = Some(OpenLine { start: number, text: line.to_string(), depth });
            continue;
        }

        let statement = parse_statement(line).map_err(|m| CompileError::new(number, m))?;
        push_line(&mut current, &mut title, number, statement);
    }

    if let Some(open) = open_line {
        return Err(CompileError::new(open.start, "unclosed '['"));
    }
    if let Some(block) = current {
        blocks.push(block);
    }
    Ok(blocks)
}

fn push_line(current: &mut Option<BlockSource>, title: &mut Option<String>, number: usize, statement: Statement) {
    current
        .get_or_insert_with(|| BlockSource { title: title.take(), first_line: number, lines: Vec::new() })
        .lines
        .push(Line { number, statement });
}

/// Net count of `[` over `]`, ignoring string literals.
fn bracket_depth(line: &str) -> i32 {
    let mut depth = 0;
    let mut in_string = false;
    let mut escaped = false;
    for c in line.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => depth -= 1,
            _ => {}
        }
    }
    depth
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    StringLit(String),
    /// `#name`, name without the `#`
    Table(String),
    Ident(String),
    Dot,
    Tilde,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Pipe,
    Semicolon,
    Comma,
    Colon,
    Newline,
    // Statement operators
    Assign,       // =
    Define,       // :=
    AddAssign,    // :+=
    SubAssign,    // :-=
    MulAssign,    // :*=
    DivAssign,    // :/=
    AppendAssign, // +=
    // Expression operators
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    Lt,
    Gt,
    LtEq,
    GtEq,
    EqEq,
    NotEq,
    Bang,
    Amp,
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            ' ' | '\t' | '\r' => { i += 1; }
            '\n' => { tokens.push(Token::Newline); i += 1; }
            '~' => { tokens.push(Token::Tilde); i += 1; }
            '.' => { tokens.push(Token::Dot); i += 1; }
            '{' => { tokens.push(Token::LBrace); i += 1; }
            '}' => { tokens.push(Token::RBrace); i += 1; }
            '[' => { tokens.push(Token::LBracket); i += 1; }
            ']' => { tokens.push(Token::RBracket); i += 1; }
            '(' => { tokens.push(Token::LParen); i += 1; }
            ')' => { tokens.push(Token::RParen); i += 1; }
            '|' => { tokens.push(Token::Pipe); i += 1; }
            ';' => { tokens.push(Token::Semicolon); i += 1; }
            ',' => { tokens.push(Token::Comma); i += 1; }
            '&' => { tokens.push(Token::Amp); i += 1; }
            '^' => { tokens.push(Token::Caret); i += 1; }
            '*' => { tokens.push(Token::Star); i += 1; }
            '/' => { tokens.push(Token::Slash); i += 1; }
            '-' => { tokens.push(Token::Minus); i += 1; }
            ':' => {
                let after = chars.get(i + 2).copied();
                let (token, len) = match (next, after) {
                    (Some('='), _) => (Token::Define, 2),
                    (Some('+'), Some('=')) => (Token::AddAssign, 3),
                    (Some('-'), Some('=')) => (Token::SubAssign, 3),
                    (Some('*'), Some('=')) => (Token::MulAssign, 3),
                    (Some('/'), Some('=')) => (Token::DivAssign, 3),
                    _ => (Token::Colon, 1),
                };
                tokens.push(token);
                i += len;
            }
            '+' => {
                if next == Some('=') {
                    tokens.push(Token::AppendAssign);
                    i += 2;
                } else {
                    tokens.push(Token::Plus);
                    i += 1;
                }
            }
            '=' => {
                if next == Some('=') {
                    tokens.push(Token::EqEq);
                    i += 2;
                } else {
                    tokens.push(Token::Assign);
                    i += 1;
                }
            }
            '!' => {
                if next == Some('=') {
                    tokens.push(Token::NotEq);
                    i += 2;
                } else {
                    tokens.push(Token::Bang);
                    i += 1;
                }
            }
            '<' | '>' => {
                let or_equal = next == Some('=');
                tokens.push(match (c, or_equal) {
                    ('<', true) => Token::LtEq,
                    ('<', false) => Token::Lt,
                    (_, true) => Token::GtEq,
                    (_, false) => Token::Gt,
                });
                i += if or_equal { 2 } else { 1 };
            }
            '"' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".to_string()),
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            match chars.get(i + 1) {
                                Some('n') => s.push('\n'),
                                Some('t') => s.push('\t'),
                                Some(&escaped) => s.push(escaped),
                                None => return Err("unterminated string literal".to_string()),
                            }
                            i += 2;
                        }
                        Some(&ch) => {
                            s.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::StringLit(s));
            }
            '#' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (is_name_char(chars[end]) || chars[end] == '/') {
                    end += 1;
                }
                if end == start {
                    return Err("expected a table name after '#'".to_string());
                }
                tokens.push(Token::Table(chars[start..end].iter().collect()));
                i = end;
            }
            _ if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                // Fraction only if a digit follows the dot; `#t.1` stays a column.
                if i + 1 < chars.len() && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n = text.parse::<f64>().map_err(|_| format!("invalid number '{}'", text))?;
                tokens.push(Token::Number(n));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            _ => return Err(format!("unexpected character '{}'", c)),
        }
    }

    Ok(tokens)
}

/// Parse one (possibly multi-line) statement.
fn parse_statement(text: &str) -> Result<Statement, String> {
    let tokens = tokenize(text)?;

    let (statement, pos) = match tokens.first() {
        Some(Token::Tilde) => parse_watch(&tokens, 1)?,
        Some(Token::Table(table)) => parse_table_statement(&tokens, table.clone())?,
        Some(Token::Ident(name)) if tokens.get(1) == Some(&Token::Assign) => {
            if name == "true" || name == "false" {
                return Err(format!("'{}' cannot be used as a local name", name));
            }
            let (value, pos) = parse_or(&tokens, 2)?;
            (Statement::Local { name: name.clone(), value }, pos)
        }
        Some(other) => return Err(format!("expected a statement, found {:?}", other)),
        None => return Err("empty statement".to_string()),
    };

    if pos < tokens.len() {
        return Err(format!("unexpected {:?} after statement", tokens[pos]));
    }
    Ok(statement)
}

fn parse_watch(tokens: &[Token], pos: usize) -> Result<(Statement, usize), String> {
    let Some(Token::Table(table)) = tokens.get(pos) else {
        return Err("expected '#table' or '#table.column' after '~'".to_string());
    };
    if tokens.get(pos + 1) == Some(&Token::Dot) {
        let (column, pos) = parse_column_name(tokens, pos + 2)?;
        return Ok((Statement::Watch { table: table.clone(), column: Some(column) }, pos));
    }
    Ok((Statement::Watch { table: table.clone(), column: None }, pos + 1))
}

fn parse_table_statement(tokens: &[Token], table: String) -> Result<(Statement, usize), String> {
    match tokens.get(1) {
        Some(Token::Assign) => {
            if tokens.get(2) == Some(&Token::LBracket) {
                let (literal, pos) = parse_literal(tokens, 2)?;
                Ok((Statement::Define { table, value: TableValue::Literal(literal) }, pos))
            } else {
                let (value, pos) = parse_or(tokens, 2)?;
                Ok((Statement::Define { table, value: TableValue::Expr(value) }, pos))
            }
        }
        Some(Token::AppendAssign) => {
            if tokens.get(2) != Some(&Token::LBracket) {
                return Err(format!("expected '[' after '#{} +='", table));
            }
            let (rows, pos) = parse_literal(tokens, 2)?;
            Ok((Statement::Append { table, rows }, pos))
        }
        Some(Token::Dot) => {
            let (column, mut pos) = parse_column_name(tokens, 2)?;
            let mut index = None;
            if tokens.get(pos) == Some(&Token::LBrace) {
                let (expr, p) = parse_index(tokens, pos)?;
                index = Some(expr);
                pos = p;
            }
            let op = match tokens.get(pos) {
                Some(Token::Define) => SetOp::Assign,
                Some(Token::AddAssign) => SetOp::Add,
                Some(Token::SubAssign) => SetOp::Sub,
                Some(Token::MulAssign) => SetOp::Mul,
                Some(Token::DivAssign) => SetOp::Div,
                Some(Token::Assign) => {
                    return Err(format!("use ':=' to set column #{}.{}", table, column));
                }
                other => return Err(format!("expected ':=' after #{}.{}, found {:?}", table, column, other)),
            };
            let (value, pos) = parse_or(tokens, pos + 1)?;
            Ok((Statement::Set { table, column, index, op, value }, pos))
        }
        other => Err(format!("expected '=', '+=' or '.column' after #{}, found {:?}", table, other)),
    }
}

/// Column name after a `.`: an identifier or a 1-based position.
fn parse_column_name(tokens: &[Token], pos: usize) -> Result<(String, usize), String> {
    match tokens.get(pos) {
        Some(Token::Ident(name)) => Ok((name.clone(), pos + 1)),
        Some(Token::Number(n)) if *n >= 1.0 && n.fract() == 0.0 => Ok((format!("{}", *n as u64), pos + 1)),
        other => Err(format!("expected a column name, found {:?}", other)),
    }
}

/// `{expr}`
fn parse_index(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (expr, pos) = parse_or(tokens, pos + 1)?;
    if tokens.get(pos) != Some(&Token::RBrace) {
        return Err("expected '}' to close index".to_string());
    }
    Ok((expr, pos + 1))
}

/// `[...]` starting at the `[` token.
fn parse_literal(tokens: &[Token], pos: usize) -> Result<(TableLiteral, usize), String> {
    let mut pos = pos + 1;
    while tokens.get(pos) == Some(&Token::Newline) {
        pos += 1;
    }

    // Record form: [a: 1, b: 2]
    if matches!(tokens.get(pos), Some(Token::Ident(_))) && tokens.get(pos + 1) == Some(&Token::Colon) {
        let mut columns = Vec::new();
        let mut row = Vec::new();
        loop {
            match tokens.get(pos) {
                Some(Token::RBracket) => {
                    pos += 1;
                    break;
                }
                Some(Token::Comma) | Some(Token::Newline) => pos += 1,
                Some(Token::Ident(name)) if tokens.get(pos + 1) == Some(&Token::Colon) => {
                    if columns.contains(name) {
                        return Err(format!("duplicate column '{}'", name));
                    }
                    columns.push(name.clone());
                    let (cell, p) = parse_unary(tokens, pos + 2)?;
                    row.push(cell);
                    pos = p;
                }
                Some(other) => return Err(format!("expected 'name: value' in record, found {:?}", other)),
                None => return Err("unclosed '['".to_string()),
            }
        }
        return Ok((TableLiteral { columns, rows: vec![row] }, pos));
    }

    // Header form: [a b | ...]
    let mut columns = Vec::new();
    let mut p = pos;
    let mut names = Vec::new();
    while let Some(token) = tokens.get(p) {
        match token {
            Token::Ident(name) if name != "true" && name != "false" => names.push(name.clone()),
            Token::Newline => {}
            _ => break,
        }
        p += 1;
    }
    if tokens.get(p) == Some(&Token::Pipe) {
        for name in &names {
            if columns.contains(name) {
                return Err(format!("duplicate column '{}'", name));
            }
            columns.push(name.clone());
        }
        pos = p + 1;
    }

    let mut rows: Vec<Vec<Expr>> = Vec::new();
    let mut row = Vec::new();
    loop {
        match tokens.get(pos) {
            None => return Err("unclosed '['".to_string()),
            Some(Token::RBracket) => {
                pos += 1;
                break;
            }
            Some(Token::Semicolon) | Some(Token::Newline) => {
                pos += 1;
                if !row.is_empty() {
                    rows.push(std::mem::take(&mut row));
                }
            }
            Some(Token::Comma) => pos += 1,
            Some(_) => {
                let (cell, p) = parse_unary(tokens, pos)?;
                row.push(cell);
                pos = p;
            }
        }
    }
    if !row.is_empty() {
        rows.push(row);
    }

    let literal = TableLiteral { columns, rows };
    let width = literal.width();
    for (i, row) in literal.rows.iter().enumerate() {
        if row.len() != width {
            return Err(format!("row {} has {} value(s), expected {}", i + 1, row.len(), width));
        }
    }
    Ok((literal, pos))
}

// Lowest precedence: logical or (|)
fn parse_or(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_and(tokens, pos)?;

    while let Some(Token::Pipe) = tokens.get(pos) {
        let (right, new_pos) = parse_and(tokens, pos + 1)?;
        left = Expr::BinaryOp { op: Op::Or, left: Box::new(left), right: Box::new(right) };
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_and(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_comparison(tokens, pos)?;

    while let Some(Token::Amp) = tokens.get(pos) {
        let (right, new_pos) = parse_comparison(tokens, pos + 1)?;
        left = Expr::BinaryOp { op: Op::And, left: Box::new(left), right: Box::new(right) };
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_comparison(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_add_sub(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Lt => Op::Lt,
            Token::Gt => Op::Gt,
            Token::LtEq => Op::LtEq,
            Token::GtEq => Op::GtEq,
            Token::EqEq => Op::Eq,
            Token::NotEq => Op::NotEq,
            _ => break,
        };
        let (right, new_pos) = parse_add_sub(tokens, pos + 1)?;
        left = Expr::BinaryOp { op, left: Box::new(left), right: Box::new(right) };
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_add_sub(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_mul_div(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Plus => Op::Add,
            Token::Minus => Op::Sub,
            _ => break,
        };
        let (right, new_pos) = parse_mul_div(tokens, pos + 1)?;
        left = Expr::BinaryOp { op, left: Box::new(left), right: Box::new(right) };
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_mul_div(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (mut left, mut pos) = parse_unary(tokens, pos)?;

    while pos < tokens.len() {
        let op = match &tokens[pos] {
            Token::Star => Op::Mul,
            Token::Slash => Op::Div,
            _ => break,
        };
        let (right, new_pos) = parse_unary(tokens, pos + 1)?;
        left = Expr::BinaryOp { op, left: Box::new(left), right: Box::new(right) };
        pos = new_pos;
    }

    Ok((left, pos))
}

fn parse_unary(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let op = match tokens.get(pos) {
        Some(Token::Minus) => UnaryOp::Neg,
        Some(Token::Bang) => UnaryOp::Not,
        _ => return parse_power(tokens, pos),
    };
    let (operand, pos) = parse_unary(tokens, pos + 1)?;
    Ok((Expr::Unary { op, operand: Box::new(operand) }, pos))
}

// Exponentiation (^) - right-associative, binds tighter than unary minus
fn parse_power(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let (base, pos) = parse_primary(tokens, pos)?;

    if let Some(Token::Caret) = tokens.get(pos) {
        let (exponent, new_pos) = parse_unary(tokens, pos + 1)?;
        return Ok((
            Expr::BinaryOp { op: Op::Pow, left: Box::new(base), right: Box::new(exponent) },
            new_pos,
        ));
    }

    Ok((base, pos))
}

fn parse_primary(tokens: &[Token], pos: usize) -> Result<(Expr, usize), String> {
    let Some(token) = tokens.get(pos) else {
        return Err("unexpected end of expression".to_string());
    };

    match token {
        Token::Number(n) => Ok((Expr::Number(*n), pos + 1)),
        Token::StringLit(s) => Ok((Expr::Text(s.clone()), pos + 1)),
        Token::Ident(name) => match name.as_str() {
            "true" => Ok((Expr::Boolean(true), pos + 1)),
            "false" => Ok((Expr::Boolean(false), pos + 1)),
            _ => Ok((Expr::Local(name.clone()), pos + 1)),
        },
        Token::Table(table) => {
            let mut pos = pos + 1;
            let mut column = None;
            if tokens.get(pos) == Some(&Token::Dot) {
                let (name, p) = parse_column_name(tokens, pos + 1)?;
                column = Some(name);
                pos = p;
            }
            let mut index = None;
            if tokens.get(pos) == Some(&Token::LBrace) {
                let (expr, p) = parse_index(tokens, pos)?;
                index = Some(Box::new(expr));
                pos = p;
            }
            Ok((Expr::Column { table: table.clone(), column, index }, pos))
        }
        Token::LParen => {
            let (expr, pos) = parse_or(tokens, pos + 1)?;
            if tokens.get(pos) != Some(&Token::RParen) {
                return Err("expected ')'".to_string());
            }
            Ok((expr, pos + 1))
        }
        other => Err(format!("unexpected {:?} in expression", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn statement(text: &str) -> Statement {
        parse_statement(text).unwrap()
    }

    fn expr(text: &str) -> Expr {
        match statement(&format!("x = {}", text)) {
            Statement::Local { value, .. } => value,
            other => panic!("expected local, got {other:?}"),
        }
    }

    fn column(table: &str, name: &str) -> Expr {
        Expr::Column { table: table.into(), column: Some(name.into()), index: None }
    }

    #[test]
    fn test_watch_lines() {
        assert_eq!(
            statement("~ #system/timer.tick"),
            Statement::Watch { table: "system/timer".into(), column: Some("tick".into()) }
        );
        assert_eq!(statement("~ #ball"), Statement::Watch { table: "ball".into(), column: None });
    }

    #[test]
    fn test_header_literal() {
        let Statement::Define { table, value: TableValue::Literal(lit) } = statement("#ball = [x y | 1 2; 3 -4]") else {
            panic!("expected literal define");
        };
        assert_eq!(table, "ball");
        assert_eq!(lit.columns, vec!["x", "y"]);
        assert_eq!(
            lit.constant_rows().unwrap(),
            vec![
                vec![Value::Number(1.0), Value::Number(2.0)],
                vec![Value::Number(3.0), Value::Number(-4.0)],
            ]
        );
    }

    #[test]
    fn test_positional_and_record_literals() {
        let Statement::Define { value: TableValue::Literal(lit), .. } = statement("#t = [1 2 3]") else {
            panic!("expected literal define");
        };
        assert!(lit.columns.is_empty());
        assert_eq!(lit.width(), 3);
        assert_eq!(lit.rows.len(), 1);

        let Statement::Define { value: TableValue::Literal(lit), .. } =
            statement("#system/timer = [resolution: 15, tick: 0]")
        else {
            panic!("expected literal define");
        };
        assert_eq!(lit.columns, vec!["resolution", "tick"]);
        assert_eq!(lit.constant_rows().unwrap()[0], vec![Value::Number(15.0), Value::Number(0.0)]);
    }

    #[test]
    fn test_ragged_literal_rejected() {
        assert!(parse_statement("#t = [a b | 1 2; 3]").is_err());
        assert!(parse_statement("#t = [a b | 1 2 3]").is_err());
    }

    #[test]
    fn test_precedence() {
        // 1 + 2 * 3 ^ 2
        assert_eq!(
            expr("1 + 2 * 3 ^ 2"),
            Expr::BinaryOp {
                op: Op::Add,
                left: Box::new(Expr::Number(1.0)),
                right: Box::new(Expr::BinaryOp {
                    op: Op::Mul,
                    left: Box::new(Expr::Number(2.0)),
                    right: Box::new(Expr::BinaryOp {
                        op: Op::Pow,
                        left: Box::new(Expr::Number(3.0)),
                        right: Box::new(Expr::Number(2.0)),
                    }),
                }),
            }
        );

        // a > 1 & b | c
        let Expr::BinaryOp { op: Op::Or, left, .. } = expr("a > 1 & b | c") else {
            panic!("| should bind loosest");
        };
        assert!(matches!(*left, Expr::BinaryOp { op: Op::And, .. }));
    }

    #[test]
    fn test_power_is_right_associative() {
        let Expr::BinaryOp { op: Op::Pow, right, .. } = expr("2 ^ 3 ^ 2") else {
            panic!("expected power");
        };
        assert!(matches!(*right, Expr::BinaryOp { op: Op::Pow, .. }));
    }

    #[test]
    fn test_set_statements() {
        assert_eq!(
            statement("#ball.x := #ball.x + #ball.vx"),
            Statement::Set {
                table: "ball".into(),
                column: "x".into(),
                index: None,
                op: SetOp::Assign,
                value: Expr::BinaryOp {
                    op: Op::Add,
                    left: Box::new(column("ball", "x")),
                    right: Box::new(column("ball", "vx")),
                },
            }
        );

        let Statement::Set { index, op, .. } = statement("#ball.y{iy} :-= 1") else {
            panic!("expected set");
        };
        assert_eq!(index, Some(Expr::Local("iy".into())));
        assert_eq!(op, SetOp::Sub);
    }

    #[test]
    fn test_positional_column_name() {
        assert_eq!(
            expr("#vx.1"),
            Expr::Column { table: "vx".into(), column: Some("1".into()), index: None }
        );
        assert_eq!(expr("1.5"), Expr::Number(1.5));
    }

    #[test]
    fn test_set_requires_colon_equals() {
        let err = parse_statement("#t.x = 1").unwrap_err();
        assert!(err.contains(":="));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(expr(r#""a\"b""#), Expr::Text("a\"b".into()));
        assert!(parse_statement("x = \"open").is_err());
    }

    #[test]
    fn test_program_blocks_and_titles() {
        let text = "\
-- Environment
#ball = [x y |
         0 0
         5 5]
#gravity = 2

-- Move
~ #system/timer.tick
#ball.x := #ball.x + 1
";
        let blocks = parse_program(text).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].title.as_deref(), Some("Environment"));
        assert_eq!(blocks[0].first_line, 2);
        assert_eq!(blocks[0].lines.len(), 2);
        assert_eq!(blocks[0].lines[1].number, 5);

        let Statement::Define { value: TableValue::Literal(lit), .. } = &blocks[0].lines[0].statement else {
            panic!("expected literal");
        };
        assert_eq!(lit.rows.len(), 2);

        assert_eq!(blocks[1].title.as_deref(), Some("Move"));
        assert_eq!(blocks[1].lines.len(), 2);
    }

    #[test]
    fn test_program_error_has_line() {
        let err = parse_program("#a = [1]\n\n#b.x := (1 +").unwrap_err();
        assert_eq!(err.line, 3);

        let err = parse_program("#a = [1\n 2").unwrap_err();
        assert_eq!(err.line, 1);
    }
}

// crates/ledger-bridge-core/src/query.rs
// ============================================================================
// Module: Query Validator
// Description: Static checks of ad-hoc SELECT queries against a schema.
// Purpose: Reject bad tables and fields with actionable hints before dispatch.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Clients (often language models) write ad-hoc queries with guessed names:
//! `payeeName` instead of the join path `payee.name`, `entrie` instead of a
//! real table. [`validate_query`] tokenizes a query, requires a
//! `SELECT … FROM <table>` shape, collects every referenced field from the
//! select list and the `WHERE`, `GROUP BY`, `HAVING`, and `ORDER BY` clauses,
//! and checks each against a [`QuerySchema`]. Failures carry the offending
//! token, the reason, and a suggested correction when one is unambiguous.
//!
//! Validation is pure and never touches the engine.
//!
//! ## Invariants
//! - Function names and select-list aliases are never treated as fields.
//! - A suggestion is offered only when exactly one rename candidate exists.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::schema::MAX_JOIN_DEPTH;
use crate::schema::QuerySchema;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted query length in bytes.
pub const MAX_QUERY_LENGTH: usize = 8 * 1024;
/// Maximum edit distance for a table name suggestion.
const MAX_TABLE_EDIT_DISTANCE: usize = 2;
/// Keywords that open a clause after the `FROM` table.
const CLAUSE_KEYWORDS: [&str; 6] = ["WHERE", "GROUP", "HAVING", "ORDER", "LIMIT", "OFFSET"];
/// Keywords that introduce an explicit join.
const JOIN_KEYWORDS: [&str; 8] =
    ["JOIN", "INNER", "LEFT", "RIGHT", "FULL", "CROSS", "OUTER", "NATURAL"];
/// Keywords that are never field references.
const RESERVED_WORDS: [&str; 34] = [
    "SELECT", "FROM", "AS", "AND", "OR", "NOT", "IN", "IS", "NULL", "LIKE", "ILIKE", "GLOB",
    "BETWEEN", "ASC", "DESC", "DISTINCT", "ALL", "CASE", "WHEN", "THEN", "ELSE", "END", "TRUE",
    "FALSE", "BY", "EXISTS", "NULLS", "FIRST", "LAST", "ESCAPE", "INTEGER", "TEXT", "REAL",
    "NUMERIC",
];

// ============================================================================
// SECTION: Diagnostics
// ============================================================================

/// Category of a validation diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Unknown table.
    Table,
    /// Unknown field or join path.
    Field,
    /// Query shape could not be understood.
    Syntax,
}

/// One validation problem found in a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Offending token as written in the query.
    pub token: String,
    /// Problem category.
    pub kind: DiagnosticKind,
    /// Human-readable reason.
    pub reason: String,
    /// Suggested replacement for the token, when unambiguous.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl Diagnostic {
    /// Creates a syntax diagnostic.
    fn syntax(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            kind: DiagnosticKind::Syntax,
            reason: reason.into(),
            suggestion: None,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason)?;
        if let Some(suggestion) = &self.suggestion {
            write!(f, " (did you mean `{suggestion}`?)")?;
        }
        Ok(())
    }
}

/// Outcome of validating a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True when the query passed every check.
    pub valid: bool,
    /// Problems in order of appearance.
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Builds a result from collected diagnostics.
    fn from_diagnostics(diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            valid: diagnostics.is_empty(),
            diagnostics,
        }
    }
}

// ============================================================================
// SECTION: Parsed Query
// ============================================================================

/// Plain field selected by the query, with its output name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectColumn {
    /// Field path with any table qualifier removed.
    pub field: String,
    /// Output column name (alias or field path).
    pub output: String,
}

/// Structural summary of a `SELECT` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    /// Table named in the `FROM` clause.
    pub table: String,
    /// Table alias, when given.
    pub alias: Option<String>,
    /// True when the select list contains `*` or `<table>.*`.
    pub select_all: bool,
    /// Plain field columns of the select list, in order.
    pub columns: Vec<SelectColumn>,
    /// Every referenced field path, qualifier removed, first occurrence order.
    pub fields: Vec<String>,
    /// `LIMIT` value, when given.
    pub limit: Option<usize>,
    /// `OFFSET` value, when given.
    pub offset: Option<usize>,
}

// ============================================================================
// SECTION: Validation
// ============================================================================

/// Validates `query` against `schema`.
#[must_use]
pub fn validate_query(query: &str, schema: &QuerySchema) -> ValidationResult {
    let parsed = match parse_query(query) {
        Ok(parsed) => parsed,
        Err(diagnostic) => return ValidationResult::from_diagnostics(vec![diagnostic]),
    };
    let Some(table) = schema.table(&parsed.table) else {
        return ValidationResult::from_diagnostics(vec![unknown_table(&parsed.table, schema)]);
    };
    let mut diagnostics = Vec::new();
    for field in &parsed.fields {
        if !schema.resolves(&parsed.table, field) {
            diagnostics.push(unknown_field(schema, &parsed.table, table.fields(), field));
        }
    }
    ValidationResult::from_diagnostics(diagnostics)
}

/// Builds the diagnostic for an unknown table.
fn unknown_table(name: &str, schema: &QuerySchema) -> Diagnostic {
    let tables = schema.table_names();
    let lowered = name.to_lowercase();
    let case_matches: Vec<&str> =
        tables.iter().copied().filter(|table| table.to_lowercase() == lowered).collect();
    let suggestion = if case_matches.len() == 1 {
        case_matches.first().map(ToString::to_string)
    } else {
        closest_unique(name, &tables)
    };
    Diagnostic {
        token: name.to_string(),
        kind: DiagnosticKind::Table,
        reason: format!(
            "table `{name}` not found; available tables are: {}",
            tables.join(", ")
        ),
        suggestion,
    }
}

/// Builds the diagnostic for a field that does not resolve.
fn unknown_field<'a>(
    schema: &QuerySchema,
    table: &str,
    fields: impl Iterator<Item = &'a str>,
    field: &str,
) -> Diagnostic {
    if let Some(target) =
        schema.table(table).and_then(|table_schema| table_schema.alias_target(field))
    {
        return Diagnostic {
            token: field.to_string(),
            kind: DiagnosticKind::Field,
            reason: format!("field `{field}` not found in table `{table}`"),
            suggestion: Some(target.to_string()),
        };
    }
    let words: Vec<String> = field.split('.').flat_map(split_words).collect();
    let candidates = resolve_words(schema, table, &words, 0);
    if candidates.len() == 1 {
        return Diagnostic {
            token: field.to_string(),
            kind: DiagnosticKind::Field,
            reason: format!("field `{field}` not found in table `{table}`"),
            suggestion: candidates.into_iter().next(),
        };
    }
    let reason = if field.contains('.') {
        describe_broken_path(schema, table, field)
    } else {
        format!(
            "field `{field}` not found in table `{table}`; available fields are: {}",
            fields.collect::<Vec<_>>().join(", ")
        )
    };
    Diagnostic {
        token: field.to_string(),
        kind: DiagnosticKind::Field,
        reason,
        suggestion: None,
    }
}

/// Explains which segment of a dotted path failed to resolve.
fn describe_broken_path(schema: &QuerySchema, table: &str, path: &str) -> String {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current_name = table;
    for (index, segment) in segments.iter().enumerate() {
        let Some(current) = schema.table(current_name) else {
            break;
        };
        let is_last = index + 1 == segments.len();
        if is_last {
            return format!(
                "field `{segment}` not found in table `{current_name}` (via `{path}`); available \
                 fields are: {}",
                current.fields().collect::<Vec<_>>().join(", ")
            );
        }
        match current.join_target(segment) {
            Some(next) => current_name = next,
            None => {
                let joins: Vec<&str> = current.joins().map(|(join, _)| join).collect();
                let available =
                    if joins.is_empty() { "none".to_string() } else { joins.join(", ") };
                return format!(
                    "`{segment}` is not a join path of table `{current_name}` (in `{path}`); \
                     available join paths are: {available}"
                );
            }
        }
    }
    format!("field path `{path}` does not resolve from table `{table}`")
}

/// Finds field paths of `table` whose normalized words equal `words`.
fn resolve_words(
    schema: &QuerySchema,
    table: &str,
    words: &[String],
    depth: usize,
) -> BTreeSet<String> {
    let mut candidates = BTreeSet::new();
    let Some(table_schema) = schema.table(table) else {
        return candidates;
    };
    if words.is_empty() {
        return candidates;
    }
    let whole = words.concat();
    for field in table_schema.fields() {
        if normalize(field) == whole {
            candidates.insert(field.to_string());
        }
    }
    for (alias, target) in table_schema.aliases() {
        if normalize(alias) == whole {
            candidates.insert(target.to_string());
        }
    }
    if depth >= MAX_JOIN_DEPTH {
        return candidates;
    }
    for split in 1 .. words.len() {
        let (head_words, tail_words) = words.split_at(split);
        let head = head_words.concat();
        for (join, target) in table_schema.joins() {
            if normalize(join) != head {
                continue;
            }
            for rest in resolve_words(schema, target, tail_words, depth + 1) {
                candidates.insert(format!("{join}.{rest}"));
            }
        }
    }
    candidates
}

/// Splits a camelCase or snake_case name into lowercase words.
fn split_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut previous_lower = false;
    for ch in name.chars() {
        if ch == '_' || ch == '-' || ch == ' ' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            previous_lower = false;
            continue;
        }
        if ch.is_uppercase() && previous_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        previous_lower = ch.is_lowercase() || ch.is_ascii_digit();
        current.extend(ch.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

/// Lowercases a name and drops word separators.
fn normalize(name: &str) -> String {
    name.chars().filter(|ch| *ch != '_' && *ch != '-').flat_map(char::to_lowercase).collect()
}

/// Returns the unique option within the edit-distance threshold.
fn closest_unique(target: &str, options: &[&str]) -> Option<String> {
    let target = target.to_lowercase();
    let mut best: Option<&str> = None;
    let mut best_distance = usize::MAX;
    let mut tied = false;
    for option in options {
        let distance = levenshtein(&target, &option.to_lowercase());
        if distance > MAX_TABLE_EDIT_DISTANCE {
            continue;
        }
        if distance < best_distance {
            best = Some(option);
            best_distance = distance;
            tied = false;
        } else if distance == best_distance {
            tied = true;
        }
    }
    if tied { None } else { best.map(ToString::to_string) }
}

/// Computes the Levenshtein edit distance between two strings.
fn levenshtein(left: &str, right: &str) -> usize {
    let right_chars: Vec<char> = right.chars().collect();
    let mut previous: Vec<usize> = (0 ..= right_chars.len()).collect();
    for (i, left_char) in left.chars().enumerate() {
        let mut current = Vec::with_capacity(previous.len());
        current.push(i + 1);
        for (window, right_char) in previous.windows(2).zip(&right_chars) {
            let &[diagonal, above] = window else {
                continue;
            };
            let before = current.last().copied().unwrap_or_default();
            let cost = usize::from(left_char != *right_char);
            current.push((above + 1).min(before + 1).min(diagonal + cost));
        }
        previous = current;
    }
    previous.last().copied().unwrap_or_default()
}

// ============================================================================
// SECTION: Tokenizer
// ============================================================================

/// Lexical token of a query.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    /// Bare identifier or keyword; may contain dots.
    Ident(String),
    /// Quoted identifier.
    Quoted(String),
    /// String literal.
    Str,
    /// Numeric literal.
    Number(String),
    /// Bind parameter.
    Param,
    /// Operator or punctuation.
    Symbol(&'static str),
}

impl Token {
    /// Returns true when the token is the keyword `word` (case-insensitive).
    fn is_keyword(&self, word: &str) -> bool {
        matches!(self, Self::Ident(ident) if ident.eq_ignore_ascii_case(word))
    }

    /// Renders the token for diagnostics.
    fn describe(&self) -> String {
        match self {
            Self::Ident(text) | Self::Quoted(text) | Self::Number(text) => text.clone(),
            Self::Str => "string literal".to_string(),
            Self::Param => "parameter".to_string(),
            Self::Symbol(symbol) => (*symbol).to_string(),
        }
    }
}

/// Two-character operators recognized by the tokenizer.
const TWO_CHAR_SYMBOLS: [&str; 5] = ["<=", ">=", "<>", "!=", "||"];
/// Single-character operators recognized by the tokenizer.
const ONE_CHAR_SYMBOLS: [&str; 12] = [",", "(", ")", "*", "=", "<", ">", "+", "-", "/", "%", ";"];

/// Splits a query into tokens.
fn tokenize(query: &str) -> Result<Vec<Token>, Diagnostic> {
    let chars: Vec<char> = query.chars().collect();
    let mut tokens = Vec::new();
    let mut index = 0;
    while let Some(&ch) = chars.get(index) {
        let next = chars.get(index + 1).copied();
        if ch.is_whitespace() {
            index += 1;
        } else if ch == '-' && next == Some('-') {
            while chars.get(index).is_some_and(|c| *c != '\n') {
                index += 1;
            }
        } else if ch.is_alphabetic() || ch == '_' {
            let start = index;
            while let Some(&c) = chars.get(index) {
                let after_dot = index > start && chars.get(index - 1) == Some(&'.');
                if c.is_alphanumeric() || c == '_' || c == '.' || (c == '*' && after_dot) {
                    index += 1;
                } else {
                    break;
                }
            }
            let ident: String = chars.get(start .. index).unwrap_or_default().iter().collect();
            if ident.ends_with('.') || ident.contains("..") {
                return Err(Diagnostic::syntax(ident, "incomplete field path"));
            }
            tokens.push(Token::Ident(ident));
        } else if ch.is_ascii_digit() {
            let start = index;
            while chars.get(index).is_some_and(|c| c.is_ascii_digit() || *c == '.') {
                index += 1;
            }
            let digits = chars.get(start .. index).unwrap_or_default();
            tokens.push(Token::Number(digits.iter().collect()));
        } else if ch == '\'' {
            index += 1;
            loop {
                match chars.get(index) {
                    None => return Err(Diagnostic::syntax("'", "unterminated string literal")),
                    Some('\'') if chars.get(index + 1) == Some(&'\'') => index += 2,
                    Some('\'') => {
                        index += 1;
                        break;
                    }
                    Some(_) => index += 1,
                }
            }
            tokens.push(Token::Str);
        } else if ch == '"' || ch == '`' {
            let start = index + 1;
            let closing = chars.get(start ..).and_then(|rest| rest.iter().position(|c| *c == ch));
            let Some(offset) = closing else {
                return Err(Diagnostic::syntax(ch.to_string(), "unterminated quoted identifier"));
            };
            let ident: String =
                chars.get(start .. start + offset).unwrap_or_default().iter().collect();
            tokens.push(Token::Quoted(ident));
            index = start + offset + 1;
        } else if ch == '?' {
            tokens.push(Token::Param);
            index += 1;
        } else if (ch == ':' || ch == '$')
            && next.is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            index += 1;
            while chars.get(index).is_some_and(|c| c.is_alphanumeric() || *c == '_') {
                index += 1;
            }
            tokens.push(Token::Param);
        } else {
            let pair: String = [ch].into_iter().chain(next).collect();
            if let Some(symbol) = TWO_CHAR_SYMBOLS.iter().find(|symbol| **symbol == pair) {
                tokens.push(Token::Symbol(*symbol));
                index += 2;
            } else if let Some(symbol) =
                ONE_CHAR_SYMBOLS.iter().find(|symbol| symbol.starts_with(ch))
            {
                tokens.push(Token::Symbol(*symbol));
                index += 1;
            } else {
                let reason = format!("unexpected character `{ch}`");
                return Err(Diagnostic::syntax(ch.to_string(), reason));
            }
        }
    }
    Ok(tokens)
}

// ============================================================================
// SECTION: Parser
// ============================================================================

/// Clause following the `FROM` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clause {
    /// `WHERE` predicate.
    Where,
    /// `GROUP BY` list.
    GroupBy,
    /// `HAVING` predicate.
    Having,
    /// `ORDER BY` list.
    OrderBy,
    /// `LIMIT` count.
    Limit,
    /// `OFFSET` count.
    Offset,
}

/// Parses the structure of a `SELECT` query.
///
/// # Errors
///
/// Returns a syntax [`Diagnostic`] when the query is not a single
/// `SELECT … FROM <table>` statement.
pub fn parse_query(query: &str) -> Result<ParsedQuery, Diagnostic> {
    if query.trim().is_empty() {
        return Err(Diagnostic::syntax("", "query is empty"));
    }
    if query.len() > MAX_QUERY_LENGTH {
        return Err(Diagnostic::syntax(
            "",
            format!("query exceeds {MAX_QUERY_LENGTH} bytes"),
        ));
    }
    let mut tokens = tokenize(query)?;
    if tokens.last() == Some(&Token::Symbol(";")) {
        tokens.pop();
    }
    if tokens.contains(&Token::Symbol(";")) {
        return Err(Diagnostic::syntax(";", "multiple statements are not supported"));
    }
    check_parentheses(&tokens)?;
    if !tokens.first().is_some_and(|token| token.is_keyword("SELECT")) {
        let token = tokens.first().map(Token::describe).unwrap_or_default();
        return Err(Diagnostic::syntax(token, "query must start with SELECT"));
    }
    let from_index = find_top_level(&tokens, 1, |token| token.is_keyword("FROM"))
        .ok_or_else(|| Diagnostic::syntax("SELECT", "query is missing a FROM clause"))?;
    let select_list = tokens.get(1 .. from_index).unwrap_or_default();
    if select_list.is_empty() {
        return Err(Diagnostic::syntax("FROM", "select list is empty"));
    }
    let table = match tokens.get(from_index + 1) {
        Some(Token::Ident(name)) if !name.contains('.') && !is_reserved(name) => name.clone(),
        Some(Token::Quoted(name)) => name.clone(),
        other => {
            return Err(Diagnostic::syntax(
                other.map(Token::describe).unwrap_or_default(),
                "expected a table name after FROM",
            ));
        }
    };
    let mut position = from_index + 2;
    let alias = parse_table_alias(&tokens, &mut position)?;
    if let Some(token) = tokens.get(position)
        && (JOIN_KEYWORDS.iter().any(|word| token.is_keyword(word))
            || *token == Token::Symbol(","))
    {
        return Err(Diagnostic::syntax(
            token.describe(),
            "explicit joins are not supported; reference related fields with join paths such \
             as payee.name",
        ));
    }
    let clauses = split_clauses(&tokens, position)?;

    let mut select = SelectList::default();
    collect_select_list(select_list, &mut select);
    let mut fields = select.fields.clone();
    let mut limit = None;
    let mut offset = None;
    for (clause, body) in &clauses {
        match clause {
            Clause::Limit => limit = Some(parse_count("LIMIT", body)?),
            Clause::Offset => offset = Some(parse_count("OFFSET", body)?),
            Clause::Where | Clause::GroupBy | Clause::Having | Clause::OrderBy => {
                collect_expression_fields(body, &select.aliases, &mut fields);
            }
        }
    }

    let qualifiers: Vec<&str> = std::iter::once(table.as_str()).chain(alias.as_deref()).collect();
    let mut seen = BTreeSet::new();
    let fields = fields
        .into_iter()
        .map(|field| strip_qualifier(&field, &qualifiers))
        .filter(|field| seen.insert(field.clone()))
        .collect();
    let columns = select
        .columns
        .into_iter()
        .map(|(field, output)| {
            let field = strip_qualifier(&field, &qualifiers);
            let output = output.unwrap_or_else(|| field.clone());
            SelectColumn {
                field,
                output,
            }
        })
        .collect();
    Ok(ParsedQuery {
        table,
        alias,
        select_all: select.select_all,
        columns,
        fields,
        limit,
        offset,
    })
}

/// Rejects unbalanced parentheses.
fn check_parentheses(tokens: &[Token]) -> Result<(), Diagnostic> {
    let mut depth: usize = 0;
    for token in tokens {
        match token {
            Token::Symbol("(") => depth += 1,
            Token::Symbol(")") => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| Diagnostic::syntax(")", "unbalanced parentheses"))?;
            }
            _ => {}
        }
    }
    if depth == 0 { Ok(()) } else { Err(Diagnostic::syntax("(", "unbalanced parentheses")) }
}

/// Finds the first token at parenthesis depth zero matching `predicate`.
fn find_top_level(
    tokens: &[Token],
    start: usize,
    predicate: impl Fn(&Token) -> bool,
) -> Option<usize> {
    let mut depth: usize = 0;
    for (index, token) in tokens.iter().enumerate().skip(start) {
        match token {
            Token::Symbol("(") => depth += 1,
            Token::Symbol(")") => depth = depth.saturating_sub(1),
            _ if depth == 0 && predicate(token) => return Some(index),
            _ => {}
        }
    }
    None
}

/// Parses an optional table alias at `position`, advancing past it.
fn parse_table_alias(tokens: &[Token], position: &mut usize) -> Result<Option<String>, Diagnostic> {
    match tokens.get(*position) {
        Some(token) if token.is_keyword("AS") => match tokens.get(*position + 1) {
            Some(Token::Ident(name) | Token::Quoted(name)) => {
                *position += 2;
                Ok(Some(name.clone()))
            }
            _ => Err(Diagnostic::syntax("AS", "expected a table alias after AS")),
        },
        Some(Token::Ident(name))
            if !name.contains('.')
                && !is_reserved(name)
                && !is_clause_keyword(name)
                && !JOIN_KEYWORDS.iter().any(|word| name.eq_ignore_ascii_case(word)) =>
        {
            *position += 1;
            Ok(Some(name.clone()))
        }
        _ => Ok(None),
    }
}

/// Splits the tokens after the table into clauses.
fn split_clauses(tokens: &[Token], start: usize) -> Result<Vec<(Clause, Vec<Token>)>, Diagnostic> {
    let mut clauses: Vec<(Clause, Vec<Token>)> = Vec::new();
    let mut depth: usize = 0;
    let mut index = start;
    while let Some(token) = tokens.get(index) {
        if depth == 0
            && let Some(clause) = clause_at(tokens, index)?
        {
            index += if matches!(clause, Clause::GroupBy | Clause::OrderBy) { 2 } else { 1 };
            clauses.push((clause, Vec::new()));
            continue;
        }
        match token {
            Token::Symbol("(") => depth += 1,
            Token::Symbol(")") => depth = depth.saturating_sub(1),
            _ => {}
        }
        match clauses.last_mut() {
            Some((_, body)) => body.push(token.clone()),
            None => {
                return Err(Diagnostic::syntax(
                    token.describe(),
                    format!("unexpected `{}` after the FROM table", token.describe()),
                ));
            }
        }
        index += 1;
    }
    Ok(clauses)
}

/// Returns the clause opened by the keyword at `index`, if any.
fn clause_at(tokens: &[Token], index: usize) -> Result<Option<Clause>, Diagnostic> {
    let Some(Token::Ident(word)) = tokens.get(index) else {
        return Ok(None);
    };
    let upper = word.to_ascii_uppercase();
    let needs_by = |clause: Clause| {
        if tokens.get(index + 1).is_some_and(|next| next.is_keyword("BY")) {
            Ok(Some(clause))
        } else {
            Err(Diagnostic::syntax(word.clone(), format!("expected BY after {upper}")))
        }
    };
    match upper.as_str() {
        "WHERE" => Ok(Some(Clause::Where)),
        "GROUP" => needs_by(Clause::GroupBy),
        "HAVING" => Ok(Some(Clause::Having)),
        "ORDER" => needs_by(Clause::OrderBy),
        "LIMIT" => Ok(Some(Clause::Limit)),
        "OFFSET" => Ok(Some(Clause::Offset)),
        _ => Ok(None),
    }
}

/// Parses the non-negative integer body of `LIMIT` or `OFFSET`.
fn parse_count(keyword: &str, body: &[Token]) -> Result<usize, Diagnostic> {
    match body {
        [Token::Number(text)] => text.parse::<usize>().map_err(|_| {
            Diagnostic::syntax(text.clone(), format!("{keyword} expects a non-negative integer"))
        }),
        _ => Err(Diagnostic::syntax(
            keyword,
            format!("{keyword} expects a non-negative integer"),
        )),
    }
}

/// Fields, columns, and aliases collected from the select list.
#[derive(Debug, Default)]
struct SelectList {
    /// True when `*` or `<qualifier>.*` is selected.
    select_all: bool,
    /// Referenced fields in order.
    fields: Vec<String>,
    /// Plain field columns with optional alias.
    columns: Vec<(String, Option<String>)>,
    /// Output aliases that later clauses may reference.
    aliases: BTreeSet<String>,
}

/// Collects fields and aliases from the select list.
fn collect_select_list(tokens: &[Token], select: &mut SelectList) {
    for item in split_top_level_commas(tokens) {
        match item {
            [Token::Symbol("*")] => {
                select.select_all = true;
                continue;
            }
            [Token::Ident(name)] if name.ends_with(".*") => {
                select.select_all = true;
                continue;
            }
            _ => {}
        }
        let (expression, alias) = split_item_alias(item);
        if let Some(alias) = &alias {
            select.aliases.insert(alias.clone());
        }
        if let [Token::Ident(name) | Token::Quoted(name)] = expression
            && !is_reserved(name)
        {
            select.columns.push((name.clone(), alias));
        }
        collect_expression_fields(expression, &BTreeSet::new(), &mut select.fields);
    }
}

/// Separates a select item into its expression and output alias.
fn split_item_alias(item: &[Token]) -> (&[Token], Option<String>) {
    let len = item.len();
    if len >= 3
        && let (Some(marker), Some(Token::Ident(alias) | Token::Quoted(alias))) =
            (item.get(len - 2), item.get(len - 1))
        && marker.is_keyword("AS")
    {
        return (item.get(.. len - 2).unwrap_or_default(), Some(alias.clone()));
    }
    if len >= 2
        && let (Some(previous), Some(Token::Ident(alias))) = (item.get(len - 2), item.get(len - 1))
        && !is_reserved(alias)
        && !alias.contains('.')
    {
        let ends_expression = match previous {
            Token::Ident(word) => !is_reserved(word) || word.eq_ignore_ascii_case("END"),
            Token::Quoted(_) | Token::Number(_) | Token::Str | Token::Symbol(")") => true,
            Token::Param | Token::Symbol(_) => false,
        };
        if ends_expression {
            return (item.get(.. len - 1).unwrap_or_default(), Some(alias.clone()));
        }
    }
    (item, None)
}

/// Splits tokens on commas at parenthesis depth zero.
fn split_top_level_commas(tokens: &[Token]) -> Vec<&[Token]> {
    let mut items = Vec::new();
    let mut depth: usize = 0;
    let mut start = 0;
    for (index, token) in tokens.iter().enumerate() {
        match token {
            Token::Symbol("(") => depth += 1,
            Token::Symbol(")") => depth = depth.saturating_sub(1),
            Token::Symbol(",") if depth == 0 => {
                items.push(tokens.get(start .. index).unwrap_or_default());
                start = index + 1;
            }
            _ => {}
        }
    }
    items.push(tokens.get(start ..).unwrap_or_default());
    items
}

/// Appends field references found in an expression.
fn collect_expression_fields(tokens: &[Token], skip: &BTreeSet<String>, fields: &mut Vec<String>) {
    for (index, token) in tokens.iter().enumerate() {
        let after_as = index > 0 && tokens.get(index - 1).is_some_and(|prev| prev.is_keyword("AS"));
        match token {
            Token::Ident(name) => {
                let is_function = tokens.get(index + 1) == Some(&Token::Symbol("("));
                if is_reserved(name)
                    || is_function
                    || after_as
                    || skip.contains(name)
                    || name.ends_with(".*")
                {
                    continue;
                }
                fields.push(name.clone());
            }
            Token::Quoted(name) if !after_as && !skip.contains(name) => fields.push(name.clone()),
            _ => {}
        }
    }
}

/// Removes a leading table name or alias qualifier from a field path.
fn strip_qualifier(field: &str, qualifiers: &[&str]) -> String {
    if let Some((head, rest)) = field.split_once('.')
        && qualifiers.contains(&head)
    {
        return rest.to_string();
    }
    field.to_string()
}

/// Returns true for words that are never field references.
fn is_reserved(word: &str) -> bool {
    RESERVED_WORDS.iter().any(|reserved| word.eq_ignore_ascii_case(reserved))
        || is_clause_keyword(word)
}

/// Returns true for clause-opening keywords.
fn is_clause_keyword(word: &str) -> bool {
    CLAUSE_KEYWORDS.iter().any(|keyword| word.eq_ignore_ascii_case(keyword))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;

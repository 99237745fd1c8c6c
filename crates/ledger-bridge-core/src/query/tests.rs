// crates/ledger-bridge-core/src/query/tests.rs
// ============================================================================
// Module: Query Validator Unit Tests
// Description: Tests for query parsing, field extraction, and suggestions.
// Purpose: Validate diagnostics and rename hints for common query mistakes.
// Dependencies: ledger-bridge-core
// ============================================================================

//! ## Overview
//! Covers table and field checks, join-path suggestions, alias handling, and
//! syntax rejection for the static query validator.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    reason = "Test-only assertions use unwrap/expect for clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use super::DiagnosticKind;
use super::levenshtein;
use super::parse_query;
use super::split_words;
use super::validate_query;
use crate::schema::QuerySchema;
use crate::schema::TableSchema;

// ============================================================================
// SECTION: Fixtures
// ============================================================================

/// Small schema with one join from entries to payees.
fn entries_schema() -> QuerySchema {
    QuerySchema::new()
        .with_table(
            "ledgerEntries",
            TableSchema::new()
                .with_fields(["id", "date", "amount", "notes"])
                .with_join("payee", "payees")
                .with_alias("memo", "notes"),
        )
        .with_table("payees", TableSchema::new().with_fields(["id", "name"]))
}

// ============================================================================
// SECTION: Table Checks
// ============================================================================

#[test]
fn select_star_from_known_table_is_valid() {
    let result = validate_query("SELECT * FROM ledgerEntries", &entries_schema());
    assert!(result.valid, "unexpected diagnostics: {:?}", result.diagnostics);
    assert!(result.diagnostics.is_empty());
}

#[test]
fn misspelled_table_lists_available_tables() {
    let result = validate_query("SELECT * FROM entrie", &entries_schema());
    assert!(!result.valid);
    let diagnostic = result.diagnostics.first().expect("table diagnostic");
    assert_eq!(diagnostic.kind, DiagnosticKind::Table);
    assert_eq!(diagnostic.token, "entrie");
    assert!(diagnostic.reason.contains("ledgerEntries"));
    assert!(diagnostic.reason.contains("payees"));
}

#[test]
fn near_table_name_gets_suggestion() {
    let result = validate_query("SELECT * FROM payee", &entries_schema());
    let diagnostic = result.diagnostics.first().expect("table diagnostic");
    assert_eq!(diagnostic.suggestion.as_deref(), Some("payees"));
}

#[test]
fn table_case_mismatch_gets_suggestion() {
    let result = validate_query("SELECT * FROM LEDGERENTRIES", &entries_schema());
    let diagnostic = result.diagnostics.first().expect("table diagnostic");
    assert_eq!(diagnostic.suggestion.as_deref(), Some("ledgerEntries"));
}

// ============================================================================
// SECTION: Field Checks
// ============================================================================

#[test]
fn flat_camel_case_name_suggests_join_path() {
    let result = validate_query("SELECT payeeName FROM ledgerEntries", &entries_schema());
    assert!(!result.valid);
    let diagnostic = result.diagnostics.first().expect("field diagnostic");
    assert_eq!(diagnostic.kind, DiagnosticKind::Field);
    assert_eq!(diagnostic.token, "payeeName");
    assert_eq!(diagnostic.suggestion.as_deref(), Some("payee.name"));
}

#[test]
fn snake_case_name_suggests_join_path() {
    let result = validate_query("SELECT payee_name FROM ledgerEntries", &entries_schema());
    let diagnostic = result.diagnostics.first().expect("field diagnostic");
    assert_eq!(diagnostic.suggestion.as_deref(), Some("payee.name"));
}

#[test]
fn explicit_alias_is_suggested() {
    let result = validate_query("SELECT memo FROM ledgerEntries", &entries_schema());
    let diagnostic = result.diagnostics.first().expect("field diagnostic");
    assert_eq!(diagnostic.suggestion.as_deref(), Some("notes"));
}

#[test]
fn unknown_field_without_mapping_lists_fields() {
    let result = validate_query("SELECT balance FROM ledgerEntries", &entries_schema());
    let diagnostic = result.diagnostics.first().expect("field diagnostic");
    assert_eq!(diagnostic.suggestion, None);
    assert!(diagnostic.reason.contains("available fields are"));
    assert!(diagnostic.reason.contains("amount"));
}

#[test]
fn join_paths_resolve_in_every_clause() {
    let query = "SELECT e.id, payee.name AS who, SUM(amount) total FROM ledgerEntries e \
                 WHERE payee.name LIKE 'A%' AND date >= '2024-01-01' GROUP BY payee.name \
                 HAVING SUM(amount) > 0 ORDER BY total DESC, who LIMIT 10";
    let result = validate_query(query, &entries_schema());
    assert!(result.valid, "unexpected diagnostics: {:?}", result.diagnostics);
}

#[test]
fn broken_join_path_names_failing_segment() {
    let result = validate_query("SELECT payee.label FROM ledgerEntries", &entries_schema());
    let diagnostic = result.diagnostics.first().expect("field diagnostic");
    assert!(diagnostic.reason.contains("`label`"));
    assert!(diagnostic.reason.contains("payees"));

    let result = validate_query("SELECT account.name FROM ledgerEntries", &entries_schema());
    let diagnostic = result.diagnostics.first().expect("field diagnostic");
    assert!(diagnostic.reason.contains("not a join path"));
}

#[test]
fn where_clause_fields_are_checked() {
    let result =
        validate_query("SELECT id FROM ledgerEntries WHERE payeeName = 'x'", &entries_schema());
    assert_eq!(result.diagnostics.len(), 1);
    assert_eq!(result.diagnostics.first().unwrap().token, "payeeName");
}

#[test]
fn duplicate_references_report_once() {
    let result = validate_query(
        "SELECT bogus FROM ledgerEntries WHERE bogus = 1 ORDER BY bogus",
        &entries_schema(),
    );
    assert_eq!(result.diagnostics.len(), 1);
}

// ============================================================================
// SECTION: Syntax Checks
// ============================================================================

#[test]
fn non_select_statements_are_rejected() {
    let result = validate_query("DELETE FROM ledgerEntries", &entries_schema());
    assert_eq!(result.diagnostics.first().unwrap().kind, DiagnosticKind::Syntax);
}

#[test]
fn missing_from_is_rejected() {
    let result = validate_query("SELECT amount", &entries_schema());
    assert_eq!(result.diagnostics.first().unwrap().kind, DiagnosticKind::Syntax);
}

#[test]
fn explicit_joins_are_rejected() {
    let result = validate_query(
        "SELECT * FROM ledgerEntries e JOIN payees p ON p.id = e.payee",
        &entries_schema(),
    );
    let diagnostic = result.diagnostics.first().unwrap();
    assert_eq!(diagnostic.kind, DiagnosticKind::Syntax);
    assert!(diagnostic.reason.contains("join paths"));
}

#[test]
fn stacked_statements_are_rejected() {
    let result = validate_query("SELECT * FROM payees; DROP TABLE payees", &entries_schema());
    assert!(!result.valid);
    let result = validate_query("SELECT * FROM payees;", &entries_schema());
    assert!(result.valid);
}

#[test]
fn unterminated_string_is_rejected() {
    let result = validate_query("SELECT * FROM payees WHERE name = 'open", &entries_schema());
    assert_eq!(result.diagnostics.first().unwrap().kind, DiagnosticKind::Syntax);
}

#[test]
fn limit_requires_integer() {
    let result = validate_query("SELECT * FROM payees LIMIT many", &entries_schema());
    assert_eq!(result.diagnostics.first().unwrap().kind, DiagnosticKind::Syntax);
}

// ============================================================================
// SECTION: Parser Details
// ============================================================================

#[test]
fn parse_extracts_table_alias_columns_and_limit() {
    let parsed =
        parse_query("select p.name as who, id from payees p order by name limit 5 offset 2")
            .unwrap();
    assert_eq!(parsed.table, "payees");
    assert_eq!(parsed.alias.as_deref(), Some("p"));
    assert!(!parsed.select_all);
    assert_eq!(parsed.fields, vec!["name".to_string(), "id".to_string()]);
    assert_eq!(parsed.limit, Some(5));
    assert_eq!(parsed.offset, Some(2));
    let outputs: Vec<&str> = parsed.columns.iter().map(|column| column.output.as_str()).collect();
    assert_eq!(outputs, vec!["who", "id"]);
}

#[test]
fn functions_and_quoted_identifiers_are_handled() {
    let parsed =
        parse_query("SELECT COUNT(*), \"name\" FROM payees WHERE lower(name) = ?").unwrap();
    assert_eq!(parsed.fields, vec!["name".to_string()]);
}

#[test]
fn words_split_on_case_and_separators() {
    assert_eq!(split_words("payeeName"), vec!["payee", "name"]);
    assert_eq!(split_words("category_group_name"), vec!["category", "group", "name"]);
    assert_eq!(split_words("ID"), vec!["id"]);
}

#[test]
fn levenshtein_counts_edits() {
    assert_eq!(levenshtein("payee", "payees"), 1);
    assert_eq!(levenshtein("kitten", "sitting"), 3);
    assert_eq!(levenshtein("", "abc"), 3);
}

#[test]
fn default_schema_resolves_nested_paths() {
    let schema = QuerySchema::ledger_default();
    let result = validate_query(
        "SELECT date, amount, payee.name, category.group.name FROM transactions",
        &schema,
    );
    assert!(result.valid, "unexpected diagnostics: {:?}", result.diagnostics);
    let result = validate_query("SELECT categoryGroupName FROM transactions", &schema);
    let diagnostic = result.diagnostics.first().unwrap();
    assert_eq!(diagnostic.suggestion.as_deref(), Some("category.group.name"));
}

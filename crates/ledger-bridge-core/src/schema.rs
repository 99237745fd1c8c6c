// crates/ledger-bridge-core/src/schema.rs
// ============================================================================
// Module: Query Schema
// Description: Table, field, join-path, and alias catalog for query checks.
// Purpose: Describe what ad-hoc queries may reference before engine dispatch.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`QuerySchema`] lists the tables a query may select from. Each
//! [`TableSchema`] lists plain fields, join fields that lead to another table
//! (so `payee.name` resolves through the `payee` join into `payees.name`), and
//! aliases that map commonly guessed names onto real field paths.
//!
//! ## Invariants
//! - Join fields are also plain fields of their table.
//! - Alias targets are field paths resolvable from the owning table.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum join hops followed when resolving a dotted field path.
pub const MAX_JOIN_DEPTH: usize = 4;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Fields, joins, and aliases of a single table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Field names, including join fields.
    fields: BTreeSet<String>,
    /// Join field name to target table name.
    joins: BTreeMap<String, String>,
    /// Alias name to real field path.
    aliases: BTreeMap<String, String>,
}

impl TableSchema {
    /// Creates an empty table schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds plain fields.
    #[must_use]
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields.extend(fields.into_iter().map(Into::into));
        self
    }

    /// Adds a join field that leads to `table`.
    #[must_use]
    pub fn with_join(mut self, field: impl Into<String>, table: impl Into<String>) -> Self {
        let field = field.into();
        self.fields.insert(field.clone());
        self.joins.insert(field, table.into());
        self
    }

    /// Adds an alias that maps `alias` onto the field path `target`.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>, target: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), target.into());
        self
    }

    /// Returns true when `field` is a field of this table.
    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains(field)
    }

    /// Returns the table's fields in sorted order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }

    /// Returns the join fields and their target tables.
    pub fn joins(&self) -> impl Iterator<Item = (&str, &str)> {
        self.joins.iter().map(|(field, table)| (field.as_str(), table.as_str()))
    }

    /// Returns the target table of a join field.
    #[must_use]
    pub fn join_target(&self, field: &str) -> Option<&str> {
        self.joins.get(field).map(String::as_str)
    }

    /// Returns the field path an alias maps to.
    #[must_use]
    pub fn alias_target(&self, alias: &str) -> Option<&str> {
        self.aliases.get(alias).map(String::as_str)
    }

    /// Returns all aliases and their targets.
    pub fn aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.aliases.iter().map(|(alias, target)| (alias.as_str(), target.as_str()))
    }
}

/// Catalog of queryable tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySchema {
    /// Table name to table schema.
    tables: BTreeMap<String, TableSchema>,
}

impl QuerySchema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a table.
    #[must_use]
    pub fn with_table(mut self, name: impl Into<String>, table: TableSchema) -> Self {
        self.tables.insert(name.into(), table);
        self
    }

    /// Returns a table by exact name.
    #[must_use]
    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Returns table names in sorted order.
    #[must_use]
    pub fn table_names(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }

    /// Returns true when `path` resolves from `table` through join fields.
    ///
    /// `path` is either a plain field (`amount`) or a dotted join path
    /// (`payee.name`, `category.group.name`).
    #[must_use]
    pub fn resolves(&self, table: &str, path: &str) -> bool {
        let mut current = match self.table(table) {
            Some(schema) => schema,
            None => return false,
        };
        let segments: Vec<&str> = path.split('.').collect();
        if segments.len() > MAX_JOIN_DEPTH + 1 {
            return false;
        }
        let Some((last, hops)) = segments.split_last() else {
            return false;
        };
        for hop in hops {
            let Some(next) = current.join_target(hop).and_then(|name| self.table(name)) else {
                return false;
            };
            current = next;
        }
        current.has_field(last)
    }

    /// Default schema describing the ledger engine's queryable tables.
    #[must_use]
    pub fn ledger_default() -> Self {
        Self::new()
            .with_table(
                "transactions",
                TableSchema::new()
                    .with_fields([
                        "id",
                        "date",
                        "amount",
                        "notes",
                        "cleared",
                        "reconciled",
                        "imported_id",
                        "is_parent",
                        "is_child",
                        "tombstone",
                    ])
                    .with_join("account", "accounts")
                    .with_join("payee", "payees")
                    .with_join("category", "categories")
                    .with_join("parent", "transactions")
                    .with_join("schedule", "schedules")
                    .with_alias("memo", "notes")
                    .with_alias("description", "notes")
                    .with_alias("account_id", "account")
                    .with_alias("payee_id", "payee")
                    .with_alias("category_id", "category"),
            )
            .with_table(
                "accounts",
                TableSchema::new()
                    .with_fields(["id", "name", "offbudget", "closed", "sort_order", "tombstone"])
                    .with_alias("off_budget", "offbudget"),
            )
            .with_table(
                "payees",
                TableSchema::new()
                    .with_fields(["id", "name", "tombstone"])
                    .with_join("transfer_acct", "accounts")
                    .with_alias("transfer_account", "transfer_acct"),
            )
            .with_table(
                "categories",
                TableSchema::new()
                    .with_fields(["id", "name", "is_income", "hidden", "sort_order", "tombstone"])
                    .with_join("group", "category_groups")
                    .with_alias("group_id", "group"),
            )
            .with_table(
                "category_groups",
                TableSchema::new().with_fields([
                    "id",
                    "name",
                    "is_income",
                    "hidden",
                    "sort_order",
                    "tombstone",
                ]),
            )
            .with_table(
                "schedules",
                TableSchema::new()
                    .with_fields(["id", "name", "next_date", "completed", "posts_transaction"])
                    .with_join("rule", "rules"),
            )
            .with_table(
                "rules",
                TableSchema::new().with_fields(["id", "stage", "conditions", "actions"]),
            )
    }
}

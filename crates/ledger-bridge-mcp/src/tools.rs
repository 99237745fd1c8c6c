// crates/ledger-bridge-mcp/src/tools.rs
// ============================================================================
// Module: MCP Tool Router
// Description: Tool routing for the Ledger Bridge MCP server.
// Purpose: Expose thin wrappers over the session connection pool.
// Dependencies: ledger-bridge-core, serde, serde_json
// ============================================================================

//! ## Overview
//! The tool router maps MCP tool calls onto [`ConnectionPool`] operations for
//! the caller's session. Tool inputs are untrusted and are decoded into
//! strict argument structs before any pool access.
//!
//! ## Invariants
//! - Entity names are checked against the pool's query schema.
//! - Queries are validated by the connection before reaching the engine.
//! - Core errors are carried unmodified in [`ToolError::Bridge`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use ledger_bridge_core::BridgeError;
use ledger_bridge_core::ConnectionPool;
use ledger_bridge_core::EngineOperation;
use ledger_bridge_core::SessionId;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;
use serde_json::json;
use thiserror::Error;

use crate::config::ServerTransport;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Session identifier used by the stdio transport.
pub const STDIO_SESSION_ID: &str = "stdio";

/// Maximum number of steps accepted by `ledger_batch`.
pub const MAX_BATCH_STEPS: usize = 256;

/// Operations allowed inside `ledger_batch`.
const BATCH_OPERATIONS: [&str; 4] = ["create", "update", "delete", "budget_adjust"];

// ============================================================================
// SECTION: Request Context
// ============================================================================

/// Per-request routing context supplied by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Transport used by the caller.
    pub transport: ServerTransport,
    /// Session the request belongs to.
    pub session_id: SessionId,
    /// Optional request identifier for auditing.
    pub request_id: Option<String>,
}

impl RequestContext {
    /// Builds the context for the single stdio session.
    #[must_use]
    pub fn stdio() -> Self {
        Self {
            transport: ServerTransport::Stdio,
            session_id: SessionId::new(STDIO_SESSION_ID),
            request_id: None,
        }
    }

    /// Builds an HTTP context for `session_id`.
    #[must_use]
    pub const fn http(session_id: SessionId) -> Self {
        Self {
            transport: ServerTransport::Http,
            session_id,
            request_id: None,
        }
    }

    /// Attaches a request identifier.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

// ============================================================================
// SECTION: Tool Names
// ============================================================================

/// Tools exposed by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    /// List records of an entity.
    LedgerList,
    /// Fetch one record.
    LedgerGet,
    /// Create a record.
    LedgerCreate,
    /// Update a record.
    LedgerUpdate,
    /// Delete a record.
    LedgerDelete,
    /// Run a validated query.
    LedgerQuery,
    /// Apply mutations as one synchronization unit.
    LedgerBatch,
    /// Move budgeted money between categories.
    BudgetTransfer,
    /// Push local changes to the server.
    LedgerSync,
    /// Report pool statistics.
    SessionStats,
    /// Close a session.
    SessionClose,
}

impl ToolName {
    /// All tools in listing order.
    pub const ALL: [Self; 11] = [
        Self::LedgerList,
        Self::LedgerGet,
        Self::LedgerCreate,
        Self::LedgerUpdate,
        Self::LedgerDelete,
        Self::LedgerQuery,
        Self::LedgerBatch,
        Self::BudgetTransfer,
        Self::LedgerSync,
        Self::SessionStats,
        Self::SessionClose,
    ];

    /// Returns the wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LedgerList => "ledger_list",
            Self::LedgerGet => "ledger_get",
            Self::LedgerCreate => "ledger_create",
            Self::LedgerUpdate => "ledger_update",
            Self::LedgerDelete => "ledger_delete",
            Self::LedgerQuery => "ledger_query",
            Self::LedgerBatch => "ledger_batch",
            Self::BudgetTransfer => "budget_transfer",
            Self::LedgerSync => "ledger_sync",
            Self::SessionStats => "session_stats",
            Self::SessionClose => "session_close",
        }
    }

    /// Parses a wire name.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.as_str() == name)
    }

    /// Returns the tool description shown to clients.
    const fn description(self) -> &'static str {
        match self {
            Self::LedgerList => "List all records of a ledger entity.",
            Self::LedgerGet => "Fetch one ledger record by id.",
            Self::LedgerCreate => "Create a ledger record and synchronize.",
            Self::LedgerUpdate => "Update fields of a ledger record and synchronize.",
            Self::LedgerDelete => "Delete a ledger record and synchronize.",
            Self::LedgerQuery => {
                "Run a SELECT query after validating its tables and fields against the schema."
            }
            Self::LedgerBatch => {
                "Apply several mutations in order with a single trailing synchronization."
            }
            Self::BudgetTransfer => "Move a budgeted amount between two categories for a month.",
            Self::LedgerSync => "Push pending local changes to the ledger server.",
            Self::SessionStats => "Report connection pool statistics.",
            Self::SessionClose => "Close a session, flushing pending changes.",
        }
    }

    /// Returns the JSON schema for the tool's arguments.
    fn input_schema(self) -> Value {
        let entity = json!({ "type": "string", "description": "Ledger entity (table) name." });
        let id = json!({ "type": "string", "description": "Record identifier." });
        let data = json!({ "type": "object", "description": "Record fields." });
        match self {
            Self::LedgerList => object_schema(&json!({ "entity": entity }), &["entity"]),
            Self::LedgerGet | Self::LedgerDelete => {
                object_schema(&json!({ "entity": entity, "id": id }), &["entity", "id"])
            }
            Self::LedgerCreate => {
                object_schema(&json!({ "entity": entity, "data": data }), &["entity", "data"])
            }
            Self::LedgerUpdate => object_schema(
                &json!({ "entity": entity, "id": id, "data": data }),
                &["entity", "id", "data"],
            ),
            Self::LedgerQuery => {
                object_schema(&json!({ "query": { "type": "string" } }), &["query"])
            }
            Self::LedgerBatch => object_schema(
                &json!({
                    "operations": {
                        "type": "array",
                        "maxItems": MAX_BATCH_STEPS,
                        "items": object_schema(
                            &json!({
                                "operation": { "type": "string", "enum": BATCH_OPERATIONS },
                                "arguments": { "type": "object" }
                            }),
                            &["operation", "arguments"],
                        )
                    }
                }),
                &["operations"],
            ),
            Self::BudgetTransfer => object_schema(
                &json!({
                    "month": { "type": "string", "description": "Budget month, e.g. 2026-01." },
                    "from_category": { "type": "string" },
                    "to_category": { "type": "string" },
                    "amount": { "type": "integer", "minimum": 1 }
                }),
                &["month", "from_category", "to_category", "amount"],
            ),
            Self::LedgerSync | Self::SessionStats => object_schema(&json!({}), &[]),
            Self::SessionClose => object_schema(
                &json!({
                    "session_id": {
                        "type": "string",
                        "description": "Defaults to the caller's session."
                    }
                }),
                &[],
            ),
        }
    }
}

/// Builds a closed object schema.
fn object_schema(properties: &Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false
    })
}

/// Tool listing entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: &'static str,
    /// Human-readable description.
    pub description: &'static str,
    /// JSON schema for the arguments.
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

// ============================================================================
// SECTION: Arguments
// ============================================================================

/// Arguments naming an entity.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct EntityArgs {
    /// Entity name.
    entity: String,
}

/// Arguments naming one record.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecordArgs {
    /// Entity name.
    entity: String,
    /// Record identifier.
    id: String,
}

/// Arguments for record creation.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateArgs {
    /// Entity name.
    entity: String,
    /// Record fields.
    data: Map<String, Value>,
}

/// Arguments for record updates.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateArgs {
    /// Entity name.
    entity: String,
    /// Record identifier.
    id: String,
    /// Fields to overwrite.
    data: Map<String, Value>,
}

/// Arguments for queries.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QueryArgs {
    /// Query text.
    query: String,
}

/// One `ledger_batch` step.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BatchStep {
    /// Mutation name.
    operation: String,
    /// Mutation arguments.
    arguments: Map<String, Value>,
}

/// Arguments for batches.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BatchArgs {
    /// Ordered mutations.
    operations: Vec<BatchStep>,
}

/// Arguments for budget transfers.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TransferArgs {
    /// Budget month.
    month: String,
    /// Category losing the amount.
    from_category: String,
    /// Category receiving the amount.
    to_category: String,
    /// Amount in minor currency units.
    amount: i64,
}

/// Arguments for tools without parameters.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

/// Arguments for `session_close`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CloseArgs {
    /// Session to close; defaults to the caller's.
    #[serde(default)]
    session_id: Option<String>,
}

// ============================================================================
// SECTION: Router
// ============================================================================

/// Routes tool calls into the connection pool.
#[derive(Clone)]
pub struct ToolRouter {
    /// Session connection pool.
    pool: ConnectionPool,
}

impl ToolRouter {
    /// Creates a router over `pool`.
    #[must_use]
    pub const fn new(pool: ConnectionPool) -> Self {
        Self {
            pool,
        }
    }

    /// Returns the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Lists every tool with its argument schema.
    #[must_use]
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        ToolName::ALL
            .into_iter()
            .map(|tool| ToolDefinition {
                name: tool.as_str(),
                description: tool.description(),
                input_schema: tool.input_schema(),
            })
            .collect()
    }

    /// Handles one tool call for the context's session.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError`] for unknown tools, malformed arguments, or any
    /// pool failure.
    pub async fn handle_tool_call(
        &self,
        context: &RequestContext,
        name: &str,
        arguments: Value,
    ) -> Result<Value, ToolError> {
        let tool = ToolName::parse(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let session = &context.session_id;
        match tool {
            ToolName::LedgerList => {
                let args: EntityArgs = decode(arguments)?;
                self.check_entity(&args.entity)?;
                let operation = EngineOperation::read("list", json!({ "entity": args.entity }));
                let records = self.pool.execute(session, &operation).await?;
                Ok(json!({ "entity": args.entity, "records": records }))
            }
            ToolName::LedgerGet => {
                let args: RecordArgs = decode(arguments)?;
                self.check_entity(&args.entity)?;
                let operation = EngineOperation::read(
                    "get",
                    json!({ "entity": args.entity, "id": args.id }),
                );
                Ok(self.pool.execute(session, &operation).await?)
            }
            ToolName::LedgerCreate => {
                let args: CreateArgs = decode(arguments)?;
                self.check_entity(&args.entity)?;
                let operation = EngineOperation::mutation(
                    "create",
                    json!({ "entity": args.entity, "data": args.data }),
                );
                Ok(self.pool.execute(session, &operation).await?)
            }
            ToolName::LedgerUpdate => {
                let args: UpdateArgs = decode(arguments)?;
                self.check_entity(&args.entity)?;
                let operation = EngineOperation::mutation(
                    "update",
                    json!({ "entity": args.entity, "id": args.id, "data": args.data }),
                );
                Ok(self.pool.execute(session, &operation).await?)
            }
            ToolName::LedgerDelete => {
                let args: RecordArgs = decode(arguments)?;
                self.check_entity(&args.entity)?;
                let operation = EngineOperation::mutation(
                    "delete",
                    json!({ "entity": args.entity, "id": args.id }),
                );
                Ok(self.pool.execute(session, &operation).await?)
            }
            ToolName::LedgerQuery => {
                let args: QueryArgs = decode(arguments)?;
                Ok(self.pool.execute(session, &EngineOperation::query(args.query)).await?)
            }
            ToolName::LedgerBatch => {
                let args: BatchArgs = decode(arguments)?;
                let operations = self.batch_operations(args.operations)?;
                let results = self.pool.run_batch(session, &operations).await?;
                Ok(json!({ "applied": results.len(), "results": results }))
            }
            ToolName::BudgetTransfer => {
                let args: TransferArgs = decode(arguments)?;
                let operations = transfer_operations(&args)?;
                let results = self.pool.run_batch(session, &operations).await?;
                Ok(json!({
                    "month": args.month,
                    "amount": args.amount,
                    "from": { "category": args.from_category, "result": results.first() },
                    "to": { "category": args.to_category, "result": results.get(1) },
                }))
            }
            ToolName::LedgerSync => {
                let _: NoArgs = decode(arguments)?;
                self.pool.synchronize(session).await?;
                Ok(json!({ "synchronized": true }))
            }
            ToolName::SessionStats => {
                let _: NoArgs = decode(arguments)?;
                serde_json::to_value(self.pool.stats()).map_err(|_| ToolError::Serialization)
            }
            ToolName::SessionClose => {
                let args: CloseArgs = decode(arguments)?;
                let target = args.session_id.map_or_else(|| session.clone(), SessionId::new);
                let closed = self.pool.shutdown_connection(&target).await;
                Ok(json!({ "session_id": target, "closed": closed }))
            }
        }
    }

    /// Rejects entities unknown to the pool's schema.
    fn check_entity(&self, entity: &str) -> Result<(), ToolError> {
        let schema = &self.pool.options().query_schema;
        if schema.table(entity).is_some() {
            return Ok(());
        }
        Err(ToolError::InvalidParams(format!(
            "unknown entity `{entity}`; available are: {}",
            schema.table_names().join(", ")
        )))
    }

    /// Converts batch steps into engine mutations.
    fn batch_operations(&self, steps: Vec<BatchStep>) -> Result<Vec<EngineOperation>, ToolError> {
        if steps.is_empty() {
            return Err(ToolError::InvalidParams("operations must not be empty".to_string()));
        }
        if steps.len() > MAX_BATCH_STEPS {
            return Err(ToolError::InvalidParams(format!(
                "operations accepts at most {MAX_BATCH_STEPS} steps"
            )));
        }
        steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| {
                if !BATCH_OPERATIONS.contains(&step.operation.as_str()) {
                    return Err(ToolError::InvalidParams(format!(
                        "step {index}: unsupported operation `{}`",
                        step.operation
                    )));
                }
                if let Some(entity) = step.arguments.get("entity").and_then(Value::as_str) {
                    self.check_entity(entity)?;
                }
                Ok(EngineOperation::mutation(step.operation, Value::Object(step.arguments)))
            })
            .collect()
    }
}

/// Builds the paired budget adjustments for a transfer.
fn transfer_operations(args: &TransferArgs) -> Result<Vec<EngineOperation>, ToolError> {
    if args.amount <= 0 {
        return Err(ToolError::InvalidParams("amount must be positive".to_string()));
    }
    if args.from_category == args.to_category {
        return Err(ToolError::InvalidParams(
            "from_category and to_category must differ".to_string(),
        ));
    }
    if args.month.trim().is_empty() {
        return Err(ToolError::InvalidParams("month must not be empty".to_string()));
    }
    let debit = args
        .amount
        .checked_neg()
        .ok_or_else(|| ToolError::InvalidParams("amount out of range".to_string()))?;
    Ok(vec![
        EngineOperation::mutation(
            "budget_adjust",
            json!({ "month": args.month, "category": args.from_category, "amount": debit }),
        ),
        EngineOperation::mutation(
            "budget_adjust",
            json!({ "month": args.month, "category": args.to_category, "amount": args.amount }),
        ),
    ])
}

/// Decodes tool arguments, treating `null` as an empty object.
fn decode<T: DeserializeOwned>(arguments: Value) -> Result<T, ToolError> {
    let arguments = if arguments.is_null() { Value::Object(Map::new()) } else { arguments };
    serde_json::from_value(arguments).map_err(|err| ToolError::InvalidParams(err.to_string()))
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Tool routing errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    /// Tool name not recognized.
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    /// Tool arguments failed to decode or validate.
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    /// Tool payload serialization failed.
    #[error("serialization failure")]
    Serialization,
    /// Pool or connection failure.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

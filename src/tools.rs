//! Tools exposed to MCP clients.
//!
//! Each tool is a small adapter from JSON parameters to a [`SearchEngine`]
//! call, returning JSON. The [`ToolRegistry`] is what the MCP bridge lists
//! and dispatches to.
//!
//! | Tool | Engine call |
//! |------|-------------|
//! | `index_repository` | [`SearchEngine::index`] |
//! | `semantic_search` | [`SearchEngine::search`] |
//! | `get_document` | [`SearchEngine::get_chunk`] |
//! | `list_indexed_repositories` | [`SearchEngine::list_repositories`] |
//! | `delete_repository` | [`SearchEngine::delete_repository`] |

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use reposearch_core::models::{Chunk, SearchResult};
use reposearch_core::plan::ForceFlags;

use crate::engine::SearchEngine;

/// A named, schema-described operation callable by an agent.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Lowercase identifier with underscores.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// Whether calling the tool leaves the index untouched. Defaults to `true`.
    fn is_read_only(&self) -> bool {
        true
    }

    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;

    /// Run the tool. `params` is always a JSON object.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Shared state handed to every tool call.
#[derive(Clone)]
pub struct ToolContext {
    pub engine: Arc<SearchEngine>,
}

impl ToolContext {
    pub fn new(engine: Arc<SearchEngine>) -> Self {
        Self { engine }
    }
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    match params[key].as_str() {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => bail!("{} must not be empty", key),
    }
}

fn flag(params: &Value, key: &str) -> bool {
    params[key].as_bool().unwrap_or(false)
}

fn chunk_json(chunk: &Chunk) -> Value {
    json!({
        "id": chunk.id,
        "repository": chunk.repository,
        "file_path": chunk.file_path(),
        "start_line": chunk.start_line(),
        "end_line": chunk.end_line(),
        "chunk_type": chunk.chunk_type(),
        "content": chunk.content,
        "metadata": chunk.metadata,
    })
}

fn result_json(result: &SearchResult) -> Value {
    let mut value = chunk_json(&result.chunk);
    value["score"] = json!(result.score);
    value
}

/// Index or refresh a GitHub repository.
pub struct IndexRepositoryTool;

#[async_trait]
impl Tool for IndexRepositoryTool {
    fn name(&self) -> &str {
        "index_repository"
    }

    fn description(&self) -> &str {
        "Index a GitHub repository (owner/name or URL), re-running only the stages whose inputs changed"
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repository": { "type": "string", "description": "owner/name or https://github.com/owner/name" },
                "force_refresh": { "type": "boolean", "description": "Redo every stage", "default": false },
                "force_redownload": { "type": "boolean", "default": false },
                "force_rechunk": { "type": "boolean", "default": false },
                "force_reembed": { "type": "boolean", "default": false }
            },
            "required": ["repository"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let repository = required_str(&params, "repository")?;
        let force = if flag(&params, "force_refresh") {
            ForceFlags::refresh()
        } else {
            ForceFlags {
                redownload: flag(&params, "force_redownload"),
                rechunk: flag(&params, "force_rechunk"),
                reembed: flag(&params, "force_reembed"),
            }
        };

        let outcome = ctx.engine.index(repository, force).await?;
        let stages: Vec<&str> = outcome.plan.stages().map(|s| s.as_str()).collect();
        Ok(json!({
            "repository": outcome.record,
            "stages_run": stages,
            "reason": outcome.plan.reason,
        }))
    }
}

/// Semantic search over indexed chunks.
pub struct SemanticSearchTool;

#[async_trait]
impl Tool for SemanticSearchTool {
    fn name(&self) -> &str {
        "semantic_search"
    }

    fn description(&self) -> &str {
        "Search indexed repositories for code and docs semantically similar to the query"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural-language or code query" },
                "repository": { "type": "string", "description": "Restrict to one repository (owner/name)" },
                "limit": { "type": "integer", "description": "Max results" },
                "score_threshold": { "type": "number", "description": "Minimum cosine similarity" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let query = required_str(&params, "query")?;
        let repository = params["repository"].as_str().filter(|s| !s.trim().is_empty());
        let limit = params["limit"].as_u64().map(|l| l as usize);
        let threshold = params["score_threshold"].as_f64().map(|t| t as f32);

        let results = ctx
            .engine
            .search(query, repository, limit, threshold)
            .await?;
        let results: Vec<Value> = results.iter().map(result_json).collect();
        Ok(json!({ "results": results }))
    }
}

/// Fetch one chunk by id.
pub struct GetDocumentTool;

#[async_trait]
impl Tool for GetDocumentTool {
    fn name(&self) -> &str {
        "get_document"
    }

    fn description(&self) -> &str {
        "Retrieve a stored chunk by id, as returned by semantic_search"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": { "type": "string", "description": "Chunk id" }
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let id = required_str(&params, "id")?;
        match ctx.engine.get_chunk(id).await? {
            Some(chunk) => Ok(chunk_json(&chunk)),
            None => bail!("chunk not found: {}", id),
        }
    }
}

/// List every repository with its stage statuses.
pub struct ListRepositoriesTool;

#[async_trait]
impl Tool for ListRepositoriesTool {
    fn name(&self) -> &str {
        "list_indexed_repositories"
    }

    fn description(&self) -> &str {
        "List indexed repositories with revision, counts and per-stage status"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let records = ctx.engine.list_repositories().await?;
        Ok(json!({ "repositories": records }))
    }
}

/// Remove a repository and everything stored for it.
pub struct DeleteRepositoryTool;

#[async_trait]
impl Tool for DeleteRepositoryTool {
    fn name(&self) -> &str {
        "delete_repository"
    }

    fn description(&self) -> &str {
        "Delete an indexed repository's record and chunks"
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "repository": { "type": "string", "description": "owner/name" }
            },
            "required": ["repository"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let repository = required_str(&params, "repository")?;
        let deleted = ctx.engine.delete_repository(repository).await?;
        Ok(json!({ "repository": repository, "deleted": deleted }))
    }
}

/// Ordered collection of tools.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// A registry holding the five repository tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(IndexRepositoryTool));
        registry.register(Box::new(SemanticSearchTool));
        registry.register(Box::new(GetDocumentTool));
        registry.register(Box::new(ListRepositoriesTool));
        registry.register(Box::new(DeleteRepositoryTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

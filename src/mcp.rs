//! MCP JSON-RPC protocol bridge.
//!
//! Exposes the [`ToolRegistry`] as MCP tools via `list_tools` /
//! `call_tool`. Transport-agnostic: the same handler is served over stdio
//! or Streamable HTTP by [`crate::server`].

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::{ErrorData as McpError, ServerHandler};
use tracing::debug;

use crate::tools::{Tool as RepoTool, ToolContext, ToolRegistry};

/// Bridges the tool registry to the MCP protocol.
///
/// Each MCP session receives a clone (everything is behind `Arc`), so all
/// sessions share one engine and therefore one set of per-repository locks.
#[derive(Clone)]
pub struct McpBridge {
    tools: Arc<ToolRegistry>,
    ctx: ToolContext,
}

impl McpBridge {
    pub fn new(tools: Arc<ToolRegistry>, ctx: ToolContext) -> Self {
        Self { tools, ctx }
    }

    fn to_mcp_tool(tool: &dyn RepoTool) -> Tool {
        let input_schema: Arc<serde_json::Map<String, serde_json::Value>> =
            match tool.parameters_schema() {
                serde_json::Value::Object(map) => Arc::new(map),
                _ => Arc::new(serde_json::Map::new()),
            };

        Tool {
            name: Cow::Owned(tool.name().to_string()),
            title: None,
            description: Some(Cow::Owned(tool.description().to_string())),
            input_schema,
            output_schema: None,
            annotations: Some(ToolAnnotations::new().read_only(tool.is_read_only())),
            execution: None,
            icons: None,
            meta: None,
        }
    }
}

impl ServerHandler for McpBridge {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "reposearch".to_string(),
                title: Some("RepoSearch".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "RepoSearch indexes GitHub repositories for semantic code search. \
                 Call index_repository before searching a new repository; it is cheap \
                 to call again since unchanged repositories are skipped. Use \
                 semantic_search to find code, and get_document to read a full chunk."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools: Vec<Tool> = self
            .tools
            .tools()
            .iter()
            .map(|t| Self::to_mcp_tool(t.as_ref()))
            .collect();
        std::future::ready(Ok(ListToolsResult::with_all_items(tools)))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        self.tools.find(name).map(Self::to_mcp_tool)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let tool = self.tools.find(&request.name).ok_or_else(|| {
            McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {}", request.name),
                None,
            )
        })?;

        let params = request
            .arguments
            .map(serde_json::Value::Object)
            .unwrap_or(serde_json::Value::Object(serde_json::Map::new()));

        debug!(tool = %request.name, "tool call");
        match tool.execute(params, &self.ctx).await {
            Ok(result) => {
                let text = serde_json::to_string_pretty(&result).unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            Err(e) => Ok(CallToolResult::error(vec![Content::text(format!("{:#}", e))])),
        }
    }
}

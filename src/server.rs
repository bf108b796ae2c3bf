//! MCP JSON-RPC bridge.
//!
//! Exposes the tool operations in [`crate::tools`] over the Model Context
//! Protocol. The server speaks line-delimited JSON-RPC on stdio (which is
//! why all logging goes to stderr), advertises the five documentation
//! tools, and dispatches `call_tool` requests to the shared core functions.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::*;
use rmcp::transport::stdio;
use rmcp::{ErrorData as McpError, ServerHandler, ServiceExt};
use serde::Deserialize;
use tracing::info;

use crate::app::App;
use crate::tools;

/// Shared state handed to every MCP session.
#[derive(Clone)]
pub struct McpServer {
    app: Arc<App>,
}

impl McpServer {
    pub fn new(app: Arc<App>) -> Self {
        Self { app }
    }

    fn tool_descriptors() -> Vec<Tool> {
        vec![
            make_tool(
                "search_docs",
                "Search documentation and return relevant passages with source URLs. \
                 Results are ranked by BM25 relevance.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "The search query to find relevant documentation"
                        },
                        "limit": {
                            "type": "integer",
                            "description": "Maximum number of results to return",
                            "minimum": 1,
                            "maximum": 50,
                            "default": 5
                        },
                        "source": {
                            "type": "string",
                            "description": "Optional source name to filter results"
                        }
                    },
                    "required": ["query"]
                }),
            ),
            make_tool(
                "get_doc",
                "Get the content of a document by its URL, paginated by character offset. \
                 Use after search_docs when a snippet is not enough.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "url": {
                            "type": "string",
                            "description": "The URL of the document (as returned by search_docs)"
                        },
                        "offset": {
                            "type": "integer",
                            "description": "Character offset to start from",
                            "minimum": 0,
                            "default": 0
                        },
                        "limit": {
                            "type": "integer",
                            "description": "Maximum characters to return",
                            "minimum": 1000,
                            "maximum": 100000,
                            "default": 10000
                        }
                    },
                    "required": ["url"]
                }),
            ),
            make_tool(
                "get_doc_excerpt",
                "Get relevant excerpts from a large document matching a query, instead of \
                 the full content.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "url": {
                            "type": "string",
                            "description": "The URL of the document"
                        },
                        "query": {
                            "type": "string",
                            "description": "Query to find relevant sections within the document"
                        },
                        "max_chunks": {
                            "type": "integer",
                            "description": "Maximum chunks to return",
                            "minimum": 1,
                            "maximum": 20,
                            "default": 5
                        },
                        "context_chars": {
                            "type": "integer",
                            "description": "Extra context characters around each chunk",
                            "minimum": 0,
                            "maximum": 2000,
                            "default": 500
                        }
                    },
                    "required": ["url", "query"]
                }),
            ),
            make_tool(
                "list_sources",
                "List all configured documentation sources with their statistics.",
                serde_json::json!({ "type": "object", "properties": {} }),
            ),
            make_tool(
                "refresh_sources",
                "Manually trigger a refresh of all documentation sources.",
                serde_json::json!({ "type": "object", "properties": {} }),
            ),
        ]
    }
}

fn make_tool(name: &'static str, description: &'static str, schema: serde_json::Value) -> Tool {
    let input_schema: Arc<serde_json::Map<String, serde_json::Value>> = match schema {
        serde_json::Value::Object(map) => Arc::new(map),
        _ => Arc::new(serde_json::Map::new()),
    };
    let read_only = name != "refresh_sources";

    Tool {
        name: Cow::Borrowed(name),
        title: None,
        description: Some(Cow::Borrowed(description)),
        input_schema,
        output_schema: None,
        annotations: Some(ToolAnnotations::new().read_only(read_only)),
        execution: None,
        icons: None,
        meta: None,
    }
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
    #[serde(default = "default_search_limit")]
    limit: usize,
    #[serde(default)]
    source: Option<String>,
}

fn default_search_limit() -> usize {
    5
}

#[derive(Deserialize)]
struct GetDocArgs {
    url: String,
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_get_doc_limit")]
    limit: usize,
}

fn default_get_doc_limit() -> usize {
    10_000
}

#[derive(Deserialize)]
struct ExcerptArgs {
    url: String,
    query: String,
    #[serde(default = "default_max_chunks")]
    max_chunks: usize,
    #[serde(default = "default_context_chars")]
    context_chars: usize,
}

fn default_max_chunks() -> usize {
    5
}

fn default_context_chars() -> usize {
    500
}

fn parse_args<T: serde::de::DeserializeOwned>(
    arguments: Option<serde_json::Map<String, serde_json::Value>>,
) -> Result<T, McpError> {
    let value = serde_json::Value::Object(arguments.unwrap_or_default());
    serde_json::from_value(value)
        .map_err(|e| McpError::new(ErrorCode::INVALID_PARAMS, e.to_string(), None))
}

fn json_result<T: serde::Serialize>(value: &T) -> CallToolResult {
    let text = serde_json::to_string_pretty(value).unwrap_or_default();
    CallToolResult::success(vec![Content::text(text)])
}

impl ServerHandler for McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "llmdoc".to_string(),
                title: Some("llmdoc".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                description: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "llmdoc provides documentation search across configured llms.txt sources. \
                 Use search_docs to find relevant passages (optionally filtered by source \
                 name), get_doc to retrieve a document's content by URL, get_doc_excerpt \
                 for targeted excerpts from large documents, list_sources to see what is \
                 available, and refresh_sources to re-fetch everything."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(Self::tool_descriptors())))
    }

    fn get_tool(&self, name: &str) -> Option<Tool> {
        Self::tool_descriptors().into_iter().find(|t| t.name == name)
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: rmcp::service::RequestContext<rmcp::RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        match request.name.as_ref() {
            "search_docs" => {
                let args: SearchArgs = parse_args(request.arguments)?;
                match tools::search_docs(&self.app, &args.query, args.limit, args.source.as_deref())
                    .await
                {
                    Ok(results) => Ok(json_result(&results)),
                    Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
                }
            }
            "get_doc" => {
                let args: GetDocArgs = parse_args(request.arguments)?;
                match tools::get_doc(&self.app, &args.url, args.offset, args.limit).await {
                    Ok(doc) => Ok(json_result(&doc)),
                    Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
                }
            }
            "get_doc_excerpt" => {
                let args: ExcerptArgs = parse_args(request.arguments)?;
                match tools::get_doc_excerpt(
                    &self.app,
                    &args.url,
                    &args.query,
                    args.max_chunks,
                    args.context_chars,
                )
                .await
                {
                    Ok(result) => Ok(json_result(&result)),
                    Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
                }
            }
            "list_sources" => match tools::list_sources(&self.app).await {
                Ok(sources) => Ok(json_result(&sources)),
                Err(e) => Ok(CallToolResult::error(vec![Content::text(e.to_string())])),
            },
            "refresh_sources" => match tools::refresh_sources(&self.app).await {
                Ok(result) => Ok(json_result(&result)),
                Err(e) => Ok(CallToolResult::error(vec![Content::text(format!("{e:#}"))])),
            },
            other => Err(McpError::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("no tool registered with name: {other}"),
                None,
            )),
        }
    }
}

/// Serve MCP over stdio until the client disconnects.
pub async fn serve_stdio(app: Arc<App>) -> anyhow::Result<()> {
    info!("serving MCP over stdio");
    let service = McpServer::new(app).serve(stdio()).await?;
    service.waiting().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_descriptors_complete() {
        let tools = McpServer::tool_descriptors();
        let names: Vec<&str> = tools.iter().map(|t| t.name.as_ref()).collect();
        assert_eq!(
            names,
            vec![
                "search_docs",
                "get_doc",
                "get_doc_excerpt",
                "list_sources",
                "refresh_sources"
            ]
        );
        for tool in &tools {
            assert!(tool.description.is_some());
            assert!(tool.input_schema.contains_key("type"));
        }
    }

    #[test]
    fn test_parse_args_defaults() {
        let args: SearchArgs = parse_args(Some(
            serde_json::json!({ "query": "hello" }).as_object().unwrap().clone(),
        ))
        .unwrap();
        assert_eq!(args.query, "hello");
        assert_eq!(args.limit, 5);
        assert!(args.source.is_none());
    }

    #[test]
    fn test_parse_args_missing_required_field() {
        let result: Result<SearchArgs, _> = parse_args(Some(serde_json::Map::new()));
        assert!(result.is_err());
    }
}

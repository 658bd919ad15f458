use std::sync::Arc;

use clap::Subcommand;
use serde_json::{Map, Value, json};
use superset_bridge_core::{ConfigError, Credentials, SupersetClient};
use tokio::io::{self, AsyncBufRead, AsyncWrite, BufReader};
use uuid::Uuid;

pub mod tools;
mod util;

use tools::Dispatcher;
pub use tools::{SupersetTool, TextContent, ToolDescriptor, ToolError, tool_definitions};
use util::{Frame, read_message, to_pretty_json, write_message};

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
pub const MCP_SERVER_NAME: &str = "superset-mcp-bridge";

#[derive(Subcommand, Clone, Debug, Default, PartialEq, Eq)]
pub enum McpCommands {
    /// Run the Superset MCP server over stdio (default)
    #[default]
    Serve,
    /// Authenticate once against Superset and print a status report
    Check,
    /// Print the tool catalog as JSON
    Tools,
}

/// Catalog as printed by the `tools` subcommand; same shape as `tools/list`.
pub fn tools_catalog() -> Value {
    json!({ "tools": tool_definitions() })
}

/// Run a subcommand to completion and return the process exit code.
/// `tools` ignores `credentials`; `serve` and `check` exit 1 when they are invalid.
pub async fn run(credentials: Result<Credentials, ConfigError>, command: McpCommands) -> i32 {
    if command == McpCommands::Tools {
        println!("{}", to_pretty_json(&tools_catalog()));
        return 0;
    }
    let Some(client) = connect(credentials) else {
        return 1;
    };

    let code = if command == McpCommands::Check {
        check(&client).await
    } else {
        serve_until_interrupted(client.clone()).await
    };

    client.close().await;
    tracing::info!("Superset bridge stopped");
    code
}

fn connect(credentials: Result<Credentials, ConfigError>) -> Option<Arc<SupersetClient>> {
    let credentials = match credentials {
        Ok(credentials) => credentials,
        Err(err) => {
            let payload = json!({
                "error": "config_error",
                "message": err.to_string(),
                "docs_hint": "Set SUPERSET_BASE_URL, SUPERSET_USERNAME and SUPERSET_PASSWORD (a .env file is honored).",
            });
            eprintln!("{}", to_pretty_json(&payload));
            return None;
        }
    };
    tracing::info!(
        base_url = %credentials.base_url(),
        username = %credentials.username(),
        timeout_secs = credentials.timeout().as_secs(),
        "Superset bridge configured"
    );
    match SupersetClient::new(credentials) {
        Ok(client) => Some(Arc::new(client)),
        Err(err) => {
            tracing::error!(error = %err, "Failed to build HTTP client");
            None
        }
    }
}

async fn serve_until_interrupted(client: Arc<SupersetClient>) -> i32 {
    let server = McpServer::new(client);
    let result = tokio::select! {
        result = server.serve_stdio() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            Ok(())
        }
    };
    match result {
        Ok(()) => 0,
        Err(err) => {
            let payload = json!({
                "error": "mcp_server_error",
                "message": err.to_string(),
            });
            eprintln!("{}", to_pretty_json(&payload));
            1
        }
    }
}

async fn check(client: &SupersetClient) -> i32 {
    let authenticated = client.authenticate().await;
    let report = json!({
        "status": if authenticated { "ready" } else { "auth_failed" },
        "server": MCP_SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "base_url": client.credentials().base_url(),
        "username": client.credentials().username(),
        "tools": SupersetTool::ALL.len(),
    });
    println!("{}", to_pretty_json(&report));
    if authenticated { 0 } else { 2 }
}

#[derive(Debug)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }
}

pub struct McpServer {
    dispatcher: Dispatcher,
    session_id: String,
}

impl McpServer {
    pub fn new(client: Arc<SupersetClient>) -> Self {
        Self {
            dispatcher: Dispatcher::new(client),
            session_id: format!("stdio-{}", Uuid::now_v7()),
        }
    }

    pub async fn serve_stdio(&self) -> io::Result<()> {
        let reader = BufReader::new(io::stdin());
        let mut stdout = io::stdout();
        self.serve(reader, &mut stdout).await
    }

    /// Process messages one at a time until EOF.
    pub async fn serve<R, W>(&self, mut reader: R, writer: &mut W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(session_id = %self.session_id, "MCP server listening on stdio");

        while let Some((framing, frame)) = read_message(&mut reader).await? {
            let response = match frame {
                Frame::Message(incoming) => self.handle_incoming_message(incoming).await,
                Frame::Malformed(reason) => {
                    tracing::warn!(%reason, "Discarding unparsable MCP message");
                    Some(error_response(
                        Value::Null,
                        RpcError::parse_error(format!("Parse error: {reason}")),
                    ))
                }
            };
            if let Some(response) = response {
                write_message(writer, framing, &response).await?;
            }
        }

        tracing::info!(session_id = %self.session_id, "MCP client closed stdin");
        Ok(())
    }

    /// Handle one decoded message (single or batch). `None` when nothing
    /// should be written back, e.g. for notifications.
    pub async fn handle_incoming_message(&self, incoming: Value) -> Option<Value> {
        let Value::Array(batch) = incoming else {
            return self.handle_single_message(incoming).await;
        };
        if batch.is_empty() {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Batch request must not be empty"),
            ));
        }

        let mut responses = Vec::new();
        for item in batch {
            if let Some(response) = self.handle_single_message(item).await {
                responses.push(response);
            }
        }
        if responses.is_empty() {
            None
        } else {
            Some(Value::Array(responses))
        }
    }

    async fn handle_single_message(&self, incoming: Value) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // A client response; this server never issues requests.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        match obj.get("id").cloned() {
            Some(id) => Some(match self.handle_request(method, params).await {
                Ok(payload) => success_response(id, payload),
                Err(err) => error_response(id, err),
            }),
            None => {
                tracing::debug!(method, "MCP notification");
                None
            }
        }
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list_payload()),
            "tools/call" => self.handle_tools_call(params).await,
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": {
                    "listChanged": false
                }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": "Read-only access to Apache Superset dashboards, charts, datasets and databases, plus synchronous SQL Lab queries capped at 1000 rows. Use list_databases to find a database_id before execute_sql."
        })
    }

    fn tools_list_payload(&self) -> Value {
        json!({ "tools": self.dispatcher.list_tools() })
    }

    async fn handle_tools_call(&self, params: Value) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        let content = self.dispatcher.call_tool(name, &args).await;
        Ok(json!({
            "content": content,
            "isError": false
        }))
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_response(id: Value, error: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    })
}

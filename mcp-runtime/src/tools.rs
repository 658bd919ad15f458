//! Superset tool catalog and dispatcher.
//!
//! Every tool maps to exactly one Superset REST call. Handlers return a
//! `Result`; [`Dispatcher::call_tool`] is the only place results and
//! failures are turned into reply text.

use std::sync::Arc;

use reqwest::Method;
use serde::Serialize;
use serde_json::{Map, Value, json};
use superset_bridge_core::{ClientError, SupersetClient};
use thiserror::Error;

use crate::util::to_pretty_json;

pub const SQL_QUERY_LIMIT: u64 = 1000;
pub const SQL_EDITOR_ID: &str = "mcp-bridge";
pub const SQL_TAB_NAME: &str = "MCP Bridge";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SupersetTool {
    ListDashboards,
    GetDashboard,
    ListCharts,
    GetChart,
    ListDatasets,
    ListDatabases,
    ExecuteSql,
}

/// Which part of the Superset payload a tool replies with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ResultShape {
    /// `result`, or `[]` when absent.
    List,
    /// `result`, or `{}` when absent.
    Object,
    /// The whole payload.
    Raw,
}

impl SupersetTool {
    pub const ALL: [SupersetTool; 7] = [
        SupersetTool::ListDashboards,
        SupersetTool::GetDashboard,
        SupersetTool::ListCharts,
        SupersetTool::GetChart,
        SupersetTool::ListDatasets,
        SupersetTool::ListDatabases,
        SupersetTool::ExecuteSql,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            SupersetTool::ListDashboards => "list_dashboards",
            SupersetTool::GetDashboard => "get_dashboard",
            SupersetTool::ListCharts => "list_charts",
            SupersetTool::GetChart => "get_chart",
            SupersetTool::ListDatasets => "list_datasets",
            SupersetTool::ListDatabases => "list_databases",
            SupersetTool::ExecuteSql => "execute_sql",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            SupersetTool::ListDashboards => "List all dashboards in Superset",
            SupersetTool::GetDashboard => "Get details of a specific dashboard by ID",
            SupersetTool::ListCharts => "List all charts in Superset",
            SupersetTool::GetChart => "Get details of a specific chart by ID",
            SupersetTool::ListDatasets => "List all datasets in Superset",
            SupersetTool::ListDatabases => "List all database connections in Superset",
            SupersetTool::ExecuteSql => "Execute a SQL query on a specific database",
        }
    }

    pub fn required_args(self) -> &'static [&'static str] {
        match self {
            SupersetTool::GetDashboard => &["dashboard_id"],
            SupersetTool::GetChart => &["chart_id"],
            SupersetTool::ExecuteSql => &["database_id", "sql"],
            SupersetTool::ListDashboards
            | SupersetTool::ListCharts
            | SupersetTool::ListDatasets
            | SupersetTool::ListDatabases => &[],
        }
    }

    pub fn input_schema(self) -> Value {
        match self {
            SupersetTool::GetDashboard => json!({
                "type": "object",
                "properties": {
                    "dashboard_id": {
                        "type": "integer",
                        "description": "The ID of the dashboard"
                    }
                },
                "required": ["dashboard_id"]
            }),
            SupersetTool::GetChart => json!({
                "type": "object",
                "properties": {
                    "chart_id": {
                        "type": "integer",
                        "description": "The ID of the chart"
                    }
                },
                "required": ["chart_id"]
            }),
            SupersetTool::ExecuteSql => json!({
                "type": "object",
                "properties": {
                    "database_id": {
                        "type": "integer",
                        "description": "The ID of the database to query"
                    },
                    "sql": {
                        "type": "string",
                        "description": "The SQL query to execute"
                    }
                },
                "required": ["database_id", "sql"]
            }),
            SupersetTool::ListDashboards
            | SupersetTool::ListCharts
            | SupersetTool::ListDatasets
            | SupersetTool::ListDatabases => json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    fn result_shape(self) -> ResultShape {
        match self {
            SupersetTool::GetDashboard | SupersetTool::GetChart => ResultShape::Object,
            SupersetTool::ExecuteSql => ResultShape::Raw,
            SupersetTool::ListDashboards
            | SupersetTool::ListCharts
            | SupersetTool::ListDatasets
            | SupersetTool::ListDatabases => ResultShape::List,
        }
    }

    /// Resolve the HTTP call for this tool from the caller's arguments.
    fn api_call(self, args: &Map<String, Value>) -> Result<ApiCall, ToolError> {
        let call = match self {
            SupersetTool::ListDashboards => ApiCall::get("/api/v1/dashboard/".to_string()),
            SupersetTool::GetDashboard => {
                let id = path_id(args, "dashboard_id")?;
                ApiCall::get(format!("/api/v1/dashboard/{id}"))
            }
            SupersetTool::ListCharts => ApiCall::get("/api/v1/chart/".to_string()),
            SupersetTool::GetChart => {
                let id = path_id(args, "chart_id")?;
                ApiCall::get(format!("/api/v1/chart/{id}"))
            }
            SupersetTool::ListDatasets => ApiCall::get("/api/v1/dataset/".to_string()),
            SupersetTool::ListDatabases => ApiCall::get("/api/v1/database/".to_string()),
            SupersetTool::ExecuteSql => {
                let database_id = required_value(args, "database_id")?;
                let sql = required_value(args, "sql")?;
                ApiCall {
                    method: Method::POST,
                    path: "/api/v1/sqllab/execute/".to_string(),
                    body: Some(sql_execute_body(database_id, sql)),
                }
            }
        };
        Ok(call)
    }
}

#[derive(Debug)]
struct ApiCall {
    method: Method,
    path: String,
    body: Option<Value>,
}

impl ApiCall {
    fn get(path: String) -> Self {
        Self {
            method: Method::GET,
            path,
            body: None,
        }
    }
}

/// SQL Lab request body. Everything except the caller's database and SQL
/// is fixed: synchronous run, 1000-row cap, no CTAS.
fn sql_execute_body(database_id: &Value, sql: &Value) -> Value {
    json!({
        "database_id": database_id,
        "sql": sql,
        "runAsync": false,
        "schema": null,
        "sql_editor_id": SQL_EDITOR_ID,
        "tab": SQL_TAB_NAME,
        "tmp_table_name": "",
        "select_as_cta": false,
        "ctas_method": "TABLE",
        "queryLimit": SQL_QUERY_LIMIT,
        "expand_data": true
    })
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Missing required argument '{0}'")]
    MissingArgument(&'static str),

    #[error("'{name}' must be {expected}")]
    InvalidArgument {
        name: &'static str,
        expected: &'static str,
    },

    #[error(transparent)]
    Upstream(#[from] ClientError),
}

fn required_value<'a>(
    args: &'a Map<String, Value>,
    key: &'static str,
) -> Result<&'a Value, ToolError> {
    args.get(key).ok_or(ToolError::MissingArgument(key))
}

fn path_id(args: &Map<String, Value>, key: &'static str) -> Result<String, ToolError> {
    let invalid = || ToolError::InvalidArgument {
        name: key,
        expected: "an integer",
    };
    match required_value(args, key)? {
        Value::Number(n) if n.is_i64() || n.is_u64() => Ok(n.to_string()),
        // Same range as a JSON number that is i64 or u64.
        Value::String(s) => match s.trim().parse::<i128>() {
            Ok(id) if (i128::from(i64::MIN)..=i128::from(u64::MAX)).contains(&id) => {
                Ok(id.to_string())
            }
            _ => Err(invalid()),
        },
        _ => Err(invalid()),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDescriptor {
    pub name: &'static str,
    pub description: &'static str,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    kind: &'static str,
    pub text: String,
}

impl TextContent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text",
            text: text.into(),
        }
    }
}

pub fn tool_definitions() -> Vec<ToolDescriptor> {
    SupersetTool::ALL
        .into_iter()
        .map(|tool| ToolDescriptor {
            name: tool.name(),
            description: tool.description(),
            input_schema: tool.input_schema(),
        })
        .collect()
}

#[derive(Clone)]
pub struct Dispatcher {
    client: Arc<SupersetClient>,
}

impl Dispatcher {
    pub fn new(client: Arc<SupersetClient>) -> Self {
        Self { client }
    }

    pub fn list_tools(&self) -> Vec<ToolDescriptor> {
        tool_definitions()
    }

    /// Run a tool and render the outcome as reply text. Never fails: unknown
    /// tools, bad arguments and upstream errors all come back as text.
    pub async fn call_tool(&self, name: &str, args: &Map<String, Value>) -> Vec<TextContent> {
        let Some(tool) = SupersetTool::from_name(name) else {
            tracing::warn!(tool = name, "Unknown tool requested");
            return vec![TextContent::text(format!("Unknown tool: {name}"))];
        };

        tracing::info!(tool = name, "Tool call");
        match self.invoke(tool, args).await {
            Ok(payload) => vec![TextContent::text(to_pretty_json(&payload))],
            Err(err) => {
                tracing::warn!(tool = name, error = %err, "Tool call failed");
                vec![TextContent::text(format!("Error: {err}"))]
            }
        }
    }

    pub async fn invoke(
        &self,
        tool: SupersetTool,
        args: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let call = tool.api_call(args)?;
        let data = self
            .client
            .request(call.method, &call.path, call.body.as_ref())
            .await?;

        Ok(match tool.result_shape() {
            ResultShape::List => data.get("result").cloned().unwrap_or_else(|| json!([])),
            ResultShape::Object => data.get("result").cloned().unwrap_or_else(|| json!({})),
            ResultShape::Raw => data,
        })
    }
}

use clap::Parser;
use superset_bridge_core::Credentials;
use superset_bridge_mcp_runtime::{McpCommands, run};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str =
    "superset_mcp_bridge=info,superset_bridge_mcp_runtime=info,superset_bridge_core=info";

#[derive(Parser)]
#[command(
    name = "superset-mcp-bridge",
    version,
    about = "Superset MCP bridge — Apache Superset tools for MCP clients over stdio"
)]
struct Cli {
    /// Superset base URL (e.g. https://superset.example.com)
    #[arg(long, env = "SUPERSET_BASE_URL")]
    base_url: Option<String>,

    /// Superset username (database auth provider)
    #[arg(long, env = "SUPERSET_USERNAME")]
    username: Option<String>,

    /// Superset password
    #[arg(long, env = "SUPERSET_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Per-request timeout in seconds (default 30)
    #[arg(long, env = "REQUEST_TIMEOUT")]
    request_timeout: Option<u64>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, env = "SUPERSET_MCP_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<McpCommands>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    // stdout carries protocol frames
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let command = cli.command.unwrap_or_default();
    tracing::debug!(?command, "superset-mcp-bridge starting");
    let credentials = Credentials::new(
        cli.base_url.as_deref(),
        cli.username.as_deref(),
        cli.password.as_deref(),
        cli.request_timeout,
    );

    let code = run(credentials, command).await;
    std::process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn subcommand_defaults_to_serve() {
        let cli = Cli::try_parse_from([
            "superset-mcp-bridge",
            "--base-url",
            "http://localhost:8088",
            "--username",
            "admin",
            "--password",
            "admin",
        ])
        .unwrap();
        assert_eq!(cli.command.unwrap_or_default(), McpCommands::Serve);
        assert_eq!(cli.base_url.as_deref(), Some("http://localhost:8088"));
    }

    #[test]
    fn parses_check_subcommand_and_timeout() {
        let cli = Cli::try_parse_from([
            "superset-mcp-bridge",
            "--request-timeout",
            "5",
            "check",
        ])
        .unwrap();
        assert_eq!(cli.command, Some(McpCommands::Check));
        assert_eq!(cli.request_timeout, Some(5));
    }

    #[test]
    fn rejects_non_numeric_timeout() {
        let result =
            Cli::try_parse_from(["superset-mcp-bridge", "--request-timeout", "soon", "tools"]);
        assert!(result.is_err());
    }
}

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use clap::Parser;
use postal_mcp::{relay, Database, MailboxServer, RelayService};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, StreamableHttpService,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "postal-mcp")]
#[command(about = "A durable mailbox MCP server for asynchronous agent-to-agent messaging")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7777")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Mailbox database path (defaults to the per-user data directory)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Interval in milliseconds between poll attempts of a blocked check_mail
    #[arg(long, default_value = "1000")]
    poll_interval_ms: u64,
}

#[derive(Clone)]
struct AppState {
    relay: Arc<RelayService>,
    sessions: Arc<LocalSessionManager>,
}

/// Resolves the caller's identity from the `{agent}` path segment.
fn resolve_agent(raw: &str) -> Result<&str, relay::RelayError> {
    if raw.is_empty() {
        return Err(relay::RelayError::NoIdentity);
    }
    relay::validate_agent_name(raw)?;
    Ok(raw)
}

/// Dispatches one request to an MCP service bound to the resolved identity.
async fn agent_endpoint(
    Path(agent): Path<String>,
    State(state): State<AppState>,
    request: Request,
) -> Response {
    if let Err(e) = resolve_agent(&agent) {
        tracing::warn!(%agent, "rejected request: {e}");
        return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
    }

    let relay = Arc::clone(&state.relay);
    let service = StreamableHttpService::new(
        move || Ok(MailboxServer::new(Arc::clone(&relay), agent.clone())),
        state.sessions.clone(),
        Default::default(),
    );

    match service.oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let db = match args.db_path {
        Some(path) => Database::open(path)?,
        None => Database::new()?,
    };
    let relay = Arc::new(RelayService::with_poll_interval(
        db,
        Duration::from_millis(args.poll_interval_ms),
    ));

    let state = AppState {
        relay,
        sessions: Arc::new(LocalSessionManager::default()),
    };

    let app = Router::new()
        .route("/agents/{agent}/mcp", any(agent_endpoint))
        .with_state(state);
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Postal MCP server listening on http://{}/agents/{{agent}}/mcp", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

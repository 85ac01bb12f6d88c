//! MCP tool handlers for postal-mcp.

use crate::relay::{RelayError, RelayService};
use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolResult, Content, ErrorData as McpError, Implementation, ProtocolVersion,
        ServerCapabilities, ServerInfo,
    },
    schemars, tool, tool_handler, tool_router, ServerHandler,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SendToAgentParams {
    /// Recipient agent name (alphanumeric, `-` and `_` only).
    pub name: String,
    /// Message content.
    pub msg: String,
    /// Message id. Generated when omitted.
    #[serde(default)]
    pub msg_id: Option<String>,
}

/// MCP server for one resolved agent identity.
///
/// The transport layer extracts the caller's name from the request path and
/// constructs one of these per session, so the relay never has to consult
/// ambient request state to learn who is calling.
#[derive(Clone)]
pub struct MailboxServer {
    relay: Arc<RelayService>,
    agent: String,
    tool_router: ToolRouter<Self>,
}

impl MailboxServer {
    #[must_use]
    pub fn new(relay: Arc<RelayService>, agent: String) -> Self {
        Self {
            relay,
            agent,
            tool_router: Self::tool_router(),
        }
    }
}

fn json_response(value: &serde_json::Value) -> CallToolResult {
    CallToolResult::success(vec![Content::text(value.to_string())])
}

fn relay_error(e: &RelayError) -> McpError {
    match e {
        RelayError::InvalidName(_) => McpError::invalid_params(e.to_string(), None),
        _ => McpError::internal_error(e.to_string(), None),
    }
}

#[tool_router]
impl MailboxServer {
    /// Send a message to another agent.
    #[tool(
        description = "Sends a message to another agent's mailbox. Returns {\"message_id\": \"...\"}. Fails if the recipient name is empty or contains characters other than alphanumerics, '-' and '_'."
    )]
    async fn send_to_agent(
        &self,
        Parameters(params): Parameters<SendToAgentParams>,
    ) -> Result<CallToolResult, McpError> {
        let message_id = self
            .relay
            .send(
                &self.agent,
                &params.name,
                &params.msg,
                params.msg_id.as_deref(),
            )
            .map_err(|e| relay_error(&e))?;

        tracing::info!(from = %self.agent, to = %params.name, %message_id, "message queued");
        Ok(json_response(&json!({ "message_id": message_id })))
    }

    /// Wait for and claim the oldest unread message.
    #[tool(
        description = "Checks for the oldest unread message addressed to the calling agent, waiting until one is available. Returns the claimed message as {\"id\", \"from_agent\", \"content\", \"created\"}. Each message is delivered at most once."
    )]
    async fn check_mail(&self) -> Result<CallToolResult, McpError> {
        let message = self
            .relay
            .check_blocking(&self.agent)
            .await
            .map_err(|e| relay_error(&e))?;

        tracing::info!(to = %self.agent, id = %message.id, "message delivered");
        let value = serde_json::to_value(&message)
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        Ok(json_response(&value))
    }
}

#[tool_handler]
impl ServerHandler for MailboxServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "Postal relay for asynchronous agent-to-agent messages. Use send_to_agent to \
                 queue a message for a named agent and check_mail to wait for your own."
                    .to_string(),
            ),
        }
    }
}

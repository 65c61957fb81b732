//! Agent CLI commands.

use anyhow::{anyhow, Context, Result};
use clap::{Args, Subcommand};
use serde_json::Value;

use crate::cli::output::{output, CommandOutput};
use crate::cli::runtime::Runtime;
use crate::domain::models::Agent;
use crate::domain::ports::AgentRepository;
use crate::infrastructure::agent_server::{AgentServerClient, ControlAction};
use crate::services::LivenessEntry;

#[derive(Args, Debug)]
pub struct AgentArgs {
    #[command(subcommand)]
    pub command: AgentCommands,
}

#[derive(Subcommand, Debug)]
pub enum AgentCommands {
    /// Show the effective liveness of an agent
    Liveness {
        /// Agent id
        agent_id: i64,
    },
    /// Re-enable an agent
    Enable {
        /// Agent id
        agent_id: i64,
    },
    /// Disable an agent
    Disable {
        /// Agent id
        agent_id: i64,
    },
    /// Ask the agent's Agent-Server for its status
    Status {
        /// Agent id
        agent_id: i64,
        /// Agent-Server base URL; defaults to the agent's recorded endpoint
        #[arg(long)]
        server: Option<String>,
    },
    /// Start, stop or restart an agent through its Agent-Server
    Control {
        /// Agent id
        agent_id: i64,
        /// start, stop or restart
        #[arg(short, long, value_parser = parse_action)]
        action: ControlAction,
        /// Reason recorded by the Agent-Server
        #[arg(short, long)]
        reason: Option<String>,
        /// Agent-Server base URL; defaults to the agent's recorded endpoint
        #[arg(long)]
        server: Option<String>,
    },
}

fn parse_action(s: &str) -> Result<ControlAction, String> {
    ControlAction::from_str(s).ok_or_else(|| format!("invalid action '{s}' (expected start, stop or restart)"))
}

#[derive(Debug, serde::Serialize)]
pub struct LivenessOutput {
    pub success: bool,
    pub message: String,
    pub liveness: Option<LivenessEntry>,
}

impl CommandOutput for LivenessOutput {
    fn to_human(&self) -> String {
        match &self.liveness {
            Some(entry) => format!(
                "{}\n  Status:     {}\n  Updated at: {}\n  Source:     {:?}",
                self.message,
                entry.status,
                entry.updated_at.to_rfc3339(),
                entry.source
            ),
            None => self.message.clone(),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct RemoteOutput {
    pub agent_id: i64,
    pub server: String,
    pub response: Value,
}

impl CommandOutput for RemoteOutput {
    fn to_human(&self) -> String {
        let body = serde_json::to_string_pretty(&self.response).unwrap_or_default();
        format!("Agent {} via {}:\n{body}", self.agent_id, self.server)
    }
}

async fn load_agent(runtime: &Runtime, agent_id: i64) -> Result<Agent> {
    runtime
        .agents
        .get(agent_id)
        .await?
        .ok_or_else(|| anyhow!("Agent not found: {agent_id}"))
}

fn server_for(agent: &Agent, server: Option<String>) -> Result<String> {
    server
        .or_else(|| agent.endpoint.clone())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| anyhow!("Agent {} has no recorded Agent-Server endpoint; pass --server", agent.id))
}

pub async fn execute(args: AgentArgs, runtime: Runtime, json_mode: bool) -> Result<()> {
    match args.command {
        AgentCommands::Liveness { agent_id } => {
            let liveness = runtime.liveness.get_liveness(agent_id).await?;
            let out = LivenessOutput {
                success: liveness.is_some(),
                message: if liveness.is_some() {
                    format!("Agent {agent_id}")
                } else {
                    format!("Agent not found: {agent_id}")
                },
                liveness,
            };
            output(&out, json_mode);
        }

        AgentCommands::Enable { agent_id } => {
            let entry = runtime.liveness.enable_agent(agent_id).await?;
            let out = LivenessOutput {
                success: true,
                message: format!("Agent enabled: {agent_id}"),
                liveness: Some(entry),
            };
            output(&out, json_mode);
        }

        AgentCommands::Disable { agent_id } => {
            let entry = runtime.liveness.disable_agent(agent_id).await?;
            let out = LivenessOutput {
                success: true,
                message: format!("Agent disabled: {agent_id}"),
                liveness: Some(entry),
            };
            output(&out, json_mode);
        }

        AgentCommands::Status { agent_id, server } => {
            let agent = load_agent(&runtime, agent_id).await?;
            let server = server_for(&agent, server)?;
            let client = AgentServerClient::new(&runtime.config.agent_server)?;
            let response = client
                .agent_status(&server, agent.host_id)
                .await
                .with_context(|| format!("Status request to {server} failed"))?;
            output(&RemoteOutput { agent_id, server, response }, json_mode);
        }

        AgentCommands::Control {
            agent_id,
            action,
            reason,
            server,
        } => {
            let agent = load_agent(&runtime, agent_id).await?;
            let server = server_for(&agent, server)?;
            let client = AgentServerClient::new(&runtime.config.agent_server)?;
            if !client.is_signing() {
                tracing::warn!("agent_server.shared_secret is unset; sending unsigned control request");
            }
            let response = client
                .control_agent(&server, agent.host_id, action, reason.as_deref())
                .await
                .with_context(|| format!("{} request to {server} failed", action.as_str()))?;
            output(&RemoteOutput { agent_id, server, response }, json_mode);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_action() {
        assert_eq!(parse_action("stop"), Ok(ControlAction::Stop));
        assert!(parse_action("halt").is_err());
    }

    #[test]
    fn test_server_for_prefers_flag() {
        let agent = Agent::new(7, 70, "web-7").with_endpoint("10.0.0.7:8090");
        assert_eq!(server_for(&agent, None).unwrap(), "10.0.0.7:8090");
        assert_eq!(server_for(&agent, Some("http://as:1".into())).unwrap(), "http://as:1");
        assert!(server_for(&Agent::new(8, 80, "db-8"), None).is_err());
    }

    #[tokio::test]
    async fn test_status_uses_recorded_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/agents/70")
            .with_status(200)
            .with_body(r#"{"running":true}"#)
            .create_async()
            .await;

        let runtime = Runtime::in_memory(crate::domain::models::Config::default());
        runtime
            .agents
            .upsert(&Agent::new(7, 70, "web-7").with_endpoint(server.url()))
            .await
            .unwrap();

        let args = AgentArgs {
            command: AgentCommands::Status {
                agent_id: 7,
                server: None,
            },
        };
        execute(args, runtime, true).await.unwrap();
        mock.assert_async().await;
    }
}

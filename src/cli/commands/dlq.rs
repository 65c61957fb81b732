//! Dead-letter inspection and manual replay.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};

use crate::cli::output::{output, truncate, CommandOutput};
use crate::cli::runtime::Runtime;
use crate::domain::models::DeadLetterEntry;
use crate::services::ReplayReceipt;

#[derive(Args, Debug)]
pub struct DlqArgs {
    #[command(subcommand)]
    pub command: DlqCommands,
}

#[derive(Subcommand, Debug)]
pub enum DlqCommands {
    /// List dead-lettered messages of a stream
    List {
        /// Origin stream key (not the `:dlq` key)
        stream: String,
        /// Maximum number of entries to display
        #[arg(short, long, default_value = "50")]
        limit: usize,
    },
    /// Re-append a dead-lettered message to its origin stream and delete it
    Replay {
        /// Origin stream key
        stream: String,
        /// Dead-letter entry id
        entry_id: String,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct DlqListOutput {
    pub stream: String,
    pub entries: Vec<DeadLetterEntry>,
}

impl CommandOutput for DlqListOutput {
    fn to_human(&self) -> String {
        if self.entries.is_empty() {
            return format!("No dead-lettered messages for {}.", self.stream);
        }

        let mut lines = vec![format!("{} dead-lettered message(s) for {}:\n", self.entries.len(), self.stream)];
        lines.push(format!("{:<18} {:<18} {:<40} {}", "ID", "ORIGIN ID", "ERROR", "FIELDS"));
        lines.push("-".repeat(90));
        for entry in &self.entries {
            let fields = entry
                .fields
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(" ");
            lines.push(format!(
                "{:<18} {:<18} {:<40} {}",
                entry.id,
                entry.origin_id,
                truncate(&entry.error, 38),
                truncate(&fields, 60)
            ));
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct DlqReplayOutput {
    pub success: bool,
    pub message: String,
    pub receipt: Option<ReplayReceipt>,
}

impl CommandOutput for DlqReplayOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }
}

pub async fn execute(args: DlqArgs, runtime: Runtime, json_mode: bool) -> Result<()> {
    let service = runtime.dead_letters().await?;

    match args.command {
        DlqCommands::List { stream, limit } => {
            let entries = service.list(&stream, limit).await?;
            output(&DlqListOutput { stream, entries }, json_mode);
        }

        DlqCommands::Replay { stream, entry_id } => {
            let receipt = service
                .replay(&stream, &entry_id)
                .await?
                .ok_or_else(|| anyhow!("Dead-letter entry not found: {entry_id}"))?;
            let out = DlqReplayOutput {
                success: true,
                message: format!(
                    "Replayed {} to {} as {}",
                    receipt.dead_letter_id, receipt.stream, receipt.new_id
                ),
                receipt: Some(receipt),
            };
            output(&out, json_mode);
        }
    }

    Ok(())
}

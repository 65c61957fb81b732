//! Reconciliation CLI command.

use anyhow::Result;
use chrono::TimeDelta;
use clap::Args;
use std::time::Duration;
use tokio::sync::watch;

use crate::cli::output::{output, truncate, CommandOutput};
use crate::cli::runtime::Runtime;
use crate::domain::models::{AgentStatus, Conflict, ResolveSummary, SweepSummary};
use crate::domain::ports::AgentRepository;
use crate::services::ReconciliationService;

#[derive(Args, Debug)]
pub struct ReconcileArgs {
    /// Reconcile a single agent
    #[arg(short, long)]
    pub agent_id: Option<i64>,

    /// Lookback window for the global anomaly report, in hours
    #[arg(long, default_value = "24")]
    pub hours_back: i64,

    /// Detect conflicts without resolving them
    #[arg(long)]
    pub dry_run: bool,

    /// Only run the read-only global anomaly report
    #[arg(long)]
    pub detect_only: bool,

    /// Run the full sweep every N seconds until Ctrl-C
    #[arg(long)]
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Default, serde::Serialize)]
pub struct ReconcileOutput {
    pub enabled: bool,
    pub dry_run: bool,
    pub detect_only: bool,
    pub anomalies: Vec<Conflict>,
    pub conflicts: Vec<Conflict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<ResolveSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep: Option<SweepSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_runs: Option<u64>,
}

fn conflict_rows(title: &str, conflicts: &[Conflict]) -> Vec<String> {
    let mut lines = vec![format!("{title} ({}):", conflicts.len())];
    if conflicts.is_empty() {
        return lines;
    }
    lines.push(format!(
        "  {:<9} {:<28} {:<6} {:<14} {:<6} {}",
        "SEVERITY", "KIND", "AGENT", "EXECUTION", "STEP", "REASON"
    ));
    for c in conflicts {
        let opt = |v: Option<i64>| v.map_or_else(|| "-".to_string(), |v| v.to_string());
        lines.push(format!(
            "  {:<9} {:<28} {:<6} {:<14} {:<6} {}",
            c.severity.as_str(),
            c.kind.as_str(),
            opt(c.agent_id),
            truncate(c.execution_id.as_deref().unwrap_or("-"), 14),
            opt(c.step_id),
            truncate(&c.reason, 60)
        ));
    }
    lines
}

impl CommandOutput for ReconcileOutput {
    fn to_human(&self) -> String {
        if !self.enabled {
            return "Reconciliation is disabled (reconciliation.enabled = false).".to_string();
        }
        if let Some(runs) = self.scheduled_runs {
            return format!("Scheduled reconciliation stopped after {runs} run(s).");
        }

        let mut lines = Vec::new();
        if self.detect_only || !self.anomalies.is_empty() {
            lines.extend(conflict_rows("Global anomalies", &self.anomalies));
        }
        if self.detect_only {
            return lines.join("\n");
        }
        if self.sweep.is_none() || !self.conflicts.is_empty() {
            let title = if self.dry_run { "Detected conflicts (dry run)" } else { "Conflicts" };
            lines.extend(conflict_rows(title, &self.conflicts));
        }
        if let Some(summary) = &self.resolution {
            lines.push(format!(
                "\nResolved: {}  No-op: {}  Unresolvable: {}  Failed: {}  Deferred: {}",
                summary.resolved, summary.noop, summary.unresolvable, summary.failed, summary.deferred
            ));
        }
        if let Some(sweep) = &self.sweep {
            lines.push(format!(
                "\nAgents checked: {}  Failed agents: {}  Conflicts: {}  Resolved: {}  Failed: {}  Deferred: {}",
                sweep.agents_checked, sweep.agents_failed, sweep.conflicts_found, sweep.resolved, sweep.failed, sweep.deferred
            ));
            for error in &sweep.errors {
                lines.push(format!("  error: {error}"));
            }
        }
        lines.join("\n")
    }
}

async fn detect_all(service: &ReconciliationService, runtime: &Runtime) -> Result<Vec<Conflict>> {
    let mut conflicts = Vec::new();
    for agent in runtime.agents.list(Some(AgentStatus::Disabled)).await? {
        match service.detect_agent_conflicts(agent.id).await {
            Ok(found) => conflicts.extend(found),
            Err(err) => tracing::error!(agent_id = agent.id, error = %err, "conflict detection failed"),
        }
    }
    Ok(conflicts)
}

pub async fn execute(args: ReconcileArgs, runtime: Runtime, json_mode: bool) -> Result<()> {
    if !runtime.config.reconciliation.enabled {
        tracing::warn!("reconciliation disabled by configuration");
        output(&ReconcileOutput::default(), json_mode);
        return Ok(());
    }

    let service = runtime.reconciliation();
    let mut out = ReconcileOutput {
        enabled: true,
        dry_run: args.dry_run,
        detect_only: args.detect_only,
        ..ReconcileOutput::default()
    };

    if let Some(every) = args.interval_secs {
        let (shutdown, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown.send(true);
            }
        });
        tracing::info!(interval_secs = every, "scheduled reconciliation running; press Ctrl-C to stop");
        out.scheduled_runs = Some(service.run_scheduled(Duration::from_secs(every.max(1)), shutdown_rx).await);
        output(&out, json_mode);
        return Ok(());
    }

    if args.detect_only {
        out.anomalies = service.detect_global_anomalies(TimeDelta::hours(args.hours_back)).await?;
        output(&out, json_mode);
        return Ok(());
    }

    match (args.agent_id, args.dry_run) {
        (Some(agent_id), true) => {
            out.conflicts = service.detect_agent_conflicts(agent_id).await?;
        }
        (Some(agent_id), false) => {
            let report = service.reconcile_agent(agent_id).await?;
            out.conflicts = report.conflicts;
            out.resolution = Some(report.summary);
        }
        (None, true) => {
            out.anomalies = service.detect_global_anomalies(TimeDelta::hours(args.hours_back)).await?;
            out.conflicts = detect_all(&service, &runtime).await?;
        }
        (None, false) => {
            out.anomalies = service.detect_global_anomalies(TimeDelta::hours(args.hours_back)).await?;
            out.sweep = Some(service.reconcile_all().await?);
        }
    }

    output(&out, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{ConflictKind, Resolution};

    #[test]
    fn test_disabled_output() {
        assert!(ReconcileOutput::default().to_human().contains("disabled"));
    }

    #[test]
    fn test_dry_run_lists_conflicts() {
        let out = ReconcileOutput {
            enabled: true,
            dry_run: true,
            conflicts: vec![Conflict::new(ConflictKind::StepTimeout, Resolution::FailStepTimeout, "Step timeout")
                .for_agent(7, 70)
                .for_execution("42")
                .for_step(3)],
            ..ReconcileOutput::default()
        };
        let human = out.to_human();
        assert!(human.contains("Detected conflicts (dry run) (1)"));
        assert!(human.contains("step_timeout"));
        assert!(human.contains("high"));
    }
}

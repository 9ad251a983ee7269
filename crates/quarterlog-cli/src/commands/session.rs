use chrono::Duration;
use clap::Subcommand;
use quarterlog_core::{Config, DecisionKind, StartParams};

use super::{block_on, spawn_session, CliResult};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Start a new session, replacing any current one
    Start {
        /// Minutes per cycle (defaults to cycle.duration_min)
        #[arg(long)]
        duration_min: Option<u32>,
        /// Total cycles, 0 for unbounded (defaults to cycle.total_cycles)
        #[arg(long)]
        cycles: Option<u32>,
        /// Cycles left to run (defaults to all of them)
        #[arg(long)]
        left: Option<u32>,
    },
    /// Stop the current session
    Stop,
    /// Answer the expired cycle
    Respond {
        /// done | miss
        kind: String,
        /// Free-text note
        #[arg(long, default_value = "")]
        note: String,
    },
    /// Claim a pending decision and show the live session
    Resume,
    /// Print current session state as JSON
    Status,
}

pub fn run(action: SessionAction) -> CliResult {
    let config = Config::load_or_default();

    block_on(async move {
        let handle = spawn_session(&config, false)?;
        let output = match action {
            SessionAction::Start {
                duration_min,
                cycles,
                left,
            } => {
                let minutes = duration_min.unwrap_or(config.cycle.duration_min);
                let total = cycles.unwrap_or(config.cycle.total_cycles);
                let params = StartParams::new(
                    Duration::minutes(i64::from(minutes)),
                    total,
                    left.unwrap_or(total),
                );
                serde_json::to_value(handle.start(params).await?)?
            }
            SessionAction::Stop => serde_json::to_value(handle.stop().await?)?,
            SessionAction::Respond { kind, note } => {
                let kind: DecisionKind = kind.parse()?;
                serde_json::to_value(handle.respond(kind, note).await?)?
            }
            SessionAction::Resume => serde_json::to_value(handle.resume_query().await?)?,
            SessionAction::Status => serde_json::to_value(handle.status().await?)?,
        };
        handle.shutdown().await?;

        println!("{}", serde_json::to_string_pretty(&output)?);
        CliResult::Ok(())
    })?
}

//! Foreground session.
//!
//! Ticks and prompts go to stderr, events go to stdout as JSON lines, and
//! decisions are read from stdin: `done <note>`, `miss <note>`, `status`,
//! `stop`. The session ends on `stop`, on the last cycle, or on EOF (which
//! leaves the session persisted for the next run).

use std::io::Write;

use chrono::Duration;
use clap::Args;
use quarterlog_core::{
    Config, DecisionKind, DeliveryError, Event, PendingDecision, Presenter, StartParams,
};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::debug;

use super::{block_on, format_remaining, spawn_session, CliResult};

#[derive(Args)]
pub struct RunArgs {
    /// Start a new session instead of resuming the persisted one
    #[arg(long)]
    start: bool,
    /// Minutes per cycle for --start
    #[arg(long)]
    duration_min: Option<u32>,
    /// Total cycles for --start, 0 for unbounded
    #[arg(long)]
    cycles: Option<u32>,
}

/// Draws the countdown on stderr.
struct TerminalPresenter;

fn write_stderr(line: &str) -> Result<(), DeliveryError> {
    let mut stderr = std::io::stderr().lock();
    stderr
        .write_all(line.as_bytes())
        .and_then(|()| stderr.flush())
        .map_err(|e| DeliveryError(e.to_string()))
}

fn cycle_label(cycle_index: u32, total_cycles: u32) -> String {
    if total_cycles > 0 {
        format!("Cycle {cycle_index}/{total_cycles}")
    } else {
        format!("Cycle {cycle_index}")
    }
}

impl Presenter for TerminalPresenter {
    fn on_tick(&mut self, remaining: Duration, cycle_index: u32, total_cycles: u32) -> Result<(), DeliveryError> {
        write_stderr(&format!(
            "\r{}  {} ",
            cycle_label(cycle_index, total_cycles),
            format_remaining(remaining.num_milliseconds())
        ))
    }

    fn on_alert(&mut self, cycle_index: u32, total_cycles: u32) -> Result<(), DeliveryError> {
        write_stderr(&format!(
            "\n{} is up. How did it go? [done|miss] <note>\n",
            cycle_label(cycle_index, total_cycles)
        ))
    }

    fn on_decision(&mut self, decision: &PendingDecision) -> Result<(), DeliveryError> {
        write_stderr(&format!("recorded {}: {}\n", decision.kind, decision.note))
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Respond(DecisionKind, String),
    Status,
    Stop,
}

fn parse_input(line: &str) -> Option<Input> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    match word.to_ascii_lowercase().as_str() {
        "" => None,
        "stop" | "quit" => Some(Input::Stop),
        "status" => Some(Input::Status),
        other => other
            .parse::<DecisionKind>()
            .ok()
            .map(|kind| Input::Respond(kind, rest.trim().to_string())),
    }
}

fn print_json(value: &impl serde::Serialize) -> CliResult {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

pub fn run(args: RunArgs) -> CliResult {
    let config = Config::load_or_default();

    block_on(async move {
        let handle = spawn_session(&config, true)?;
        let mut events = handle.subscribe();

        let resumed = handle.attach(Box::new(TerminalPresenter)).await?;
        print_json(&json!({ "type": "resumed", "report": resumed }))?;

        if args.start {
            let minutes = args.duration_min.unwrap_or(config.cycle.duration_min);
            let total = args.cycles.unwrap_or(config.cycle.total_cycles);
            let params = StartParams::new(Duration::minutes(i64::from(minutes)), total, total);
            handle.start(params).await?;
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                // Queued events print before the next input is handled.
                biased;
                event = events.recv() => match event {
                    Ok(Event::Tick { .. }) => {}
                    Ok(event) => {
                        print_json(&event)?;
                        if matches!(event, Event::SessionStopped { .. }) {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => debug!(skipped, "event output lagged"),
                    Err(RecvError::Closed) => break,
                },
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        break;
                    };
                    match parse_input(&line) {
                        Some(Input::Respond(kind, note)) => {
                            let report = handle.respond(kind, note).await?;
                            if let Some(stale) = report.stale {
                                write_stderr(&format!("ignored: {stale}\n"))?;
                            }
                        }
                        Some(Input::Status) => print_json(&handle.status().await?)?,
                        Some(Input::Stop) => {
                            handle.stop().await?;
                        }
                        None => write_stderr("expected: done <note> | miss <note> | status | stop\n")?,
                    }
                }
            }
        }

        handle.shutdown().await?;
        CliResult::Ok(())
    })?
}

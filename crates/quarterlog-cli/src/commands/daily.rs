use chrono::Local;
use clap::Subcommand;
use quarterlog_core::{Config, DailySchedule, DailyTrigger, Database, ValidationError};
use serde_json::json;

use super::{block_on, spawn_session, CliResult};

#[derive(Subcommand)]
pub enum DailyAction {
    /// Print the daily schedule as JSON
    Show,
    /// Change the daily schedule
    Set {
        /// Local start time, HH:MM
        #[arg(long)]
        at: Option<String>,
        /// Minutes per cycle
        #[arg(long)]
        duration_min: Option<u32>,
        /// Cycles per daily session
        #[arg(long)]
        cycles: Option<u32>,
    },
    /// Turn the daily start on
    Enable,
    /// Turn the daily start off
    Disable,
    /// Print the next start time
    Next,
    /// Run the daily trigger in the foreground
    Watch,
}

fn parse_time(raw: &str) -> Result<(u32, u32), ValidationError> {
    let invalid = || ValidationError::InvalidValue {
        field: "at".into(),
        message: format!("'{raw}' is not HH:MM"),
    };
    let (hour, minute) = raw.split_once(':').ok_or_else(invalid)?;
    let hour = hour.trim().parse().map_err(|_| invalid())?;
    let minute = minute.trim().parse().map_err(|_| invalid())?;
    Ok((hour, minute))
}

pub fn run(action: DailyAction) -> CliResult {
    let mut db = Database::open()?;
    let mut schedule = DailySchedule::load(&db)?;

    match action {
        DailyAction::Show => {
            println!("{}", serde_json::to_string_pretty(&schedule)?);
        }
        DailyAction::Set {
            at,
            duration_min,
            cycles,
        } => {
            if let Some(at) = at {
                (schedule.hour, schedule.minute) = parse_time(&at)?;
            }
            if let Some(duration_min) = duration_min {
                schedule.duration_min = duration_min;
            }
            if let Some(cycles) = cycles {
                schedule.total_cycles = cycles;
            }
            schedule.save(&mut db)?;
            println!("{}", serde_json::to_string_pretty(&schedule)?);
        }
        DailyAction::Enable => {
            schedule.enabled = true;
            schedule.save(&mut db)?;
            println!("{}", serde_json::to_string_pretty(&schedule)?);
        }
        DailyAction::Disable => {
            schedule.enabled = false;
            schedule.save(&mut db)?;
            println!("{}", serde_json::to_string_pretty(&schedule)?);
        }
        DailyAction::Next => {
            let next = schedule
                .enabled
                .then(|| schedule.next_fire(&Local::now()))
                .flatten();
            let output = json!({
                "enabled": schedule.enabled,
                "next_fire": next.map(|at| at.to_rfc3339()),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        DailyAction::Watch => {
            // The runtime opens its own connection.
            drop(db);
            let config = Config::load_or_default();
            block_on(async move {
                let handle = spawn_session(&config, true)?;
                DailyTrigger::new(handle, schedule).run().await?;
                CliResult::Ok(())
            })??;
        }
    }
    Ok(())
}

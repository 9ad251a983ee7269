//! Daily auto-start.
//!
//! A one-shot trigger: at the configured local time it issues a single START
//! and then waits for the next day. It keeps no state of its own beyond the
//! persisted daily-schedule group.

use chrono::{DateTime, Days, Duration, Local, TimeZone};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CoreError, StoreError, ValidationError};
use crate::runtime::{CommandReport, SessionHandle};
use crate::storage::keys::{
    DAILY_DURATION_MIN, DAILY_ENABLED, DAILY_GROUP, DAILY_HOUR, DAILY_MINUTE, DAILY_TOTAL_CYCLES,
};
use crate::storage::{parse_value, StateStore};
use crate::timer::StartParams;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailySchedule {
    pub hour: u32,
    pub minute: u32,
    pub duration_min: u32,
    pub total_cycles: u32,
    pub enabled: bool,
}

impl Default for DailySchedule {
    fn default() -> Self {
        Self {
            hour: 9,
            minute: 0,
            duration_min: 15,
            total_cycles: 32,
            enabled: false,
        }
    }
}

impl DailySchedule {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.hour > 23 {
            return Err(ValidationError::InvalidValue {
                field: "hour".into(),
                message: format!("{} is not an hour of the day", self.hour),
            });
        }
        if self.minute > 59 {
            return Err(ValidationError::InvalidValue {
                field: "minute".into(),
                message: format!("{} is not a minute of the hour", self.minute),
            });
        }
        if self.duration_min == 0 {
            return Err(ValidationError::ZeroDuration);
        }
        self.start_params().validate()
    }

    /// Read the daily-schedule group; defaults when it was never saved.
    pub fn load(store: &dyn StateStore) -> Result<Self, StoreError> {
        let Some(hour) = store.get(DAILY_HOUR)? else {
            return Ok(Self::default());
        };
        let defaults = Self::default();
        let field = |key: &str, fallback: u32| -> Result<u32, StoreError> {
            match store.get(key)? {
                Some(raw) => parse_value(key, &raw),
                None => Ok(fallback),
            }
        };
        Ok(Self {
            hour: parse_value(DAILY_HOUR, &hour)?,
            minute: field(DAILY_MINUTE, defaults.minute)?,
            duration_min: field(DAILY_DURATION_MIN, defaults.duration_min)?,
            total_cycles: field(DAILY_TOTAL_CYCLES, defaults.total_cycles)?,
            enabled: match store.get(DAILY_ENABLED)? {
                Some(raw) => parse_value(DAILY_ENABLED, &raw)?,
                None => defaults.enabled,
            },
        })
    }

    pub fn save(&self, store: &mut dyn StateStore) -> Result<(), CoreError> {
        self.validate()?;
        store.put(
            DAILY_GROUP,
            &[
                (DAILY_HOUR, self.hour.to_string()),
                (DAILY_MINUTE, self.minute.to_string()),
                (DAILY_DURATION_MIN, self.duration_min.to_string()),
                (DAILY_TOTAL_CYCLES, self.total_cycles.to_string()),
                (DAILY_ENABLED, self.enabled.to_string()),
            ],
        )?;
        Ok(())
    }

    /// The first configured wall-clock time strictly after `now`.
    ///
    /// Skips a day whose local time does not exist (DST gap).
    pub fn next_fire<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = now.timezone();
        let today = now.date_naive();
        (0..=2).find_map(|offset| {
            let date = today.checked_add_days(Days::new(offset))?;
            let naive = date.and_hms_opt(self.hour, self.minute, 0)?;
            tz.from_local_datetime(&naive)
                .earliest()
                .filter(|at| at > now)
        })
    }

    /// START parameters for a fresh daily session.
    pub fn start_params(&self) -> StartParams {
        StartParams::new(
            Duration::minutes(i64::from(self.duration_min)),
            self.total_cycles,
            self.total_cycles,
        )
    }
}

pub struct DailyTrigger {
    handle: SessionHandle,
    schedule: DailySchedule,
}

impl DailyTrigger {
    pub fn new(handle: SessionHandle, schedule: DailySchedule) -> Self {
        Self { handle, schedule }
    }

    /// Issue the START for today.
    pub async fn fire(&self) -> Result<CommandReport, CoreError> {
        info!(
            duration_min = self.schedule.duration_min,
            total_cycles = self.schedule.total_cycles,
            "daily trigger firing"
        );
        self.handle.start(self.schedule.start_params()).await
    }

    /// Sleep until each configured time and fire. Returns when the session
    /// runtime goes away or the schedule is disabled.
    pub async fn run(self) -> Result<(), CoreError> {
        if !self.schedule.enabled {
            info!("daily trigger disabled");
            return Ok(());
        }
        self.schedule.validate()?;

        loop {
            let now = Local::now();
            let Some(at) = self.schedule.next_fire(&now) else {
                return Err(ValidationError::InvalidValue {
                    field: "daily".into(),
                    message: "no upcoming fire time".into(),
                }
                .into());
            };
            info!(at = %at, "daily trigger scheduled");
            let wait = (at - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;

            match self.fire().await {
                Ok(_) => {}
                Err(CoreError::RuntimeClosed) => return Err(CoreError::RuntimeClosed),
                Err(e) => warn!(error = %e, "daily start failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::{FixedOffset, Utc};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, h, m, 0).unwrap()
    }

    #[test]
    fn fires_today_when_still_ahead() {
        let schedule = DailySchedule::default();
        assert_eq!(schedule.next_fire(&at(8, 30)), Some(at(9, 0)));
    }

    #[test]
    fn fires_tomorrow_once_passed() {
        let schedule = DailySchedule::default();
        let tomorrow = Utc.with_ymd_and_hms(2026, 3, 11, 9, 0, 0).unwrap();
        assert_eq!(schedule.next_fire(&at(9, 0)), Some(tomorrow));
        assert_eq!(schedule.next_fire(&at(23, 59)), Some(tomorrow));
    }

    #[test]
    fn honours_local_offset() {
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        let now = tokyo.with_ymd_and_hms(2026, 3, 10, 7, 0, 0).unwrap();
        let next = DailySchedule::default().next_fire(&now).unwrap();
        assert_eq!(next, tokyo.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap());
    }

    #[test]
    fn store_roundtrip_and_defaults() {
        let mut store = MemoryStore::new();
        assert_eq!(DailySchedule::load(&store).unwrap(), DailySchedule::default());

        let schedule = DailySchedule {
            hour: 6,
            minute: 45,
            duration_min: 20,
            total_cycles: 12,
            enabled: true,
        };
        schedule.save(&mut store).unwrap();
        assert_eq!(DailySchedule::load(&store).unwrap(), schedule);
    }

    #[test]
    fn rejects_out_of_range_time() {
        let mut store = MemoryStore::new();
        let schedule = DailySchedule {
            hour: 24,
            ..DailySchedule::default()
        };
        assert!(schedule.save(&mut store).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn rejects_cycle_longer_than_a_week() {
        let schedule = DailySchedule {
            duration_min: 7 * 24 * 60 + 1,
            ..DailySchedule::default()
        };
        assert!(matches!(
            schedule.validate(),
            Err(ValidationError::DurationOutOfRange { .. })
        ));
    }

    #[test]
    fn start_params_begin_with_every_cycle_left() {
        let params = DailySchedule::default().start_params();
        assert_eq!(params.duration_ms, 15 * 60 * 1000);
        assert_eq!(params.total_cycles, 32);
        assert_eq!(params.cycles_left, 32);
    }
}

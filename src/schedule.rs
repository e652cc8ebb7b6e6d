use chrono::{DateTime, Datelike, NaiveTime, Timelike, Utc, Weekday};
use chrono_tz::Tz;
use tracing::info;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Monday run: resets the weekly flag, then buys.
    PrimaryBuy,
    /// Sunday run: buys only if the primary attempt has not succeeded.
    FallbackBuy,
    /// Hourly check of the idle EUR balance.
    ConversionCheck,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Cadence {
    Weekly { weekday: Weekday, time: NaiveTime },
    Hourly { minute: u32 },
}

#[derive(Debug, Clone)]
struct ScheduledJob {
    kind: JobKind,
    cadence: Cadence,
    /// Local minute key of the last firing, so a job fires at most once per
    /// scheduled minute even with a sub-minute polling tick.
    last_fired: Option<String>,
}

/// Weekly job registry with runtime enable/disable. Polled from the single
/// bot task; `due` both reports and arms, so the caller runs whatever comes
/// back.
pub struct SchedulingController {
    enabled: bool,
    timezone: Tz,
    template: Vec<(JobKind, Cadence)>,
    jobs: Vec<ScheduledJob>,
}

impl SchedulingController {
    pub fn new(cfg: &Config) -> Self {
        let template = vec![
            (
                JobKind::PrimaryBuy,
                Cadence::Weekly {
                    weekday: Weekday::Mon,
                    time: cfg.monday_time,
                },
            ),
            (
                JobKind::FallbackBuy,
                Cadence::Weekly {
                    weekday: Weekday::Sun,
                    time: cfg.sunday_time,
                },
            ),
            (JobKind::ConversionCheck, Cadence::Hourly { minute: 0 }),
        ];

        let mut controller = Self {
            enabled: true,
            timezone: cfg.timezone,
            template,
            jobs: Vec::new(),
        };
        controller.register_jobs();
        controller
    }

    /// (Re-)register the canonical job set, replacing whatever is armed.
    fn register_jobs(&mut self) {
        self.jobs = self
            .template
            .iter()
            .map(|&(kind, cadence)| ScheduledJob {
                kind,
                cadence,
                last_fired: None,
            })
            .collect();
    }

    /// Returns false when already enabled; re-enabling arms the full
    /// original job set exactly once.
    pub fn enable(&mut self) -> bool {
        if self.enabled {
            return false;
        }
        self.enabled = true;
        self.register_jobs();
        info!("Schedule enabled, {} jobs armed", self.jobs.len());
        true
    }

    /// Returns false when already disabled. Clears all jobs, so nothing can
    /// fire on the next tick.
    pub fn disable(&mut self) -> bool {
        if !self.enabled {
            return false;
        }
        self.enabled = false;
        self.jobs.clear();
        info!("Schedule disabled");
        true
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Jobs due at `now`, each armed against re-firing within its minute.
    pub fn due(&mut self, now: DateTime<Utc>) -> Vec<JobKind> {
        if !self.enabled {
            return Vec::new();
        }

        let local = now.with_timezone(&self.timezone);
        let minute_key = local.format("%Y-%m-%d %H:%M").to_string();

        self.jobs
            .iter_mut()
            .filter_map(|job| {
                let matches = match job.cadence {
                    Cadence::Weekly { weekday, time } => {
                        local.weekday() == weekday
                            && local.hour() == time.hour()
                            && local.minute() == time.minute()
                    }
                    Cadence::Hourly { minute } => local.minute() == minute,
                };
                if matches && job.last_fired.as_deref() != Some(minute_key.as_str()) {
                    job.last_fired = Some(minute_key.clone());
                    Some(job.kind)
                } else {
                    None
                }
            })
            .collect()
    }
}

//! Job clock for the scheduler loop
//!
//! All times are UTC. The clock only answers "what is due now"; running the
//! jobs is the runner's business.

use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};

use crate::config::ScheduleSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Job {
    FullCycle,
    WatchState,
    MonitorPositions,
    NotificationCleanup,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    /// Every hour at this minute
    Hourly { minute: u32 },
    Every(Duration),
    /// Every day at this time
    Daily(NaiveTime),
}

pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

impl Trigger {
    /// First firing strictly after `now`
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Trigger::Hourly { minute } => {
                let this_hour = now
                    .date_naive()
                    .and_hms_opt(now.hour(), (*minute).min(59), 0)
                    .map(|naive| naive.and_utc())
                    .unwrap_or(now);
                if this_hour > now {
                    this_hour
                } else {
                    this_hour + Duration::hours(1)
                }
            }
            Trigger::Every(period) => now + *period,
            Trigger::Daily(time) => {
                let today = now.date_naive().and_time(*time).and_utc();
                if today > now {
                    today
                } else {
                    today + Duration::days(1)
                }
            }
        }
    }
}

#[derive(Debug)]
struct Scheduled {
    job: Job,
    trigger: Trigger,
    next_due: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct JobClock {
    jobs: Vec<Scheduled>,
}

impl JobClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job; jobs come due in registration order
    pub fn schedule(&mut self, job: Job, trigger: Trigger, now: DateTime<Utc>) {
        let next_due = trigger.next_after(now);
        self.jobs.push(Scheduled {
            job,
            trigger,
            next_due,
        });
    }

    /// The standard advisor schedule
    pub fn from_settings(settings: &ScheduleSettings, cleanup_enabled: bool, now: DateTime<Utc>) -> Self {
        let mut clock = Self::new();
        clock.schedule(
            Job::FullCycle,
            Trigger::Hourly {
                minute: settings.full_cycle_minute,
            },
            now,
        );
        clock.schedule(
            Job::WatchState,
            Trigger::Every(Duration::seconds(settings.watch_interval_secs as i64)),
            now,
        );
        clock.schedule(
            Job::MonitorPositions,
            Trigger::Every(Duration::minutes(settings.monitor_interval_mins as i64)),
            now,
        );
        if cleanup_enabled {
            if let Some(time) = parse_time_of_day(&settings.cleanup_time) {
                clock.schedule(Job::NotificationCleanup, Trigger::Daily(time), now);
            }
        }
        clock
    }

    /// Jobs due at `now`, each rescheduled past `now`. A job that missed
    /// several firings runs once.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Vec<Job> {
        let mut due = Vec::new();
        for scheduled in &mut self.jobs {
            if scheduled.next_due <= now {
                due.push(scheduled.job);
                scheduled.next_due = scheduled.trigger.next_after(now);
            }
        }
        due
    }

    pub fn next_due(&self, job: Job) -> Option<DateTime<Utc>> {
        self.jobs
            .iter()
            .find(|scheduled| scheduled.job == job)
            .map(|scheduled| scheduled.next_due)
    }
}

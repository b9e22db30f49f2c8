use std::future::Future;

use chrono::{DateTime, Days, Local, NaiveDateTime, NaiveTime, TimeZone};
use tracing::{error, info, warn};

use crate::settings::SchedulerSettings;

/// First occurrence of `at` strictly after `now`, in `now`'s time zone.
pub fn next_run<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> Option<DateTime<Tz>> {
    let today = now.date_naive();
    for day in 0..=2 {
        let date = today.checked_add_days(Days::new(day))?;
        let candidate = NaiveDateTime::new(date, at);
        // skip wall-clock times that do not exist on DST transition days
        if let Some(run) = now.timezone().from_local_datetime(&candidate).earliest() {
            if run > *now {
                return Some(run);
            }
        }
    }
    None
}

/// Runs `job` every day at the configured local time until Ctrl-C.
pub async fn run_daily<F, Fut>(settings: &SchedulerSettings, mut job: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    if !settings.enabled {
        info!("scheduler disabled in configuration");
        return Ok(());
    }
    let at = settings.run_time()?;

    loop {
        let now = Local::now();
        let Some(next) = next_run(&now, at) else {
            anyhow::bail!("could not compute the next run after {now}");
        };
        let wait = (next.clone() - now).to_std().unwrap_or_default();
        info!(next_run = %next, "waiting for next scheduled generation");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("scheduler stopped by user");
                return Ok(());
            }
        }

        let started = std::time::Instant::now();
        match job().await {
            Ok(()) => info!(elapsed = ?started.elapsed(), "scheduled generation finished"),
            Err(err) => error!(error = %err, "scheduled generation failed"),
        }
    }
}

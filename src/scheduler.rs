//! Daily job loop for long-running deployments.

use chrono::{DateTime, Duration, Local, NaiveTime, TimeZone};
use color_eyre::Result;
use std::future::Future;
use tracing::{error, info};

/// First occurrence of `at` strictly after `now`, in `now`'s time zone.
/// Days on which `at` does not exist (DST gaps) are skipped.
pub fn next_run<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
  let tz = now.timezone();
  let mut date = now.date_naive();
  loop {
    if let Some(candidate) = tz.from_local_datetime(&date.and_time(at)).earliest() {
      if candidate > *now {
        return candidate;
      }
    }
    date += Duration::days(1);
  }
}

/// Run `job` every day at local time `at`, forever. A failed job is logged
/// and the loop carries on.
pub async fn run_daily<F, Fut>(at: NaiveTime, mut job: F) -> Result<()>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<()>>,
{
  loop {
    let now = Local::now();
    let next = next_run(&now, at);
    info!("Next run at {}", next.format("%Y-%m-%d %H:%M"));

    let wait = (next - now).to_std().unwrap_or_default();
    tokio::time::sleep(wait).await;

    if let Err(e) = job().await {
      error!("Scheduled job failed: {:#}", e);
    }
  }
}

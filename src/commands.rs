//! Top-level operations behind the CLI subcommands.

use chrono::{NaiveTime, Utc};
use color_eyre::{eyre::eyre, Result};
use tracing::info;

use crate::cache::{CacheLock, CacheStore};
use crate::config::Config;
use crate::digest::{list_users, DigestSender, MuttMailer, SmtpSecret};
use crate::gerrit::GerritClient;
use crate::scheduler;
use crate::sync::{SyncReport, SyncSettings, Synchronizer};

/// Who gets a digest and how.
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
  pub all_users: bool,
  pub users: Vec<String>,
  pub dry_run: bool,
  /// Name of the `<name>.gpg` file holding the SMTP secret
  pub gpg_recipient: Option<String>,
}

/// One sync pass over the configured cache, holding the cache lock throughout.
pub async fn update_cache(config: &Config) -> Result<SyncReport> {
  let path = &config.gerrit.cache_filename;
  let _lock = CacheLock::acquire(path)?;

  let client = GerritClient::new(config)?;
  let synchronizer = Synchronizer::new(&client, SyncSettings::from(&config.gerrit));
  let mut store = CacheStore::new(path);

  Ok(synchronizer.sync(&mut store, Utc::now()).await?)
}

pub async fn send_email(config: &Config, options: &SendOptions) -> Result<()> {
  let mut users = options.users.clone();
  if options.all_users {
    users.extend(list_users(&config.users_dir)?);
  }
  users.sort();
  users.dedup();

  if users.is_empty() {
    return Err(eyre!("No recipients selected; use --all-users or --user"));
  }

  let summary = if options.dry_run {
    DigestSender::<MuttMailer>::new(config, None, Utc::now())
      .send_all(&users)
      .await?
  } else {
    let smtp = config
      .smtp
      .as_ref()
      .ok_or_else(|| eyre!("Sending mail needs an smtp section in the config"))?;
    let secret = match &options.gpg_recipient {
      Some(name) => Some(SmtpSecret::decrypt(name).await?),
      None => None,
    };
    let mailer = MuttMailer::new(smtp, secret)?;
    DigestSender::new(config, Some(mailer), Utc::now())
      .send_all(&users)
      .await?
  };

  info!(
    "Digests: {} sent, {} empty, {} failed",
    summary.sent, summary.empty, summary.failed
  );
  Ok(())
}

/// Every day at `at`: sync the cache, then mail all users.
pub async fn schedule(config: &Config, at: NaiveTime, gpg_recipient: Option<String>) -> Result<()> {
  let options = SendOptions {
    all_users: true,
    gpg_recipient,
    ..SendOptions::default()
  };

  let options = &options;
  scheduler::run_daily(at, move || async move {
    update_cache(config).await?;
    send_email(config, options).await
  })
  .await
}

/// Parse `HH:MM` (or `H:MM`).
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
  NaiveTime::parse_from_str(s, "%H:%M").map_err(|e| eyre!("Invalid time of day '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_time_of_day() {
    assert_eq!(
      parse_time_of_day("4:56").unwrap(),
      NaiveTime::from_hms_opt(4, 56, 0).unwrap()
    );
    assert_eq!(
      parse_time_of_day("23:05").unwrap(),
      NaiveTime::from_hms_opt(23, 5, 0).unwrap()
    );
    assert!(parse_time_of_day("25:00").is_err());
    assert!(parse_time_of_day("noon").is_err());
  }
}

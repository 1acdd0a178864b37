//! Per-recipient digest rendering and delivery.

use chrono::{DateTime, Local, Utc};
use color_eyre::Result;
use tracing::{error, info, warn};

use super::filter::cached_on;
use super::formatter::OutputFormatter;
use super::mailer::Mailer;
use super::users;
use crate::cache::CacheStore;
use crate::config::Config;
use crate::error::DigestError;

/// Outcome counts of a digest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendSummary {
  pub sent: usize,
  /// Recipients with nothing to read today
  pub empty: usize,
  pub failed: usize,
}

pub struct DigestSender<'a, M: Mailer> {
  config: &'a Config,
  /// None renders and logs without sending
  mailer: Option<M>,
  now: DateTime<Utc>,
}

impl<'a, M: Mailer> DigestSender<'a, M> {
  pub fn new(config: &'a Config, mailer: Option<M>, now: DateTime<Utc>) -> Self {
    Self {
      config,
      mailer,
      now,
    }
  }

  /// Send today's digest to each of `users`. A failing recipient is logged and
  /// skipped; only an unreadable cache fails the whole run.
  pub async fn send_all(&self, users: &[String]) -> Result<SendSummary> {
    let mut store = CacheStore::new(&self.config.gerrit.cache_filename);
    store.read()?;
    store.filter_predicate(&cached_on(self.today()));
    if store.is_empty() {
      info!("No changes cached today");
    } else {
      info!("{} changes cached today", store.len());
    }

    let mut summary = SendSummary::default();
    for user in users {
      match self.send_one(&store, user).await {
        Ok(()) => summary.sent += 1,
        Err(e) if matches!(e.downcast_ref::<DigestError>(), Some(DigestError::NoContent)) => {
          info!("Nothing to send to {}", user);
          summary.empty += 1;
        }
        Err(e) => {
          match e.downcast_ref::<DigestError>() {
            Some(DigestError::ConfigMissing { .. }) => warn!("Skipping {}: {}", user, e),
            _ => error!("Could not send digest for user {}: {:#}", user, e),
          }
          summary.failed += 1;
        }
      }
    }

    Ok(summary)
  }

  /// Render and deliver one recipient's digest from an already filtered store.
  pub async fn send_one(&self, store: &CacheStore, user: &str) -> Result<()> {
    let recipient = users::load_recipient(&self.config.users_dir, user)?;
    let filters = recipient.compile_filters(self.today())?;

    let formatter = OutputFormatter::new(
      &self.config.gerrit.project,
      &self.config.gerrit.url,
      &recipient.stylesheet,
    );
    let html = formatter.format_html(store, &filters)?;

    match &self.mailer {
      None => {
        info!("{} <{}>", recipient.name, recipient.email);
        info!("{}", formatter.format_json(store, &filters)?);
        info!("{}", html);
      }
      Some(mailer) => {
        mailer.send(&recipient.email, &self.subject(), &html).await?;
      }
    }

    Ok(())
  }

  pub fn subject(&self) -> String {
    format!(
      "{} Gerrit digest {}",
      self.config.gerrit.project,
      self.now.with_timezone(&Local).format("%A %d %B %Y")
    )
  }

  /// Cache stamps are UTC, so "today" is the UTC date.
  fn today(&self) -> chrono::NaiveDate {
    self.now.date_naive()
  }
}

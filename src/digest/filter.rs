//! Recipient filters.
//!
//! Filters are plain data in the recipient's YAML file. Each one is compiled
//! into a [`ChangePredicate`] once per run; no recipient-supplied code runs.
//!
//! ```yaml
//! filters:
//!   - title: Build system
//!     match:
//!       projects: [platform/build, platform/build/soong]
//!   - title: From partners
//!     match:
//!       author_email: "@partner\\.com$"
//!       not:
//!         project_prefix: device/
//! ```
//!
//! Every condition set in a `match` block must hold. An empty block matches
//! everything.

use chrono::NaiveDate;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;

use crate::cache::{ChangePredicate, ChangeRecord, RecordKey};
use crate::error::{DigestError, Result};
use crate::timestamp;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterRule {
  /// Match every change; other conditions in the block are ignored
  #[serde(default)]
  pub all: bool,
  pub projects: Option<Vec<String>>,
  pub project_prefix: Option<String>,
  /// Regular expression searched anywhere in the author's email
  pub author_email: Option<String>,
  pub subject_contains: Option<String>,
  #[serde(default)]
  pub updated_today: bool,
  #[serde(default)]
  pub cached_today: bool,
  pub any_of: Option<Vec<FilterRule>>,
  pub all_of: Option<Vec<FilterRule>>,
  pub not: Option<Box<FilterRule>>,
}

/// A titled section of a digest, as written in the recipient file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FilterSpec {
  pub title: String,
  #[serde(rename = "match", default)]
  pub rule: FilterRule,
}

impl FilterSpec {
  /// `today` anchors the `*_today` conditions.
  pub fn compile(&self, today: NaiveDate) -> Result<Filter> {
    let rule = self.rule.compile(&self.title, today)?;
    Ok(Filter::new(&self.title, rule))
  }
}

/// A title and the predicate selecting the changes listed under it.
pub struct Filter {
  pub title: String,
  predicate: Box<dyn ChangePredicate + Send + Sync>,
}

impl Filter {
  pub fn new(title: &str, predicate: impl ChangePredicate + Send + Sync + 'static) -> Self {
    Self {
      title: title.to_string(),
      predicate: Box::new(predicate),
    }
  }
}

impl ChangePredicate for Filter {
  fn matches(&self, record: &ChangeRecord) -> bool {
    self.predicate.matches(record)
  }
}

impl fmt::Debug for Filter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Filter")
      .field("title", &self.title)
      .finish_non_exhaustive()
  }
}

/// Changes cached on `date`, i.e. new to the digest that day.
pub fn cached_on(date: NaiveDate) -> impl ChangePredicate + Send + Sync {
  let prefix = timestamp::date_prefix(date);
  move |record: &ChangeRecord| record.field(RecordKey::Cached).starts_with(&prefix)
}

enum Condition {
  Projects(HashSet<String>),
  ProjectPrefix(String),
  AuthorEmail(Regex),
  SubjectContains(String),
  UpdatedOn(String),
  CachedOn(String),
  AnyOf(Vec<CompiledRule>),
  AllOf(Vec<CompiledRule>),
  Not(Box<CompiledRule>),
}

struct CompiledRule {
  conditions: Vec<Condition>,
}

impl FilterRule {
  fn compile(&self, title: &str, today: NaiveDate) -> Result<CompiledRule> {
    let mut conditions = Vec::new();
    if self.all {
      return Ok(CompiledRule { conditions });
    }

    let compile_all = |rules: &[FilterRule]| {
      rules
        .iter()
        .map(|r| r.compile(title, today))
        .collect::<Result<Vec<_>>>()
    };

    if let Some(projects) = &self.projects {
      conditions.push(Condition::Projects(projects.iter().cloned().collect()));
    }
    if let Some(prefix) = &self.project_prefix {
      conditions.push(Condition::ProjectPrefix(prefix.clone()));
    }
    if let Some(pattern) = &self.author_email {
      let regex = Regex::new(pattern).map_err(|e| DigestError::InvalidFilter {
        title: title.to_string(),
        reason: e.to_string(),
      })?;
      conditions.push(Condition::AuthorEmail(regex));
    }
    if let Some(needle) = &self.subject_contains {
      conditions.push(Condition::SubjectContains(needle.to_lowercase()));
    }
    if self.updated_today {
      conditions.push(Condition::UpdatedOn(timestamp::date_prefix(today)));
    }
    if self.cached_today {
      conditions.push(Condition::CachedOn(timestamp::date_prefix(today)));
    }
    if let Some(rules) = &self.any_of {
      conditions.push(Condition::AnyOf(compile_all(rules)?));
    }
    if let Some(rules) = &self.all_of {
      conditions.push(Condition::AllOf(compile_all(rules)?));
    }
    if let Some(rule) = &self.not {
      conditions.push(Condition::Not(Box::new(rule.compile(title, today)?)));
    }

    Ok(CompiledRule { conditions })
  }
}

impl Condition {
  fn holds(&self, record: &ChangeRecord) -> bool {
    match self {
      Self::Projects(projects) => projects.contains(&record.project),
      Self::ProjectPrefix(prefix) => record.project.starts_with(prefix.as_str()),
      Self::AuthorEmail(regex) => regex.is_match(&record.author.email),
      Self::SubjectContains(needle) => record.subject.to_lowercase().contains(needle.as_str()),
      Self::UpdatedOn(date) => record.updated.starts_with(date.as_str()),
      Self::CachedOn(date) => record.cached.starts_with(date.as_str()),
      Self::AnyOf(rules) => rules.iter().any(|r| r.matches(record)),
      Self::AllOf(rules) => rules.iter().all(|r| r.matches(record)),
      Self::Not(rule) => !rule.matches(record),
    }
  }
}

impl ChangePredicate for CompiledRule {
  fn matches(&self, record: &ChangeRecord) -> bool {
    self.conditions.iter().all(|c| c.holds(record))
  }
}

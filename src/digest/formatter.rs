//! Render filtered cache contents as an XHTML mail body or as JSON.

use minijinja::{context, AutoEscape, Environment};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::filter::Filter;
use crate::cache::{CacheStore, ChangeRecord};
use crate::error::{DigestError, Result};

const DIGEST_TEMPLATE: &str = "digest.html";

/// Changes under one filter title, grouped by project.
#[derive(Debug, Serialize)]
pub struct Section<'a> {
  pub title: &'a str,
  pub projects: BTreeMap<&'a str, Vec<&'a ChangeRecord>>,
}

/// Group the store's records by filter, then by project.
///
/// Sections are sorted by title, projects by name and changes by number.
pub fn build_tree<'a>(store: &'a CacheStore, filters: &'a [Filter]) -> Vec<Section<'a>> {
  let mut tree: Vec<Section<'a>> = filters
    .iter()
    .map(|filter| {
      let mut projects: BTreeMap<&str, Vec<&ChangeRecord>> = BTreeMap::new();
      for record in store.get_by_predicate(filter) {
        projects.entry(record.project.as_str()).or_default().push(record);
      }
      for changes in projects.values_mut() {
        changes.sort_by(|a, b| a.number.cmp(&b.number));
      }
      Section {
        title: filter.title.as_str(),
        projects,
      }
    })
    .collect();

  tree.sort_by(|a, b| a.title.cmp(b.title));
  tree
}

pub struct OutputFormatter<'a> {
  /// Name of the reviewed project, e.g. "AOSP"
  project: &'a str,
  /// Prefix turning a change number into a link
  anchor: String,
  css: &'a str,
}

impl<'a> OutputFormatter<'a> {
  pub fn new(project: &'a str, gerrit_url: &str, css: &'a str) -> Self {
    let anchor = if gerrit_url.ends_with('/') {
      gerrit_url.to_string()
    } else {
      format!("{}/", gerrit_url)
    };
    Self {
      project,
      anchor,
      css,
    }
  }

  /// Complete XHTML document. Fails with `NoContent` when there are no
  /// filters or none of them matches a record.
  pub fn format_html(&self, store: &CacheStore, filters: &[Filter]) -> Result<String> {
    let tree = build_tree(store, filters);
    if tree.iter().all(|section| section.projects.is_empty()) {
      return Err(DigestError::NoContent);
    }

    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.add_template(DIGEST_TEMPLATE, include_str!("templates/digest.html"))?;

    let html = env.get_template(DIGEST_TEMPLATE)?.render(context! {
      project => self.project,
      anchor => &self.anchor,
      css => self.css,
      sections => tree,
    })?;
    Ok(html)
  }

  /// `{title: {project: [records]}}`, pretty printed with sorted keys.
  pub fn format_json(&self, store: &CacheStore, filters: &[Filter]) -> serde_json::Result<String> {
    let mut root = Map::new();
    for section in build_tree(store, filters) {
      let mut projects = Map::new();
      for (project, changes) in section.projects {
        projects.insert(project.to_string(), serde_json::to_value(changes)?);
      }
      root.insert(section.title.to_string(), Value::Object(projects));
    }

    serde_json::to_string_pretty(&Value::Object(root))
  }
}

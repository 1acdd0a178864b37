/// A `/changes/` search: query terms plus requested detail options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeQuery {
  terms: Vec<String>,
  options: Vec<String>,
}

impl ChangeQuery {
  /// Changes merged into `branch` within `age` (e.g. `5days`), with labels,
  /// every revision, commit and file detail.
  pub fn merged_recently(branch: &str, age: &str) -> Self {
    Self {
      terms: vec![
        "status:merged".to_string(),
        format!("-age:{}", age),
        format!("branch:{}", branch),
      ],
      options: ["LABELS", "ALL_REVISIONS", "ALL_COMMITS", "ALL_FILES"]
        .into_iter()
        .map(String::from)
        .collect(),
    }
  }

  /// The `q` parameter.
  pub fn search(&self) -> String {
    self.terms.join(" ")
  }

  /// Query parameters for the page starting at `start`.
  pub fn params(&self, start: usize) -> Vec<(&'static str, String)> {
    let mut params = vec![("q", self.search())];
    params.extend(self.options.iter().map(|o| ("o", o.clone())));
    if start > 0 {
      params.push(("start", start.to_string()));
    }
    params
  }
}

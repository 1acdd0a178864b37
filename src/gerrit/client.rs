use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use std::future::Future;
use tracing::debug;
use url::Url;

use super::api_types::{has_more_changes, RawChange};
use super::query::ChangeQuery;
use crate::config::{Config, Credentials};
use crate::error::{DigestError, Result};

/// Gerrit prefixes JSON replies with this to defeat cross-site script inclusion.
const MAGIC_PREFIX: &str = ")]}'";

/// Anything that can list changes for a query.
pub trait ChangeSource {
  /// All changes matching `query`, in server order. Fails as a whole: no
  /// partial results.
  fn fetch_changes(&self, query: &ChangeQuery) -> impl Future<Output = Result<Vec<RawChange>>> + Send;
}

/// Gerrit REST client
#[derive(Clone)]
pub struct GerritClient {
  http: reqwest::Client,
  base: Url,
  credentials: Option<Credentials>,
}

impl GerritClient {
  pub fn new(config: &Config) -> color_eyre::Result<Self> {
    Self::with_credentials(&config.gerrit.url, Config::credentials())
  }

  pub fn with_credentials(
    base_url: &str,
    credentials: Option<Credentials>,
  ) -> color_eyre::Result<Self> {
    use color_eyre::eyre::eyre;

    // Url::join drops the last path segment unless it ends with a slash
    let base = if base_url.ends_with('/') {
      Url::parse(base_url)
    } else {
      Url::parse(&format!("{}/", base_url))
    }
    .map_err(|e| eyre!("Invalid Gerrit URL {}: {}", base_url, e))?;

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    headers.insert("Accept-Type", HeaderValue::from_static("application/json"));

    let http = reqwest::Client::builder()
      .default_headers(headers)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      http,
      base,
      credentials,
    })
  }

  /// URL of one result page. Authenticated access goes through the `a/` prefix.
  pub fn changes_url(&self, query: &ChangeQuery, start: usize) -> Result<Url> {
    let path = if self.credentials.is_some() {
      "a/changes/"
    } else {
      "changes/"
    };

    let mut url = self
      .base
      .join(path)
      .map_err(|e| DigestError::FetchFailed(format!("Invalid changes URL: {}", e)))?;
    url
      .query_pairs_mut()
      .extend_pairs(query.params(start));
    Ok(url)
  }

  async fn fetch_page(&self, query: &ChangeQuery, start: usize) -> Result<Vec<RawChange>> {
    let url = self.changes_url(query, start)?;
    debug!("GET {}", url);

    let mut request = self.http.get(url.clone());
    if let Some(credentials) = &self.credentials {
      request = request.basic_auth(&credentials.username, Some(&credentials.password));
    }

    let response = request
      .send()
      .await
      .map_err(|e| DigestError::FetchFailed(format!("{}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
      return Err(DigestError::FetchFailed(format!(
        "{} returned {}",
        url, status
      )));
    }

    let body = response
      .text()
      .await
      .map_err(|e| DigestError::FetchFailed(format!("{}: {}", url, e)))?;

    parse_page(&body)
  }
}

impl ChangeSource for GerritClient {
  async fn fetch_changes(&self, query: &ChangeQuery) -> Result<Vec<RawChange>> {
    collect_pages(|start| self.fetch_page(query, start)).await
  }
}

/// Remove the anti-hijacking prefix and the line break after it.
pub fn strip_magic_prefix(body: &str) -> Result<&str> {
  let rest = body.strip_prefix(MAGIC_PREFIX).ok_or_else(|| {
    let head: String = body.chars().take(32).collect();
    DigestError::MalformedResponse(format!("missing magic prefix, reply starts with {:?}", head))
  })?;

  Ok(
    rest
      .strip_prefix("\r\n")
      .or_else(|| rest.strip_prefix('\n'))
      .unwrap_or(rest),
  )
}

/// Decode one page body into its change objects.
pub fn parse_page(body: &str) -> Result<Vec<RawChange>> {
  let json = strip_magic_prefix(body)?;
  serde_json::from_str(json)
    .map_err(|e| DigestError::FetchFailed(format!("Failed to parse changes: {}", e)))
}

/// Follow `_more_changes` markers until the server runs out of pages.
///
/// `fetch_page` receives the offset of the first change it should return.
/// The offset advances by the size of each page rather than by a fixed page
/// size, since the server may return short pages.
pub async fn collect_pages<F, Fut>(mut fetch_page: F) -> Result<Vec<RawChange>>
where
  F: FnMut(usize) -> Fut,
  Fut: Future<Output = Result<Vec<RawChange>>>,
{
  let mut everything = Vec::new();
  let mut offset = 0usize;

  loop {
    let page = fetch_page(offset).await?;
    let more = page.last().is_some_and(has_more_changes);
    debug!("Fetched {} changes at offset {}", page.len(), offset);

    offset += page.len();
    everything.extend(page);

    if !more {
      break;
    }
  }

  Ok(everything)
}

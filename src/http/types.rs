//! Request and response model shared by the router, the cache and the write queue.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Head,
  Post,
  Put,
  Patch,
  Delete,
  Options,
}

impl Method {
  pub fn as_str(self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Head => "HEAD",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
      Method::Options => "OPTIONS",
    }
  }

  /// Reads carry no body and are candidates for caching.
  pub fn is_read(self) -> bool {
    matches!(self, Method::Get | Method::Head)
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Method {
  type Err = color_eyre::Report;

  fn from_str(s: &str) -> Result<Self> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "HEAD" => Ok(Method::Head),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      "OPTIONS" => Ok(Method::Options),
      other => Err(eyre!("Unsupported request method: {}", other)),
    }
  }
}

/// How the page issued the request, as far as origin checks go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  #[default]
  SameOrigin,
  /// Cross-origin request with CORS treatment
  Cors,
  NoCors,
  Navigate,
}

/// Cache directive attached to a request by the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CacheMode {
  #[default]
  Default,
  NoStore,
  Reload,
  NoCache,
  ForceCache,
  OnlyIfCached,
}

/// Ordered header list. Names compare case-insensitively, values are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
  pub fn new() -> Self {
    Self::default()
  }

  /// First value for `name`, if any.
  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .0
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Replace every value for `name` with a single one.
  pub fn set(&mut self, name: &str, value: &str) {
    self.0.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    self.0.push((name.to_string(), value.to_string()));
  }

  pub fn append(&mut self, name: &str, value: &str) {
    self.0.push((name.to_string(), value.to_string()));
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
    self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl FromIterator<(String, String)> for Headers {
  fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

/// An outgoing request as seen by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub cache: CacheMode,
  pub headers: Headers,
  pub body: Option<Vec<u8>>,
}

impl Request {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      mode: RequestMode::default(),
      cache: CacheMode::default(),
      headers: Headers::new(),
      body: None,
    }
  }

  /// Build a request from a method and an absolute URL string.
  pub fn parse(method: Method, url: &str) -> Result<Self> {
    let url = Url::parse(url).map_err(|e| eyre!("Invalid request url '{}': {}", url, e))?;
    Ok(Self::new(method, url))
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_cache(mut self, cache: CacheMode) -> Self {
    self.cache = cache;
    self
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.set(name, value);
    self
  }

  pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
    self.body = Some(body.into());
    self
  }

  /// Downgrade a same-origin request whose URL leaves `origin` to `Cors`.
  ///
  /// Explicit `Cors`, `NoCors` and `Navigate` modes are kept as given.
  pub fn resolve_mode(mut self, origin: &Url) -> Self {
    if self.mode == RequestMode::SameOrigin && self.url.origin() != origin.origin() {
      self.mode = RequestMode::Cors;
    }
    self
  }

  pub fn is_cross_origin(&self) -> bool {
    self.mode == RequestMode::Cors
  }

  /// Whether the request path lies under `prefix` (e.g. "/static/").
  pub fn is_under(&self, prefix: &str) -> bool {
    self.url.path().starts_with(prefix)
  }

  /// Body decoded as UTF-8 text. A missing body reads as empty.
  pub fn body_text(&self) -> Result<String> {
    match &self.body {
      Some(bytes) => String::from_utf8(bytes.clone())
        .map_err(|e| eyre!("Request body for {} is not text: {}", self.url, e)),
      None => Ok(String::new()),
    }
  }
}

/// A response, either fresh from the network or rebuilt from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Headers,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Headers::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.append(name, value);
    self
  }

  /// 2xx status.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn text(&self) -> Result<String> {
    String::from_utf8(self.body.clone()).map_err(|e| eyre!("Response body is not text: {}", e))
  }
}

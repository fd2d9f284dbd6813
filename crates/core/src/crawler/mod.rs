// Stract is an open source web search engine.
// Copyright (C) 2023 Stract ApS
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

pub mod fetcher;
pub mod frontier;
pub mod frontier_log;
pub mod parse_queue;
pub mod parser;
pub mod politeness;
pub mod router;
pub mod seed;
pub mod seen_set;
pub mod supervisor;
pub mod urlnorm;

pub use router::{pod_for_domain, PodRouter};

use crate::coordination::CoordinationStore;
use std::time::{SystemTime, UNIX_EPOCH};
use url::Url;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid content type: {0}")]
    InvalidContentType(String),

    #[error("fetch failed with status {0}")]
    FetchFailed(reqwest::StatusCode),

    #[error("content too large")]
    ContentTooLarge,

    #[error("invalid redirect")]
    InvalidRedirect,

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("domain excluded or disallowed by robots.txt")]
    NotAllowed,

    #[error("coordination store error: {0}")]
    Store(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A registered ("eTLD+1") domain. Everything in the frontier, politeness
/// cache, and shard routing is keyed by this rather than by host, so that
/// `foo.example.com` and `bar.example.com` share one politeness budget.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct Domain(String);

impl Domain {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for Domain {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<&Url> for Domain {
    type Error = Error;

    fn try_from(url: &Url) -> Result<Self> {
        urlnorm::registered_domain(url)
            .map(Domain)
            .ok_or_else(|| Error::InvalidUrl(url.to_string()))
    }
}

/// One entry discovered by the parser and handed to `Frontier::add_urls_batch`.
#[derive(Debug, Clone)]
pub struct UrlToInsert {
    pub url: Url,
    pub depth: u32,
}

/// A page successfully retrieved from the network, ready for parsing.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub url: Url,
    pub status_code: u16,
    pub body: String,
    pub content_type: ContentType,
    pub fetch_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    Html,
    Other,
}

/// Decodes a response body using whichever 8-bit/DBCS encoding actually
/// round-trips cleanly, falling back to lossy UTF-8. Mirrors the body
/// decoding the original crawler relied on for non-UTF8 pages.
pub fn decode_body(raw: &[u8]) -> String {
    if let Ok(res) = String::from_utf8(raw.to_owned()) {
        return res;
    }

    let encodings = [
        encoding_rs::WINDOWS_1251,
        encoding_rs::GBK,
        encoding_rs::SHIFT_JIS,
        encoding_rs::EUC_JP,
        encoding_rs::EUC_KR,
    ];

    for enc in encodings {
        let (cow, _, had_errors) = enc.decode(raw);
        if !had_errors {
            return cow.to_string();
        }
    }

    String::from_utf8_lossy(raw).to_string()
}

/// The post-fetch record written for every attempted URL, success or
/// failure. Keyed by a 16-hex prefix of `sha256(url)`.
#[derive(Default)]
pub struct VisitedRecord<'a> {
    pub status_code: Option<u16>,
    pub content_type: Option<&'a str>,
    pub content_hash: Option<&'a str>,
    pub content_path: Option<&'a str>,
    pub redirected_to_url: Option<&'a str>,
    pub error: Option<&'a str>,
}

fn url_hash16(url: &Url) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(url.as_str().as_bytes());
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Writes `visited:<url_hash16>` and the `visited:by_time` time index in one
/// call, shared by the fetcher (4xx/5xx/network-error/non-HTML paths) and
/// the parser (successful HTML parse path) so both write the identical
/// record shape.
pub async fn write_visited_record(
    store: &dyn CoordinationStore,
    url: &Url,
    record: VisitedRecord<'_>,
) -> Result<()> {
    let hash = url_hash16(url);
    let key = format!("visited:{hash}");
    let fetched_at = now_unix();

    let mut fields = vec![
        ("url".to_string(), url.as_str().to_string()),
        ("fetched_at".to_string(), fetched_at.to_string()),
    ];
    if let Some(status) = record.status_code {
        fields.push(("status_code".to_string(), status.to_string()));
    }
    if let Some(ct) = record.content_type {
        fields.push(("content_type".to_string(), ct.to_string()));
    }
    if let Some(hash) = record.content_hash {
        fields.push(("content_hash".to_string(), hash.to_string()));
    }
    if let Some(path) = record.content_path {
        fields.push(("content_path".to_string(), path.to_string()));
    }
    if let Some(to) = record.redirected_to_url {
        fields.push(("redirected_to_url".to_string(), to.to_string()));
    }
    if let Some(err) = record.error {
        fields.push(("error".to_string(), err.to_string()));
    }

    let field_refs: Vec<(&str, &str)> = fields.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect();
    store.hmset(&key, &field_refs).await.map_err(Error::Store)?;
    store
        .zadd("visited:by_time", &hash, fetched_at as f64)
        .await
        .map_err(Error::Store)?;
    store
        .incr("stats:pages_fetched", 1)
        .await
        .map_err(Error::Store)?;

    Ok(())
}

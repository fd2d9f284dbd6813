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

//! URL normalization and registered-domain extraction.

use url::Url;

/// Non-text extensions the frontier should never bother enqueueing.
const IGNORED_EXTENSIONS: [&str; 27] = [
    ".pdf", ".jpg", ".zip", ".png", ".css", ".js", ".json", ".jsonp", ".woff2", ".woff", ".ttf",
    ".svg", ".gif", ".jpeg", ".ico", ".mp4", ".mp3", ".avi", ".mov", ".mpeg", ".webm", ".wav",
    ".flac", ".aac", ".ogg", ".m4a", ".m4v",
];

/// Returns the eTLD+1 ("registered domain") for a URL's host, e.g.
/// `sub.example.co.uk` -> `example.co.uk`. `None` if the URL has no host or
/// the host isn't a valid domain (IP literals, single-label hosts).
pub fn registered_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let domain = psl::domain(host.as_bytes())?;
    Some(std::str::from_utf8(domain.as_bytes()).ok()?.to_string())
}

/// Normalizes a URL in place: lowercases scheme/host, strips default ports,
/// removes the fragment, and collapses a trailing slash on a non-root path.
/// This is deliberately narrower than the monolith's search-index
/// normalization (which also strips tracking query parameters) -- the
/// frontier only needs two URLs that name the same resource to dedup to the
/// same seen-set key, not search-ranking-grade canonicalization.
pub fn normalize(url: &mut Url) {
    url.set_fragment(None);

    if let Some(host) = url.host_str() {
        let lower = host.to_ascii_lowercase();
        if lower != host {
            let _ = url.set_host(Some(&lower));
        }
    }

    let default_port = match url.scheme() {
        "http" => Some(80),
        "https" => Some(443),
        _ => None,
    };
    if url.port() == default_port {
        let _ = url.set_port(None);
    }

    if url.path().len() > 1 && url.path().ends_with('/') {
        let trimmed = url.path().trim_end_matches('/').to_string();
        url.set_path(&trimmed);
    }
}

/// `true` if the URL is within scope for the frontier: http(s) scheme, a
/// resolvable host, within the configured byte budget, and not an extension
/// the crawler has no use for.
pub fn in_scope(url: &Url, max_len_bytes: usize) -> bool {
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }

    if url.host_str().is_none() {
        return false;
    }

    if url.as_str().len() > max_len_bytes {
        return false;
    }

    let path = url.path().to_ascii_lowercase();
    if IGNORED_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
        return false;
    }

    true
}

//! Seed and exclude file loading. UTF-8, one entry per line; blank lines
//! and `#`-prefixed lines are skipped, matching the original Python
//! source's `_load_manual_exclusions` comment convention.

use crate::crawler::politeness::PolitenessEnforcer;
use crate::Result;
use url::Url;

fn non_comment_lines(contents: &str) -> impl Iterator<Item = &str> {
    contents.lines().map(str::trim).filter(|line| !line.is_empty() && !line.starts_with('#'))
}

/// Parses a seed file into normalized, deduplicated seed URLs. Malformed
/// lines are skipped and logged at debug rather than failing the load.
pub async fn load_seed_urls(path: &str) -> Result<Vec<Url>> {
    let contents = tokio::fs::read_to_string(path).await?;
    let mut urls = Vec::new();

    for line in non_comment_lines(&contents) {
        match Url::parse(line) {
            Ok(mut url) => {
                crate::crawler::urlnorm::normalize(&mut url);
                urls.push(url);
            }
            Err(err) => {
                tracing::debug!(line, error = %err, "skipping malformed seed url");
            }
        }
    }

    Ok(urls)
}

/// Loads `exclude_file`'s one-domain-per-line list and marks each domain
/// excluded via the politeness enforcer, so the exclusion takes effect for
/// every domain before the first URL is ever dequeued.
pub async fn load_exclusions(path: &str, politeness: &PolitenessEnforcer) -> Result<usize> {
    let contents = tokio::fs::read_to_string(path).await?;
    let mut count = 0;

    for domain in non_comment_lines(&contents) {
        politeness.mark_excluded(domain).await?;
        count += 1;
    }

    Ok(count)
}

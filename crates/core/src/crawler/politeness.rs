//! The politeness enforcer: robots.txt fetch/cache/parse, manual
//! exclusions, crawl-delay floors, and the per-domain next-fetch gate.
//! Grounded on the monolith's `RobotsTxtManager` (the `Lookup<T>::{Found,
//! Unavailable, Unreachable}` tri-state and the http-then-https-then-www.
//! fallback chain) and the original Python source's `politeness.py` (the
//! `MIN_CRAWL_DELAY_SECONDS` floor, NUL-byte sanitization, and the
//! seeded/excluded fold).

use crate::config::{PolitenessConfig, UserAgent};
use crate::coordination::CoordinationStore;
use crate::crawler::Domain;
use crate::Result;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;
use url::Url;

fn domain_key(domain: &str) -> String {
    format!("domain:{domain}")
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

enum Lookup<T> {
    Found(T),
    /// 4xx: treated as allow-all.
    Unavailable,
    /// network failure: also treated as allow-all (fail-open).
    Unreachable,
}

pub struct PolitenessEnforcer {
    store: Arc<dyn CoordinationStore>,
    client: reqwest::Client,
    config: PolitenessConfig,
    user_agent: UserAgent,
    ruleset_cache: Mutex<LruCache<String, Arc<robotstxt::Robots>>>,
    exclusion_cache: Mutex<LruCache<String, bool>>,
}

impl PolitenessEnforcer {
    pub fn new(store: Arc<dyn CoordinationStore>, config: PolitenessConfig, user_agent: UserAgent) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_sec))
            .user_agent(user_agent.full.clone())
            .build()?;

        Ok(Self {
            store,
            client,
            ruleset_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(config.robots_cache_capacity.max(1)).unwrap(),
            )),
            exclusion_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(config.exclusion_cache_capacity.max(1)).unwrap(),
            )),
            config,
            user_agent,
        })
    }

    /// `is_url_allowed`: domain-less URLs are allowed (there's nothing to
    /// gate on); manual exclusion/seeded-only folds into one boolean; a
    /// ruleset that can't be obtained at all allows (fail-open) since the
    /// dequeue loop needs forward progress.
    pub async fn is_url_allowed(&self, url: &Url) -> Result<bool> {
        let Ok(domain) = Domain::try_from(url) else {
            return Ok(true);
        };

        if self.is_domain_gated(&domain).await? {
            return Ok(false);
        }

        let ruleset = self.get_ruleset(&domain).await?;
        Ok(ruleset.is_allowed(url))
    }

    /// Folds manual exclusion and (when `seeded_urls_only` is on)
    /// never-appeared-in-seed-set into one gate, matching the original
    /// source's single boolean rather than two independently-failing checks.
    async fn is_domain_gated(&self, domain: &Domain) -> Result<bool> {
        if let Some(cached) = self.exclusion_cache.lock().await.get(domain.as_str()).copied() {
            return Ok(cached);
        }

        let key = domain_key(domain.as_str());
        let is_excluded = self
            .store
            .hget(&key, "is_excluded")
            .await
            .unwrap_or(None)
            .as_deref()
            == Some("1");

        let gated = if is_excluded {
            true
        } else if self.config.seeded_urls_only {
            let is_seeded = self
                .store
                .hget(&key, "is_seeded")
                .await
                .unwrap_or(None)
                .as_deref()
                == Some("1");
            !is_seeded
        } else {
            false
        };

        self.exclusion_cache
            .lock()
            .await
            .put(domain.as_str().to_string(), gated);

        Ok(gated)
    }

    /// Marks `domain` as manually excluded, both in the persistent hash and
    /// the in-memory cache, so a freshly loaded exclude file takes effect
    /// immediately without waiting for a cache miss.
    pub async fn mark_excluded(&self, domain: &str) -> Result<()> {
        self.store.hset(&domain_key(domain), "is_excluded", "1").await?;
        self.exclusion_cache.lock().await.put(domain.to_string(), true);
        Ok(())
    }

    /// `get_ruleset`: in-memory cache -> persistent cache (if not expired)
    /// -> fresh fetch, https first then http, with a `www.` retry on a bare
    /// second-level domain that 404s both ways.
    async fn get_ruleset(&self, domain: &Domain) -> Result<Arc<robotstxt::Robots>> {
        if let Some(cached) = self.ruleset_cache.lock().await.get(domain.as_str()) {
            return Ok(cached.clone());
        }

        let key = domain_key(domain.as_str());
        let expires: u64 = self
            .store
            .hget(&key, "robots_expires")
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        let body = if expires > now_unix() {
            self.store.hget(&key, "robots_txt").await?.unwrap_or_default()
        } else {
            let body = self.fetch_robots_txt(domain.as_str()).await;
            let ttl = self.config.robots_txt_ttl_sec;
            self.store.hset(&key, "robots_txt", &body).await?;
            self.store
                .hset(&key, "robots_expires", &(now_unix() + ttl).to_string())
                .await?;
            body
        };

        let sanitized = sanitize_body(&body, self.config.max_robots_txt_len_bytes);
        let ruleset = Arc::new(
            robotstxt::Robots::parse(&self.user_agent.token, &sanitized)
                .unwrap_or_else(|_| robotstxt::Robots::parse(&self.user_agent.token, "").unwrap()),
        );

        self.ruleset_cache
            .lock()
            .await
            .put(domain.as_str().to_string(), ruleset.clone());

        Ok(ruleset)
    }

    async fn fetch_one(&self, url: String) -> Lookup<String> {
        match self.client.get(&url).send().await {
            Ok(res) if res.status().is_success() => match res.text().await {
                Ok(body) => Lookup::Found(body),
                Err(_) => Lookup::Unreachable,
            },
            Ok(res) if res.status().is_client_error() => Lookup::Unavailable,
            Ok(_) => Lookup::Unreachable,
            Err(_) => Lookup::Unreachable,
        }
    }

    /// https first, falling back to http on non-2xx; on a 4xx from both, try
    /// `https://www.<domain>/robots.txt` once if `domain` looks like a bare
    /// second-level domain. Anything left over -- network failure or a
    /// second 4xx -- is treated as empty (allow-all).
    async fn fetch_robots_txt(&self, domain: &str) -> String {
        match self.fetch_one(format!("https://{domain}/robots.txt")).await {
            Lookup::Found(body) => return body,
            Lookup::Unreachable => {
                if let Lookup::Found(body) = self.fetch_one(format!("http://{domain}/robots.txt")).await {
                    return body;
                }
            }
            Lookup::Unavailable => {
                if let Lookup::Found(body) = self.fetch_one(format!("http://{domain}/robots.txt")).await {
                    return body;
                }

                if !domain.starts_with("www.") && domain.matches('.').count() == 1 {
                    if let Lookup::Found(body) =
                        self.fetch_one(format!("https://www.{domain}/robots.txt")).await
                    {
                        return body;
                    }
                }
            }
        }

        String::new()
    }

    /// `get_crawl_delay`: agent-specific `Crawl-delay` from the ruleset if
    /// declared, floored unconditionally at `min_crawl_delay_sec` -- the
    /// floor applies even when robots.txt declares a smaller value, not
    /// only when nothing is declared.
    pub async fn get_crawl_delay(&self, domain: &Domain) -> Result<Duration> {
        let floor = Duration::from_secs(self.config.min_crawl_delay_sec);
        let ruleset = self.get_ruleset(domain).await?;
        Ok(ruleset.crawl_delay().map(|d| d.max(floor)).unwrap_or(floor))
    }

    /// `can_fetch_domain_now`: the *one* enforcer method that
    /// denies rather than allows on a coordination-store error, since a
    /// transient failure here must never be read as "politeness doesn't
    /// apply".
    pub async fn can_fetch_domain_now(&self, domain: &Domain) -> Result<bool> {
        let key = domain_key(domain.as_str());
        match self.store.hget(&key, "next_fetch_time").await {
            Ok(value) => {
                let next: u64 = value.and_then(|v| v.parse().ok()).unwrap_or(0);
                Ok(now_unix() >= next)
            }
            Err(err) => {
                tracing::warn!(domain = domain.as_str(), error = %err, "coordination store error checking next_fetch_time, denying fetch");
                Ok(false)
            }
        }
    }

    /// `record_domain_fetch_attempt`: sets `next_fetch_time` to
    /// `now + get_crawl_delay(domain)`, the write that actually enforces the
    /// gate the next time `can_fetch_domain_now` is consulted.
    pub async fn record_domain_fetch_attempt(&self, domain: &Domain) -> Result<()> {
        let delay = self.get_crawl_delay(domain).await?;
        let key = domain_key(domain.as_str());
        self.store
            .hset(&key, "next_fetch_time", &(now_unix() + delay.as_secs()).to_string())
            .await?;
        Ok(())
    }
}

/// NUL-byte sanitization + length truncation: a body containing a NUL byte
/// is treated as empty rather than fed to the parser, distinct from the
/// separate byte-length truncation.
fn sanitize_body(body: &str, max_len: usize) -> String {
    if body.contains('\0') {
        return String::new();
    }

    let end = stdx::ceil_char_boundary(body, max_len.min(body.len()));
    body[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeStore {
        hashes: StdMutex<HashMap<String, HashMap<String, String>>>,
    }

    #[async_trait::async_trait]
    impl CoordinationStore for FakeStore {
        async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
            Ok(self
                .hashes
                .lock()
                .unwrap()
                .get(key)
                .and_then(|h| h.get(field))
                .cloned())
        }
        async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
            self.hashes
                .lock()
                .unwrap()
                .entry(key.to_string())
                .or_default()
                .insert(field.to_string(), value.to_string());
            Ok(())
        }
        async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>> {
            let hashes = self.hashes.lock().unwrap();
            let h = hashes.get(key);
            Ok(fields
                .iter()
                .map(|f| h.and_then(|h| h.get(*f)).cloned())
                .collect())
        }
        async fn hmset(&self, key: &str, fields: &[(&str, &str)]) -> Result<()> {
            let mut hashes = self.hashes.lock().unwrap();
            let h = hashes.entry(key.to_string()).or_default();
            for (f, v) in fields {
                h.insert(f.to_string(), v.to_string());
            }
            Ok(())
        }
        async fn hincr_by(&self, _: &str, _: &str, by: i64) -> Result<i64> {
            Ok(by)
        }
        async fn incr(&self, _: &str, by: i64) -> Result<i64> {
            Ok(by)
        }
        async fn get(&self, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn lpush(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn rpush(&self, _: &str, _: &str) -> Result<()> {
            Ok(())
        }
        async fn lpop(&self, _: &str) -> Result<Option<String>> {
            Ok(None)
        }
        async fn llen(&self, _: &str) -> Result<usize> {
            Ok(0)
        }
        async fn zadd(&self, _: &str, _: &str, _: f64) -> Result<()> {
            Ok(())
        }
        async fn zcard(&self, _: &str) -> Result<usize> {
            Ok(0)
        }
        async fn setbit(&self, _: &str, _: u64, _: bool) -> Result<bool> {
            Ok(false)
        }
        async fn getbit(&self, _: &str, _: u64) -> Result<bool> {
            Ok(false)
        }
        async fn setnx_with_expiry(&self, _: &str, _: &str, _: Duration) -> Result<bool> {
            Ok(true)
        }
        async fn delete(&self, _: &str) -> Result<()> {
            Ok(())
        }
        async fn flush_all(&self) -> Result<()> {
            self.hashes.lock().unwrap().clear();
            Ok(())
        }
    }

    fn test_config() -> PolitenessConfig {
        PolitenessConfig {
            robots_txt_ttl_sec: 86_400,
            min_crawl_delay_sec: 5,
            robots_cache_capacity: 100,
            exclusion_cache_capacity: 100,
            max_robots_txt_len_bytes: 500 * 1024,
            fetch_timeout_sec: 5,
            seeded_urls_only: false,
        }
    }

    fn test_agent() -> UserAgent {
        UserAgent {
            full: "TestBot/1.0 (+mailto:test@example.com)".to_string(),
            token: "TestBot".to_string(),
        }
    }

    #[tokio::test]
    async fn no_robots_cached_means_allow_all() {
        let store = Arc::new(FakeStore::default());
        // Pre-seed an unexpired, empty robots.txt cache entry so the test
        // doesn't attempt a live network fetch.
        store
            .hset("domain:example.com", "robots_txt", "")
            .await
            .unwrap();
        store
            .hset("domain:example.com", "robots_expires", &(now_unix() + 86_400).to_string())
            .await
            .unwrap();

        let enforcer = PolitenessEnforcer::new(store, test_config(), test_agent()).unwrap();
        let url = Url::parse("https://example.com/secret").unwrap();
        assert!(enforcer.is_url_allowed(&url).await.unwrap());
    }

    #[tokio::test]
    async fn manual_exclusion_denies() {
        let store = Arc::new(FakeStore::default());
        store
            .hset("domain:example.com", "robots_txt", "")
            .await
            .unwrap();
        store
            .hset("domain:example.com", "robots_expires", &(now_unix() + 86_400).to_string())
            .await
            .unwrap();

        let enforcer = PolitenessEnforcer::new(store.clone(), test_config(), test_agent()).unwrap();
        enforcer.mark_excluded("example.com").await.unwrap();

        let url = Url::parse("https://example.com/anything").unwrap();
        assert!(!enforcer.is_url_allowed(&url).await.unwrap());
    }

    #[tokio::test]
    async fn crawl_delay_floors_at_minimum() {
        let store = Arc::new(FakeStore::default());
        store
            .hset("domain:example.com", "robots_txt", "User-agent: *\nCrawl-delay: 1\n")
            .await
            .unwrap();
        store
            .hset("domain:example.com", "robots_expires", &(now_unix() + 86_400).to_string())
            .await
            .unwrap();

        let enforcer = PolitenessEnforcer::new(store, test_config(), test_agent()).unwrap();
        let domain = Domain::from("example.com".to_string());
        let delay = enforcer.get_crawl_delay(&domain).await.unwrap();
        assert_eq!(delay, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn can_fetch_domain_now_defaults_to_zero() {
        let store = Arc::new(FakeStore::default());
        let enforcer = PolitenessEnforcer::new(store, test_config(), test_agent()).unwrap();
        let domain = Domain::from("example.com".to_string());
        assert!(enforcer.can_fetch_domain_now(&domain).await.unwrap());
    }

    #[tokio::test]
    async fn record_fetch_attempt_blocks_until_delay_elapses() {
        let store = Arc::new(FakeStore::default());
        store
            .hset("domain:example.com", "robots_txt", "")
            .await
            .unwrap();
        store
            .hset("domain:example.com", "robots_expires", &(now_unix() + 86_400).to_string())
            .await
            .unwrap();

        let enforcer = PolitenessEnforcer::new(store, test_config(), test_agent()).unwrap();
        let domain = Domain::from("example.com".to_string());

        enforcer.record_domain_fetch_attempt(&domain).await.unwrap();
        assert!(!enforcer.can_fetch_domain_now(&domain).await.unwrap());
    }

    #[test]
    fn sanitize_rejects_nul_bytes() {
        assert_eq!(sanitize_body("Disallow: /\0secret", 1000), "");
    }

    #[test]
    fn sanitize_truncates_to_max_len() {
        let body = "a".repeat(100);
        assert_eq!(sanitize_body(&body, 10).len(), 10);
    }
}

//! The parser worker loop: pop a fetched payload, extract
//! title/text/links, persist content to a sharded data directory, write the
//! visited record, and route newly discovered links to the right pod's
//! frontier. HTML extraction uses the `scraper` crate in place of the
//! monolith's kuchiki-based DOM walk (kuchiki isn't in the retrieval pack);
//! grounded on `examples/lsendel-llmrank_app`'s use of `scraper` for the
//! same extract-links-and-text task.

use crate::coordination::CoordinationStore;
use crate::crawler::parse_queue::{ParsePayload, ParseQueue};
use crate::crawler::router::PodRouter;
use crate::crawler::{write_visited_record, Error, Result, UrlToInsert, VisitedRecord};
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use url::Url;

const CONTENT_HASH_PREFIX_LEN: usize = 16;

pub struct ParserWorker {
    parse_queue: Arc<ParseQueue>,
    store: Arc<dyn CoordinationStore>,
    router: Arc<PodRouter>,
    data_dirs: Vec<String>,
    max_links_per_page: usize,
    shutdown: watch::Receiver<bool>,
}

impl ParserWorker {
    pub fn new(
        parse_queue: Arc<ParseQueue>,
        store: Arc<dyn CoordinationStore>,
        router: Arc<PodRouter>,
        data_dirs: Vec<String>,
        max_links_per_page: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            parse_queue,
            store,
            router,
            data_dirs,
            max_links_per_page,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                return;
            }

            match self.parse_queue.pop().await {
                Ok(Some(payload)) => {
                    if let Err(err) = self.handle(payload).await {
                        tracing::error!(error = %err, "parser error on payload");
                        if let Err(err) = self.store.incr("stats:parse_errors", 1).await {
                            tracing::error!(error = %err, "failed to increment parse error counter");
                        }
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                        _ = self.shutdown.changed() => {}
                    }
                }
                Err(err) => {
                    tracing::error!(error = %err, "failed to pop parse queue");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            }
        }
    }

    async fn handle(&self, payload: ParsePayload) -> Result<()> {
        let ParsePayload {
            url,
            depth,
            body,
            status,
            ..
        } = payload;

        let document = Html::parse_document(&body);
        let title = extract_title(&document);
        let text = extract_text(&document);
        let links = extract_links(&document, &url, self.max_links_per_page);

        let content_hash = content_hash_hex(&url);
        let content_path = self.persist_content(&url, &content_hash, &text).await?;

        write_visited_record(
            self.store.as_ref(),
            &url,
            VisitedRecord {
                status_code: Some(status),
                content_type: Some("text/html"),
                content_hash: Some(&content_hash),
                content_path: Some(&content_path),
                ..Default::default()
            },
        )
        .await?;

        tracing::debug!(url = %url, title = title.as_deref().unwrap_or(""), links = links.len(), "parsed page");

        self.route_links(links, depth + 1).await
    }

    /// Picks the data directory by `sha256(url) mod len(data_dirs)` (spec
    /// §4.7 step 3) and writes the extracted text under its `content/`
    /// subfolder. The filename is content-addressed, so two parses of the
    /// same URL idempotently overwrite the same file.
    async fn persist_content(&self, url: &Url, content_hash: &str, text: &str) -> Result<String> {
        if self.data_dirs.is_empty() {
            return Err(Error::Store(anyhow::anyhow!("no data_dirs configured")));
        }

        let digest = Sha256::digest(url.as_str().as_bytes());
        let shard = (digest[0] as usize) % self.data_dirs.len();
        let dir = std::path::Path::new(&self.data_dirs[shard]).join("content");

        tokio::fs::create_dir_all(&dir).await.map_err(|e| Error::Store(e.into()))?;

        let path = dir.join(format!("{content_hash}.txt"));
        tokio::fs::write(&path, text).await.map_err(|e| Error::Store(e.into()))?;

        Ok(path.to_string_lossy().to_string())
    }

    /// Groups extracted links by the pod that owns their domain and enqueues
    /// each group through that pod's `Frontier` handle.
    async fn route_links(&self, links: Vec<Url>, depth: u32) -> Result<()> {
        use std::collections::HashMap;

        let mut by_pod: HashMap<usize, Vec<UrlToInsert>> = HashMap::new();
        for link in links {
            let Ok(domain) = crate::crawler::Domain::try_from(&link) else {
                continue;
            };
            let pod_id = self.router.pod_for(domain.as_str());
            by_pod.entry(pod_id).or_default().push(UrlToInsert { url: link, depth });
        }

        for (_, entries) in by_pod {
            if entries.is_empty() {
                continue;
            }
            let domain = crate::crawler::Domain::try_from(&entries[0].url).ok();
            let Some(domain) = domain else { continue };
            let frontier = self.router.frontier_for(domain.as_str());
            frontier.add_urls_batch(&entries).await?;
        }

        Ok(())
    }
}

fn content_hash_hex(url: &Url) -> String {
    let digest = Sha256::digest(url.as_str().as_bytes());
    digest[..CONTENT_HASH_PREFIX_LEN / 2]
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
}

fn extract_text(document: &Html) -> String {
    document.root_element().text().collect::<Vec<_>>().join(" ")
}

fn extract_links(document: &Html, base: &Url, max_links: usize) -> Vec<Url> {
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();

    for el in document.select(&selector) {
        let Some(href) = el.value().attr("href") else {
            continue;
        };

        let Ok(mut resolved) = base.join(href) else {
            continue;
        };
        crate::crawler::urlnorm::normalize(&mut resolved);

        if !crate::crawler::urlnorm::in_scope(&resolved, 2000) {
            continue;
        }

        if seen.insert(resolved.clone()) {
            links.push(resolved);
        }

        if links.len() >= max_links {
            break;
        }
    }

    links
}

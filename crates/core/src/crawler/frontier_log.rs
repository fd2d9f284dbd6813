//! The per-domain append-only frontier file log. Adapted from the
//! append-then-track-an-offset shape of the monolith's mmap-backed file
//! queue, but with two deliberate departures: the wire format is plain
//! text (`url|depth\n`), not a bincode/postcard binary record, and the
//! read offset lives in the coordination store rather than
//! a local pointer file, so any fetcher process in the pod can resume
//! reading a domain another fetcher left off. A plain `BufWriter`/seek+
//! `read_line` pair replaces the mmap: the file is actively appended to by
//! concurrent writers, which a one-shot `Mmap::map` snapshot would not see.

use crate::crawler::UrlToInsert;
use crate::Result;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, AsyncWriteExt, BufReader};
use url::Url;

pub struct FrontierLog {
    dir: PathBuf,
}

impl FrontierLog {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// `frontier_dir/<first-2-hex-of-md5(domain)>/<domain>.frontier`: the
    /// 2-hex shard prefix keeps any single directory from accumulating one
    /// file per domain across hundreds of millions of domains.
    fn path_for(&self, domain: &str) -> PathBuf {
        let digest = md5::compute(domain.as_bytes());
        let shard = format!("{:02x}", digest[0]);
        self.dir.join(shard).join(format!("{domain}.frontier"))
    }

    /// Exposes the on-disk path for `domain`'s frontier file, so callers can
    /// record it in the domain's coordination-store metadata (`file_path`
    /// field) without duplicating the shard math.
    pub fn path_for_domain(&self, domain: &str) -> PathBuf {
        self.path_for(domain)
    }

    async fn open_append(&self, domain: &str) -> Result<File> {
        if let Some(parent) = self.path_for(domain).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(domain))
            .await?)
    }

    /// Appends a batch of URLs for `domain`, one `url|depth` line each.
    /// Returns the number of bytes appended, so the caller can roll that
    /// into the domain's `frontier_size` counter in the coordination store.
    pub async fn append(&self, domain: &str, urls: &[UrlToInsert]) -> Result<u64> {
        let mut file = self.open_append(domain).await?;
        let mut buf = String::new();
        for entry in urls {
            buf.push_str(entry.url.as_str());
            buf.push('|');
            buf.push_str(&entry.depth.to_string());
            buf.push('\n');
        }
        file.write_all(buf.as_bytes()).await?;
        file.flush().await?;
        Ok(buf.len() as u64)
    }

    /// Reads one entry at `offset` and returns it along with the offset of
    /// the line following it. `None` if `offset` is at or past EOF.
    pub async fn read_one(&self, domain: &str, offset: u64) -> Result<Option<(UrlToInsert, u64)>> {
        let path = self.path_for(domain);
        if !path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&path).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut reader = BufReader::new(file);

        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 || !line.ends_with('\n') {
            // Either EOF or a torn write from a concurrent appender still in
            // flight; treat both as "nothing ready yet".
            return Ok(None);
        }

        let new_offset = offset + bytes_read as u64;
        let trimmed = line.trim_end_matches('\n');

        let Some((url_part, depth_part)) = trimmed.rsplit_once('|') else {
            return Ok(Some((
                UrlToInsert {
                    url: Url::parse(trimmed).map_err(|e| anyhow::anyhow!(e))?,
                    depth: 0,
                },
                new_offset,
            )));
        };

        let url = Url::parse(url_part).map_err(|e| anyhow::anyhow!(e))?;
        let depth: u32 = depth_part.parse().unwrap_or(0);

        Ok(Some((UrlToInsert { url, depth }, new_offset)))
    }
}

//! Suffix-matching domain set with file/URL ingestion and adblock-syntax
//! line parsing. Grounded on `original_source/edge/internal/filter/blocklist.go`
//! for the parser, and `original_source/proxy/internal/filter/engine.go` for
//! the cache-file + periodic-refresh pattern.

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use tracing::{info, warn};

use crate::domain_name::{canonicalize, is_ip_literal, suffixes};
use crate::error::{CoreError, CoreResult};

/// A suffix-matching set of canonical domains. Cheap to clone (wraps an
/// `Arc`-free `RwLock` behind a reference held by the caller) — callers share
/// it as `Arc<BlocklistSet>`.
pub struct BlocklistSet {
    domains: RwLock<HashSet<String>>,
}

impl BlocklistSet {
    pub fn new(seed: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        let domains = seed
            .into_iter()
            .map(|d| canonicalize(d.as_ref()))
            .filter(|d| !d.is_empty())
            .collect();
        Self { domains: RwLock::new(domains) }
    }

    pub fn empty() -> Self {
        Self { domains: RwLock::new(HashSet::new()) }
    }

    /// Walk `host` from the full name down to its last label and return true
    /// on the first suffix present in the set.
    pub fn contains(&self, host: &str) -> bool {
        let canon = canonicalize(host);
        if canon.is_empty() {
            return false;
        }
        let domains = self.domains.read().expect("blocklist lock poisoned");
        let found = suffixes(&canon).any(|s| domains.contains(s));
        found
    }

    /// Insert-only union; idempotent.
    pub fn merge(&self, incoming: impl IntoIterator<Item = String>) {
        let mut domains = self.domains.write().expect("blocklist lock poisoned");
        for d in incoming {
            if !d.is_empty() {
                domains.insert(d);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.domains.read().expect("blocklist lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<String> {
        let mut v: Vec<String> =
            self.domains.read().expect("blocklist lock poisoned").iter().cloned().collect();
        v.sort();
        v
    }

    /// Lines starting with `#` or empty ignored. A missing file yields an
    /// empty set, not an error.
    pub async fn load_from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "blocklist file absent, starting empty");
                return Ok(Self::empty());
            }
            Err(e) => return Err(CoreError::BlocklistIo(e)),
        };

        let domains: Vec<String> = contents
            .lines()
            .filter(|l| {
                let t = l.trim();
                !t.is_empty() && !t.starts_with('#')
            })
            .map(|l| canonicalize(l.trim()))
            .filter(|d| !d.is_empty())
            .collect();

        Ok(Self::new(domains))
    }

    /// Fetch each URL with a per-request timeout, parse adblock-syntax
    /// lines, and merge. Fetch/parse happen outside any lock; only the
    /// final merge takes the write lock.
    pub async fn append_from_urls(&self, urls: &[String], timeout: Duration) {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "failed to build blocklist fetch client");
                return;
            }
        };

        for url in urls {
            let url = url.trim();
            if url.is_empty() {
                continue;
            }
            match fetch_and_parse(&client, url).await {
                Ok(domains) => {
                    let n = domains.len();
                    self.merge(domains);
                    info!(url, added = n, "merged remote blocklist");
                }
                Err(e) => {
                    warn!(url, error = %e, "failed to load remote blocklist, continuing");
                }
            }
        }
    }

    /// Serialize the current set, one canonical domain per line, to `path`.
    pub async fn persist_to_file(&self, path: impl AsRef<Path>) -> CoreResult<()> {
        let body = self.snapshot().join("\n");
        tokio::fs::write(path, body).await.map_err(CoreError::BlocklistIo)
    }
}

async fn fetch_and_parse(client: &reqwest::Client, url: &str) -> CoreResult<Vec<String>> {
    let body = client
        .get(url)
        .send()
        .await
        .map_err(|e| CoreError::BlocklistFetch(e.to_string()))?
        .error_for_status()
        .map_err(|e| CoreError::BlocklistFetch(e.to_string()))?
        .text()
        .await
        .map_err(|e| CoreError::BlocklistFetch(e.to_string()))?;

    Ok(body.lines().filter_map(parse_filter_line).collect())
}

/// Deterministic adblock-flavor line parser. Applies the rules in order;
/// the first matching rule decides the outcome.
pub fn parse_filter_line(raw: &str) -> Option<String> {
    let line = raw.trim();

    if line.is_empty()
        || line.starts_with('!')
        || line.starts_with('[')
        || line.starts_with("##")
        || line.starts_with("@@")
    {
        return None;
    }

    if let Some(rest) = line.strip_prefix("||") {
        let cut = rest.find(['^', '/']).unwrap_or(rest.len());
        let name = canonicalize(&rest[..cut]);
        return if name.is_empty() { None } else { Some(name) };
    }

    if let Some(rest) = line.strip_prefix("|http") {
        let rest = rest.strip_prefix('s').unwrap_or(rest);
        if let Some(after_scheme) = rest.find("://").map(|i| &rest[i + 3..]) {
            let cut = after_scheme.find('/').unwrap_or(after_scheme.len());
            let name = canonicalize(&after_scheme[..cut]);
            return if name.is_empty() { None } else { Some(name) };
        }
        return None;
    }

    // hosts-file style: "<ip> <hostname> [aliases...]"
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() >= 2 && fields[0].parse::<IpAddr>().is_ok() {
        let name = canonicalize(fields[fields.len() - 1]);
        return if name.is_empty() { None } else { Some(name) };
    }

    if is_ip_literal(line) {
        return None;
    }

    let name = canonicalize(line);
    if name.is_empty() { None } else { Some(name) }
}

/// Drives the periodic refresh loop: immediate refresh at startup, then
/// every `interval`. Mirrors `proxy/internal/filter/engine.go`'s `Start`.
pub async fn run_refresh_loop(
    set: std::sync::Arc<BlocklistSet>,
    urls: Vec<String>,
    cache_path: Option<PathBuf>,
    fetch_timeout: Duration,
    interval: Duration,
) {
    loop {
        if !urls.is_empty() {
            set.append_from_urls(&urls, fetch_timeout).await;
            if let Some(path) = &cache_path {
                if let Err(e) = set.persist_to_file(path).await {
                    warn!(error = %e, "failed to persist blocklist cache");
                }
            }
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_matches_by_suffix() {
        let set = BlocklistSet::new(["ads.example.com"]);
        assert!(set.contains("video.ads.example.com"));
        assert!(set.contains("ads.example.com"));
        assert!(!set.contains("example.com"));
        assert!(!set.contains("other.test"));
    }

    #[test]
    fn contains_is_case_and_dot_insensitive() {
        let set = BlocklistSet::new(["Ads.Example.com"]);
        assert!(set.contains("VIDEO.ads.EXAMPLE.com."));
    }

    #[test]
    fn merge_is_idempotent() {
        let set = BlocklistSet::empty();
        set.merge(vec!["a.test".to_string()]);
        set.merge(vec!["a.test".to_string()]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn parse_skips_comments_and_cosmetic_rules() {
        assert_eq!(parse_filter_line("! comment"), None);
        assert_eq!(parse_filter_line("[Adblock Plus 2.0]"), None);
        assert_eq!(parse_filter_line("##.banner-ad"), None);
        assert_eq!(parse_filter_line("@@||example.com^"), None);
        assert_eq!(parse_filter_line(""), None);
    }

    #[test]
    fn parse_double_pipe_rule() {
        assert_eq!(parse_filter_line("||ads.example.com^"), Some("ads.example.com".into()));
        assert_eq!(parse_filter_line("||tracker.test/path"), Some("tracker.test".into()));
    }

    #[test]
    fn parse_pipe_http_rule() {
        assert_eq!(
            parse_filter_line("|http://ads.example.com/banner.js"),
            Some("ads.example.com".into())
        );
        assert_eq!(
            parse_filter_line("|https://tracker.test/"),
            Some("tracker.test".into())
        );
    }

    #[test]
    fn parse_hosts_file_line() {
        assert_eq!(parse_filter_line("0.0.0.0 ads.example.com"), Some("ads.example.com".into()));
        assert_eq!(parse_filter_line("127.0.0.1 localhost"), Some("localhost".into()));
    }

    #[test]
    fn parse_bare_ip_is_skipped() {
        assert_eq!(parse_filter_line("198.51.100.12"), None);
    }

    #[test]
    fn parse_plain_domain_line() {
        assert_eq!(parse_filter_line("  Ads.Example.com  "), Some("ads.example.com".into()));
    }

    #[tokio::test]
    async fn load_from_missing_file_is_empty_not_error() {
        let set = BlocklistSet::load_from_file("/nonexistent/path/does-not-exist.txt").await.unwrap();
        assert!(set.is_empty());
    }
}

//! Feed scraper with cross-user cache
//!
//! Fetches RSS feeds (via feed-rs) and plain website pages. Parsed results
//! are cached per URL for one hour so that users sharing a source cost one
//! upstream fetch. Cache entries carry no source identity; the caller's
//! source id is attached on read, which keeps cached parses side-effect
//! free with respect to any one user's database rows.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use briefwire_common::db::models::{Source, SourceType};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

const USER_AGENT: &str = "briefwire/0.1 (+https://briefwire.io)";
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);
const CACHE_TTL: Duration = Duration::from_secs(60 * 60);
/// Feed items older than this are dropped at parse time
const MAX_ITEM_AGE_DAYS: i64 = 7;
/// I/O concurrency for the pre-warm fan-out
const PREWARM_CONCURRENCY: usize = 32;
/// Per-user scrape fan-out across that user's sources
const SCRAPE_CONCURRENCY: usize = 5;

/// Scraper errors
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {0} from {1}")]
    HttpStatus(u16, String),

    #[error("Feed parse error: {0}")]
    Parse(String),
}

/// One parsed feed item, not yet tied to any source id
#[derive(Debug, Clone)]
pub struct ScrapedArticle {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub published_at: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub guid: Option<String>,
}

/// Result of scraping one source: the caller's source id re-attached to
/// the (possibly cached) parse
#[derive(Debug, Clone)]
pub struct SourceScrape {
    pub source_id: Uuid,
    pub articles: Vec<ScrapedArticle>,
    pub error: Option<String>,
}

struct CacheEntry {
    fetched_at: Instant,
    articles: Vec<ScrapedArticle>,
}

/// Feed scraper with a process-wide URL-keyed parse cache
pub struct FeedScraper {
    client: reqwest::Client,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl FeedScraper {
    pub fn new() -> Result<Self, ScrapeError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| ScrapeError::Network(e.to_string()))?;

        Ok(Self {
            client,
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Scrape one source, serving from cache when the parse is fresh
    pub async fn scrape(&self, source: &Source) -> SourceScrape {
        if let Some(articles) = self.cached(&source.url).await {
            tracing::debug!(url = %source.url, count = articles.len(), "Feed cache hit");
            return SourceScrape {
                source_id: source.id,
                articles,
                error: None,
            };
        }

        match self.fetch_and_parse(&source.url, source.source_type).await {
            Ok(articles) => {
                self.store(&source.url, articles.clone()).await;
                tracing::info!(url = %source.url, count = articles.len(), "Scraped source");
                SourceScrape {
                    source_id: source.id,
                    articles,
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(url = %source.url, error = %e, "Scrape failed");
                SourceScrape {
                    source_id: source.id,
                    articles: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Scrape all of a user's active sources with bounded concurrency
    pub async fn scrape_all(&self, sources: &[Source]) -> Vec<SourceScrape> {
        stream::iter(sources)
            .map(|source| self.scrape(source))
            .buffer_unordered(SCRAPE_CONCURRENCY)
            .collect()
            .await
    }

    /// Fill the cache across a set of unique RSS URLs before per-user runs
    pub async fn prewarm(&self, urls: &[String]) {
        let fresh: Vec<&String> = {
            let cache = self.cache.lock().await;
            urls.iter()
                .filter(|url| {
                    cache
                        .get(url.as_str())
                        .map(|e| e.fetched_at.elapsed() >= CACHE_TTL)
                        .unwrap_or(true)
                })
                .collect()
        };

        if fresh.is_empty() {
            return;
        }

        tracing::info!(urls = fresh.len(), "Pre-warming feed cache");

        stream::iter(fresh)
            .map(|url| async move {
                match self.fetch_and_parse(url, SourceType::Rss).await {
                    Ok(articles) => self.store(url, articles).await,
                    Err(e) => tracing::warn!(url = %url, error = %e, "Pre-warm fetch failed"),
                }
            })
            .buffer_unordered(PREWARM_CONCURRENCY)
            .collect::<Vec<_>>()
            .await;
    }

    async fn cached(&self, url: &str) -> Option<Vec<ScrapedArticle>> {
        let cache = self.cache.lock().await;
        cache
            .get(url)
            .filter(|e| e.fetched_at.elapsed() < CACHE_TTL)
            .map(|e| e.articles.clone())
    }

    async fn store(&self, url: &str, articles: Vec<ScrapedArticle>) {
        let mut cache = self.cache.lock().await;
        cache.insert(
            url.to_string(),
            CacheEntry {
                fetched_at: Instant::now(),
                articles,
            },
        );
    }

    async fn fetch_and_parse(
        &self,
        url: &str,
        source_type: SourceType,
    ) -> Result<Vec<ScrapedArticle>, ScrapeError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ScrapeError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ScrapeError::HttpStatus(status.as_u16(), url.to_string()));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ScrapeError::Network(e.to_string()))?;

        match source_type {
            SourceType::Rss => parse_feed(&bytes),
            SourceType::Website => Ok(parse_website(url, &bytes)),
        }
    }
}

/// Parse RSS/Atom bytes into scraped articles, dropping stale items
fn parse_feed(bytes: &[u8]) -> Result<Vec<ScrapedArticle>, ScrapeError> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| ScrapeError::Parse(e.to_string()))?;
    let cutoff = Utc::now() - ChronoDuration::days(MAX_ITEM_AGE_DAYS);

    let articles = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let url = entry.links.first().map(|l| l.href.clone())?;
            let published_at = entry.published.or(entry.updated);

            // Items with a known publish date older than the cutoff are stale
            if let Some(published) = published_at {
                if published < cutoff {
                    return None;
                }
            }

            let snippet = entry
                .summary
                .as_ref()
                .map(|s| s.content.clone())
                .or_else(|| entry.content.as_ref().and_then(|c| c.body.clone()))
                .map(|html| html_to_snippet(&html))
                .unwrap_or_default();

            Some(ScrapedArticle {
                title: entry
                    .title
                    .map(|t| t.content)
                    .unwrap_or_else(|| "Untitled".to_string()),
                url,
                snippet,
                published_at,
                author: entry.authors.first().map(|a| a.name.clone()),
                tags: entry.categories.into_iter().map(|c| c.term).collect(),
                guid: if entry.id.is_empty() { None } else { Some(entry.id) },
            })
        })
        .collect();

    Ok(articles)
}

/// A WEBSITE source yields the whole page as a single pseudo-article
fn parse_website(url: &str, bytes: &[u8]) -> Vec<ScrapedArticle> {
    let html = String::from_utf8_lossy(bytes);

    let title = html
        .find("<title")
        .and_then(|start| {
            let rest = &html[start..];
            let open = rest.find('>')? + 1;
            let close = rest.find("</title>")?;
            (open < close).then(|| rest[open..close].trim().to_string())
        })
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| url.to_string());

    vec![ScrapedArticle {
        title,
        url: url.to_string(),
        snippet: html_to_snippet(&html),
        published_at: None,
        author: None,
        tags: Vec::new(),
        guid: None,
    }]
}

/// Reduce HTML to a bounded plain-text snippet
fn html_to_snippet(html: &str) -> String {
    let text = html2text::from_read(html.as_bytes(), 120);
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.len() > 2000 {
        collapsed.chars().take(2000).collect()
    } else {
        collapsed
    }
}

//! Article content extractor
//!
//! Fetches an article page, isolates the readable body, and collects
//! outbound links. Extraction failures are reported to the caller, which
//! logs and continues with the RSS snippet; nothing here is fatal to a
//! pipeline run.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

const USER_AGENT: &str = "briefwire/0.1 (+https://briefwire.io)";
const FETCH_TIMEOUT: Duration = Duration::from_secs(20);
/// Raw HTML larger than this is truncated before extraction
const MAX_BODY_BYTES: usize = 500 * 1024;
/// Upper bound on stored clean text
const MAX_CLEAN_TEXT_CHARS: usize = 15_000;
/// Upper bound on collected outbound links
const MAX_EXTERNAL_LINKS: usize = 50;

/// Extracted page content
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    pub clean_text: String,
    pub raw_html: String,
    pub external_links: Vec<String>,
}

/// HTTP-backed content extractor
#[derive(Clone)]
pub struct ContentExtractor {
    client: reqwest::Client,
}

impl ContentExtractor {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(FETCH_TIMEOUT)
            .build()?;

        Ok(Self { client })
    }

    /// Fetch and extract one article page
    pub async fn extract(&self, article_url: &str) -> Result<ExtractedContent> {
        let response = self.client.get(article_url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("HTTP {} from {}", status.as_u16(), article_url));
        }

        let bytes = response.bytes().await?;
        let capped = &bytes[..bytes.len().min(MAX_BODY_BYTES)];
        let html = String::from_utf8_lossy(capped).into_owned();

        let clean_text = readable_text(&html);
        let external_links = extract_links(&html, article_url);

        Ok(ExtractedContent {
            clean_text,
            raw_html: html,
            external_links,
        })
    }
}

/// Isolate the readable body of a page and reduce it to capped plain text
pub fn readable_text(html: &str) -> String {
    let body = readable_region(html);
    let stripped = strip_noise(body);
    let text = html2text::from_read(stripped.as_bytes(), 120);
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_CLEAN_TEXT_CHARS).collect()
}

/// Prefer an `<article>` or `<main>` region over the whole document
fn readable_region(html: &str) -> &str {
    for (open, close) in [("<article", "</article>"), ("<main", "</main>")] {
        if let Some(start) = html.find(open) {
            if let Some(end) = html[start..].find(close) {
                return &html[start..start + end];
            }
        }
    }
    html
}

/// Remove script/style blocks that html2text would otherwise render
fn strip_noise(html: &str) -> String {
    static NOISE: OnceLock<Regex> = OnceLock::new();
    let re = NOISE.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|noscript)\b.*?</(script|style|noscript)>").unwrap()
    });
    re.replace_all(html, " ").into_owned()
}

/// Collect outbound http(s) links: resolved against the base URL, hosts
/// other than the article's own, deduplicated, capped
pub fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    static HREF: OnceLock<Regex> = OnceLock::new();
    let re = HREF.get_or_init(|| Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).unwrap());

    let base = match Url::parse(base_url) {
        Ok(url) => url,
        Err(_) => return Vec::new(),
    };
    let own_host = base.host_str().map(str::to_string);

    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();

    for cap in re.captures_iter(html) {
        let href = &cap[1];
        let resolved = match base.join(href) {
            Ok(url) => url,
            Err(_) => continue,
        };

        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        if resolved.host_str().map(str::to_string) == own_host {
            continue;
        }

        let link = resolved.to_string();
        if seen.insert(link.clone()) {
            links.push(link);
            if links.len() >= MAX_EXTERNAL_LINKS {
                break;
            }
        }
    }

    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readable_text_prefers_article_region() {
        let html = r#"<html><body>
            <nav>Home | About | Subscribe</nav>
            <article><p>Attackers exploited the flaw in the wild.</p></article>
            <footer>Copyright</footer>
        </body></html>"#;
        let text = readable_text(html);
        assert!(text.contains("Attackers exploited"));
        assert!(!text.contains("Copyright"));
    }

    #[test]
    fn test_readable_text_strips_scripts() {
        let html = "<html><body><script>var tracking = 1;</script><p>Real content</p></body></html>";
        let text = readable_text(html);
        assert!(text.contains("Real content"));
        assert!(!text.contains("tracking"));
    }

    #[test]
    fn test_extract_links_filters_and_resolves() {
        let html = r#"
            <a href="https://nvd.nist.gov/vuln/detail/CVE-2024-0001">advisory</a>
            <a href="/internal/page">same host</a>
            <a href="mailto:tips@example.com">mail</a>
            <a href="https://nvd.nist.gov/vuln/detail/CVE-2024-0001">duplicate</a>
            <a href="//cdn.other.net/asset.js">protocol-relative</a>
        "#;
        let links = extract_links(html, "https://example.com/story");
        assert_eq!(
            links,
            vec![
                "https://nvd.nist.gov/vuln/detail/CVE-2024-0001".to_string(),
                "https://cdn.other.net/asset.js".to_string(),
            ]
        );
    }

    #[test]
    fn test_extract_links_caps_at_fifty() {
        let mut html = String::new();
        for i in 0..80 {
            html.push_str(&format!(r#"<a href="https://other.net/{}">x</a>"#, i));
        }
        let links = extract_links(&html, "https://example.com/story");
        assert_eq!(links.len(), 50);
    }

    #[test]
    fn test_clean_text_capped() {
        let long_para = format!("<p>{}</p>", "word ".repeat(10_000));
        let text = readable_text(&long_para);
        assert!(text.chars().count() <= 15_000);
    }
}

//! Web search and page fetching.
//!
//! Searches go to a DuckDuckGo-style HTML endpoint; result anchors carry the
//! `result__a` class. Fetched pages are reduced to a short text summary.

use crate::client::RateLimiter;
use crate::models::{CallError, Result, SearchConfig, SiftError};
use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use scraper::{Html, Selector};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Paragraphs kept from a fetched page.
const SUMMARY_PARAGRAPHS: usize = 5;
/// Characters kept from the joined paragraphs.
const SUMMARY_MAX_CHARS: usize = 1000;

const SERVICE: &str = "search";

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
}

impl SearchHit {
    /// Whether the hit links straight to a page (not a relative redirect).
    pub fn is_direct(&self) -> bool {
        self.url.starts_with("http")
    }
}

/// Title, meta description and leading text of a fetched page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSummary {
    pub url: String,
    pub title: String,
    pub meta: String,
    pub content: String,
}

impl fmt::Display for PageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[URL: {}]\nTitle: {}\nMeta: {}\nContent: {}",
            self.url, self.title, self.meta, self.content
        )
    }
}

/// Web search capability used by the stage plug-ins.
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Up to `max_results` hits for `query`, in ranking order.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> std::result::Result<Vec<SearchHit>, CallError>;

    /// Fetch and summarize one page.
    async fn fetch_page(&self, url: &str) -> std::result::Result<PageSummary, CallError>;
}

/// HTML search client.
pub struct DuckDuckGoSearch {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    rate_limiter: Arc<RateLimiter>,
}

impl DuckDuckGoSearch {
    pub fn new(
        config: &SearchConfig,
        timeout: Duration,
        rate_limiter: Option<Arc<RateLimiter>>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SiftError::Network)?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            user_agent: config.user_agent.clone(),
            rate_limiter: rate_limiter.unwrap_or_default(),
        })
    }

    async fn get_text(
        &self,
        url: &str,
        query: Option<&str>,
    ) -> std::result::Result<String, CallError> {
        self.rate_limiter.wait_if_needed(SERVICE).await;

        let mut request = self.client.get(url).header(USER_AGENT, &self.user_agent);
        if let Some(q) = query {
            request = request.query(&[("q", q)]);
        }
        let response = request.send().await?;

        let status = response.status().as_u16();
        self.rate_limiter
            .record_response(SERVICE, status, response.headers());
        if !response.status().is_success() {
            return Err(CallError::Api {
                status,
                message: format!("GET {url}"),
            });
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> std::result::Result<Vec<SearchHit>, CallError> {
        let html = self.get_text(&self.base_url, Some(query)).await?;
        let hits = parse_results(&html, max_results)?;
        debug!(query, hits = hits.len(), "Search completed");
        Ok(hits)
    }

    async fn fetch_page(&self, url: &str) -> std::result::Result<PageSummary, CallError> {
        let html = self.get_text(url, None).await?;
        summarize_page(url, &html)
    }
}

fn selector(css: &str) -> std::result::Result<Selector, CallError> {
    Selector::parse(css).map_err(|e| CallError::InvalidResponse(format!("selector {css}: {e}")))
}

fn element_text(element: scraper::ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Extract result anchors from a search results page.
pub fn parse_results(
    html: &str,
    max_results: usize,
) -> std::result::Result<Vec<SearchHit>, CallError> {
    let anchor = selector(".result__a")?;
    let document = Html::parse_document(html);
    Ok(document
        .select(&anchor)
        .take(max_results)
        .map(|a| SearchHit {
            url: a.value().attr("href").unwrap_or_default().to_string(),
            title: element_text(a),
        })
        .collect())
}

/// Reduce a page to title, meta description and its first paragraphs.
pub fn summarize_page(url: &str, html: &str) -> std::result::Result<PageSummary, CallError> {
    let title_sel = selector("title")?;
    let meta_sel = selector(r#"meta[name="description"]"#)?;
    let para_sel = selector("p")?;
    let document = Html::parse_document(html);

    let title = document
        .select(&title_sel)
        .next()
        .map(element_text)
        .unwrap_or_default();
    let meta = document
        .select(&meta_sel)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(|c| c.trim().to_string())
        .unwrap_or_default();
    let content: String = document
        .select(&para_sel)
        .take(SUMMARY_PARAGRAPHS)
        .map(element_text)
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(SUMMARY_MAX_CHARS)
        .collect();

    Ok(PageSummary {
        url: url.to_string(),
        title,
        meta,
        content,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const RESULTS: &str = r#"<html><body>
        <div class="result"><a class="result__a" href="https://acme-subsea.test/">Acme  Subsea | Home</a></div>
        <div class="result"><a class="result__a" href="//duckduckgo.com/l/?uddg=x">Acme news</a></div>
        <div class="result"><a class="result__a" href="https://other.test/">Other</a></div>
    </body></html>"#;

    #[test]
    fn test_parse_results_keeps_order_and_limit() {
        let hits = parse_results(RESULTS, 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Acme Subsea | Home");
        assert!(hits[0].is_direct());
        assert!(!hits[1].is_direct());
    }

    #[test]
    fn test_summarize_page_caps_content() {
        let long = "x".repeat(800);
        let html = format!(
            r#"<html><head><title> Acme </title><meta name="description" content=" Survey vessels "></head>
            <body><p>{long}</p><p>{long}</p></body></html>"#
        );
        let summary = summarize_page("https://acme.test", &html).unwrap();
        assert_eq!(summary.title, "Acme");
        assert_eq!(summary.meta, "Survey vessels");
        assert_eq!(summary.content.chars().count(), SUMMARY_MAX_CHARS);
        assert!(summary.to_string().starts_with("[URL: https://acme.test]\nTitle: Acme\n"));
    }

    #[tokio::test]
    async fn test_search_against_html_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/html/"))
            .and(query_param("q", "acme company"))
            .respond_with(ResponseTemplate::new(200).set_body_string(RESULTS))
            .expect(1)
            .mount(&server)
            .await;

        let config = SearchConfig {
            base_url: format!("{}/html/", server.uri()),
            ..SearchConfig::default()
        };
        let search = DuckDuckGoSearch::new(&config, Duration::from_secs(5), None).unwrap();
        let hits = search.search("acme company", 3).await.unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_fetch_page_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let search =
            DuckDuckGoSearch::new(&SearchConfig::default(), Duration::from_secs(5), None).unwrap();
        let err = search
            .fetch_page(&format!("{}/about", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Api { status: 503, .. }));
    }
}

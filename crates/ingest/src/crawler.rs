//! Prefix-scoped documentation crawler.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;
use tracing::{debug, info, warn};

use replier_core::config::CrawlerConfig;
use replier_core::CrawlScope;

use crate::document::SourceDocument;

const CONTENT_SELECTORS: &[&str] = &[
    "main",
    "article",
    ".content",
    ".main-content",
    ".documentation",
    ".docs-content",
    "[role='main']",
    "body",
];
const SKIPPED_ANCESTORS: &[&str] = &["script", "style", "nav", "header", "footer", "aside", "noscript"];

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("invalid crawl root: {0}")]
    InvalidRoot(String),
    #[error("could not build http client: {0}")]
    Client(String),
    #[error("documentation root `{url}` is unreachable: {reason}")]
    RootUnreachable { url: String, reason: String },
}

pub struct DocsCrawler {
    http: reqwest::Client,
    max_pages: usize,
    max_depth: usize,
}

struct FetchedPage {
    document: Option<SourceDocument>,
    links: Vec<String>,
}

impl DocsCrawler {
    pub fn from_config(config: &CrawlerConfig) -> Result<Self, CrawlError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|error| CrawlError::Client(error.to_string()))?;
        Ok(Self { http, max_pages: config.max_pages, max_depth: config.max_depth })
    }

    /// Breadth-first crawl from `root`. Only pages the root's [`CrawlScope`]
    /// admits are fetched; at most `max_pages` pages are visited and links are
    /// followed to `max_depth` hops from the root.
    pub async fn crawl(&self, root: &str) -> Result<Vec<SourceDocument>, CrawlError> {
        let scope = CrawlScope::from_root(root).map_err(|error| CrawlError::InvalidRoot(error.to_string()))?;
        info!(
            event_name = "ingest.crawl.started",
            root = scope.root_url(),
            max_pages = self.max_pages,
            max_depth = self.max_depth,
            "starting documentation crawl"
        );

        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<(String, usize)> = VecDeque::new();
        let mut documents = Vec::new();
        queue.push_back((scope.root_url().to_owned(), 0));

        while let Some((url, depth)) = queue.pop_front() {
            if visited.len() >= self.max_pages {
                break;
            }
            if depth > self.max_depth || !visited.insert(url.clone()) {
                continue;
            }

            let page = match self.fetch_page(&scope, &url).await {
                Ok(page) => page,
                Err(reason) if depth == 0 => {
                    return Err(CrawlError::RootUnreachable { url, reason });
                }
                Err(reason) => {
                    warn!(event_name = "ingest.crawl.page_failed", url = %url, reason = %reason, "skipping page");
                    continue;
                }
            };

            if let Some(document) = page.document {
                debug!(event_name = "ingest.crawl.page", url = %url, depth, "crawled page");
                documents.push(document);
            }
            for link in page.links {
                if !visited.contains(&link) {
                    queue.push_back((link, depth + 1));
                }
            }
        }

        info!(
            event_name = "ingest.crawl.completed",
            root = scope.root_url(),
            visited = visited.len(),
            documents = documents.len(),
            "documentation crawl finished"
        );
        Ok(documents)
    }

    async fn fetch_page(&self, scope: &CrawlScope, url: &str) -> Result<FetchedPage, String> {
        let response = self.http.get(url).send().await.map_err(|error| error.to_string())?;
        let response = response.error_for_status().map_err(|error| error.to_string())?;

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("text/html"));
        if !is_html {
            return Ok(FetchedPage { document: None, links: Vec::new() });
        }

        let body = response.text().await.map_err(|error| error.to_string())?;
        Ok(parse_page(scope, url, &body))
    }
}

fn parse_page(scope: &CrawlScope, url: &str, body: &str) -> FetchedPage {
    let html = Html::parse_document(body);
    let content = extract_content(&html);
    let document = (!content.trim().is_empty())
        .then(|| SourceDocument::new(url, content).with_title(extract_title(&html)));
    FetchedPage { document, links: extract_links(scope, url, &html) }
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

pub(crate) fn extract_title(html: &Html) -> String {
    ["title", "h1"]
        .iter()
        .filter_map(|css| selector(css))
        .find_map(|sel| html.select(&sel).map(element_text).find(|text| !text.is_empty()))
        .unwrap_or_default()
}

fn is_skipped(element: ElementRef<'_>) -> bool {
    element.ancestors().filter_map(ElementRef::wrap).any(|ancestor| {
        SKIPPED_ANCESTORS.contains(&ancestor.value().name())
    })
}

/// Renders the main content area as plain text: headings become `## ` lines,
/// `<pre>` blocks are fenced, paragraphs and list items are kept one per line.
pub(crate) fn extract_content(html: &Html) -> String {
    let container = CONTENT_SELECTORS
        .iter()
        .filter_map(|css| selector(css))
        .find_map(|sel| html.select(&sel).find(|element| !is_skipped(*element)));
    let Some(container) = container else {
        return String::new();
    };
    let Some(blocks) = selector("h1, h2, h3, h4, p, li, pre") else {
        return String::new();
    };

    let mut parts = Vec::new();
    for element in container.select(&blocks) {
        if is_skipped(element) {
            continue;
        }
        let name = element.value().name();
        if name != "pre"
            && element.ancestors().filter_map(ElementRef::wrap).any(|a| a.value().name() == "pre")
        {
            continue;
        }

        match name {
            "pre" => {
                let code = element.text().collect::<String>();
                let code = code.trim_matches('\n');
                if !code.trim().is_empty() {
                    parts.push(format!("\n```\n{code}\n```\n"));
                }
            }
            "h1" | "h2" | "h3" | "h4" => {
                let text = element_text(element);
                if !text.is_empty() {
                    parts.push(format!("\n## {text}\n"));
                }
            }
            _ => {
                let text = element_text(element);
                if !text.is_empty() {
                    parts.push(text);
                }
            }
        }
    }
    parts.join("\n")
}

fn extract_links(scope: &CrawlScope, base: &str, html: &Html) -> Vec<String> {
    let Some(anchors) = selector("a[href]") else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    html.select(&anchors)
        .filter_map(|anchor| anchor.value().attr("href"))
        .filter_map(|href| scope.resolve(base, href))
        .filter(|link| seen.insert(link.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use scraper::Html;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use replier_core::config::CrawlerConfig;

    use super::{extract_content, extract_title, CrawlError, DocsCrawler};

    fn config(max_pages: usize, max_depth: usize) -> CrawlerConfig {
        CrawlerConfig {
            max_pages,
            max_depth,
            user_agent: "ForumReplierBot/1.0".to_owned(),
            timeout_secs: 5,
        }
    }

    fn html_page(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.to_owned(), "text/html; charset=utf-8")
    }

    async fn serve(server: &MockServer, route: &str, response: ResponseTemplate) {
        Mock::given(method("GET")).and(path(route)).respond_with(response).mount(server).await;
    }

    #[test]
    fn content_skips_chrome_and_fences_code() {
        let html = Html::parse_document(
            "<html><head><title> Install Guide </title><script>var x;</script></head><body>\
             <nav><p>Home | Docs</p></nav>\
             <main><h2>Install</h2><p>Run the   installer.</p>\
             <pre><code>helm install widget</code></pre>\
             <ul><li>Step one</li></ul><footer><p>copyright</p></footer></main></body></html>",
        );

        let content = extract_content(&html);

        assert_eq!(extract_title(&html), "Install Guide");
        assert!(content.contains("## Install"));
        assert!(content.contains("Run the installer."));
        assert!(content.contains("```\nhelm install widget\n```"));
        assert!(content.contains("Step one"));
        assert!(!content.contains("Home | Docs"));
        assert!(!content.contains("copyright"));
    }

    #[test]
    fn title_falls_back_to_first_heading() {
        let html = Html::parse_document("<body><h1>Operator Docs</h1><p>hello</p></body>");
        assert_eq!(extract_title(&html), "Operator Docs");
    }

    #[tokio::test]
    async fn crawl_stays_inside_the_root_prefix() {
        let server = MockServer::start().await;
        let root = format!("{}/docs", server.uri());
        serve(
            &server,
            "/docs",
            html_page(
                "<html><body><nav><a href=\"/docs/install\">Install</a></nav>\
                 <main><p>Welcome to the docs.</p>\
                 <a href=\"/blog/post\">Blog</a><a href=\"/docs-old/page\">Old</a>\
                 <a href=\"/docs/logo.png\">Logo</a><a href=\"mailto:x@y.z\">Mail</a></main></body></html>",
            ),
        )
        .await;
        serve(&server, "/docs/install", html_page("<main><p>Install with helm.</p></main>")).await;
        serve(&server, "/blog/post", html_page("<main><p>Off scope.</p></main>")).await;
        serve(&server, "/docs-old/page", html_page("<main><p>Sibling prefix.</p></main>")).await;

        let documents = DocsCrawler::from_config(&config(50, 5))
            .expect("crawler")
            .crawl(&root)
            .await
            .expect("crawl");

        let urls: Vec<&str> = documents.iter().map(|document| document.url.as_str()).collect();
        assert_eq!(urls, vec![root.as_str(), &format!("{root}/install")]);
        assert!(documents[1].content.contains("Install with helm."));
    }

    #[tokio::test]
    async fn non_html_pages_and_broken_links_are_skipped() {
        let server = MockServer::start().await;
        let root = format!("{}/docs", server.uri());
        serve(
            &server,
            "/docs",
            html_page(
                "<main><p>Root page.</p><a href=\"/docs/spec.json\">json</a>\
                 <a href=\"/docs/missing\">missing</a></main>",
            ),
        )
        .await;
        serve(
            &server,
            "/docs/spec.json",
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/json")
                .set_body_string("{}"),
        )
        .await;
        serve(&server, "/docs/missing", ResponseTemplate::new(404)).await;

        let documents = DocsCrawler::from_config(&config(50, 5))
            .expect("crawler")
            .crawl(&root)
            .await
            .expect("crawl");

        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].url, root);
    }

    #[tokio::test]
    async fn page_and_depth_limits_bound_the_crawl() {
        let server = MockServer::start().await;
        let root = format!("{}/docs", server.uri());
        serve(&server, "/docs", html_page("<main><p>Level zero.</p><a href=\"/docs/a\">a</a></main>")).await;
        serve(&server, "/docs/a", html_page("<main><p>Level one.</p><a href=\"/docs/a/b\">b</a></main>")).await;
        serve(&server, "/docs/a/b", html_page("<main><p>Level two.</p></main>")).await;

        let shallow = DocsCrawler::from_config(&config(50, 1)).expect("crawler");
        assert_eq!(shallow.crawl(&root).await.expect("crawl").len(), 2);

        let capped = DocsCrawler::from_config(&config(1, 5)).expect("crawler");
        assert_eq!(capped.crawl(&root).await.expect("crawl").len(), 1);
    }

    #[tokio::test]
    async fn unreachable_root_is_an_error() {
        let server = MockServer::start().await;
        serve(&server, "/docs", ResponseTemplate::new(500)).await;

        let error = DocsCrawler::from_config(&config(10, 2))
            .expect("crawler")
            .crawl(&format!("{}/docs", server.uri()))
            .await
            .expect_err("root should fail");

        assert!(matches!(error, CrawlError::RootUnreachable { .. }));
    }
}

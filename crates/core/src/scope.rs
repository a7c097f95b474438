use url::Url;

use crate::errors::DomainError;

const SKIPPED_EXTENSIONS: &[&str] =
    &[".pdf", ".zip", ".tar", ".gz", ".png", ".jpg", ".jpeg", ".gif", ".svg", ".css", ".js"];

/// The set of pages a documentation crawl may visit: same host and port as the
/// root, under the root's path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrawlScope {
    root_url: String,
    host: String,
    port: Option<u16>,
    path_prefix: String,
}

impl CrawlScope {
    pub fn from_root(root: &str) -> Result<Self, DomainError> {
        let invalid = |reason: &str| DomainError::InvalidScope {
            input: root.to_owned(),
            reason: reason.to_owned(),
        };

        let url = Url::parse(root.trim()).map_err(|_| invalid("not a valid URL"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("only http and https roots can be crawled"));
        }
        let host = url.host_str().ok_or_else(|| invalid("URL has no host"))?.to_ascii_lowercase();

        let root_url = normalize(&url);
        let path_prefix = match url.path().trim_end_matches('/') {
            "" => "/".to_owned(),
            path => path.to_owned(),
        };

        Ok(Self { root_url, host, port: url.port_or_known_default(), path_prefix })
    }

    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    pub fn admits(&self, candidate: &str) -> bool {
        let Ok(url) = Url::parse(candidate) else {
            return false;
        };
        self.admits_url(&url)
    }

    fn admits_url(&self, url: &Url) -> bool {
        if !matches!(url.scheme(), "http" | "https") {
            return false;
        }
        let same_host = url.host_str().map(str::to_ascii_lowercase).as_deref() == Some(&self.host)
            && url.port_or_known_default() == self.port;
        if !same_host {
            return false;
        }

        let path = url.path();
        let lowered = path.to_ascii_lowercase();
        if SKIPPED_EXTENSIONS.iter().any(|extension| lowered.ends_with(extension)) {
            return false;
        }

        if self.path_prefix == "/" {
            return true;
        }
        let trimmed = path.trim_end_matches('/');
        trimmed == self.path_prefix || trimmed.starts_with(&format!("{}/", self.path_prefix))
    }

    /// Resolves `href` against the page it appeared on. Returns the normalized URL
    /// when it falls inside the scope.
    pub fn resolve(&self, base: &str, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || ["mailto:", "javascript:", "tel:"].iter().any(|prefix| href.starts_with(prefix))
        {
            return None;
        }

        let base = Url::parse(base).ok()?;
        let joined = base.join(href).ok()?;
        if !self.admits_url(&joined) {
            return None;
        }
        Some(normalize(&joined))
    }
}

/// Drops the fragment and a trailing slash so `/a/`, `/a` and `/a#x` collapse.
pub fn normalize(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    let rendered = url.to_string();
    match rendered.strip_suffix('/') {
        Some(stripped) if url.query().is_none() => stripped.to_owned(),
        _ => rendered,
    }
}

#[cfg(test)]
mod tests {
    use super::CrawlScope;
    use crate::errors::DomainError;

    #[test]
    fn rejects_non_http_roots() {
        let error = CrawlScope::from_root("ftp://docs.example.com").expect_err("ftp root");
        assert!(matches!(error, DomainError::InvalidScope { .. }));
        assert!(CrawlScope::from_root("not a url").is_err());
    }

    #[test]
    fn admits_pages_under_root_path_only() {
        let scope = CrawlScope::from_root("https://docs.example.com/guide/").expect("scope");

        assert!(scope.admits("https://docs.example.com/guide"));
        assert!(scope.admits("https://docs.example.com/guide/install"));
        assert!(!scope.admits("https://docs.example.com/guidelines"));
        assert!(!scope.admits("https://docs.example.com/blog/post"));
        assert!(!scope.admits("https://other.example.com/guide/install"));
        assert!(!scope.admits("http://docs.example.com:8080/guide/install"));
    }

    #[test]
    fn skips_binary_and_asset_links() {
        let scope = CrawlScope::from_root("https://docs.example.com").expect("scope");
        assert!(!scope.admits("https://docs.example.com/manual.pdf"));
        assert!(!scope.admits("https://docs.example.com/static/app.JS"));
        assert!(scope.admits("https://docs.example.com/manual.html"));
    }

    #[test]
    fn resolve_normalizes_and_filters_links() {
        let scope = CrawlScope::from_root("https://docs.example.com/guide").expect("scope");
        let base = "https://docs.example.com/guide/start";

        assert_eq!(
            scope.resolve(base, "install/#step-2"),
            Some("https://docs.example.com/guide/install".to_owned())
        );
        assert_eq!(
            scope.resolve(base, "/guide/faq/"),
            Some("https://docs.example.com/guide/faq".to_owned())
        );
        assert_eq!(scope.resolve(base, "#top"), None);
        assert_eq!(scope.resolve(base, "mailto:team@example.com"), None);
        assert_eq!(scope.resolve(base, "https://elsewhere.example.com/guide"), None);
    }

    #[test]
    fn root_url_is_normalized() {
        let scope = CrawlScope::from_root("https://docs.example.com/guide/#intro").expect("scope");
        assert_eq!(scope.root_url(), "https://docs.example.com/guide");
    }
}

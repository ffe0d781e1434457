//! Boundary to the page-snapshot collaborator.
//!
//! The pipeline only ever sees rendered HTML strings; how they are obtained
//! (plain HTTP here, a driven browser elsewhere) stays behind this trait.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use super::config::SearchConfig;
use super::http_client::HttpClient;

/// Produces rendered page snapshots for the crawl.
///
/// `detail_page` must release any stateful per-visit resource (an open tab,
/// a browser context) on every exit path before returning; callers receive
/// only the snapshot.
#[async_trait]
pub trait ListingPageSource: Send + Sync {
    /// Snapshot of the search-results page with the given 1-based number
    async fn search_page(&self, page_no: u32) -> Result<String>;

    /// Snapshot of one listing's detail page, reveal interactions done
    async fn detail_page(&self, url: &str) -> Result<String>;
}

/// Default page source fetching over the rate-limited HTTP client
pub struct HttpPageSource {
    http: Arc<HttpClient>,
    search_url_template: String,
}

impl HttpPageSource {
    pub fn new(http: Arc<HttpClient>, search: &SearchConfig) -> Self {
        Self {
            http,
            search_url_template: search.search_url_template.clone(),
        }
    }

    fn search_url(&self, page_no: u32) -> String {
        self.search_url_template.replace("{page}", &page_no.to_string())
    }
}

#[async_trait]
impl ListingPageSource for HttpPageSource {
    async fn search_page(&self, page_no: u32) -> Result<String> {
        self.http.get_text(&self.search_url(page_no)).await
    }

    async fn detail_page(&self, url: &str) -> Result<String> {
        self.http.get_text(url).await
    }
}

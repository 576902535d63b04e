//! Web Search Provider
//!
//! Backs the `search` tool. The agent receives a compact list of results it
//! can read out to the caller; an empty list means "nothing found", which is
//! deliberately distinct from a failed request.

use crate::error::ProviderError;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

pub const BING_SEARCH_ENDPOINT: &str = "https://api.bing.microsoft.com/v7.0/search";
const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A single web search hit, in the shape handed to the voice agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub name: String,
    pub url: String,
    pub date: Option<String>,
    pub snippet: String,
}

/// Looks up a query on the web.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// Returns results in provider ranking order. No matches is `Ok(vec![])`.
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ProviderError>;
}

/// `WebSearch` backed by the Bing Web Search v7 API.
pub struct BingSearch {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    endpoint: String,
}

impl BingSearch {
    /// Creates a client with a bounded request timeout.
    ///
    /// A missing key is accepted so the service can start without search;
    /// every query then fails with [`ProviderError::NotConfigured`].
    pub fn new(api_key: Option<SecretString>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(SEARCH_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_key,
            endpoint: BING_SEARCH_ENDPOINT.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BingResponse {
    web_pages: Option<BingWebPages>,
}

#[derive(Deserialize)]
struct BingWebPages {
    #[serde(default)]
    value: Vec<BingWebPage>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BingWebPage {
    name: String,
    url: String,
    date_published_display_text: Option<String>,
    #[serde(default)]
    snippet: String,
}

impl From<BingWebPage> for SearchResult {
    fn from(page: BingWebPage) -> Self {
        Self {
            name: page.name,
            url: page.url,
            date: page.date_published_display_text,
            snippet: page.snippet,
        }
    }
}

#[async_trait]
impl WebSearch for BingSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, ProviderError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(ProviderError::NotConfigured("web search"))?;

        debug!(%query, "Performing web search");
        let response: BingResponse = self
            .client
            .get(&self.endpoint)
            .query(&[("q", query)])
            .header("Ocp-Apim-Subscription-Key", api_key.expose_secret())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let results: Vec<SearchResult> = response
            .web_pages
            .map(|pages| pages.value.into_iter().map(SearchResult::from).collect())
            .unwrap_or_default();

        if results.is_empty() {
            info!(%query, "No results were found");
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> BingSearch {
        BingSearch::new(Some(SecretString::from("bing-key".to_string())))
            .unwrap()
            .with_endpoint(format!("{}/v7.0/search", server.uri()))
    }

    #[tokio::test]
    async fn maps_web_pages_to_results() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("q", "sam pullara"))
            .and(header("Ocp-Apim-Subscription-Key", "bing-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "webPages": { "value": [{
                    "name": "Sam Pullara",
                    "url": "https://example.com/sam",
                    "datePublishedDisplayText": "Jan 2, 2024",
                    "snippet": "Investor and engineer."
                }]}
            })))
            .mount(&server)
            .await;

        let results = client(&server).search("sam pullara").await.unwrap();
        assert_eq!(
            results,
            vec![SearchResult {
                name: "Sam Pullara".into(),
                url: "https://example.com/sam".into(),
                date: Some("Jan 2, 2024".into()),
                snippet: "Investor and engineer.".into(),
            }]
        );
    }

    #[tokio::test]
    async fn missing_web_pages_is_an_empty_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "_type": "SearchResponse" })))
            .mount(&server)
            .await;

        let results = client(&server).search("zzqx").await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn http_failure_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = client(&server).search("anything").await.unwrap_err();
        assert!(matches!(err, ProviderError::Http(_)));
    }

    #[tokio::test]
    async fn missing_key_fails_without_a_request() {
        let search = BingSearch::new(None).unwrap();
        let err = search.search("anything").await.unwrap_err();
        assert!(matches!(err, ProviderError::NotConfigured(_)));
    }
}

//! Content source adapter for the eCFR versioner API.
//!
//! [`ContentSource`] is the seam the reference processor talks to; the
//! production implementation is [`EcfrSource`]. Every request goes through
//! the shared retry policy, and failures are classified as follows:
//!
//! | Upstream outcome | `fetch_versions` | `fetch_content` |
//! |------------------|------------------|-----------------|
//! | 2xx | parsed listing | XML body |
//! | 404 | empty listing | `None` (no content) |
//! | 429 | retried; error when exhausted | retried; error when exhausted |
//! | 5xx / timeout | retried; error when exhausted | retried; `None` when exhausted |
//! | other status | error | error |
//!
//! The upstream consistently times out on very large sections, so an
//! exhausted transient failure while fetching content means "no content
//! for this unit on this date" rather than a failed unit.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::models::{CfrReference, ContentVersion, VersionResponse};
use crate::retry::{retry, RetryPolicy};

#[async_trait]
pub trait ContentSource: Send + Sync {
    /// List content-unit versions for `reference` issued on `date`.
    async fn fetch_versions(
        &self,
        reference: &CfrReference,
        date: NaiveDate,
    ) -> Result<Vec<ContentVersion>, SourceError>;

    /// Fetch the full XML of one content unit as of `date`. `None` means no content.
    async fn fetch_content(
        &self,
        date: NaiveDate,
        version: &ContentVersion,
    ) -> Result<Option<String>, SourceError>;
}

pub struct EcfrSource {
    base_url: String,
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl EcfrSource {
    pub fn new(config: &SourceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("regobservatory/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            policy: config.retry_policy(),
        })
    }

    async fn get_once(&self, url: &str, query: &[(&str, &str)]) -> Result<String, SourceError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::from_status(status.as_u16(), body));
        }

        response
            .text()
            .await
            .map_err(|e| SourceError::Transient(e.to_string()))
    }

    async fn get_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String, SourceError> {
        retry(&self.policy, url, move || self.get_once(url, query)).await
    }

    /// GET a JSON document under the base URL through the retry policy.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, SourceError> {
        let url = format!("{}{}", self.base_url, path);
        let body = self.get_text(&url, query).await?;
        serde_json::from_str(&body).map_err(|e| SourceError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ContentSource for EcfrSource {
    async fn fetch_versions(
        &self,
        reference: &CfrReference,
        date: NaiveDate,
    ) -> Result<Vec<ContentVersion>, SourceError> {
        let issue_date = date.to_string();
        let mut query: Vec<(&str, &str)> = vec![("issue_date", issue_date.as_str())];
        query.extend(reference.filters());

        let path = format!("/api/versioner/v1/versions/title-{}.json", reference.title);
        match self.get_json::<VersionResponse>(&path, &query).await {
            Ok(listing) => Ok(listing.content_versions),
            Err(SourceError::NotFound) => {
                debug!("No versions for {} on {}", reference, date);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_content(
        &self,
        date: NaiveDate,
        version: &ContentVersion,
    ) -> Result<Option<String>, SourceError> {
        let url = format!(
            "{}/api/versioner/v1/full/{}/title-{}.xml",
            self.base_url, date, version.title
        );
        let query = [
            ("part", version.part_number()),
            ("section", version.identifier.as_str()),
        ];

        match self.get_text(&url, &query).await {
            Ok(body) => Ok(Some(body)),
            Err(SourceError::NotFound) => Ok(None),
            Err(SourceError::Transient(reason)) => {
                warn!(
                    "Giving up on {} for {} after retries ({}); treating as no content",
                    version.content_id(),
                    date,
                    reason
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source(server: &MockServer) -> EcfrSource {
        let config = SourceConfig {
            base_url: server.uri(),
            timeout_secs: 5,
            max_attempts: 3,
            base_delay_ms: 0,
            max_delay_ms: 0,
        };
        EcfrSource::new(&config).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2017, 1, 3).unwrap()
    }

    fn section(identifier: &str) -> ContentVersion {
        serde_json::from_value(serde_json::json!({
            "identifier": identifier, "part": "5", "title": 7, "type": "section"
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_versions_sends_reference_filters() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/versioner/v1/versions/title-7.json"))
            .and(query_param("issue_date", "2017-01-03"))
            .and(query_param("chapter", "I"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content_versions": [
                    {"identifier": "5.1", "part": "5", "title": 7, "type": "section", "removed": false},
                    {"identifier": "Appendix A", "part": "5", "title": 7, "type": "appendix", "removed": false}
                ],
                "meta": {}
            })))
            .mount(&server)
            .await;

        let mut reference = CfrReference::title(7);
        reference.chapter = Some("I".into());
        let versions = source(&server)
            .fetch_versions(&reference, date())
            .await
            .unwrap();
        assert_eq!(versions.len(), 2);
        assert!(versions[0].is_section());
    }

    #[tokio::test]
    async fn test_versions_not_found_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let versions = source(&server)
            .fetch_versions(&CfrReference::title(7), date())
            .await
            .unwrap();
        assert!(versions.is_empty());
    }

    #[tokio::test]
    async fn test_content_fetch_uses_part_and_section() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/versioner/v1/full/2017-01-03/title-7.xml"))
            .and(query_param("part", "5"))
            .and(query_param("section", "5.12"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<DIV8/>"))
            .mount(&server)
            .await;

        let body = source(&server)
            .fetch_content(date(), &section("5.12"))
            .await
            .unwrap();
        assert_eq!(body.as_deref(), Some("<DIV8/>"));
    }

    #[tokio::test]
    async fn test_content_exhausted_timeouts_mean_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(504))
            .expect(3)
            .mount(&server)
            .await;

        let body = source(&server)
            .fetch_content(date(), &section("5.12"))
            .await
            .unwrap();
        assert!(body.is_none());
    }

    #[tokio::test]
    async fn test_rate_limit_retried_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<DIV8/>"))
            .mount(&server)
            .await;

        let body = source(&server)
            .fetch_content(date(), &section("5.12"))
            .await
            .unwrap();
        assert!(body.is_some());
    }

    #[tokio::test]
    async fn test_unexpected_status_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .expect(1)
            .mount(&server)
            .await;

        let err = source(&server)
            .fetch_content(date(), &section("5.12"))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 403, .. }));
    }
}

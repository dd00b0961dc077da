//! FHIR server client.
//!
//! Searches a server for a patient's observations and resolves every
//! bundle entry to a full resource. Entries that only carry a `fullUrl`
//! are fetched concurrently; the result keeps bundle order and fails as
//! a whole if any single fetch fails.

use super::{observation_from_resource, Bundle};
use crate::config::SourceConfig;
use crate::models::Observation;
use anyhow::{anyhow, Context, Result};
use futures::future::try_join_all;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for the FHIR client.
#[derive(Debug, Clone)]
pub struct FhirClientConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
    pub page_size: usize,
    pub show_progress: bool,
}

impl From<&SourceConfig> for FhirClientConfig {
    fn from(source: &SourceConfig) -> Self {
        Self {
            base_url: source.base_url.clone(),
            timeout_seconds: source.timeout_seconds,
            page_size: source.page_size,
            show_progress: true,
        }
    }
}

/// Client for the Observation search endpoint of a FHIR server.
pub struct FhirClient {
    config: FhirClientConfig,
    http_client: reqwest::Client,
}

impl FhirClient {
    /// Create a new client.
    pub fn new(config: FhirClientConfig) -> Result<Self> {
        info!("Using FHIR server at {}", config.base_url);

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Build the Observation search URL for a patient.
    pub fn search_url(&self, patient: &str, code: Option<&str>) -> Result<Url> {
        let endpoint = format!("{}/Observation", self.config.base_url.trim_end_matches('/'));

        let mut params = vec![
            ("patient", patient.to_string()),
            ("_count", self.config.page_size.to_string()),
        ];
        if let Some(code) = code {
            params.push(("code", code.to_string()));
        }

        Url::parse_with_params(&endpoint, &params)
            .with_context(|| format!("Invalid FHIR base URL: {}", self.config.base_url))
    }

    /// GET a URL and decode the JSON body.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("GET {}", url);

        let response = self
            .http_client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/fhir+json, application/json")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow!("Request to {} timed out after {}s", url, self.config.timeout_seconds)
                } else if e.is_connect() {
                    anyhow!("Cannot connect to FHIR server at {}", self.config.base_url)
                } else {
                    anyhow!("Failed to send request: {}", e)
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("FHIR server error {} for {}: {}", status, url, body));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }

    /// Run the Observation search for a patient.
    pub async fn search(&self, patient: &str, code: Option<&str>) -> Result<Bundle> {
        let url = self.search_url(patient, code)?;
        let bundle: Bundle = self.get_json(url.as_str()).await?;

        info!(
            "Search returned {} entries{}",
            bundle.entry.len(),
            bundle
                .total
                .map(|total| format!(" (server total: {})", total))
                .unwrap_or_default()
        );
        Ok(bundle)
    }

    /// Fetch all observations for a patient, in bundle order.
    pub async fn observations_for_patient(
        &self,
        patient: &str,
        code: Option<&str>,
    ) -> Result<Vec<Observation>> {
        let bundle = self.search(patient, code).await?;

        let to_fetch = bundle.entry.iter().filter(|e| e.resource.is_none()).count();
        let progress = self.progress_bar(to_fetch as u64);
        let progress = &progress;

        let fetches = bundle.entry.into_iter().enumerate().map(|(i, entry)| async move {
            let resource = match entry.resource {
                Some(resource) => resource,
                None => {
                    let url = entry.full_url.ok_or_else(|| {
                        anyhow!("Bundle entry #{} has neither a resource nor a fullUrl", i)
                    })?;
                    let resource: Value = self
                        .get_json(&url)
                        .await
                        .with_context(|| format!("Failed to fetch bundle entry #{}", i))?;
                    progress.inc(1);
                    resource
                }
            };

            observation_from_resource(resource)
                .with_context(|| format!("Failed to read bundle entry #{}", i))
        });

        let resolved = try_join_all(fetches).await;
        progress.finish_and_clear();

        let observations: Vec<Observation> = resolved?.into_iter().flatten().collect();
        info!(
            "Fetched {} observations for patient {}",
            observations.len(),
            patient
        );
        Ok(observations)
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.config.show_progress || len == 0 {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(len);
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} observations")
            .map(|style| style.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        pb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: &str) -> FhirClient {
        FhirClient::new(FhirClientConfig {
            base_url: base_url.to_string(),
            timeout_seconds: 2,
            page_size: 500,
            show_progress: false,
        })
        .unwrap()
    }

    #[test]
    fn test_search_url() {
        let client = client("https://fhir.example.org/r4/");

        let url = client.search_url("SMART-1288992", Some("19935-6")).unwrap();

        assert_eq!(
            url.as_str(),
            "https://fhir.example.org/r4/Observation?patient=SMART-1288992&_count=500&code=19935-6"
        );
    }

    #[test]
    fn test_search_url_without_code() {
        let client = client("http://localhost:8080/fhir");

        let url = client.search_url("a b", None).unwrap();

        assert_eq!(
            url.as_str(),
            "http://localhost:8080/fhir/Observation?patient=a+b&_count=500"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let client = client("not a url");
        assert!(client.search_url("p", None).is_err());
    }

    #[test]
    fn test_config_from_source_settings() {
        let source = SourceConfig {
            base_url: "https://fhir.example.org".to_string(),
            timeout_seconds: 12,
            page_size: 50,
            code: None,
        };

        let config = FhirClientConfig::from(&source);
        assert_eq!(config.base_url, "https://fhir.example.org");
        assert_eq!(config.timeout_seconds, 12);
        assert_eq!(config.page_size, 50);
    }

    #[test]
    fn test_unreachable_server_is_an_error() {
        // Port 9 (discard) is not expected to serve HTTP.
        let client = client("http://127.0.0.1:9/fhir");

        let result = tokio_test::block_on(client.observations_for_patient("p", None));

        assert!(result.is_err());
    }
}

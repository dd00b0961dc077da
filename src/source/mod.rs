//! Observation sources.
//!
//! Observations either come from a local JSON file or from a FHIR
//! server (see [`fhir`]). Both end up as an ordered `Vec<Observation>`.

pub mod fhir;

pub use fhir::{FhirClient, FhirClientConfig};

use crate::models::Observation;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info};

/// A FHIR search result bundle.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub entry: Vec<BundleEntry>,
}

/// One entry of a bundle: an inline resource, a link to one, or both.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BundleEntry {
    #[serde(default)]
    pub full_url: Option<String>,
    #[serde(default)]
    pub resource: Option<Value>,
}

/// Convert a resource to an observation, skipping other resource types.
///
/// Resources without a `resourceType` are assumed to be observations.
pub fn observation_from_resource(resource: Value) -> Result<Option<Observation>> {
    match resource.get("resourceType").and_then(Value::as_str) {
        Some("Observation") | None => {
            let observation =
                serde_json::from_value(resource).context("Invalid Observation resource")?;
            Ok(Some(observation))
        }
        Some(other) => {
            debug!("Skipping {} resource", other);
            Ok(None)
        }
    }
}

/// Parse observations from a JSON document.
///
/// Accepts a FHIR `Bundle` (inline entries only), a bare array of
/// observations, or a single observation.
pub fn parse_observations(json: &str) -> Result<Vec<Observation>> {
    let document: Value = serde_json::from_str(json).context("Input is not valid JSON")?;
    let is_bundle = document.get("resourceType").and_then(Value::as_str) == Some("Bundle");

    let resources: Vec<Value> = match document {
        Value::Array(items) => items,
        Value::Object(_) if is_bundle => {
            let bundle: Bundle =
                serde_json::from_value(document).context("Invalid Bundle resource")?;
            let mut resources = Vec::with_capacity(bundle.entry.len());
            for (i, entry) in bundle.entry.into_iter().enumerate() {
                match entry.resource {
                    Some(resource) => resources.push(resource),
                    None => bail!(
                        "Bundle entry #{} has no inline resource{}; fetch it with --patient instead",
                        i,
                        entry
                            .full_url
                            .map(|url| format!(" ({})", url))
                            .unwrap_or_default()
                    ),
                }
            }
            resources
        }
        Value::Object(_) => vec![document],
        _ => bail!("Expected a Bundle, an array of Observations, or an Observation"),
    };

    let mut observations = Vec::with_capacity(resources.len());
    for (i, resource) in resources.into_iter().enumerate() {
        if let Some(observation) = observation_from_resource(resource)
            .with_context(|| format!("Failed to read record #{}", i))?
        {
            observations.push(observation);
        }
    }

    Ok(observations)
}

/// Load observations from a JSON file.
pub fn load_observations(path: &Path) -> Result<Vec<Observation>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;

    let observations = parse_observations(&content)
        .with_context(|| format!("Failed to parse input file: {}", path.display()))?;

    info!(
        "Loaded {} observations from {}",
        observations.len(),
        path.display()
    );
    Ok(observations)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = include_str!("../../fixtures/peak_flow_bundle.json");

    #[test]
    fn test_parse_bundle_fixture() {
        let observations = parse_observations(FIXTURE).unwrap();

        // The Patient entry is skipped.
        assert_eq!(observations.len(), 5);
        assert_eq!(observations[0].id.as_deref(), Some("pf-1"));
        assert!(observations.iter().any(|o| o.has_components()));
    }

    #[test]
    fn test_parse_array_and_single() {
        let array = r#"[
            {"effectiveDateTime": "2024-01-01", "valueQuantity": {"value": 1}},
            {"effectiveDateTime": "2024-01-02"}
        ]"#;
        assert_eq!(parse_observations(array).unwrap().len(), 2);

        let single = r#"{"resourceType": "Observation", "id": "x"}"#;
        let parsed = parse_observations(single).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id.as_deref(), Some("x"));
    }

    #[test]
    fn test_bundle_entry_without_resource_fails() {
        let json = r#"{
            "resourceType": "Bundle",
            "entry": [{"fullUrl": "http://example.org/Observation/1"}]
        }"#;

        let err = parse_observations(json).unwrap_err();
        assert!(err.to_string().contains("http://example.org/Observation/1"));
    }

    #[test]
    fn test_rejects_scalars_and_bad_records() {
        assert!(parse_observations("42").is_err());
        assert!(parse_observations("not json").is_err());
        assert!(parse_observations(r#"[{"valueQuantity": "high"}]"#).is_err());
    }

    #[test]
    fn test_load_observations_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observations.json");
        std::fs::write(&path, FIXTURE).unwrap();

        assert_eq!(load_observations(&path).unwrap().len(), 5);
        assert!(load_observations(&dir.path().join("missing.json")).is_err());
    }
}

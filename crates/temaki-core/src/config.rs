//! Project configuration consumed by the exporters
//!
//! Corresponds to the project configuration file that defines Implementation
//! Guide metadata and build settings. Loading the file from disk is the
//! host's concern; this struct is the deserialized shape the compiler reads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Implementation Guide project configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfiguration {
    /// Canonical URL base for all generated artifacts (required)
    pub canonical: String,

    /// Package id of the IG (e.g. "fhir.us.minimal")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Computer-friendly name (PascalCase recommended)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Human-friendly title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Version string (semver recommended)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// FHIR version the compiled artifacts target
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fhir_version: Option<String>,

    /// Publication status (draft | active | retired | unknown)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// Publisher name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    /// Description (markdown supported)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// IG publisher template (e.g. "hl7.fhir.template#0.0.5"); drives ig.ini
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,

    /// IG dependencies (package-id -> version)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeMap<String, String>>,
}

impl ProjectConfiguration {
    /// Minimal configuration with just a canonical URL
    pub fn new(canonical: impl Into<String>) -> Self {
        Self {
            canonical: canonical.into(),
            id: None,
            name: None,
            title: None,
            version: None,
            fhir_version: None,
            status: None,
            publisher: None,
            description: None,
            template: None,
            dependencies: None,
        }
    }

    /// The id used in generated artifact file names; falls back to the last
    /// dot-separated run of the canonical URL when no id is configured
    pub fn package_id(&self) -> String {
        if let Some(id) = &self.id {
            return id.clone();
        }
        self.canonical
            .rsplit('/')
            .next()
            .unwrap_or(&self.canonical)
            .to_string()
    }

    /// Canonical URL for an artifact of the given resource type and id
    pub fn canonical_for(&self, resource_type: &str, id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.canonical.trim_end_matches('/'),
            resource_type,
            id
        )
    }

    /// Status with the FHIR default applied
    pub fn status_or_default(&self) -> &str {
        self.status.as_deref().unwrap_or("draft")
    }
}

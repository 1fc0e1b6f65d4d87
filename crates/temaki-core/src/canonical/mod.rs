//! FHIR definitions cache port
//!
//! External FHIR definitions (base resources, datatypes, profiles, value
//! sets) are consumed through the narrow [`Fishable`] lookup interface. The
//! cache is read-only for the lifetime of a compilation and indexes every
//! definition by id, name and canonical URL on load.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::TemakiError;
use crate::semantic::fishing::{FishKind, FishMetadata, Fishable};

/// In-memory index over loaded FHIR definitions
#[derive(Debug, Default)]
pub struct DefinitionsCache {
    definitions: Vec<JsonValue>,
    by_url: HashMap<String, usize>,
    by_id: HashMap<String, Vec<usize>>,
    by_name: HashMap<String, Vec<usize>>,
    fhir_version: Option<String>,
}

impl DefinitionsCache {
    /// Build a cache from already-parsed definitions (tests, embedded sets)
    pub fn from_definitions(definitions: Vec<JsonValue>) -> Self {
        let mut cache = Self::default();
        for definition in definitions {
            cache.add(definition);
        }
        cache
    }

    /// Load every `.json` definition under `dir` for the given FHIR version
    ///
    /// Unreadable files are skipped with a warning; an unreadable directory
    /// is catastrophic and halts the run.
    pub fn load(fhir_version: &str, dir: &Path) -> Result<Self, TemakiError> {
        let mut cache = Self {
            fhir_version: Some(fhir_version.to_string()),
            ..Self::default()
        };

        let entries = std::fs::read_dir(dir).map_err(|source| TemakiError::PackageLoad {
            message: format!("cannot read definitions directory {}: {source}", dir.display()),
        })?;

        for entry in entries {
            let entry = entry.map_err(|source| TemakiError::io_error(dir, source))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|text| serde_json::from_str(&text).map_err(|e| e.to_string()))
            {
                Ok(definition) => cache.add(definition),
                Err(message) => {
                    warn!("skipping definition {}: {}", path.display(), message);
                }
            }
        }

        debug!(
            "loaded {} definitions for FHIR {}",
            cache.definitions.len(),
            fhir_version
        );
        Ok(cache)
    }

    fn add(&mut self, definition: JsonValue) {
        let index = self.definitions.len();
        if let Some(url) = definition.get("url").and_then(|v| v.as_str()) {
            self.by_url.entry(url.to_string()).or_insert(index);
        }
        if let Some(id) = definition.get("id").and_then(|v| v.as_str()) {
            self.by_id.entry(id.to_string()).or_default().push(index);
        }
        if let Some(name) = definition.get("name").and_then(|v| v.as_str()) {
            self.by_name
                .entry(name.to_string())
                .or_default()
                .push(index);
        }
        self.definitions.push(definition);
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn fhir_version(&self) -> Option<&str> {
        self.fhir_version.as_deref()
    }

    fn candidates(&self, key: &str) -> Vec<&JsonValue> {
        let mut out = Vec::new();
        if let Some(&i) = self.by_url.get(key) {
            out.push(&self.definitions[i]);
        }
        for indexes in [self.by_id.get(key), self.by_name.get(key)]
            .into_iter()
            .flatten()
        {
            for &i in indexes {
                let value = &self.definitions[i];
                if !out.iter().any(|v| std::ptr::eq(*v, value)) {
                    out.push(value);
                }
            }
        }
        out
    }
}

impl Fishable for DefinitionsCache {
    fn fish(&self, key: &str, kinds: &[FishKind]) -> Option<JsonValue> {
        let candidates = self.candidates(key);
        if candidates.is_empty() {
            return None;
        }
        if kinds.is_empty() {
            return Some(candidates[0].clone());
        }
        // Preference follows the given kind order
        for kind in kinds {
            for candidate in &candidates {
                if kind.matches_json(candidate) {
                    return Some((*candidate).clone());
                }
            }
        }
        None
    }

    fn fish_metadata(&self, key: &str, kinds: &[FishKind]) -> Option<FishMetadata> {
        let definition = self.fish(key, kinds)?;
        Some(metadata_from_json(&definition))
    }
}

/// Extract lookup metadata from a JSON definition
pub fn metadata_from_json(definition: &JsonValue) -> FishMetadata {
    let get = |field: &str| {
        definition
            .get(field)
            .and_then(|v| v.as_str())
            .map(String::from)
    };
    FishMetadata {
        id: get("id").unwrap_or_default(),
        name: get("name").unwrap_or_default(),
        url: get("url"),
        resource_type: get("resourceType").unwrap_or_default(),
        sd_type: get("type"),
        parent: get("baseDefinition"),
        instance_usage: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observation() -> JsonValue {
        json!({
            "resourceType": "StructureDefinition",
            "id": "Observation",
            "url": "http://hl7.org/fhir/StructureDefinition/Observation",
            "name": "Observation",
            "kind": "resource",
            "type": "Observation"
        })
    }

    #[test]
    fn test_fish_by_id_name_url() {
        let cache = DefinitionsCache::from_definitions(vec![observation()]);

        for key in [
            "Observation",
            "http://hl7.org/fhir/StructureDefinition/Observation",
        ] {
            let found = cache.fish(key, &[]).unwrap();
            assert_eq!(found["id"], "Observation");
        }
        assert!(cache.fish("Condition", &[]).is_none());
    }

    #[test]
    fn test_kind_order_preference() {
        let vs = json!({
            "resourceType": "ValueSet",
            "id": "Observation",
            "url": "http://example.org/ValueSet/Observation",
            "name": "Observation"
        });
        let cache = DefinitionsCache::from_definitions(vec![vs, observation()]);

        let found = cache
            .fish("Observation", &[FishKind::Resource, FishKind::ValueSet])
            .unwrap();
        assert_eq!(found["resourceType"], "StructureDefinition");

        let found = cache
            .fish("Observation", &[FishKind::ValueSet, FishKind::Resource])
            .unwrap();
        assert_eq!(found["resourceType"], "ValueSet");
    }

    #[test]
    fn test_metadata_from_json() {
        let meta = metadata_from_json(&observation());
        assert_eq!(meta.id, "Observation");
        assert_eq!(meta.sd_type.as_deref(), Some("Observation"));
        assert_eq!(
            meta.url.as_deref(),
            Some("http://hl7.org/fhir/StructureDefinition/Observation")
        );
    }
}

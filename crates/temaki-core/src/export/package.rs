//! Package assembler
//!
//! The Package collects every artifact produced by one compilation and
//! answers fishing lookups for them. It also enforces the cross-entity
//! uniqueness of `(resourceType, id)` among non-inline instances.

use serde_json::Value as JsonValue;

use crate::export::fhir_types::{InstanceDefinition, StructureDefinition};
use crate::semantic::fishing::{FishKind, FishMetadata, Fishable};

/// All artifacts emitted by one compilation
#[derive(Debug, Default)]
pub struct Package {
    pub profiles: Vec<StructureDefinition>,
    pub extensions: Vec<StructureDefinition>,
    pub instances: Vec<InstanceDefinition>,
    pub value_sets: Vec<JsonValue>,
    pub code_systems: Vec<JsonValue>,
}

impl Package {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_profile(&mut self, sd: StructureDefinition) {
        self.profiles.push(sd);
    }

    pub fn add_extension(&mut self, sd: StructureDefinition) {
        self.extensions.push(sd);
    }

    /// Add an instance; returns the `(resourceType, id)` pair when it
    /// collides with an already-present non-inline instance. The instance is
    /// kept either way.
    pub fn add_instance(&mut self, instance: InstanceDefinition) -> Option<(String, String)> {
        let duplicate = if instance.is_inline() || instance.resource_type.is_empty() {
            None
        } else {
            self.instances
                .iter()
                .find(|existing| {
                    !existing.is_inline()
                        && existing.resource_type == instance.resource_type
                        && existing.id == instance.id
                })
                .map(|existing| (existing.resource_type.clone(), existing.id.clone()))
        };
        self.instances.push(instance);
        duplicate
    }

    pub fn add_value_set(&mut self, value_set: JsonValue) {
        self.value_sets.push(value_set);
    }

    pub fn add_code_system(&mut self, code_system: JsonValue) {
        self.code_systems.push(code_system);
    }

    pub fn structure_definitions(&self) -> impl Iterator<Item = &StructureDefinition> {
        self.profiles.iter().chain(self.extensions.iter())
    }

    /// Find an exported instance by shorthand name or id
    pub fn find_instance(&self, key: &str) -> Option<&InstanceDefinition> {
        self.instances
            .iter()
            .find(|i| i.instance_name == key || i.id == key)
    }

    /// Find an exported StructureDefinition by name, id or url
    pub fn find_structure_definition(&self, key: &str) -> Option<&StructureDefinition> {
        self.structure_definitions().find(|sd| {
            sd.name == key || sd.id.as_deref() == Some(key) || sd.url == key
        })
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
            && self.extensions.is_empty()
            && self.instances.is_empty()
            && self.value_sets.is_empty()
            && self.code_systems.is_empty()
    }
}

fn json_matches(resource: &JsonValue, key: &str) -> bool {
    ["name", "id", "url"].iter().any(|field| {
        resource.get(*field).and_then(|v| v.as_str()) == Some(key)
    })
}

impl Package {
    fn fish_one_kind(&self, key: &str, kind: FishKind) -> Option<JsonValue> {
        let sd_match = |sd: &&StructureDefinition| {
            sd.name == key || sd.id.as_deref() == Some(key) || sd.url == key
        };
        match kind {
            FishKind::Profile => self.profiles.iter().find(sd_match).map(|sd| sd.to_json()),
            FishKind::Extension => self.extensions.iter().find(sd_match).map(|sd| sd.to_json()),
            FishKind::ValueSet => self
                .value_sets
                .iter()
                .find(|vs| json_matches(vs, key))
                .cloned(),
            FishKind::CodeSystem => self
                .code_systems
                .iter()
                .find(|cs| json_matches(cs, key))
                .cloned(),
            FishKind::Instance => self.find_instance(key).map(|i| i.to_json()),
            // Base resources and datatypes never live in the package
            FishKind::Resource | FishKind::Type => None,
            FishKind::Any => [
                FishKind::Profile,
                FishKind::Extension,
                FishKind::ValueSet,
                FishKind::CodeSystem,
                FishKind::Instance,
            ]
            .into_iter()
            .find_map(|k| self.fish_one_kind(key, k)),
        }
    }
}

impl Fishable for Package {
    fn fish(&self, key: &str, kinds: &[FishKind]) -> Option<JsonValue> {
        if kinds.is_empty() {
            return self.fish_one_kind(key, FishKind::Any);
        }
        // Preference follows the given kind order
        kinds
            .iter()
            .find_map(|kind| self.fish_one_kind(key, *kind))
    }

    fn fish_metadata(&self, key: &str, kinds: &[FishKind]) -> Option<FishMetadata> {
        if let Some(sd) = self.find_structure_definition(key) {
            let matches = kinds.is_empty()
                || kinds
                    .iter()
                    .any(|k| k.matches_json(&sd.to_json()) || *k == FishKind::Any);
            if matches {
                return Some(FishMetadata {
                    id: sd.id.clone().unwrap_or_default(),
                    name: sd.name.clone(),
                    url: Some(sd.url.clone()),
                    resource_type: "StructureDefinition".to_string(),
                    sd_type: Some(sd.type_field.clone()),
                    parent: sd.base_definition.clone(),
                    instance_usage: None,
                });
            }
        }
        let json = self.fish(key, kinds)?;
        Some(crate::canonical::metadata_from_json(&json))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::InstanceUsage;
    use serde_json::Map;

    fn instance(name: &str, resource_type: &str, id: &str, usage: InstanceUsage) -> InstanceDefinition {
        InstanceDefinition {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
            instance_name: name.to_string(),
            usage,
            instance_of: resource_type.to_string(),
            content: Map::new(),
        }
    }

    #[test]
    fn test_duplicate_instance_detection() {
        let mut package = Package::new();
        assert!(package
            .add_instance(instance("A", "Patient", "repeated-id", InstanceUsage::Example))
            .is_none());
        // Same id, different type: no conflict
        assert!(package
            .add_instance(instance("B", "Observation", "repeated-id", InstanceUsage::Example))
            .is_none());
        // Same (type, id): conflict, but both are kept
        assert!(package
            .add_instance(instance("C", "Patient", "repeated-id", InstanceUsage::Example))
            .is_some());
        assert_eq!(package.instances.len(), 3);
    }

    #[test]
    fn test_inline_instances_do_not_conflict() {
        let mut package = Package::new();
        package.add_instance(instance("A", "Organization", "org", InstanceUsage::Inline));
        assert!(package
            .add_instance(instance("B", "Organization", "org", InstanceUsage::Inline))
            .is_none());
    }

    #[test]
    fn test_find_instance_by_name_or_id() {
        let mut package = Package::new();
        package.add_instance(instance("OrgInst", "Organization", "org-id", InstanceUsage::Example));
        assert!(package.find_instance("OrgInst").is_some());
        assert!(package.find_instance("org-id").is_some());
        assert!(package.find_instance("nope").is_none());
    }
}

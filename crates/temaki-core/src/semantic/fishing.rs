//! Fishing - definition lookup across the compilation
//!
//! Implements the tiered lookup pattern for resolving definitions by name,
//! id or canonical URL:
//!
//! 1. **Package** - artifacts already exported in this compilation
//! 2. **Tank** - shorthand definitions not yet exported (metadata only)
//! 3. **Definitions cache** - external FHIR definitions
//!
//! Exports run in dependency order, so by the time a consumer fishes for a
//! local definition its artifact is already in the Package; the Tank tier
//! still answers metadata queries and blocks an external definition from
//! shadowing a local one of the same name.

use serde_json::Value as JsonValue;
use tracing::{debug, trace};

use crate::ast::{Entity, InstanceUsage};
use crate::canonical::DefinitionsCache;
use crate::export::Package;
use crate::semantic::Tank;

/// Definition kind filter for fishing operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FishKind {
    /// A profile (StructureDefinition with derivation=constraint)
    Profile,
    /// An extension definition
    Extension,
    /// A base resource (StructureDefinition with kind=resource)
    Resource,
    /// A datatype (StructureDefinition with kind=primitive-type/complex-type)
    Type,
    ValueSet,
    CodeSystem,
    Instance,
    Any,
}

impl FishKind {
    /// Check whether a JSON definition matches this kind filter
    pub fn matches_json(&self, resource: &JsonValue) -> bool {
        let resource_type = resource
            .get("resourceType")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let kind = resource.get("kind").and_then(|v| v.as_str());
        let derivation = resource.get("derivation").and_then(|v| v.as_str());
        let base = resource.get("baseDefinition").and_then(|v| v.as_str());

        match self {
            FishKind::Any => true,
            FishKind::Profile => {
                resource_type == "StructureDefinition"
                    && derivation == Some("constraint")
                    && !base.map(|b| b.ends_with("/Extension")).unwrap_or(false)
            }
            FishKind::Extension => {
                resource_type == "StructureDefinition"
                    && base.map(|b| b.ends_with("/Extension")).unwrap_or(false)
            }
            FishKind::Resource => {
                resource_type == "StructureDefinition"
                    && kind == Some("resource")
                    && derivation != Some("constraint")
            }
            FishKind::Type => {
                resource_type == "StructureDefinition"
                    && matches!(kind, Some("primitive-type") | Some("complex-type"))
                    && derivation != Some("constraint")
            }
            FishKind::ValueSet => resource_type == "ValueSet",
            FishKind::CodeSystem => resource_type == "CodeSystem",
            FishKind::Instance => !matches!(
                resource_type,
                "StructureDefinition" | "ValueSet" | "CodeSystem" | "SearchParameter"
            ),
        }
    }

    /// Check whether a Tank entity matches this kind filter
    pub fn matches_entity(&self, entity: &Entity) -> bool {
        match self {
            FishKind::Any => true,
            FishKind::Profile => matches!(entity, Entity::Profile(_)),
            FishKind::Extension => matches!(entity, Entity::Extension(_)),
            FishKind::ValueSet => matches!(entity, Entity::ValueSet(_)),
            FishKind::CodeSystem => matches!(entity, Entity::CodeSystem(_)),
            FishKind::Instance => matches!(entity, Entity::Instance(_)),
            FishKind::Resource | FishKind::Type => false,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FishKind::Profile => "Profile",
            FishKind::Extension => "Extension",
            FishKind::Resource => "Resource",
            FishKind::Type => "Type",
            FishKind::ValueSet => "ValueSet",
            FishKind::CodeSystem => "CodeSystem",
            FishKind::Instance => "Instance",
            FishKind::Any => "Any",
        }
    }
}

/// Lightweight metadata answered by `fish_metadata` without a full export
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FishMetadata {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    /// FHIR resourceType of the artifact ("StructureDefinition", ...)
    pub resource_type: String,
    /// For StructureDefinitions: the constrained type (e.g. "Observation")
    pub sd_type: Option<String>,
    /// Declared parent (profiles and extensions)
    pub parent: Option<String>,
    /// Usage, when the definition is a shorthand instance
    pub instance_usage: Option<InstanceUsage>,
}

/// Unified lookup interface over a definition source
pub trait Fishable {
    /// Find a definition by name, id or canonical URL, preferring the first
    /// match in the given kind order
    fn fish(&self, key: &str, kinds: &[FishKind]) -> Option<JsonValue>;

    /// Metadata-only lookup
    fn fish_metadata(&self, key: &str, kinds: &[FishKind]) -> Option<FishMetadata>;
}

/// Coordinates the three lookup tiers for one compilation
pub struct FishingContext<'a> {
    package: &'a Package,
    tank: &'a Tank,
    cache: &'a DefinitionsCache,
    canonical: &'a str,
}

impl<'a> FishingContext<'a> {
    pub fn new(
        package: &'a Package,
        tank: &'a Tank,
        cache: &'a DefinitionsCache,
        canonical: &'a str,
    ) -> Self {
        Self {
            package,
            tank,
            cache,
            canonical,
        }
    }

    pub fn tank(&self) -> &Tank {
        self.tank
    }

    pub fn cache(&self) -> &DefinitionsCache {
        self.cache
    }

    pub fn package(&self) -> &Package {
        self.package
    }

    /// Metadata for a Tank entity, constructing the canonical URL the way
    /// its eventual export will
    pub fn tank_metadata(&self, key: &str, kinds: &[FishKind]) -> Option<FishMetadata> {
        let entity = self.tank.find_of_kind(key, kinds)?;
        Some(entity_metadata(entity, self.canonical))
    }
}

impl Fishable for FishingContext<'_> {
    fn fish(&self, key: &str, kinds: &[FishKind]) -> Option<JsonValue> {
        trace!("fishing for '{}' (kinds: {:?})", key, kinds);

        if let Some(found) = self.package.fish(key, kinds) {
            debug!("found '{}' in package", key);
            return Some(found);
        }

        // A Tank entity that has not been exported yet must not fall through
        // to an external definition of the same name
        if self.tank.find_of_kind(key, kinds).is_some() {
            debug!("'{}' is in the tank but not yet exported", key);
            return None;
        }

        self.cache.fish(key, kinds)
    }

    fn fish_metadata(&self, key: &str, kinds: &[FishKind]) -> Option<FishMetadata> {
        if let Some(meta) = self.package.fish_metadata(key, kinds) {
            return Some(meta);
        }
        if let Some(meta) = self.tank_metadata(key, kinds) {
            return Some(meta);
        }
        self.cache.fish_metadata(key, kinds)
    }
}

/// Metadata for a Tank entity that has not been exported yet
pub fn entity_metadata(entity: &Entity, canonical: &str) -> FishMetadata {
    let base = canonical.trim_end_matches('/');
    match entity {
        Entity::Profile(p) => {
            let id = p.id.clone().unwrap_or_else(|| p.name.clone());
            FishMetadata {
                url: Some(format!("{base}/StructureDefinition/{id}")),
                id,
                name: p.name.clone(),
                resource_type: "StructureDefinition".to_string(),
                sd_type: None,
                parent: p.parent.clone(),
                instance_usage: None,
            }
        }
        Entity::Extension(x) => {
            let id = x.id.clone().unwrap_or_else(|| x.name.clone());
            FishMetadata {
                url: Some(format!("{base}/StructureDefinition/{id}")),
                id,
                name: x.name.clone(),
                resource_type: "StructureDefinition".to_string(),
                sd_type: Some("Extension".to_string()),
                parent: x.parent.clone(),
                instance_usage: None,
            }
        }
        Entity::Instance(i) => FishMetadata {
            id: i.id.clone().unwrap_or_else(|| i.name.clone()),
            name: i.name.clone(),
            url: None,
            resource_type: String::new(),
            sd_type: None,
            parent: Some(i.instance_of.clone()),
            instance_usage: Some(i.usage),
        },
        Entity::ValueSet(v) => {
            let id = v.id.clone().unwrap_or_else(|| v.name.clone());
            FishMetadata {
                url: Some(format!("{base}/ValueSet/{id}")),
                id,
                name: v.name.clone(),
                resource_type: "ValueSet".to_string(),
                sd_type: None,
                parent: None,
                instance_usage: None,
            }
        }
        Entity::CodeSystem(c) => {
            let id = c.id.clone().unwrap_or_else(|| c.name.clone());
            FishMetadata {
                url: Some(format!("{base}/CodeSystem/{id}")),
                id,
                name: c.name.clone(),
                resource_type: "CodeSystem".to_string(),
                sd_type: None,
                parent: None,
                instance_usage: None,
            }
        }
        Entity::RuleSet(rs) => FishMetadata {
            id: rs.name.clone(),
            name: rs.name.clone(),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Document, Profile};
    use serde_json::json;

    fn patient_sd() -> JsonValue {
        json!({
            "resourceType": "StructureDefinition",
            "id": "Patient",
            "url": "http://hl7.org/fhir/StructureDefinition/Patient",
            "name": "Patient",
            "kind": "resource",
            "type": "Patient",
            "derivation": "specialization"
        })
    }

    #[test]
    fn test_fish_kind_matches_json() {
        let sd = patient_sd();
        assert!(FishKind::Resource.matches_json(&sd));
        assert!(FishKind::Any.matches_json(&sd));
        assert!(!FishKind::Profile.matches_json(&sd));
        assert!(!FishKind::ValueSet.matches_json(&sd));

        let profile = json!({
            "resourceType": "StructureDefinition",
            "kind": "resource",
            "derivation": "constraint",
            "baseDefinition": "http://hl7.org/fhir/StructureDefinition/Patient"
        });
        assert!(FishKind::Profile.matches_json(&profile));
        assert!(!FishKind::Resource.matches_json(&profile));

        let extension = json!({
            "resourceType": "StructureDefinition",
            "kind": "complex-type",
            "derivation": "constraint",
            "baseDefinition": "http://hl7.org/fhir/StructureDefinition/Extension"
        });
        assert!(FishKind::Extension.matches_json(&extension));
        assert!(!FishKind::Profile.matches_json(&extension));
    }

    #[test]
    fn test_tank_blocks_external_lookup() {
        let cache = DefinitionsCache::from_definitions(vec![patient_sd()]);
        let package = Package::new();

        let mut doc = Document::new("test.fsh");
        doc.entities.push(Entity::Profile(Profile {
            name: "Patient".to_string(),
            parent: Some("Resource".to_string()),
            ..Default::default()
        }));
        let mut tank = Tank::new();
        tank.add_document(doc);

        let ctx = FishingContext::new(&package, &tank, &cache, "http://example.org/fhir");

        // The tank's own Patient profile shadows the core resource
        assert!(ctx.fish("Patient", &[FishKind::Profile]).is_none());
        // Kinds the tank entity does not match still reach the cache
        assert!(ctx.fish("Patient", &[FishKind::Resource]).is_some());
    }

    #[test]
    fn test_entity_metadata_urls() {
        let entity = Entity::Profile(Profile {
            name: "MyPatient".to_string(),
            id: Some("my-patient".to_string()),
            parent: Some("Patient".to_string()),
            ..Default::default()
        });
        let meta = entity_metadata(&entity, "http://example.org/fhir/");
        assert_eq!(
            meta.url.as_deref(),
            Some("http://example.org/fhir/StructureDefinition/my-patient")
        );
        assert_eq!(meta.parent.as_deref(), Some("Patient"));
    }
}

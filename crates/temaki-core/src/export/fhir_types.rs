//! FHIR type definitions for export
//!
//! Simplified StructureDefinition and ElementDefinition models focused on
//! the fields the exporters reason about. Everything else (patternX/fixedX
//! values, caret-set fields, fields inherited from external snapshots)
//! round-trips through the flattened `other` map so no information from a
//! resolved parent is lost.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

use crate::ast::{BindingStrength, InstanceUsage};

// ============================================================================
// StructureDefinition
// ============================================================================

/// FHIR StructureDefinition resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StructureDefinition {
    /// Always "StructureDefinition"
    pub resource_type: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    pub status: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub publisher: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fhir_version: Option<String>,

    /// primitive-type | complex-type | resource | logical
    pub kind: String,

    #[serde(rename = "abstract")]
    pub is_abstract: bool,

    /// For extensions: the contexts in which use is allowed; inherited from
    /// the parent unchanged
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<JsonValue>,

    /// Type defined or constrained by this structure
    #[serde(rename = "type")]
    pub type_field: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_definition: Option<String>,

    /// specialization | constraint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub derivation: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<ElementList>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub differential: Option<ElementList>,

    /// Fields this model does not interpret (text, contact, mapping, ...)
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub other: BTreeMap<String, JsonValue>,
}

/// snapshot / differential wrapper
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ElementList {
    pub element: Vec<ElementDefinition>,
}

impl StructureDefinition {
    pub fn from_json(json: &JsonValue) -> Result<Self, serde_json::Error> {
        serde_json::from_value(json.clone())
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }

    pub fn snapshot_elements(&self) -> &[ElementDefinition] {
        self.snapshot.as_ref().map(|s| s.element.as_slice()).unwrap_or(&[])
    }

    pub fn snapshot_elements_mut(&mut self) -> &mut Vec<ElementDefinition> {
        &mut self.snapshot.get_or_insert_with(ElementList::default).element
    }

    /// Index of the element with the given id
    pub fn position_of_id(&self, id: &str) -> Option<usize> {
        self.snapshot_elements().iter().position(|e| e.id() == id)
    }

    /// First element whose path matches and which is not a slice
    pub fn find_element(&self, path: &str) -> Option<&ElementDefinition> {
        self.snapshot_elements()
            .iter()
            .find(|e| e.path == path && e.slice_name.is_none())
    }

    /// Index after which a new child or slice of the element at `index`
    /// should be inserted: after the element and all of its descendants and
    /// slices
    pub fn insertion_point_after(&self, index: usize) -> usize {
        let elements = self.snapshot_elements();
        let base = &elements[index];
        let prefix = format!("{}.", base.path);
        let mut insert = index + 1;
        while insert < elements.len() {
            let e = &elements[insert];
            if e.path == base.path || e.path.starts_with(&prefix) {
                insert += 1;
            } else {
                break;
            }
        }
        insert
    }
}

// ============================================================================
// ElementDefinition
// ============================================================================

/// Definition of one node in the element tree
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ElementDefinition {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub path: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub slicing: Option<ElementSlicing>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub short: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<ElementBase>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(rename = "type")]
    pub types: Option<Vec<ElementType>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub must_support: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_modifier: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_summary: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<ElementBinding>,

    /// patternX / fixedX values and any further fields (constraint, mapping,
    /// caret-set extras) keyed by their JSON field name
    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub other: BTreeMap<String, JsonValue>,
}

impl ElementDefinition {
    pub fn new(path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: Some(path.clone()),
            path,
            ..Default::default()
        }
    }

    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.path)
    }

    /// Last segment of the path
    pub fn name(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    pub fn is_choice(&self) -> bool {
        self.path.ends_with("[x]")
    }

    pub fn type_codes(&self) -> Vec<&str> {
        self.types
            .as_deref()
            .unwrap_or(&[])
            .iter()
            .map(|t| t.code.as_str())
            .collect()
    }

    /// The single type of this element, when it has exactly one
    pub fn single_type(&self) -> Option<&ElementType> {
        match self.types.as_deref() {
            Some([only]) => Some(only),
            _ => None,
        }
    }

    /// The `(field, value)` of an attached patternX or fixedX, if any
    pub fn assigned_value(&self) -> Option<(&str, &JsonValue)> {
        self.other
            .iter()
            .find(|(k, _)| is_pattern_key(k) || is_fixed_key(k))
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn pattern_value(&self) -> Option<(&str, &JsonValue)> {
        self.other
            .iter()
            .find(|(k, _)| is_pattern_key(k))
            .map(|(k, v)| (k.as_str(), v))
    }

    pub fn fixed_value(&self) -> Option<(&str, &JsonValue)> {
        self.other
            .iter()
            .find(|(k, _)| is_fixed_key(k))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Remove any attached patternX / fixedX
    pub fn clear_assigned_value(&mut self) {
        self.other.retain(|k, _| !is_pattern_key(k) && !is_fixed_key(k));
    }

    /// Whether the element repeats (max above 1 or unbounded)
    pub fn is_array(&self) -> bool {
        match self.max.as_deref() {
            Some("*") => true,
            Some(n) => n.parse::<u32>().map(|n| n > 1).unwrap_or(false),
            None => false,
        }
    }
}

fn is_pattern_key(key: &str) -> bool {
    key.strip_prefix("pattern")
        .and_then(|s| s.chars().next())
        .map(|c| c.is_ascii_uppercase())
        .unwrap_or(false)
}

fn is_fixed_key(key: &str) -> bool {
    key.strip_prefix("fixed")
        .and_then(|s| s.chars().next())
        .map(|c| c.is_ascii_uppercase())
        .unwrap_or(false)
}

/// Data type for an element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElementType {
    pub code: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_profile: Option<Vec<String>>,

    #[serde(flatten, skip_serializing_if = "BTreeMap::is_empty")]
    pub other: BTreeMap<String, JsonValue>,
}

impl ElementType {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            profile: None,
            target_profile: None,
            other: BTreeMap::new(),
        }
    }
}

/// Slicing metadata on an array element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ElementSlicing {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub discriminator: Vec<SlicingDiscriminator>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ordered: Option<bool>,

    /// closed | open | openAtEnd
    pub rules: String,
}

/// value | exists | pattern | type | profile
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SlicingDiscriminator {
    #[serde(rename = "type")]
    pub type_field: String,
    pub path: String,
}

/// Base element information carried through derivations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElementBase {
    pub path: String,
    pub min: u32,
    pub max: String,
}

/// ValueSet binding for an element
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ElementBinding {
    pub strength: BindingStrength,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_set: Option<String>,
}

// ============================================================================
// InstanceDefinition
// ============================================================================

/// A materialized resource instance
///
/// `content` is the full JSON resource (including `resourceType` and `id`
/// for resource instances); the remaining fields are compile-time metadata
/// that never serializes into the artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceDefinition {
    pub resource_type: String,
    pub id: String,
    /// Shorthand name of the instance
    pub instance_name: String,
    pub usage: InstanceUsage,
    /// URL or type name the instance was validated against
    pub instance_of: String,
    pub content: serde_json::Map<String, JsonValue>,
}

impl InstanceDefinition {
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(self.content.clone())
    }

    pub fn is_inline(&self) -> bool {
        self.usage == InstanceUsage::Inline
    }
}

//! Differential generation
//!
//! The differential records only the element nodes actually mutated by the
//! entity being exported, and for each node only the fields that changed
//! against the pristine parent snapshot. Elements the entity never touched
//! are excluded even when they differ textually (reslicing ids aside), so a
//! no-op entity produces an empty differential.

use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeSet;

use super::fhir_types::{ElementDefinition, ElementList, StructureDefinition};

/// Compute the differential for `sd` against the parent's snapshot
///
/// `touched` is the set of element ids mutated during rule application, in
/// no particular order; output elements follow snapshot order.
pub fn compute_differential(
    sd: &StructureDefinition,
    baseline: &StructureDefinition,
    touched: &BTreeSet<String>,
) -> ElementList {
    let mut differential = ElementList::default();

    for element in sd.snapshot_elements() {
        if !touched.contains(element.id()) {
            continue;
        }

        let baseline_element = baseline
            .snapshot_elements()
            .iter()
            .find(|e| e.id() == element.id());

        match baseline_element {
            None => {
                // New node (slice or choice specialization): carried whole,
                // minus inherited base bookkeeping
                let mut new_element = element.clone();
                new_element.base = None;
                differential.element.push(new_element);
            }
            Some(base) => {
                if let Some(changed) = diff_element(element, base) {
                    differential.element.push(changed);
                }
            }
        }
    }

    differential
}

/// Field-level diff of one element; `None` when nothing changed
fn diff_element(element: &ElementDefinition, base: &ElementDefinition) -> Option<ElementDefinition> {
    let current = to_map(element);
    let baseline = to_map(base);

    let mut out = Map::new();
    for (key, value) in &current {
        if key == "id" || key == "path" || key == "base" {
            continue;
        }
        if baseline.get(key) != Some(value) {
            out.insert(key.clone(), value.clone());
        }
    }

    if out.is_empty() {
        return None;
    }

    out.insert("id".to_string(), JsonValue::String(element.id().to_string()));
    out.insert("path".to_string(), JsonValue::String(element.path.clone()));
    if let Some(slice) = &element.slice_name {
        out.insert("sliceName".to_string(), JsonValue::String(slice.clone()));
    }

    serde_json::from_value(JsonValue::Object(out)).ok()
}

fn to_map(element: &ElementDefinition) -> Map<String, JsonValue> {
    match serde_json::to_value(element) {
        Ok(JsonValue::Object(map)) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::fhir_types::ElementList;
    use std::collections::BTreeMap;

    fn sd_with(paths_and_min: &[(&str, u32)]) -> StructureDefinition {
        StructureDefinition {
            resource_type: "StructureDefinition".into(),
            id: None,
            url: "http://example.org/sd".into(),
            version: None,
            name: "Test".into(),
            title: None,
            status: "draft".into(),
            date: None,
            publisher: None,
            description: None,
            fhir_version: None,
            kind: "resource".into(),
            is_abstract: false,
            context: None,
            type_field: "Observation".into(),
            base_definition: None,
            derivation: None,
            snapshot: Some(ElementList {
                element: paths_and_min
                    .iter()
                    .map(|(path, min)| {
                        let mut e = ElementDefinition::new(*path);
                        e.min = Some(*min);
                        e
                    })
                    .collect(),
            }),
            differential: None,
            other: BTreeMap::new(),
        }
    }

    #[test]
    fn test_untouched_elements_are_excluded() {
        let baseline = sd_with(&[("Observation", 0), ("Observation.subject", 0)]);
        let mut sd = baseline.clone();
        sd.snapshot_elements_mut()[1].min = Some(1);

        // Touched but unchanged nodes do not appear either
        let mut touched = BTreeSet::new();
        touched.insert("Observation.subject".to_string());
        touched.insert("Observation".to_string());

        let differential = compute_differential(&sd, &baseline, &touched);
        assert_eq!(differential.element.len(), 1);
        let entry = &differential.element[0];
        assert_eq!(entry.path, "Observation.subject");
        assert_eq!(entry.min, Some(1));
        assert!(entry.max.is_none());
    }

    #[test]
    fn test_noop_entity_has_empty_differential() {
        let baseline = sd_with(&[("Observation", 0)]);
        let sd = baseline.clone();
        let differential = compute_differential(&sd, &baseline, &BTreeSet::new());
        assert!(differential.element.is_empty());
    }

    #[test]
    fn test_new_slice_is_carried_whole() {
        let baseline = sd_with(&[("Observation", 0), ("Observation.category", 0)]);
        let mut sd = baseline.clone();
        let mut slice = ElementDefinition::new("Observation.category");
        slice.id = Some("Observation.category:niceSlice".to_string());
        slice.slice_name = Some("niceSlice".to_string());
        slice.min = Some(1);
        sd.snapshot_elements_mut().push(slice);

        let mut touched = BTreeSet::new();
        touched.insert("Observation.category:niceSlice".to_string());

        let differential = compute_differential(&sd, &baseline, &touched);
        assert_eq!(differential.element.len(), 1);
        assert_eq!(
            differential.element[0].slice_name.as_deref(),
            Some("niceSlice")
        );
    }
}

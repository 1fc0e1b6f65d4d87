//! ValueSet exporter
//!
//! Builds a FHIR ValueSet from component rules: explicit concepts merge into
//! per-system include entries, system selections carry their filters, and
//! caret rules set fields on the resource itself.

use serde_json::{json, Map, Value as JsonValue};
use tracing::debug;

use crate::ast::{Rule, ValueSet, VsComponentRule};
use crate::config::ProjectConfiguration;
use crate::diagnostics::Reporter;
use crate::export::{expand_rules, ExpandedRule, ExportError};
use crate::export::values::value_to_plain_json;
use crate::semantic::fishing::{FishKind, Fishable, FishingContext};

pub fn export_value_set(
    value_set: &ValueSet,
    fisher: &FishingContext<'_>,
    config: &ProjectConfiguration,
    reporter: &mut Reporter,
) -> Result<JsonValue, ExportError> {
    debug!("exporting ValueSet {}", value_set.name);

    let id = value_set
        .id
        .clone()
        .unwrap_or_else(|| value_set.name.clone());

    let mut resource = Map::new();
    resource.insert("resourceType".to_string(), json!("ValueSet"));
    resource.insert("id".to_string(), json!(id));
    resource.insert(
        "url".to_string(),
        json!(config.canonical_for("ValueSet", &id)),
    );
    resource.insert("name".to_string(), json!(value_set.name));
    if let Some(title) = &value_set.title {
        resource.insert("title".to_string(), json!(title));
    }
    resource.insert("status".to_string(), json!(config.status_or_default()));
    if let Some(version) = &config.version {
        resource.insert("version".to_string(), json!(version));
    }
    if let Some(description) = &value_set.description {
        resource.insert("description".to_string(), json!(description));
    }

    let expanded = expand_rules(
        &value_set.rules,
        fisher.tank(),
        &value_set.name,
        |rule| matches!(rule, Rule::VsComponent(_) | Rule::Caret(_)),
        reporter,
    );

    let mut includes: Vec<JsonValue> = Vec::new();
    let mut excludes: Vec<JsonValue> = Vec::new();

    for ExpandedRule { rule, .. } in &expanded {
        match rule {
            Rule::VsComponent(component) => {
                if let Err(message) =
                    apply_component(component, fisher, &mut includes, &mut excludes)
                {
                    reporter.error_at("ValueSetCompose", message, component.span.clone());
                }
            }
            Rule::Caret(caret) if caret.path.is_empty() => {
                resource.insert(
                    caret.caret_path.clone(),
                    value_to_plain_json(&caret.value),
                );
            }
            Rule::Caret(caret) => {
                reporter.error_at(
                    "ValueSetCompose",
                    format!(
                        "caret rule on path '{}' is not supported in a value set",
                        caret.path
                    ),
                    caret.span.clone(),
                );
            }
            _ => {}
        }
    }

    if includes.is_empty() && excludes.is_empty() {
        reporter.warn_at(
            "ValueSetCompose",
            format!("ValueSet {} selects no content", value_set.name),
            value_set.span.clone(),
        );
    }

    let mut compose = Map::new();
    if !includes.is_empty() {
        compose.insert("include".to_string(), JsonValue::Array(includes));
    }
    if !excludes.is_empty() {
        compose.insert("exclude".to_string(), JsonValue::Array(excludes));
    }
    if !compose.is_empty() {
        resource.insert("compose".to_string(), JsonValue::Object(compose));
    }

    Ok(JsonValue::Object(resource))
}

fn apply_component(
    component: &VsComponentRule,
    fisher: &FishingContext<'_>,
    includes: &mut Vec<JsonValue>,
    excludes: &mut Vec<JsonValue>,
) -> Result<(), String> {
    let bucket = if component.include { includes } else { excludes };

    // Explicit concepts merge into the entry for their system
    for concept in &component.concepts {
        let system = concept
            .system
            .as_deref()
            .ok_or_else(|| format!("concept #{} names no code system", concept.code))?;
        let system_url = resolve_system(system, fisher)?;

        let mut concept_json = Map::new();
        concept_json.insert("code".to_string(), json!(concept.code));
        if let Some(display) = &concept.display {
            concept_json.insert("display".to_string(), json!(display));
        }

        let entry = bucket.iter_mut().find(|e| {
            e.get("system").and_then(|s| s.as_str()) == Some(system_url.as_str())
                && e.get("filter").is_none()
        });
        match entry {
            Some(entry) => {
                entry
                    .as_object_mut()
                    .unwrap()
                    .entry("concept")
                    .or_insert_with(|| JsonValue::Array(Vec::new()))
                    .as_array_mut()
                    .unwrap()
                    .push(JsonValue::Object(concept_json));
            }
            None => {
                bucket.push(json!({
                    "system": system_url,
                    "concept": [JsonValue::Object(concept_json)],
                }));
            }
        }
    }

    // Whole-system / whole-value-set selections
    if component.system.is_some() || !component.value_sets.is_empty() {
        let mut entry = Map::new();
        if let Some(system) = &component.system {
            entry.insert("system".to_string(), json!(resolve_system(system, fisher)?));
        }
        if !component.value_sets.is_empty() {
            let resolved: Result<Vec<String>, String> = component
                .value_sets
                .iter()
                .map(|vs| resolve_value_set(vs, fisher))
                .collect();
            entry.insert("valueSet".to_string(), json!(resolved?));
        }
        if !component.filters.is_empty() {
            let filters: Vec<JsonValue> = component
                .filters
                .iter()
                .map(|f| {
                    json!({
                        "property": f.property,
                        "op": f.op,
                        "value": f.value,
                    })
                })
                .collect();
            entry.insert("filter".to_string(), JsonValue::Array(filters));
        }
        bucket.push(JsonValue::Object(entry));
    }

    Ok(())
}

fn resolve_system(system: &str, fisher: &FishingContext<'_>) -> Result<String, String> {
    if system.contains("://") || system.starts_with("urn:") {
        return Ok(system.to_string());
    }
    fisher
        .fish_metadata(system, &[FishKind::CodeSystem])
        .and_then(|meta| meta.url)
        .ok_or_else(|| format!("cannot resolve code system '{system}'"))
}

fn resolve_value_set(value_set: &str, fisher: &FishingContext<'_>) -> Result<String, String> {
    if value_set.contains("://") || value_set.starts_with("urn:") {
        return Ok(value_set.to_string());
    }
    fisher
        .fish_metadata(value_set, &[FishKind::ValueSet])
        .and_then(|meta| meta.url)
        .ok_or_else(|| format!("cannot resolve value set '{value_set}'"))
}

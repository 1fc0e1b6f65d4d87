//! CodeSystem exporter

use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeSet;
use tracing::debug;

use crate::ast::{CodeSystem, Rule};
use crate::config::ProjectConfiguration;
use crate::diagnostics::Reporter;
use crate::export::values::value_to_plain_json;
use crate::export::{expand_rules, ExpandedRule, ExportError};
use crate::semantic::fishing::FishingContext;

pub fn export_code_system(
    code_system: &CodeSystem,
    fisher: &FishingContext<'_>,
    config: &ProjectConfiguration,
    reporter: &mut Reporter,
) -> Result<JsonValue, ExportError> {
    debug!("exporting CodeSystem {}", code_system.name);

    let id = code_system
        .id
        .clone()
        .unwrap_or_else(|| code_system.name.clone());

    let mut resource = Map::new();
    resource.insert("resourceType".to_string(), json!("CodeSystem"));
    resource.insert("id".to_string(), json!(id));
    resource.insert(
        "url".to_string(),
        json!(config.canonical_for("CodeSystem", &id)),
    );
    resource.insert("name".to_string(), json!(code_system.name));
    if let Some(title) = &code_system.title {
        resource.insert("title".to_string(), json!(title));
    }
    resource.insert("status".to_string(), json!(config.status_or_default()));
    if let Some(version) = &config.version {
        resource.insert("version".to_string(), json!(version));
    }
    if let Some(description) = &code_system.description {
        resource.insert("description".to_string(), json!(description));
    }
    resource.insert("content".to_string(), json!("complete"));

    let expanded = expand_rules(
        &code_system.rules,
        fisher.tank(),
        &code_system.name,
        |rule| matches!(rule, Rule::Concept(_) | Rule::Caret(_)),
        reporter,
    );

    let mut concepts: Vec<JsonValue> = Vec::new();
    let mut seen: BTreeSet<String> = BTreeSet::new();

    for ExpandedRule { rule, .. } in &expanded {
        match rule {
            Rule::Concept(concept) => {
                if !seen.insert(concept.code.clone()) {
                    reporter.error_at(
                        "ValueSetCompose",
                        format!(
                            "CodeSystem {} defines concept #{} more than once",
                            code_system.name, concept.code
                        ),
                        concept.span.clone(),
                    );
                    continue;
                }
                let mut entry = Map::new();
                entry.insert("code".to_string(), json!(concept.code));
                if let Some(display) = &concept.display {
                    entry.insert("display".to_string(), json!(display));
                }
                if let Some(definition) = &concept.definition {
                    entry.insert("definition".to_string(), json!(definition));
                }
                concepts.push(JsonValue::Object(entry));
            }
            Rule::Caret(caret) if caret.path.is_empty() => {
                resource.insert(
                    caret.caret_path.clone(),
                    value_to_plain_json(&caret.value),
                );
            }
            _ => {}
        }
    }

    resource.insert("count".to_string(), json!(concepts.len()));
    if !concepts.is_empty() {
        resource.insert("concept".to_string(), JsonValue::Array(concepts));
    }

    Ok(JsonValue::Object(resource))
}

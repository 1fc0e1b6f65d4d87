//! Instance exporter
//!
//! Materializes a shorthand Instance into a concrete resource: assignment
//! rules are validated against the resolved profile's element definitions,
//! implied values (patterns and fixed values from the profile chain) are
//! applied along reached paths, references are rewritten, and the finished
//! instance is checked for required elements and a well-formed id.

use regex::Regex;
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, trace};

use crate::ast::{FixedValueRule, FshValue, Instance, InstanceUsage, Rule};
use crate::diagnostics::{Diagnostic, Reporter, Severity, SourceSpan};
use crate::export::fhir_types::{InstanceDefinition, StructureDefinition};
use crate::export::sd_exporter::{json_is_superset, resolve_element};
use crate::export::values::value_for_type;
use crate::export::{expand_rules, ExpandedRule, ExportError};
use crate::semantic::fishing::{FishKind, Fishable, FishingContext};
use crate::semantic::path::{parse_path, type_suffix, PathSegment, SoftIndexOp};

/// A path segment resolved against the element tree, ready for placement
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResolvedSegment {
    /// Serialized JSON property name (choice elements already collapsed)
    name: String,
    /// Array index; `None` for singleton elements
    index: Option<usize>,
}

/// Export one Instance to an InstanceDefinition
pub fn export_instance(
    instance: &Instance,
    fisher: &FishingContext<'_>,
    reporter: &mut Reporter,
) -> Result<InstanceDefinition, ExportError> {
    debug!("exporting instance {}", instance.name);

    if instance.instance_of.is_empty() {
        return Err(ExportError::InstanceOfNotDefined {
            instance_of: "(none declared)".to_string(),
            instance: instance.name.clone(),
        });
    }

    // Resolution order: Resource, Profile, Extension, Type
    let sd_json = fisher
        .fish(
            &instance.instance_of,
            &[
                FishKind::Resource,
                FishKind::Profile,
                FishKind::Extension,
                FishKind::Type,
            ],
        )
        .ok_or_else(|| ExportError::InstanceOfNotDefined {
            instance_of: instance.instance_of.clone(),
            instance: instance.name.clone(),
        })?;
    let sd = StructureDefinition::from_json(&sd_json).map_err(|err| ExportError::InvalidParent {
        parent: instance.instance_of.clone(),
        reason: err.to_string(),
    })?;

    let is_resource = sd.kind == "resource";
    let mut usage = instance.usage;
    if !is_resource && usage != InstanceUsage::Inline {
        reporter.warn_at(
            "FixingNonResource",
            format!(
                "Instance {} is of non-resource type {}; usage forced to Inline",
                instance.name, sd.type_field
            ),
            instance.span.clone(),
        );
        usage = InstanceUsage::Inline;
    }

    let id = sanitize_id(instance, reporter);

    let mut content: Map<String, JsonValue> = Map::new();
    if is_resource {
        content.insert("resourceType".to_string(), JsonValue::String(sd.type_field.clone()));
        content.insert("id".to_string(), JsonValue::String(id.clone()));
        if sd.derivation.as_deref() == Some("constraint") {
            content.insert("meta".to_string(), serde_json::json!({ "profile": [sd.url] }));
        }
    }

    // Mixins first in declaration order, then in-body rules with inserts
    // expanded at their textual position
    let mut all_rules: Vec<Rule> = Vec::new();
    for mixin in &instance.mixins {
        all_rules.push(Rule::Insert(crate::ast::InsertRule {
            rule_set: mixin.clone(),
            span: instance.span.clone(),
        }));
    }
    all_rules.extend_from_slice(&instance.rules);

    let expanded = expand_rules(
        &all_rules,
        fisher.tank(),
        &instance.name,
        Rule::is_assignment,
        reporter,
    );

    let mut builder = InstanceBuilder {
        fisher,
        working_sds: HashMap::new(),
        soft_indices: HashMap::new(),
        slice_indices: HashMap::new(),
        overrides: Vec::new(),
        applied_implied: BTreeSet::new(),
    };
    let root_sd_key = builder.intern_sd(sd.clone());

    // Pre-scan for inline-resource paths: a rule that plants a resource (or
    // sets resourceType) re-types every descendant path
    for ExpandedRule { rule, .. } in &expanded {
        if let Rule::Fixed(fixed) = rule {
            builder.scan_inline_override(fixed);
        }
    }

    for ExpandedRule { rule, applied_span } in &expanded {
        if let Rule::Fixed(fixed) = rule {
            builder.apply_assignment(
                &mut content,
                &root_sd_key,
                fixed,
                applied_span.as_ref(),
                reporter,
            );
        }
    }

    clean_instance(&mut content);
    order_top_level(&mut content, builder.working_sds.get(&root_sd_key).unwrap());

    validate_required_elements(
        builder.working_sds.get(&root_sd_key).unwrap(),
        &content,
        &instance.span,
        &instance.name,
        reporter,
    );

    let instance_of_label = if sd.url.is_empty() {
        sd.type_field.clone()
    } else {
        sd.url.clone()
    };
    trace!("instance {} complete", instance.name);
    Ok(InstanceDefinition {
        resource_type: if is_resource {
            sd.type_field.clone()
        } else {
            String::new()
        },
        id,
        instance_name: instance.name.clone(),
        usage,
        instance_of: instance_of_label,
        content,
    })
}

/// Instance ids must match `[A-Za-z0-9\-.]{1,64}`; an otherwise-valid name
/// containing `_` is sanitized to `-` with a warning, anything else is
/// reported but still emitted
fn sanitize_id(instance: &Instance, reporter: &mut Reporter) -> String {
    let raw = instance
        .id
        .clone()
        .unwrap_or_else(|| instance.name.clone());

    let id_shape = Regex::new(r"^[A-Za-z0-9\-.]{1,64}$").unwrap();
    if id_shape.is_match(&raw) {
        return raw;
    }

    let sanitized = raw.replace('_', "-");
    if id_shape.is_match(&sanitized) {
        reporter.warn_at(
            "InvalidFHIRId",
            format!("id '{raw}' contains '_'; using '{sanitized}'"),
            instance.span.clone(),
        );
        return sanitized;
    }

    reporter.error_at(
        "InvalidFHIRId",
        format!("id '{raw}' does not match [A-Za-z0-9\\-.]{{1,64}}"),
        instance.span.clone(),
    );
    raw
}

struct InstanceBuilder<'a> {
    fisher: &'a FishingContext<'a>,
    /// Working copies of StructureDefinitions, mutated by lazy unfolding
    working_sds: HashMap<String, StructureDefinition>,
    /// `[+]` / `[=]` state per concrete array path
    soft_indices: HashMap<String, usize>,
    /// Assigned index per (concrete array path, slice name)
    slice_indices: HashMap<String, usize>,
    /// Inline-resource overrides: (normalized path prefix, resource type)
    overrides: Vec<(String, String)>,
    /// Implied values already materialized, keyed by concrete path
    applied_implied: BTreeSet<String>,
}

impl<'a> InstanceBuilder<'a> {
    fn intern_sd(&mut self, sd: StructureDefinition) -> String {
        let key = sd.url.clone();
        self.working_sds.entry(key.clone()).or_insert(sd);
        key
    }

    fn sd_for_type(&mut self, type_name: &str) -> Option<String> {
        let existing = self
            .working_sds
            .iter()
            .find(|(_, sd)| sd.type_field == type_name)
            .map(|(k, _)| k.clone());
        if existing.is_some() {
            return existing;
        }
        let json = self.fisher.fish(
            type_name,
            &[FishKind::Resource, FishKind::Profile, FishKind::Type],
        )?;
        let sd = StructureDefinition::from_json(&json).ok()?;
        Some(self.intern_sd(sd))
    }

    /// Record an inline-resource override for descendant paths
    fn scan_inline_override(&mut self, rule: &FixedValueRule) {
        if rule.is_instance {
            if let FshValue::InstanceRef(name) = &rule.value {
                if let Some(instance) = self.fisher.package().find_instance(name) {
                    if !instance.resource_type.is_empty() {
                        self.overrides.push((
                            normalize_path_text(&rule.path),
                            instance.resource_type.clone(),
                        ));
                    }
                }
            }
            return;
        }
        if let Some(prefix) = rule.path.strip_suffix(".resourceType") {
            if let FshValue::String(type_name) = &rule.value {
                self.overrides
                    .push((normalize_path_text(prefix), type_name.clone()));
            }
        }
    }

    /// The effective SD and relative path for a rule path, honoring the
    /// longest inline-resource override prefix
    fn effective_context(&mut self, root_key: &str, path: &str) -> (String, String) {
        let normalized = normalize_path_text(path);
        let mut best: Option<(usize, &str)> = None;
        for (prefix, type_name) in &self.overrides {
            if normalized == *prefix {
                continue;
            }
            if normalized.starts_with(&format!("{prefix}.")) {
                let len = prefix.len();
                if best.map(|(l, _)| len > l).unwrap_or(true) {
                    best = Some((len, type_name));
                }
            }
        }
        if let Some((len, type_name)) = best {
            let type_name = type_name.to_string();
            if let Some(key) = self.sd_for_type(&type_name) {
                let relative = normalized[len + 1..].to_string();
                return (key, relative);
            }
        }
        (root_key.to_string(), path.to_string())
    }

    fn apply_assignment(
        &mut self,
        content: &mut Map<String, JsonValue>,
        root_sd_key: &str,
        rule: &FixedValueRule,
        applied_span: Option<&SourceSpan>,
        reporter: &mut Reporter,
    ) {
        let report = |reporter: &mut Reporter, code: &str, message: String| {
            let mut diagnostic = Diagnostic::new(Severity::Error, message)
                .with_code(code)
                .with_span(rule.span.clone());
            if let Some(applied) = applied_span {
                diagnostic = diagnostic.with_applied_span(applied.clone());
            }
            reporter.report(diagnostic);
        };

        let (sd_key, relative_path) = self.effective_context(root_sd_key, &rule.path);

        let segments = match parse_path(&relative_path) {
            Ok(segments) => segments,
            Err(err) => {
                report(reporter, "CannotResolvePath", err.to_string());
                return;
            }
        };

        // Resolve the element chain, collecting pattern/fixed values and
        // array shapes along the way
        let plan = match self.plan_segments(&sd_key, &segments, &rule.path) {
            Ok(plan) => plan,
            Err((code, message)) => {
                report(reporter, code, message);
                return;
            }
        };

        // Convert the value against the final element's type
        let value = match self.convert_value(&plan, rule, content, reporter) {
            Ok(value) => value,
            Err((code, message)) => {
                report(reporter, code, message);
                return;
            }
        };

        // Implied values first, along the reached prefix only
        for (prefix_len, implied) in &plan.implied {
            let prefix = &plan.resolved[..*prefix_len];
            let key = resolved_path_text(prefix);
            if self.applied_implied.insert(key) {
                merge_missing_at(content, prefix, implied.clone());
            }
        }

        // Conflict semantics against the final element's own assigned value
        let mut value = value;
        if let Some((sd_field, sd_value)) = &plan.final_assigned {
            let is_fixed = sd_field.starts_with("fixed");
            if sd_value.is_object() {
                if !json_is_superset(&value, sd_value) {
                    report(
                        reporter,
                        "ValueAlreadyFixed",
                        format!(
                            "value at {} conflicts with the profile's {} {}; the profile value wins",
                            rule.path, sd_field, sd_value
                        ),
                    );
                }
                value = union_with_pattern(value, sd_value);
            } else if &value != sd_value {
                let code = if is_fixed { "ValueAlreadyFixed" } else { "FixedToPattern" };
                report(
                    reporter,
                    code,
                    format!(
                        "value at {} conflicts with the profile's {} {}; the profile value wins",
                        rule.path, sd_field, sd_value
                    ),
                );
                value = sd_value.clone();
            }
        }

        set_value_at(content, &plan.resolved, value);
    }

    /// Resolve every segment against the working SD, assigning concrete
    /// array indices and collecting implied ancestor values
    fn plan_segments(
        &mut self,
        sd_key: &str,
        segments: &[PathSegment],
        display_path: &str,
    ) -> Result<AssignmentPlan, (&'static str, String)> {
        let mut resolved: Vec<ResolvedSegment> = Vec::new();
        let mut implied: Vec<(usize, JsonValue)> = Vec::new();
        let mut final_assigned = None;
        let mut final_type = None;
        let mut element_path = String::new();

        for (depth, segment) in segments.iter().enumerate() {
            if !element_path.is_empty() {
                element_path.push('.');
            }
            if segment.is_choice() {
                element_path.push_str(&format!("{}[x]", segment.base));
            } else {
                element_path.push_str(&segment.base);
            }
            if let Some(slice) = segment.slice_name() {
                element_path.push_str(&format!("[{slice}]"));
            }

            let (name, is_array, assigned, single_type) = {
                let sd = self.working_sds.get_mut(sd_key).unwrap();
                let mut scratch = BTreeSet::new();
                let index = resolve_element(sd, &element_path, self.fisher, &mut scratch)
                    .map_err(|_| {
                        (
                            "CannotResolvePath",
                            format!("cannot resolve '{display_path}' against {}", sd.type_field),
                        )
                    })?;
                let element = &sd.snapshot_elements()[index];

                // Serialized property name: choice elements collapse to
                // their single type
                let name = if element.is_choice() {
                    let Some(single) = element.single_type() else {
                        return Err((
                            "NoSingleType",
                            format!(
                                "choice element {} has multiple types; narrow or name one",
                                element.path
                            ),
                        ));
                    };
                    if segment.is_choice() {
                        format!("{}{}", segment.base, type_suffix(&single.code))
                    } else {
                        segment.base.clone()
                    }
                } else {
                    segment.base.clone()
                };

                (
                    name,
                    element.is_array(),
                    element
                        .assigned_value()
                        .map(|(k, v)| (k.to_string(), v.clone())),
                    element.single_type().map(|t| t.code.clone()),
                )
            };

            let array_index = if is_array {
                Some(self.concrete_index(&resolved, &name, segment))
            } else {
                None
            };
            resolved.push(ResolvedSegment { name, index: array_index });

            if depth + 1 == segments.len() {
                final_assigned = assigned;
                final_type = single_type;
            } else if let Some((_, value)) = assigned {
                // Pattern or fixed on an ancestor: implied at this prefix
                implied.push((resolved.len(), value));
            }
        }

        Ok(AssignmentPlan {
            resolved,
            implied,
            final_assigned,
            final_type,
        })
    }

    /// Concrete array index for a segment, resolving soft and slice brackets
    fn concrete_index(
        &mut self,
        prefix: &[ResolvedSegment],
        name: &str,
        segment: &PathSegment,
    ) -> usize {
        let path_key = format!("{}.{name}", resolved_path_text(prefix));

        if let Some(index) = segment.index() {
            self.soft_indices.insert(path_key, index);
            return index;
        }
        if let Some(slice) = segment.slice_name() {
            let slice_key = format!("{path_key}:{slice}");
            if let Some(&index) = self.slice_indices.get(&slice_key) {
                return index;
            }
            let next = self
                .soft_indices
                .get(&path_key)
                .map(|&i| i + 1)
                .unwrap_or(0);
            self.slice_indices.insert(slice_key, next);
            self.soft_indices.insert(path_key, next);
            return next;
        }
        match segment.soft_index() {
            Some(SoftIndexOp::Increment) => {
                let next = self
                    .soft_indices
                    .get(&path_key)
                    .map(|&i| i + 1)
                    .unwrap_or(0);
                self.soft_indices.insert(path_key, next);
                next
            }
            Some(SoftIndexOp::Repeat) => self.soft_indices.get(&path_key).copied().unwrap_or(0),
            None => {
                // A bare segment on an array collapses to index 0
                self.soft_indices.entry(path_key).or_insert(0);
                0
            }
        }
    }

    fn convert_value(
        &mut self,
        plan: &AssignmentPlan,
        rule: &FixedValueRule,
        content: &Map<String, JsonValue>,
        reporter: &mut Reporter,
    ) -> Result<JsonValue, (&'static str, String)> {
        match &rule.value {
            FshValue::InstanceRef(name) => {
                let instance = self
                    .fisher
                    .package()
                    .find_instance(name)
                    .ok_or_else(|| {
                        (
                            "CannotResolveCanonical",
                            format!("no instance named '{name}' is defined"),
                        )
                    })?;
                Ok(instance.to_json())
            }
            FshValue::Reference(target) => {
                Ok(serde_json::json!({
                    "reference": self.resolve_reference(target, content, reporter)
                }))
            }
            FshValue::Canonical(target) => {
                let url = self
                    .fisher
                    .fish_metadata(
                        target,
                        &[
                            FishKind::ValueSet,
                            FishKind::CodeSystem,
                            FishKind::Profile,
                            FishKind::Extension,
                        ],
                    )
                    .and_then(|meta| meta.url)
                    .ok_or_else(|| {
                        (
                            "CannotResolveCanonical",
                            format!("cannot resolve Canonical({target})"),
                        )
                    })?;
                Ok(JsonValue::String(url))
            }
            other => match &plan.final_type {
                Some(code) => {
                    value_for_type(other, code).map_err(|reason| ("MismatchedType", reason))
                }
                None => Ok(crate::export::values::value_to_plain_json(other)),
            },
        }
    }

    /// `Reference(Name)` resolves to `Type/id`, or `#id` when the referent
    /// is already contained in this instance
    fn resolve_reference(
        &mut self,
        target: &str,
        content: &Map<String, JsonValue>,
        _reporter: &mut Reporter,
    ) -> String {
        let Some(instance) = self.fisher.package().find_instance(target) else {
            // Not a known instance: keep the author's text (e.g. Type/id)
            return target.to_string();
        };

        let id = instance.id.clone();
        let contained = content
            .get("contained")
            .and_then(|c| c.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .any(|e| e.get("id").and_then(|v| v.as_str()) == Some(id.as_str()))
            })
            .unwrap_or(false);

        if contained {
            format!("#{id}")
        } else {
            format!("{}/{id}", instance.resource_type)
        }
    }
}

struct AssignmentPlan {
    resolved: Vec<ResolvedSegment>,
    /// (prefix length, implied value) for ancestors carrying patterns
    implied: Vec<(usize, JsonValue)>,
    /// patternX/fixedX on the final element itself
    final_assigned: Option<(String, JsonValue)>,
    /// Single type of the final element, when it has one
    final_type: Option<String>,
}

fn normalize_path_text(path: &str) -> String {
    match parse_path(path) {
        Ok(segments) => segments
            .iter()
            .map(|s| match (s.index(), s.slice_name()) {
                (Some(i), _) if i > 0 => format!("{}[{i}]", s.base),
                (_, Some(slice)) => format!("{}[{slice}]", s.base),
                _ => s.base.clone(),
            })
            .collect::<Vec<_>>()
            .join("."),
        Err(_) => path.to_string(),
    }
}

fn resolved_path_text(segments: &[ResolvedSegment]) -> String {
    segments
        .iter()
        .map(|s| match s.index {
            Some(i) => format!("{}[{i}]", s.name),
            None => s.name.clone(),
        })
        .collect::<Vec<_>>()
        .join(".")
}

// ============================================================================
// JSON tree manipulation
// ============================================================================

fn set_value_at(content: &mut Map<String, JsonValue>, segments: &[ResolvedSegment], value: JsonValue) {
    place_value(content, segments, value, true);
}

fn merge_missing_at(
    content: &mut Map<String, JsonValue>,
    segments: &[ResolvedSegment],
    value: JsonValue,
) {
    place_value(content, segments, value, false);
}

fn place_value(
    content: &mut Map<String, JsonValue>,
    segments: &[ResolvedSegment],
    value: JsonValue,
    overwrite: bool,
) {
    let Some((last, prefix)) = segments.split_last() else {
        return;
    };

    let mut cursor: &mut Map<String, JsonValue> = content;
    for segment in prefix {
        let slot = cursor
            .entry(segment.name.clone())
            .or_insert_with(|| match segment.index {
                Some(_) => JsonValue::Array(Vec::new()),
                None => JsonValue::Object(Map::new()),
            });
        let target = match segment.index {
            Some(index) => {
                if !slot.is_array() {
                    *slot = JsonValue::Array(vec![slot.take()]);
                }
                let array = slot.as_array_mut().unwrap();
                while array.len() <= index {
                    array.push(JsonValue::Object(Map::new()));
                }
                &mut array[index]
            }
            None => slot,
        };
        if !target.is_object() {
            *target = JsonValue::Object(Map::new());
        }
        cursor = target.as_object_mut().unwrap();
    }

    match last.index {
        None => match cursor.get_mut(&last.name) {
            Some(existing) if !overwrite => merge_missing(existing, value),
            _ => {
                cursor.insert(last.name.clone(), value);
            }
        },
        Some(index) => {
            let slot = cursor
                .entry(last.name.clone())
                .or_insert_with(|| JsonValue::Array(Vec::new()));
            if !slot.is_array() {
                *slot = JsonValue::Array(vec![slot.take()]);
            }
            let array = slot.as_array_mut().unwrap();
            while array.len() <= index {
                array.push(JsonValue::Null);
            }
            if overwrite || array[index].is_null() {
                if !overwrite {
                    array[index] = value;
                } else {
                    match &mut array[index] {
                        JsonValue::Object(existing) if value.is_object() => {
                            // Overwriting an object slot merges new keys over old
                            if let JsonValue::Object(new) = value {
                                for (k, v) in new {
                                    existing.insert(k, v);
                                }
                            }
                        }
                        slot => *slot = value,
                    }
                }
            } else {
                merge_missing(&mut array[index], value);
            }
        }
    }
}

/// Fill keys of `addition` into `target` without overwriting existing ones
fn merge_missing(target: &mut JsonValue, addition: JsonValue) {
    match (target, addition) {
        (JsonValue::Object(target), JsonValue::Object(addition)) => {
            for (key, value) in addition {
                match target.get_mut(&key) {
                    Some(existing) => merge_missing(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (JsonValue::Array(target), JsonValue::Array(addition)) => {
            for (i, value) in addition.into_iter().enumerate() {
                if i < target.len() {
                    merge_missing(&mut target[i], value);
                } else {
                    target.push(value);
                }
            }
        }
        _ => {}
    }
}

/// Union of an explicit assignment with an element-typed pattern: the
/// pattern's keys win, extra assignment keys are kept
fn union_with_pattern(assignment: JsonValue, pattern: &JsonValue) -> JsonValue {
    let mut out = assignment;
    overwrite_with(&mut out, pattern);
    out
}

fn overwrite_with(target: &mut JsonValue, winner: &JsonValue) {
    match (target, winner) {
        (JsonValue::Object(target), JsonValue::Object(winner)) => {
            for (key, value) in winner {
                match target.get_mut(key) {
                    Some(existing) => overwrite_with(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (JsonValue::Array(target), JsonValue::Array(winner)) => {
            for (i, value) in winner.iter().enumerate() {
                if i < target.len() {
                    overwrite_with(&mut target[i], value);
                } else {
                    target.push(value.clone());
                }
            }
        }
        (target, winner) => *target = winner.clone(),
    }
}

/// Drop empty containers and null-only arrays left by partial assignments
fn clean_instance(content: &mut Map<String, JsonValue>) {
    let keys: Vec<String> = content.keys().cloned().collect();
    for key in keys {
        if let Some(value) = content.get_mut(&key) {
            clean_value(value);
            if is_empty_container(value) {
                content.remove(&key);
            }
        }
    }
}

fn clean_value(value: &mut JsonValue) {
    match value {
        JsonValue::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if let Some(child) = map.get_mut(&key) {
                    clean_value(child);
                    if is_empty_container(child) {
                        map.remove(&key);
                    }
                }
            }
        }
        JsonValue::Array(array) => {
            for child in array.iter_mut() {
                clean_value(child);
            }
            while array.last().map(is_empty_container).unwrap_or(false) {
                array.pop();
            }
        }
        _ => {}
    }
}

fn is_empty_container(value: &JsonValue) -> bool {
    match value {
        JsonValue::Object(map) => map.is_empty(),
        JsonValue::Array(array) => array.is_empty() || array.iter().all(|v| v.is_null()),
        JsonValue::Null => true,
        _ => false,
    }
}

/// Order top-level fields the way the profile's element tree defines them,
/// with resourceType / id / meta leading
fn order_top_level(content: &mut Map<String, JsonValue>, sd: &StructureDefinition) {
    let root = &sd.type_field;
    let prefix = format!("{root}.");
    let mut order: Vec<String> = vec!["resourceType".into(), "id".into(), "meta".into()];
    for element in sd.snapshot_elements() {
        let Some(rest) = element.path.strip_prefix(prefix.as_str()) else {
            continue;
        };
        if rest.contains('.') {
            continue;
        }
        let name = rest.trim_end_matches("[x]").to_string();
        if !order.contains(&name) {
            order.push(name);
        }
    }

    let mut reordered = Map::new();
    for key in &order {
        // Choice elements serialize as e.g. valueQuantity; match on prefix
        let matching: Vec<String> = content
            .keys()
            .filter(|k| *k == key || k.strip_prefix(key.as_str()).map(|s| s.chars().next().map(|c| c.is_ascii_uppercase()).unwrap_or(false)).unwrap_or(false))
            .cloned()
            .collect();
        for k in matching {
            if let Some(v) = content.remove(&k) {
                reordered.insert(k, v);
            }
        }
    }
    // Anything not described by the tree keeps its insertion order at the end
    for (key, value) in std::mem::take(content) {
        reordered.insert(key, value);
    }
    *content = reordered;
}

// ============================================================================
// Required element validation
// ============================================================================

/// Recursively verify that every element with `min > 0` has at least `min`
/// occurrences wherever its parent is instantiated
fn validate_required_elements(
    sd: &StructureDefinition,
    content: &Map<String, JsonValue>,
    span: &SourceSpan,
    instance_name: &str,
    reporter: &mut Reporter,
) {
    let root = sd.type_field.clone();
    validate_required_level(sd, &root, content, span, instance_name, reporter);
}

fn validate_required_level(
    sd: &StructureDefinition,
    parent_path: &str,
    object: &Map<String, JsonValue>,
    span: &SourceSpan,
    instance_name: &str,
    reporter: &mut Reporter,
) {
    let prefix = format!("{parent_path}.");
    for element in sd.snapshot_elements() {
        let Some(rest) = element.path.strip_prefix(prefix.as_str()) else {
            continue;
        };
        if rest.contains('.') || element.slice_name.is_some() {
            continue;
        }
        let min = element.min.unwrap_or(0);
        let count = occurrence_count(object, rest, element.is_choice());
        if min > 0 && count < min as usize {
            reporter.error_at(
                "RequiredElementMissing",
                format!(
                    "{instance_name} is missing required element {} ({count} of {min})",
                    element.path
                ),
                span.clone(),
            );
        }

        // Recurse into instantiated children
        if count > 0 && !rest.ends_with("[x]") {
            match object.get(rest) {
                Some(JsonValue::Object(child)) => {
                    validate_required_level(sd, &element.path, child, span, instance_name, reporter);
                }
                Some(JsonValue::Array(entries)) => {
                    for entry in entries {
                        if let JsonValue::Object(child) = entry {
                            validate_required_level(
                                sd,
                                &element.path,
                                child,
                                span,
                                instance_name,
                                reporter,
                            );
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// Occurrences of an element in an instance object: arrays count non-null
/// entries, primitives may live under `_name`, a choice matches any
/// `nameType` key
fn occurrence_count(object: &Map<String, JsonValue>, name: &str, is_choice: bool) -> usize {
    if is_choice {
        let base = name.trim_end_matches("[x]");
        return object
            .keys()
            .filter(|k| {
                k.strip_prefix(base)
                    .and_then(|s| s.chars().next())
                    .map(|c| c.is_ascii_uppercase())
                    .unwrap_or(false)
            })
            .count();
    }

    match object.get(name) {
        Some(JsonValue::Array(entries)) => entries.iter().filter(|e| !e.is_null()).count(),
        Some(JsonValue::Null) | None => match object.get(&format!("_{name}")) {
            Some(_) => 1,
            None => 0,
        },
        Some(_) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn seg(name: &str, index: Option<usize>) -> ResolvedSegment {
        ResolvedSegment {
            name: name.to_string(),
            index,
        }
    }

    #[test]
    fn test_set_value_nested_arrays() {
        let mut content = Map::new();
        set_value_at(
            &mut content,
            &[seg("maritalStatus", None), seg("coding", Some(0)), seg("version", None)],
            json!("1.2.3"),
        );
        assert_eq!(
            JsonValue::Object(content),
            json!({"maritalStatus": {"coding": [{"version": "1.2.3"}]}})
        );
    }

    #[test]
    fn test_merge_missing_preserves_explicit() {
        let mut content = Map::new();
        set_value_at(
            &mut content,
            &[seg("coding", Some(0)), seg("version", None)],
            json!("1.2.3"),
        );
        merge_missing_at(
            &mut content,
            &[seg("coding", Some(0))],
            json!({"code": "foo", "version": "9"}),
        );
        assert_eq!(
            JsonValue::Object(content),
            json!({"coding": [{"version": "1.2.3", "code": "foo"}]})
        );
    }

    #[test]
    fn test_clean_instance_drops_empty() {
        let mut content = Map::new();
        content.insert("a".into(), json!({}));
        content.insert("b".into(), json!([null, null]));
        content.insert("c".into(), json!({"x": 1}));
        clean_instance(&mut content);
        assert!(!content.contains_key("a"));
        assert!(!content.contains_key("b"));
        assert!(content.contains_key("c"));
    }

    #[test]
    fn test_occurrence_count() {
        let object = serde_json::from_value::<Map<String, JsonValue>>(json!({
            "name": [{"family": "x"}, null],
            "_birthDate": {"extension": []},
            "valueQuantity": {"value": 1}
        }))
        .unwrap();
        assert_eq!(occurrence_count(&object, "name", false), 1);
        assert_eq!(occurrence_count(&object, "birthDate", false), 1);
        assert_eq!(occurrence_count(&object, "value[x]", true), 1);
        assert_eq!(occurrence_count(&object, "gender", false), 0);
    }

    #[test]
    fn test_union_with_pattern() {
        let assignment = json!({"coding": [{"code": "b", "version": "1"}]});
        let pattern = json!({"coding": [{"code": "a", "system": "s"}]});
        let union = union_with_pattern(assignment, &pattern);
        assert_eq!(
            union,
            json!({"coding": [{"code": "a", "version": "1", "system": "s"}]})
        );
    }
}

//! StructureDefinition exporter
//!
//! Compiles a Profile or Extension into a derived StructureDefinition: the
//! parent's snapshot is cloned as the starting element tree, constraint
//! rules are applied in source order, and a differential is computed from
//! the nodes the rules actually mutated.

use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use tracing::{debug, trace};

use crate::ast::{
    BindingRule, CardRule, CaretRule, ContainsRule, ElementFlag, Extension, FixedValueRule,
    FlagRule, OnlyRule, Profile, Rule,
};
use crate::config::ProjectConfiguration;
use crate::diagnostics::{Reporter, SourceSpan};
use crate::export::differential::compute_differential;
use crate::export::fhir_types::{
    ElementDefinition, ElementSlicing, ElementType, SlicingDiscriminator, StructureDefinition,
};
use crate::export::values::{value_for_type, value_to_plain_json};
use crate::export::{expand_rules, ExpandedRule, ExportError};
use crate::semantic::fishing::{FishKind, Fishable, FishingContext};
use crate::semantic::path::{match_choice_type, parse_path, PathError};

/// Source entity view shared by profiles and extensions
pub enum SdSource<'a> {
    Profile(&'a Profile),
    Extension(&'a Extension),
}

impl<'a> SdSource<'a> {
    fn name(&self) -> &str {
        match self {
            SdSource::Profile(p) => &p.name,
            SdSource::Extension(x) => &x.name,
        }
    }

    fn id(&self) -> Option<&str> {
        match self {
            SdSource::Profile(p) => p.id.as_deref(),
            SdSource::Extension(x) => x.id.as_deref(),
        }
    }

    fn parent(&self) -> Option<&str> {
        match self {
            SdSource::Profile(p) => p.parent.as_deref(),
            SdSource::Extension(x) => x.parent.as_deref(),
        }
    }

    fn title(&self) -> Option<&str> {
        match self {
            SdSource::Profile(p) => p.title.as_deref(),
            SdSource::Extension(x) => x.title.as_deref(),
        }
    }

    fn description(&self) -> Option<&str> {
        match self {
            SdSource::Profile(p) => p.description.as_deref(),
            SdSource::Extension(x) => x.description.as_deref(),
        }
    }

    fn rules(&self) -> &[Rule] {
        match self {
            SdSource::Profile(p) => &p.rules,
            SdSource::Extension(x) => &x.rules,
        }
    }

    fn span(&self) -> &SourceSpan {
        match self {
            SdSource::Profile(p) => &p.span,
            SdSource::Extension(x) => &x.span,
        }
    }

    fn is_extension(&self) -> bool {
        matches!(self, SdSource::Extension(_))
    }
}

/// Export one Profile or Extension to a StructureDefinition
pub fn export_structure_definition(
    source: SdSource<'_>,
    fisher: &FishingContext<'_>,
    config: &ProjectConfiguration,
    reporter: &mut Reporter,
) -> Result<StructureDefinition, ExportError> {
    let name = source.name().to_string();
    debug!("exporting StructureDefinition for {}", name);

    let parent_name = match source.parent() {
        Some(parent) => parent.to_string(),
        None if source.is_extension() => "Extension".to_string(),
        None => {
            return Err(ExportError::ParentNotDefined {
                parent: "(none declared)".to_string(),
                entity: name,
            })
        }
    };

    let parent_json = fisher
        .fish(
            &parent_name,
            &[
                FishKind::Profile,
                FishKind::Extension,
                FishKind::Resource,
                FishKind::Type,
            ],
        )
        .ok_or_else(|| ExportError::ParentNotDefined {
            parent: parent_name.clone(),
            entity: name.clone(),
        })?;

    let parent = StructureDefinition::from_json(&parent_json).map_err(|err| {
        ExportError::InvalidParent {
            parent: parent_name.clone(),
            reason: err.to_string(),
        }
    })?;
    if parent.snapshot.as_ref().map(|s| s.element.is_empty()).unwrap_or(true) {
        return Err(ExportError::MissingSnapshot {
            definition: parent_name.clone(),
        });
    }

    // Clone the parent as the starting tree and rewrite identity metadata
    let mut sd = parent.clone();
    let id = source.id().map(String::from).unwrap_or_else(|| name.clone());
    sd.url = config.canonical_for("StructureDefinition", &id);
    sd.id = Some(id);
    sd.name = name.clone();
    sd.title = source.title().map(String::from);
    sd.base_definition = Some(parent.url.clone());
    sd.derivation = Some("constraint".to_string());
    sd.status = config.status_or_default().to_string();
    sd.version = config.version.clone();
    sd.publisher = config.publisher.clone();
    sd.date = None;
    if let Some(description) = source.description() {
        sd.description = Some(description.to_string());
    }
    if config.fhir_version.is_some() {
        sd.fhir_version = config.fhir_version.clone();
    }
    // Publication bookkeeping of the parent does not carry over
    sd.other.remove("text");
    sd.other.remove("extension");
    sd.other.remove("meta");
    sd.differential = None;
    // An extension parent's context is preserved as-is (sd.context cloned)

    let baseline = sd.clone();
    let mut touched: BTreeSet<String> = BTreeSet::new();

    let expanded = expand_rules(source.rules(), fisher.tank(), &name, Rule::is_constraint, reporter);

    for ExpandedRule { rule, applied_span } in &expanded {
        apply_rule(
            &mut sd,
            rule,
            applied_span.as_ref(),
            fisher,
            &mut touched,
            reporter,
        );
    }

    sd.differential = Some(compute_differential(&sd, &baseline, &touched));
    trace!(
        "{}: {} touched elements, {} differential entries",
        name,
        touched.len(),
        sd.differential.as_ref().map(|d| d.element.len()).unwrap_or(0)
    );
    Ok(sd)
}

fn apply_rule(
    sd: &mut StructureDefinition,
    rule: &Rule,
    applied_span: Option<&SourceSpan>,
    fisher: &FishingContext<'_>,
    touched: &mut BTreeSet<String>,
    reporter: &mut Reporter,
) {
    let result = match rule {
        Rule::Card(card) => apply_card_rule(sd, card, fisher, touched),
        Rule::Flag(flag) => apply_flag_rule(sd, flag, fisher, touched),
        Rule::Binding(binding) => apply_binding_rule(sd, binding, fisher, touched),
        Rule::Only(only) => apply_only_rule(sd, only, fisher, touched),
        Rule::Contains(contains) => apply_contains_rule(sd, contains, fisher, touched),
        Rule::Caret(caret) => apply_caret_rule(sd, caret, fisher, touched),
        Rule::Fixed(fixed) => apply_fixed_rule(sd, fixed, fisher, touched),
        // Inserts were expanded, everything else was filtered
        _ => Ok(()),
    };

    if let Err((code, message)) = result {
        let mut diagnostic =
            crate::diagnostics::Diagnostic::new(crate::diagnostics::Severity::Error, message)
                .with_code(code)
                .with_span(rule.span().clone());
        if let Some(applied) = applied_span {
            diagnostic = diagnostic.with_applied_span(applied.clone());
        }
        reporter.report(diagnostic);
    }
}

type RuleOutcome = Result<(), (&'static str, String)>;

// ============================================================================
// Element resolution
// ============================================================================

/// Resolve a rule path to exactly one element node, creating choice-suffix
/// and slice elements lazily as required
pub(crate) fn resolve_element(
    sd: &mut StructureDefinition,
    path: &str,
    fisher: &FishingContext<'_>,
    touched: &mut BTreeSet<String>,
) -> Result<usize, (&'static str, String)> {
    let segments = parse_path(path)
        .map_err(|err| ("CannotResolvePath", err.to_string()))?;

    let root_id = sd.type_field.clone();
    let mut index = sd
        .position_of_id(&root_id)
        .ok_or_else(|| ("CannotResolvePath", format!("snapshot has no root {root_id}")))?;

    for segment in &segments {
        let mut unfolded = false;
        loop {
            let current_id = sd.snapshot_elements()[index].id().to_string();

            // (a) direct child
            let child_id = format!("{current_id}.{}", segment.base);
            if let Some(i) = sd.position_of_id(&child_id) {
                index = i;
                break;
            }

            // (b) choice elements: either addressed as `x[x]` or by a
            // type-specialized name like `valueQuantity`
            if segment.is_choice() {
                let choice_id = format!("{current_id}.{}[x]", segment.base);
                if let Some(i) = sd.position_of_id(&choice_id) {
                    index = i;
                    break;
                }
            }
            if let Some(i) = resolve_choice_specialization(sd, &current_id, &segment.base, touched)
            {
                index = i;
                break;
            }

            // (d) unfold children from the element's type, once
            if !unfolded && unfold_children(sd, index, fisher) {
                unfolded = true;
                continue;
            }

            return Err((
                "CannotResolvePath",
                PathError::CannotResolve {
                    path: path.to_string(),
                    base: sd.type_field.clone(),
                }
                .to_string(),
            ));
        }

        if let Some(slice) = segment.slice_name() {
            let slice_id = format!("{}:{slice}", sd.snapshot_elements()[index].id());
            index = sd.position_of_id(&slice_id).ok_or_else(|| {
                (
                    "CannotResolvePath",
                    format!("slice '{slice}' is not defined on {}", segment.base),
                )
            })?;
        }
    }

    Ok(index)
}

/// Match `valueQuantity`-style names against a choice child of `current_id`.
/// A choice already narrowed to a single type collapses onto itself; an open
/// choice materializes a type slice.
fn resolve_choice_specialization(
    sd: &mut StructureDefinition,
    current_id: &str,
    segment_base: &str,
    touched: &mut BTreeSet<String>,
) -> Option<usize> {
    let prefix = format!("{current_id}.");
    let candidate = sd.snapshot_elements().iter().enumerate().find_map(|(i, e)| {
        let id = e.id();
        if !id.starts_with(&prefix) || !id.ends_with("[x]") || e.slice_name.is_some() {
            return None;
        }
        let local = &id[prefix.len()..];
        if local.contains('.') || local.contains(':') {
            return None;
        }
        let choice_base = local.strip_suffix("[x]")?;
        let code = match_choice_type(segment_base, choice_base, e.type_codes().into_iter())?;
        Some((i, code))
    });

    let (choice_index, code) = candidate?;
    let choice = &sd.snapshot_elements()[choice_index];

    if choice.single_type().is_some() {
        // Narrowed to one type: the specialized name addresses the choice
        // element itself
        return Some(choice_index);
    }

    // Materialize a type-specialized view as a slice of the choice
    let slice_id = format!("{}:{segment_base}", choice.id());
    if let Some(existing) = sd.position_of_id(&slice_id) {
        return Some(existing);
    }

    let mut specialized = ElementDefinition::new(choice.path.clone());
    specialized.id = Some(slice_id.clone());
    specialized.slice_name = Some(segment_base.to_string());
    specialized.min = choice.min;
    specialized.max = choice.max.clone();
    specialized.base = choice.base.clone();
    specialized.types = Some(vec![ElementType::new(code)]);

    let insert_at = sd.insertion_point_after(choice_index);
    sd.snapshot_elements_mut().insert(insert_at, specialized);
    touched.insert(slice_id);
    Some(insert_at)
}

/// Pull the children of the element's single type into the snapshot so a
/// deeper path can resolve. Returns false when there is nothing to unfold.
fn unfold_children(
    sd: &mut StructureDefinition,
    index: usize,
    fisher: &FishingContext<'_>,
) -> bool {
    let (current_id, current_path, type_code) = {
        let element = &sd.snapshot_elements()[index];
        let Some(single) = element.single_type() else {
            return false;
        };
        (
            element.id().to_string(),
            element.path.clone(),
            single.code.clone(),
        )
    };

    // Already has children?
    let child_prefix = format!("{current_id}.");
    if sd
        .snapshot_elements()
        .iter()
        .any(|e| e.id().starts_with(&child_prefix))
    {
        return false;
    }

    let Some(type_json) = fisher.fish(
        &type_code,
        &[FishKind::Type, FishKind::Resource, FishKind::Profile],
    ) else {
        return false;
    };
    let Ok(type_sd) = StructureDefinition::from_json(&type_json) else {
        return false;
    };

    let type_root = type_sd.type_field.clone();
    let mut unfolded: Vec<ElementDefinition> = Vec::new();
    for element in type_sd.snapshot_elements() {
        let Some(suffix) = element.path.strip_prefix(type_root.as_str()) else {
            continue;
        };
        if suffix.is_empty() {
            continue;
        }
        let mut child = element.clone();
        child.path = format!("{current_path}{suffix}");
        let id_suffix = element
            .id()
            .strip_prefix(type_root.as_str())
            .unwrap_or(suffix)
            .to_string();
        child.id = Some(format!("{current_id}{id_suffix}"));
        unfolded.push(child);
    }
    if unfolded.is_empty() {
        return false;
    }

    trace!("unfolded {} children of {} from {}", unfolded.len(), current_id, type_code);
    let insert_at = index + 1;
    for (offset, child) in unfolded.into_iter().enumerate() {
        sd.snapshot_elements_mut().insert(insert_at + offset, child);
    }
    true
}

// ============================================================================
// Rule application
// ============================================================================

fn apply_card_rule(
    sd: &mut StructureDefinition,
    rule: &CardRule,
    fisher: &FishingContext<'_>,
    touched: &mut BTreeSet<String>,
) -> RuleOutcome {
    if let crate::ast::CardMax::Count(max) = rule.max {
        if rule.min > max {
            return Err((
                "InvalidCardinality",
                format!("cardinality {}..{} has min above max", rule.min, max),
            ));
        }
    }

    let index = resolve_element(sd, &rule.path, fisher, touched)?;
    let element = &mut sd.snapshot_elements_mut()[index];

    let old_min = element.min.unwrap_or(0);
    let old_max = element
        .max
        .as_deref()
        .and_then(crate::ast::CardMax::parse)
        .unwrap_or(crate::ast::CardMax::Star);

    if rule.min < old_min || !rule.max.within(&old_max) {
        return Err((
            "WideningCardinality",
            format!(
                "cannot widen {} from {}..{} to {}..{}",
                rule.path, old_min, old_max, rule.min, rule.max
            ),
        ));
    }

    element.min = Some(rule.min);
    element.max = Some(rule.max.to_string());
    let id = element.id().to_string();
    touched.insert(id);

    set_flags(sd, index, &rule.flags, touched);
    Ok(())
}

fn apply_flag_rule(
    sd: &mut StructureDefinition,
    rule: &FlagRule,
    fisher: &FishingContext<'_>,
    touched: &mut BTreeSet<String>,
) -> RuleOutcome {
    for path in &rule.paths {
        let index = resolve_element(sd, path, fisher, touched)?;
        set_flags(sd, index, &rule.flags, touched);
    }
    Ok(())
}

/// OR-in flags; flags are never cleared by a flag rule
fn set_flags(
    sd: &mut StructureDefinition,
    index: usize,
    flags: &[ElementFlag],
    touched: &mut BTreeSet<String>,
) {
    if flags.is_empty() {
        return;
    }
    let element = &mut sd.snapshot_elements_mut()[index];
    for flag in flags {
        match flag {
            ElementFlag::MustSupport => element.must_support = Some(true),
            ElementFlag::Summary => element.is_summary = Some(true),
            ElementFlag::Modifier => element.is_modifier = Some(true),
        }
    }
    let id = element.id().to_string();
    touched.insert(id);
}

const CODEABLE_TYPES: &[&str] = &["code", "Coding", "CodeableConcept", "Quantity"];

fn apply_binding_rule(
    sd: &mut StructureDefinition,
    rule: &BindingRule,
    fisher: &FishingContext<'_>,
    touched: &mut BTreeSet<String>,
) -> RuleOutcome {
    let index = resolve_element(sd, &rule.path, fisher, touched)?;

    let value_set_url = if rule.value_set.contains("://") || rule.value_set.starts_with("urn:") {
        rule.value_set.clone()
    } else {
        fisher
            .fish_metadata(&rule.value_set, &[FishKind::ValueSet])
            .and_then(|meta| meta.url)
            .ok_or_else(|| {
                (
                    "CannotResolveCanonical",
                    format!("cannot resolve value set '{}'", rule.value_set),
                )
            })?
    };

    let element = &mut sd.snapshot_elements_mut()[index];
    let codes = element.type_codes();
    let codeable = codes.iter().any(|c| CODEABLE_TYPES.contains(c))
        || (codes.contains(&"string") && element.binding.is_none());
    if !codeable {
        return Err((
            "CodedTypeNotFound",
            format!("{} has no codeable type to bind", rule.path),
        ));
    }

    if let Some(binding) = &element.binding {
        if rule.strength < binding.strength {
            return Err((
                "BindingStrength",
                format!(
                    "cannot weaken binding on {} from {} to {}",
                    rule.path,
                    binding.strength.as_str(),
                    rule.strength.as_str()
                ),
            ));
        }
    }

    let description = element.binding.as_ref().and_then(|b| b.description.clone());
    element.binding = Some(crate::export::fhir_types::ElementBinding {
        strength: rule.strength,
        description,
        value_set: Some(value_set_url),
    });
    let id = element.id().to_string();
    touched.insert(id);
    Ok(())
}

fn apply_only_rule(
    sd: &mut StructureDefinition,
    rule: &OnlyRule,
    fisher: &FishingContext<'_>,
    touched: &mut BTreeSet<String>,
) -> RuleOutcome {
    let index = resolve_element(sd, &rule.path, fisher, touched)?;
    let old_types = sd.snapshot_elements()[index]
        .types
        .clone()
        .unwrap_or_default();
    let old_codes: Vec<String> = old_types.iter().map(|t| t.code.clone()).collect();

    let plain: Vec<&crate::ast::OnlyRuleType> =
        rule.types.iter().filter(|t| !t.is_reference).collect();
    let references: Vec<&crate::ast::OnlyRuleType> =
        rule.types.iter().filter(|t| t.is_reference).collect();

    let mut new_types: Vec<ElementType> = Vec::new();

    for only in &plain {
        if old_codes.iter().any(|c| c == &only.name) {
            new_types.push(ElementType::new(only.name.clone()));
            continue;
        }
        // A profile of one of the existing types
        let meta = fisher
            .fish_metadata(
                &only.name,
                &[FishKind::Profile, FishKind::Type, FishKind::Resource],
            )
            .ok_or_else(|| {
                (
                    "TypeNotFound",
                    format!("type '{}' in only rule on {} not found", only.name, rule.path),
                )
            })?;
        let sd_type = meta.sd_type.clone().unwrap_or_else(|| meta.name.clone());
        if !old_codes.iter().any(|c| c == &sd_type) {
            return Err((
                "MismatchedType",
                format!(
                    "'{}' (type {}) is not among the existing types of {}",
                    only.name, sd_type, rule.path
                ),
            ));
        }
        let mut narrowed = ElementType::new(sd_type);
        if let Some(url) = meta.url {
            narrowed.profile = Some(vec![url]);
        }
        new_types.push(narrowed);
    }

    if !references.is_empty() {
        let reference_type = old_types.iter().find(|t| t.code == "Reference");
        let Some(reference_type) = reference_type else {
            return Err((
                "MismatchedType",
                format!("{} has no Reference type to narrow", rule.path),
            ));
        };
        let old_targets = reference_type.target_profile.clone().unwrap_or_default();

        let mut narrowed: Vec<String> = Vec::new();
        let mut matched_old: BTreeSet<String> = BTreeSet::new();
        for target in &references {
            let meta = fisher.fish_metadata(
                &target.name,
                &[FishKind::Profile, FishKind::Resource, FishKind::Extension],
            );
            let url = meta
                .as_ref()
                .and_then(|m| m.url.clone())
                .unwrap_or_else(|| target.name.clone());

            if old_targets.is_empty() {
                // Unconstrained Reference accepts any target
                narrowed.push(url);
                continue;
            }
            if old_targets.contains(&url) {
                // Identical target: untouched, keeps its old position
                matched_old.insert(url);
                continue;
            }
            // A profile narrowing one of the old targets
            let narrows = meta
                .as_ref()
                .and_then(|m| m.parent.as_ref())
                .map(|parent| {
                    old_targets
                        .iter()
                        .any(|t| t == parent || t.ends_with(&format!("/{parent}")))
                })
                .unwrap_or(false)
                || meta
                    .as_ref()
                    .and_then(|m| m.sd_type.as_ref())
                    .map(|sd_type| old_targets.iter().any(|t| t.ends_with(&format!("/{sd_type}"))))
                    .unwrap_or(false);
            if narrows {
                narrowed.push(url);
            } else {
                return Err((
                    "MismatchedType",
                    format!(
                        "Reference({}) is not a subset of the targets of {}",
                        target.name, rule.path
                    ),
                ));
            }
        }

        // Narrowed targets first, then identically-matched old targets in
        // their original order
        let mut targets = narrowed;
        for old in &old_targets {
            if matched_old.contains(old) {
                targets.push(old.clone());
            }
        }
        if targets.is_empty() {
            return Err((
                "MismatchedType",
                format!("only rule on {} empties the Reference targets", rule.path),
            ));
        }

        let mut new_reference = reference_type.clone();
        new_reference.target_profile = Some(targets);
        new_types.push(new_reference);
    }

    if new_types.is_empty() {
        return Err((
            "MismatchedType",
            format!("only rule on {} produces no types", rule.path),
        ));
    }

    let element = &mut sd.snapshot_elements_mut()[index];
    element.types = Some(new_types);
    let id = element.id().to_string();
    touched.insert(id);
    Ok(())
}

fn apply_contains_rule(
    sd: &mut StructureDefinition,
    rule: &ContainsRule,
    fisher: &FishingContext<'_>,
    touched: &mut BTreeSet<String>,
) -> RuleOutcome {
    let index = resolve_element(sd, &rule.path, fisher, touched)?;

    if !sd.snapshot_elements()[index].is_array() {
        return Err((
            "SlicingDefinitionError",
            format!("{} does not repeat and cannot be sliced", rule.path),
        ));
    }

    let is_extension_array = sd.snapshot_elements()[index]
        .type_codes()
        .contains(&"Extension");

    // Install a default value discriminator when none exists
    {
        let element = &mut sd.snapshot_elements_mut()[index];
        if element.slicing.is_none() {
            element.slicing = Some(ElementSlicing {
                discriminator: vec![SlicingDiscriminator {
                    type_field: "value".to_string(),
                    path: if is_extension_array { "url" } else { "$this" }.to_string(),
                }],
                description: None,
                ordered: Some(false),
                rules: "open".to_string(),
            });
        }
        let id = element.id().to_string();
        touched.insert(id);
    }

    let array_id = sd.snapshot_elements()[index].id().to_string();
    let array_path = sd.snapshot_elements()[index].path.clone();
    let array_min = sd.snapshot_elements()[index].min.unwrap_or(0);
    let array_max = sd.snapshot_elements()[index]
        .max
        .clone()
        .unwrap_or_else(|| "*".to_string());
    let array_max_card = crate::ast::CardMax::parse(&array_max).unwrap_or(crate::ast::CardMax::Star);

    for item in &rule.items {
        let slice_id = format!("{array_id}:{}", item.name);
        if sd.position_of_id(&slice_id).is_some() {
            return Err((
                "SlicingDefinitionError",
                format!("slice '{}' already exists on {}", item.name, rule.path),
            ));
        }

        let mut slice = ElementDefinition::new(array_path.clone());
        slice.id = Some(slice_id.clone());
        slice.slice_name = Some(item.name.clone());
        slice.min = Some(item.min.unwrap_or(0));
        slice.max = Some(
            item.max
                .map(|m| m.to_string())
                .unwrap_or_else(|| array_max.clone()),
        );
        slice.base = sd.snapshot_elements()[index].base.clone();

        if let Some(max) = item.max {
            if !max.within(&array_max_card) {
                return Err((
                    "InvalidMaxOfSlice",
                    format!(
                        "slice '{}' max {} exceeds the max {} of {}",
                        item.name, max, array_max, rule.path
                    ),
                ));
            }
        }

        if let Some(type_name) = &item.type_name {
            let meta = fisher
                .fish_metadata(
                    type_name,
                    &[FishKind::Extension, FishKind::Profile, FishKind::Type],
                )
                .ok_or_else(|| {
                    (
                        "TypeNotFound",
                        format!("contains item type '{type_name}' not found"),
                    )
                })?;
            let code = if is_extension_array {
                "Extension".to_string()
            } else {
                meta.sd_type.clone().unwrap_or_else(|| meta.name.clone())
            };
            let mut slice_type = ElementType::new(code);
            if let Some(url) = meta.url {
                slice_type.profile = Some(vec![url]);
            }
            slice.types = Some(vec![slice_type]);
        } else if is_extension_array {
            slice.types = Some(vec![ElementType::new("Extension")]);
        } else {
            slice.types = sd.snapshot_elements()[index].types.clone();
        }

        for flag in &item.flags {
            match flag {
                ElementFlag::MustSupport => slice.must_support = Some(true),
                ElementFlag::Summary => slice.is_summary = Some(true),
                ElementFlag::Modifier => slice.is_modifier = Some(true),
            }
        }

        let insert_at = sd.insertion_point_after(index);
        sd.snapshot_elements_mut().insert(insert_at, slice);
        touched.insert(slice_id);
    }

    // The sum of slice minimums cannot exceed the array max
    let slice_min_sum: u32 = sd
        .snapshot_elements()
        .iter()
        .filter(|e| e.path == array_path && e.slice_name.is_some())
        .map(|e| e.min.unwrap_or(0))
        .sum();
    if let crate::ast::CardMax::Count(max) = array_max_card {
        if slice_min_sum > max.max(array_min) {
            return Err((
                "InvalidSumOfSliceMins",
                format!(
                    "slice minimums on {} sum to {} which exceeds max {}",
                    rule.path, slice_min_sum, max
                ),
            ));
        }
    }

    Ok(())
}

fn apply_caret_rule(
    sd: &mut StructureDefinition,
    rule: &CaretRule,
    fisher: &FishingContext<'_>,
    touched: &mut BTreeSet<String>,
) -> RuleOutcome {
    let value = value_to_plain_json(&rule.value);

    if rule.path.is_empty() {
        return set_sd_field(sd, &rule.caret_path, value);
    }

    let index = resolve_element(sd, &rule.path, fisher, touched)?;
    set_element_field(sd, index, &rule.caret_path, value, touched)
}

/// Entity-level caret: `* ^status = #active`
fn set_sd_field(
    sd: &mut StructureDefinition,
    caret_path: &str,
    value: JsonValue,
) -> RuleOutcome {
    match caret_path {
        "url" => {
            return Err((
                "InvalidUri",
                "the canonical url of a definition cannot be reassigned".to_string(),
            ))
        }
        "version" => sd.version = value.as_str().map(String::from),
        "status" => {
            if let Some(status) = value.as_str() {
                sd.status = status.to_string();
            }
        }
        "title" => sd.title = value.as_str().map(String::from),
        "description" => sd.description = value.as_str().map(String::from),
        "publisher" => sd.publisher = value.as_str().map(String::from),
        "date" => sd.date = value.as_str().map(String::from),
        "abstract" => sd.is_abstract = value.as_bool().unwrap_or(sd.is_abstract),
        _ => set_nested_json(&mut sd.other, caret_path, value),
    }
    Ok(())
}

/// Element-level caret: sets a field on the element definition itself
fn set_element_field(
    sd: &mut StructureDefinition,
    index: usize,
    caret_path: &str,
    value: JsonValue,
    touched: &mut BTreeSet<String>,
) -> RuleOutcome {
    let element = &mut sd.snapshot_elements_mut()[index];
    let id = element.id().to_string();

    match caret_path {
        "short" => element.short = value.as_str().map(String::from),
        "definition" => element.definition = value.as_str().map(String::from),
        "comment" => element.comment = value.as_str().map(String::from),
        "mustSupport" => {
            if value.as_bool() == Some(false) && element.must_support == Some(true) {
                return Err((
                    "CannotClearFlag",
                    format!("mustSupport on {id} cannot be cleared once set"),
                ));
            }
            element.must_support = value.as_bool();
        }
        "isModifier" => {
            if value.as_bool() == Some(false) && element.is_modifier == Some(true) {
                return Err((
                    "CannotClearFlag",
                    format!("isModifier on {id} cannot be cleared once set"),
                ));
            }
            element.is_modifier = value.as_bool();
        }
        "isSummary" => element.is_summary = value.as_bool(),
        "binding.strength" => {
            if let Some(strength) = value
                .as_str()
                .and_then(crate::ast::BindingStrength::parse)
            {
                if let Some(binding) = &mut element.binding {
                    binding.strength = strength;
                }
            }
        }
        "binding.description" => {
            if let Some(binding) = &mut element.binding {
                binding.description = value.as_str().map(String::from);
            }
        }
        "slicing.rules" => {
            let slicing = element.slicing.get_or_insert_with(default_slicing);
            if let Some(rules) = value.as_str() {
                rules.clone_into(&mut slicing.rules);
            }
        }
        "slicing.ordered" => {
            let slicing = element.slicing.get_or_insert_with(default_slicing);
            slicing.ordered = value.as_bool();
        }
        "slicing.description" => {
            let slicing = element.slicing.get_or_insert_with(default_slicing);
            slicing.description = value.as_str().map(String::from);
        }
        "slicing.discriminator.type" => {
            let slicing = element.slicing.get_or_insert_with(default_slicing);
            if slicing.discriminator.is_empty() {
                slicing.discriminator.push(SlicingDiscriminator {
                    type_field: String::new(),
                    path: "$this".to_string(),
                });
            }
            if let Some(t) = value.as_str() {
                t.clone_into(&mut slicing.discriminator[0].type_field);
            }
        }
        "slicing.discriminator.path" => {
            let slicing = element.slicing.get_or_insert_with(default_slicing);
            if slicing.discriminator.is_empty() {
                slicing.discriminator.push(SlicingDiscriminator {
                    type_field: "value".to_string(),
                    path: String::new(),
                });
            }
            if let Some(p) = value.as_str() {
                p.clone_into(&mut slicing.discriminator[0].path);
            }
        }
        _ => set_nested_json(&mut element.other, caret_path, value),
    }

    touched.insert(id);
    Ok(())
}

fn default_slicing() -> ElementSlicing {
    ElementSlicing {
        discriminator: Vec::new(),
        description: None,
        ordered: None,
        rules: "open".to_string(),
    }
}

/// Write a dotted caret path into a JSON field map, creating intermediate
/// objects as needed
fn set_nested_json(
    map: &mut std::collections::BTreeMap<String, JsonValue>,
    dotted: &str,
    value: JsonValue,
) {
    let mut parts = dotted.split('.');
    let first = parts.next().unwrap_or(dotted).to_string();
    let rest: Vec<&str> = parts.collect();

    if rest.is_empty() {
        map.insert(first, value);
        return;
    }

    let slot = map.entry(first).or_insert_with(|| JsonValue::Object(Default::default()));
    let mut cursor = slot;
    for (i, part) in rest.iter().enumerate() {
        if !cursor.is_object() {
            *cursor = JsonValue::Object(Default::default());
        }
        let object = cursor.as_object_mut().unwrap();
        if i == rest.len() - 1 {
            object.insert(part.to_string(), value);
            return;
        }
        cursor = object
            .entry(part.to_string())
            .or_insert_with(|| JsonValue::Object(Default::default()));
    }
}

fn apply_fixed_rule(
    sd: &mut StructureDefinition,
    rule: &FixedValueRule,
    fisher: &FishingContext<'_>,
    touched: &mut BTreeSet<String>,
) -> RuleOutcome {
    let index = resolve_element(sd, &rule.path, fisher, touched)?;

    let type_code = {
        let element = &sd.snapshot_elements()[index];
        match element.types.as_deref() {
            Some([only]) => only.code.clone(),
            Some([]) | None => {
                return Err((
                    "NoSingleType",
                    format!("{} has no type to fix a value against", rule.path),
                ))
            }
            Some(_) => {
                return Err((
                    "NoSingleType",
                    format!(
                        "{} has multiple types; narrow with an only rule first",
                        rule.path
                    ),
                ))
            }
        }
    };

    let json_value = value_for_type(&rule.value, &type_code)
        .map_err(|reason| ("MismatchedType", reason))?;

    let element = &mut sd.snapshot_elements_mut()[index];
    let suffix = crate::semantic::path::type_suffix(&type_code);
    let new_key = if rule.exactly {
        format!("fixed{suffix}")
    } else {
        format!("pattern{suffix}")
    };

    if let Some((old_key, old_value)) = element.fixed_value() {
        if old_value != &json_value {
            return Err((
                "ValueAlreadyFixed",
                format!(
                    "{} already has {} = {}; it cannot be reassigned",
                    rule.path, old_key, old_value
                ),
            ));
        }
        if !rule.exactly {
            return Err((
                "FixedToPattern",
                format!(
                    "{} is fixed and cannot be relaxed to a pattern",
                    rule.path
                ),
            ));
        }
        return Ok(());
    }

    if let Some((_, old_value)) = element.pattern_value() {
        let compatible = old_value == &json_value || json_is_superset(&json_value, old_value);
        if !compatible {
            return Err((
                "ValueAlreadyFixed",
                format!(
                    "{} already has a pattern {}; the new value does not include it",
                    rule.path, old_value
                ),
            ));
        }
    }

    element.clear_assigned_value();
    element.other.insert(new_key, json_value);
    let id = element.id().to_string();
    touched.insert(id);
    Ok(())
}

/// True when `candidate` contains every key/value of `base`, recursively
pub(crate) fn json_is_superset(candidate: &JsonValue, base: &JsonValue) -> bool {
    match (candidate, base) {
        (JsonValue::Object(c), JsonValue::Object(b)) => b
            .iter()
            .all(|(k, v)| c.get(k).map(|cv| json_is_superset(cv, v)).unwrap_or(false)),
        (JsonValue::Array(c), JsonValue::Array(b)) => b
            .iter()
            .all(|bv| c.iter().any(|cv| json_is_superset(cv, bv))),
        _ => candidate == base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_nested_json() {
        let mut map = std::collections::BTreeMap::new();
        set_nested_json(
            &mut map,
            "extension.valueString",
            json!("x"),
        );
        assert_eq!(map["extension"]["valueString"], json!("x"));

        set_nested_json(&mut map, "top", json!(1));
        assert_eq!(map["top"], json!(1));
    }

    #[test]
    fn test_json_is_superset() {
        let base = json!({"coding": [{"code": "a"}]});
        let superset = json!({"coding": [{"code": "a", "system": "s"}], "text": "t"});
        let conflicting = json!({"coding": [{"code": "b"}]});
        assert!(json_is_superset(&superset, &base));
        assert!(!json_is_superset(&conflicting, &base));
        assert!(json_is_superset(&base, &base));
    }
}

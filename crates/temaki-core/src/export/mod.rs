//! Export pipeline
//!
//! Exporters turn Tank entities into FHIR artifacts. The [`Compiler`] drives
//! them in dependency order: code systems, value sets, StructureDefinitions
//! (parents before children), then instances (referents before referrers).
//! A fatal error in one entity skips that entity and compilation continues.

pub mod codesystem_exporter;
pub mod differential;
pub mod fhir_types;
pub mod ig_ini;
pub mod instance_exporter;
pub mod package;
pub mod sd_exporter;
pub mod valueset_exporter;
pub mod values;

pub use ig_ini::emit_ig_ini;
pub use package::Package;
pub use sd_exporter::SdSource;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::ast::{Entity, FshValue, Rule};
use crate::canonical::DefinitionsCache;
use crate::config::ProjectConfiguration;
use crate::diagnostics::{Diagnostic, Reporter, Severity, SourceSpan};
use crate::error::TemakiError;
use crate::import::{FshImporter, RawSource};
use crate::semantic::fishing::{FishKind, FishingContext};
use crate::semantic::Tank;

/// Entity-fatal export errors; rule-level problems go to the reporter and
/// skip only the offending rule
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Parent not defined: {parent} (required by {entity})")]
    ParentNotDefined { parent: String, entity: String },

    #[error("Definition of {parent} is unusable: {reason}")]
    InvalidParent { parent: String, reason: String },

    #[error("Definition {definition} has no snapshot to derive from")]
    MissingSnapshot { definition: String },

    #[error("InstanceOf not defined: {instance_of} (required by {instance})")]
    InstanceOfNotDefined {
        instance_of: String,
        instance: String,
    },
}

impl ExportError {
    pub fn code(&self) -> &'static str {
        match self {
            ExportError::ParentNotDefined { .. } => "ParentNotDefined",
            ExportError::InvalidParent { .. } => "ParentNotDefined",
            ExportError::MissingSnapshot { .. } => "MissingSnapshot",
            ExportError::InstanceOfNotDefined { .. } => "InstanceOfNotDefined",
        }
    }
}

/// One rule after RuleSet expansion, carrying the application site when it
/// came in through an insert or mixin
pub struct ExpandedRule {
    pub rule: Rule,
    pub applied_span: Option<SourceSpan>,
}

/// Expand insert rules recursively, guarding against cycles, and filter to
/// the rule kinds the consuming entity accepts. Dropped rules are reported
/// with both their origin span and the application site.
pub fn expand_rules(
    rules: &[Rule],
    tank: &Tank,
    entity_name: &str,
    keep: impl Fn(&Rule) -> bool + Copy,
    reporter: &mut Reporter,
) -> Vec<ExpandedRule> {
    let mut out = Vec::new();
    let mut stack = vec![entity_name.to_string()];
    expand_into(rules, tank, entity_name, keep, None, &mut stack, &mut out, reporter);
    out
}

#[allow(clippy::too_many_arguments)]
fn expand_into(
    rules: &[Rule],
    tank: &Tank,
    entity_name: &str,
    keep: impl Fn(&Rule) -> bool + Copy,
    applied_span: Option<&SourceSpan>,
    stack: &mut Vec<String>,
    out: &mut Vec<ExpandedRule>,
    reporter: &mut Reporter,
) {
    for rule in rules {
        if let Rule::Insert(insert) = rule {
            if stack.iter().any(|name| name == &insert.rule_set) {
                reporter.error_at(
                    "RecursiveRuleSetInsertion",
                    format!(
                        "RuleSet expansion cycle: {} -> {}",
                        stack.join(" -> "),
                        insert.rule_set
                    ),
                    insert.span.clone(),
                );
                continue;
            }
            let Some(rule_set) = tank.rule_set(&insert.rule_set) else {
                reporter.error_at(
                    "RuleSetNotDefined",
                    format!("RuleSet {} is not defined", insert.rule_set),
                    insert.span.clone(),
                );
                continue;
            };
            stack.push(insert.rule_set.clone());
            let rules = rule_set.rules.clone();
            expand_into(
                &rules,
                tank,
                entity_name,
                keep,
                Some(&insert.span),
                stack,
                out,
                reporter,
            );
            stack.pop();
            continue;
        }

        if keep(rule) {
            out.push(ExpandedRule {
                rule: rule.clone(),
                applied_span: applied_span.cloned(),
            });
        } else {
            let mut diagnostic = Diagnostic::new(
                Severity::Error,
                format!(
                    "a {} rule cannot be applied to {}; rule dropped",
                    rule.kind_name(),
                    entity_name
                ),
            )
            .with_code("InvalidRuleKind")
            .with_span(rule.span().clone());
            if let Some(applied) = applied_span {
                diagnostic = diagnostic.with_applied_span(applied.clone());
            }
            reporter.report(diagnostic);
        }
    }
}

// ============================================================================
// Compiler
// ============================================================================

/// One compilation: sources in, package of artifacts out
pub struct Compiler {
    config: ProjectConfiguration,
    cache: DefinitionsCache,
    tank: Tank,
    package: Package,
    reporter: Reporter,
}

impl Compiler {
    pub fn new(config: ProjectConfiguration, cache: DefinitionsCache) -> Self {
        Self {
            config,
            cache,
            tank: Tank::new(),
            package: Package::new(),
            reporter: Reporter::new(),
        }
    }

    /// Import a batch of shorthand sources into the Tank
    pub fn import(&mut self, sources: &[RawSource]) {
        let mut importer = FshImporter::new();
        for document in importer.import(sources, &mut self.reporter) {
            self.tank.add_document(document);
        }
    }

    pub fn tank(&self) -> &Tank {
        &self.tank
    }

    pub fn package(&self) -> &Package {
        &self.package
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    pub fn config(&self) -> &ProjectConfiguration {
        &self.config
    }

    pub fn into_parts(self) -> (Package, Reporter) {
        (self.package, self.reporter)
    }

    /// Export everything in the Tank in dependency order
    pub fn run(&mut self) {
        let code_systems: Vec<String> = self
            .tank
            .entities()
            .filter_map(|e| match e {
                Entity::CodeSystem(cs) => Some(cs.name.clone()),
                _ => None,
            })
            .collect();
        for name in code_systems {
            self.export_code_system(&name);
        }

        let value_sets: Vec<String> = self
            .tank
            .entities()
            .filter_map(|e| match e {
                Entity::ValueSet(vs) => Some(vs.name.clone()),
                _ => None,
            })
            .collect();
        for name in value_sets {
            self.export_value_set(&name);
        }

        let structure_definitions: Vec<String> = self
            .tank
            .entities()
            .filter_map(|e| match e {
                Entity::Profile(p) => Some(p.name.clone()),
                Entity::Extension(x) => Some(x.name.clone()),
                _ => None,
            })
            .collect();
        let mut stack = Vec::new();
        let mut failed = HashSet::new();
        for name in structure_definitions {
            self.export_sd_with_parents(&name, &mut stack, &mut failed);
        }

        let instances: Vec<String> = self
            .tank
            .entities()
            .filter_map(|e| match e {
                Entity::Instance(i) => Some(i.name.clone()),
                _ => None,
            })
            .collect();
        let mut stack = Vec::new();
        let mut failed = HashSet::new();
        for name in instances {
            self.export_instance_with_referents(&name, &mut stack, &mut failed);
        }

        info!(
            "export complete: {} profiles, {} extensions, {} instances, {} value sets, {} code systems",
            self.package.profiles.len(),
            self.package.extensions.len(),
            self.package.instances.len(),
            self.package.value_sets.len(),
            self.package.code_systems.len()
        );
    }

    /// Emit the IG configuration companion file
    pub fn emit_ig_ini(
        &mut self,
        ig_data_dir: Option<&Path>,
        out_dir: &Path,
    ) -> Result<PathBuf, TemakiError> {
        emit_ig_ini(&self.config, ig_data_dir, out_dir, &mut self.reporter)
    }

    fn export_code_system(&mut self, name: &str) {
        let result = {
            let fisher = FishingContext::new(
                &self.package,
                &self.tank,
                &self.cache,
                &self.config.canonical,
            );
            match self.tank.find(name) {
                Some(Entity::CodeSystem(cs)) => {
                    codesystem_exporter::export_code_system(cs, &fisher, &self.config, &mut self.reporter)
                }
                _ => return,
            }
        };
        match result {
            Ok(artifact) => self.package.add_code_system(artifact),
            Err(err) => self.reporter.error(err.to_string()),
        }
    }

    fn export_value_set(&mut self, name: &str) {
        let result = {
            let fisher = FishingContext::new(
                &self.package,
                &self.tank,
                &self.cache,
                &self.config.canonical,
            );
            match self.tank.find(name) {
                Some(Entity::ValueSet(vs)) => {
                    valueset_exporter::export_value_set(vs, &fisher, &self.config, &mut self.reporter)
                }
                _ => return,
            }
        };
        match result {
            Ok(artifact) => self.package.add_value_set(artifact),
            Err(err) => self.reporter.error(err.to_string()),
        }
    }

    /// Export a Profile or Extension, exporting its Tank parent chain first.
    /// Cycles are reported as ParentNotDefined with the chain spelled out.
    fn export_sd_with_parents(
        &mut self,
        name: &str,
        stack: &mut Vec<String>,
        failed: &mut HashSet<String>,
    ) {
        if self.package.find_structure_definition(name).is_some() || failed.contains(name) {
            return;
        }
        if stack.iter().any(|n| n == name) {
            let span = self
                .tank
                .find(name)
                .map(|e| e.span().clone())
                .unwrap_or_default();
            self.reporter.error_at(
                "ParentNotDefined",
                format!(
                    "Parent resolution cycle: {} -> {name}; {name} is skipped",
                    stack.join(" -> ")
                ),
                span,
            );
            failed.insert(name.to_string());
            return;
        }

        let (parent, span, is_extension) = match self.tank.find(name) {
            Some(Entity::Profile(p)) => (p.parent.clone(), p.span.clone(), false),
            Some(Entity::Extension(x)) => (x.parent.clone(), x.span.clone(), true),
            _ => return,
        };

        stack.push(name.to_string());
        if let Some(parent) = &parent {
            let tank_parent = self
                .tank
                .find_of_kind(parent, &[FishKind::Profile, FishKind::Extension])
                .map(|e| e.name().to_string());
            if let Some(parent_name) = tank_parent {
                self.export_sd_with_parents(&parent_name, stack, failed);
            }
        }

        let result = {
            let fisher = FishingContext::new(
                &self.package,
                &self.tank,
                &self.cache,
                &self.config.canonical,
            );
            match self.tank.find(name) {
                Some(Entity::Profile(p)) => sd_exporter::export_structure_definition(
                    SdSource::Profile(p),
                    &fisher,
                    &self.config,
                    &mut self.reporter,
                ),
                Some(Entity::Extension(x)) => sd_exporter::export_structure_definition(
                    SdSource::Extension(x),
                    &fisher,
                    &self.config,
                    &mut self.reporter,
                ),
                _ => {
                    stack.pop();
                    return;
                }
            }
        };
        stack.pop();

        match result {
            Ok(sd) => {
                debug!("exported {}", sd.url);
                if is_extension {
                    self.package.add_extension(sd);
                } else {
                    self.package.add_profile(sd);
                }
            }
            Err(err) => {
                self.reporter
                    .error_at(err.code(), err.to_string(), span);
                failed.insert(name.to_string());
            }
        }
    }

    /// Export an Instance, exporting the instances it references first
    fn export_instance_with_referents(
        &mut self,
        name: &str,
        stack: &mut Vec<String>,
        failed: &mut HashSet<String>,
    ) {
        if self.package.find_instance(name).is_some() || failed.contains(name) {
            return;
        }
        if stack.iter().any(|n| n == name) {
            // The referrer will resolve what has been exported so far
            return;
        }

        let Some(Entity::Instance(instance)) = self.tank.find(name) else {
            return;
        };
        let referents: Vec<String> = instance
            .rules
            .iter()
            .filter_map(|rule| match rule {
                Rule::Fixed(fixed) => match &fixed.value {
                    FshValue::InstanceRef(target) | FshValue::Reference(target) => {
                        Some(target.clone())
                    }
                    _ => None,
                },
                _ => None,
            })
            .collect();

        stack.push(name.to_string());
        for referent in referents {
            if let Some(Entity::Instance(inner)) = self.tank.find(&referent) {
                let referent_name = inner.name.clone();
                self.export_instance_with_referents(&referent_name, stack, failed);
            }
        }

        let result = {
            let fisher = FishingContext::new(
                &self.package,
                &self.tank,
                &self.cache,
                &self.config.canonical,
            );
            match self.tank.find(name) {
                Some(Entity::Instance(instance)) => {
                    instance_exporter::export_instance(instance, &fisher, &mut self.reporter)
                }
                _ => {
                    stack.pop();
                    return;
                }
            }
        };
        stack.pop();

        match result {
            Ok(instance) => {
                if let Some((resource_type, id)) = self.package.add_instance(instance) {
                    let span = self
                        .tank
                        .find(name)
                        .map(|e| e.span().clone())
                        .unwrap_or_default();
                    self.reporter.error_at(
                        "DuplicateInstanceId",
                        format!(
                            "Multiple non-inline instances share ({resource_type}, {id}); ids must be unique"
                        ),
                        span,
                    );
                }
            }
            Err(err) => {
                let span = self
                    .tank
                    .find(name)
                    .map(|e| e.span().clone())
                    .unwrap_or_default();
                self.reporter.error_at(err.code(), err.to_string(), span);
                failed.insert(name.to_string());
            }
        }
    }
}

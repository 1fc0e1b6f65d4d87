//! Shorthand importer: text to AST
//!
//! Import is two-pass: the first pass collects `Alias:` declarations from
//! every source, the second parses entities and rules with alias resolution
//! in effect. Syntax errors drop the offending line with an `Unsupported
//! rule` warning; entity parsing continues. The importer is single-use.

pub mod lexer;
pub mod parser;

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::ast::{
    AliasDef, CodeSystem, Document, Entity, Extension, Instance, InstanceUsage, Profile, RuleSet,
    ValueSet,
};
use crate::diagnostics::{Reporter, SourceSpan};
use crate::import::lexer::{logical_lines, tokenize, SourceLine, Token};
use crate::import::parser::{parse_rule, RuleContext};
use crate::semantic::AliasTable;

/// One source file to import
#[derive(Debug, Clone)]
pub struct RawSource {
    pub file: PathBuf,
    pub text: String,
}

impl RawSource {
    pub fn new(file: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            text: text.into(),
        }
    }
}

/// Importer for shorthand documents
#[derive(Debug, Default)]
pub struct FshImporter {
    used: bool,
}

impl FshImporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Import a batch of sources into documents
    ///
    /// A reused importer reports an error and returns no documents.
    pub fn import(&mut self, sources: &[RawSource], reporter: &mut Reporter) -> Vec<Document> {
        if self.used {
            reporter.error("Importer has already been used; create a new importer per batch");
            return Vec::new();
        }
        self.used = true;

        // Pass 1: aliases are global across the batch
        let mut aliases = AliasTable::new();
        for source in sources {
            collect_aliases(source, &mut aliases, reporter);
        }

        // Pass 2: entities
        sources
            .iter()
            .map(|source| import_document(source, &aliases, reporter))
            .collect()
    }
}

fn collect_aliases(source: &RawSource, aliases: &mut AliasTable, reporter: &mut Reporter) {
    for line in logical_lines(&source.text) {
        let Some(rest) = line.text.trim_start().strip_prefix("Alias:") else {
            continue;
        };
        let span = line_span(&source.file, &line);
        let Some((name, url)) = rest.split_once('=') else {
            reporter.warn_at(
                "UnsupportedRule",
                format!("Malformed alias: {}", line.text.trim()),
                span,
            );
            continue;
        };
        let alias = AliasDef {
            name: name.trim().to_string(),
            url: url.trim().to_string(),
            span,
        };
        if let Err(err) = aliases.add(alias) {
            reporter.warn_at("UnsupportedRule", err.to_string(), line_span(&source.file, &line));
        }
    }
}

fn import_document(source: &RawSource, aliases: &AliasTable, reporter: &mut Reporter) -> Document {
    let mut document = Document::new(source.file.clone());
    for alias in logical_lines(&source.text)
        .iter()
        .filter_map(|l| parse_alias_line(&source.file, l))
    {
        document.aliases.push(alias);
    }

    let mut current: Option<Entity> = None;

    for line in logical_lines(&source.text) {
        let text = line.text.trim();
        if text.is_empty() || text.starts_with("Alias:") {
            continue;
        }
        let span = line_span(&source.file, &line);

        if let Some(rest) = text.strip_prefix('*') {
            let tokens = tokenize(rest);
            match &mut current {
                None => reporter.warn_at(
                    "UnsupportedRule",
                    format!("Rule before any entity header: {text}"),
                    span,
                ),
                Some(entity) => {
                    let context = rule_context(entity);
                    match parse_rule(&tokens, context, aliases, span.clone()) {
                        Ok(rule) => entity_rules_mut(entity).push(rule),
                        Err(reason) => reporter.warn_at(
                            "UnsupportedRule",
                            format!("Unsupported rule: {text} ({reason})"),
                            span,
                        ),
                    }
                }
            }
            continue;
        }

        let Some((keyword, rest)) = text.split_once(':') else {
            reporter.warn_at(
                "UnsupportedRule",
                format!("Unsupported rule: {text}"),
                span,
            );
            continue;
        };
        let rest = rest.trim();

        if let Some(entity) = start_entity(keyword.trim(), rest, span.clone()) {
            if let Some(finished) = current.replace(entity) {
                document.entities.push(finished);
            }
            continue;
        }

        match &mut current {
            None => reporter.warn_at(
                "UnsupportedRule",
                format!("Metadata before any entity header: {text}"),
                span,
            ),
            Some(entity) => {
                apply_metadata(entity, keyword.trim(), rest, &span, reporter);
            }
        }
    }

    if let Some(entity) = current.take() {
        document.entities.push(entity);
    }

    debug!(
        "imported {} with {} entities",
        source.file.display(),
        document.entities.len()
    );
    document
}

fn parse_alias_line(file: &Path, line: &SourceLine) -> Option<AliasDef> {
    let rest = line.text.trim_start().strip_prefix("Alias:")?;
    let (name, url) = rest.split_once('=')?;
    Some(AliasDef {
        name: name.trim().to_string(),
        url: url.trim().to_string(),
        span: line_span(file, line),
    })
}

fn line_span(file: &Path, line: &SourceLine) -> SourceSpan {
    SourceSpan::new(
        file,
        line.number,
        1,
        line.end_number,
        line.text.lines().last().map(|l| l.len()).unwrap_or(1).max(1),
    )
}

fn start_entity(keyword: &str, name: &str, span: SourceSpan) -> Option<Entity> {
    let name = name.to_string();
    match keyword {
        "Profile" => Some(Entity::Profile(Profile {
            name,
            span,
            ..Default::default()
        })),
        "Extension" => Some(Entity::Extension(Extension {
            name,
            span,
            ..Default::default()
        })),
        "Instance" => Some(Entity::Instance(Instance {
            name,
            span,
            ..Default::default()
        })),
        "RuleSet" => Some(Entity::RuleSet(RuleSet {
            name,
            span,
            rules: Vec::new(),
        })),
        "ValueSet" => Some(Entity::ValueSet(ValueSet {
            name,
            span,
            ..Default::default()
        })),
        "CodeSystem" => Some(Entity::CodeSystem(CodeSystem {
            name,
            span,
            ..Default::default()
        })),
        _ => None,
    }
}

fn rule_context(entity: &Entity) -> RuleContext {
    match entity {
        Entity::Profile(_) | Entity::Extension(_) => RuleContext::StructureDefinition,
        Entity::Instance(_) => RuleContext::Instance,
        Entity::RuleSet(_) => RuleContext::RuleSet,
        Entity::ValueSet(_) => RuleContext::ValueSet,
        Entity::CodeSystem(_) => RuleContext::CodeSystem,
    }
}

fn entity_rules_mut(entity: &mut Entity) -> &mut Vec<crate::ast::Rule> {
    match entity {
        Entity::Profile(p) => &mut p.rules,
        Entity::Extension(x) => &mut x.rules,
        Entity::Instance(i) => &mut i.rules,
        Entity::RuleSet(r) => &mut r.rules,
        Entity::ValueSet(v) => &mut v.rules,
        Entity::CodeSystem(c) => &mut c.rules,
    }
}

fn apply_metadata(
    entity: &mut Entity,
    keyword: &str,
    value: &str,
    span: &SourceSpan,
    reporter: &mut Reporter,
) {
    let value_string = unquote(value);

    let accepted = match entity {
        Entity::Profile(p) => match keyword {
            "Id" => set(&mut p.id, value_string),
            "Parent" => set(&mut p.parent, value_string),
            "Title" => set(&mut p.title, value_string),
            "Description" => set(&mut p.description, value_string),
            _ => false,
        },
        Entity::Extension(x) => match keyword {
            "Id" => set(&mut x.id, value_string),
            "Parent" => set(&mut x.parent, value_string),
            "Title" => set(&mut x.title, value_string),
            "Description" => set(&mut x.description, value_string),
            _ => false,
        },
        Entity::Instance(i) => match keyword {
            "Id" => set(&mut i.id, value_string),
            "InstanceOf" => {
                i.instance_of = value_string;
                true
            }
            "Title" => set(&mut i.title, value_string),
            "Description" => set(&mut i.description, value_string),
            "Usage" => match InstanceUsage::parse(&value_string) {
                Some(usage) => {
                    i.usage = usage;
                    i.usage_explicit = true;
                    true
                }
                None => {
                    reporter.warn_at(
                        "UnsupportedRule",
                        format!("Unknown usage '{value_string}'"),
                        span.clone(),
                    );
                    true
                }
            },
            "Mixins" => {
                i.mixins = value_string
                    .split(|c| c == ',')
                    .flat_map(|part| part.split(" and "))
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect();
                true
            }
            _ => false,
        },
        Entity::ValueSet(v) => match keyword {
            "Id" => set(&mut v.id, value_string),
            "Title" => set(&mut v.title, value_string),
            "Description" => set(&mut v.description, value_string),
            _ => false,
        },
        Entity::CodeSystem(c) => match keyword {
            "Id" => set(&mut c.id, value_string),
            "Title" => set(&mut c.title, value_string),
            "Description" => set(&mut c.description, value_string),
            _ => false,
        },
        Entity::RuleSet(_) => false,
    };

    if !accepted {
        reporter.warn_at(
            "UnsupportedRule",
            format!("Unknown metadata '{keyword}:' on {}", entity.name()),
            span.clone(),
        );
    }
}

fn set(slot: &mut Option<String>, value: String) -> bool {
    *slot = Some(value);
    true
}

fn unquote(value: &str) -> String {
    let trimmed = value.trim();
    if trimmed.len() >= 6 && trimmed.starts_with("\"\"\"") && trimmed.ends_with("\"\"\"") {
        return lexer::process_multiline_string(&trimmed[3..trimmed.len() - 3]);
    }
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        return trimmed[1..trimmed.len() - 1].to_string();
    }
    trimmed.to_string()
}

/// Tokens of a rule line after the `*`, for callers that need raw access
pub fn rule_tokens(text: &str) -> Vec<Token> {
    tokenize(text.trim_start().trim_start_matches('*'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Rule;

    fn import_one(text: &str) -> (Document, Reporter) {
        let mut reporter = Reporter::new();
        let mut importer = FshImporter::new();
        let documents = importer.import(
            &[RawSource::new("test.fsh", text)],
            &mut reporter,
        );
        (documents.into_iter().next().unwrap(), reporter)
    }

    #[test]
    fn test_import_profile_with_metadata() {
        let (doc, reporter) = import_one(
            "Profile: MyPatient\n\
             Parent: Patient\n\
             Id: my-patient\n\
             Title: \"My Patient\"\n\
             Description: \"A patient profile.\"\n\
             * name 1..*\n",
        );
        assert_eq!(reporter.error_count(), 0);
        let profile = doc.profiles().next().unwrap();
        assert_eq!(profile.name, "MyPatient");
        assert_eq!(profile.parent.as_deref(), Some("Patient"));
        assert_eq!(profile.id.as_deref(), Some("my-patient"));
        assert_eq!(profile.title.as_deref(), Some("My Patient"));
        assert_eq!(profile.rules.len(), 1);
    }

    #[test]
    fn test_import_multiple_entities() {
        let (doc, _) = import_one(
            "Profile: A\nParent: Patient\n\n\
             Extension: B\n* value[x] only boolean\n\n\
             Instance: C\nInstanceOf: Patient\nUsage: #example\n* active = true\n",
        );
        assert_eq!(doc.entities.len(), 3);
        let instance = doc.instances().next().unwrap();
        assert_eq!(instance.usage, InstanceUsage::Example);
        assert!(instance.usage_explicit);
    }

    #[test]
    fn test_alias_two_pass_resolution() {
        // The alias is declared after its use; two-pass resolution still
        // applies it
        let (doc, _) = import_one(
            "Profile: A\nParent: Observation\n* code from $VS (required)\n\n\
             Alias: $VS = http://example.org/vs\n",
        );
        let profile = doc.profiles().next().unwrap();
        match &profile.rules[0] {
            Rule::Binding(binding) => {
                assert_eq!(binding.value_set, "http://example.org/vs");
            }
            other => panic!("expected binding, got {other:?}"),
        }
        assert_eq!(doc.aliases.len(), 1);
    }

    #[test]
    fn test_unsupported_rule_warns_and_continues() {
        let (doc, reporter) = import_one(
            "Profile: A\nParent: Patient\n\
             * gibberish rule that parses to nothing ???\n\
             * name 1..1\n",
        );
        let profile = doc.profiles().next().unwrap();
        assert_eq!(profile.rules.len(), 1);
        assert!(reporter
            .warnings()
            .any(|d| d.message.contains("Unsupported rule")));
    }

    #[test]
    fn test_unknown_metadata_warns() {
        let (_, reporter) = import_one("Profile: A\nParent: Patient\nFlavor: spicy\n");
        assert!(reporter
            .warnings()
            .any(|d| d.message.contains("Unknown metadata")));
    }

    #[test]
    fn test_importer_is_single_use() {
        let mut importer = FshImporter::new();
        let mut reporter = Reporter::new();
        let first = importer.import(&[RawSource::new("a.fsh", "Profile: A\n")], &mut reporter);
        assert_eq!(first.len(), 1);

        let second = importer.import(&[RawSource::new("b.fsh", "Profile: B\n")], &mut reporter);
        assert!(second.is_empty());
        assert_eq!(reporter.error_count(), 1);
    }

    #[test]
    fn test_rule_spans() {
        let (doc, _) = import_one("Profile: A\nParent: Patient\n* name 1..1\n");
        let profile = doc.profiles().next().unwrap();
        let span = profile.rules[0].span();
        assert_eq!(span.start_line, 3);
        assert_eq!(span.file, PathBuf::from("test.fsh"));
    }

    #[test]
    fn test_mixins_metadata() {
        let (doc, _) = import_one(
            "Instance: C\nInstanceOf: Patient\nMixins: CommonMeta and OtherMeta\n",
        );
        let instance = doc.instances().next().unwrap();
        assert_eq!(instance.mixins, vec!["CommonMeta", "OtherMeta"]);
    }
}

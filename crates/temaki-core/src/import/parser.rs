//! Rule and value parsing
//!
//! Each logical line that begins with `*` is parsed into one rule of the
//! closed rule sum. The form is dispatched on the token following the path:
//! `from` (binding), `only`, `contains`, a caret path, `=` (fixed value or
//! assignment), a cardinality, or a run of flags. Lines that fit no form are
//! reported as unsupported and dropped.

use crate::ast::{
    BindingRule, BindingStrength, CardMax, CardRule, CaretRule, ConceptRule, ContainsItem,
    ContainsRule, ElementFlag, FixedValueRule, FlagRule, FshCode, FshQuantity, FshRatio, FshValue,
    InsertRule, OnlyRule, OnlyRuleType, Rule, VsComponentRule, VsFilter,
};
use crate::diagnostics::SourceSpan;
use crate::import::lexer::Token;
use crate::semantic::AliasTable;

/// The kind of entity the rule belongs to, which selects the legal forms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleContext {
    StructureDefinition,
    Instance,
    RuleSet,
    ValueSet,
    CodeSystem,
}

/// Parse the tokens of a `*` rule line (with the leading `*` removed)
pub fn parse_rule(
    tokens: &[Token],
    context: RuleContext,
    aliases: &AliasTable,
    span: SourceSpan,
) -> Result<Rule, String> {
    if tokens.is_empty() {
        return Err("empty rule".to_string());
    }

    // `* insert RuleSetName`
    if tokens[0].text == "insert" && tokens.len() >= 2 {
        return Ok(Rule::Insert(InsertRule {
            rule_set: tokens[1].text.clone(),
            span,
        }));
    }

    match context {
        RuleContext::CodeSystem => {
            if tokens[0].text.starts_with('#') {
                return parse_concept_rule(tokens, span);
            }
            if tokens[0].text.starts_with('^') {
                return parse_caret_rule("", tokens, aliases, span);
            }
        }
        RuleContext::ValueSet => {
            if let Some(rule) = try_parse_vs_component(tokens, aliases, span.clone())? {
                return Ok(rule);
            }
            if tokens[0].text.starts_with('^') {
                return parse_caret_rule("", tokens, aliases, span);
            }
        }
        _ => {}
    }

    // Entity-level caret rule: `* ^url = ...`
    if tokens[0].text.starts_with('^') {
        return parse_caret_rule("", tokens, aliases, span);
    }

    let path = tokens[0].text.clone();
    let rest = &tokens[1..];

    if rest.is_empty() {
        return Err(format!("rule on '{path}' has no operation"));
    }

    match rest[0].text.as_str() {
        "from" => parse_binding_rule(&path, &rest[1..], aliases, span),
        "only" => parse_only_rule(&path, &rest[1..], aliases, span),
        "contains" => parse_contains_rule(&path, &rest[1..], span),
        "=" => parse_fixed_rule(&path, &rest[1..], context, aliases, span),
        caret if caret.starts_with('^') => parse_caret_rule(&path, rest, aliases, span),
        card if parse_card(card).is_some() => {
            let (min, max) = parse_card(card).unwrap();
            let flags = parse_flags(&rest[1..])?;
            Ok(Rule::Card(CardRule {
                path,
                min,
                max,
                flags,
                span,
            }))
        }
        _ => parse_flag_rule(tokens, span),
    }
}

fn parse_card(token: &str) -> Option<(u32, CardMax)> {
    let (min, max) = token.split_once("..")?;
    Some((min.parse().ok()?, CardMax::parse(max)?))
}

fn parse_flags(tokens: &[Token]) -> Result<Vec<ElementFlag>, String> {
    tokens
        .iter()
        .map(|t| ElementFlag::parse(&t.text).ok_or_else(|| format!("unknown flag '{}'", t.text)))
        .collect()
}

/// `* path1, path2 MS SU` - every leading token up to the first flag is a
/// path, separated by commas
fn parse_flag_rule(tokens: &[Token], span: SourceSpan) -> Result<Rule, String> {
    let mut paths = Vec::new();
    let mut i = 0;
    while i < tokens.len() && ElementFlag::parse(&tokens[i].text).is_none() {
        if tokens[i].text != "," {
            paths.push(tokens[i].text.clone());
        }
        i += 1;
    }
    if paths.is_empty() || i == tokens.len() {
        return Err("not a flag rule".to_string());
    }
    let flags = parse_flags(&tokens[i..])?;
    Ok(Rule::Flag(FlagRule { paths, flags, span }))
}

/// `* path from ValueSetOrUrl (strength)` - strength defaults to required
fn parse_binding_rule(
    path: &str,
    tokens: &[Token],
    aliases: &AliasTable,
    span: SourceSpan,
) -> Result<Rule, String> {
    let value_set = tokens
        .first()
        .ok_or_else(|| format!("binding on '{path}' names no value set"))?;
    let value_set = aliases.resolve_or_keep(&value_set.text).to_string();

    let strength = match tokens.get(1) {
        Some(t) => {
            let inner = t.text.trim_start_matches('(').trim_end_matches(')');
            BindingStrength::parse(inner)
                .ok_or_else(|| format!("unknown binding strength '{inner}'"))?
        }
        None => BindingStrength::Required,
    };

    Ok(Rule::Binding(BindingRule {
        path: path.to_string(),
        value_set,
        strength,
        span,
    }))
}

/// `* path only Type1 or Type2 or Reference(A or B)`
fn parse_only_rule(
    path: &str,
    tokens: &[Token],
    aliases: &AliasTable,
    span: SourceSpan,
) -> Result<Rule, String> {
    let mut types = Vec::new();
    for token in tokens {
        let text = token.text.as_str();
        if text == "or" {
            continue;
        }
        if let Some(inner) = text
            .strip_prefix("Reference(")
            .and_then(|t| t.strip_suffix(')'))
        {
            for target in inner.split(|c| c == '|' || c == ' ') {
                let target = target.trim();
                if target.is_empty() || target == "or" {
                    continue;
                }
                types.push(OnlyRuleType {
                    name: aliases.resolve_or_keep(target).to_string(),
                    is_reference: true,
                });
            }
        } else {
            types.push(OnlyRuleType {
                name: aliases.resolve_or_keep(text).to_string(),
                is_reference: false,
            });
        }
    }
    if types.is_empty() {
        return Err(format!("only rule on '{path}' names no types"));
    }
    Ok(Rule::Only(OnlyRule {
        path: path.to_string(),
        types,
        span,
    }))
}

/// `* path contains a 1..1 MS and Type named b 0..*`
fn parse_contains_rule(path: &str, tokens: &[Token], span: SourceSpan) -> Result<Rule, String> {
    let mut items = Vec::new();
    let mut current: Option<ContainsItem> = None;
    let mut i = 0;

    while i < tokens.len() {
        let text = tokens[i].text.as_str();
        if text == "and" {
            if let Some(item) = current.take() {
                items.push(item);
            }
            i += 1;
            continue;
        }

        match &mut current {
            None => {
                current = Some(ContainsItem {
                    name: text.to_string(),
                    type_name: None,
                    min: None,
                    max: None,
                    flags: Vec::new(),
                });
            }
            Some(item) => {
                if text == "named" {
                    // `Type named slice`: the first word was the type
                    let slice = tokens
                        .get(i + 1)
                        .ok_or_else(|| "'named' without a slice name".to_string())?;
                    item.type_name = Some(std::mem::take(&mut item.name));
                    item.name = slice.text.clone();
                    i += 1;
                } else if let Some((min, max)) = parse_card(text) {
                    item.min = Some(min);
                    item.max = Some(max);
                } else if let Some(flag) = ElementFlag::parse(text) {
                    item.flags.push(flag);
                } else {
                    return Err(format!("unexpected token '{text}' in contains rule"));
                }
            }
        }
        i += 1;
    }
    if let Some(item) = current.take() {
        items.push(item);
    }
    if items.is_empty() {
        return Err(format!("contains rule on '{path}' declares no slices"));
    }
    Ok(Rule::Contains(ContainsRule {
        path: path.to_string(),
        items,
        span,
    }))
}

/// `* path ^caretPath = value`
fn parse_caret_rule(
    path: &str,
    tokens: &[Token],
    aliases: &AliasTable,
    span: SourceSpan,
) -> Result<Rule, String> {
    let caret = &tokens[0];
    let caret_path = caret
        .text
        .strip_prefix('^')
        .ok_or_else(|| "caret rule without '^'".to_string())?
        .to_string();
    if tokens.get(1).map(|t| t.text.as_str()) != Some("=") {
        return Err(format!("caret rule on '^{caret_path}' has no '='"));
    }
    let (value, _) = parse_value(&tokens[2..], aliases)?;
    Ok(Rule::Caret(CaretRule {
        path: path.to_string(),
        caret_path,
        value,
        span,
    }))
}

/// `* path = value [(exactly)]`
fn parse_fixed_rule(
    path: &str,
    tokens: &[Token],
    context: RuleContext,
    aliases: &AliasTable,
    span: SourceSpan,
) -> Result<Rule, String> {
    let (mut value, consumed) = parse_value(tokens, aliases)?;
    let mut rest = &tokens[consumed..];

    // `= #code from <system>` attaches the system to a bare code
    if rest.first().map(|t| t.text.as_str()) == Some("from") {
        if let Some(system) = rest.get(1) {
            if let FshValue::Code(code) = &mut value {
                if code.system.is_none() {
                    code.system = Some(aliases.resolve_or_keep(&system.text).to_string());
                }
            }
            rest = &rest[2..];
        }
    }

    let exactly = rest
        .first()
        .map(|t| t.text.eq_ignore_ascii_case("(exactly)"))
        .unwrap_or(false);

    let is_instance = matches!(context, RuleContext::Instance | RuleContext::RuleSet)
        && matches!(value, FshValue::InstanceRef(_));

    Ok(Rule::Fixed(FixedValueRule {
        path: path.to_string(),
        value,
        exactly,
        is_instance,
        span,
    }))
}

/// CodeSystem concept: `* #code "display" "definition"`
fn parse_concept_rule(tokens: &[Token], span: SourceSpan) -> Result<Rule, String> {
    let code = tokens[0]
        .text
        .strip_prefix('#')
        .ok_or_else(|| "concept rule without '#'".to_string())?
        .to_string();
    if code.is_empty() {
        return Err("concept rule with empty code".to_string());
    }
    let display = tokens.get(1).filter(|t| t.is_string).map(|t| t.text.clone());
    let definition = tokens.get(2).filter(|t| t.is_string).map(|t| t.text.clone());
    Ok(Rule::Concept(ConceptRule {
        code,
        display,
        definition,
        span,
    }))
}

/// ValueSet component forms:
/// `* [include|exclude] codes from system X [where prop = "v"]`
/// `* [include|exclude] codes from valueset Y [and Z]`
/// `* [include|exclude] SYSTEM#code "display"`
fn try_parse_vs_component(
    tokens: &[Token],
    aliases: &AliasTable,
    span: SourceSpan,
) -> Result<Option<Rule>, String> {
    let mut i = 0;
    let include = match tokens[0].text.as_str() {
        "include" => {
            i += 1;
            true
        }
        "exclude" => {
            i += 1;
            false
        }
        _ => true,
    };

    let Some(first) = tokens.get(i) else {
        return Err("empty value set component".to_string());
    };

    // Explicit concept
    if first.text.contains('#') {
        let code = parse_code_token(&first.text, aliases)?;
        let display = tokens.get(i + 1).filter(|t| t.is_string).map(|t| t.text.clone());
        let mut concept = code;
        concept.display = display;
        return Ok(Some(Rule::VsComponent(VsComponentRule {
            include,
            concepts: vec![concept],
            system: None,
            value_sets: Vec::new(),
            filters: Vec::new(),
            span,
        })));
    }

    if first.text != "codes" {
        return Ok(None);
    }
    i += 1;
    if tokens.get(i).map(|t| t.text.as_str()) != Some("from") {
        return Err("expected 'from' after 'codes'".to_string());
    }
    i += 1;

    let mut system = None;
    let mut value_sets = Vec::new();
    let mut filters = Vec::new();

    while i < tokens.len() {
        match tokens[i].text.as_str() {
            "system" => {
                let name = tokens
                    .get(i + 1)
                    .ok_or_else(|| "'system' without a name".to_string())?;
                system = Some(aliases.resolve_or_keep(&name.text).to_string());
                i += 2;
            }
            "valueset" => {
                let name = tokens
                    .get(i + 1)
                    .ok_or_else(|| "'valueset' without a name".to_string())?;
                value_sets.push(aliases.resolve_or_keep(&name.text).to_string());
                i += 2;
            }
            "and" => i += 1,
            "where" => {
                i += 1;
                loop {
                    let Some(property) = tokens.get(i) else { break };
                    if tokens.get(i + 1).map(|t| t.text.as_str()) != Some("=") {
                        return Err("filter without '='".to_string());
                    }
                    let Some(value) = tokens.get(i + 2) else {
                        return Err("filter without a value".to_string());
                    };
                    filters.push(VsFilter {
                        property: property.text.clone(),
                        op: "=".to_string(),
                        value: value.text.clone(),
                    });
                    i += 3;
                    if tokens.get(i).map(|t| t.text.as_str()) == Some("and") {
                        i += 1;
                    } else {
                        break;
                    }
                }
            }
            other => return Err(format!("unexpected token '{other}' in component rule")),
        }
    }

    if system.is_none() && value_sets.is_empty() {
        return Err("component rule selects neither a system nor a value set".to_string());
    }

    Ok(Some(Rule::VsComponent(VsComponentRule {
        include,
        concepts: Vec::new(),
        system,
        value_sets,
        filters,
        span,
    })))
}

// ============================================================================
// Values
// ============================================================================

/// Parse a scalar value from the token stream; returns the value and the
/// number of tokens consumed
pub fn parse_value(tokens: &[Token], aliases: &AliasTable) -> Result<(FshValue, usize), String> {
    let Some(first) = tokens.first() else {
        return Err("missing value".to_string());
    };

    if first.is_string {
        return Ok((FshValue::String(first.text.clone()), 1));
    }

    let text = first.text.as_str();

    if text == "true" {
        return Ok((FshValue::Boolean(true), 1));
    }
    if text == "false" {
        return Ok((FshValue::Boolean(false), 1));
    }

    if let Some(inner) = text
        .strip_prefix("Reference(")
        .and_then(|t| t.strip_suffix(')'))
    {
        return Ok((FshValue::Reference(inner.trim().to_string()), 1));
    }
    if let Some(inner) = text
        .strip_prefix("Canonical(")
        .and_then(|t| t.strip_suffix(')'))
    {
        return Ok((FshValue::Canonical(inner.trim().to_string()), 1));
    }

    if text.contains('#') {
        let mut code = parse_code_token(text, aliases)?;
        let mut consumed = 1;
        if let Some(display) = tokens.get(1).filter(|t| t.is_string) {
            code.display = Some(display.text.clone());
            consumed = 2;
        }
        return Ok((FshValue::Code(code), consumed));
    }

    if is_time_lexeme(text) {
        return Ok((FshValue::Time(text.to_string()), 1));
    }
    if is_datetime_lexeme(text) {
        return Ok((FshValue::DateTime(text.to_string()), 1));
    }

    if let Ok(number) = text.parse::<f64>() {
        // Quantity: number followed by a 'unit'; ratio: quantity : quantity
        if let Some(unit) = tokens.get(1).filter(|t| is_unit_token(&t.text)) {
            let numerator = FshQuantity {
                value: number,
                unit: Some(unit.text.trim_matches('\'').to_string()),
            };
            if tokens.get(2).map(|t| t.text.as_str()) == Some(":") {
                let (denominator, extra) = parse_quantity(&tokens[3..])?;
                return Ok((
                    FshValue::Ratio(FshRatio {
                        numerator,
                        denominator,
                    }),
                    3 + extra,
                ));
            }
            return Ok((FshValue::Quantity(numerator), 2));
        }
        if tokens.get(1).map(|t| t.text.as_str()) == Some(":") {
            let numerator = FshQuantity {
                value: number,
                unit: None,
            };
            let (denominator, extra) = parse_quantity(&tokens[2..])?;
            return Ok((
                FshValue::Ratio(FshRatio {
                    numerator,
                    denominator,
                }),
                2 + extra,
            ));
        }
        return Ok((FshValue::Number(number), 1));
    }

    // A bare name: an instance reference in assignment position
    if text
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        let resolved = aliases.resolve_or_keep(text);
        if resolved != text {
            return Ok((FshValue::String(resolved.to_string()), 1));
        }
        return Ok((FshValue::InstanceRef(text.to_string()), 1));
    }

    // URLs and other opaque tokens pass through as strings
    Ok((FshValue::String(text.to_string()), 1))
}

fn parse_quantity(tokens: &[Token]) -> Result<(FshQuantity, usize), String> {
    let Some(first) = tokens.first() else {
        return Err("missing quantity".to_string());
    };
    let value = first
        .text
        .parse::<f64>()
        .map_err(|_| format!("'{}' is not a number", first.text))?;
    if let Some(unit) = tokens.get(1).filter(|t| is_unit_token(&t.text)) {
        Ok((
            FshQuantity {
                value,
                unit: Some(unit.text.trim_matches('\'').to_string()),
            },
            2,
        ))
    } else {
        Ok((FshQuantity { value, unit: None }, 1))
    }
}

fn is_unit_token(text: &str) -> bool {
    text.len() >= 2 && text.starts_with('\'') && text.ends_with('\'')
}

/// `SYSTEM#code` / `#code` / `http://system#code`
pub fn parse_code_token(text: &str, aliases: &AliasTable) -> Result<FshCode, String> {
    let hash = text
        .find('#')
        .ok_or_else(|| format!("'{text}' is not a code"))?;
    let system_part = &text[..hash];
    let code = text[hash + 1..].to_string();
    if code.is_empty() {
        return Err(format!("'{text}' has an empty code"));
    }
    let system = if system_part.is_empty() {
        None
    } else {
        Some(aliases.resolve_or_keep(system_part).to_string())
    };
    Ok(FshCode {
        system,
        code,
        display: None,
    })
}

fn is_datetime_lexeme(text: &str) -> bool {
    // YYYY-.. with optional month/day/time; a bare 4-digit year reads as a
    // number and is coerced by the consuming element's type
    let year_ok = text.len() >= 7
        && text[..4].chars().all(|c| c.is_ascii_digit())
        && text.get(4..5) == Some("-");
    year_ok
}

fn is_time_lexeme(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() >= 5
        && bytes[0].is_ascii_digit()
        && bytes[1].is_ascii_digit()
        && bytes[2] == b':'
        && bytes[3].is_ascii_digit()
        && bytes[4].is_ascii_digit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::lexer::tokenize;

    fn rule(line: &str, context: RuleContext) -> Result<Rule, String> {
        let tokens = tokenize(line);
        assert_eq!(tokens[0].text, "*");
        parse_rule(&tokens[1..], context, &AliasTable::new(), SourceSpan::default())
    }

    #[test]
    fn test_parse_card_rule() {
        let parsed = rule("* subject 1..1 MS", RuleContext::StructureDefinition).unwrap();
        match parsed {
            Rule::Card(card) => {
                assert_eq!(card.path, "subject");
                assert_eq!(card.min, 1);
                assert_eq!(card.max, CardMax::Count(1));
                assert_eq!(card.flags, vec![ElementFlag::MustSupport]);
            }
            other => panic!("expected card rule, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_flag_rule_multi_path() {
        let parsed = rule("* name, birthDate MS SU", RuleContext::StructureDefinition).unwrap();
        match parsed {
            Rule::Flag(flag) => {
                assert_eq!(flag.paths, vec!["name", "birthDate"]);
                assert_eq!(flag.flags.len(), 2);
            }
            other => panic!("expected flag rule, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_binding_rule() {
        let parsed = rule(
            "* code from http://example.org/vs (preferred)",
            RuleContext::StructureDefinition,
        )
        .unwrap();
        match parsed {
            Rule::Binding(binding) => {
                assert_eq!(binding.value_set, "http://example.org/vs");
                assert_eq!(binding.strength, BindingStrength::Preferred);
            }
            other => panic!("expected binding rule, got {other:?}"),
        }

        // Default strength is required
        let parsed = rule("* code from MyVS", RuleContext::StructureDefinition).unwrap();
        match parsed {
            Rule::Binding(binding) => assert_eq!(binding.strength, BindingStrength::Required),
            other => panic!("expected binding rule, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_only_rule_with_references() {
        let parsed = rule(
            "* subject only Reference(Patient or Group)",
            RuleContext::StructureDefinition,
        )
        .unwrap();
        match parsed {
            Rule::Only(only) => {
                assert_eq!(only.types.len(), 2);
                assert!(only.types.iter().all(|t| t.is_reference));
                assert_eq!(only.types[0].name, "Patient");
            }
            other => panic!("expected only rule, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_contains_rule() {
        let parsed = rule(
            "* component contains systolic 1..1 MS and diastolic 0..1",
            RuleContext::StructureDefinition,
        )
        .unwrap();
        match parsed {
            Rule::Contains(contains) => {
                assert_eq!(contains.items.len(), 2);
                assert_eq!(contains.items[0].name, "systolic");
                assert_eq!(contains.items[0].min, Some(1));
                assert_eq!(contains.items[1].name, "diastolic");
            }
            other => panic!("expected contains rule, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_contains_named_type() {
        let parsed = rule(
            "* extension contains MyExt named note 0..1",
            RuleContext::StructureDefinition,
        )
        .unwrap();
        match parsed {
            Rule::Contains(contains) => {
                assert_eq!(contains.items[0].name, "note");
                assert_eq!(contains.items[0].type_name.as_deref(), Some("MyExt"));
            }
            other => panic!("expected contains rule, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_caret_rule() {
        let parsed = rule(
            "* category ^slicing.discriminator.type = #value",
            RuleContext::StructureDefinition,
        )
        .unwrap();
        match parsed {
            Rule::Caret(caret) => {
                assert_eq!(caret.path, "category");
                assert_eq!(caret.caret_path, "slicing.discriminator.type");
                assert!(matches!(caret.value, FshValue::Code(_)));
            }
            other => panic!("expected caret rule, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_fixed_rule_exactly() {
        let parsed = rule("* active = true (exactly)", RuleContext::StructureDefinition).unwrap();
        match parsed {
            Rule::Fixed(fixed) => {
                assert!(fixed.exactly);
                assert_eq!(fixed.value, FshValue::Boolean(true));
            }
            other => panic!("expected fixed rule, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_assignment_instance_ref() {
        let parsed = rule(
            "* managingOrganization = Reference(OrgInst)",
            RuleContext::Instance,
        )
        .unwrap();
        match parsed {
            Rule::Fixed(fixed) => assert_eq!(fixed.value, FshValue::Reference("OrgInst".into())),
            other => panic!("expected assignment, got {other:?}"),
        }

        let parsed = rule("* contained[0] = OrgInst", RuleContext::Instance).unwrap();
        match parsed {
            Rule::Fixed(fixed) => {
                assert!(fixed.is_instance);
                assert_eq!(fixed.value, FshValue::InstanceRef("OrgInst".into()));
            }
            other => panic!("expected assignment, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_code_with_system_suffix() {
        let parsed = rule(
            "* valueQuantity = #foo from http://foo.com",
            RuleContext::StructureDefinition,
        )
        .unwrap();
        match parsed {
            Rule::Fixed(fixed) => match fixed.value {
                FshValue::Code(code) => {
                    assert_eq!(code.code, "foo");
                    assert_eq!(code.system.as_deref(), Some("http://foo.com"));
                }
                other => panic!("expected code value, got {other:?}"),
            },
            other => panic!("expected fixed rule, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_quantity_and_ratio_values() {
        let (value, _) = parse_value(&tokenize("1.5 'mg'"), &AliasTable::new()).unwrap();
        assert_eq!(
            value,
            FshValue::Quantity(FshQuantity {
                value: 1.5,
                unit: Some("mg".into())
            })
        );

        let (value, _) = parse_value(&tokenize("1 'mg' : 2 'mL'"), &AliasTable::new()).unwrap();
        match value {
            FshValue::Ratio(ratio) => {
                assert_eq!(ratio.numerator.unit.as_deref(), Some("mg"));
                assert_eq!(ratio.denominator.value, 2.0);
            }
            other => panic!("expected ratio, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_datetime_values() {
        let (value, _) = parse_value(&tokenize("2023-01-15"), &AliasTable::new()).unwrap();
        assert_eq!(value, FshValue::DateTime("2023-01-15".into()));

        let (value, _) = parse_value(&tokenize("12:30:00"), &AliasTable::new()).unwrap();
        assert_eq!(value, FshValue::Time("12:30:00".into()));
    }

    #[test]
    fn test_parse_concept_rule() {
        let tokens = tokenize("* #active \"Active\" \"The entity is live.\"");
        let parsed = parse_rule(
            &tokens[1..],
            RuleContext::CodeSystem,
            &AliasTable::new(),
            SourceSpan::default(),
        )
        .unwrap();
        match parsed {
            Rule::Concept(concept) => {
                assert_eq!(concept.code, "active");
                assert_eq!(concept.display.as_deref(), Some("Active"));
                assert_eq!(concept.definition.as_deref(), Some("The entity is live."));
            }
            other => panic!("expected concept rule, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_vs_component_rules() {
        let tokens = tokenize("* include codes from system http://loinc.org where status = \"active\"");
        let parsed = parse_rule(
            &tokens[1..],
            RuleContext::ValueSet,
            &AliasTable::new(),
            SourceSpan::default(),
        )
        .unwrap();
        match parsed {
            Rule::VsComponent(vs) => {
                assert!(vs.include);
                assert_eq!(vs.system.as_deref(), Some("http://loinc.org"));
                assert_eq!(vs.filters.len(), 1);
                assert_eq!(vs.filters[0].property, "status");
            }
            other => panic!("expected component rule, got {other:?}"),
        }

        let tokens = tokenize("* http://loinc.org#1234-5 \"Some lab\"");
        let parsed = parse_rule(
            &tokens[1..],
            RuleContext::ValueSet,
            &AliasTable::new(),
            SourceSpan::default(),
        )
        .unwrap();
        match parsed {
            Rule::VsComponent(vs) => {
                assert_eq!(vs.concepts.len(), 1);
                assert_eq!(vs.concepts[0].code, "1234-5");
                assert_eq!(vs.concepts[0].display.as_deref(), Some("Some lab"));
            }
            other => panic!("expected component rule, got {other:?}"),
        }
    }

    #[test]
    fn test_unsupported_rule_is_error() {
        assert!(rule("* subject nonsense here", RuleContext::StructureDefinition).is_err());
    }
}

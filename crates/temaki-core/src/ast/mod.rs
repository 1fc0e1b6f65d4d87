//! Typed AST for shorthand documents
//!
//! The importer produces one [`Document`] per source file: a bag of named
//! entities, each carrying its metadata, its rules in source order, and the
//! source span it was parsed from. Entities are structurally frozen after
//! import; all further interpretation happens in the exporters.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::diagnostics::SourceSpan;

/// One parsed source file
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub file: PathBuf,
    pub entities: Vec<Entity>,
    pub aliases: Vec<AliasDef>,
}

impl Document {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            entities: Vec::new(),
            aliases: Vec::new(),
        }
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> {
        self.entities.iter().filter_map(|e| match e {
            Entity::Profile(p) => Some(p),
            _ => None,
        })
    }

    pub fn extensions(&self) -> impl Iterator<Item = &Extension> {
        self.entities.iter().filter_map(|e| match e {
            Entity::Extension(x) => Some(x),
            _ => None,
        })
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.entities.iter().filter_map(|e| match e {
            Entity::Instance(i) => Some(i),
            _ => None,
        })
    }

    pub fn rule_sets(&self) -> impl Iterator<Item = &RuleSet> {
        self.entities.iter().filter_map(|e| match e {
            Entity::RuleSet(r) => Some(r),
            _ => None,
        })
    }

    pub fn value_sets(&self) -> impl Iterator<Item = &ValueSet> {
        self.entities.iter().filter_map(|e| match e {
            Entity::ValueSet(v) => Some(v),
            _ => None,
        })
    }

    pub fn code_systems(&self) -> impl Iterator<Item = &CodeSystem> {
        self.entities.iter().filter_map(|e| match e {
            Entity::CodeSystem(c) => Some(c),
            _ => None,
        })
    }
}

/// Alias definition: `Alias: NAME = URL`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasDef {
    pub name: String,
    pub url: String,
    pub span: SourceSpan,
}

/// Top-level entity kinds
#[derive(Debug, Clone)]
pub enum Entity {
    Profile(Profile),
    Extension(Extension),
    Instance(Instance),
    RuleSet(RuleSet),
    ValueSet(ValueSet),
    CodeSystem(CodeSystem),
}

impl Entity {
    pub fn name(&self) -> &str {
        match self {
            Entity::Profile(p) => &p.name,
            Entity::Extension(x) => &x.name,
            Entity::Instance(i) => &i.name,
            Entity::RuleSet(r) => &r.name,
            Entity::ValueSet(v) => &v.name,
            Entity::CodeSystem(c) => &c.name,
        }
    }

    pub fn span(&self) -> &SourceSpan {
        match self {
            Entity::Profile(p) => &p.span,
            Entity::Extension(x) => &x.span,
            Entity::Instance(i) => &i.span,
            Entity::RuleSet(r) => &r.span,
            Entity::ValueSet(v) => &v.span,
            Entity::CodeSystem(c) => &c.span,
        }
    }
}

/// Profile definition: a constraint on a base resource type
#[derive(Debug, Clone, Default)]
pub struct Profile {
    pub name: String,
    pub id: Option<String>,
    pub parent: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub rules: Vec<Rule>,
    pub span: SourceSpan,
}

/// Extension definition: a profile whose base is the Extension type
#[derive(Debug, Clone, Default)]
pub struct Extension {
    pub name: String,
    pub id: Option<String>,
    pub parent: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub rules: Vec<Rule>,
    pub span: SourceSpan,
}

/// How an instance is intended to be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceUsage {
    #[default]
    Example,
    Inline,
    Definition,
}

impl InstanceUsage {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().trim_matches('#') {
            "example" | "Example" => Some(Self::Example),
            "inline" | "Inline" => Some(Self::Inline),
            "definition" | "Definition" => Some(Self::Definition),
            _ => None,
        }
    }
}

/// Instance definition: a concrete resource example
#[derive(Debug, Clone, Default)]
pub struct Instance {
    pub name: String,
    pub id: Option<String>,
    pub instance_of: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub usage: InstanceUsage,
    /// Whether the author wrote `Usage:` explicitly (forcing to Inline for a
    /// non-resource emits a warning only when they did not)
    pub usage_explicit: bool,
    pub rules: Vec<Rule>,
    pub mixins: Vec<String>,
    pub span: SourceSpan,
}

/// RuleSet: a named bag of rules applied by insert or mixin
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub name: String,
    pub rules: Vec<Rule>,
    pub span: SourceSpan,
}

/// ValueSet definition
#[derive(Debug, Clone, Default)]
pub struct ValueSet {
    pub name: String,
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub rules: Vec<Rule>,
    pub span: SourceSpan,
}

/// CodeSystem definition
#[derive(Debug, Clone, Default)]
pub struct CodeSystem {
    pub name: String,
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub rules: Vec<Rule>,
    pub span: SourceSpan,
}

// ============================================================================
// Rules
// ============================================================================

/// Maximum cardinality: a count or unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardMax {
    Star,
    Count(u32),
}

impl CardMax {
    pub fn parse(s: &str) -> Option<Self> {
        if s == "*" {
            Some(Self::Star)
        } else {
            s.parse().ok().map(Self::Count)
        }
    }

    /// True when `self` admits no more repetitions than `other`
    pub fn within(&self, other: &CardMax) -> bool {
        match (self, other) {
            (_, CardMax::Star) => true,
            (CardMax::Star, CardMax::Count(_)) => false,
            (CardMax::Count(a), CardMax::Count(b)) => a <= b,
        }
    }
}

impl fmt::Display for CardMax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardMax::Star => write!(f, "*"),
            CardMax::Count(n) => write!(f, "{n}"),
        }
    }
}

/// Element flags that can be attached by flag and card rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementFlag {
    /// `MS` - must support
    MustSupport,
    /// `SU` - include in summaries
    Summary,
    /// `?!` - modifier element
    Modifier,
}

impl ElementFlag {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MS" => Some(Self::MustSupport),
            "SU" => Some(Self::Summary),
            "?!" => Some(Self::Modifier),
            _ => None,
        }
    }
}

/// Binding strength, ordered from weakest to strongest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingStrength {
    Example,
    Preferred,
    Extensible,
    Required,
}

impl BindingStrength {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "example" => Some(Self::Example),
            "preferred" => Some(Self::Preferred),
            "extensible" => Some(Self::Extensible),
            "required" => Some(Self::Required),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Example => "example",
            Self::Preferred => "preferred",
            Self::Extensible => "extensible",
            Self::Required => "required",
        }
    }
}

/// The closed rule sum. Constraint rules are legal on Profiles and
/// Extensions; assignment rules on Instances; concept and component rules on
/// CodeSystems and ValueSets. Insert rules are legal anywhere.
#[derive(Debug, Clone)]
pub enum Rule {
    Card(CardRule),
    Flag(FlagRule),
    Binding(BindingRule),
    Only(OnlyRule),
    Contains(ContainsRule),
    Caret(CaretRule),
    Fixed(FixedValueRule),
    Insert(InsertRule),
    Concept(ConceptRule),
    VsComponent(VsComponentRule),
}

impl Rule {
    pub fn span(&self) -> &SourceSpan {
        match self {
            Rule::Card(r) => &r.span,
            Rule::Flag(r) => &r.span,
            Rule::Binding(r) => &r.span,
            Rule::Only(r) => &r.span,
            Rule::Contains(r) => &r.span,
            Rule::Caret(r) => &r.span,
            Rule::Fixed(r) => &r.span,
            Rule::Insert(r) => &r.span,
            Rule::Concept(r) => &r.span,
            Rule::VsComponent(r) => &r.span,
        }
    }

    /// True for rule kinds that may be applied to a StructureDefinition
    pub fn is_constraint(&self) -> bool {
        matches!(
            self,
            Rule::Card(_)
                | Rule::Flag(_)
                | Rule::Binding(_)
                | Rule::Only(_)
                | Rule::Contains(_)
                | Rule::Caret(_)
                | Rule::Fixed(_)
        )
    }

    /// True for rule kinds that may be applied to an Instance
    pub fn is_assignment(&self) -> bool {
        matches!(self, Rule::Fixed(_))
    }

    /// Short human name of the rule kind for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Rule::Card(_) => "cardinality",
            Rule::Flag(_) => "flag",
            Rule::Binding(_) => "binding",
            Rule::Only(_) => "only",
            Rule::Contains(_) => "contains",
            Rule::Caret(_) => "caret value",
            Rule::Fixed(_) => "assignment",
            Rule::Insert(_) => "insert",
            Rule::Concept(_) => "concept",
            Rule::VsComponent(_) => "value set component",
        }
    }
}

/// `* path min..max [flags]`
#[derive(Debug, Clone)]
pub struct CardRule {
    pub path: String,
    pub min: u32,
    pub max: CardMax,
    pub flags: Vec<ElementFlag>,
    pub span: SourceSpan,
}

/// `* path1, path2 MS SU`
#[derive(Debug, Clone)]
pub struct FlagRule {
    pub paths: Vec<String>,
    pub flags: Vec<ElementFlag>,
    pub span: SourceSpan,
}

/// `* path from ValueSetOrUrl (strength)`
#[derive(Debug, Clone)]
pub struct BindingRule {
    pub path: String,
    pub value_set: String,
    pub strength: BindingStrength,
    pub span: SourceSpan,
}

/// One target in an only rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnlyRuleType {
    pub name: String,
    pub is_reference: bool,
}

/// `* path only Type1 or Type2 or Reference(A or B)`
#[derive(Debug, Clone)]
pub struct OnlyRule {
    pub path: String,
    pub types: Vec<OnlyRuleType>,
    pub span: SourceSpan,
}

/// One named slice declared by a contains rule
#[derive(Debug, Clone)]
pub struct ContainsItem {
    /// Slice name
    pub name: String,
    /// Referenced type for `Type named slice` items (extension slices)
    pub type_name: Option<String>,
    pub min: Option<u32>,
    pub max: Option<CardMax>,
    pub flags: Vec<ElementFlag>,
}

/// `* path contains a 1..1 MS and Type named b 0..*`
#[derive(Debug, Clone)]
pub struct ContainsRule {
    pub path: String,
    pub items: Vec<ContainsItem>,
    pub span: SourceSpan,
}

/// `* path ^caretPath = value` - sets a field on the element definition
/// itself; an empty path addresses the definition root
#[derive(Debug, Clone)]
pub struct CaretRule {
    pub path: String,
    pub caret_path: String,
    pub value: FshValue,
    pub span: SourceSpan,
}

/// `* path = value` (pattern) / `* path = value (exactly)` (fixed)
///
/// On an Instance the same shape is an assignment; a bare name value is an
/// instance reference (`is_instance`).
#[derive(Debug, Clone)]
pub struct FixedValueRule {
    pub path: String,
    pub value: FshValue,
    pub exactly: bool,
    pub is_instance: bool,
    pub span: SourceSpan,
}

/// `* insert RuleSetName`
#[derive(Debug, Clone)]
pub struct InsertRule {
    pub rule_set: String,
    pub span: SourceSpan,
}

/// CodeSystem concept: `* #code "display" "definition"`
#[derive(Debug, Clone)]
pub struct ConceptRule {
    pub code: String,
    pub display: Option<String>,
    pub definition: Option<String>,
    pub span: SourceSpan,
}

/// A property filter in a value set component
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VsFilter {
    pub property: String,
    pub op: String,
    pub value: String,
}

/// ValueSet component rule: either explicit concepts or a system/value-set
/// selection, included or excluded
#[derive(Debug, Clone)]
pub struct VsComponentRule {
    pub include: bool,
    /// Explicit concepts (`* SYSTEM#code "display"`)
    pub concepts: Vec<FshCode>,
    /// `include codes from system X`
    pub system: Option<String>,
    /// `include codes from valueset Y`
    pub value_sets: Vec<String>,
    /// `where property = "value"`
    pub filters: Vec<VsFilter>,
    pub span: SourceSpan,
}

// ============================================================================
// Values
// ============================================================================

/// Coded value: `system#code "display"`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FshCode {
    pub system: Option<String>,
    pub code: String,
    pub display: Option<String>,
}

/// Quantity literal: `5.4 'mg'`
#[derive(Debug, Clone, PartialEq)]
pub struct FshQuantity {
    pub value: f64,
    /// UCUM unit code
    pub unit: Option<String>,
}

/// Ratio literal: `1 'mg' : 2 'mL'`
#[derive(Debug, Clone, PartialEq)]
pub struct FshRatio {
    pub numerator: FshQuantity,
    pub denominator: FshQuantity,
}

/// Scalar values accepted on the right-hand side of assignments
#[derive(Debug, Clone, PartialEq)]
pub enum FshValue {
    String(String),
    Number(f64),
    Boolean(bool),
    /// ISO date/dateTime lexeme, kept opaque
    DateTime(String),
    /// ISO time lexeme, kept opaque
    Time(String),
    Code(FshCode),
    Quantity(FshQuantity),
    Ratio(FshRatio),
    /// `Reference(Name)`
    Reference(String),
    /// `Canonical(Name)`
    Canonical(String),
    /// Bare name naming another instance
    InstanceRef(String),
}

impl FshValue {
    /// Render number values without a trailing `.0` for integral floats
    pub fn number_to_json(n: f64) -> serde_json::Value {
        if n.fract() == 0.0 && n.abs() < 9e15 {
            serde_json::Value::from(n as i64)
        } else {
            serde_json::Number::from_f64(n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null)
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            FshValue::String(_) => "string",
            FshValue::Number(_) => "number",
            FshValue::Boolean(_) => "boolean",
            FshValue::DateTime(_) => "dateTime",
            FshValue::Time(_) => "time",
            FshValue::Code(_) => "code",
            FshValue::Quantity(_) => "Quantity",
            FshValue::Ratio(_) => "Ratio",
            FshValue::Reference(_) => "Reference",
            FshValue::Canonical(_) => "canonical",
            FshValue::InstanceRef(_) => "instance",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_max_within() {
        assert!(CardMax::Count(1).within(&CardMax::Star));
        assert!(CardMax::Count(1).within(&CardMax::Count(1)));
        assert!(CardMax::Count(1).within(&CardMax::Count(3)));
        assert!(!CardMax::Count(3).within(&CardMax::Count(1)));
        assert!(!CardMax::Star.within(&CardMax::Count(3)));
        assert!(CardMax::Star.within(&CardMax::Star));
    }

    #[test]
    fn test_card_max_parse() {
        assert_eq!(CardMax::parse("*"), Some(CardMax::Star));
        assert_eq!(CardMax::parse("4"), Some(CardMax::Count(4)));
        assert_eq!(CardMax::parse("x"), None);
    }

    #[test]
    fn test_binding_strength_order() {
        assert!(BindingStrength::Example < BindingStrength::Preferred);
        assert!(BindingStrength::Preferred < BindingStrength::Extensible);
        assert!(BindingStrength::Extensible < BindingStrength::Required);
    }

    #[test]
    fn test_element_flag_parse() {
        assert_eq!(ElementFlag::parse("MS"), Some(ElementFlag::MustSupport));
        assert_eq!(ElementFlag::parse("SU"), Some(ElementFlag::Summary));
        assert_eq!(ElementFlag::parse("?!"), Some(ElementFlag::Modifier));
        assert_eq!(ElementFlag::parse("XX"), None);
    }

    #[test]
    fn test_instance_usage_parse() {
        assert_eq!(InstanceUsage::parse("#example"), Some(InstanceUsage::Example));
        assert_eq!(InstanceUsage::parse("Inline"), Some(InstanceUsage::Inline));
        assert_eq!(InstanceUsage::parse("#unknown"), None);
    }

    #[test]
    fn test_number_to_json() {
        assert_eq!(FshValue::number_to_json(3.0), serde_json::json!(3));
        assert_eq!(FshValue::number_to_json(3.5), serde_json::json!(3.5));
    }
}

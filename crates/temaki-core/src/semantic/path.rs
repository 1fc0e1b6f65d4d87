//! Shorthand path parsing
//!
//! Paths are dotted element specifiers with optional bracket suffixes:
//! numeric indices (`coding[0]`), slice names (`component[systolic]`), soft
//! indices (`line[+]`, `line[=]`) and the choice marker (`value[x]`). The
//! same segment model is used by the StructureDefinition exporter (to locate
//! and mutate element nodes) and by the Instance exporter (to validate and
//! place values).

use thiserror::Error;

/// Soft indexing operators for array manipulation during instance creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftIndexOp {
    /// `[+]` - increment to the next array index
    Increment,
    /// `[=]` - repeat the last referenced array index
    Repeat,
}

/// Bracket suffix on a path segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bracket {
    /// `[sliceName]`
    Slice(String),
    /// `[0]`, `[1]`, ...
    Index(usize),
    /// `[+]` / `[=]`
    Soft(SoftIndexOp),
    /// `[x]` - choice marker
    ChoiceType,
}

/// A single segment of a shorthand path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    /// Element name before any bracket
    pub base: String,
    /// Bracket suffixes in written order; FSH allows several, e.g.
    /// `component[systolic][0]`
    pub brackets: Vec<Bracket>,
}

impl PathSegment {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            brackets: Vec::new(),
        }
    }

    /// The slice name, when one of the brackets is a slice
    pub fn slice_name(&self) -> Option<&str> {
        self.brackets.iter().find_map(|b| match b {
            Bracket::Slice(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// The numeric index, when one of the brackets is an index
    pub fn index(&self) -> Option<usize> {
        self.brackets.iter().find_map(|b| match b {
            Bracket::Index(i) => Some(*i),
            _ => None,
        })
    }

    pub fn soft_index(&self) -> Option<SoftIndexOp> {
        self.brackets.iter().find_map(|b| match b {
            Bracket::Soft(op) => Some(*op),
            _ => None,
        })
    }

    pub fn is_choice(&self) -> bool {
        self.brackets.contains(&Bracket::ChoiceType)
    }
}

/// Path parsing and resolution errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("Invalid path syntax: {0}")]
    InvalidSyntax(String),

    #[error("Cannot resolve path: {path} in {base}")]
    CannotResolve { path: String, base: String },

    #[error("Cannot unfold element {path}: {reason}")]
    CannotUnfold { path: String, reason: String },

    #[error("Slicing not defined on {path}")]
    SlicingNotDefined { path: String },
}

/// Parse a shorthand path into segments
///
/// `name.given` → two plain segments; `contact[0].telecom[+].system` → three
/// segments with brackets; `value[x]` → one segment with the choice marker.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, PathError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let mut segments = Vec::new();
    let mut chars = trimmed.chars().peekable();
    let mut base = String::new();
    let mut brackets = Vec::new();

    while let Some(ch) = chars.next() {
        match ch {
            '.' => {
                if base.is_empty() {
                    return Err(PathError::InvalidSyntax(format!(
                        "empty segment in '{trimmed}'"
                    )));
                }
                segments.push(PathSegment {
                    base: std::mem::take(&mut base),
                    brackets: std::mem::take(&mut brackets),
                });
            }
            '[' => {
                let mut inner = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    inner.push(c);
                }
                if !closed {
                    return Err(PathError::InvalidSyntax(format!(
                        "unclosed bracket in '{trimmed}'"
                    )));
                }
                brackets.push(parse_bracket(&inner));
            }
            c if c.is_whitespace() => {
                return Err(PathError::InvalidSyntax(format!(
                    "whitespace in path '{trimmed}'"
                )));
            }
            c => {
                if !brackets.is_empty() {
                    return Err(PathError::InvalidSyntax(format!(
                        "text after bracket in '{trimmed}'"
                    )));
                }
                base.push(c);
            }
        }
    }

    if base.is_empty() && brackets.is_empty() {
        return Err(PathError::InvalidSyntax(format!(
            "trailing dot in '{trimmed}'"
        )));
    }
    segments.push(PathSegment { base, brackets });
    Ok(segments)
}

fn parse_bracket(inner: &str) -> Bracket {
    match inner {
        "x" => Bracket::ChoiceType,
        "+" => Bracket::Soft(SoftIndexOp::Increment),
        "=" => Bracket::Soft(SoftIndexOp::Repeat),
        _ => {
            if let Ok(index) = inner.parse::<usize>() {
                Bracket::Index(index)
            } else {
                Bracket::Slice(inner.to_string())
            }
        }
    }
}

/// Render segments back to the canonical dotted form, without brackets
pub fn segments_to_path(segments: &[PathSegment]) -> String {
    segments
        .iter()
        .map(|s| {
            if s.is_choice() {
                format!("{}[x]", s.base)
            } else {
                s.base.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Capitalize the first character of a type code, as used in the
/// `valueQuantity` / `patternCodeableConcept` naming convention
pub fn type_suffix(type_code: &str) -> String {
    let mut chars = type_code.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

/// Split a choice-specialized name like `valueQuantity` against a choice
/// base `value` into the matching type code, given the candidate type codes
/// of the choice element
pub fn match_choice_type<'a>(
    segment_base: &str,
    choice_base: &str,
    type_codes: impl Iterator<Item = &'a str>,
) -> Option<String> {
    let suffix = segment_base.strip_prefix(choice_base)?;
    if suffix.is_empty() {
        return None;
    }
    for code in type_codes {
        if suffix == type_suffix(code) {
            return Some(code.to_string());
        }
    }
    None
}

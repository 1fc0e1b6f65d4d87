//! Conversion of shorthand values to typed FHIR JSON
//!
//! The same conversion serves both exporters: the StructureDefinition
//! exporter attaches the result as a `patternX`/`fixedX`, the Instance
//! exporter places it directly into the instance tree. A bare code value is
//! lifted into the shape the target type expects (a string for `code`, a
//! Coding object, a CodeableConcept wrapper, or the code/system pair of a
//! Quantity).

use serde_json::{json, Value as JsonValue};

use crate::ast::{FshCode, FshQuantity, FshValue};

const UCUM_SYSTEM: &str = "http://unitsofmeasure.org";

const PRIMITIVE_STRING_TYPES: &[&str] = &[
    "string", "code", "id", "uri", "url", "canonical", "oid", "uuid", "markdown", "base64Binary",
    "xhtml",
];

const PRIMITIVE_DATE_TYPES: &[&str] = &["date", "dateTime", "instant"];

const PRIMITIVE_NUMBER_TYPES: &[&str] = &["decimal", "integer", "integer64", "unsignedInt", "positiveInt"];

/// Convert a value without any type context (caret rules, open content)
pub fn value_to_plain_json(value: &FshValue) -> JsonValue {
    match value {
        FshValue::String(s) => json!(s),
        FshValue::Number(n) => FshValue::number_to_json(*n),
        FshValue::Boolean(b) => json!(b),
        FshValue::DateTime(s) | FshValue::Time(s) => json!(s),
        FshValue::Code(code) => json!(code.code),
        FshValue::Quantity(q) => quantity_json(q),
        FshValue::Ratio(r) => json!({
            "numerator": quantity_json(&r.numerator),
            "denominator": quantity_json(&r.denominator),
        }),
        FshValue::Reference(target) => json!({ "reference": target }),
        FshValue::Canonical(target) | FshValue::InstanceRef(target) => json!(target),
    }
}

/// Convert a value for an element of the given type code
pub fn value_for_type(value: &FshValue, type_code: &str) -> Result<JsonValue, String> {
    if PRIMITIVE_STRING_TYPES.contains(&type_code) {
        return match value {
            FshValue::String(s) => Ok(json!(s)),
            FshValue::Code(code) => Ok(json!(code.code)),
            FshValue::Canonical(target) | FshValue::InstanceRef(target) => Ok(json!(target)),
            other => Err(mismatch(other, type_code)),
        };
    }

    if type_code == "boolean" {
        return match value {
            FshValue::Boolean(b) => Ok(json!(b)),
            other => Err(mismatch(other, type_code)),
        };
    }

    if PRIMITIVE_NUMBER_TYPES.contains(&type_code) {
        return match value {
            FshValue::Number(n) => Ok(FshValue::number_to_json(*n)),
            other => Err(mismatch(other, type_code)),
        };
    }

    if PRIMITIVE_DATE_TYPES.contains(&type_code) {
        return match value {
            FshValue::DateTime(s) | FshValue::String(s) => Ok(json!(s)),
            FshValue::Number(n) if n.fract() == 0.0 => Ok(json!(format!("{}", *n as i64))),
            other => Err(mismatch(other, type_code)),
        };
    }

    if type_code == "time" {
        return match value {
            FshValue::Time(s) | FshValue::String(s) => Ok(json!(s)),
            other => Err(mismatch(other, type_code)),
        };
    }

    match type_code {
        "Coding" => match value {
            FshValue::Code(code) => Ok(coding_json(code)),
            other => Err(mismatch(other, type_code)),
        },
        "CodeableConcept" => match value {
            // A bare code is lifted to {coding: [{system, code}]}
            FshValue::Code(code) => Ok(json!({ "coding": [coding_json(code)] })),
            FshValue::String(text) => Ok(json!({ "text": text })),
            other => Err(mismatch(other, type_code)),
        },
        "Quantity" | "Age" | "Distance" | "Duration" | "Count" | "SimpleQuantity"
        | "MoneyQuantity" => match value {
            FshValue::Quantity(q) => Ok(quantity_json(q)),
            // A code on a Quantity sets the coded unit
            FshValue::Code(code) => {
                let mut object = serde_json::Map::new();
                if let Some(system) = &code.system {
                    object.insert("system".to_string(), json!(system));
                }
                object.insert("code".to_string(), json!(code.code));
                if let Some(display) = &code.display {
                    object.insert("unit".to_string(), json!(display));
                }
                Ok(JsonValue::Object(object))
            }
            FshValue::Number(n) => Ok(json!({ "value": FshValue::number_to_json(*n) })),
            other => Err(mismatch(other, type_code)),
        },
        "Ratio" => match value {
            FshValue::Ratio(r) => Ok(json!({
                "numerator": quantity_json(&r.numerator),
                "denominator": quantity_json(&r.denominator),
            })),
            other => Err(mismatch(other, type_code)),
        },
        "Reference" => match value {
            FshValue::Reference(target) => Ok(json!({ "reference": target })),
            FshValue::String(target) => Ok(json!({ "reference": target })),
            other => Err(mismatch(other, type_code)),
        },
        _ => {
            // Complex types without a dedicated conversion accept whatever
            // shape the author provided
            Ok(value_to_plain_json(value))
        }
    }
}

fn mismatch(value: &FshValue, type_code: &str) -> String {
    format!(
        "cannot assign {} value to an element of type {}",
        value.kind_name(),
        type_code
    )
}

/// FHIR Quantity JSON with the UCUM system attached to coded units
pub fn quantity_json(quantity: &FshQuantity) -> JsonValue {
    let mut object = serde_json::Map::new();
    object.insert(
        "value".to_string(),
        FshValue::number_to_json(quantity.value),
    );
    if let Some(unit) = &quantity.unit {
        object.insert("system".to_string(), json!(UCUM_SYSTEM));
        object.insert("code".to_string(), json!(unit));
    }
    JsonValue::Object(object)
}

pub fn coding_json(code: &FshCode) -> JsonValue {
    let mut object = serde_json::Map::new();
    if let Some(system) = &code.system {
        object.insert("system".to_string(), json!(system));
    }
    object.insert("code".to_string(), json!(code.code));
    if let Some(display) = &code.display {
        object.insert("display".to_string(), json!(display));
    }
    JsonValue::Object(object)
}

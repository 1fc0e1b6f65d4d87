//! Shared fixtures: a minimal R4-shaped definitions cache and compiler setup
#![allow(dead_code)]

use serde_json::{json, Value};
use temaki_core::{Compiler, DefinitionsCache, ProjectConfiguration, RawSource};

pub const CANONICAL: &str = "http://hl7.org/fhir/us/minimal";

fn element(path: &str, min: u32, max: &str, types: Value) -> Value {
    json!({
        "id": path,
        "path": path,
        "min": min,
        "max": max,
        "type": types,
    })
}

fn root_element(path: &str) -> Value {
    json!({ "id": path, "path": path, "min": 0, "max": "*" })
}

fn resource_sd(name: &str, elements: Vec<Value>) -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "id": name,
        "url": format!("http://hl7.org/fhir/StructureDefinition/{name}"),
        "name": name,
        "status": "active",
        "kind": "resource",
        "abstract": false,
        "type": name,
        "baseDefinition": "http://hl7.org/fhir/StructureDefinition/DomainResource",
        "derivation": "specialization",
        "snapshot": { "element": elements }
    })
}

fn datatype_sd(name: &str, kind: &str, elements: Vec<Value>) -> Value {
    json!({
        "resourceType": "StructureDefinition",
        "id": name,
        "url": format!("http://hl7.org/fhir/StructureDefinition/{name}"),
        "name": name,
        "status": "active",
        "kind": kind,
        "abstract": false,
        "type": name,
        "baseDefinition": "http://hl7.org/fhir/StructureDefinition/Element",
        "derivation": "specialization",
        "snapshot": { "element": elements }
    })
}

fn reference_to(targets: &[&str]) -> Value {
    let urls: Vec<String> = targets
        .iter()
        .map(|t| format!("http://hl7.org/fhir/StructureDefinition/{t}"))
        .collect();
    json!([{ "code": "Reference", "targetProfile": urls }])
}

pub fn test_cache() -> DefinitionsCache {
    let patient = resource_sd(
        "Patient",
        vec![
            root_element("Patient"),
            element("Patient.id", 0, "1", json!([{ "code": "id" }])),
            element("Patient.contained", 0, "*", json!([{ "code": "Resource" }])),
            element("Patient.extension", 0, "*", json!([{ "code": "Extension" }])),
            element("Patient.active", 0, "1", json!([{ "code": "boolean" }])),
            element("Patient.name", 0, "*", json!([{ "code": "HumanName" }])),
            element("Patient.gender", 0, "1", json!([{ "code": "code" }])),
            element("Patient.birthDate", 0, "1", json!([{ "code": "date" }])),
            element(
                "Patient.maritalStatus",
                0,
                "1",
                json!([{ "code": "CodeableConcept" }]),
            ),
            element(
                "Patient.managingOrganization",
                0,
                "1",
                reference_to(&["Organization"]),
            ),
        ],
    );

    let observation = resource_sd(
        "Observation",
        vec![
            root_element("Observation"),
            element("Observation.id", 0, "1", json!([{ "code": "id" }])),
            element("Observation.extension", 0, "*", json!([{ "code": "Extension" }])),
            element("Observation.status", 1, "1", json!([{ "code": "code" }])),
            element(
                "Observation.category",
                0,
                "*",
                json!([{ "code": "CodeableConcept" }]),
            ),
            element(
                "Observation.code",
                1,
                "1",
                json!([{ "code": "CodeableConcept" }]),
            ),
            element(
                "Observation.subject",
                0,
                "1",
                reference_to(&["Patient", "Group"]),
            ),
            json!({
                "id": "Observation.value[x]",
                "path": "Observation.value[x]",
                "min": 0,
                "max": "1",
                "type": [
                    { "code": "Quantity" },
                    { "code": "string" },
                    { "code": "CodeableConcept" }
                ]
            }),
            element(
                "Observation.component",
                0,
                "*",
                json!([{ "code": "BackboneElement" }]),
            ),
        ],
    );

    let organization = resource_sd(
        "Organization",
        vec![
            root_element("Organization"),
            element("Organization.id", 0, "1", json!([{ "code": "id" }])),
            element("Organization.active", 0, "1", json!([{ "code": "boolean" }])),
            element("Organization.name", 0, "1", json!([{ "code": "string" }])),
        ],
    );

    let group = resource_sd(
        "Group",
        vec![
            root_element("Group"),
            element("Group.actual", 1, "1", json!([{ "code": "boolean" }])),
        ],
    );

    let codeable_concept = datatype_sd(
        "CodeableConcept",
        "complex-type",
        vec![
            root_element("CodeableConcept"),
            element(
                "CodeableConcept.coding",
                0,
                "*",
                json!([{ "code": "Coding" }]),
            ),
            element("CodeableConcept.text", 0, "1", json!([{ "code": "string" }])),
        ],
    );

    let coding = datatype_sd(
        "Coding",
        "complex-type",
        vec![
            root_element("Coding"),
            element("Coding.system", 0, "1", json!([{ "code": "uri" }])),
            element("Coding.version", 0, "1", json!([{ "code": "string" }])),
            element("Coding.code", 0, "1", json!([{ "code": "code" }])),
            element("Coding.display", 0, "1", json!([{ "code": "string" }])),
        ],
    );

    let quantity = datatype_sd(
        "Quantity",
        "complex-type",
        vec![
            root_element("Quantity"),
            element("Quantity.value", 0, "1", json!([{ "code": "decimal" }])),
            element("Quantity.unit", 0, "1", json!([{ "code": "string" }])),
            element("Quantity.system", 0, "1", json!([{ "code": "uri" }])),
            element("Quantity.code", 0, "1", json!([{ "code": "code" }])),
        ],
    );

    let human_name = datatype_sd(
        "HumanName",
        "complex-type",
        vec![
            root_element("HumanName"),
            element("HumanName.family", 0, "1", json!([{ "code": "string" }])),
            element("HumanName.given", 0, "*", json!([{ "code": "string" }])),
        ],
    );

    let extension = json!({
        "resourceType": "StructureDefinition",
        "id": "Extension",
        "url": "http://hl7.org/fhir/StructureDefinition/Extension",
        "name": "Extension",
        "status": "active",
        "kind": "complex-type",
        "abstract": false,
        "type": "Extension",
        "baseDefinition": "http://hl7.org/fhir/StructureDefinition/Element",
        "derivation": "specialization",
        "context": [{ "type": "element", "expression": "Element" }],
        "snapshot": { "element": [
            root_element("Extension"),
            element("Extension.extension", 0, "*", json!([{ "code": "Extension" }])),
            element("Extension.url", 1, "1", json!([{ "code": "uri" }])),
            json!({
                "id": "Extension.value[x]",
                "path": "Extension.value[x]",
                "min": 0,
                "max": "1",
                "type": [
                    { "code": "boolean" },
                    { "code": "string" },
                    { "code": "Quantity" },
                    { "code": "CodeableConcept" }
                ]
            })
        ]}
    });

    DefinitionsCache::from_definitions(vec![
        patient,
        observation,
        organization,
        group,
        codeable_concept,
        coding,
        quantity,
        human_name,
        extension,
    ])
}

pub fn test_config() -> ProjectConfiguration {
    let mut config = ProjectConfiguration::new(CANONICAL);
    config.id = Some("fhir.us.minimal".to_string());
    config.name = Some("MinimalIG".to_string());
    config.version = Some("1.0.0".to_string());
    config.fhir_version = Some("4.0.1".to_string());
    config.status = Some("draft".to_string());
    config
}

/// Import the given shorthand text and run the full export pipeline
pub fn compile(source: &str) -> Compiler {
    let mut compiler = Compiler::new(test_config(), test_cache());
    compiler.import(&[RawSource::new("input.fsh", source)]);
    compiler.run();
    compiler
}

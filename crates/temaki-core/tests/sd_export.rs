//! End-to-end StructureDefinition export tests

mod common;

use common::compile;
use serde_json::json;
use temaki_core::ast::BindingStrength;
use temaki_core::diagnostics::Severity;

#[test]
fn cardinality_narrowing_lands_in_snapshot_and_differential() {
    let compiler = compile(
        "Profile: Foo\n\
         Parent: Observation\n\
         * subject 1..1\n",
    );

    let sd = compiler
        .package()
        .find_structure_definition("Foo")
        .expect("profile exported");

    let subject = sd.find_element("Observation.subject").unwrap();
    assert_eq!(subject.min, Some(1));
    assert_eq!(subject.max.as_deref(), Some("1"));

    let differential = sd.differential.as_ref().unwrap();
    assert_eq!(differential.element.len(), 1);
    let entry = &differential.element[0];
    assert_eq!(entry.id(), "Observation.subject");
    assert_eq!(entry.path, "Observation.subject");
    assert_eq!(entry.min, Some(1));
    // Only the changed field is recorded
    assert!(entry.max.is_none());
    assert!(entry.types.is_none());
}

#[test]
fn widening_cardinality_is_rejected() {
    let compiler = compile(
        "Profile: Foo\n\
         Parent: Observation\n\
         * status 0..1\n",
    );

    assert!(compiler.reporter().has_code("WideningCardinality"));
    let sd = compiler
        .package()
        .find_structure_definition("Foo")
        .unwrap();
    // The element keeps the parent's cardinality
    assert_eq!(sd.find_element("Observation.status").unwrap().min, Some(1));
}

#[test]
fn choice_narrowing_and_pattern_lift() {
    let compiler = compile(
        "Profile: Obs\n\
         Parent: Observation\n\
         * value[x] only Quantity\n\
         * valueQuantity = #foo from http://foo.com\n",
    );

    let sd = compiler
        .package()
        .find_structure_definition("Obs")
        .unwrap();
    let value = sd.find_element("Observation.value[x]").unwrap();

    let codes = value.type_codes();
    assert_eq!(codes, vec!["Quantity"]);
    let (key, pattern) = value.pattern_value().unwrap();
    assert_eq!(key, "patternQuantity");
    assert_eq!(pattern, &json!({"system": "http://foo.com", "code": "foo"}));
}

#[test]
fn noop_profile_has_empty_differential() {
    let compiler = compile("Profile: Nothing\nParent: Patient\n");
    let sd = compiler
        .package()
        .find_structure_definition("Nothing")
        .unwrap();
    assert_eq!(sd.differential.as_ref().unwrap().element.len(), 0);
    assert_eq!(sd.derivation.as_deref(), Some("constraint"));
    assert_eq!(
        sd.base_definition.as_deref(),
        Some("http://hl7.org/fhir/StructureDefinition/Patient")
    );
    assert_eq!(sd.url, format!("{}/StructureDefinition/Nothing", common::CANONICAL));
}

#[test]
fn fixed_value_blocks_reassignment() {
    let compiler = compile(
        "Profile: Fixer\n\
         Parent: Patient\n\
         * active = true (exactly)\n\
         * active = false\n",
    );

    assert!(compiler.reporter().has_code("ValueAlreadyFixed"));
    let sd = compiler
        .package()
        .find_structure_definition("Fixer")
        .unwrap();
    let active = sd.find_element("Patient.active").unwrap();
    assert_eq!(active.fixed_value().unwrap().1, &json!(true));
}

#[test]
fn repeated_rule_is_idempotent_on_stable_fixpoint() {
    let compiler = compile(
        "Profile: Twice\n\
         Parent: Observation\n\
         * subject 1..1\n\
         * subject 1..1\n",
    );

    // Applying the same narrowing twice changes nothing and is not an error
    assert_eq!(compiler.reporter().error_count(), 0);
    let sd = compiler
        .package()
        .find_structure_definition("Twice")
        .unwrap();
    assert_eq!(sd.find_element("Observation.subject").unwrap().min, Some(1));
    assert_eq!(sd.differential.as_ref().unwrap().element.len(), 1);
}

#[test]
fn binding_strengthens_but_never_weakens() {
    let compiler = compile(
        "Profile: Bound\n\
         Parent: Observation\n\
         * code from http://example.org/vs (preferred)\n\
         * code from http://example.org/vs2 (required)\n\
         * code from http://example.org/vs3 (example)\n",
    );

    assert!(compiler.reporter().has_code("BindingStrength"));
    let sd = compiler
        .package()
        .find_structure_definition("Bound")
        .unwrap();
    let binding = sd
        .find_element("Observation.code")
        .unwrap()
        .binding
        .as_ref()
        .unwrap();
    // The strengthened binding stands; the weakening attempt was dropped
    assert_eq!(binding.strength, BindingStrength::Required);
    assert_eq!(binding.value_set.as_deref(), Some("http://example.org/vs2"));
}

#[test]
fn flags_or_in_and_never_clear() {
    let compiler = compile(
        "Profile: Flagged\n\
         Parent: Patient\n\
         * name MS SU\n\
         * name ^mustSupport = false\n",
    );

    let sd = compiler
        .package()
        .find_structure_definition("Flagged")
        .unwrap();
    let name = sd.find_element("Patient.name").unwrap();
    assert_eq!(name.must_support, Some(true));
    assert_eq!(name.is_summary, Some(true));
    // The attempt to clear was reported and ignored
    assert!(compiler.reporter().has_code("CannotClearFlag"));
}

#[test]
fn reference_narrowing_intersects_targets() {
    let compiler = compile(
        "Profile: Narrow\n\
         Parent: Observation\n\
         * subject only Reference(Patient)\n",
    );

    let sd = compiler
        .package()
        .find_structure_definition("Narrow")
        .unwrap();
    let subject = sd.find_element("Observation.subject").unwrap();
    let types = subject.types.as_ref().unwrap();
    assert_eq!(types.len(), 1);
    assert_eq!(types[0].code, "Reference");
    assert_eq!(
        types[0].target_profile.as_ref().unwrap(),
        &vec!["http://hl7.org/fhir/StructureDefinition/Patient".to_string()]
    );
}

#[test]
fn reference_narrowing_outside_targets_is_rejected() {
    let compiler = compile(
        "Profile: Bad\n\
         Parent: Observation\n\
         * subject only Reference(Organization)\n",
    );

    assert!(compiler.reporter().has_code("MismatchedType"));
    let sd = compiler.package().find_structure_definition("Bad").unwrap();
    let subject = sd.find_element("Observation.subject").unwrap();
    // Targets unchanged
    assert_eq!(
        subject.types.as_ref().unwrap()[0]
            .target_profile
            .as_ref()
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn contains_creates_slices_with_default_discriminator() {
    let compiler = compile(
        "Profile: Sliced\n\
         Parent: Observation\n\
         * category contains niceSlice 1..1 MS and otherSlice 0..2\n",
    );

    let sd = compiler
        .package()
        .find_structure_definition("Sliced")
        .unwrap();

    let category = sd.find_element("Observation.category").unwrap();
    let slicing = category.slicing.as_ref().unwrap();
    assert_eq!(slicing.rules, "open");
    assert_eq!(slicing.discriminator.len(), 1);
    assert_eq!(slicing.discriminator[0].type_field, "value");

    let position = sd.position_of_id("Observation.category:niceSlice").unwrap();
    let slice = &sd.snapshot_elements()[position];
    assert_eq!(slice.slice_name.as_deref(), Some("niceSlice"));
    assert_eq!(slice.min, Some(1));
    assert_eq!(slice.max.as_deref(), Some("1"));
    assert_eq!(slice.must_support, Some(true));
    assert!(sd.position_of_id("Observation.category:otherSlice").is_some());

    // Both slices and the sliced array element appear in the differential
    let differential = sd.differential.as_ref().unwrap();
    let ids: Vec<&str> = differential.element.iter().map(|e| e.id()).collect();
    assert!(ids.contains(&"Observation.category"));
    assert!(ids.contains(&"Observation.category:niceSlice"));
    assert!(ids.contains(&"Observation.category:otherSlice"));
}

#[test]
fn caret_rule_sets_element_and_definition_fields() {
    let compiler = compile(
        "Profile: Careted\n\
         Parent: Patient\n\
         * ^status = #active\n\
         * name ^short = \"Names of the patient\"\n",
    );

    let sd = compiler
        .package()
        .find_structure_definition("Careted")
        .unwrap();
    assert_eq!(sd.status, "active");
    assert_eq!(
        sd.find_element("Patient.name").unwrap().short.as_deref(),
        Some("Names of the patient")
    );
}

#[test]
fn ruleset_insert_expands_with_cycle_guard() {
    let compiler = compile(
        "RuleSet: Mandatory\n\
         * name 1..*\n\
         * insert Mandatory\n\
         \n\
         Profile: WithInsert\n\
         Parent: Patient\n\
         * insert Mandatory\n",
    );

    assert!(compiler.reporter().has_code("RecursiveRuleSetInsertion"));
    let sd = compiler
        .package()
        .find_structure_definition("WithInsert")
        .unwrap();
    // The non-cyclic part of the ruleset still applied
    assert_eq!(sd.find_element("Patient.name").unwrap().min, Some(1));
}

#[test]
fn ruleset_diagnostics_carry_both_spans() {
    let compiler = compile(
        "RuleSet: WrongKind\n\
         * status = #final\n\
         * gibberish only nothing\n\
         \n\
         Profile: Consumer\n\
         Parent: Observation\n\
         * insert WrongKind\n",
    );

    // The unresolved path inside the expansion is attributed to the ruleset
    // line and to the insert site
    let diagnostic = compiler
        .reporter()
        .diagnostics()
        .iter()
        .find(|d| d.code.as_deref() == Some("CannotResolvePath"))
        .expect("path error from expanded rule");
    assert!(diagnostic.span.is_some());
    let applied = diagnostic.applied_span.as_ref().unwrap();
    assert_eq!(applied.start_line, 7);
}

#[test]
fn profile_with_unknown_parent_is_skipped() {
    let compiler = compile(
        "Profile: Orphan\n\
         Parent: NoSuchResource\n\
         * name 1..1\n\
         \n\
         Profile: Sibling\n\
         Parent: Patient\n",
    );

    assert!(compiler.reporter().has_code("ParentNotDefined"));
    assert!(compiler.package().find_structure_definition("Orphan").is_none());
    // The failure does not stop the sibling from exporting
    assert!(compiler.package().find_structure_definition("Sibling").is_some());
}

#[test]
fn parent_cycle_is_reported() {
    let compiler = compile(
        "Profile: A\n\
         Parent: B\n\
         \n\
         Profile: B\n\
         Parent: A\n",
    );

    let cycle_errors = compiler
        .reporter()
        .diagnostics()
        .iter()
        .filter(|d| {
            d.severity == Severity::Error && d.message.contains("cycle")
        })
        .count();
    assert!(cycle_errors >= 1);
    assert!(compiler.package().find_structure_definition("A").is_none());
}

#[test]
fn profile_of_profile_exports_in_dependency_order() {
    let compiler = compile(
        "Profile: Child\n\
         Parent: Base\n\
         * birthDate 1..1\n\
         \n\
         Profile: Base\n\
         Parent: Patient\n\
         * name 1..*\n",
    );

    assert_eq!(compiler.reporter().error_count(), 0);
    let child = compiler
        .package()
        .find_structure_definition("Child")
        .unwrap();
    // The child inherits the intermediate parent's narrowing in its snapshot
    assert_eq!(child.find_element("Patient.name").unwrap().min, Some(1));
    assert_eq!(child.find_element("Patient.birthDate").unwrap().min, Some(1));
    assert_eq!(
        child.base_definition.as_deref(),
        Some(format!("{}/StructureDefinition/Base", common::CANONICAL).as_str())
    );
    // But only its own change lands in its differential
    let differential = child.differential.as_ref().unwrap();
    assert_eq!(differential.element.len(), 1);
    assert_eq!(differential.element[0].path, "Patient.birthDate");
}

#[test]
fn extension_defaults_to_extension_parent_and_keeps_context() {
    let compiler = compile(
        "Extension: Mood\n\
         * value[x] only boolean\n",
    );

    let sd = compiler
        .package()
        .find_structure_definition("Mood")
        .unwrap();
    assert_eq!(sd.type_field, "Extension");
    assert_eq!(
        sd.base_definition.as_deref(),
        Some("http://hl7.org/fhir/StructureDefinition/Extension")
    );
    // The parent's context is preserved rather than rewritten
    assert!(sd.context.is_some());
    let value = sd.find_element("Extension.value[x]").unwrap();
    assert_eq!(value.type_codes(), vec!["boolean"]);
}

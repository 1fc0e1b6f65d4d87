//! End-to-end ig.ini emission (through the compiler facade)

mod common;

use temaki_core::diagnostics::Severity;
use temaki_core::Compiler;

#[test]
fn generated_ig_ini_with_template() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::test_config();
    config.template = Some("hl7.fhir.template#0.0.5".to_string());

    let mut compiler = Compiler::new(config, common::test_cache());
    let path = compiler.emit_ig_ini(None, dir.path()).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("[IG]"));
    assert!(content.contains("ig = input/ImplementationGuide-fhir.us.minimal.json"));
    assert!(content.contains("template = hl7.fhir.template#0.0.5"));
    // Boxed banner before the section
    assert!(content.trim_start().starts_with(';'));
    // A single blank line terminates the file
    assert!(content.ends_with("\n"));

    let infos: Vec<_> = compiler
        .reporter()
        .diagnostics()
        .iter()
        .filter(|d| d.severity == Severity::Info)
        .collect();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].message, "Generated ig.ini.");
}

#[test]
fn authored_ig_ini_survives_copy() {
    let dir = tempfile::tempdir().unwrap();
    let ig_data = dir.path().join("ig-data");
    std::fs::create_dir_all(&ig_data).unwrap();
    std::fs::write(
        ig_data.join("ig.ini"),
        "[IG]\nig = input/my-ig.json\ntemplate = custom#1.0.0\n",
    )
    .unwrap();

    let mut compiler = Compiler::new(common::test_config(), common::test_cache());
    let out = dir.path().join("out");
    let path = compiler.emit_ig_ini(Some(&ig_data), &out).unwrap();

    let content = std::fs::read_to_string(&path).unwrap();
    assert!(content.contains("ig = input/my-ig.json"));
    assert!(content.contains("template = custom#1.0.0"));
    assert!(content.contains("ig-data"));
}

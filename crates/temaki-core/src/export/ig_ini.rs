//! ig.ini emitter
//!
//! Writes the Implementation Guide publisher's ini companion file. Four
//! behaviors, driven by whether the project configuration supplies a
//! `template` and whether the author keeps an `ig.ini` of their own under
//! the ig-data directory:
//!
//! 1. template configured, no authored file: generate from configuration
//! 2. template configured, authored file exists: generate and warn that the
//!    authored file is overridden
//! 3. no template, authored file exists: copy it verbatim behind a banner,
//!    warning about deprecated keys but preserving them
//! 4. authored file missing `ig` or `template` keys: merge in defaults with
//!    one warning per missing key

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::ProjectConfiguration;
use crate::diagnostics::Reporter;
use crate::error::TemakiError;

const DEPRECATED_KEYS: &[&str] = &[
    "copyrightyear",
    "license",
    "version",
    "ballotstatus",
    "fhirspec",
    "excludexml",
    "excludejson",
    "excludettl",
    "excludeMaps",
];

const GENERATED_BANNER: &str = "\
; ;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;\n\
; ;  This ig.ini was generated from the project configuration.               ;\n\
; ;  Do not edit this file directly; change the configuration instead.       ;\n\
; ;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;\n";

/// Emit `ig.ini` into `out_dir`, consulting an authored file in
/// `ig_data_dir` when one exists. Returns the path written.
pub fn emit_ig_ini(
    config: &ProjectConfiguration,
    ig_data_dir: Option<&Path>,
    out_dir: &Path,
    reporter: &mut Reporter,
) -> Result<PathBuf, TemakiError> {
    let authored = ig_data_dir
        .map(|dir| dir.join("ig.ini"))
        .filter(|path| path.is_file());

    let content = if config.template.is_some() {
        if let Some(path) = &authored {
            reporter.warn(format!(
                "Found both a template in the configuration and {}; the configuration wins and the file is ignored",
                path.display()
            ));
        }
        generate_ini(config, reporter)
    } else if let Some(path) = &authored {
        copy_or_merge_ini(config, path, reporter)?
    } else {
        reporter.warn(
            "No template configured and no ig.ini found; generating one with default keys",
        );
        generate_ini(config, reporter)
    };

    std::fs::create_dir_all(out_dir).map_err(|source| TemakiError::io_error(out_dir, source))?;
    let out_path = out_dir.join("ig.ini");
    std::fs::write(&out_path, content).map_err(|source| TemakiError::io_error(&out_path, source))?;
    debug!("wrote {}", out_path.display());
    Ok(out_path)
}

fn ig_entry(config: &ProjectConfiguration) -> String {
    format!("input/ImplementationGuide-{}.json", config.package_id())
}

fn generate_ini(config: &ProjectConfiguration, reporter: &mut Reporter) -> String {
    let mut out = String::from(GENERATED_BANNER);
    out.push_str("\n[IG]\n");
    out.push_str(&format!("ig = {}\n", ig_entry(config)));
    if let Some(template) = &config.template {
        out.push_str(&format!("template = {template}\n"));
    }
    out.push('\n');
    reporter.info("Generated ig.ini.");
    out
}

fn copy_or_merge_ini(
    config: &ProjectConfiguration,
    path: &Path,
    reporter: &mut Reporter,
) -> Result<String, TemakiError> {
    let authored = std::fs::read_to_string(path)
        .map_err(|source| TemakiError::io_error(path, source))?;

    let keys: Vec<String> = authored
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim();
            if trimmed.starts_with(';') || trimmed.starts_with('#') || trimmed.starts_with('[') {
                return None;
            }
            trimmed.split_once('=').map(|(k, _)| k.trim().to_string())
        })
        .collect();

    for deprecated in DEPRECATED_KEYS {
        if keys.iter().any(|k| k == deprecated) {
            reporter.warn(format!(
                "ig.ini key '{deprecated}' is deprecated and ignored by the IG publisher; preserving it as authored"
            ));
        }
    }

    let mut out = format!(
        "; ;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;\n\
         ; ;  This ig.ini was copied from {}.\n\
         ; ;  To change its contents, edit that file.\n\
         ; ;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;;\n\n",
        path.display()
    );
    out.push_str(authored.trim_end());
    out.push('\n');

    // Merge in required keys the author left out
    if !keys.iter().any(|k| k == "ig") {
        reporter.warn("ig.ini is missing the 'ig' key; merging in the default");
        out.push_str(&format!("ig = {}\n", ig_entry(config)));
    }
    if !keys.iter().any(|k| k == "template") {
        reporter.warn("ig.ini is missing the 'template' key; merging in the default");
        out.push_str("template = fhir.base.template\n");
    }

    out.push('\n');
    Ok(out)
}

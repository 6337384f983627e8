//! `info` command.

use std::path::Path;

use mediabundle::{Bundle, ElementKind};
use serde_json::json;

use super::common::{format_duration, format_size, open};
use crate::error::CliError;

/// Print the content of the bundle at `path`.
pub fn run(path: &Path, as_json: bool) -> Result<(), CliError> {
    let bundle = open(path)?;
    if as_json {
        println!("{}", serde_json::to_string_pretty(&summary(&bundle))?);
    } else {
        print_text(&bundle);
    }
    Ok(())
}

fn summary(bundle: &Bundle) -> serde_json::Value {
    json!({
        "id": bundle.identifier(),
        "root": bundle.root().display().to_string(),
        "start": bundle.manifest().start().map(|s| s.to_rfc3339()),
        "duration": bundle.duration(),
        "size": bundle.size(),
        "locked": bundle.is_locked(),
        "elements": bundle.elements(),
    })
}

fn print_text(bundle: &Bundle) {
    println!("Bundle {}", bundle.identifier().unwrap_or("-"));
    println!("======================");
    println!("Root:     {}", bundle.root().display());
    if let Some(start) = bundle.manifest().start() {
        println!("Start:    {}", start.to_rfc3339());
    }
    println!("Duration: {}", format_duration(bundle.duration()));
    println!("Size:     {}", format_size(bundle.size()));
    if bundle.is_locked() {
        println!("Locked:   yes");
    }

    for kind in ElementKind::ALL {
        let elements: Vec<_> = bundle
            .elements()
            .iter()
            .filter(|e| e.kind() == kind)
            .collect();
        if elements.is_empty() {
            continue;
        }
        println!();
        println!("{} ({}):", kind.section_tag(), elements.len());
        for element in elements {
            println!(
                "  {:<14} {:<28} {:<20} {}",
                element.id().unwrap_or("-"),
                element.flavor(),
                element.mime_type(),
                element.filename()
            );
            if let Some(reference) = element.reference() {
                println!("  {:<14} -> {}", "", reference);
            }
        }
    }
}

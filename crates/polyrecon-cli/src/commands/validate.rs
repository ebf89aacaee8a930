//! polyrecon validate command - check a reconstructed model.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use polyrecon::{MeshReport, io, validate_polygon_mesh};
use serde::Serialize;

use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct ValidationResult {
    path: String,
    valid: bool,
    issues: Vec<IssueInfo>,
    report: MeshReport,
}

#[derive(Serialize)]
struct IssueInfo {
    category: &'static str,
    message: String,
}

pub fn run(input: &Path, cli: &Cli) -> Result<()> {
    let mesh = io::load_polygon_mesh(input)
        .with_context(|| format!("Failed to load model from {:?}", input))?;

    let report = validate_polygon_mesh(&mesh);
    let mut issues = Vec::new();

    if report.face_count == 0 {
        issues.push(IssueInfo {
            category: "content",
            message: "Model has no faces".to_string(),
        });
    }
    if report.boundary_edge_count > 0 {
        issues.push(IssueInfo {
            category: "topology",
            message: format!(
                "Model is not watertight ({} boundary edges)",
                report.boundary_edge_count
            ),
        });
    }
    if !report.is_manifold {
        issues.push(IssueInfo {
            category: "topology",
            message: format!(
                "Model is not manifold ({} non-manifold edges)",
                report.non_manifold_edge_count
            ),
        });
    }

    let result = ValidationResult {
        path: input.display().to_string(),
        valid: report.is_closed(),
        issues,
        report,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Model Validation".bold().underline());
                println!("  {}: {}", "File".cyan(), input.display());
                print!("{}", result.report);
                if result.issues.is_empty() {
                    output::success("Model is a closed surface", cli.format, cli.quiet);
                } else {
                    for issue in &result.issues {
                        println!(
                            "  {} [{}] {}",
                            "✗".red().bold(),
                            issue.category,
                            issue.message
                        );
                    }
                }
            }
        }
    }

    Ok(())
}

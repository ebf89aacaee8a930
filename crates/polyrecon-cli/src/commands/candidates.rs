//! polyrecon candidates command - write the candidate faces only.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use polyrecon::{PipelineController, io};
use serde::Serialize;

use crate::commands::{build_config, load_points};
use crate::{Cli, HypothesisArgs, OutputFormat, output};

#[derive(Serialize)]
struct CandidatesResult {
    input: String,
    output: String,
    refined_groups: usize,
    supporting_planes: usize,
    faces: usize,
    vertices: usize,
    interior_edges: usize,
}

pub fn run(input: &Path, output_path: &Path, hypothesis: &HypothesisArgs, cli: &Cli) -> Result<()> {
    let config = build_config(hypothesis)?;
    let points = load_points(input)?;

    let mut controller = PipelineController::with_config(config)?;
    controller.load_point_set(points);
    let refined_groups = controller.refine()?.output_groups;
    let candidates = controller.generate_hypothesis()?;

    io::save_polygon_mesh(&candidates.mesh, output_path)
        .with_context(|| format!("Failed to save candidate faces to {:?}", output_path))?;

    let result = CandidatesResult {
        input: input.display().to_string(),
        output: output_path.display().to_string(),
        refined_groups,
        supporting_planes: candidates.planes.len(),
        faces: candidates.face_count(),
        vertices: candidates.mesh.vertex_count(),
        interior_edges: candidates.interior_edges().count(),
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&result, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                output::success(
                    &format!("Candidate faces saved to {}", output_path.display()),
                    cli.format,
                    cli.quiet,
                );
                println!("  {}: {}", "Segments".cyan(), result.refined_groups);
                println!(
                    "  {}: {}",
                    "Supporting planes".cyan(),
                    result.supporting_planes
                );
                println!(
                    "  {}: {} ({} vertices)",
                    "Faces".cyan(),
                    result.faces,
                    result.vertices
                );
                println!("  {}: {}", "Interior edges".cyan(), result.interior_edges);
            }
        }
    }

    Ok(())
}

//! polyrecon reconstruct command - run the full pipeline.

use std::path::Path;

use anyhow::{Context, Result};
use colored::Colorize;
use polyrecon::{
    CallbackObserver, PipelineController, PipelineEvent, SolveStatus, SolverKind, io,
};
use serde::Serialize;

use crate::commands::{apply_selection, build_config, load_points};
use crate::{Cli, HypothesisArgs, OutputFormat, SelectionArgs, output};

#[derive(Serialize)]
struct ReconstructResult {
    input: String,
    output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    candidates_output: Option<String>,
    points: usize,
    input_groups: usize,
    refined_groups: usize,
    merges: usize,
    candidate_faces: usize,
    selected_faces: usize,
    planar_faces: usize,
    objective: f64,
    status: SolveStatus,
    solver: SolverKind,
    nodes: u64,
    watertight: bool,
    boundary_edges: usize,
}

pub fn run(
    input: &Path,
    output_path: &Path,
    candidates_path: Option<&Path>,
    hypothesis: &HypothesisArgs,
    selection: &SelectionArgs,
    cli: &Cli,
) -> Result<()> {
    let mut config = build_config(hypothesis)?;
    apply_selection(&mut config, selection)?;
    let points = load_points(input)?;

    let show_stages = matches!(cli.format, OutputFormat::Text) && !cli.quiet;
    let observer = CallbackObserver::new(move |event| {
        if !show_stages {
            return;
        }
        match event {
            PipelineEvent::StageFinished { stage, elapsed } => eprintln!(
                "  {} {} ({:.1} ms)",
                "·".dimmed(),
                stage,
                elapsed.as_secs_f64() * 1000.0
            ),
            PipelineEvent::SolverProgress { nodes, incumbent } => {
                if let Some(best) = incumbent {
                    eprintln!("    {} nodes, best {:.6}", nodes, best);
                }
            }
            _ => {}
        }
    });

    let mut controller = PipelineController::with_config(config)?.with_observer(Box::new(observer));
    controller.load_point_set(points);

    let refinement = controller.refine()?;
    let (input_groups, refined_groups, merges) = (
        refinement.input_groups,
        refinement.output_groups,
        refinement.merges,
    );

    let candidates = controller.generate_hypothesis()?;
    if let Some(path) = candidates_path {
        io::save_polygon_mesh(&candidates.mesh, path)
            .with_context(|| format!("Failed to save candidate faces to {:?}", path))?;
    }

    controller.compute_confidences()?;
    let result = controller
        .optimize()
        .with_context(|| "Face selection failed")?;

    io::save_polygon_mesh(&result.mesh.mesh, output_path)
        .with_context(|| format!("Failed to save model to {:?}", output_path))?;
    let (objective, status, solver, nodes) =
        (result.objective, result.status, result.backend, result.nodes);

    let (watertight, boundary_edges) = controller
        .report()
        .map_or((false, 0), |r| (r.is_watertight, r.boundary_edge_count));
    let summary = ReconstructResult {
        input: input.display().to_string(),
        output: output_path.display().to_string(),
        candidates_output: candidates_path.map(|p| p.display().to_string()),
        points: controller.point_count(),
        input_groups,
        refined_groups,
        merges,
        candidate_faces: controller.candidate_face_count(),
        selected_faces: controller.optimized_face_count(),
        planar_faces: controller.optimized_planar_component_count(),
        objective,
        status,
        solver,
        nodes,
        watertight,
        boundary_edges,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&summary, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if summary.selected_faces == 0 {
                output::warning(
                    "No face was selected; try a lower complexity weight",
                    cli.format,
                    cli.quiet,
                );
            }
            if summary.status == SolveStatus::Incumbent {
                output::warning(
                    "Solver budget exhausted; the model may not be optimal",
                    cli.format,
                    cli.quiet,
                );
            }
            if !cli.quiet {
                output::success(
                    &format!("Model saved to {}", output_path.display()),
                    cli.format,
                    cli.quiet,
                );
                println!(
                    "  {}: {} → {} ({} merged)",
                    "Segments".cyan(),
                    summary.input_groups,
                    summary.refined_groups,
                    summary.merges
                );
                println!(
                    "  {}: {} candidates → {} selected",
                    "Faces".cyan(),
                    summary.candidate_faces,
                    summary.selected_faces
                );
                println!("  {}: {}", "Planar faces".cyan(), summary.planar_faces);
                println!(
                    "  {}: {:.6} ({}, {} nodes)",
                    "Objective".cyan(),
                    summary.objective,
                    summary.solver,
                    summary.nodes
                );
                println!(
                    "  {}: {}",
                    "Watertight".cyan(),
                    if summary.watertight {
                        "yes".green()
                    } else {
                        "no".yellow()
                    }
                );
                if let Some(path) = &summary.candidates_output {
                    println!("  {}: {}", "Candidates".cyan(), path);
                }
            }
        }
    }

    Ok(())
}

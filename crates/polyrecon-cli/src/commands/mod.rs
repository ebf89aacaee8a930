//! Subcommand implementations.

pub mod candidates;
pub mod config;
pub mod info;
pub mod reconstruct;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};
use polyrecon::{PointSet, ReconstructionConfig, Weights, io};

use crate::{HypothesisArgs, SelectionArgs};

/// Load a point cloud, attaching the path to any error.
pub fn load_points(input: &Path) -> Result<PointSet> {
    io::load_point_set(input).with_context(|| format!("Failed to load point cloud from {:?}", input))
}

/// Settings from `--config` (or defaults) with the stage flags applied.
pub fn build_config(args: &HypothesisArgs) -> Result<ReconstructionConfig> {
    let mut config = match &args.config {
        Some(path) => ReconstructionConfig::from_toml_file(path)
            .with_context(|| format!("Failed to load settings from {:?}", path))?,
        None => ReconstructionConfig::default(),
    };

    if let Some(angle) = args.angle_threshold {
        config.refine.angle_threshold_deg = angle;
    }
    if let Some(distance) = args.distance_threshold {
        config.refine.distance_threshold = Some(distance);
    }
    if let Some(padding) = args.padding {
        config.hypothesis.bbox_padding = padding;
    }

    config.validate()?;
    Ok(config)
}

/// Apply the selection flags on top of `config`.
pub fn apply_selection(config: &mut ReconstructionConfig, args: &SelectionArgs) -> Result<()> {
    let current = config.weights;
    config.weights = Weights::new(
        args.fitting.unwrap_or(current.fitting),
        args.coverage.unwrap_or(current.coverage),
        args.complexity.unwrap_or(current.complexity),
    );
    if let Some(kind) = args.solver {
        config.solver.backend = kind;
    }
    if let Some(limit) = args.time_limit {
        config.solver.time_limit_secs = Some(limit);
    }
    if args.accept_incumbent {
        config.solver.accept_incumbent_on_timeout = true;
    }

    config.validate()?;
    Ok(())
}

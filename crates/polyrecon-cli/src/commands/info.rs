//! polyrecon info command - display point cloud statistics.

use std::path::Path;

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

use crate::commands::load_points;
use crate::{Cli, OutputFormat, output};

#[derive(Serialize)]
struct PointCloudInfo {
    path: String,
    points: usize,
    grouped_points: usize,
    groups: usize,
    planar_groups: usize,
    has_normals: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    bounds: Option<BoundsInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    segments: Vec<SegmentInfo>,
}

#[derive(Serialize)]
struct BoundsInfo {
    min: [f64; 3],
    max: [f64; 3],
    dimensions: [f64; 3],
}

#[derive(Serialize)]
struct SegmentInfo {
    label: usize,
    points: usize,
    /// `[a, b, c, d]` of `ax + by + cz + d = 0`.
    #[serde(skip_serializing_if = "Option::is_none")]
    plane: Option<[f64; 4]>,
}

pub fn run(input: &Path, detailed: bool, cli: &Cli) -> Result<()> {
    let set = load_points(input)?;

    let bounds = set.bounds().map(|(min, max)| {
        let dims = max - min;
        BoundsInfo {
            min: [min.x, min.y, min.z],
            max: [max.x, max.y, max.z],
            dimensions: [dims.x, dims.y, dims.z],
        }
    });

    let segments = if detailed {
        set.groups
            .iter()
            .map(|g| SegmentInfo {
                label: g.label,
                points: g.len(),
                plane: g
                    .plane
                    .map(|p| [p.normal.x, p.normal.y, p.normal.z, p.offset]),
            })
            .collect()
    } else {
        Vec::new()
    };

    let info = PointCloudInfo {
        path: input.display().to_string(),
        points: set.len(),
        grouped_points: set.grouped_point_count(),
        groups: set.groups.len(),
        planar_groups: set.groups.iter().filter(|g| g.plane.is_some()).count(),
        has_normals: set.points.iter().any(|p| p.normal.is_some()),
        bounds,
        segments,
    };

    match cli.format {
        OutputFormat::Json => {
            output::print(&info, cli.format, cli.quiet);
        }
        OutputFormat::Text => {
            if !cli.quiet {
                println!("{}", "Point Cloud Information".bold().underline());
                println!("  {}: {}", "File".cyan(), input.display());
                println!("  {}: {}", "Points".cyan(), info.points);
                println!(
                    "  {}: {} ({} ungrouped)",
                    "Grouped points".cyan(),
                    info.grouped_points,
                    info.points - info.grouped_points
                );
                println!(
                    "  {}: {} ({} with a plane)",
                    "Segments".cyan(),
                    info.groups,
                    info.planar_groups
                );

                if let Some(ref b) = info.bounds {
                    println!(
                        "  {}: {:.3} x {:.3} x {:.3}",
                        "Dimensions".cyan(),
                        b.dimensions[0],
                        b.dimensions[1],
                        b.dimensions[2]
                    );
                }

                println!(
                    "  {}: {}",
                    "Has normals".cyan(),
                    if info.has_normals { "yes" } else { "no" }
                );

                for s in &info.segments {
                    match s.plane {
                        Some([a, b, c, d]) => println!(
                            "    segment {:>4}: {:>7} points  {:.4}x + {:.4}y + {:.4}z + {:.4} = 0",
                            s.label, s.points, a, b, c, d
                        ),
                        None => println!(
                            "    segment {:>4}: {:>7} points  {}",
                            s.label,
                            s.points,
                            "(no plane)".yellow()
                        ),
                    }
                }
            }
        }
    }

    Ok(())
}

//! polyrecon config command - emit the default settings.

use std::path::Path;

use anyhow::{Context, Result};
use polyrecon::ReconstructionConfig;

use crate::{Cli, OutputFormat, output};

pub fn run(output_path: Option<&Path>, cli: &Cli) -> Result<()> {
    let config = ReconstructionConfig::default();

    match output_path {
        Some(path) => {
            config
                .save_toml(path)
                .with_context(|| format!("Failed to write settings to {:?}", path))?;
            output::success(
                &format!("Default settings written to {}", path.display()),
                cli.format,
                cli.quiet,
            );
        }
        None => match cli.format {
            OutputFormat::Json => output::print(&config, cli.format, cli.quiet),
            OutputFormat::Text => {
                if !cli.quiet {
                    print!("{}", config.to_toml()?);
                }
            }
        },
    }

    Ok(())
}

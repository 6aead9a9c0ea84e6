// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `cadence validate` - parse manifests and report what they declare

use anyhow::{bail, Result};
use colored::Colorize;
use std::path::PathBuf;

use cadence_core::infrastructure::manifest_parser::{Manifest, ManifestParser};

pub fn execute(files: &[PathBuf]) -> Result<()> {
    let mut invalid = 0usize;

    for path in files {
        match ManifestParser::parse_file(path) {
            Ok(manifest) => {
                println!("{} {}", "✓".green(), path.display());
                print_summary(&manifest);
            }
            Err(e) => {
                invalid += 1;
                println!("{} {}", "✗".red(), path.display());
                println!("  {}", e.to_string().red());
            }
        }
    }

    if invalid > 0 {
        bail!("{} of {} manifest(s) failed validation", invalid, files.len());
    }
    Ok(())
}

fn print_summary(manifest: &Manifest) {
    match manifest {
        Manifest::Template(template) => {
            println!(
                "  WorkflowTemplate {} ({}): {} task(s), {} edge(s)",
                template.id.to_string().bold(),
                template.name,
                template.nodes.len(),
                template.edges.len()
            );
        }
        Manifest::Organization(organization) => {
            println!(
                "  Organization {} ({}): {} agent(s)",
                organization.id.to_string().bold(),
                organization.name,
                organization.agents.len()
            );
            for agent in &organization.agents {
                println!(
                    "    - {} [{}] max {} concurrent",
                    agent.id, agent.role, agent.max_concurrent_tasks
                );
            }
        }
    }
}

//! Definition command - definitions, versions and publishing.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};
use console::style;

use kmp_workflow::{VersionStatus, WorkflowFile, WorkflowVersion};

use super::{Context, dim, field, heading};

/// Arguments for the definition command.
#[derive(Args, Debug)]
pub struct DefinitionArgs {
    #[command(subcommand)]
    pub command: DefinitionCommand,
}

#[derive(Subcommand, Debug)]
pub enum DefinitionCommand {
    /// Create an empty definition
    Create {
        /// Unique slug used to start instances
        slug: String,

        /// Display name
        #[arg(short, long)]
        name: String,

        /// Trigger classification (manual, event, scheduled)
        #[arg(short, long, default_value = "manual")]
        trigger_type: String,

        /// Description
        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// Import a TOML or JSON workflow file as a new version
    Import {
        /// Workflow file
        file: PathBuf,

        /// Publish the imported version
        #[arg(long)]
        publish: bool,
    },

    /// Validate and publish a version
    Publish {
        /// Version id
        version_id: String,
    },

    /// Archive a version
    Archive {
        /// Version id
        version_id: String,
    },

    /// List definitions
    List,

    /// List the versions of a definition
    Versions {
        /// Definition slug or id
        definition: String,
    },

    /// Stop a definition from starting new instances
    Deactivate {
        /// Definition slug or id
        definition: String,
    },

    /// Allow a deactivated definition to start instances again
    Activate {
        /// Definition slug or id
        definition: String,
    },
}

/// Run the definition command.
pub async fn run(args: DefinitionArgs, ctx: &Context) -> Result<()> {
    let services = ctx.services()?;
    let defs = &services.definitions;

    match args.command {
        DefinitionCommand::Create {
            slug,
            name,
            trigger_type,
            description,
        } => ctx.emit(
            defs.create_definition(&slug, &name, &trigger_type, &description),
            |d| {
                println!("Created definition {} ({})", style(&d.slug).bold(), dim(&d.id));
            },
        ),

        DefinitionCommand::Import { file, publish } => {
            let result = WorkflowFile::from_file(&file).and_then(|f| defs.import(&f, publish));
            ctx.emit(result, |imported| {
                let verb = if imported.created { "Created" } else { "Updated" };
                println!(
                    "{} {} with version {} ({})",
                    verb,
                    style(&imported.definition.slug).bold(),
                    imported.version.version_number,
                    imported.version.status
                );
                println!("  {}", dim(&imported.version.id));
                print_warnings(&imported.warnings);
            })
        }

        DefinitionCommand::Publish { version_id } => {
            ctx.emit(defs.publish_version(&version_id), |published| {
                println!(
                    "Published version {} ({})",
                    published.version.version_number,
                    dim(&published.version.id)
                );
                print_warnings(&published.warnings);
            })
        }

        DefinitionCommand::Archive { version_id } => {
            ctx.emit(defs.archive_version(&version_id), |_| {
                println!("Archived version {}", dim(&version_id));
            })
        }

        DefinitionCommand::List => ctx.emit(defs.list_definitions(), |definitions| {
            if definitions.is_empty() {
                println!("{}", dim("No workflow definitions"));
                return;
            }
            heading("Workflow Definitions");
            for d in definitions {
                let state = if d.is_active {
                    style("active").green()
                } else {
                    style("inactive").red()
                };
                println!("  {:<28} {:<10} {}", style(&d.slug).bold(), state, d.name);
            }
        }),

        DefinitionCommand::Versions { definition } => {
            let result = defs
                .get_definition(&definition)
                .and_then(|d| defs.list_versions(&d.id));
            ctx.emit(result, |versions| print_versions(versions))
        }

        DefinitionCommand::Deactivate { definition } => {
            ctx.emit(defs.deactivate_definition(&definition), |d| {
                println!("Deactivated {}", style(&d.slug).bold());
            })
        }

        DefinitionCommand::Activate { definition } => {
            ctx.emit(defs.activate_definition(&definition), |d| {
                println!("Activated {}", style(&d.slug).bold());
            })
        }
    }
}

fn print_versions(versions: &[WorkflowVersion]) {
    if versions.is_empty() {
        println!("{}", dim("No versions"));
        return;
    }
    heading("Versions");
    for v in versions {
        println!(
            "  v{:<4} {:<10} {}  {}",
            v.version_number,
            v.status.to_string(),
            dim(&v.id),
            dim(v.created_at.format("%Y-%m-%d %H:%M"))
        );
    }
    if let Some(published) = versions.iter().find(|v| v.status == VersionStatus::Published) {
        println!();
        field("Published", format!("v{}", published.version_number));
    }
}

fn print_warnings(warnings: &[String]) {
    for warning in warnings {
        println!("  {} {}", style("warning:").yellow(), warning);
    }
}

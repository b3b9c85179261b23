//! Registry command - list registered capabilities.

use anyhow::Result;
use clap::Args;
use console::style;

use super::{Context, dim, heading};

#[derive(Args, Debug)]
pub struct RegistryArgs {
    /// Only this kind (action, condition, entity)
    #[arg(short, long)]
    pub kind: Option<String>,
}

pub async fn run(args: RegistryArgs, ctx: &Context) -> Result<()> {
    let services = ctx.services()?;
    let registry = services.engine.registry();

    let capabilities: Vec<_> = registry
        .describe()
        .into_iter()
        .filter(|c| args.kind.as_deref().is_none_or(|k| c.kind == k))
        .collect();

    ctx.emit(Ok(capabilities), |capabilities| {
        heading(&format!("Registry ({})", registry.modules().join(", ")));
        if capabilities.is_empty() {
            println!("{}", dim("Nothing registered"));
        }
        for c in capabilities {
            println!(
                "  {:<10} {:<24} {}",
                c.kind,
                style(&c.key).bold(),
                c.label
            );
            for (name, spec) in &c.params {
                let required = if spec.required { "required" } else { "optional" };
                println!("      {} {}", name, dim(required));
            }
        }
    })
}

//! `tessera plan`: dry-run revalidation decisions.
//!
//! Scans every block, compares against the cache and prints what each
//! validator would do. The cache file is never written: planning is
//! read-only, so running it twice gives the same answer.

use tessera_cache::{BlockPlan, LoadOutcome, Revalidator, RevalidatorOptions, RunSummary};
use tracing::debug;

use crate::project::resolve_project_root;
use crate::{GlobalArgs, PlanArgs, ReportFormat};

/// Runs the `tessera plan` command. Returns exit code 0.
pub fn run(args: &PlanArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project_dir = resolve_project_root(global)?;
    let loaded = tessera_config::load_config(&project_dir)?;
    debug!(root = %project_dir.display(), blocks = loaded.config.blocks.len(), "loaded project");

    let options = RevalidatorOptions {
        force: args.force,
        validators: (!args.validators.is_empty()).then(|| args.validators.clone()),
        threads: args.jobs,
    };
    let mut revalidator = Revalidator::open(&project_dir, &loaded, options);

    if !global.quiet && revalidator.load_outcome() == LoadOutcome::Discarded {
        eprintln!("warning: validation cache is unusable and will be ignored");
    }

    let plans = revalidator.plan();
    let summary = RunSummary::from_plans(&plans);

    match args.format {
        ReportFormat::Json => {
            let verdicts: Vec<_> = plans.iter().map(|p| &p.verdict).collect();
            let report = serde_json::json!({
                "runId": revalidator.run_id(),
                "summary": summary,
                "blocks": verdicts,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        ReportFormat::Text => {
            if !global.quiet {
                eprintln!(
                    "   Planning {} ({} block(s), {} validator(s))",
                    loaded.config.project.name,
                    plans.len(),
                    revalidator.validators().len()
                );
            }
            print_text(&plans, global.verbose);
            if !global.quiet {
                eprintln!(
                    "   {} validator run(s) needed, {} served from cache",
                    summary.validators_run, summary.validators_skipped
                );
            }
        }
    }
    Ok(0)
}

fn print_text(plans: &[BlockPlan], verbose: bool) {
    let name_width = plans
        .iter()
        .map(|p| p.block_name.len())
        .max()
        .unwrap_or(0);

    for plan in plans {
        println!(
            "{:>width$}  {}",
            plan.block_name,
            plan.verdict.summary,
            width = name_width
        );
        for decision in &plan.verdict.decisions {
            if !decision.should_run && !verbose {
                continue;
            }
            let action = if decision.should_run { "run" } else { "skip" };
            println!(
                "{:>width$}  {:<12} {:<5} {}",
                "",
                decision.validator_id,
                action,
                decision.reason,
                width = name_width
            );
        }
    }
}

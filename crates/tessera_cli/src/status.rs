//! `tessera status`: describe the cache file.

use tessera_cache::{CacheStore, LoadOutcome};

use crate::project::resolve_project_root;
use crate::GlobalArgs;

/// Runs the `tessera status` command. Returns exit code 0.
pub fn run(global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project_dir = resolve_project_root(global)?;
    let loaded = tessera_config::load_config(&project_dir)?;
    let store = CacheStore::load(&project_dir, &loaded.config.cache);

    println!("cache: {}", store.path().display());
    match store.load_outcome() {
        LoadOutcome::Disabled => println!("state: disabled in configuration"),
        LoadOutcome::Missing => println!("state: empty"),
        LoadOutcome::Discarded => println!("state: unusable, ignored until the next run replaces it"),
        LoadOutcome::Loaded => {
            if let Some(cache) = store.cache() {
                println!("state: ok (schema version {})", cache.version);
                println!("created: {}", cache.created_at.to_rfc3339());
                println!("updated: {}", cache.updated_at.to_rfc3339());
                println!("blocks: {}", cache.blocks.len());
                for (name, entry) in &cache.blocks {
                    let passed = entry
                        .validator_results
                        .values()
                        .filter(|r| r.passed)
                        .count();
                    println!(
                        "  {name}: {} file(s), {}/{} validator(s) passed, last run {}",
                        entry.files.len(),
                        passed,
                        entry.validator_results.len(),
                        entry.last_run_id
                    );
                }
                let stale = cache
                    .blocks
                    .keys()
                    .filter(|name| !loaded.config.blocks.contains_key(*name))
                    .count();
                if stale > 0 && !global.quiet {
                    eprintln!("warning: {stale} cached block(s) are no longer configured");
                }
            }
        }
    }
    Ok(0)
}

//! `tessera clear`: delete the cache file.

use tessera_cache::CacheStore;

use crate::project::resolve_project_root;
use crate::GlobalArgs;

/// Runs the `tessera clear` command. Returns exit code 0, also when there
/// was nothing to delete.
pub fn run(global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let project_dir = resolve_project_root(global)?;
    let loaded = tessera_config::load_config(&project_dir)?;

    // Force the store on so a cache left over from before caching was
    // disabled can still be removed.
    let mut settings = loaded.config.cache.clone();
    settings.enabled = true;
    let mut store = CacheStore::load(&project_dir, &settings);
    let removed = store.clear();

    if !global.quiet {
        if removed {
            eprintln!("     Removed {}", store.path().display());
        } else {
            eprintln!("   Nothing to remove at {}", store.path().display());
        }
    }
    Ok(0)
}

//! Project root discovery shared by all subcommands.

use std::path::{Path, PathBuf};

use tessera_config::CONFIG_FILE;

use crate::GlobalArgs;

/// Finds the project root by walking up from `start` looking for `tessera.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(CONFIG_FILE).is_file() {
            return Ok(dir);
        }
        if !dir.pop() {
            return Err(format!(
                "could not find {CONFIG_FILE} in {} or any parent directory",
                start.display()
            )
            .into());
        }
    }
}

/// Resolves the project root from `--config`, or by searching upward from
/// the current directory.
///
/// `--config` may name either the configuration file or the directory
/// containing it.
pub fn resolve_project_root(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    if let Some(ref config_path) = global.config {
        let p = PathBuf::from(config_path);
        if p.is_file() {
            Ok(p.parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")))
        } else {
            Ok(p)
        }
    } else {
        find_project_root(&std::env::current_dir()?)
    }
}

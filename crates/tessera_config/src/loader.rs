//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::ProjectConfig;
use std::collections::HashSet;
use std::path::Path;

/// File name of the project configuration at the project root.
pub const CONFIG_FILE: &str = "tessera.toml";

/// A validated configuration together with the document it came from.
///
/// The typed view drives behavior; the parsed `document` is what the
/// revalidation engine fingerprints, so keys the typed view ignores still
/// count as configuration changes.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Strongly-typed configuration.
    pub config: ProjectConfig,
    /// The parsed document, key for key.
    pub document: toml::Table,
}

/// Loads and validates `tessera.toml` from a project directory.
pub fn load_config(project_dir: &Path) -> Result<LoadedConfig, ConfigError> {
    let config_path = project_dir.join(CONFIG_FILE);
    let content = std::fs::read_to_string(&config_path)?;
    load_config_from_str(&content)
}

/// Parses and validates a `tessera.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<LoadedConfig, ConfigError> {
    let document: toml::Table =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    let config: ProjectConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(LoadedConfig { config, document })
}

/// Validates that required fields are present and values are consistent.
fn validate_config(config: &ProjectConfig) -> Result<(), ConfigError> {
    if config.project.name.is_empty() {
        return Err(ConfigError::MissingField("project.name".to_string()));
    }

    for (name, block) in &config.blocks {
        if block.path.is_empty() {
            return Err(ConfigError::MissingField(format!("blocks.{name}.path")));
        }
        if Path::new(&block.path).is_absolute() {
            return Err(ConfigError::ValidationError(format!(
                "block '{name}' path must be relative to the project root, got '{}'",
                block.path
            )));
        }
    }

    let mut seen = HashSet::new();
    for id in &config.validators.enabled {
        if id.is_empty() {
            return Err(ConfigError::ValidationError(
                "validator identifiers must not be empty".to_string(),
            ));
        }
        if !seen.insert(id.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate validator '{id}'"
            )));
        }
    }

    if config.cache.dir.is_empty() {
        return Err(ConfigError::MissingField("cache.dir".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValidatorCategory;

    #[test]
    fn parse_minimal_config() {
        let toml = r#"
[project]
name = "shop"
"#;
        let loaded = load_config_from_str(toml).unwrap();
        assert_eq!(loaded.config.project.name, "shop");
        assert!(loaded.config.blocks.is_empty());
        assert_eq!(
            loaded.config.validators.enabled,
            vec!["schema", "shape", "semantic"]
        );
        assert!(loaded.config.cache.enabled);
        assert_eq!(loaded.config.cache.dir, ".tessera");
        assert!(loaded.document.contains_key("project"));
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[project]
name = "shop"
version = "1.2.0"
description = "Online shop"

[philosophy]
principles = ["small blocks", "explicit contracts"]

[domain]
entities = ["Order", "Customer"]

[ai]
provider = "local"
model = "reviewer-large"

[rules]
max_file_lines = 400

[validators]
enabled = ["schema", "semantic", "licence-scan"]

[validators.categories]
licence-scan = "always_run"

[blocks.orders]
path = "blocks/orders"
description = "Order lifecycle"
kind = "service"
inputs = ["Cart"]
outputs = ["Order"]

[blocks.orders.rules]
no_direct_db = true

[cache]
enabled = false
dir = ".cache/tessera"
"#;
        let loaded = load_config_from_str(toml).unwrap();
        let config = &loaded.config;
        assert_eq!(config.project.version, "1.2.0");
        assert!(config.philosophy.is_some());
        assert!(config.domain.is_some());
        assert!(config.ai.is_some());
        assert!(config.rules.is_some());
        assert_eq!(config.validators.enabled.len(), 3);
        assert_eq!(
            config.validators.categories["licence-scan"],
            ValidatorCategory::AlwaysRun
        );
        let orders = &config.blocks["orders"];
        assert_eq!(orders.path, "blocks/orders");
        assert_eq!(orders.kind.as_deref(), Some("service"));
        assert!(orders.inputs.is_some());
        assert!(orders.rules.as_ref().unwrap().contains_key("no_direct_db"));
        assert!(!config.cache.enabled);
        assert_eq!(config.cache.dir, ".cache/tessera");
        assert!(loaded.document.contains_key("blocks"));
    }

    #[test]
    fn missing_name_errors() {
        let err = load_config_from_str("[project]\nname = \"\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    fn missing_block_path_errors() {
        let toml = r#"
[project]
name = "shop"

[blocks.orders]
path = ""
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ref f) if f == "blocks.orders.path"));
    }

    #[test]
    fn absolute_block_path_errors() {
        let toml = r#"
[project]
name = "shop"

[blocks.orders]
path = "/srv/orders"
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn duplicate_validator_errors() {
        let toml = r#"
[project]
name = "shop"

[validators]
enabled = ["schema", "schema"]
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn unknown_category_errors() {
        let toml = r#"
[project]
name = "shop"

[validators.categories]
custom = "sometimes"
"#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn invalid_toml_errors() {
        let err = load_config_from_str("this is not valid toml {{{}}}").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }

    #[test]
    fn load_from_project_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "[project]\nname = \"shop\"\n").unwrap();
        let loaded = load_config(dir.path()).unwrap();
        assert_eq!(loaded.config.project.name, "shop");
    }

    #[test]
    fn io_error_from_nonexistent_dir() {
        let err = load_config(Path::new("/nonexistent/dir")).unwrap_err();
        assert!(matches!(err, ConfigError::IoError(_)));
    }
}

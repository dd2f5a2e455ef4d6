use crate::archive::ListOptions;
use crate::error::{AppError, Result};
use crate::filter::IgnoreRules;
use crate::render::{DEFAULT_MAX_LINES, OverLimit, RenderPolicy};
use crate::tree::{SortOrder, TreeOptions};
use byte_unit::Byte;
use log;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub const DEFAULT_CONFIG_FILENAME: &str = ".dir2txt.toml";
pub const DEFAULT_MAX_FILE_SIZE: &str = "10MiB";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub filters: FiltersConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub archives: ArchivesConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct GeneralConfig {
    #[serde(default = "default_true")]
    pub parallel: bool,
    #[serde(default)]
    pub sort: SortOrder,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FiltersConfig {
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default = "default_true")]
    pub use_builtin: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RenderConfig {
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    #[serde(default)]
    pub over_limit: OverLimit,
    /// Human readable size such as `10MiB`; empty disables the size check.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ArchivesConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default)]
    pub description: Option<String>,
}

fn default_true() -> bool {
    true
}
fn default_max_lines() -> usize {
    DEFAULT_MAX_LINES
}
fn default_max_file_size() -> Option<String> {
    Some(DEFAULT_MAX_FILE_SIZE.to_string())
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            parallel: true,
            sort: SortOrder::default(),
        }
    }
}

impl Default for FiltersConfig {
    fn default() -> Self {
        FiltersConfig {
            ignore: Vec::new(),
            use_builtin: true,
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        RenderConfig {
            max_lines: DEFAULT_MAX_LINES,
            over_limit: OverLimit::default(),
            max_file_size: default_max_file_size(),
        }
    }
}

impl Default for ArchivesConfig {
    fn default() -> Self {
        ArchivesConfig { enabled: true }
    }
}

impl Config {
    /// Expands `~` and canonicalizes the root; a missing root is fatal.
    pub fn determine_root(raw: &Path) -> Result<PathBuf> {
        let expanded = PathBuf::from(shellexpand::tilde(&raw.to_string_lossy()).as_ref());
        expanded.canonicalize().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AppError::RootNotFound(expanded.clone())
            } else {
                AppError::FileRead {
                    path: expanded.clone(),
                    source: e,
                }
            }
        })
    }

    pub fn resolve_config_path(
        root: &Path,
        cli_config_file: Option<&Path>,
        cli_disable_config: bool,
    ) -> Result<Option<PathBuf>> {
        if cli_disable_config {
            log::debug!("Config file loading disabled via CLI flag.");
            return Ok(None);
        }
        match cli_config_file {
            Some(p) => {
                let path = PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref());
                if !path.is_file() {
                    return Err(AppError::Config(format!(
                        "Specified config file not found at path: {}",
                        path.display()
                    )));
                }
                log::debug!("Using specified config file path: {}", path.display());
                Ok(Some(path))
            }
            None => {
                let default_path = root.join(DEFAULT_CONFIG_FILENAME);
                if default_path.is_file() {
                    log::debug!("Using default config file path: {}", default_path.display());
                    Ok(Some(default_path))
                } else {
                    log::debug!("No config file found at: {}", default_path.display());
                    Ok(None)
                }
            }
        }
    }

    pub fn load_from_path(config_path: &Path) -> Result<Self> {
        log::info!("Loading configuration from: {}", config_path.display());
        let toml_content = fs::read_to_string(config_path).map_err(|e| AppError::FileRead {
            path: config_path.to_path_buf(),
            source: e,
        })?;
        toml::from_str::<Config>(&toml_content).map_err(|e| {
            AppError::TomlParse(format!(
                "Error parsing config file '{}': {}. Check TOML syntax and structure.",
                config_path.display(),
                e
            ))
        })
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn ignore_rules(&self) -> IgnoreRules {
        let rules = IgnoreRules::new(&self.filters.ignore);
        if self.filters.use_builtin {
            rules.with_builtin()
        } else {
            rules
        }
    }

    pub fn render_policy(&self) -> Result<RenderPolicy> {
        let max_file_size = match self.render.max_file_size.as_deref() {
            Some(raw) => parse_size(raw)?,
            None => None,
        };
        Ok(RenderPolicy {
            max_lines: self.render.max_lines,
            over_limit: self.render.over_limit,
            max_file_size,
        })
    }

    /// Archive members over the size limit are not kept in memory while
    /// listing; they would be cut or skipped anyway.
    pub fn tree_options(&self, excluded_paths: Vec<PathBuf>) -> Result<TreeOptions> {
        Ok(TreeOptions {
            sort: self.general.sort,
            read_archives: self.archives.enabled,
            excluded_paths,
            archive_listing: ListOptions {
                buffer_limit: self.render_policy()?.max_file_size,
            },
        })
    }
}

/// Parses sizes like `10MiB` or `512kb`. Empty, `0` and `none` disable the limit.
pub fn parse_size(raw: &str) -> Result<Option<u64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "0" || trimmed.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let byte = Byte::from_str(trimmed).map_err(|e| {
        AppError::InvalidArgument(format!(
            "Invalid size '{}': {}. Use KB, MiB, etc.",
            trimmed, e
        ))
    })?;
    Ok(Some(byte.as_u64()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert!(config.general.parallel);
        assert_eq!(config.general.sort, SortOrder::DirsFirst);
        assert!(config.filters.use_builtin);
        assert!(config.archives.enabled);
        let policy = config.render_policy().unwrap();
        assert_eq!(policy.max_lines, 1000);
        assert_eq!(policy.over_limit, OverLimit::Truncate);
        assert_eq!(policy.max_file_size, Some(10 * 1024 * 1024));
    }

    #[test]
    fn archive_buffering_follows_size_limit() {
        let mut config = Config::default();
        config.render.max_file_size = Some("1KiB".to_string());
        let options = config.tree_options(vec![PathBuf::from("/tmp/out.txt")]).unwrap();
        assert_eq!(options.archive_listing.buffer_limit, Some(1024));
        assert_eq!(options.excluded_paths, vec![PathBuf::from("/tmp/out.txt")]);

        config.render.max_file_size = Some("bogus".to_string());
        assert!(config.tree_options(Vec::new()).is_err());
    }

    #[test]
    fn parses_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [general]
            sort = "files-first"

            [filters]
            ignore = ["/.venv/", ".pyc"]
            use_builtin = false

            [render]
            max_lines = 100
            over_limit = "skip"
            max_file_size = ""
            "#,
        )
        .unwrap();
        assert_eq!(config.general.sort, SortOrder::FilesFirst);
        assert!(config.general.parallel);
        let policy = config.render_policy().unwrap();
        assert_eq!(policy.max_lines, 100);
        assert_eq!(policy.over_limit, OverLimit::Skip);
        assert_eq!(policy.max_file_size, None);
        let rules = config.ignore_rules();
        assert_eq!(rules.len(), 2);
        assert!(!rules.is_ignored(".git/HEAD"));
    }

    #[test]
    fn rejects_unknown_fields() {
        assert!(toml::from_str::<Config>("[render]\nmax_line = 3\n").is_err());
    }

    #[test]
    fn builtin_ignores_are_added_by_default() {
        let rules = Config::default().ignore_rules();
        assert!(rules.is_ignored(".git/objects/ab"));
    }

    #[test]
    fn size_parsing() {
        assert_eq!(parse_size("1KiB").unwrap(), Some(1024));
        assert_eq!(parse_size("2MB").unwrap(), Some(2_000_000));
        assert_eq!(parse_size("none").unwrap(), None);
        assert_eq!(parse_size("  ").unwrap(), None);
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn resolves_default_and_explicit_config_paths() {
        let dir = TempDir::new().unwrap();
        assert_eq!(Config::resolve_config_path(dir.path(), None, false).unwrap(), None);

        let default_path = dir.path().join(DEFAULT_CONFIG_FILENAME);
        fs::write(&default_path, "[general]\nparallel = false\n").unwrap();
        let found = Config::resolve_config_path(dir.path(), None, false).unwrap();
        assert_eq!(found.as_deref(), Some(default_path.as_path()));
        assert!(!Config::load_from_path(&default_path).unwrap().general.parallel);

        assert_eq!(Config::resolve_config_path(dir.path(), None, true).unwrap(), None);
        assert!(
            Config::resolve_config_path(
                dir.path(),
                Some(dir.path().join("missing.toml").as_path()),
                false
            )
                .is_err()
        );
    }

    #[test]
    fn bad_toml_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[render\n").unwrap();
        let err = Config::load_from_path(&path).unwrap_err();
        assert!(matches!(err, AppError::TomlParse(msg) if msg.contains("bad.toml")));
    }

    #[test]
    fn determine_root_canonicalizes_or_fails() {
        let dir = TempDir::new().unwrap();
        let root = Config::determine_root(dir.path()).unwrap();
        assert!(root.is_absolute());
        assert!(matches!(
            Config::determine_root(&dir.path().join("missing")),
            Err(AppError::RootNotFound(_))
        ));
    }

    #[test]
    fn round_trips_through_toml_text() {
        let mut config = Config::default();
        config.filters.ignore.push("/target/".to_string());
        let text = config.to_toml_string().unwrap();
        assert!(text.contains("/target/"));
        assert_eq!(toml::from_str::<Config>(&text).unwrap(), config);
    }
}

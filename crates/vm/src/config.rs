//! Driver configuration, resolved CLI flag > TOML file > environment
//! variable > built-in default -- a builder-plus-override shape layered
//! for a long-running process rather than a one-shot compile.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "raven.toml";
const MUDLIB_ENV_VAR: &str = "RAVEN_MUDLIB";

/// Resolved configuration for one driver run.
#[derive(Debug, Clone)]
pub struct RavenConfig {
    pub mudlib_root: PathBuf,
    pub gc_interval_ticks: u32,
    pub stack_arena_bytes: usize,
    pub heartbeat_interval_ticks: u32,
    pub strand_registry_size: usize,
}

impl Default for RavenConfig {
    fn default() -> Self {
        RavenConfig {
            mudlib_root: PathBuf::from("."),
            gc_interval_ticks: 100,
            stack_arena_bytes: 1 << 20,
            heartbeat_interval_ticks: 20,
            strand_registry_size: 64,
        }
    }
}

/// The subset of fields a TOML config file may override. Any field not
/// present in the file falls through to the built-in default (or the CLI
/// flag, if one was supplied and takes precedence over the file).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub mudlib_root: Option<PathBuf>,
    pub gc_interval_ticks: Option<u32>,
    pub stack_arena_bytes: Option<usize>,
    pub heartbeat_interval_ticks: Option<u32>,
    pub strand_registry_size: Option<usize>,
}

impl ConfigFile {
    pub fn parse(toml_text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_text)
    }
}

/// CLI flags that may override everything below them in precedence.
/// `raven-cli` constructs this from parsed `clap` args; fields left `None`
/// fall through to the file/env/default layers.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub mudlib_root: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

impl RavenConfig {
    /// Resolve a config from (in descending precedence): `cli.mudlib_root`,
    /// the TOML file at `cli.config_path` (or `./raven.toml` if that file
    /// exists and no explicit path was given), `RAVEN_MUDLIB` (mudlib_root
    /// only), and built-in defaults.
    pub fn resolve(cli: &CliOverrides) -> Self {
        let mut cfg = RavenConfig::default();

        if let Ok(mudlib) = env::var(MUDLIB_ENV_VAR) {
            cfg.mudlib_root = PathBuf::from(mudlib);
        }

        let config_path = cli
            .config_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        if let Some(file) = read_config_file(&config_path) {
            cfg.apply_file(file);
        }

        if let Some(root) = &cli.mudlib_root {
            cfg.mudlib_root = root.clone();
        }

        cfg
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(v) = file.mudlib_root {
            self.mudlib_root = v;
        }
        if let Some(v) = file.gc_interval_ticks {
            self.gc_interval_ticks = v;
        }
        if let Some(v) = file.stack_arena_bytes {
            self.stack_arena_bytes = v;
        }
        if let Some(v) = file.heartbeat_interval_ticks {
            self.heartbeat_interval_ticks = v;
        }
        if let Some(v) = file.strand_registry_size {
            self.strand_registry_size = v;
        }
    }
}

fn read_config_file(path: &Path) -> Option<ConfigFile> {
    let text = std::fs::read_to_string(path).ok()?;
    match ConfigFile::parse(&text) {
        Ok(f) => Some(f),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::NamedTempFile;

    #[test]
    fn default_config_has_sane_values() {
        let cfg = RavenConfig::default();
        assert_eq!(cfg.gc_interval_ticks, 100);
        assert!(cfg.stack_arena_bytes > 0);
    }

    #[test]
    fn config_file_overrides_default() {
        let file = ConfigFile::parse("gc_interval_ticks = 50\n").unwrap();
        let mut cfg = RavenConfig::default();
        cfg.apply_file(file);
        assert_eq!(cfg.gc_interval_ticks, 50);
        assert_eq!(cfg.stack_arena_bytes, RavenConfig::default().stack_arena_bytes);
    }

    #[test]
    #[serial]
    fn env_var_fills_mudlib_root_below_cli_precedence() {
        std::env::set_var(MUDLIB_ENV_VAR, "/var/mudlib");
        let cli = CliOverrides::default();
        let cfg = RavenConfig::resolve(&cli);
        std::env::remove_var(MUDLIB_ENV_VAR);
        assert_eq!(cfg.mudlib_root, PathBuf::from("/var/mudlib"));
    }

    #[test]
    #[serial]
    fn cli_flag_wins_over_everything() {
        std::env::set_var(MUDLIB_ENV_VAR, "/var/mudlib");
        let cli = CliOverrides {
            mudlib_root: Some(PathBuf::from("/opt/mudlib")),
            config_path: None,
        };
        let cfg = RavenConfig::resolve(&cli);
        std::env::remove_var(MUDLIB_ENV_VAR);
        assert_eq!(cfg.mudlib_root, PathBuf::from("/opt/mudlib"));
    }

    #[test]
    fn explicit_config_path_is_read() {
        let mut file = NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"heartbeat_interval_ticks = 7\n").unwrap();
        let cli = CliOverrides {
            mudlib_root: None,
            config_path: Some(file.path().to_path_buf()),
        };
        let cfg = RavenConfig::resolve(&cli);
        assert_eq!(cfg.heartbeat_interval_ticks, 7);
    }
}

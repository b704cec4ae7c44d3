//! Layered loading of [`RelayConfig`].
//!
//! Later sources override earlier ones:
//!
//! 1. built-in defaults
//! 2. configuration merged with [`ConfigLoader::merge`]
//! 3. the profile file, e.g. `relay.production.toml`
//! 4. the main file, `relay.toml` or `config.toml` (`.yaml`/`.yml` with
//!    the `yaml-config` feature)
//! 5. `RELAY_*` environment variables, nested with `__`, e.g.
//!    `RELAY_PROCESSORS__GIFT_CARDS__MAX_WORKERS=8`
//!
//! Files are searched in the configured search paths, or in the current
//! directory and the user configuration directory when none are given.
//! An explicit [`ConfigLoader::file`] skips the search and must exist.
//!
//! ```rust,ignore
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .search_path("/etc/relay")
//!     .load()?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "toml-config", feature = "yaml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::RelayConfig;

const ENV_PREFIX: &str = "RELAY_";
const FILE_STEMS: [&str; 2] = ["relay", "config"];

/// Selects the profile file layered under the main file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name; `dev` and `prod` are accepted.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "development" | "dev" => Self::Development,
            "production" | "prod" => Self::Production,
            other => Self::Custom(other.to_string()),
        }
    }

    /// The profile named by `RELAY_PROFILE`, if set.
    pub fn from_env() -> Self {
        std::env::var(format!("{ENV_PREFIX}PROFILE"))
            .map(|name| Self::parse(&name))
            .unwrap_or_default()
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configuration file format enabled by a cargo feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileFormat {
    #[cfg(feature = "toml-config")]
    Toml,
    #[cfg(feature = "yaml-config")]
    Yaml,
}

impl FileFormat {
    #[allow(unused_mut)]
    fn enabled() -> Vec<Self> {
        let mut formats = Vec::new();
        #[cfg(feature = "toml-config")]
        formats.push(Self::Toml);
        #[cfg(feature = "yaml-config")]
        formats.push(Self::Yaml);
        formats
    }

    fn extensions(self) -> &'static [&'static str] {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => &["toml"],
            #[cfg(feature = "yaml-config")]
            Self::Yaml => &["yaml", "yml"],
        }
    }

    fn of(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?;
        Self::enabled()
            .into_iter()
            .find(|format| format.extensions().contains(&extension))
    }

    #[allow(unused_variables)]
    fn layer(self, figment: Figment, path: &Path) -> Figment {
        match self {
            #[cfg(feature = "toml-config")]
            Self::Toml => figment.merge(Toml::file(path)),
            #[cfg(feature = "yaml-config")]
            Self::Yaml => figment.merge(Yaml::file(path)),
        }
    }
}

/// Builds a [`RelayConfig`] from defaults, files and the environment.
pub struct ConfigLoader {
    overrides: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    env: bool,
    file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// A loader for the `RELAY_PROFILE` profile, reading the environment.
    pub fn new() -> Self {
        Self {
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            env: true,
            file: None,
        }
    }

    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Profile::parse(&profile.into());
        self
    }

    pub fn search_path(mut self, path: impl AsRef<Path>) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(dir) => self.search_path(dir),
            Err(_) => self,
        }
    }

    /// Searches `<user config dir>/relay`.
    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.search_path(dir.join("relay")),
            None => self,
        }
    }

    /// Loads exactly this file instead of searching.
    pub fn file(mut self, path: impl AsRef<Path>) -> Self {
        self.file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.env = false;
        self
    }

    /// Layers `config` over the defaults. Files and the environment still
    /// take precedence.
    pub fn merge(mut self, config: RelayConfig) -> Self {
        self.overrides = self.overrides.merge(Serialized::defaults(config));
        self
    }

    pub fn load(self) -> ConfigResult<RelayConfig> {
        let mut figment = Figment::from(Serialized::defaults(RelayConfig::default()))
            .merge(self.overrides.clone());

        for (path, format) in self.files()? {
            info!(path = %path.display(), "Loading configuration file");
            figment = format.layer(figment, &path);
        }
        if self.env {
            figment = figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["PROFILE"]).split("__"));
        }

        let config: RelayConfig = figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;
        debug!(
            profile = %self.profile,
            processors = config.processors.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// The files to layer, lowest precedence first.
    fn files(&self) -> ConfigResult<Vec<(PathBuf, FileFormat)>> {
        if let Some(path) = &self.file {
            if !path.exists() {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
            let format =
                FileFormat::of(path).ok_or_else(|| ConfigError::UnsupportedFormat(path.clone()))?;
            return Ok(vec![(path.clone(), format)]);
        }

        let roots = self.search_roots();
        let mut files = Vec::new();
        for format in FileFormat::enabled() {
            files.extend(self.discover(&roots, format));
        }
        if files.is_empty() {
            warn!(searched = roots.len(), "No configuration file found, using defaults");
        }
        Ok(files)
    }

    /// Walks the search paths for `format`, collecting profile files and
    /// stopping at the first main file.
    fn discover(&self, roots: &[PathBuf], format: FileFormat) -> Vec<(PathBuf, FileFormat)> {
        let mut found = Vec::new();
        for dir in roots {
            for stem in FILE_STEMS {
                for extension in format.extensions() {
                    let profile = dir.join(format!("{stem}.{}.{extension}", self.profile));
                    if profile.exists() {
                        debug!(path = %profile.display(), "Found profile configuration");
                        found.push((profile, format));
                    }
                    let main = dir.join(format!("{stem}.{extension}"));
                    if main.exists() {
                        found.push((main, format));
                        return found;
                    }
                }
            }
        }
        found
    }

    fn search_roots(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        std::env::current_dir()
            .ok()
            .into_iter()
            .chain(dirs::config_dir().map(|dir| dir.join("relay")))
            .collect()
    }
}

/// Loads the configuration from the default locations.
pub fn load_config() -> ConfigResult<RelayConfig> {
    ConfigLoader::new().load()
}

/// Loads the configuration from `path`, with environment overrides.
pub fn load_config_from_file(path: impl AsRef<Path>) -> ConfigResult<RelayConfig> {
    ConfigLoader::new().file(path).load()
}

#[cfg(test)]
mod tests {
    use figment::Jail;
    use relay_core::DuplicateResolution;

    use super::*;

    #[test]
    fn test_defaults_without_files() {
        Jail::expect_with(|jail| {
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.logging.level.as_str(), "info");
            assert!(config.processors.is_empty());
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides() {
        Jail::expect_with(|jail| {
            jail.set_env("RELAY_QUERY_BUS__HANDLER_TIMEOUT_MS", "250");
            jail.set_env("RELAY_COMMAND_BUS__DUPLICATE_RESOLUTION", "replace");
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .load()
                .map_err(|e| e.to_string())?;
            assert_eq!(config.query_bus.handler_timeout_ms, 250);
            assert_eq!(config.command_bus.duplicate_resolution, DuplicateResolution::Replace);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_profile_file_under_main_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "relay.production.toml",
                r#"
                    [event_store]
                    blacklisting = false
                    suppression_refresh_ms = 100
                "#,
            )?;
            jail.create_file(
                "relay.toml",
                r#"
                    [event_store]
                    suppression_refresh_ms = 2000

                    [processors.gift-cards]
                    initial_segment_count = 2
                "#,
            )?;
            let config = ConfigLoader::new()
                .profile("prod")
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;
            assert!(!config.event_store.blacklisting);
            assert_eq!(config.event_store.suppression_refresh_ms, 2000);
            assert_eq!(config.processor("gift-cards").initial_segment_count, 2);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_explicit_file_with_unknown_extension() {
        Jail::expect_with(|jail| {
            jail.create_file("relay.ini", "level = debug")?;
            let result = ConfigLoader::new()
                .file(jail.directory().join("relay.ini"))
                .without_env()
                .load();
            assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
            Ok(())
        });
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::new().file("does-not-exist.toml").load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_profile_parse() {
        assert_eq!(Profile::parse("prod"), Profile::Production);
        assert_eq!(Profile::parse("Staging"), Profile::Custom("staging".into()));
    }
}

//! Configuration for the build pipeline
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (hypha.toml)
//! - Environment variables (HYPHA__*)
//!
//! ## Example config file (hypha.toml):
//! ```toml
//! [classpath]
//! roots = ["./conf", "/etc/app"]
//! include_builtin = true
//!
//! [bootstrap]
//! descriptor_path = "META-INF/resource/hypha/register.xml"
//!
//! [logging]
//! filter = "hypha_config=debug"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::loader::{ChainLoader, ClasspathLoader, EmbeddedLoader, LoaderHandle};
use crate::namespace::{DescriptorBootstrap, HandlerCatalog, DEFAULT_DESCRIPTOR_PATH};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HyphaConfig {
    /// Lookup mechanism settings
    #[serde(default)]
    pub classpath: ClasspathConfig,

    /// Namespace bootstrap settings
    #[serde(default)]
    pub bootstrap: BootstrapConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Classpath configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClasspathConfig {
    /// Directories searched for classpath names, in order
    #[serde(default = "default_roots")]
    pub roots: Vec<PathBuf>,

    /// Search the resources bundled with the crate after the roots
    #[serde(default = "default_true")]
    pub include_builtin: bool,
}

/// Bootstrap configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Relative path of the namespace descriptors
    #[serde(default = "default_descriptor_path")]
    pub descriptor_path: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is not set
    #[serde(default = "default_filter")]
    pub filter: String,
}

// Default value functions
fn default_roots() -> Vec<PathBuf> {
    vec![PathBuf::from(".")]
}

fn default_true() -> bool {
    true
}

fn default_descriptor_path() -> String {
    DEFAULT_DESCRIPTOR_PATH.to_string()
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for ClasspathConfig {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            include_builtin: true,
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            descriptor_path: default_descriptor_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl HyphaConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["hypha.toml", ".hypha.toml", "config/hypha.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("dev", "familiar", "hypha") {
            let xdg_config = config_dir.config_dir().join("hypha.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // HYPHA__SECTION__KEY
        builder = builder.add_source(
            Environment::with_prefix("HYPHA")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("classpath.roots")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Classpath roots with relative entries resolved against the working directory
    pub fn classpath_roots(&self) -> Vec<PathBuf> {
        self.classpath
            .roots
            .iter()
            .map(|p| {
                if p.is_absolute() {
                    p.clone()
                } else {
                    std::env::current_dir().unwrap_or_default().join(p)
                }
            })
            .collect()
    }

    /// The lookup mechanism described by this configuration
    pub fn loader(&self) -> LoaderHandle {
        let mut chain = ChainLoader::new().with(ClasspathLoader::new(self.classpath_roots()));
        if self.classpath.include_builtin {
            chain = chain.with(EmbeddedLoader::builtin());
        }
        Arc::new(chain)
    }

    /// The namespace bootstrap described by this configuration
    pub fn bootstrap(&self) -> DescriptorBootstrap {
        DescriptorBootstrap::new(self.bootstrap.descriptor_path.clone(), HandlerCatalog::builtin())
    }
}

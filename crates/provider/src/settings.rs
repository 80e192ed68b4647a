//! Layered runtime configuration for the provider builders.
//!
//! Defaults, then a TOML file in the platform config directory, then
//! `SLIDEMAP_` environment variables, later layers winning.

use crate::create::CreateOptions;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::Path;

const ENV_PREFIX: &str = "SLIDEMAP_";
const CONFIG_FILE: &str = "slidemap.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub ignore_broken: bool,
    pub resume: bool,
    pub checksum: bool,
    pub progress: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self { ignore_broken: true, resume: false, checksum: true, progress: false }
    }
}

impl Settings {
    /// Resolve settings from the platform config directory and environment.
    pub fn load() -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(dirs) = directories::ProjectDirs::from("", "", "slidemap") {
            figment = figment.merge(Toml::file(dirs.config_dir().join(CONFIG_FILE)));
        }
        figment.merge(Env::prefixed(ENV_PREFIX)).extract().or_raise(|| ErrorKind::Config)
    }

    /// Resolve settings from an explicit TOML file and environment.
    pub fn load_from(path: &Path) -> Result<Self> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
            .or_raise(|| ErrorKind::Config)
    }

    pub fn into_options(self) -> CreateOptions {
        CreateOptions {
            ignore_broken: self.ignore_broken,
            resume: self.resume,
            checksum: self.checksum,
            progress: self.progress,
            ..CreateOptions::default()
        }
    }
}

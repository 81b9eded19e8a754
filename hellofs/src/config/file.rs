//! INI configuration file.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::{Ini, Properties};

use super::{config_file_path, ConfigError, ConfigResult, SessionConfig};
use crate::mount::MountOptions;

/// `[mount]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSettings {
    pub fs_name: String,
    pub allow_other: bool,
    pub fusermount_fallback: bool,
    /// Extra mount options.
    pub options: Vec<String>,
}

impl Default for MountSettings {
    fn default() -> Self {
        let defaults = MountOptions::default();
        Self {
            fs_name: defaults.fs_name,
            allow_other: defaults.allow_other,
            fusermount_fallback: defaults.fusermount_fallback,
            options: defaults.extra,
        }
    }
}

/// `[session]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub max_write: u32,
    pub max_readahead: u32,
    pub max_background: u16,
    pub congestion_threshold: u16,
    pub entry_ttl_ms: u64,
    pub attr_ttl_ms: u64,
    pub shutdown_grace_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let defaults = SessionConfig::default();
        Self {
            max_write: defaults.max_write,
            max_readahead: defaults.max_readahead,
            max_background: defaults.max_background,
            congestion_threshold: defaults.congestion_threshold,
            entry_ttl_ms: defaults.entry_ttl.as_millis() as u64,
            attr_ttl_ms: defaults.attr_ttl.as_millis() as u64,
            shutdown_grace_secs: defaults.shutdown_grace.as_secs(),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    /// Default filter directive (`RUST_LOG` still wins).
    pub level: String,
    /// Log file; logs go to stderr only when unset.
    pub file: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Parsed `config.ini`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub mount: MountSettings,
    pub session: SessionSettings,
    pub logging: LoggingSettings,
}

impl ConfigFile {
    /// Load from the default location.
    ///
    /// A missing file yields defaults.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&config_file_path())
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    /// Parse INI text.
    pub fn parse(text: &str) -> ConfigResult<Self> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse {
            path: PathBuf::from("<string>"),
            message: e.to_string(),
        })?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(section) = ini.section(Some("mount")) {
            let mount = &mut config.mount;
            if let Some(value) = section.get("fs_name") {
                mount.fs_name = value.trim().to_string();
            }
            read(section, "mount", "allow_other", &mut mount.allow_other)?;
            read(
                section,
                "mount",
                "fusermount_fallback",
                &mut mount.fusermount_fallback,
            )?;
            if let Some(value) = section.get("options") {
                mount.options = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
            }
        }

        if let Some(section) = ini.section(Some("session")) {
            let session = &mut config.session;
            read(section, "session", "max_write", &mut session.max_write)?;
            read(section, "session", "max_readahead", &mut session.max_readahead)?;
            read(section, "session", "max_background", &mut session.max_background)?;
            read(
                section,
                "session",
                "congestion_threshold",
                &mut session.congestion_threshold,
            )?;
            read(section, "session", "entry_ttl_ms", &mut session.entry_ttl_ms)?;
            read(section, "session", "attr_ttl_ms", &mut session.attr_ttl_ms)?;
            read(
                section,
                "session",
                "shutdown_grace_secs",
                &mut session.shutdown_grace_secs,
            )?;
        }

        if let Some(section) = ini.section(Some("logging")) {
            if let Some(value) = section.get("level") {
                config.logging.level = value.trim().to_string();
            }
            if let Some(value) = section.get("file") {
                let value = value.trim();
                config.logging.file = (!value.is_empty()).then(|| PathBuf::from(value));
            }
        }

        Ok(config)
    }

    /// Save to the default location, creating the directory if needed.
    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(&config_file_path())
    }

    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.to_ini().write_to_file(path)?;
        Ok(())
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();
        ini.with_section(Some("mount"))
            .set("fs_name", self.mount.fs_name.as_str())
            .set("allow_other", self.mount.allow_other.to_string())
            .set(
                "fusermount_fallback",
                self.mount.fusermount_fallback.to_string(),
            )
            .set("options", self.mount.options.join(","));
        ini.with_section(Some("session"))
            .set("max_write", self.session.max_write.to_string())
            .set("max_readahead", self.session.max_readahead.to_string())
            .set("max_background", self.session.max_background.to_string())
            .set(
                "congestion_threshold",
                self.session.congestion_threshold.to_string(),
            )
            .set("entry_ttl_ms", self.session.entry_ttl_ms.to_string())
            .set("attr_ttl_ms", self.session.attr_ttl_ms.to_string())
            .set(
                "shutdown_grace_secs",
                self.session.shutdown_grace_secs.to_string(),
            );
        let file = self
            .logging
            .file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        ini.with_section(Some("logging"))
            .set("level", self.logging.level.as_str())
            .set("file", file);
        ini
    }

    /// Session tunables described by this file.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new()
            .with_max_write(self.session.max_write)
            .with_max_readahead(self.session.max_readahead)
            .with_max_background(self.session.max_background)
            .with_congestion_threshold(self.session.congestion_threshold)
            .with_entry_ttl(Duration::from_millis(self.session.entry_ttl_ms))
            .with_attr_ttl(Duration::from_millis(self.session.attr_ttl_ms))
            .with_shutdown_grace(Duration::from_secs(self.session.shutdown_grace_secs))
    }

    /// Mount options described by this file.
    pub fn mount_options(&self) -> MountOptions {
        let mut options = MountOptions::new()
            .with_fs_name(self.mount.fs_name.as_str())
            .with_allow_other(self.mount.allow_other)
            .with_fusermount_fallback(self.mount.fusermount_fallback);
        for option in &self.mount.options {
            options = options.with_option(option.as_str());
        }
        options
    }
}

fn read<T: FromStr>(section: &Properties, name: &str, key: &str, target: &mut T) -> ConfigResult<()> {
    if let Some(value) = section.get(key) {
        *target = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue {
                section: name.to_string(),
                key: key.to_string(),
                value: value.to_string(),
            })?;
    }
    Ok(())
}

use std::ops::Deref;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::Deserialize;

/// `[log]` section
#[derive(Debug, Clone, Deserialize)]
pub struct Log {
    #[serde(default = "Log::to_default")]
    pub to: To,
    #[serde(default = "Log::level_default")]
    pub level: Level,
    #[serde(default = "Log::dir_default")]
    pub dir: String,
    #[serde(default = "Log::file_default")]
    pub file: String,
}

impl Default for Log {
    #[inline]
    fn default() -> Self {
        Self {
            to: Self::to_default(),
            level: Self::level_default(),
            dir: Self::dir_default(),
            file: Self::file_default(),
        }
    }
}

impl Log {
    fn to_default() -> To {
        To::Console
    }
    fn level_default() -> Level {
        Level(slog::Level::Info)
    }
    fn dir_default() -> String {
        "/var/log/rretain".into()
    }
    fn file_default() -> String {
        "rretain.log".into()
    }

    /// Full log file path, empty when no file is configured
    #[inline]
    pub fn filename(&self) -> String {
        if self.file.is_empty() {
            return "".into();
        }
        if self.dir.is_empty() {
            return self.file.clone();
        }
        format!("{}/{}", self.dir.trim_end_matches(['/', '\\']), self.file)
    }
}

/// Log destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum To {
    Off,
    File,
    Console,
    Both,
}

impl To {
    #[inline]
    pub fn file(&self) -> bool {
        matches!(self, To::Both | To::File)
    }
    #[inline]
    pub fn console(&self) -> bool {
        matches!(self, To::Both | To::Console)
    }
    #[inline]
    pub fn off(&self) -> bool {
        matches!(self, To::Off)
    }
}

impl FromStr for To {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "off" => Ok(To::Off),
            "file" => Ok(To::File),
            "console" => Ok(To::Console),
            "both" => Ok(To::Both),
            other => Err(format!("unknown log destination \"{other}\", expected off|file|console|both")),
        }
    }
}

impl<'de> Deserialize<'de> for To {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        To::from_str(&String::deserialize(deserializer)?).map_err(de::Error::custom)
    }
}

/// Minimum level written by the logger
#[derive(Debug, Clone, Copy)]
pub struct Level(slog::Level);

impl Level {
    #[inline]
    pub fn inner(&self) -> slog::Level {
        self.0
    }
}

impl Deref for Level {
    type Target = slog::Level;
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Level {
    #[inline]
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level = String::deserialize(deserializer)?;
        slog::Level::from_str(&level)
            .map(Level)
            .map_err(|_e| de::Error::custom(format!("invalid log level \"{level}\"")))
    }
}

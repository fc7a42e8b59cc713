use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_FILE: &str = ".env";
pub const DEFAULT_PORT: u16 = 4000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_YTDLP: &str = "yt-dlp";
pub const DEFAULT_FFMPEG: &str = "ffmpeg";
pub const DEFAULT_PUBLIC_DIR: &str = "web";

/// Values as written in a dotenv-style file or the process environment.
/// Every field is optional so layers can be stacked.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvConfig {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub ytdlp_path: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    pub cookies_file: Option<PathBuf>,
    pub public_dir: Option<PathBuf>,
}

/// Fully resolved settings the gateway runs with.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub port: u16,
    pub host: String,
    pub ytdlp_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub cookies_file: Option<PathBuf>,
    pub public_dir: PathBuf,
}

impl EnvConfig {
    /// Applies one `KEY=VALUE` pair. Unknown keys are ignored; `source` only
    /// feeds error messages.
    fn apply(&mut self, key: &str, value: &str, source: &str) -> Result<()> {
        let value = value.trim().trim_matches('"').trim_matches('\'');
        if value.is_empty() {
            return Ok(());
        }
        match key.trim() {
            "PORT" => {
                let port: u16 = value
                    .parse()
                    .with_context(|| format!("Parsing PORT={value} from {source}"))?;
                self.port = Some(port);
            }
            "HOST" => self.host = Some(value.to_string()),
            "YTDLP_PATH" => self.ytdlp_path = Some(PathBuf::from(value)),
            "FFMPEG_PATH" => self.ffmpeg_path = Some(PathBuf::from(value)),
            "COOKIES_FILE" => self.cookies_file = Some(PathBuf::from(value)),
            "PUBLIC_DIR" => self.public_dir = Some(PathBuf::from(value)),
            _ => {}
        }
        Ok(())
    }

    /// Reads the variables this crate understands through `lookup`, which is
    /// `std::env::var` in production and a map in tests.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        for key in [
            "PORT",
            "HOST",
            "YTDLP_PATH",
            "FFMPEG_PATH",
            "COOKIES_FILE",
            "PUBLIC_DIR",
        ] {
            if let Some(value) = lookup(key) {
                cfg.apply(key, &value, "environment")?;
            }
        }
        Ok(cfg)
    }

    /// Values present in `other` win.
    pub fn overlay(self, other: EnvConfig) -> Self {
        Self {
            port: other.port.or(self.port),
            host: other.host.or(self.host),
            ytdlp_path: other.ytdlp_path.or(self.ytdlp_path),
            ffmpeg_path: other.ffmpeg_path.or(self.ffmpeg_path),
            cookies_file: other.cookies_file.or(self.cookies_file),
            public_dir: other.public_dir.or(self.public_dir),
        }
    }

    pub fn resolve(self) -> GatewayConfig {
        GatewayConfig {
            port: self.port.unwrap_or(DEFAULT_PORT),
            host: self.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            ytdlp_path: self
                .ytdlp_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP)),
            ffmpeg_path: self
                .ffmpeg_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FFMPEG)),
            cookies_file: self.cookies_file,
            public_dir: self
                .public_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PUBLIC_DIR)),
        }
    }
}

/// Parses a dotenv-style file. A missing file is not an error.
pub fn read_env_file(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let source = path.display().to_string();
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        if let Some((key, value)) = trimmed.split_once('=') {
            cfg.apply(key, value, &source)?;
        }
    }
    Ok(Some(cfg))
}

/// File values first, then the process environment on top. Callers may
/// overlay further values (command-line flags) before resolving.
pub fn load_env_layers(env_file: &Path) -> Result<EnvConfig> {
    let file = read_env_file(env_file)?.unwrap_or_default();
    let env = EnvConfig::from_lookup(|key| std::env::var(key).ok())?;
    Ok(file.overlay(env))
}

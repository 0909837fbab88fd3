use anyhow::{Context, Result, bail};
use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

/// Config file written with defaults when none is found.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Searched in order when `--config` is not given.
const CONFIG_CANDIDATES: [&str; 2] = ["config.json", "config/config.json"];

const ENV_PREFIX: &str = "APP_";

/// Centralized application configuration.
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 36677,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root of the `YYYY/MM` tree. Absolute after loading.
    pub upload_dir: PathBuf,
    /// Public prefix for stored files, without trailing slash after loading.
    pub base_url: String,
    /// Per-file limit in bytes.
    pub max_file_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("./uploads"),
            base_url: "https://uploads.example.com".into(),
            max_file_size: 32 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub enabled: bool,
    pub secret_key: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("enabled", &self.enabled)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Command-line overrides, applied after file and environment.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Content-addressed image upload server")]
pub struct Args {
    /// Config file (defaults to ./config.json or ./config/config.json)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Host to bind to (overrides server.host)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides server.port)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where images are stored (overrides storage.upload_dir)
    #[arg(long)]
    pub upload_dir: Option<PathBuf>,

    /// Public base URL of stored images (overrides storage.base_url)
    #[arg(long)]
    pub base_url: Option<String>,
}

impl AppConfig {
    /// Parse CLI args, then load and validate the configuration.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        let cwd = std::env::current_dir().context("reading working directory")?;
        Self::load(&args, &cwd)
    }

    /// Defaults, then the JSON file, then `APP_*` variables, then `args`.
    ///
    /// When no config file exists the defaults are written to
    /// `<cwd>/config.json` first.
    pub fn load(args: &Args, cwd: &Path) -> Result<Self> {
        let file = match &args.config {
            Some(path) => Some(cwd.join(path)),
            None => CONFIG_CANDIDATES
                .iter()
                .map(|name| cwd.join(name))
                .find(|path| path.is_file()),
        };
        let file = match file {
            Some(path) => path,
            None => {
                let path = cwd.join(DEFAULT_CONFIG_FILE);
                write_defaults(&path)?;
                tracing::info!("Config file not found, wrote defaults to {}", path.display());
                path
            }
        };

        let mut cfg: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Json::file(&file))
            .merge(Env::prefixed(ENV_PREFIX).map(|key| key.as_str().replacen('_', ".", 1).into()))
            .extract()
            .with_context(|| format!("loading config from {}", file.display()))?;

        if let Some(host) = &args.host {
            cfg.server.host = host.clone();
        }
        if let Some(port) = args.port {
            cfg.server.port = port;
        }
        if let Some(dir) = &args.upload_dir {
            cfg.storage.upload_dir = dir.clone();
        }
        if let Some(url) = &args.base_url {
            cfg.storage.base_url = url.clone();
        }

        cfg.normalize(cwd);
        cfg.validate()?;
        Ok(cfg)
    }

    fn normalize(&mut self, cwd: &Path) {
        self.storage.base_url = self.storage.base_url.trim_end_matches('/').to_string();
        if !self.storage.upload_dir.as_os_str().is_empty() && self.storage.upload_dir.is_relative() {
            self.storage.upload_dir = cwd.join(&self.storage.upload_dir);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("invalid port: {}", self.server.port);
        }
        if self.storage.upload_dir.as_os_str().is_empty() {
            bail!("upload_dir cannot be empty");
        }
        if self.storage.base_url.is_empty() {
            bail!("base_url cannot be empty");
        }
        if self.storage.max_file_size == 0 {
            bail!("max_file_size must be positive");
        }
        if self.auth.enabled && self.auth.secret_key.is_empty() {
            bail!("secret_key cannot be empty when auth is enabled");
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn write_defaults(path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(&AppConfig::default())?;
    fs::write(path, json).with_context(|| format!("creating config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn load_in(jail: &Jail, args: &Args) -> figment::error::Result<AppConfig> {
        AppConfig::load(args, jail.directory()).map_err(|err| format!("{err:#}").into())
    }

    #[test]
    fn missing_file_writes_defaults() {
        Jail::expect_with(|jail| {
            let cfg = load_in(jail, &Args::default())?;

            assert!(jail.directory().join(DEFAULT_CONFIG_FILE).is_file());
            assert_eq!(cfg.server.port, 36677);
            assert_eq!(cfg.storage.upload_dir, jail.directory().join("./uploads"));
            assert!(cfg.storage.upload_dir.is_absolute());
            assert!(!cfg.auth.enabled);
            Ok(())
        });
    }

    #[test]
    fn file_values_are_normalized() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.json",
                r#"{
                    "storage": {
                        "upload_dir": "data/img",
                        "base_url": "https://img.example.com/",
                        "max_file_size": 1024
                    }
                }"#,
            )?;
            let cfg = load_in(jail, &Args::default())?;

            assert_eq!(cfg.storage.base_url, "https://img.example.com");
            assert_eq!(cfg.storage.upload_dir, jail.directory().join("data/img"));
            assert_eq!(cfg.storage.max_file_size, 1024);
            assert_eq!(cfg.server.host, "0.0.0.0");
            Ok(())
        });
    }

    #[test]
    fn nested_config_directory_is_searched() {
        Jail::expect_with(|jail| {
            std::fs::create_dir("config").map_err(|e| e.to_string())?;
            jail.create_file("config/config.json", r#"{ "server": { "port": 9000 } }"#)?;
            let cfg = load_in(jail, &Args::default())?;

            assert_eq!(cfg.server.port, 9000);
            assert!(!jail.directory().join(DEFAULT_CONFIG_FILE).exists());
            Ok(())
        });
    }

    #[test]
    fn environment_overrides_file_and_args_override_environment() {
        Jail::expect_with(|jail| {
            jail.create_file("config.json", r#"{ "server": { "port": 9000 } }"#)?;
            jail.set_env("APP_SERVER_PORT", "9100");
            jail.set_env("APP_STORAGE_BASE_URL", "https://env.example.com/");
            jail.set_env("APP_STORAGE_MAX_FILE_SIZE", "2048");

            let cfg = load_in(jail, &Args::default())?;
            assert_eq!(cfg.server.port, 9100);
            assert_eq!(cfg.storage.base_url, "https://env.example.com");
            assert_eq!(cfg.storage.max_file_size, 2048);

            let args = Args {
                port: Some(9200),
                ..Args::default()
            };
            let cfg = load_in(jail, &args)?;
            assert_eq!(cfg.server.port, 9200);
            Ok(())
        });
    }

    #[test]
    fn auth_without_secret_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("config.json", r#"{ "auth": { "enabled": true } }"#)?;
            let err = load_in(jail, &Args::default()).unwrap_err();
            assert!(err.to_string().contains("secret_key"));
            Ok(())
        });
    }

    #[test]
    fn empty_base_url_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file("config.json", r#"{ "storage": { "base_url": "/" } }"#)?;
            assert!(load_in(jail, &Args::default()).is_err());
            Ok(())
        });
    }

    #[test]
    fn debug_output_hides_secret() {
        let auth = AuthConfig {
            enabled: true,
            secret_key: "hunter2".into(),
        };
        assert!(!format!("{auth:?}").contains("hunter2"));
    }
}

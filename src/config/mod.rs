// dbmagic/src/config/mod.rs
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::errors::{AppError, Result};

/// Prefix of environment variables overriding `config.json` entries.
pub const ENV_PREFIX: &str = "DBMAGIC_";

const DEFAULT_MYSQL_PORT: u16 = 3306;
const DEFAULT_CIPHER: &str = "AES256";
const DEFAULT_STORAGE_DIR: &str = "var/storage";
const DEFAULT_LOG_FILE: &str = "var/logs/dbmagic.log";

static SLUG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid slug pattern"));

/// Read-only view over `config.json` addressable by dotted path (`database.host`).
///
/// Absent keys yield `None`. Environment overrides (`DBMAGIC_DATABASE_HOST` for
/// `database.host`) take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    root: Value,
    overrides: HashMap<String, String>,
}

impl ConfigSource {
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            AppError::Config(format!(
                "Failed to read config file at {}: {}",
                config_path.display(),
                e
            ))
        })?;
        let root: Value = serde_json::from_str(&config_content).map_err(|e| {
            AppError::Config(format!(
                "Failed to parse JSON from config file at {}: {}",
                config_path.display(),
                e
            ))
        })?;

        let mut source = ConfigSource::from_value(root);
        source.overrides = std::env::vars()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect();
        Ok(source)
    }

    pub fn from_value(root: Value) -> Self {
        ConfigSource {
            root,
            overrides: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn with_override(mut self, path: &str, value: impl Into<String>) -> Self {
        self.overrides.insert(env_key(path), value.into());
        self
    }

    pub fn get(&self, path: &str) -> Option<String> {
        if let Some(value) = self.overrides.get(&env_key(path)) {
            return Some(value.clone());
        }

        let mut node = &self.root;
        for segment in path.split('.') {
            node = node.as_object()?.get(segment)?;
        }
        match node {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    fn get_non_empty(&self, path: &str) -> Option<String> {
        self.get(path).filter(|s| !s.trim().is_empty())
    }

    fn require(&self, path: &str) -> Result<String> {
        self.get_non_empty(path)
            .ok_or_else(|| AppError::Config(format!("Missing parameter: {}", path)))
    }
}

/// Environment variable name overriding the given dotted path.
pub fn env_key(path: &str) -> String {
    format!("{}{}", ENV_PREFIX, path.replace('.', "_").to_uppercase())
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: String,
    /// Host part of the application principal (`username@user_host`).
    pub user_host: String,
}

impl fmt::Display for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}/{}", self.username, self.host, self.port, self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportBackend {
    Gsutil,
    Rsync,
    S3,
}

impl TransportBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "gsutil" | "gcs" => Ok(TransportBackend::Gsutil),
            "rsync" | "ssh" => Ok(TransportBackend::Rsync),
            "s3" => Ok(TransportBackend::S3),
            other => Err(AppError::Config(format!(
                "archive.backend must be one of 'gsutil', 'rsync' or 's3', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct S3Config {
    pub region: String,
    pub endpoint_url: Option<String>,
    pub access_key_id: String,
    pub secret_access_key: String,
}

#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    pub slug: String,
    pub bucket: Option<String>,
    pub ssh_host: Option<String>,
    pub secret: String,
    pub backend: TransportBackend,
    /// gpg `--cipher-algo` used for new exports.
    pub cipher: String,
    pub s3: Option<S3Config>,
}

#[derive(Debug, Clone)]
pub struct PathsConfig {
    pub tmp_dir: PathBuf,
    pub storage_dir: PathBuf,
    pub log_file: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub archive: ArchiveConfig,
    pub paths: PathsConfig,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let source = ConfigSource::load(config_path)?;
        AppConfig::from_source(&source)
    }

    pub fn from_source(source: &ConfigSource) -> Result<Self> {
        let database = load_database_config(source)?;
        let archive = load_archive_config(source)?;
        let paths = PathsConfig {
            tmp_dir: source
                .get_non_empty("paths.tmp_dir")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            storage_dir: PathBuf::from(
                source
                    .get_non_empty("paths.storage_dir")
                    .unwrap_or_else(|| DEFAULT_STORAGE_DIR.to_string()),
            ),
            log_file: PathBuf::from(
                source
                    .get_non_empty("paths.log_file")
                    .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string()),
            ),
        };

        Ok(AppConfig {
            database,
            archive,
            paths,
        })
    }
}

fn load_database_config(source: &ConfigSource) -> Result<DatabaseConfig> {
    let host = source.require("database.host")?;
    let port = match source.get_non_empty("database.port") {
        Some(raw) => raw.trim().parse::<u16>().map_err(|_| {
            AppError::Config(format!("database.port must be a port number, got '{}'", raw))
        })?,
        None => DEFAULT_MYSQL_PORT,
    };
    let user_host = source
        .get_non_empty("database.user_host")
        .unwrap_or_else(|| host.clone());

    Ok(DatabaseConfig {
        port,
        name: source.require("database.name")?,
        username: source.require("database.user")?,
        password: source.require("database.password")?,
        user_host,
        host,
    })
}

fn load_archive_config(source: &ConfigSource) -> Result<ArchiveConfig> {
    let slug = source.require("archive.slug")?;
    if !SLUG_PATTERN.is_match(&slug) {
        return Err(AppError::Config(format!(
            "archive.slug '{}' may only contain letters, digits, '.', '_' and '-'",
            slug
        )));
    }

    let backend = match source.get_non_empty("archive.backend") {
        Some(raw) => TransportBackend::parse(raw.trim())?,
        None => TransportBackend::Gsutil,
    };
    let bucket = source.get_non_empty("archive.bucket");
    let ssh_host = source.get_non_empty("archive.ssh_host");

    match backend {
        TransportBackend::Gsutil | TransportBackend::S3 if bucket.is_none() => {
            return Err(AppError::Config("Missing parameter: archive.bucket".to_string()));
        }
        TransportBackend::Rsync if ssh_host.is_none() => {
            return Err(AppError::Config("Missing parameter: archive.ssh_host".to_string()));
        }
        _ => {}
    }

    let s3 = if backend == TransportBackend::S3 {
        Some(S3Config {
            region: source.require("archive.s3.region")?,
            endpoint_url: source.get_non_empty("archive.s3.endpoint_url"),
            access_key_id: source.require("archive.s3.access_key_id")?,
            secret_access_key: source.require("archive.s3.secret_access_key")?,
        })
    } else {
        None
    };

    Ok(ArchiveConfig {
        slug,
        bucket,
        ssh_host,
        secret: source.require("archive.secret")?,
        backend,
        cipher: source
            .get_non_empty("archive.cipher")
            .unwrap_or_else(|| DEFAULT_CIPHER.to_string()),
        s3,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_json() -> Value {
        json!({
            "database": {
                "host": "db1",
                "name": "shop",
                "user": "app",
                "password": "x"
            },
            "archive": {
                "slug": "shop-prod",
                "bucket": "backups",
                "secret": "s3cr3t"
            },
            "paths": {
                "tmp_dir": "/var/tmp/dbmagic"
            }
        })
    }

    #[test]
    fn test_dotted_lookup_and_absence() {
        let source = ConfigSource::from_value(json!({
            "database": { "host": "db1", "port": 3307 },
            "flag": true
        }));

        assert_eq!(source.get("database.host"), Some("db1".to_string()));
        assert_eq!(source.get("database.port"), Some("3307".to_string()));
        assert_eq!(source.get("flag"), Some("true".to_string()));
        assert_eq!(source.get("database.name"), None);
        assert_eq!(source.get("database.host.inner"), None);
        assert_eq!(source.get("database"), None);
    }

    #[test]
    fn test_env_override_wins_over_file() {
        let source = ConfigSource::from_value(sample_json())
            .with_override("database.password", "from-env");
        assert_eq!(source.get("database.password"), Some("from-env".to_string()));
        assert_eq!(env_key("database.password"), "DBMAGIC_DATABASE_PASSWORD");
        assert_eq!(env_key("archive.s3.region"), "DBMAGIC_ARCHIVE_S3_REGION");
    }

    #[test]
    fn test_complete_config_with_defaults() -> anyhow::Result<()> {
        let config = AppConfig::from_source(&ConfigSource::from_value(sample_json()))?;

        assert_eq!(config.database.host, "db1");
        assert_eq!(config.database.port, 3306);
        assert_eq!(config.database.user_host, "db1");
        assert_eq!(config.database.to_string(), "app@db1:3306/shop");
        assert_eq!(config.archive.slug, "shop-prod");
        assert_eq!(config.archive.backend, TransportBackend::Gsutil);
        assert_eq!(config.archive.cipher, "AES256");
        assert_eq!(config.paths.tmp_dir, PathBuf::from("/var/tmp/dbmagic"));
        assert_eq!(config.paths.storage_dir, PathBuf::from("var/storage"));
        assert_eq!(config.paths.log_file, PathBuf::from("var/logs/dbmagic.log"));
        Ok(())
    }

    #[test]
    fn test_missing_required_parameter_is_config_error() {
        let mut value = sample_json();
        value["database"]["password"] = json!("");
        let err = AppConfig::from_source(&ConfigSource::from_value(value)).unwrap_err();
        assert!(matches!(err, AppError::Config(ref msg) if msg.contains("database.password")));

        let mut value = sample_json();
        value["archive"].as_object_mut().unwrap().remove("slug");
        let err = AppConfig::from_source(&ConfigSource::from_value(value)).unwrap_err();
        assert!(matches!(err, AppError::Config(ref msg) if msg.contains("archive.slug")));
    }

    #[test]
    fn test_slug_must_be_a_single_path_segment() {
        for slug in ["../etc", "a/b", "-leading", "with space"] {
            let mut value = sample_json();
            value["archive"]["slug"] = json!(slug);
            assert!(
                AppConfig::from_source(&ConfigSource::from_value(value)).is_err(),
                "slug {:?} should be rejected",
                slug
            );
        }
    }

    #[test]
    fn test_backend_requirements() -> anyhow::Result<()> {
        let mut value = sample_json();
        value["archive"]["backend"] = json!("rsync");
        assert!(AppConfig::from_source(&ConfigSource::from_value(value.clone())).is_err());

        value["archive"]["ssh_host"] = json!("deploy@archive.example.com");
        let config = AppConfig::from_source(&ConfigSource::from_value(value))?;
        assert_eq!(config.archive.backend, TransportBackend::Rsync);

        let mut value = sample_json();
        value["archive"]["backend"] = json!("s3");
        assert!(AppConfig::from_source(&ConfigSource::from_value(value.clone())).is_err());
        value["archive"]["s3"] = json!({
            "region": "eu-central-1",
            "access_key_id": "AK",
            "secret_access_key": "SK"
        });
        let config = AppConfig::from_source(&ConfigSource::from_value(value))?;
        let s3 = config.archive.s3.expect("s3 section");
        assert_eq!(s3.region, "eu-central-1");
        assert_eq!(s3.endpoint_url, None);

        let mut value = sample_json();
        value["archive"]["backend"] = json!("ftp");
        assert!(AppConfig::from_source(&ConfigSource::from_value(value)).is_err());
        Ok(())
    }

    #[test]
    fn test_invalid_port_rejected() {
        let mut value = sample_json();
        value["database"]["port"] = json!("not-a-port");
        assert!(AppConfig::from_source(&ConfigSource::from_value(value)).is_err());
    }
}

use std::fmt::Display;
use std::io::SeekFrom;
use std::path::{
    Path,
    PathBuf,
};
use std::time::Duration;

use fd_lock::RwLock;
use serde_json::{
    Map,
    Value,
};
use tokio::fs::File;
use tokio::io::{
    AsyncReadExt,
    AsyncSeekExt,
    AsyncWriteExt,
};
use url::Url;

use crate::consts::{
    DEFAULT_POLICY_SERVICE_URL,
    DIFF_MAX_COMPUTATION_TIME,
    LOCAL_OUTPUT_DIR,
    POLICY_BATCH_SIZE,
    REMOTE_EMIT_TIMEOUT,
    SETTINGS_FILE_NAME,
    STABILIZE_INTERVAL,
    STABILIZE_MAX_RETRIES,
};
use crate::error::SettingsError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumIter, strum::EnumMessage)]
pub enum Setting {
    #[strum(message = "Enable/disable line edit metrics (boolean)")]
    MetricsEnabled,
    #[strum(message = "Where records go: \"auto\" tries the remote endpoint first, \"local\" always writes files (string)")]
    OutputMode,
    #[strum(message = "Directory for local records, relative to the workspace root (string)")]
    OutputDirectory,
    #[strum(message = "Metrics endpoint URL, skips policy discovery when set (string)")]
    Endpoint,
    #[strum(message = "Policy service URL used to discover the metrics endpoint (string)")]
    PolicyServiceUrl,
    #[strum(message = "Repository URLs per policy query (number)")]
    PolicyBatchSize,
    #[strum(message = "Delay between document reads while waiting for edits to settle, in ms (number)")]
    StabilizeIntervalMs,
    #[strum(message = "Document re-reads before giving up on a settled state (number)")]
    StabilizeMaxRetries,
    #[strum(message = "Maximum diff computation time in ms (number)")]
    DiffTimeoutMs,
    #[strum(message = "Timeout for posting a record to the metrics endpoint in ms (number)")]
    RemoteTimeoutMs,
}

impl AsRef<str> for Setting {
    fn as_ref(&self) -> &'static str {
        match self {
            Self::MetricsEnabled => "lineMetrics.enabled",
            Self::OutputMode => "lineMetrics.outputMode",
            Self::OutputDirectory => "lineMetrics.outputDirectory",
            Self::Endpoint => "lineMetrics.endpoint",
            Self::PolicyServiceUrl => "lineMetrics.policyServiceUrl",
            Self::PolicyBatchSize => "lineMetrics.policyBatchSize",
            Self::StabilizeIntervalMs => "lineMetrics.stabilizeIntervalMs",
            Self::StabilizeMaxRetries => "lineMetrics.stabilizeMaxRetries",
            Self::DiffTimeoutMs => "lineMetrics.diffTimeoutMs",
            Self::RemoteTimeoutMs => "lineMetrics.remoteTimeoutMs",
        }
    }
}

impl Display for Setting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl TryFrom<&str> for Setting {
    type Error = SettingsError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "lineMetrics.enabled" => Ok(Self::MetricsEnabled),
            "lineMetrics.outputMode" => Ok(Self::OutputMode),
            "lineMetrics.outputDirectory" => Ok(Self::OutputDirectory),
            "lineMetrics.endpoint" => Ok(Self::Endpoint),
            "lineMetrics.policyServiceUrl" => Ok(Self::PolicyServiceUrl),
            "lineMetrics.policyBatchSize" => Ok(Self::PolicyBatchSize),
            "lineMetrics.stabilizeIntervalMs" => Ok(Self::StabilizeIntervalMs),
            "lineMetrics.stabilizeMaxRetries" => Ok(Self::StabilizeMaxRetries),
            "lineMetrics.diffTimeoutMs" => Ok(Self::DiffTimeoutMs),
            "lineMetrics.remoteTimeoutMs" => Ok(Self::RemoteTimeoutMs),
            _ => Err(SettingsError::InvalidSetting(value.to_string())),
        }
    }
}

/// Default location of the settings file.
pub fn settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("agent-line-metrics").join(SETTINGS_FILE_NAME))
}

/// JSON object of settings, backed by a file.
#[derive(Debug, Clone, Default)]
pub struct Settings {
    values: Map<String, Value>,
    path: Option<PathBuf>,
}

impl Settings {
    /// Settings that are never written anywhere.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Loads the settings at `path`, creating an empty file if there is none.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();

        // If the folder doesn't exist, create it.
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let values = match path.exists() {
            true => {
                let mut file = RwLock::new(File::open(path).await?);
                let mut buf = Vec::new();
                file.write()?.read_to_end(&mut buf).await?;
                if buf.iter().all(u8::is_ascii_whitespace) {
                    Map::new()
                } else {
                    serde_json::from_slice(&buf)?
                }
            },
            false => {
                let mut file = RwLock::new(File::create(path).await?);
                file.write()?.write_all(b"{}").await?;
                Map::new()
            },
        };

        Ok(Self {
            values,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn map(&self) -> &'_ Map<String, Value> {
        &self.values
    }

    pub fn get(&self, key: Setting) -> Option<&Value> {
        self.values.get(key.as_ref())
    }

    pub async fn set(&mut self, key: Setting, value: impl Into<Value>) -> Result<(), SettingsError> {
        self.values.insert(key.to_string(), value.into());
        self.save_to_file().await
    }

    pub async fn remove(&mut self, key: Setting) -> Result<Option<Value>, SettingsError> {
        let value = self.values.remove(key.as_ref());
        self.save_to_file().await?;
        Ok(value)
    }

    pub fn get_bool(&self, key: Setting) -> Option<bool> {
        self.get(key).and_then(|value| value.as_bool())
    }

    pub fn get_string(&self, key: Setting) -> Option<String> {
        self.get(key).and_then(|value| value.as_str().map(|s| s.into()))
    }

    pub fn get_int(&self, key: Setting) -> Option<i64> {
        self.get(key).and_then(|value| value.as_i64())
    }

    pub fn get_int_or(&self, key: Setting, default: usize) -> usize {
        self.get_int(key).map_or(default, |v| v.max(0) as usize)
    }

    pub async fn save_to_file(&self) -> Result<(), SettingsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file_opts = File::options();
        file_opts.create(true).write(true).truncate(true);

        #[cfg(unix)]
        file_opts.mode(0o600);
        let mut file = RwLock::new(file_opts.open(path).await?);
        let mut lock = file.write()?;

        match serde_json::to_string_pretty(&self.values) {
            Ok(json) => lock.write_all(json.as_bytes()).await?,
            Err(_err) => {
                lock.seek(SeekFrom::Start(0)).await?;
                lock.set_len(0).await?;
                lock.write_all(b"{}").await?;
            },
        }
        lock.flush().await?;

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Remote endpoint when one resolves, local file otherwise.
    #[default]
    Auto,
    /// Always write local files.
    Local,
}

/// Effective configuration, with defaults for everything the settings leave out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub output_mode: OutputMode,
    pub output_dir: PathBuf,
    pub endpoint: Option<Url>,
    pub policy_service_url: Url,
    pub policy_batch_size: usize,
    pub stabilize_interval: Duration,
    pub stabilize_max_retries: usize,
    pub diff_timeout: Duration,
    pub remote_timeout: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            output_mode: OutputMode::Auto,
            output_dir: PathBuf::from(LOCAL_OUTPUT_DIR),
            endpoint: None,
            policy_service_url: Url::parse(DEFAULT_POLICY_SERVICE_URL).expect("default policy url is valid"),
            policy_batch_size: POLICY_BATCH_SIZE,
            stabilize_interval: STABILIZE_INTERVAL,
            stabilize_max_retries: STABILIZE_MAX_RETRIES,
            diff_timeout: DIFF_MAX_COMPUTATION_TIME,
            remote_timeout: REMOTE_EMIT_TIMEOUT,
        }
    }
}

impl MetricsConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        let defaults = Self::default();

        let output_mode = match settings.get_string(Setting::OutputMode).as_deref() {
            None | Some("auto") => OutputMode::Auto,
            Some("local") => OutputMode::Local,
            Some(other) => {
                return Err(SettingsError::InvalidValue {
                    key: Setting::OutputMode.to_string(),
                    reason: format!("unknown output mode {other:?}"),
                });
            },
        };

        let parse_url = |key: Setting| -> Result<Option<Url>, SettingsError> {
            settings
                .get_string(key)
                .map(|raw| {
                    Url::parse(&raw).map_err(|err| SettingsError::InvalidValue {
                        key: key.to_string(),
                        reason: err.to_string(),
                    })
                })
                .transpose()
        };

        let millis = |key: Setting, default: Duration| {
            settings
                .get_int(key)
                .map_or(default, |ms| Duration::from_millis(ms.max(0) as u64))
        };

        Ok(Self {
            enabled: settings.get_bool(Setting::MetricsEnabled).unwrap_or(defaults.enabled),
            output_mode,
            output_dir: settings
                .get_string(Setting::OutputDirectory)
                .map_or(defaults.output_dir, PathBuf::from),
            endpoint: parse_url(Setting::Endpoint)?,
            policy_service_url: parse_url(Setting::PolicyServiceUrl)?.unwrap_or(defaults.policy_service_url),
            policy_batch_size: settings
                .get_int_or(Setting::PolicyBatchSize, defaults.policy_batch_size)
                .max(1),
            stabilize_interval: millis(Setting::StabilizeIntervalMs, defaults.stabilize_interval),
            stabilize_max_retries: settings.get_int_or(Setting::StabilizeMaxRetries, defaults.stabilize_max_retries),
            diff_timeout: millis(Setting::DiffTimeoutMs, defaults.diff_timeout),
            remote_timeout: millis(Setting::RemoteTimeoutMs, defaults.remote_timeout),
        })
    }
}

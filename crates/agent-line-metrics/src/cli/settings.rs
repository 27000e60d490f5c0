use std::io::Write;
use std::process::ExitCode;

use clap::{
    Args,
    Subcommand,
};
use eyre::Result;
use serde_json::Value;
use strum::{
    EnumMessage,
    IntoEnumIterator,
};

use crate::settings::{
    MetricsConfig,
    Setting,
    Settings,
};

#[derive(Clone, Debug, Subcommand, PartialEq, Eq)]
pub enum SettingsSubcommands {
    /// List all settings with their current values
    List {
        /// Also list settings that are not set
        #[arg(long, short)]
        all: bool,
    },
    /// Print the value of a setting
    Get { key: String },
    /// Change a setting. Values are parsed as JSON, falling back to a plain string
    Set { key: String, value: String },
    /// Reset a setting to its default
    Remove { key: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct SettingsArgs {
    #[command(subcommand)]
    cmd: SettingsSubcommands,
}

impl SettingsArgs {
    pub async fn execute(self, settings: &mut Settings) -> Result<ExitCode> {
        let mut stdout = std::io::stdout();
        match self.cmd {
            SettingsSubcommands::List { all } => {
                for setting in Setting::iter() {
                    match (settings.get(setting), all) {
                        (Some(value), _) => writeln!(stdout, "{setting} = {value}")?,
                        (None, true) => writeln!(
                            stdout,
                            "{setting} (unset): {}",
                            setting.get_message().unwrap_or_default()
                        )?,
                        (None, false) => {},
                    }
                }
            },
            SettingsSubcommands::Get { key } => {
                let setting = Setting::try_from(key.as_str())?;
                match settings.get(setting) {
                    Some(value) => writeln!(stdout, "{value}")?,
                    None => return Ok(ExitCode::FAILURE),
                }
            },
            SettingsSubcommands::Set { key, value } => {
                let setting = Setting::try_from(key.as_str())?;
                let value = parse_value(&value);

                // Reject values the config would not accept before they hit the file.
                let mut candidate = Settings::in_memory();
                candidate.set(setting, value.clone()).await?;
                MetricsConfig::from_settings(&candidate)?;

                settings.set(setting, value).await?;
            },
            SettingsSubcommands::Remove { key } => {
                let setting = Setting::try_from(key.as_str())?;
                settings.remove(setting).await?;
            },
        }
        Ok(ExitCode::SUCCESS)
    }
}

fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value("false"), Value::Bool(false));
        assert_eq!(parse_value("250"), Value::from(250));
        assert_eq!(parse_value("local"), Value::String("local".into()));
        assert_eq!(
            parse_value("https://example.com/x"),
            Value::String("https://example.com/x".into())
        );
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut settings = Settings::load(&path).await.unwrap();

        let set = SettingsArgs {
            cmd: SettingsSubcommands::Set {
                key: "lineMetrics.outputMode".into(),
                value: "local".into(),
            },
        };
        assert_eq!(set.execute(&mut settings).await.unwrap(), ExitCode::SUCCESS);
        assert_eq!(
            Settings::load(&path).await.unwrap().get_string(Setting::OutputMode).as_deref(),
            Some("local")
        );

        let invalid = SettingsArgs {
            cmd: SettingsSubcommands::Set {
                key: "lineMetrics.outputMode".into(),
                value: "sideways".into(),
            },
        };
        assert!(invalid.execute(&mut settings).await.is_err());

        let unknown = SettingsArgs {
            cmd: SettingsSubcommands::Get { key: "nope".into() },
        };
        assert!(unknown.execute(&mut settings).await.is_err());

        let remove = SettingsArgs {
            cmd: SettingsSubcommands::Remove {
                key: "lineMetrics.outputMode".into(),
            },
        };
        remove.execute(&mut settings).await.unwrap();
        let get = SettingsArgs {
            cmd: SettingsSubcommands::Get {
                key: "lineMetrics.outputMode".into(),
            },
        };
        assert_eq!(get.execute(&mut settings).await.unwrap(), ExitCode::FAILURE);
    }
}

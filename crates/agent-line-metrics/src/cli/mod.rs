mod replay;
mod settings;

use std::io::Write;
use std::path::{
    Path,
    PathBuf,
};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{
    ArgAction,
    Parser,
    Subcommand,
};
use eyre::{
    Result,
    WrapErr,
};
use tracing::level_filters::LevelFilter;
use url::Url;

pub use self::replay::ReplayArgs;
pub use self::settings::SettingsArgs;
use crate::delta::compute_delta;
use crate::diff::{
    DiffOptions,
    SimilarDiffProvider,
};
use crate::endpoint::{
    EndpointCache,
    EndpointResolver,
    GitRemoteDiscovery,
    HttpPolicyClient,
    StaticTokenProvider,
};
use crate::logging::{
    LogArgs,
    initialize_logging,
};
use crate::settings::{
    MetricsConfig,
    Settings,
    settings_path,
};

/// Line edit metrics for AI agent sessions.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Increase logging verbosity, repeat for more
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
    /// Settings file to use instead of the default location
    #[arg(long, global = true)]
    pub settings_file: Option<PathBuf>,
    #[command(subcommand)]
    pub subcommand: RootSubcommand,
}

#[derive(Debug, Subcommand)]
pub enum RootSubcommand {
    /// Print the line delta between two files
    Diff {
        original: PathBuf,
        modified: PathBuf,
        /// Compare lines exactly instead of ignoring leading and trailing whitespace
        #[arg(long)]
        exact: bool,
    },
    /// Discover the metrics endpoint for the given workspace folders
    ResolveEndpoint {
        /// Workspace folder, may be repeated
        #[arg(long = "workspace", short, required = true)]
        workspaces: Vec<PathBuf>,
        /// Only print the git remotes that would be sent to the policy service
        #[arg(long)]
        remotes_only: bool,
    },
    /// Feed a recorded edit-event log through a tracking session
    Replay(ReplayArgs),
    /// Inspect and change settings
    Settings(SettingsArgs),
}

impl Cli {
    pub async fn execute(self) -> Result<ExitCode> {
        let default_level = match self.verbose {
            0 => None,
            1 => Some(LevelFilter::INFO),
            2 => Some(LevelFilter::DEBUG),
            _ => Some(LevelFilter::TRACE),
        };
        let _guard = initialize_logging(LogArgs {
            default_level,
            log_file: self.log_file.as_deref(),
        })
        .wrap_err("failed to initialize logging")?;

        let mut settings = load_settings(self.settings_file.as_deref()).await?;

        match self.subcommand {
            RootSubcommand::Diff {
                original,
                modified,
                exact,
            } => diff_files(&original, &modified, exact).await,
            RootSubcommand::ResolveEndpoint {
                workspaces,
                remotes_only,
            } => {
                let config = MetricsConfig::from_settings(&settings)?;
                let resolver = build_resolver(&config, workspaces, Arc::new(EndpointCache::new()));
                let mut stdout = std::io::stdout();
                if remotes_only {
                    for url in resolver.repository_urls().await {
                        writeln!(stdout, "{url}")?;
                    }
                    return Ok(ExitCode::SUCCESS);
                }
                match resolver.resolve_metrics_endpoint().await {
                    Some(url) => {
                        writeln!(stdout, "{url}")?;
                        Ok(ExitCode::SUCCESS)
                    },
                    None => {
                        writeln!(std::io::stderr(), "No metrics endpoint configured")?;
                        Ok(ExitCode::FAILURE)
                    },
                }
            },
            RootSubcommand::Replay(args) => {
                let config = MetricsConfig::from_settings(&settings)?;
                args.execute(&config).await
            },
            RootSubcommand::Settings(args) => args.execute(&mut settings).await,
        }
    }
}

async fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match settings_path() {
            Some(path) => path,
            None => return Ok(Settings::in_memory()),
        },
    };
    Settings::load(&path)
        .await
        .wrap_err_with(|| format!("failed to load settings from {}", path.display()))
}

/// Endpoint discovery wired to git and the configured policy service.
pub fn build_resolver(config: &MetricsConfig, workspaces: Vec<PathBuf>, cache: Arc<EndpointCache>) -> EndpointResolver {
    let policy = HttpPolicyClient::new(
        config.policy_service_url.clone(),
        Arc::new(StaticTokenProvider::from_env()),
    );
    EndpointResolver::new(workspaces, Arc::new(GitRemoteDiscovery::new()), Arc::new(policy), cache)
        .with_batch_size(config.policy_batch_size)
        .with_configured_endpoint(config.endpoint.clone())
}

async fn diff_files(original: &Path, modified: &Path, exact: bool) -> Result<ExitCode> {
    let read = |path: &Path| {
        let path = path.to_path_buf();
        async move {
            match tokio::fs::read_to_string(&path).await {
                Ok(text) => Ok(text),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
                Err(err) => Err(err).wrap_err_with(|| format!("failed to read {}", path.display())),
            }
        }
    };
    let (original_text, modified_text) = (read(original).await?, read(modified).await?);

    let options = DiffOptions {
        ignore_trim_whitespace: !exact,
        ..Default::default()
    };
    let delta = compute_delta(&original_text, &modified_text, &SimilarDiffProvider::new(), options).await?;
    writeln!(std::io::stdout(), "+{} -{}", delta.added, delta.removed)?;
    Ok(ExitCode::SUCCESS)
}

/// Parses a url given on the command line.
pub(crate) fn parse_url(value: &str) -> Result<Url, String> {
    Url::parse(value).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["agent_line_metrics", "-vv", "diff", "a.rs", "b.rs"]).unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.subcommand, RootSubcommand::Diff { exact: false, .. }));

        let cli = Cli::try_parse_from(["agent_line_metrics", "resolve-endpoint", "-w", "/a", "-w", "/b"]).unwrap();
        let RootSubcommand::ResolveEndpoint { workspaces, .. } = cli.subcommand else {
            panic!("expected resolve-endpoint");
        };
        assert_eq!(workspaces, vec![PathBuf::from("/a"), PathBuf::from("/b")]);

        assert!(Cli::try_parse_from(["agent_line_metrics", "resolve-endpoint"]).is_err());
    }

    #[tokio::test]
    async fn test_diff_files_treats_missing_file_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let modified = dir.path().join("new.rs");
        std::fs::write(&modified, "a\nb\n").unwrap();

        let code = diff_files(&dir.path().join("missing.rs"), &modified, false).await.unwrap();
        assert_eq!(code, ExitCode::SUCCESS);
    }
}

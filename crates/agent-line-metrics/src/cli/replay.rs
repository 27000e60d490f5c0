use std::io::Write;
use std::path::{
    Path,
    PathBuf,
};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Args;
use eyre::{
    Result,
    WrapErr,
    bail,
};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use super::{
    build_resolver,
    parse_url,
};
use crate::delta::DeltaComputer;
use crate::diff::{
    DiffOptions,
    SimilarDiffProvider,
};
use crate::document::{
    EditEvent,
    FileId,
    FsDocumentSource,
};
use crate::emitter::RecordEmitter;
use crate::endpoint::{
    EndpointCache,
    EndpointResolver,
};
use crate::record::{
    LineEditRecord,
    RecordContext,
};
use crate::settings::{
    MetricsConfig,
    OutputMode,
};
use crate::snapshot::{
    SnapshotCapturer,
    Stabilizer,
};
use crate::telemetry::TracingTelemetrySink;
use crate::tracker::EditTracker;

#[derive(Debug, Clone, PartialEq, Eq, Args)]
pub struct ReplayArgs {
    /// Workspace root; relative file paths in the log are resolved against it
    #[arg(long, short)]
    pub workspace: PathBuf,
    /// JSON-lines edit-event log
    #[arg(long, short)]
    pub events: PathBuf,
    /// Session id for the records, a random one by default
    #[arg(long)]
    pub session_id: Option<String>,
    /// Model reported in the records
    #[arg(long, default_value = "unknown")]
    pub model: String,
    /// Post records to this endpoint instead of discovering one
    #[arg(long, value_parser = parse_url)]
    pub endpoint: Option<Url>,
    /// Always write records to local files
    #[arg(long, conflicts_with = "endpoint")]
    pub local: bool,
}

/// One line of the replay log.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
struct ReplayEntry {
    file: String,
    #[serde(default)]
    done: bool,
    /// New contents, written after the event is observed.
    #[serde(default)]
    content: Option<String>,
}

fn parse_log(log: &str) -> Result<Vec<ReplayEntry>> {
    log.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| serde_json::from_str(line).wrap_err_with(|| format!("invalid event on line {}", i + 1)))
        .collect()
}

impl ReplayArgs {
    pub async fn execute(self, config: &MetricsConfig) -> Result<ExitCode> {
        if !self.workspace.is_dir() {
            bail!("{} is not a directory", self.workspace.display());
        }
        let log = tokio::fs::read_to_string(&self.events)
            .await
            .wrap_err_with(|| format!("failed to read {}", self.events.display()))?;
        let entries = parse_log(&log)?;

        let mut config = config.clone();
        if self.local {
            config.output_mode = OutputMode::Local;
        }
        if self.endpoint.is_some() {
            config.endpoint = self.endpoint.clone();
        }

        let resolver = Arc::new(build_resolver(&config, vec![self.workspace.clone()], Arc::new(EndpointCache::new())));
        let context = RecordContext {
            session_id: self
                .session_id
                .clone()
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            response_id: uuid::Uuid::new_v4().to_string(),
            command: Some("replay".to_string()),
            repository: repository_name(&resolver, &self.workspace).await,
            editor_version: env!("CARGO_PKG_VERSION").to_string(),
            model: self.model.clone(),
            ..Default::default()
        };
        let tracker = build_tracker(&config, &self.workspace, resolver, context);

        for entry in entries {
            let event = EditEvent {
                file: FileId::new(entry.file),
                is_done: entry.done,
            };
            tracker.observe(&event);
            if let Some(content) = entry.content {
                // The agent edits only after the original is on record.
                tracker.captured_original(&event.file).await;
                write_file(&resolve(&self.workspace, &event.file), &content).await?;
            }
        }

        let records = tracker.finalize().await;
        print_records(&records)?;
        Ok(ExitCode::SUCCESS)
    }
}

fn build_tracker(
    config: &MetricsConfig,
    workspace: &Path,
    resolver: Arc<EndpointResolver>,
    context: RecordContext,
) -> EditTracker {
    let documents = Arc::new(FsDocumentSource::with_root(workspace));
    let stabilizer = Stabilizer::new(
        documents.clone(),
        config.stabilize_interval,
        config.stabilize_max_retries,
    );
    let options = DiffOptions {
        max_computation_time: config.diff_timeout,
        ..Default::default()
    };
    let emitter = RecordEmitter::new(Some(workspace.to_path_buf()))
        .with_config(config)
        .with_resolver(resolver);

    EditTracker::new(
        context,
        SnapshotCapturer::new(documents),
        DeltaComputer::new(stabilizer, Arc::new(SimilarDiffProvider::new()), options),
        Arc::new(emitter),
        Arc::new(TracingTelemetrySink),
    )
}

/// First git remote of the workspace, or its path when it has none.
async fn repository_name(resolver: &EndpointResolver, workspace: &Path) -> String {
    match resolver.repository_urls().await.into_iter().next() {
        Some(url) => url,
        None => workspace.display().to_string(),
    }
}

fn resolve(workspace: &Path, file: &FileId) -> PathBuf {
    let path = file.to_path();
    if path.is_relative() { workspace.join(path) } else { path }
}

async fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    debug!(path = %path.display(), "replaying edit");
    tokio::fs::write(path, content)
        .await
        .wrap_err_with(|| format!("failed to write {}", path.display()))
}

fn print_records(records: &[LineEditRecord]) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    for record in records {
        writeln!(stdout, "{}", serde_json::to_string(record)?)?;
    }
    Ok(())
}

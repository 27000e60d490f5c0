use std::path::{
    Path,
    PathBuf,
};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{
    CONTENT_TYPE,
    USER_AGENT,
};
use tracing::{
    debug,
    warn,
};
use url::Url;

use crate::consts::{
    LOCAL_FILE_PREFIX,
    LOCAL_OUTPUT_DIR,
    REMOTE_EMIT_TIMEOUT,
    USER_AGENT as USER_AGENT_VALUE,
};
use crate::endpoint::EndpointResolver;
use crate::error::EmitError;
use crate::record::LineEditRecord;
use crate::settings::{
    MetricsConfig,
    OutputMode,
};

/// Where a record ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitOutcome {
    /// Posted to the metrics endpoint. `status` is `None` when the request never got a response.
    Remote { url: Url, status: Option<u16> },
    Local { path: PathBuf },
    Skipped,
}

/// Sends each completed record to the metrics endpoint, or writes it to a local file when no
/// endpoint is available.
pub struct RecordEmitter {
    enabled: bool,
    mode: OutputMode,
    resolver: Option<Arc<EndpointResolver>>,
    client: reqwest::Client,
    workspace_root: Option<PathBuf>,
    output_dir: PathBuf,
    remote_timeout: Duration,
}

impl RecordEmitter {
    /// Writes local files under `workspace_root` only.
    pub fn new(workspace_root: Option<PathBuf>) -> Self {
        Self {
            enabled: true,
            mode: OutputMode::Auto,
            resolver: None,
            client: reqwest::Client::new(),
            workspace_root,
            output_dir: PathBuf::from(LOCAL_OUTPUT_DIR),
            remote_timeout: REMOTE_EMIT_TIMEOUT,
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<EndpointResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_config(mut self, config: &MetricsConfig) -> Self {
        self.enabled = config.enabled;
        self.mode = config.output_mode;
        self.output_dir = config.output_dir.clone();
        self.remote_timeout = config.remote_timeout;
        self
    }

    /// Directory local records are written to, if there is one.
    pub fn local_dir(&self) -> Option<PathBuf> {
        match (&self.workspace_root, self.output_dir.is_absolute()) {
            (_, true) => Some(self.output_dir.clone()),
            (Some(root), false) => Some(root.join(&self.output_dir)),
            (None, false) => None,
        }
    }

    /// Emits `record` once. Failures are logged and never retried.
    pub async fn emit(&self, record: &LineEditRecord) -> EmitOutcome {
        if !self.enabled {
            return EmitOutcome::Skipped;
        }

        if self.mode == OutputMode::Auto {
            if let Some(resolver) = &self.resolver {
                if let Some(url) = resolver.resolve_metrics_endpoint().await {
                    let status = match self.post(&url, record).await {
                        Ok(status) => Some(status),
                        Err(err) => {
                            warn!(%url, %err, "failed to post line edit record");
                            None
                        },
                    };
                    return EmitOutcome::Remote { url, status };
                }
            }
        }

        let Some(dir) = self.local_dir() else {
            debug!(file = %record.delta.file_name, "no workspace root, dropping line edit record");
            return EmitOutcome::Skipped;
        };
        match write_local(&dir, record).await {
            Ok(path) => EmitOutcome::Local { path },
            Err(err) => {
                warn!(dir = %dir.display(), %err, "failed to write line edit record");
                EmitOutcome::Skipped
            },
        }
    }

    async fn post(&self, url: &Url, record: &LineEditRecord) -> Result<u16, EmitError> {
        let body = serde_json::to_vec(record)?;
        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, USER_AGENT_VALUE)
            .timeout(self.remote_timeout)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%url, status = status.as_u16(), %body, "metrics endpoint rejected line edit record");
        }
        Ok(status.as_u16())
    }
}

async fn write_local(dir: &Path, record: &LineEditRecord) -> Result<PathBuf, EmitError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(local_file_name(record));
    let json = serde_json::to_string_pretty(record)?;
    tokio::fs::write(&path, json).await?;
    debug!(path = %path.display(), "wrote line edit record");
    Ok(path)
}

/// `lineEdits-{timestamp}-{sessionId}-{file}.json`
pub fn local_file_name(record: &LineEditRecord) -> String {
    format!(
        "{LOCAL_FILE_PREFIX}-{}-{}-{}.json",
        record.timestamp.format("%Y%m%dT%H%M%S%3fZ"),
        sanitize_file_name(&record.session_id),
        sanitize_file_name(&record.delta.file_name),
    )
}

/// Replaces every character outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '.' | '_' | '-' => c,
            _ => '_',
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{
        TimeZone,
        Utc,
    };
    use mockito::Matcher;
    use serde_json::json;

    use super::*;
    use crate::delta::{
        FileDelta,
        LineDelta,
    };
    use crate::endpoint::{
        EndpointCache,
        GitRemoteDiscovery,
        HttpPolicyClient,
        StaticTokenProvider,
    };
    use crate::record::RecordContext;

    fn record(file_name: &str) -> LineEditRecord {
        let context = RecordContext {
            session_id: "session-1".into(),
            response_id: "response-1".into(),
            repository: "https://github.com/a/b".into(),
            editor_version: "1.0.0".into(),
            model: "test-model".into(),
            ..Default::default()
        };
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        LineEditRecord::new(&context, FileDelta::new(file_name, "rust", LineDelta::new(3, 1)), at)
    }

    fn resolver_for(policy_url: &str, endpoint: Option<Url>) -> Arc<EndpointResolver> {
        let policy = HttpPolicyClient::new(
            Url::parse(policy_url).unwrap(),
            Arc::new(StaticTokenProvider::new(None)),
        );
        Arc::new(
            EndpointResolver::new(
                Vec::new(),
                Arc::new(GitRemoteDiscovery::new()),
                Arc::new(policy),
                Arc::new(EndpointCache::new()),
            )
            .with_configured_endpoint(endpoint),
        )
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("main.rs"), "main.rs");
        assert_eq!(sanitize_file_name("my file (1).ts"), "my_file__1_.ts");
        assert_eq!(sanitize_file_name("ünï-cødé_ok"), "_n_-c_d__ok");
        for name in ["a/b\\c:d", "*?<>|\"", "tab\there", ""] {
            assert!(
                sanitize_file_name(name)
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            );
        }
    }

    #[test]
    fn test_local_file_name() {
        assert_eq!(
            local_file_name(&record("lib (copy).rs")),
            "lineEdits-20250304T050607000Z-session-1-lib__copy_.rs.json"
        );
    }

    #[tokio::test]
    async fn test_local_emission_writes_pretty_json() {
        let dir = tempfile::tempdir().unwrap();
        let emitter = RecordEmitter::new(Some(dir.path().to_path_buf()));

        let outcome = emitter.emit(&record("main.rs")).await;
        let EmitOutcome::Local { path } = outcome else {
            panic!("expected a local record, got {outcome:?}");
        };
        assert_eq!(
            path,
            dir.path()
                .join(".vscode/agent-stats")
                .join("lineEdits-20250304T050607000Z-session-1-main.rs.json")
        );

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("\n  \"sessionId\": \"session-1\""));
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["fileName"], "main.rs");
        assert_eq!(value["linesAdded"], 3);
        assert_eq!(value["linesRemoved"], 1);
        assert!(value.get("agentId").is_none());
    }

    #[tokio::test]
    async fn test_without_workspace_root_is_skipped() {
        let emitter = RecordEmitter::new(None);
        assert_eq!(emitter.emit(&record("main.rs")).await, EmitOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_disabled_emitter_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let config = MetricsConfig {
            enabled: false,
            ..Default::default()
        };
        let emitter = RecordEmitter::new(Some(dir.path().to_path_buf())).with_config(&config);

        assert_eq!(emitter.emit(&record("main.rs")).await, EmitOutcome::Skipped);
        assert!(!dir.path().join(".vscode").exists());
    }

    #[tokio::test]
    async fn test_remote_emission_posts_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest")
            .match_header("content-type", "application/json")
            .match_body(Matcher::PartialJson(json!({
                "sessionId": "session-1",
                "fileName": "main.rs",
                "linesAdded": 3,
                "linesRemoved": 1,
            })))
            .with_status(202)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let endpoint = Url::parse(&format!("{}/ingest", server.url())).unwrap();
        let emitter = RecordEmitter::new(Some(dir.path().to_path_buf()))
            .with_resolver(resolver_for(&server.url(), Some(endpoint.clone())));

        assert_eq!(emitter.emit(&record("main.rs")).await, EmitOutcome::Remote {
            url: endpoint,
            status: Some(202),
        });
        assert!(!dir.path().join(".vscode").exists());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_remote_rejection_is_not_fatal() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/ingest")
            .with_status(500)
            .with_body("boom")
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let endpoint = Url::parse(&format!("{}/ingest", server.url())).unwrap();
        let emitter = RecordEmitter::new(Some(dir.path().to_path_buf()))
            .with_resolver(resolver_for(&server.url(), Some(endpoint.clone())));

        assert_eq!(emitter.emit(&record("main.rs")).await, EmitOutcome::Remote {
            url: endpoint,
            status: Some(500),
        });
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_falls_back_to_local_when_no_endpoint_resolves() {
        let mut server = mockito::Server::new_async().await;
        let policy = server
            .mock("GET", "/policy")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("[]")
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let emitter = RecordEmitter::new(Some(dir.path().to_path_buf()))
            .with_resolver(resolver_for(&format!("{}/policy", server.url()), None));

        assert!(matches!(
            emitter.emit(&record("a.rs")).await,
            EmitOutcome::Local { .. }
        ));
        // The empty outcome is cached, so the second record does not query again.
        assert!(matches!(
            emitter.emit(&record("b.rs")).await,
            EmitOutcome::Local { .. }
        ));
        policy.assert_async().await;
    }

    #[tokio::test]
    async fn test_local_mode_ignores_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let config = MetricsConfig {
            output_mode: OutputMode::Local,
            output_dir: PathBuf::from("metrics"),
            ..Default::default()
        };
        let emitter = RecordEmitter::new(Some(dir.path().to_path_buf()))
            .with_config(&config)
            .with_resolver(resolver_for(
                "http://127.0.0.1:9/policy",
                Some(Url::parse("http://127.0.0.1:9/ingest").unwrap()),
            ));

        let EmitOutcome::Local { path } = emitter.emit(&record("main.rs")).await else {
            panic!("expected a local record");
        };
        assert!(path.starts_with(dir.path().join("metrics")));
    }
}

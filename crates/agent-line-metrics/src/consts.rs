// Defaults for every tunable; `settings::MetricsConfig` can override most of them.

use std::time::Duration;

/// Delay between two reads while waiting for a document to settle.
pub const STABILIZE_INTERVAL: Duration = Duration::from_millis(100);

/// Number of re-reads before the stabilizer gives up and returns the last read.
pub const STABILIZE_MAX_RETRIES: usize = 10;

/// Upper bound handed to the diff provider.
pub const DIFF_MAX_COMPUTATION_TIME: Duration = Duration::from_secs(10);

/// Timeout for the record POST to the metrics endpoint.
pub const REMOTE_EMIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for a single policy lookup.
pub const POLICY_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum number of repository URLs sent in one policy query.
pub const POLICY_BATCH_SIZE: usize = 10;

/// Policy rule name that designates the metrics endpoint.
pub const METRICS_RULE_NAME: &str = "copilot-metrics";

/// Policy rule name that applies to everything.
pub const WILDCARD_RULE_NAME: &str = "*";

/// Sent on its own when an empty repository list is rejected, purely to trigger enterprise-level
/// policy evaluation.
pub const PLACEHOLDER_REPOSITORY_URL: &str = "https://github.com/github/placeholder";

pub const DEFAULT_POLICY_SERVICE_URL: &str = "https://api.github.com/copilot_internal/content_exclusion";

/// Output directory for local records, relative to the workspace root.
pub const LOCAL_OUTPUT_DIR: &str = ".vscode/agent-stats";

pub const LOCAL_FILE_PREFIX: &str = "lineEdits";

pub const SETTINGS_FILE_NAME: &str = "agent-line-metrics.json";

pub const LOG_ENV_VAR: &str = "AGENT_LINE_METRICS_LOG";

pub const TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

pub const USER_AGENT: &str = concat!("agent-line-metrics/", env!("CARGO_PKG_VERSION"));

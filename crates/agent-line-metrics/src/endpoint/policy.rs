//! Content-exclusion policy lookups, repurposed to carry the metrics endpoint.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{
    ACCEPT,
    AUTHORIZATION,
    USER_AGENT,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;
use url::Url;

use crate::consts::{
    METRICS_RULE_NAME,
    POLICY_REQUEST_TIMEOUT,
    TOKEN_ENV_VAR,
    USER_AGENT as USER_AGENT_VALUE,
    WILDCARD_RULE_NAME,
};
use crate::error::PolicyError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRuleGroup {
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyRule {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<RuleSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSource {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl PolicyRule {
    pub fn source_name(&self) -> Option<&str> {
        self.source.as_ref().map(|source| source.name.as_str())
    }

    /// The rule's first path, if it is an absolute http(s) URL.
    pub fn endpoint_url(&self) -> Option<Url> {
        let url = Url::parse(self.paths.first()?).ok()?;
        matches!(url.scheme(), "http" | "https")
            .then_some(url)
            .filter(|url| url.has_host())
    }
}

/// Picks the metrics endpoint out of policy rules.
///
/// A rule named [METRICS_RULE_NAME] wins outright, then the first [WILDCARD_RULE_NAME] rule, then
/// the first qualifying rule of any name.
#[derive(Debug, Clone, Default)]
pub struct RuleSelection {
    named: Option<Url>,
    wildcard: Option<Url>,
    first: Option<Url>,
}

impl RuleSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Breaks once the named rule is found; nothing scanned afterwards can change the outcome.
    pub fn consider(&mut self, rule: &PolicyRule) -> ControlFlow<()> {
        let Some(url) = rule.endpoint_url() else {
            return ControlFlow::Continue(());
        };
        match rule.source_name() {
            Some(METRICS_RULE_NAME) => {
                self.named = Some(url);
                return ControlFlow::Break(());
            },
            Some(WILDCARD_RULE_NAME) => {
                self.wildcard.get_or_insert(url);
            },
            _ => {
                self.first.get_or_insert(url);
            },
        }
        ControlFlow::Continue(())
    }

    pub fn consider_groups(&mut self, groups: &[PolicyRuleGroup]) -> ControlFlow<()> {
        for rule in groups.iter().flat_map(|group| &group.rules) {
            if self.consider(rule).is_break() {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    pub fn best(self) -> Option<Url> {
        self.named.or(self.wildcard).or(self.first)
    }
}

/// Obtains a session token without prompting the user.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn session_token(&self) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider(Option<String>);

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self(token.filter(|token| !token.trim().is_empty()))
    }

    pub fn from_env() -> Self {
        Self::new(std::env::var(TOKEN_ENV_VAR).ok())
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn session_token(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Queries the policy service for a batch of repository URLs.
#[async_trait]
pub trait PolicyClient: Send + Sync {
    async fn query(&self, repositories: &[String]) -> Result<Vec<PolicyRuleGroup>, PolicyError>;
}

#[derive(Clone)]
pub struct HttpPolicyClient {
    url: Url,
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    timeout: Duration,
}

impl HttpPolicyClient {
    pub fn new(url: Url, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
            tokens,
            timeout: POLICY_REQUEST_TIMEOUT,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl PolicyClient for HttpPolicyClient {
    async fn query(&self, repositories: &[String]) -> Result<Vec<PolicyRuleGroup>, PolicyError> {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("repos", &repositories.join(","))
            .append_pair("scope", "repo");

        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "application/json")
            .header(USER_AGENT, USER_AGENT_VALUE)
            .timeout(self.timeout);
        if let Some(token) = self.tokens.session_token().await {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        debug!(count = repositories.len(), "querying policy service");
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(PolicyError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(serde_json::from_slice(&body)?)
    }
}

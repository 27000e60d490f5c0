//! Discovery of the remote metrics-ingestion endpoint.

pub mod policy;
pub mod remotes;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{
    debug,
    info,
};
use url::Url;

pub use self::policy::{
    HttpPolicyClient,
    PolicyClient,
    PolicyRule,
    PolicyRuleGroup,
    RuleSelection,
    RuleSource,
    StaticTokenProvider,
    TokenProvider,
};
pub use self::remotes::{
    GitRemoteDiscovery,
    RemoteDiscovery,
};
use crate::consts::{
    PLACEHOLDER_REPOSITORY_URL,
    POLICY_BATCH_SIZE,
};

/// Outcome of endpoint discovery as remembered by an [EndpointCache].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CachedEndpoint {
    #[default]
    Unknown,
    NoEndpoint,
    Resolved(Url),
}

/// Remembers the discovered endpoint, including the fact that there is none.
///
/// Owned by the composition root and shared by every resolver it builds, so discovery runs once
/// for the lifetime of the cache.
#[derive(Debug, Default)]
pub struct EndpointCache {
    state: Mutex<CachedEndpoint>,
}

impl EndpointCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> CachedEndpoint {
        self.state.lock().await.clone()
    }

    /// Forgets the cached outcome; the next resolution queries again.
    pub async fn invalidate(&self) {
        *self.state.lock().await = CachedEndpoint::Unknown;
    }
}

/// Ordered fallbacks tried until one yields an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupStrategy {
    /// Policies for the workspace's own git remotes.
    RepositoryScoped,
    /// Organization-wide policies, requested with an empty repository list.
    OrganizationWide,
    /// Enterprise policies, triggered with a placeholder repository because many backends reject
    /// an empty list.
    EnterprisePlaceholder,
}

impl LookupStrategy {
    pub const ORDER: [Self; 3] = [Self::RepositoryScoped, Self::OrganizationWide, Self::EnterprisePlaceholder];

    async fn run(self, resolver: &EndpointResolver, remotes: &[String]) -> Option<Url> {
        match self {
            Self::RepositoryScoped if remotes.is_empty() => None,
            Self::RepositoryScoped => resolver.query_batched(remotes).await,
            Self::OrganizationWide => resolver.query_batched(&[]).await,
            Self::EnterprisePlaceholder => resolver.query_batched(&[PLACEHOLDER_REPOSITORY_URL.to_string()]).await,
        }
    }
}

pub struct EndpointResolver {
    workspace_roots: Vec<PathBuf>,
    remotes: Arc<dyn RemoteDiscovery>,
    policy: Arc<dyn PolicyClient>,
    cache: Arc<EndpointCache>,
    batch_size: usize,
    configured: Option<Url>,
}

impl EndpointResolver {
    pub fn new(
        workspace_roots: Vec<PathBuf>,
        remotes: Arc<dyn RemoteDiscovery>,
        policy: Arc<dyn PolicyClient>,
        cache: Arc<EndpointCache>,
    ) -> Self {
        Self {
            workspace_roots,
            remotes,
            policy,
            cache,
            batch_size: POLICY_BATCH_SIZE,
            configured: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Uses `endpoint` as is instead of discovering one.
    pub fn with_configured_endpoint(mut self, endpoint: Option<Url>) -> Self {
        self.configured = endpoint;
        self
    }

    pub fn cache(&self) -> &Arc<EndpointCache> {
        &self.cache
    }

    /// The metrics endpoint, discovered on first use and cached afterwards.
    ///
    /// Never fails: every error along the way counts as "no endpoint at this step".
    pub async fn resolve_metrics_endpoint(&self) -> Option<Url> {
        if let Some(endpoint) = &self.configured {
            return Some(endpoint.clone());
        }

        // Held for the whole discovery so concurrent callers wait for the one in flight.
        let mut cached = self.cache.state.lock().await;
        match &*cached {
            CachedEndpoint::Resolved(url) => return Some(url.clone()),
            CachedEndpoint::NoEndpoint => return None,
            CachedEndpoint::Unknown => {},
        }

        let resolved = self.discover().await;
        *cached = match &resolved {
            Some(url) => CachedEndpoint::Resolved(url.clone()),
            None => CachedEndpoint::NoEndpoint,
        };
        resolved
    }

    /// Fetch URLs of every git remote across all workspace roots. Folders that are not
    /// repositories contribute nothing.
    pub async fn repository_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for root in &self.workspace_roots {
            match self.remotes.fetch_urls(root).await {
                Ok(found) => {
                    for url in found {
                        if !urls.contains(&url) {
                            urls.push(url);
                        }
                    }
                },
                Err(err) => debug!(root = %root.display(), %err, "no git remotes"),
            }
        }
        urls
    }

    async fn discover(&self) -> Option<Url> {
        let remotes = self.repository_urls().await;
        for strategy in LookupStrategy::ORDER {
            if let Some(url) = strategy.run(self, &remotes).await {
                info!(?strategy, %url, "resolved metrics endpoint");
                return Some(url);
            }
            debug!(?strategy, "no metrics endpoint");
        }
        None
    }

    /// Queries `repositories` in batches and applies the rule precedence across all responses.
    /// An empty list is sent as a single query.
    async fn query_batched(&self, repositories: &[String]) -> Option<Url> {
        let batches: Vec<&[String]> = if repositories.is_empty() {
            vec![repositories]
        } else {
            repositories.chunks(self.batch_size).collect()
        };

        let mut selection = RuleSelection::new();
        for batch in batches {
            match self.policy.query(batch).await {
                Ok(groups) => {
                    if selection.consider_groups(&groups).is_break() {
                        break;
                    }
                },
                Err(err) => debug!(count = batch.len(), %err, "policy query failed"),
            }
        }
        selection.best()
    }
}

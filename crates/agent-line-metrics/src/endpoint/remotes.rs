use std::path::{
    Path,
    PathBuf,
};

use async_trait::async_trait;
use git2::Repository;

use crate::error::RemoteError;

/// Lists the git remote fetch URLs of a workspace folder.
#[async_trait]
pub trait RemoteDiscovery: Send + Sync {
    async fn fetch_urls(&self, root: &Path) -> Result<Vec<String>, RemoteError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GitRemoteDiscovery;

impl GitRemoteDiscovery {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RemoteDiscovery for GitRemoteDiscovery {
    async fn fetch_urls(&self, root: &Path) -> Result<Vec<String>, RemoteError> {
        let root: PathBuf = root.to_path_buf();
        tokio::task::spawn_blocking(move || remote_fetch_urls(&root))
            .await
            .map_err(|err| RemoteError::Worker(err.to_string()))?
    }
}

fn remote_fetch_urls(root: &Path) -> Result<Vec<String>, RemoteError> {
    let repo = Repository::discover(root)?;
    let names = repo.remotes()?;

    let mut urls = Vec::new();
    for name in names.iter().flatten() {
        let remote = repo.find_remote(name)?;
        if let Some(url) = remote.url() {
            if !urls.iter().any(|existing| existing == url) {
                urls.push(url.to_string());
            }
        }
    }
    Ok(urls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_urls_of_repository() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        repo.remote("origin", "https://github.com/octocat/hello.git").unwrap();
        repo.remote("upstream", "git@github.com:octo-org/hello.git").unwrap();
        repo.remote("mirror", "https://github.com/octocat/hello.git").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let mut urls = GitRemoteDiscovery::new()
            .fetch_urls(&dir.path().join("nested"))
            .await
            .unwrap();
        urls.sort();
        assert_eq!(urls, vec![
            "git@github.com:octo-org/hello.git".to_string(),
            "https://github.com/octocat/hello.git".to_string(),
        ]);
    }

    #[tokio::test]
    async fn test_fetch_urls_outside_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = GitRemoteDiscovery::new().fetch_urls(dir.path()).await;
        assert!(matches!(result, Err(RemoteError::Git(_))));
    }
}

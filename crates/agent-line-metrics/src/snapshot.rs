use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::{
    BoxFuture,
    Shared,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::document::{
    DocumentSnapshot,
    DocumentSource,
    FileId,
};
use crate::error::DocumentError;

/// A read of a file's original text that may still be in flight.
pub type PendingOriginal = Shared<BoxFuture<'static, Arc<str>>>;

/// Captures the pre-edit text of each file exactly once.
#[derive(Clone)]
pub struct SnapshotCapturer {
    documents: Arc<dyn DocumentSource>,
    pending: Arc<Mutex<HashMap<FileId, PendingOriginal>>>,
    resolved: Arc<Mutex<HashMap<FileId, Arc<str>>>>,
}

impl SnapshotCapturer {
    pub fn new(documents: Arc<dyn DocumentSource>) -> Self {
        Self {
            documents,
            pending: Default::default(),
            resolved: Default::default(),
        }
    }

    /// Starts reading the original text of `file` unless a read was already started.
    ///
    /// The read runs in the background; a file that cannot be read (e.g. it does not exist yet)
    /// resolves to empty text.
    pub fn capture_original(&self, file: &FileId) -> PendingOriginal {
        let mut pending = self.pending.lock();
        if let Some(read) = pending.get(file) {
            return read.clone();
        }

        let documents = Arc::clone(&self.documents);
        let resolved = Arc::clone(&self.resolved);
        let key = file.clone();
        let handle = tokio::spawn(async move {
            let text: Arc<str> = match documents.open_snapshot(&key).await {
                Ok(snapshot) => snapshot.text.into(),
                Err(err) => {
                    debug!(file = %key, %err, "no original snapshot, treating file as new");
                    Arc::from("")
                },
            };
            resolved.lock().insert(key, Arc::clone(&text));
            text
        });

        let read = async move {
            handle.await.unwrap_or_else(|err| {
                debug!(%err, "original snapshot read was aborted");
                Arc::from("")
            })
        }
        .boxed()
        .shared();
        pending.insert(file.clone(), read.clone());
        read
    }

    /// The captured original text of `file`. Files that were never captured have an empty original.
    pub async fn original(&self, file: &FileId) -> Arc<str> {
        let read = self.pending.lock().get(file).cloned();
        match read {
            Some(read) => read.await,
            None => Arc::from(""),
        }
    }

    /// The captured original text, if the read already finished.
    pub fn original_if_ready(&self, file: &FileId) -> Option<Arc<str>> {
        self.resolved.lock().get(file).cloned()
    }

    pub fn is_captured(&self, file: &FileId) -> bool {
        self.pending.lock().contains_key(file)
    }
}

/// Waits for a document's contents to settle after an edit.
#[derive(Clone)]
pub struct Stabilizer {
    documents: Arc<dyn DocumentSource>,
    interval: Duration,
    max_retries: usize,
}

impl Stabilizer {
    pub fn new(documents: Arc<dyn DocumentSource>, interval: Duration, max_retries: usize) -> Self {
        Self {
            documents,
            interval,
            max_retries,
        }
    }

    /// Returns the contents of `file` once two consecutive reads agree, or the last read once the
    /// retry budget is spent.
    ///
    /// Sources that publish change notifications are instead read once after a quiet window of
    /// one interval, bounded by the same total budget.
    pub async fn stable_snapshot(&self, file: &FileId) -> Result<DocumentSnapshot, DocumentError> {
        match self.documents.watch(file) {
            Some(changes) => self.settle_with_notifications(file, changes).await,
            None => self.poll_until_stable(file).await,
        }
    }

    async fn poll_until_stable(&self, file: &FileId) -> Result<DocumentSnapshot, DocumentError> {
        let mut previous = self.documents.open_snapshot(file).await?;
        for _ in 0..self.max_retries {
            tokio::time::sleep(self.interval).await;
            let current = self.documents.open_snapshot(file).await?;
            if current.text == previous.text {
                return Ok(current);
            }
            previous = current;
        }

        debug!(%file, retries = self.max_retries, "document did not settle, using the last read");
        Ok(previous)
    }

    async fn settle_with_notifications(
        &self,
        file: &FileId,
        mut changes: watch::Receiver<u64>,
    ) -> Result<DocumentSnapshot, DocumentError> {
        let deadline = Instant::now() + self.interval * self.max_retries as u32;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!(%file, "document kept changing, reading it anyway");
                break;
            }
            match tokio::time::timeout(self.interval.min(remaining), changes.changed()).await {
                Ok(Ok(())) => continue,
                // Quiet window elapsed, or the document went away.
                Ok(Err(_)) | Err(_) => break,
            }
        }

        self.documents.open_snapshot(file).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{
        AtomicUsize,
        Ordering,
    };

    use async_trait::async_trait;

    use super::*;
    use crate::document::MemoryDocumentSource;

    /// Returns the scripted texts in order, repeating the last one.
    struct ScriptedSource {
        texts: Vec<&'static str>,
        reads: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(texts: Vec<&'static str>) -> Self {
            Self {
                texts,
                reads: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DocumentSource for ScriptedSource {
        async fn open_snapshot(&self, _file: &FileId) -> Result<DocumentSnapshot, DocumentError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            let text = self.texts[n.min(self.texts.len() - 1)];
            Ok(DocumentSnapshot {
                text: text.to_string(),
                language_id: "plaintext".to_string(),
            })
        }
    }

    /// Every read returns a different text.
    #[derive(Default)]
    struct ChurningSource {
        reads: AtomicUsize,
    }

    #[async_trait]
    impl DocumentSource for ChurningSource {
        async fn open_snapshot(&self, _file: &FileId) -> Result<DocumentSnapshot, DocumentError> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(DocumentSnapshot {
                text: n.to_string(),
                language_id: "plaintext".to_string(),
            })
        }
    }

    /// Slow reads, counted.
    #[derive(Default)]
    struct SlowSource {
        reads: AtomicUsize,
    }

    #[async_trait]
    impl DocumentSource for SlowSource {
        async fn open_snapshot(&self, file: &FileId) -> Result<DocumentSnapshot, DocumentError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if file.as_str() == "missing" {
                return Err(DocumentError::NotFound(file.to_string()));
            }
            Ok(DocumentSnapshot {
                text: format!("contents of {file}"),
                language_id: "plaintext".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_original_reads_once() {
        let source = Arc::new(SlowSource::default());
        let capturer = SnapshotCapturer::new(source.clone());
        let file = FileId::new("a.txt");

        let first = capturer.capture_original(&file);
        let second = capturer.capture_original(&file);
        assert!(capturer.original_if_ready(&file).is_none());

        let (a, b) = futures::join!(first, second);
        assert_eq!(&*a, "contents of a.txt");
        assert_eq!(a, b);
        assert_eq!(&*capturer.original(&file).await, "contents of a.txt");
        assert_eq!(source.reads.load(Ordering::SeqCst), 1);
        assert_eq!(capturer.original_if_ready(&file).as_deref(), Some("contents of a.txt"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_original_of_missing_file_is_empty() {
        let capturer = SnapshotCapturer::new(Arc::new(SlowSource::default()));
        let file = FileId::new("missing");

        capturer.capture_original(&file);
        assert!(capturer.is_captured(&file));
        assert_eq!(&*capturer.original(&file).await, "");
        assert_eq!(&*capturer.original(&FileId::new("never-seen")).await, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_snapshot_returns_after_two_equal_reads() {
        let source = Arc::new(ScriptedSource::new(vec!["a", "b", "b", "c"]));
        let stabilizer = Stabilizer::new(source.clone(), Duration::from_millis(100), 10);

        let start = Instant::now();
        let snapshot = stabilizer.stable_snapshot(&FileId::new("f")).await.unwrap();
        assert_eq!(snapshot.text, "b");
        assert_eq!(source.reads.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_snapshot_gives_up_after_budget() {
        let source = Arc::new(ChurningSource::default());
        let stabilizer = Stabilizer::new(source.clone(), Duration::from_millis(100), 10);

        let start = Instant::now();
        let snapshot = stabilizer.stable_snapshot(&FileId::new("f")).await.unwrap();
        assert_eq!(snapshot.text, "10");
        assert_eq!(source.reads.load(Ordering::SeqCst), 11);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_snapshot_waits_for_quiet_window() {
        let source = Arc::new(MemoryDocumentSource::new());
        source.set("f.rs", "v1");
        let stabilizer = Stabilizer::new(source.clone(), Duration::from_millis(100), 10);

        let writer = {
            let source = Arc::clone(&source);
            tokio::spawn(async move {
                for text in ["v2", "v3"] {
                    tokio::time::sleep(Duration::from_millis(60)).await;
                    source.set("f.rs", text);
                }
            })
        };

        let start = Instant::now();
        let snapshot = stabilizer.stable_snapshot(&FileId::new("f.rs")).await.unwrap();
        writer.await.unwrap();
        assert_eq!(snapshot.text, "v3");
        assert_eq!(start.elapsed(), Duration::from_millis(220));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stable_snapshot_of_removed_document_fails() {
        let source = Arc::new(MemoryDocumentSource::new());
        source.set("f.rs", "v1");
        let stabilizer = Stabilizer::new(source.clone(), Duration::from_millis(100), 10);

        let changes = source.watch(&FileId::new("f.rs")).unwrap();
        source.remove(&FileId::new("f.rs"));
        let result = stabilizer.settle_with_notifications(&FileId::new("f.rs"), changes).await;
        assert!(matches!(result, Err(DocumentError::NotFound(_))));
    }
}

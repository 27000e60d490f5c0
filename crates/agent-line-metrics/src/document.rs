use std::collections::HashMap;
use std::fmt;
use std::path::{
    Path,
    PathBuf,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{
    Deserialize,
    Serialize,
};
use tokio::sync::watch;

use crate::delta::language_for_path;
use crate::error::DocumentError;

/// Identifies a tracked file by its display path (or URI).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(String);

impl FileId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment, falling back to the whole id.
    pub fn file_name(&self) -> &str {
        self.0
            .rsplit(['/', '\\'])
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.0)
    }

    /// Lower-cased extension of the file name, if any.
    pub fn extension(&self) -> Option<String> {
        let name = self.file_name();
        let (stem, ext) = name.rsplit_once('.')?;
        if stem.is_empty() || ext.is_empty() {
            return None;
        }
        Some(ext.to_ascii_lowercase())
    }

    pub fn to_path(&self) -> PathBuf {
        PathBuf::from(self.0.strip_prefix("file://").unwrap_or(&self.0))
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FileId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<&Path> for FileId {
    fn from(value: &Path) -> Self {
        Self::new(value.to_string_lossy())
    }
}

/// A single notification from the agent's edit tools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditEvent {
    pub file: FileId,
    /// Set once the tool has finished editing this file.
    #[serde(default, rename = "done")]
    pub is_done: bool,
}

impl EditEvent {
    pub fn editing(file: impl Into<FileId>) -> Self {
        Self {
            file: file.into(),
            is_done: false,
        }
    }

    pub fn done(file: impl Into<FileId>) -> Self {
        Self {
            file: file.into(),
            is_done: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub text: String,
    pub language_id: String,
}

/// Read access to the current contents of documents.
///
/// Implementations are assumed to be eventually consistent: right after an edit the returned text
/// may still lag behind.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn open_snapshot(&self, file: &FileId) -> Result<DocumentSnapshot, DocumentError>;

    /// Change notifications for `file`, if the source supports them. The value is a revision
    /// counter; only the fact that it changed matters.
    fn watch(&self, _file: &FileId) -> Option<watch::Receiver<u64>> {
        None
    }
}

/// Reads documents straight from disk.
#[derive(Debug, Clone, Default)]
pub struct FsDocumentSource {
    root: Option<PathBuf>,
}

impl FsDocumentSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves relative file ids against `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, file: &FileId) -> PathBuf {
        let path = file.to_path();
        match &self.root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path,
        }
    }
}

#[async_trait]
impl DocumentSource for FsDocumentSource {
    async fn open_snapshot(&self, file: &FileId) -> Result<DocumentSnapshot, DocumentError> {
        let path = self.resolve(file);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(DocumentError::NotFound(path.display().to_string()));
            },
            Err(err) => return Err(err.into()),
        };
        let text = String::from_utf8(bytes).map_err(|_err| DocumentError::InvalidUtf8(path.display().to_string()))?;

        Ok(DocumentSnapshot {
            text,
            language_id: language_for_path(file).to_string(),
        })
    }
}

/// In-memory documents, for hosts that keep their own buffers.
///
/// Every [Self::set] bumps the revision published to watchers.
#[derive(Debug, Default)]
pub struct MemoryDocumentSource {
    documents: Mutex<HashMap<FileId, MemoryDocument>>,
}

#[derive(Debug)]
struct MemoryDocument {
    snapshot: DocumentSnapshot,
    revision: watch::Sender<u64>,
}

impl MemoryDocumentSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, file: impl Into<FileId>, text: impl Into<String>) {
        let file = file.into();
        let language_id = language_for_path(&file).to_string();
        self.set_with_language(file, text, language_id);
    }

    pub fn set_with_language(&self, file: impl Into<FileId>, text: impl Into<String>, language_id: impl Into<String>) {
        let file = file.into();
        let snapshot = DocumentSnapshot {
            text: text.into(),
            language_id: language_id.into(),
        };
        let mut documents = self.documents.lock();
        match documents.get_mut(&file) {
            Some(doc) => {
                doc.snapshot = snapshot;
                doc.revision.send_modify(|rev| *rev += 1);
            },
            None => {
                let (revision, _) = watch::channel(0);
                documents.insert(file, MemoryDocument { snapshot, revision });
            },
        }
    }

    pub fn remove(&self, file: &FileId) {
        if let Some(doc) = self.documents.lock().remove(file) {
            doc.revision.send_modify(|rev| *rev += 1);
        }
    }
}

#[async_trait]
impl DocumentSource for MemoryDocumentSource {
    async fn open_snapshot(&self, file: &FileId) -> Result<DocumentSnapshot, DocumentError> {
        self.documents
            .lock()
            .get(file)
            .map(|doc| doc.snapshot.clone())
            .ok_or_else(|| DocumentError::NotFound(file.to_string()))
    }

    fn watch(&self, file: &FileId) -> Option<watch::Receiver<u64>> {
        self.documents.lock().get(file).map(|doc| doc.revision.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_id_name_and_extension() {
        let id = FileId::new("/workspace/src/Main.RS");
        assert_eq!(id.file_name(), "Main.RS");
        assert_eq!(id.extension().as_deref(), Some("rs"));

        let id = FileId::new("C:\\repo\\notes.md");
        assert_eq!(id.file_name(), "notes.md");

        assert_eq!(FileId::new("/repo/.gitignore").extension(), None);
        assert_eq!(FileId::new("Makefile").extension(), None);
        assert_eq!(FileId::new("file:///tmp/a.py").to_path(), PathBuf::from("/tmp/a.py"));
    }

    #[test]
    fn test_edit_event_deserialize() {
        let ev: EditEvent = serde_json::from_str(r#"{"file": "src/lib.rs", "done": true}"#).unwrap();
        assert_eq!(ev, EditEvent::done("src/lib.rs"));

        let ev: EditEvent = serde_json::from_str(r#"{"file": "src/lib.rs"}"#).unwrap();
        assert!(!ev.is_done);
    }

    #[tokio::test]
    async fn test_fs_document_source() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "let a = 1;\n").unwrap();
        let source = FsDocumentSource::with_root(dir.path());

        let snapshot = source.open_snapshot(&FileId::new("a.ts")).await.unwrap();
        assert_eq!(snapshot.text, "let a = 1;\n");
        assert_eq!(snapshot.language_id, "typescript");

        assert!(matches!(
            source.open_snapshot(&FileId::new("missing.ts")).await,
            Err(DocumentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_document_source_notifies_watchers() {
        let source = MemoryDocumentSource::new();
        let file = FileId::new("lib.rs");
        source.set(file.clone(), "a");

        let mut rx = source.watch(&file).unwrap();
        source.set(file.clone(), "b");
        rx.changed().await.unwrap();

        let snapshot = source.open_snapshot(&file).await.unwrap();
        assert_eq!(snapshot.text, "b");
        assert_eq!(snapshot.language_id, "rust");
    }
}

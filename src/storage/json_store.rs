//! Durable JSON documents (snapshot, shift summary)
//!
//! Writes go to `<file>.tmp`, get synced, the current document is copied to
//! `<file>.bak`, then the temp file is renamed over the target. A crash at any
//! point leaves either the old or the new document readable, plus a backup.
//!
//! Loading walks primary -> backup -> repaired primary -> nothing.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io { path: path.to_path_buf(), source }
}

/// Where a loaded document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentSource {
    Primary,
    Backup,
    Repaired,
}

/// How many structural cut points the repair pass tries before giving up.
const MAX_REPAIR_ATTEMPTS: usize = 64;

#[derive(Debug, Clone)]
pub struct JsonDocumentStore {
    path: PathBuf,
}

impl JsonDocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> PathBuf {
        sibling(&self.path, "bak")
    }

    fn tmp_path(&self) -> PathBuf {
        sibling(&self.path, "tmp")
    }

    /// Atomically replace the document, keeping the previous one as backup.
    pub fn save<T: Serialize>(&self, doc: &T) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(doc)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err(parent))?;
        }

        let tmp = self.tmp_path();
        {
            let mut file = File::create(&tmp).map_err(io_err(&tmp))?;
            file.write_all(&json).map_err(io_err(&tmp))?;
            file.sync_all().map_err(io_err(&tmp))?;
        }

        if self.path.exists() {
            let bak = self.backup_path();
            std::fs::copy(&self.path, &bak).map_err(io_err(&bak))?;
        }

        std::fs::rename(&tmp, &self.path).map_err(io_err(&self.path))?;
        debug!(path = %self.path.display(), bytes = json.len(), "Document saved");
        Ok(())
    }

    /// Best available copy of the document, or `None` for a fresh start.
    pub fn load<T: DeserializeOwned>(&self) -> Option<T> {
        self.load_with_source().map(|(doc, _)| doc)
    }

    pub fn load_with_source<T: DeserializeOwned>(&self) -> Option<(T, DocumentSource)> {
        let primary = read_text(&self.path);

        if let Some(text) = &primary {
            match serde_json::from_str(text) {
                Ok(doc) => return Some((doc, DocumentSource::Primary)),
                Err(e) => warn!(
                    path = %self.path.display(),
                    error = %e,
                    "Document unreadable, trying backup"
                ),
            }
        }

        let bak = self.backup_path();
        if let Some(text) = read_text(&bak) {
            match serde_json::from_str(&text) {
                Ok(doc) => {
                    warn!(path = %bak.display(), "Loaded document from backup");
                    return Some((doc, DocumentSource::Backup));
                }
                Err(e) => warn!(path = %bak.display(), error = %e, "Backup unreadable"),
            }
        }

        if let Some(text) = &primary {
            if let Some(doc) = repair(text) {
                warn!(path = %self.path.display(), "Loaded repaired document");
                return Some((doc, DocumentSource::Repaired));
            }
            warn!(path = %self.path.display(), "Document could not be repaired, starting fresh");
        }
        None
    }

    /// Delete the document, its backup and any leftover temp file.
    pub fn remove(&self) -> Result<(), StoreError> {
        for path in [self.path.clone(), self.backup_path(), self.tmp_path()] {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::Io { path, source: e }),
            }
        }
        Ok(())
    }
}

/// `snapshot.json` -> `snapshot.json.<ext>`
fn sibling(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

fn read_text(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

// ============================================================================
// Repair
// ============================================================================

/// Parse a truncated document by closing whatever was left open.
///
/// The full text is tried first, then the text cut back to each earlier
/// top-level separator, so a half-written trailing member is dropped.
fn repair<T: DeserializeOwned>(text: &str) -> Option<T> {
    let scan = scan(text);
    let mut cuts = vec![text.len()];
    cuts.extend(scan.separators.iter().rev().take(MAX_REPAIR_ATTEMPTS).copied());

    cuts.into_iter().find_map(|cut| {
        let closed = close(&text[..cut])?;
        serde_json::from_str(&closed).ok()
    })
}

struct Scan {
    /// Byte offsets of `,` outside strings
    separators: Vec<usize>,
}

fn scan(text: &str) -> Scan {
    let mut separators = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            ',' => separators.push(i),
            _ => {}
        }
    }
    Scan { separators }
}

/// Close an unterminated string and every open object/array.
fn close(fragment: &str) -> Option<String> {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in fragment.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.pop() != Some(c) {
                    return None;
                }
            }
            _ => {}
        }
    }

    let mut out = fragment.to_string();
    if in_string {
        if escaped {
            out.pop();
        }
        out.push('"');
    }
    let trimmed = out.trim_end().trim_end_matches(',').trim_end().len();
    out.truncate(trimmed);
    if out.ends_with(':') {
        out.push_str("null");
    }
    if stack.is_empty() && out.trim().is_empty() {
        return None;
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Doc {
        count: u64,
        name: String,
        items: Vec<u32>,
        nested: Nested,
    }

    #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct Nested {
        a: f64,
        b: Option<bool>,
    }

    fn doc(count: u64) -> Doc {
        Doc {
            count,
            name: "line".into(),
            items: vec![1, 2, 3],
            nested: Nested { a: 1.5, b: Some(true) },
        }
    }

    #[test]
    fn test_save_keeps_previous_as_backup() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDocumentStore::new(dir.path().join("doc.json"));
        store.save(&doc(1)).unwrap();
        assert!(!store.backup_path().exists());
        store.save(&doc(2)).unwrap();

        let (loaded, source): (Doc, _) = store.load_with_source().unwrap();
        assert_eq!(loaded.count, 2);
        assert_eq!(source, DocumentSource::Primary);
        let bak: Doc = serde_json::from_str(&std::fs::read_to_string(store.backup_path()).unwrap()).unwrap();
        assert_eq!(bak.count, 1);
        assert!(!dir.path().join("doc.json.tmp").exists());
    }

    #[test]
    fn test_missing_document_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDocumentStore::new(dir.path().join("nothing.json"));
        assert!(store.load::<Doc>().is_none());
    }

    #[test]
    fn test_close_handles_open_string_and_trailing_comma() {
        assert_eq!(close(r#"{"a": [1, 2,"#).as_deref(), Some(r#"{"a": [1, 2]}"#));
        assert_eq!(close(r#"{"name": "li"#).as_deref(), Some(r#"{"name": "li"}"#));
        assert_eq!(close(r#"{"a":"#).as_deref(), Some(r#"{"a":null}"#));
        assert_eq!(close("{]"), None);
    }

    #[test]
    fn test_repair_drops_half_written_member() {
        let full = serde_json::to_string(&doc(7)).unwrap();
        let cut = full.find("\"nested\"").unwrap() + 5;
        let repaired: Doc = repair(&full[..cut]).unwrap();
        assert_eq!(repaired.count, 7);
        assert_eq!(repaired.items, vec![1, 2, 3]);
        assert_eq!(repaired.nested, Nested::default());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDocumentStore::new(dir.path().join("doc.json"));
        store.save(&doc(1)).unwrap();
        store.save(&doc(2)).unwrap();
        store.remove().unwrap();
        assert!(!store.path().exists());
        assert!(!store.backup_path().exists());
        store.remove().unwrap();
    }
}

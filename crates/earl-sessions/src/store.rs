use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::Result;
use crate::types::{PersistedSession, SessionsDocument};

/// Durable mapping from thread id to [`PersistedSession`], backed by a JSON
/// document written atomically: serialize, write to a sibling temp file with
/// mode 0600, then rename over the target. Reads tolerate a missing file,
/// malformed JSON, and unknown fields.
///
/// Keys unknown to the current schema are NOT preserved across a
/// read-modify-write cycle — the whole document is deserialized into
/// [`SessionsDocument`] and re-serialized from that typed form, so any key
/// outside of `sessions.<thread_id>.*` present in an externally edited file
/// is dropped on the next save. This is a deliberate simplification; see
/// DESIGN.md.
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the document, defaulting to empty on any read or parse failure.
    pub fn load(&self) -> SessionsDocument {
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, path = %self.path.display(), "sessions store malformed, starting empty");
                SessionsDocument::default()
            }),
            Err(e) => {
                debug!(error = %e, path = %self.path.display(), "sessions store not found, starting empty");
                SessionsDocument::default()
            }
        }
    }

    /// Atomically persist `doc`: write to a sibling temp file (mode 0600),
    /// then rename over `self.path`.
    pub fn save(&self, doc: &SessionsDocument) -> Result<()> {
        let body = serde_json::to_string_pretty(doc)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = sibling_tmp_path(&self.path);
        write_owner_only(&tmp_path, &body)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    pub fn get(&self, thread_id: &str) -> Option<PersistedSession> {
        self.load().sessions.get(thread_id).cloned()
    }

    pub fn upsert(&self, session: PersistedSession) -> Result<()> {
        let mut doc = self.load();
        doc.sessions.insert(session.thread_id.clone(), session);
        self.save(&doc)
    }

    pub fn remove(&self, thread_id: &str) -> Result<()> {
        let mut doc = self.load();
        doc.sessions.remove(thread_id);
        self.save(&doc)
    }

    /// Mutate the record for `thread_id` in place and persist, if present.
    pub fn update<F>(&self, thread_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut PersistedSession),
    {
        let mut doc = self.load();
        if let Some(session) = doc.sessions.get_mut(thread_id) {
            f(session);
            self.save(&doc)?;
        }
        Ok(())
    }
}

fn sibling_tmp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "sessions.json".to_string());
    let tmp_name = format!(".{}.{}.tmp", file_name, std::process::id());
    path.with_file_name(tmp_name)
}

#[cfg(unix)]
fn write_owner_only(path: &Path, body: &str) -> std::io::Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(body.as_bytes())
}

#[cfg(not(unix))]
fn write_owner_only(path: &Path, body: &str) -> std::io::Result<()> {
    std::fs::write(path, body)
}

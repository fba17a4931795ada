use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::KtResult;

/// Per-request registry for temporary audio artifacts.
///
/// Every intermediate file the pipeline creates is issued (or adopted) here,
/// under a request-scoped unique prefix so concurrent requests sharing one
/// work directory can never collide. [`ArtifactRegistry::purge`] deletes each
/// registered path exactly once; paths marked protected (the caller-owned
/// input) are skipped, deleting an already-missing file is a no-op, and
/// deletion failures are logged without replacing the primary result.
pub struct ArtifactRegistry {
    dir: PathBuf,
    prefix: String,
    sequence: u32,
    registered: Vec<PathBuf>,
    protected: Option<PathBuf>,
    purged: bool,
}

impl ArtifactRegistry {
    pub fn new(work_root: &Path) -> KtResult<Self> {
        fs::create_dir_all(work_root)?;
        let prefix = format!("kt-{}", Uuid::new_v4().simple());
        Ok(Self {
            dir: work_root.to_path_buf(),
            prefix,
            sequence: 0,
            registered: Vec::new(),
            protected: None,
            purged: false,
        })
    }

    /// The request-scoped filename prefix shared by every issued path.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Issue a fresh registered path: `<work>/<prefix>-<seq>-<label>.<ext>`.
    ///
    /// The file is not created; the caller writes it. It is deleted at purge
    /// time whether or not it ever came into existence.
    pub fn issue(&mut self, label: &str, extension: &str) -> PathBuf {
        self.sequence += 1;
        let path = self.dir.join(format!(
            "{}-{:02}-{}.{}",
            self.prefix, self.sequence, label, extension
        ));
        self.registered.push(path.clone());
        path
    }

    /// Register an externally-derived path (e.g. a sidecar file written by a
    /// subprocess next to an issued path) for deletion.
    pub fn adopt(&mut self, path: PathBuf) {
        self.registered.push(path);
    }

    /// Mark a path as caller-owned. Purge will never delete it, even if it
    /// was also registered under an alias.
    pub fn protect(&mut self, path: &Path) {
        self.protected = Some(path.to_path_buf());
    }

    /// Delete every registered artifact exactly once.
    ///
    /// Idempotent: a second call does nothing. Missing files are fine.
    pub fn purge(&mut self) {
        if self.purged {
            return;
        }
        self.purged = true;

        let unique: BTreeSet<PathBuf> = std::mem::take(&mut self.registered).into_iter().collect();
        for path in unique {
            if self.protected.as_deref() == Some(path.as_path()) {
                tracing::debug!(path = %path.display(), "skipping caller-owned artifact");
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), "artifact deleted");
                }
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {}
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %error,
                        "artifact cleanup failed"
                    );
                }
            }
        }
    }
}

impl Drop for ArtifactRegistry {
    fn drop(&mut self) {
        self.purge();
    }
}

use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Non-blocking exclusive lock on `<lock_dir>/<job>.lock`, held for the
/// lifetime of the value.
#[derive(Debug)]
pub struct JobRunLock {
    file: File,
    path: PathBuf,
}

impl JobRunLock {
    pub fn path_for(lock_dir: &Path, job: &str) -> PathBuf {
        lock_dir.join(format!("{job}.lock"))
    }

    pub fn try_acquire(
        path: &Path,
        run_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        if file.try_lock_exclusive().is_err() {
            return Ok(None);
        }

        let metadata = format!(
            "run_id={run_id}\nowner_pid={}\nacquired_at={}\n",
            std::process::id(),
            now.to_rfc3339(),
        );
        file.set_len(0)?;
        file.write_all(metadata.as_bytes())?;
        file.flush()?;

        Ok(Some(Self {
            file,
            path: path.to_path_buf(),
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for JobRunLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

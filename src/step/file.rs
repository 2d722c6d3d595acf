// src/step/file.rs
use crate::utils::logging::Logger;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

pub const CLEANED_UP_MESSAGE: &str = "kubectl configuration cleaned up";

/// A kubeconfig written for the duration of one step.
///
/// The file is readable by its owner only. It is removed by [`cleanup`]
/// or, failing that, when the guard is dropped; removal happens at most once.
///
/// [`cleanup`]: KubeconfigFile::cleanup
#[derive(Debug)]
pub struct KubeconfigFile {
    path: PathBuf,
    removed: bool,
}

impl KubeconfigFile {
    pub fn create(dir: &Path, contents: &[u8]) -> io::Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("kubeconfig-{}", Uuid::new_v4()));

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&path)?;

        // From here on the guard owns the path, so a failed write still
        // removes the partial file.
        let guard = KubeconfigFile {
            path,
            removed: false,
        };
        file.write_all(contents)?;
        file.sync_all()?;

        debug!("wrote kubeconfig to {}", guard.path.display());
        Ok(guard)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the file and reports the outcome to the build log. Returns
    /// `false` if removal failed; the failure is logged, not raised.
    pub fn cleanup(mut self, logger: &mut dyn Logger) -> bool {
        self.remove(Some(logger))
    }

    fn remove(&mut self, logger: Option<&mut dyn Logger>) -> bool {
        if self.removed {
            return true;
        }
        self.removed = true;

        match fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("removed kubeconfig {}", self.path.display());
                if let Some(logger) = logger {
                    logger.log(CLEANED_UP_MESSAGE);
                }
                true
            }
            Err(e) => {
                warn!("failed to remove kubeconfig {}: {}", self.path.display(), e);
                if let Some(logger) = logger {
                    logger.log(&format!(
                        "Failed to clean up kubectl configuration {}: {}",
                        self.path.display(),
                        e
                    ));
                }
                false
            }
        }
    }
}

impl Drop for KubeconfigFile {
    fn drop(&mut self) {
        self.remove(None);
    }
}

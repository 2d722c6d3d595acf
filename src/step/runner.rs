// src/step/runner.rs
use super::file::KubeconfigFile;
use crate::config::StepConfig;
use crate::credentials::CredentialBinding;
use crate::error::StepError;
use crate::kubeconfig::{merge_with, serialize, MergeOptions};
use crate::utils::logging::Logger;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Exit code reported when a step is cancelled (128 + SIGINT).
pub const CANCELLED_EXIT_CODE: i32 = 130;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Shared flag set when the step should stop, e.g. from a signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runs commands with a merged kubeconfig exposed through an environment
/// variable.
#[derive(Debug, Clone)]
pub struct StepRunner {
    env_var: String,
    temp_dir: PathBuf,
    options: MergeOptions,
    cancel: CancelToken,
}

impl StepRunner {
    pub fn new(env_var: impl Into<String>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            env_var: env_var.into(),
            temp_dir: temp_dir.into(),
            options: MergeOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn from_config(config: &StepConfig) -> Self {
        Self::new(config.env_var.clone(), config.temp_dir()).with_options(config.merge_options())
    }

    pub fn with_options(mut self, options: MergeOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Merges and serializes without touching the filesystem.
    pub fn render(&self, bindings: &[CredentialBinding]) -> Result<Vec<u8>, StepError> {
        let config = merge_with(bindings, &self.options)?;
        info!(
            "merged {} credential(s): {} cluster(s), {} context(s), current context '{}'",
            bindings.len(),
            config.clusters.len(),
            config.contexts.len(),
            config.current_context
        );
        Ok(serialize(&config)?)
    }

    /// Writes the merged kubeconfig to a fresh temp file. The merge runs
    /// first, so a failing merge never leaves a file behind.
    pub fn materialize(
        &self,
        bindings: &[CredentialBinding],
        logger: &mut dyn Logger,
    ) -> Result<KubeconfigFile, StepError> {
        let contents = self.render(bindings)?;
        let file = KubeconfigFile::create(&self.temp_dir, &contents)?;
        logger.debug_log(&format!(
            "kubectl configuration written to {}",
            file.path().display()
        ));
        Ok(file)
    }

    /// Runs `command` with the kubeconfig exposed, then removes the file
    /// whatever the outcome. Returns the command's exit code.
    pub fn run(
        &self,
        bindings: &[CredentialBinding],
        command: &[String],
        logger: &mut dyn Logger,
    ) -> Result<i32, StepError> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| StepError::InvalidStep("no command to run".to_string()))?;

        let kubeconfig = self.materialize(bindings, logger)?;
        let result = self.run_child(program, args, kubeconfig.path(), logger);
        kubeconfig.cleanup(logger);
        result
    }

    fn run_child(
        &self,
        program: &str,
        args: &[String],
        kubeconfig: &Path,
        logger: &mut dyn Logger,
    ) -> Result<i32, StepError> {
        if self.cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }

        debug!("running {} with {} set", program, self.env_var);
        let mut child = Command::new(program)
            .args(args)
            .env(&self.env_var, kubeconfig)
            .spawn()
            .map_err(|source| StepError::Spawn {
                command: program.to_string(),
                source,
            })?;

        loop {
            if let Some(status) = child.try_wait()? {
                let code = exit_code(status);
                debug!("{} exited with {}", program, code);
                // A terminal interrupt reaches the child too; report it as
                // a cancellation rather than a plain failure.
                if self.cancel.is_cancelled() {
                    return Err(StepError::Cancelled);
                }
                return Ok(code);
            }

            if self.cancel.is_cancelled() {
                logger.log(&format!("Step cancelled, stopping {}", program));
                // The child may have exited between the two checks.
                if let Err(e) = child.kill() {
                    debug!("failed to kill {}: {}", program, e);
                }
                if let Err(e) = child.wait() {
                    debug!("failed to reap {}: {}", program, e);
                }
                return Err(StepError::Cancelled);
            }

            thread::sleep(POLL_INTERVAL);
        }
    }
}

fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or_else(|| {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return 128 + signal;
            }
        }
        1
    })
}

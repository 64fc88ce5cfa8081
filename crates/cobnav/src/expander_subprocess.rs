// expander_subprocess.rs - External macro expander
//
// Runs the configured COBOL preprocessor on a source file and returns its
// stdout as the expanded program.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::process::Command;

use crate::declaration::{
    MacroExpander, ResolverConfig, SourceEncoding, EXPANDER_FILE_PLACEHOLDER,
};

/// Macro expander backed by an external command
#[derive(Debug, Clone)]
pub struct ExpanderSubprocess {
    command: PathBuf,
    args: Vec<String>,
    timeout: Option<Duration>,
    /// Expanded listings keep the encoding of their sources
    encoding: SourceEncoding,
}

impl ExpanderSubprocess {
    pub fn new(command: PathBuf, args: Vec<String>) -> Self {
        Self {
            command,
            args,
            timeout: None,
            encoding: SourceEncoding::default(),
        }
    }

    /// Build the expander described by `config`, if one is configured.
    ///
    /// # Examples
    ///
    /// ```
    /// use cobnav::declaration::ResolverConfig;
    /// use cobnav::expander_subprocess::ExpanderSubprocess;
    ///
    /// assert!(ExpanderSubprocess::from_config(&ResolverConfig::default()).is_none());
    /// ```
    pub fn from_config(config: &ResolverConfig) -> Option<Self> {
        let command = config.expander_command.clone()?;
        log::trace!("Using macro expander {:?} {:?}", command, config.expander_args);
        Some(Self {
            command,
            args: config.expander_args.clone(),
            timeout: config.expander_timeout,
            encoding: config.encoding,
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn command(&self) -> &Path {
        &self.command
    }

    /// Arguments for expanding `path`: each `{file}` is replaced by the path,
    /// which is appended when no argument mentions it.
    pub fn arguments_for(&self, path: &Path) -> Vec<String> {
        let file = path.to_string_lossy();
        let mut substituted = false;
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|arg| {
                if arg.contains(EXPANDER_FILE_PLACEHOLDER) {
                    substituted = true;
                    arg.replace(EXPANDER_FILE_PLACEHOLDER, &file)
                } else {
                    arg.clone()
                }
            })
            .collect();
        if !substituted {
            args.push(file.into_owned());
        }
        args
    }

    async fn run(&self, path: &Path) -> Result<String> {
        let _timing = crate::perf::TimingGuard::with_threshold("macro expansion", 2000);
        crate::perf::increment_expander_runs();

        let mut cmd = Command::new(&self.command);
        cmd.args(self.arguments_for(path));

        // Copybooks are found relative to the source, as in a build
        if let Some(dir) = source_directory(path).await {
            cmd.current_dir(dir);
        }

        cmd.stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        let child = cmd
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn macro expander {:?}: {e}", self.command))?;

        let output = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(anyhow!("Macro expander timed out after {timeout:?}"));
                }
            },
            None => child.wait_with_output().await,
        }
        .map_err(|e| anyhow!("Failed to run macro expander: {e}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "Macro expander failed with status {}: {}",
                output.status,
                stderr.trim()
            ));
        }

        Ok(self.encoding.decode(&output.stdout))
    }
}

/// Directory holding `path`, if it exists on disk
async fn source_directory(path: &Path) -> Option<&Path> {
    let dir = path.parent().filter(|dir| !dir.as_os_str().is_empty())?;
    match tokio::fs::metadata(dir).await {
        Ok(metadata) if metadata.is_dir() => Some(dir),
        _ => None,
    }
}

#[async_trait]
impl MacroExpander for ExpanderSubprocess {
    async fn expand(&self, path: &Path) -> Result<String> {
        log::trace!("Running macro expander on '{}'", path.display());
        self.run(path).await
    }
}

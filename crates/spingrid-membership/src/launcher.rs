//! Process launching for elastic growth.
//!
//! `grow` never talks to a cluster scheduler directly. It builds a command
//! line from a `LaunchPlan` and hands it to a `ProcessLauncher`, which
//! either detaches the process or runs it to completion and returns its
//! output.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use spin_core::LauncherSettings;

use crate::error::{LaunchError, LaunchResult};

/// Where new workers should be started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlacementHint {
    /// On this machine.
    Local,
    /// On a named host, through ssh.
    Host(String),
    /// Through the configured cluster job command.
    Cluster,
}

/// Starts external processes.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Run `argv` to completion and return its non-empty stdout lines. The
    /// process is killed if it outlives `timeout`.
    async fn capture(&self, argv: &[String], timeout: Duration) -> LaunchResult<Vec<String>>;

    /// Start `argv` and return without waiting for it.
    async fn detach(&self, argv: &[String]) -> LaunchResult<()>;
}

/// `ProcessLauncher` on top of `tokio::process::Command`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandLauncher;

fn command(argv: &[String]) -> LaunchResult<(&String, Command)> {
    let (program, args) = argv.split_first().ok_or(LaunchError::EmptyCommand)?;
    let mut cmd = Command::new(program);
    cmd.args(args).stdin(Stdio::null()).stderr(Stdio::null());
    Ok((program, cmd))
}

#[async_trait]
impl ProcessLauncher for CommandLauncher {
    async fn capture(&self, argv: &[String], timeout: Duration) -> LaunchResult<Vec<String>> {
        let (program, mut cmd) = command(argv)?;
        let child = cmd
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: program.clone(),
                source,
            })?;

        // On timeout the child is dropped with the future, which kills it.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| LaunchError::Timeout {
                program: program.clone(),
                after: timeout,
            })??;

        let lines: Vec<String> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect();
        debug!(%program, status = %output.status, lines = lines.len(), "command finished");
        Ok(lines)
    }

    async fn detach(&self, argv: &[String]) -> LaunchResult<()> {
        let (program, mut cmd) = command(argv)?;
        let mut child = cmd.stdout(Stdio::null()).spawn().map_err(|source| LaunchError::Spawn {
            program: program.clone(),
            source,
        })?;
        debug!(%program, pid = child.id(), "process detached");
        // Reap the child when it exits.
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        Ok(())
    }
}

/// Command lines for starting workers that dial back to this coordinator.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    program: PathBuf,
    coordinator: String,
    ssh: String,
    capture_timeout: Duration,
    cluster_command: Option<Vec<String>>,
}

impl LaunchPlan {
    pub fn new(program: impl Into<PathBuf>, coordinator: impl Into<String>) -> Self {
        let defaults = LauncherSettings::default();
        Self {
            program: program.into(),
            coordinator: coordinator.into(),
            ssh: defaults.ssh,
            capture_timeout: defaults.capture_timeout,
            cluster_command: None,
        }
    }

    /// Build from `[launcher]` settings. Without a configured program the
    /// running executable is used.
    pub fn from_settings(settings: &LauncherSettings, coordinator: impl Into<String>) -> LaunchResult<Self> {
        let program = match &settings.program {
            Some(p) => p.clone(),
            None => std::env::current_exe()?,
        };
        Ok(Self {
            program,
            coordinator: coordinator.into(),
            ssh: settings.ssh.clone(),
            capture_timeout: settings.capture_timeout,
            cluster_command: settings.cluster_command.clone(),
        })
    }

    pub fn with_cluster_command(mut self, template: Vec<String>) -> Self {
        self.cluster_command = Some(template);
        self
    }

    pub fn capture_timeout(&self) -> Duration {
        self.capture_timeout
    }

    /// `<program> worker --coordinator <addr>`
    pub fn worker_argv(&self) -> Vec<String> {
        vec![
            self.program.display().to_string(),
            "worker".to_string(),
            "--coordinator".to_string(),
            self.coordinator.clone(),
        ]
    }

    /// `<ssh> <host> <program> worker --coordinator <addr>`
    pub fn host_argv(&self, host: &str) -> Vec<String> {
        let mut argv = vec![self.ssh.clone(), host.to_string()];
        argv.extend(self.worker_argv());
        argv
    }

    /// The cluster command template with `{count}` and `{worker}` filled in.
    /// `{worker}` expands to the worker command line as a single argument.
    pub fn cluster_argv(&self, count: usize) -> LaunchResult<Vec<String>> {
        let template = self.cluster_command.as_ref().ok_or(LaunchError::NoClusterCommand)?;
        if template.is_empty() {
            return Err(LaunchError::EmptyCommand);
        }
        let worker = self.worker_argv().join(" ");
        Ok(template
            .iter()
            .map(|t| t.replace("{count}", &count.to_string()).replace("{worker}", &worker))
            .collect())
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Pulumi CLI engine.
//!
//! Drives the `pulumi` binary over a scenario working directory. State lives
//! in a file backend under the engine home, but the authoritative copy of a
//! deployment is whatever [`export`](super::Engine::export) returned and the
//! store persisted: a recovered instance always goes through
//! [`import`](super::Engine::import) first, so another process (or a fresh
//! engine home) can pick an instance up.
//!
//! Every operation runs under the configured timeout. The child is killed on
//! expiry; a stuck scenario (say, a LoadBalancer IP that never allocates)
//! costs one timeout, not a wedged worker.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{Engine, EngineError, EngineOutputs, Result, StackConfig, StackHandle};

/// Keep at most this much stderr in surfaced errors.
const STDERR_LIMIT: usize = 4096;

/// How long to drain stderr after the child exited. Children of the CLI can
/// inherit the pipe and keep it open past the parent's death; whatever
/// arrived by then is all the context the error gets.
const STDERR_DRAIN: Duration = Duration::from_millis(500);

/// Engine implementation over the Pulumi CLI.
pub struct PulumiEngine {
    /// CLI binary to invoke.
    binary: PathBuf,
    /// Engine home under the cache root: plugin cache, file backend.
    home: PathBuf,
    /// Per-operation timeout; `None` disables (not recommended).
    timeout: Option<Duration>,
}

impl PulumiEngine {
    /// Create an engine homed under `cache_root`, driving `pulumi` from
    /// `PATH` (overridable via `FLAGFORGE_PULUMI_BIN`).
    pub fn new(cache_root: &Path, timeout: Option<Duration>) -> Self {
        let binary = std::env::var_os("FLAGFORGE_PULUMI_BIN")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("pulumi"));
        Self::with_binary(binary, cache_root, timeout)
    }

    /// Create an engine driving an explicit binary.
    pub fn with_binary(
        binary: impl Into<PathBuf>,
        cache_root: &Path,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            binary: binary.into(),
            home: cache_root.join("engine"),
            timeout,
        }
    }

    /// Environment for every Pulumi invocation.
    fn env(&self) -> Result<Vec<(&'static str, String)>> {
        let backend = self.home.join("backend");
        std::fs::create_dir_all(&backend)?;
        let backend = std::path::absolute(&backend)?;
        Ok(vec![
            ("PULUMI_HOME", self.home.join("pulumi").display().to_string()),
            ("PULUMI_BACKEND_URL", format!("file://{}", backend.display())),
            ("PULUMI_CONFIG_PASSPHRASE", String::new()),
            ("PULUMI_SKIP_UPDATE_CHECK", "true".to_string()),
        ])
    }

    /// Run one Pulumi command under the operation timeout.
    ///
    /// stderr is drained into a shared buffer as the child runs, so the
    /// output produced before a timeout kill still reaches the error.
    async fn run(&self, workdir: &Path, op: &'static str, args: &[&str]) -> Result<Vec<u8>> {
        debug!(op = op, args = ?args, workdir = %workdir.display(), "Running engine command");

        let mut command = Command::new(&self.binary);
        command
            .args(args)
            .arg("--non-interactive")
            .current_dir(workdir)
            .envs(self.env()?)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;

        let stdout_pipe = child.stdout.take();
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stdout_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        });

        let captured = Arc::new(StdMutex::new(Vec::new()));
        let stderr_task = {
            let captured = captured.clone();
            let stderr_pipe = child.stderr.take();
            tokio::spawn(async move {
                let Some(mut pipe) = stderr_pipe else { return };
                let mut chunk = [0u8; 4096];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => captured.lock().unwrap().extend_from_slice(&chunk[..n]),
                    }
                }
            })
        };

        let status = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, child.wait()).await {
                Ok(status) => status?,
                Err(_) => {
                    let _ = child.kill().await;
                    let _ = tokio::time::timeout(STDERR_DRAIN, stderr_task).await;
                    let stderr = truncate_stderr(&captured.lock().unwrap());
                    warn!(
                        op = op,
                        timeout_secs = timeout.as_secs(),
                        "Engine operation timed out"
                    );
                    return Err(EngineError::Timeout { op, stderr });
                }
            },
            None => child.wait().await?,
        };

        let _ = tokio::time::timeout(STDERR_DRAIN, stderr_task).await;
        if !status.success() {
            return Err(EngineError::Scenario {
                op,
                stderr: truncate_stderr(&captured.lock().unwrap()),
            });
        }
        Ok(stdout_task.await.unwrap_or_default())
    }
}

#[async_trait]
impl Engine for PulumiEngine {
    async fn load(&self, workdir: &Path, project: &str, identity: &str) -> Result<StackHandle> {
        let stack = StackHandle {
            workdir: workdir.to_path_buf(),
            project: project.to_string(),
            identity: identity.to_string(),
        };
        // Upsert: select the stack, creating it on first use.
        self.run(
            workdir,
            "load",
            &["stack", "select", "--create", "--stack", &stack.stack_name()],
        )
        .await?;
        info!(stack = %stack.stack_name(), "Stack loaded");
        Ok(stack)
    }

    async fn set_config(&self, stack: &StackHandle, config: &StackConfig) -> Result<()> {
        let name = stack.stack_name();
        let pairs = [
            ("identity", config.identity.clone()),
            ("challenge_id", config.challenge_id.clone()),
            (
                "image_pull_secrets",
                serde_json::to_string(&config.image_pull_secrets)?,
            ),
            ("additional", serde_json::to_string(&config.additional)?),
        ];
        for (key, value) in &pairs {
            self.run(
                &stack.workdir,
                "set_config",
                &[
                    "config", "set", "--stack", &name, "--plaintext", "--", key, value,
                ],
            )
            .await?;
        }
        Ok(())
    }

    async fn preview(&self, stack: &StackHandle) -> Result<()> {
        self.run(
            &stack.workdir,
            "preview",
            &["preview", "--stack", &stack.stack_name()],
        )
        .await?;
        Ok(())
    }

    async fn up(&self, stack: &StackHandle) -> Result<EngineOutputs> {
        let name = stack.stack_name();
        self.run(
            &stack.workdir,
            "up",
            &["up", "--yes", "--skip-preview", "--stack", &name],
        )
        .await?;

        let stdout = self
            .run(
                &stack.workdir,
                "up",
                &["stack", "output", "--json", "--show-secrets", "--stack", &name],
            )
            .await?;
        let outputs: Map<String, Value> = serde_json::from_slice(&stdout)?;
        Ok(EngineOutputs { outputs })
    }

    async fn down(&self, stack: &StackHandle) -> Result<()> {
        self.run(
            &stack.workdir,
            "down",
            &["destroy", "--yes", "--stack", &stack.stack_name()],
        )
        .await?;
        Ok(())
    }

    async fn export(&self, stack: &StackHandle) -> Result<Vec<u8>> {
        self.run(
            &stack.workdir,
            "export",
            &["stack", "export", "--show-secrets", "--stack", &stack.stack_name()],
        )
        .await
    }

    async fn import(&self, stack: &StackHandle, state: &[u8]) -> Result<()> {
        let deployment = wrap_deployment(state)?;
        let file = stack
            .workdir
            .join(format!(".import-{}.json", uuid::Uuid::new_v4()));
        tokio::fs::write(&file, &deployment).await?;

        let result = self
            .run(
                &stack.workdir,
                "import",
                &[
                    "stack",
                    "import",
                    "--stack",
                    &stack.stack_name(),
                    "--file",
                    &file.display().to_string(),
                ],
            )
            .await;

        let _ = tokio::fs::remove_file(&file).await;
        result.map(|_| ())
    }
}

/// Normalize stored state into the untyped-deployment envelope the CLI
/// expects: `{"version": 3, "deployment": ...}`. State exported by this
/// engine is already wrapped; raw deployment blobs get the envelope added.
fn wrap_deployment(state: &[u8]) -> Result<Vec<u8>> {
    let value: Value = serde_json::from_slice(state)?;
    if value.get("deployment").is_some() {
        return Ok(state.to_vec());
    }
    Ok(serde_json::to_vec(&serde_json::json!({
        "version": 3,
        "deployment": value,
    }))?)
}

fn truncate_stderr(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_LIMIT {
        return text.to_string();
    }
    let mut end = STDERR_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[cfg(unix)]
    fn fake_cli(dir: &Path, script: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-pulumi");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_child_and_keeps_stderr() {
        let tmp = TempDir::new().unwrap();
        // Writes a diagnostic, then stalls well past the timeout, like a
        // scenario waiting on a LoadBalancer IP that never allocates.
        let binary = fake_cli(
            tmp.path(),
            "#!/bin/sh\necho 'error: LoadBalancer IP never allocated' >&2\nsleep 5\n",
        );
        let engine = PulumiEngine::with_binary(
            binary,
            &tmp.path().join("cache"),
            Some(Duration::from_millis(300)),
        );

        let result = engine.run(tmp.path(), "up", &["up"]).await;

        match result {
            Err(EngineError::Timeout { op, stderr }) => {
                assert_eq!(op, "up");
                assert!(
                    stderr.contains("LoadBalancer"),
                    "stderr written before the kill must survive, got {stderr:?}"
                );
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_surfaces_stderr() {
        let tmp = TempDir::new().unwrap();
        let binary = fake_cli(
            tmp.path(),
            "#!/bin/sh\necho 'error: program compilation failed' >&2\nexit 1\n",
        );
        let engine = PulumiEngine::with_binary(
            binary,
            &tmp.path().join("cache"),
            Some(Duration::from_secs(5)),
        );

        let result = engine.run(tmp.path(), "preview", &["preview"]).await;

        match result {
            Err(EngineError::Scenario { op, stderr }) => {
                assert_eq!(op, "preview");
                assert!(stderr.contains("compilation failed"));
            }
            other => panic!("expected scenario failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_success_returns_stdout() {
        let tmp = TempDir::new().unwrap();
        let binary = fake_cli(tmp.path(), "#!/bin/sh\necho '{\"ok\":true}'\n");
        let engine = PulumiEngine::with_binary(
            binary,
            &tmp.path().join("cache"),
            Some(Duration::from_secs(5)),
        );

        let stdout = engine.run(tmp.path(), "export", &["stack", "export"]).await.unwrap();
        assert!(String::from_utf8_lossy(&stdout).contains("\"ok\":true"));
    }

    #[test]
    fn test_wrap_deployment_raw_blob() {
        let wrapped = wrap_deployment(br#"{"resources":[]}"#).unwrap();
        let value: Value = serde_json::from_slice(&wrapped).unwrap();
        assert_eq!(value["version"], 3);
        assert!(value["deployment"]["resources"].is_array());
    }

    #[test]
    fn test_wrap_deployment_already_wrapped() {
        let state = br#"{"version":3,"deployment":{"resources":[]}}"#;
        let wrapped = wrap_deployment(state).unwrap();
        assert_eq!(wrapped, state.to_vec());
    }

    #[test]
    fn test_wrap_deployment_rejects_garbage() {
        assert!(wrap_deployment(b"not json").is_err());
    }

    #[test]
    fn test_truncate_stderr_short() {
        assert_eq!(truncate_stderr(b"  error: boom \n"), "error: boom");
    }

    #[test]
    fn test_truncate_stderr_long() {
        let long = vec![b'x'; STDERR_LIMIT * 2];
        let truncated = truncate_stderr(&long);
        assert!(truncated.ends_with("... (truncated)"));
        assert!(truncated.len() < long.len());
    }
}

// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Mock engine for testing.
//!
//! Simulates stack operations without touching any infrastructure. Records
//! the configuration and state handed to each stack so tests can assert on
//! them, and counts concurrent `up` calls so lock-safety tests can detect
//! overlap.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use super::{Engine, EngineError, EngineOutputs, Result, StackConfig, StackHandle};

/// Mock engine.
pub struct MockEngine {
    /// Simulated execution time per `up`/`down`/`preview`, in milliseconds.
    pub execution_delay_ms: u64,
    /// Fail `up` with a scenario error.
    pub fail_up: bool,
    /// Fail `preview` with a scenario error.
    pub fail_preview: bool,
    /// Fail `down` with a scenario error.
    pub fail_down: bool,
    /// Make `up` and `preview` time out instead of completing.
    pub hang: bool,

    outputs: StdMutex<Map<String, Value>>,
    configs: StdMutex<HashMap<String, StackConfig>>,
    states: StdMutex<HashMap<String, Vec<u8>>>,
    up_calls: AtomicUsize,
    down_calls: AtomicUsize,
    preview_calls: AtomicUsize,
    concurrent_ups: AtomicUsize,
    max_concurrent_ups: AtomicUsize,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MockEngine {
    /// Create a mock engine producing the default outputs.
    pub fn new() -> Self {
        let outputs = json!({
            "connection_info": "nc 127.0.0.1:31000",
            "flags": ["FLAG{ok}"],
        });
        let Value::Object(outputs) = outputs else {
            unreachable!()
        };
        Self {
            execution_delay_ms: 10,
            fail_up: false,
            fail_preview: false,
            fail_down: false,
            hang: false,
            outputs: StdMutex::new(outputs),
            configs: StdMutex::new(HashMap::new()),
            states: StdMutex::new(HashMap::new()),
            up_calls: AtomicUsize::new(0),
            down_calls: AtomicUsize::new(0),
            preview_calls: AtomicUsize::new(0),
            concurrent_ups: AtomicUsize::new(0),
            max_concurrent_ups: AtomicUsize::new(0),
        }
    }

    /// A mock engine whose `up` and `preview` fail with a scenario error.
    pub fn failing() -> Self {
        Self {
            fail_up: true,
            fail_preview: true,
            ..Self::new()
        }
    }

    /// A mock engine whose `up` and `preview` time out, as if the scenario
    /// waited on a resource that never materializes.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new()
        }
    }

    /// A mock engine whose `down` fails, leaving instances undeletable.
    pub fn failing_down() -> Self {
        Self {
            fail_down: true,
            ..Self::new()
        }
    }

    /// A mock engine with a custom simulated execution time.
    pub fn with_delay(delay_ms: u64) -> Self {
        Self {
            execution_delay_ms: delay_ms,
            ..Self::new()
        }
    }

    /// Replace the outputs returned by `up`.
    pub fn set_outputs(&self, outputs: Map<String, Value>) {
        *self.outputs.lock().unwrap() = outputs;
    }

    /// Latest configuration set on the stack of `identity`.
    pub fn config_for(&self, identity: &str) -> Option<StackConfig> {
        self.configs.lock().unwrap().get(identity).cloned()
    }

    /// Latest state imported into the stack of `identity`.
    pub fn state_for(&self, identity: &str) -> Option<Vec<u8>> {
        self.states.lock().unwrap().get(identity).cloned()
    }

    /// Number of completed or attempted `up` calls.
    pub fn up_calls(&self) -> usize {
        self.up_calls.load(Ordering::SeqCst)
    }

    /// Number of completed or attempted `down` calls.
    pub fn down_calls(&self) -> usize {
        self.down_calls.load(Ordering::SeqCst)
    }

    /// Number of completed or attempted `preview` calls.
    pub fn preview_calls(&self) -> usize {
        self.preview_calls.load(Ordering::SeqCst)
    }

    /// Highest number of `up` calls observed in flight at once.
    pub fn max_concurrent_ups(&self) -> usize {
        self.max_concurrent_ups.load(Ordering::SeqCst)
    }

    async fn delay(&self) {
        if self.execution_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.execution_delay_ms)).await;
        }
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn load(&self, workdir: &Path, project: &str, identity: &str) -> Result<StackHandle> {
        Ok(StackHandle {
            workdir: workdir.to_path_buf(),
            project: project.to_string(),
            identity: identity.to_string(),
        })
    }

    async fn set_config(&self, stack: &StackHandle, config: &StackConfig) -> Result<()> {
        self.configs
            .lock()
            .unwrap()
            .insert(stack.identity.clone(), config.clone());
        Ok(())
    }

    async fn preview(&self, stack: &StackHandle) -> Result<()> {
        self.preview_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.hang {
            return Err(EngineError::Timeout {
                op: "preview",
                stderr: String::new(),
            });
        }
        if self.fail_preview {
            return Err(EngineError::Scenario {
                op: "preview",
                stderr: format!("mock preview failure for {}", stack.identity),
            });
        }
        Ok(())
    }

    async fn up(&self, stack: &StackHandle) -> Result<EngineOutputs> {
        self.up_calls.fetch_add(1, Ordering::SeqCst);

        let concurrent = self.concurrent_ups.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent_ups
            .fetch_max(concurrent, Ordering::SeqCst);

        let result = async {
            self.delay().await;
            if self.hang {
                return Err(EngineError::Timeout {
                    op: "up",
                    stderr: String::new(),
                });
            }
            if self.fail_up {
                return Err(EngineError::Scenario {
                    op: "up",
                    stderr: format!("mock up failure for {}", stack.identity),
                });
            }
            Ok(EngineOutputs {
                outputs: self.outputs.lock().unwrap().clone(),
            })
        }
        .await;

        self.concurrent_ups.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn down(&self, stack: &StackHandle) -> Result<()> {
        self.down_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.fail_down {
            return Err(EngineError::Scenario {
                op: "down",
                stderr: format!("mock down failure for {}", stack.identity),
            });
        }
        self.states.lock().unwrap().remove(&stack.identity);
        Ok(())
    }

    async fn export(&self, stack: &StackHandle) -> Result<Vec<u8>> {
        Ok(self
            .states
            .lock()
            .unwrap()
            .get(&stack.identity)
            .cloned()
            .unwrap_or_else(|| {
                serde_json::to_vec(&json!({
                    "version": 3,
                    "deployment": {"mock": stack.identity},
                }))
                .unwrap()
            }))
    }

    async fn import(&self, stack: &StackHandle, state: &[u8]) -> Result<()> {
        self.states
            .lock()
            .unwrap()
            .insert(stack.identity.clone(), state.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    async fn stack(engine: &MockEngine) -> StackHandle {
        engine
            .load(&PathBuf::from("/tmp/x"), "proj", "id1")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_mock_up_success() {
        let engine = MockEngine::new();
        let stack = stack(&engine).await;

        let outputs = engine.up(&stack).await.unwrap();
        assert!(outputs.outputs.contains_key("connection_info"));
        assert_eq!(engine.up_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_up_failure() {
        let engine = MockEngine::failing();
        let stack = stack(&engine).await;

        let result = engine.up(&stack).await;
        assert!(matches!(result, Err(EngineError::Scenario { op: "up", .. })));
    }

    #[tokio::test]
    async fn test_mock_hanging_times_out() {
        let engine = MockEngine::hanging();
        let stack = stack(&engine).await;

        assert!(matches!(
            engine.up(&stack).await,
            Err(EngineError::Timeout { op: "up", .. })
        ));
        assert!(matches!(
            engine.preview(&stack).await,
            Err(EngineError::Timeout { op: "preview", .. })
        ));
    }

    #[tokio::test]
    async fn test_mock_records_config() {
        let engine = MockEngine::new();
        let stack = stack(&engine).await;

        let config = StackConfig {
            identity: "id1".to_string(),
            challenge_id: "c1".to_string(),
            ..Default::default()
        };
        engine.set_config(&stack, &config).await.unwrap();

        assert_eq!(engine.config_for("id1").unwrap().challenge_id, "c1");
        assert!(engine.config_for("other").is_none());
    }

    #[tokio::test]
    async fn test_mock_state_roundtrip() {
        let engine = MockEngine::new();
        let stack = stack(&engine).await;

        engine.import(&stack, b"stored-state").await.unwrap();
        assert_eq!(engine.export(&stack).await.unwrap(), b"stored-state");

        engine.down(&stack).await.unwrap();
        assert!(engine.state_for("id1").is_none());
    }

    #[tokio::test]
    async fn test_mock_tracks_concurrency() {
        let engine = std::sync::Arc::new(MockEngine {
            execution_delay_ms: 50,
            ..MockEngine::new()
        });

        let mut handles = Vec::new();
        for i in 0..4 {
            let engine = engine.clone();
            handles.push(tokio::spawn(async move {
                let stack = engine
                    .load(&PathBuf::from("/tmp/x"), "proj", &format!("id{i}"))
                    .await
                    .unwrap();
                engine.up(&stack).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(engine.max_concurrent_ups() > 1);
        assert_eq!(engine.up_calls(), 4);
    }
}

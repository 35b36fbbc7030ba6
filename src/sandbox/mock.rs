//! Scripted in-memory provider for tests.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{CommandOutput, ConnectionHandle, SandboxProvider};
use crate::errors::ProviderError;

#[derive(Default)]
pub struct MockState {
    next_id: usize,
    live: HashSet<String>,
    pub files: BTreeMap<String, Vec<u8>>,
    pub commands: Vec<String>,
    pub destroyed: Vec<String>,
    pub connects: usize,
    /// Exact command → scripted output; anything else succeeds silently
    pub scripted: HashMap<String, CommandOutput>,
    pub fail_create: bool,
    pub refuse_connect: bool,
    pub destroy_fails: bool,
    /// Paths whose writes fail with an operation error
    pub failing_writes: HashSet<String>,
    /// Number of upcoming calls that fail as unreachable
    pub unreachable_calls: usize,
    /// Path → number of upcoming writes of it that fail as unreachable
    pub unreachable_writes: HashMap<String, usize>,
    /// Cancelled as soon as any write lands
    pub cancel_on_write: Option<CancellationToken>,
    pub exec_delay: Option<Duration>,
    in_flight: usize,
    pub max_in_flight: usize,
}

#[derive(Default)]
pub struct MockProvider {
    pub state: Mutex<MockState>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn script(&self, command: &str, output: CommandOutput) {
        self.with(|s| s.scripted.insert(command.to_string(), output));
    }

    pub fn fail_next_calls(&self, count: usize) {
        self.with(|s| s.unreachable_calls = count);
    }

    pub fn commands(&self) -> Vec<String> {
        self.with(|s| s.commands.clone())
    }

    pub fn commands_starting_with(&self, prefix: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    fn check_reachable(&self, handle_id: &str) -> Result<(), ProviderError> {
        self.with(|s| {
            if s.unreachable_calls > 0 {
                s.unreachable_calls -= 1;
                return Err(ProviderError::Unreachable("connection reset".into()));
            }
            if !s.live.contains(handle_id) {
                return Err(ProviderError::Unreachable(format!("{} not found", handle_id)));
            }
            Ok(())
        })
    }

    async fn track<T>(&self, fut: impl std::future::Future<Output = T>) -> T {
        self.with(|s| {
            s.in_flight += 1;
            s.max_in_flight = s.max_in_flight.max(s.in_flight);
        });
        tokio::task::yield_now().await;
        let out = fut.await;
        self.with(|s| s.in_flight -= 1);
        out
    }
}

#[async_trait]
impl SandboxProvider for MockProvider {
    async fn create(&self) -> Result<ConnectionHandle, ProviderError> {
        self.with(|s| {
            if s.fail_create {
                return Err(ProviderError::Unreachable("quota exceeded".into()));
            }
            s.next_id += 1;
            let handle_id = format!("mock-{}", s.next_id);
            s.live.insert(handle_id.clone());
            s.files.clear();
            Ok(ConnectionHandle {
                base_url: format!("https://{}.sandbox.test", handle_id),
                handle_id,
            })
        })
    }

    async fn connect(&self, handle_id: &str) -> Result<ConnectionHandle, ProviderError> {
        self.with(|s| {
            s.connects += 1;
            if s.refuse_connect || !s.live.contains(handle_id) {
                return Err(ProviderError::Unreachable(format!("{} expired", handle_id)));
            }
            Ok(ConnectionHandle {
                handle_id: handle_id.to_string(),
                base_url: format!("https://{}.sandbox.test", handle_id),
            })
        })
    }

    async fn exec(
        &self,
        handle: &ConnectionHandle,
        command: &str,
    ) -> Result<CommandOutput, ProviderError> {
        self.track(async {
            self.with(|s| s.commands.push(command.to_string()));
            self.check_reachable(&handle.handle_id)?;
            if let Some(delay) = self.with(|s| s.exec_delay) {
                tokio::time::sleep(delay).await;
            }
            if command.starts_with("find ") {
                let listing: String = self.with(|s| {
                    s.files.keys().map(|p| format!("./{}\n", p)).collect()
                });
                return Ok(CommandOutput {
                    stdout: listing,
                    ..Default::default()
                });
            }
            Ok(self.with(|s| s.scripted.get(command).cloned().unwrap_or_default()))
        })
        .await
    }

    async fn write_file(
        &self,
        handle: &ConnectionHandle,
        path: &str,
        contents: &[u8],
    ) -> Result<(), ProviderError> {
        self.track(async {
            self.check_reachable(&handle.handle_id)?;
            self.with(|s| {
                if let Some(remaining) = s.unreachable_writes.get_mut(path)
                    && *remaining > 0
                {
                    *remaining -= 1;
                    return Err(ProviderError::Unreachable("connection reset".into()));
                }
                if s.failing_writes.contains(path) {
                    return Err(ProviderError::Operation(format!("EACCES: {}", path)));
                }
                s.files.insert(path.to_string(), contents.to_vec());
                if let Some(cancel) = &s.cancel_on_write {
                    cancel.cancel();
                }
                Ok(())
            })
        })
        .await
    }

    async fn read_file(
        &self,
        handle: &ConnectionHandle,
        path: &str,
    ) -> Result<Option<Vec<u8>>, ProviderError> {
        self.check_reachable(&handle.handle_id)?;
        Ok(self.with(|s| s.files.get(path).cloned()))
    }

    async fn destroy(&self, handle_id: &str) -> Result<(), ProviderError> {
        self.with(|s| {
            s.destroyed.push(handle_id.to_string());
            s.live.remove(handle_id);
            if s.destroy_fails {
                return Err(ProviderError::Unreachable("teardown timed out".into()));
            }
            Ok(())
        })
    }
}

//! Common test utilities for tsubame integration tests.
//!
//! Provides `TestEnv` for isolated test environments that don't pollute
//! the user's `~/.local/share/tsubame/` directory.

#![allow(dead_code)]

use assert_cmd::Command;
pub use tempfile::TempDir;

/// A test environment with isolated data and config storage.
///
/// Each `TestEnv` creates two temporary directories:
/// - `data_dir`: the profile data directory (via `TSUBAME_DATA_DIR`)
/// - `config_dir`: the system config directory (via `TSUBAME_CONFIG_DIR`)
///
/// The `tsb()` method returns a `Command` that sets both per-invocation,
/// making tests parallel-safe.
pub struct TestEnv {
    pub data_dir: TempDir,
    pub config_dir: TempDir,
}

impl TestEnv {
    /// Create a new test environment with isolated directories.
    pub fn new() -> Self {
        Self {
            data_dir: TempDir::new().unwrap(),
            config_dir: TempDir::new().unwrap(),
        }
    }

    /// Create a test environment with one account whose upstream is
    /// unreachable, so refreshes degrade to "no new messages".
    pub fn with_offline_account() -> Self {
        let env = Self::new();
        env.tsb()
            .args([
                "account",
                "add",
                "tester",
                "--token",
                "offline-test-token-0000",
                "--api-base",
                "http://127.0.0.1:9",
            ])
            .assert()
            .success();
        env
    }

    /// Get a Command for the tsb binary with isolated directories.
    pub fn tsb(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_tsb"));
        cmd.env("TSUBAME_DATA_DIR", self.data_dir.path());
        cmd.env("TSUBAME_CONFIG_DIR", self.config_dir.path());
        cmd.env_remove("TSUBAME_LOG");
        cmd.env_remove("TSUBAME_TOKEN");
        cmd
    }

    /// Run a command and parse its stdout as JSON.
    pub fn json(&self, args: &[&str]) -> serde_json::Value {
        let output = self.tsb().args(args).output().unwrap();
        assert!(
            output.status.success(),
            "tsb {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).unwrap()
    }

    pub fn data_path(&self) -> &std::path::Path {
        self.data_dir.path()
    }

    pub fn config_path(&self) -> &std::path::Path {
        self.config_dir.path()
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

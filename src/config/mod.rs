use anyhow::{anyhow, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub mod loader;

pub use loader::ConfigLoader;

use crate::directives::{BuildConfig, CompilerTool, LinkerTool};
use crate::pipeline::PipelineOptions;
use crate::subprocess::streaming::DEFAULT_INPUT_MARKER;

/// Get the directory holding the harness configuration file
pub fn get_config_dir() -> Result<PathBuf> {
    ProjectDirs::from("org", "asm-kernel", "asm-kernel")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| anyhow!("Could not determine home directory"))
}

/// Harness-wide settings, shared by every submission of a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Pause between poll/flush rounds while a stage runs
    pub poll_interval_ms: u64,
    /// Kill a stage running longer than this; unset means wait forever
    pub stage_timeout_secs: Option<u64>,
    /// Where per-submission workspaces are created
    pub workspace_root: Option<PathBuf>,
    /// Token a program prints to request a line of input
    pub input_marker: String,
    /// Session defaults that directives build upon
    pub defaults: BuildConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            stage_timeout_secs: None,
            workspace_root: None,
            input_marker: DEFAULT_INPUT_MARKER.to_string(),
            defaults: BuildConfig::default(),
        }
    }
}

impl HarnessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn merge_env_vars(&mut self) {
        self.merge_env_with(|key| std::env::var(key).ok());
    }

    /// Apply `ASM_KERNEL_*` overrides read through `lookup`
    pub fn merge_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(verbose) = lookup("ASM_KERNEL_VERBOSE") {
            match verbose.trim().to_lowercase().as_str() {
                "false" | "0" => self.defaults.verbose = false,
                "true" | "1" => self.defaults.verbose = true,
                other => tracing::warn!("Ignoring ASM_KERNEL_VERBOSE={}", other),
            }
        }

        if let Some(compiler) = lookup("ASM_KERNEL_COMPILER") {
            match CompilerTool::from_name(compiler.trim()) {
                Some(tool) => self.defaults.compiler = tool,
                None => tracing::warn!("Ignoring unsupported ASM_KERNEL_COMPILER={}", compiler),
            }
        }

        if let Some(linker) = lookup("ASM_KERNEL_LINKER") {
            match LinkerTool::from_name(linker.trim()) {
                Some(tool) => self.defaults.linker = tool,
                None => tracing::warn!("Ignoring unsupported ASM_KERNEL_LINKER={}", linker),
            }
        }

        if let Some(timeout) = lookup("ASM_KERNEL_STAGE_TIMEOUT") {
            match timeout.trim().parse::<u64>() {
                Ok(0) => self.stage_timeout_secs = None,
                Ok(secs) => self.stage_timeout_secs = Some(secs),
                Err(e) => tracing::warn!("Ignoring ASM_KERNEL_STAGE_TIMEOUT={}: {}", timeout, e),
            }
        }

        if let Some(interval) = lookup("ASM_KERNEL_POLL_INTERVAL_MS") {
            match interval.trim().parse::<u64>() {
                Ok(ms) => self.poll_interval_ms = ms,
                Err(e) => tracing::warn!("Ignoring ASM_KERNEL_POLL_INTERVAL_MS={}: {}", interval, e),
            }
        }

        if let Some(root) = lookup("ASM_KERNEL_WORKSPACE_ROOT") {
            self.workspace_root = Some(PathBuf::from(root));
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.input_marker.is_empty() {
            return Err(anyhow!("input_marker must not be empty"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be at least 1"));
        }
        if let Some(root) = &self.workspace_root {
            if !root.is_dir() {
                return Err(anyhow!(
                    "workspace_root {} is not a directory",
                    root.display()
                ));
            }
        }
        Ok(())
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            stage_timeout: self.stage_timeout_secs.map(Duration::from_secs),
        }
    }
}

//! Long-lived kernel session
//!
//! A [`Session`] holds the defaults every submission starts from, runs each
//! submission through directive parsing and the build pipeline, and removes
//! whatever it created when it shuts down.

pub mod reply;
pub mod tracker;


pub use reply::{ExecutionReply, KernelInfo, LanguageInfo, ReplyStatus, SubmissionReport};
pub use tracker::FileTracker;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::channel::{emit_diagnostic, OutputChannel};
use crate::config::HarnessConfig;
use crate::directives::{parse_directives, BuildConfig};
use crate::pipeline::{PipelineController, PipelineOptions, PipelineOutcome, Workspace};
use crate::subprocess::{ProcessSpawner, TokioProcessSpawner};

/// Unique identifier for a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(format!("session-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct Session {
    id: SessionId,
    defaults: BuildConfig,
    options: PipelineOptions,
    workspace_root: Option<PathBuf>,
    spawner: Arc<dyn ProcessSpawner>,
    execution_count: u64,
    tracker: FileTracker,
    info: KernelInfo,
}

impl Session {
    pub fn new(spawner: Arc<dyn ProcessSpawner>, defaults: BuildConfig) -> Self {
        let id = SessionId::new();
        tracing::debug!("Starting {}", id);
        Self {
            id,
            defaults,
            options: PipelineOptions::default(),
            workspace_root: None,
            spawner,
            execution_count: 0,
            tracker: FileTracker::new(),
            info: KernelInfo::default(),
        }
    }

    /// Session running real subprocesses, configured from `config`
    pub fn from_config(config: &HarnessConfig) -> Self {
        let spawner = Arc::new(TokioProcessSpawner::new(&config.input_marker));
        let mut session = Self::new(spawner, config.defaults.clone())
            .with_options(config.pipeline_options());
        session.workspace_root = config.workspace_root.clone();
        session
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn info(&self) -> &KernelInfo {
        &self.info
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    /// Handle on the tracked paths, for cleanup from a signal handler
    pub fn tracker(&self) -> FileTracker {
        self.tracker.clone()
    }

    /// Build and run one chunk of source. The reply is always `ok`.
    pub async fn submit(&mut self, code: &str, channel: &dyn OutputChannel) -> ExecutionReply {
        self.submit_with_report(code, channel).await.reply
    }

    /// Like [`Session::submit`], also returning how the submission ended
    pub async fn submit_with_report(
        &mut self,
        code: &str,
        channel: &dyn OutputChannel,
    ) -> SubmissionReport {
        self.execution_count += 1;
        tracing::debug!("{}: submission {}", self.id, self.execution_count);

        let outcome = self.execute(code, channel).await;
        if let Err(ref err) = outcome {
            tracing::error!("Submission {} failed: {}", self.execution_count, err);
            emit_diagnostic(channel, format_args!("Error {err}"));
        }

        SubmissionReport {
            reply: ExecutionReply::ok(self.execution_count),
            outcome,
        }
    }

    async fn execute(
        &mut self,
        code: &str,
        channel: &dyn OutputChannel,
    ) -> crate::Result<PipelineOutcome> {
        let parsed = parse_directives(code, &self.defaults)?;
        let verbose = parsed.config.verbose;
        if verbose {
            emit_diagnostic(channel, &parsed.config);
        }

        let workspace = Workspace::create(self.workspace_root.as_deref())?;
        if verbose {
            emit_diagnostic(
                channel,
                format_args!("created temporary directory {}", workspace.path().display()),
            );
        }

        let artifacts = workspace.artifact_paths();
        self.tracker.track_all(&artifacts);

        let mut controller = PipelineController::new(Arc::clone(&self.spawner), self.options);
        let result = controller
            .run(&parsed.config, &parsed.code, &workspace, channel)
            .await;

        match workspace.close() {
            Ok(()) => self.tracker.untrack_all(&artifacts),
            Err(e) => tracing::warn!("Workspace left behind until shutdown: {}", e),
        }

        Ok(result?)
    }

    /// Remove every path still tracked. Safe to call more than once.
    pub fn shutdown(&self) {
        let failed = self.tracker.cleanup();
        if failed.is_empty() {
            tracing::debug!("{} shut down cleanly", self.id);
        } else {
            tracing::warn!("{} left {} path(s) behind", self.id, failed.len());
        }
    }
}

//! Preloading ordered narration steps.
//!
//! A [`PreloadJob`] walks its steps in order, resolving each through the same
//! pipeline as a single request, and reports fractional progress after every
//! step. Cancellation is checked between steps and raced against the step in
//! flight; the step's underlying work is not torn down, only its result is
//! dropped.

use crate::cache::AudioLocation;
use crate::error_code::StandardErrorCode;
use crate::tts::VoiceOptions;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Resolves one piece of narration to playable audio.
#[async_trait]
pub trait StepResolver: Send + Sync {
    async fn resolve(&self, text: &str, options: &VoiceOptions) -> Result<AudioLocation>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NarrationStep {
    pub id: String,
    pub text: String,
}

impl NarrationStep {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failed step and keep going.
    #[default]
    Continue,
    /// Stop at the first failed step.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreloadState {
    Pending,
    InProgress,
    Completed,
    Cancelled,
    Failed,
}

impl PreloadState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PreloadState::Completed | PreloadState::Cancelled | PreloadState::Failed
        )
    }
}

/// Cancels a running preload from anywhere.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[derive(Debug)]
struct JobStatus {
    state: PreloadState,
    progress: f64,
}

#[derive(Debug)]
pub struct PreloadJob {
    steps: Vec<NarrationStep>,
    options: VoiceOptions,
    policy: FailurePolicy,
    cancel: CancellationToken,
    status: Arc<Mutex<JobStatus>>,
}

impl PreloadJob {
    pub fn new(steps: Vec<NarrationStep>, options: VoiceOptions) -> Self {
        Self {
            steps,
            options,
            policy: FailurePolicy::default(),
            cancel: CancellationToken::new(),
            status: Arc::new(Mutex::new(JobStatus {
                state: PreloadState::Pending,
                progress: 0.0,
            })),
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn steps(&self) -> &[NarrationStep] {
        &self.steps
    }

    pub fn options(&self) -> &VoiceOptions {
        &self.options
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.cancel.clone(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn state(&self) -> PreloadState {
        self.status
            .lock()
            .map(|s| s.state)
            .unwrap_or(PreloadState::Failed)
    }

    pub fn progress(&self) -> f64 {
        self.status.lock().map(|s| s.progress).unwrap_or(0.0)
    }

    fn begin(&self) -> Result<()> {
        let mut status = self.status.lock().map_err(|_| {
            Error::runtime_with_context(
                "preload status lock poisoned",
                ErrorContext::new().with_source("preload"),
            )
        })?;
        if status.state != PreloadState::Pending {
            return Err(Error::validation_with_context(
                format!("preload job already {:?}", status.state).to_lowercase(),
                ErrorContext::new().with_source("preload"),
            ));
        }
        status.state = PreloadState::InProgress;
        Ok(())
    }

    fn set_progress(&self, progress: f64) {
        if let Ok(mut status) = self.status.lock() {
            // Never move backwards.
            if progress > status.progress {
                status.progress = progress;
            }
        }
    }

    fn finish(&self, state: PreloadState) {
        if let Ok(mut status) = self.status.lock() {
            status.state = state;
        }
    }
}

/// Emitted after each step settles.
#[derive(Debug, Clone, PartialEq)]
pub struct PreloadProgress {
    pub step_id: String,
    pub completed: usize,
    pub total: usize,
    pub fraction: f64,
}

#[derive(Debug)]
pub struct StepFailure {
    pub step_id: String,
    pub index: usize,
    pub code: StandardErrorCode,
    pub error: Error,
}

#[derive(Debug)]
pub struct PreloadReport {
    pub locations: HashMap<String, AudioLocation>,
    pub failures: Vec<StepFailure>,
    pub state: PreloadState,
    pub progress: f64,
    pub total_steps: usize,
}

impl PreloadReport {
    /// True when some steps have no audio (failed, cancelled or aborted).
    pub fn is_partial(&self) -> bool {
        self.locations.len() < self.total_steps
    }

    pub fn location(&self, step_id: &str) -> Option<&AudioLocation> {
        self.locations.get(step_id)
    }
}

pub struct PreloadOrchestrator<'a, R: ?Sized> {
    resolver: &'a R,
}

impl<'a, R: StepResolver + ?Sized> PreloadOrchestrator<'a, R> {
    pub fn new(resolver: &'a R) -> Self {
        Self { resolver }
    }

    pub async fn run<F>(&self, job: &PreloadJob, mut on_progress: F) -> Result<PreloadReport>
    where
        F: FnMut(&PreloadProgress) + Send,
    {
        let mut seen = HashSet::new();
        if let Some(dup) = job.steps.iter().find(|s| !seen.insert(s.id.as_str())) {
            return Err(Error::validation_with_context(
                format!("duplicate step id '{}'", dup.id),
                ErrorContext::new().with_source("preload"),
            ));
        }
        job.begin()?;

        let total = job.steps.len();
        let mut locations = HashMap::with_capacity(total);
        let mut failures = Vec::new();
        let mut completed = 0usize;
        let mut state = PreloadState::Completed;

        info!(steps = total, policy = ?job.policy, "preload started");
        for (index, step) in job.steps.iter().enumerate() {
            if job.cancel.is_cancelled() {
                state = PreloadState::Cancelled;
                break;
            }
            let outcome = tokio::select! {
                biased;
                _ = job.cancel.cancelled() => None,
                res = self.resolver.resolve(&step.text, &job.options) => Some(res),
            };
            let Some(res) = outcome else {
                debug!(step_id = %step.id, "preload cancelled mid-step");
                state = PreloadState::Cancelled;
                break;
            };

            completed += 1;
            let mut abort = false;
            match res {
                Ok(location) => {
                    debug!(step_id = %step.id, %location, "step resolved");
                    locations.insert(step.id.clone(), location);
                }
                Err(error) => {
                    warn!(step_id = %step.id, error = %error, "step failed");
                    abort = error.is_fatal() || job.policy == FailurePolicy::Abort;
                    failures.push(StepFailure {
                        step_id: step.id.clone(),
                        index,
                        code: error.standard_code(),
                        error,
                    });
                }
            }

            let fraction = completed as f64 / total as f64;
            job.set_progress(fraction);
            on_progress(&PreloadProgress {
                step_id: step.id.clone(),
                completed,
                total,
                fraction,
            });

            if abort {
                state = PreloadState::Failed;
                break;
            }
        }

        if total == 0 {
            job.set_progress(1.0);
        }
        job.finish(state);
        info!(
            state = ?state,
            resolved = locations.len(),
            failed = failures.len(),
            "preload finished"
        );
        Ok(PreloadReport {
            locations,
            failures,
            state,
            progress: job.progress(),
            total_steps: total,
        })
    }
}

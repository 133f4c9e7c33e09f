//! Ordered execution of one group's steps
//!
//! A [`WorkflowGroup`] is a named list of dependent [`Step`]s plus an optional
//! finalizer. The [`Sequencer`] runs the steps strictly in declaration order
//! against a fresh [`CarriedState`], stops at the first failure (later steps
//! are reported as not run), and always runs the finalizer afterwards. A
//! finalizer error is logged and recorded but never changes the outcome.

use futures::future::BoxFuture;
use futures::FutureExt;
use platform_e2e_common::ConfigKey;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::StepContext;
use crate::error::{E2eError, E2eResult};
use crate::report::{GroupOutcome, GroupReport, StepReport};
use crate::state::CarriedState;

pub type StepFuture<'a> = BoxFuture<'a, E2eResult<()>>;

type StepFn = dyn for<'a> Fn(&'a StepContext, &'a mut CarriedState) -> StepFuture<'a> + Send + Sync;

/// A single action-plus-assertion within a group
pub struct Step {
    name: String,
    exclusion: Option<String>,
    timeout: Option<Duration>,
    body: Box<StepFn>,
}

impl Step {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: for<'a> Fn(&'a StepContext, &'a mut CarriedState) -> StepFuture<'a> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            exclusion: None,
            timeout: None,
            body: Box::new(body),
        }
    }

    /// Keep the step declared but leave it out of the run
    pub fn excluded(mut self, reason: impl Into<String>) -> Self {
        self.exclusion = Some(reason.into());
        self
    }

    /// Per-step deadline overriding the sequencer default
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn exclusion(&self) -> Option<&str> {
        self.exclusion.as_deref()
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("exclusion", &self.exclusion)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A named, ordered set of steps validating one workflow end to end
pub struct WorkflowGroup {
    pub name: String,
    pub description: String,
    pub tags: Vec<String>,
    pub docs: Vec<String>,
    pub required: Vec<ConfigKey>,
    /// Needs an authenticated browser session
    pub needs_session: bool,
    /// External resources this group mutates; groups sharing one never overlap
    pub resources: Vec<String>,
    /// Run with no other group in flight
    pub exclusive: bool,
    pub timeout: Option<Duration>,
    steps: Vec<Step>,
    finalizer: Option<Box<StepFn>>,
}

impl WorkflowGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            docs: Vec::new(),
            required: Vec::new(),
            needs_session: false,
            resources: Vec::new(),
            exclusive: false,
            timeout: None,
            steps: Vec::new(),
            finalizer: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn doc(mut self, link: impl Into<String>) -> Self {
        self.docs.push(link.into());
        self
    }

    pub fn requires(mut self, keys: &[ConfigKey]) -> Self {
        for key in keys {
            if !self.required.contains(key) {
                self.required.push(*key);
            }
        }
        self
    }

    pub fn needs_session(mut self) -> Self {
        self.needs_session = true;
        self
    }

    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(resource.into());
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Best-effort cleanup run after the steps whatever their outcome
    pub fn finally<F>(mut self, finalizer: F) -> Self
    where
        F: for<'a> Fn(&'a StepContext, &'a mut CarriedState) -> StepFuture<'a> + Send + Sync + 'static,
    {
        self.finalizer = Some(Box::new(finalizer));
        self
    }

    /// Run the steps normally left out, once the feature behind them is stable
    pub fn including_excluded(mut self) -> Self {
        for step in &mut self.steps {
            step.exclusion = None;
        }
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(Step::name).collect()
    }

    /// Declared keys plus the login keys when a session is needed
    pub fn required_keys(&self) -> Vec<ConfigKey> {
        let mut keys = self.required.clone();
        if self.needs_session {
            for key in ConfigKey::SESSION {
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Reject groups whose failures could not be attributed
    pub fn validate(&self) -> E2eResult<()> {
        if self.steps.is_empty() {
            return Err(E2eError::SpecParse(format!("group '{}' declares no steps", self.name)));
        }
        let mut seen = std::collections::HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name()) {
                return Err(E2eError::SpecParse(format!(
                    "group '{}' declares step '{}' twice",
                    self.name,
                    step.name()
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for WorkflowGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowGroup")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .field("required", &self.required)
            .field("needs_session", &self.needs_session)
            .field("resources", &self.resources)
            .field("exclusive", &self.exclusive)
            .field("steps", &self.steps)
            .field("finalizer", &self.finalizer.is_some())
            .finish()
    }
}

/// Deadlines applied while sequencing
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    pub step_timeout: Duration,
    pub group_timeout: Duration,
    pub finalizer_timeout: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(300),
            group_timeout: Duration::from_secs(1800),
            finalizer_timeout: Duration::from_secs(120),
        }
    }
}

/// Runs one group instance
#[derive(Debug, Clone)]
pub struct Sequencer {
    config: SequencerConfig,
    cancel: CancellationToken,
}

impl Sequencer {
    pub fn new(config: SequencerConfig, cancel: CancellationToken) -> Self {
        Self { config, cancel }
    }

    pub async fn run(&self, group: &WorkflowGroup, ctx: &StepContext) -> GroupReport {
        let start = Instant::now();
        let group_timeout = group.timeout.unwrap_or(self.config.group_timeout);
        let deadline = start + group_timeout;

        let mut state = CarriedState::new();
        let mut steps = Vec::with_capacity(group.steps.len());
        let mut failure: Option<(String, E2eError)> = None;

        for step in &group.steps {
            if failure.is_some() {
                steps.push(StepReport::not_run(step.name()));
                continue;
            }

            if let Some(reason) = step.exclusion() {
                info!("  ⊘ {} (excluded: {})", step.name(), reason);
                steps.push(StepReport::excluded(step.name(), reason));
                continue;
            }

            debug!("Running step: {}", step.name());
            let step_start = Instant::now();
            let result = self.run_step(group, step, ctx, &mut state, deadline).await;
            let duration_ms = step_start.elapsed().as_millis() as u64;

            match result {
                Ok(()) => {
                    info!("  ✓ {} ({} ms)", step.name(), duration_ms);
                    steps.push(StepReport::passed(step.name(), duration_ms));
                }
                Err(e) => {
                    error!("  ✗ {} - {}", step.name(), e);
                    steps.push(StepReport::failed(step.name(), &e, duration_ms));
                    failure = Some((step.name().to_string(), e));
                }
            }
        }

        let cleanup_error = self.finalize(group, ctx, &mut state).await;

        let outcome = match failure {
            None => GroupOutcome::Passed,
            Some((step, e)) => GroupOutcome::Failed {
                step,
                kind: e.kind(),
                message: e.to_string(),
            },
        };

        GroupReport {
            name: group.name.clone(),
            instance: ctx.instance(),
            tags: group.tags.clone(),
            docs: group.docs.clone(),
            outcome,
            steps,
            cleanup_error,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    async fn run_step(
        &self,
        group: &WorkflowGroup,
        step: &Step,
        ctx: &StepContext,
        state: &mut CarriedState,
        deadline: Instant,
    ) -> E2eResult<()> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let step_limit = step.timeout.unwrap_or(self.config.step_timeout);
        let (limit, scope) = if step_limit < remaining {
            (step_limit, format!("step '{}'", step.name()))
        } else {
            (remaining, format!("group '{}'", group.name))
        };

        let body = AssertUnwindSafe((step.body)(ctx, state)).catch_unwind();

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(E2eError::Cancelled),
            result = tokio::time::timeout(limit, body) => match result {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(panic)) => Err(E2eError::Panicked(panic_message(panic))),
                Err(_) => Err(E2eError::DeadlineExceeded { scope, after: limit }),
            },
        }
    }

    /// Returns the cleanup error, if any, for the report
    async fn finalize(&self, group: &WorkflowGroup, ctx: &StepContext, state: &mut CarriedState) -> Option<String> {
        let finalizer = group.finalizer.as_ref()?;
        debug!("Running finalizer for {}", group.name);

        let body = AssertUnwindSafe(finalizer(ctx, state)).catch_unwind();
        let message = match tokio::time::timeout(self.config.finalizer_timeout, body).await {
            Ok(Ok(Ok(()))) => return None,
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(panic)) => format!("finalizer panicked: {}", panic_message(panic)),
            Err(_) => format!("finalizer exceeded its {:?} deadline", self.config.finalizer_timeout),
        };

        warn!("Cleanup for {} failed: {}", group.name, message);
        Some(message)
    }
}

pub(crate) fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

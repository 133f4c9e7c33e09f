//! Suite runner: gating, session bootstrap and parallel dispatch

use futures::FutureExt;
use platform_e2e_common::{Configuration, Resolution};
use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, Instrument};

use crate::api::ManagementApi;
use crate::browser::{BrowserConfig, BrowserDriver, BrowserSession};
use crate::context::StepContext;
use crate::error::{E2eError, E2eResult};
use crate::locks::ResourceLocks;
use crate::report::{GroupReport, SuiteReport};
use crate::sequencer::{panic_message, Sequencer, SequencerConfig, WorkflowGroup};
use crate::session::{SessionArtifact, SessionBootstrapper, DEFAULT_SESSION_PATH};

/// Configuration for the suite runner
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Group instances allowed in flight at once
    pub workers: usize,
    pub sequencer: SequencerConfig,
    pub session_path: PathBuf,
    /// Skip the login when a readable artifact already exists
    pub reuse_session: bool,
    pub login_timeout: Duration,
    pub browser: BrowserConfig,
    pub api_timeout: Duration,
    pub output_dir: PathBuf,
    pub tag: Option<String>,
    pub name: Option<String>,
    /// Instances per selected group
    pub repeat: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            sequencer: SequencerConfig::default(),
            session_path: PathBuf::from(DEFAULT_SESSION_PATH),
            reuse_session: false,
            login_timeout: Duration::from_secs(60),
            browser: BrowserConfig::default(),
            api_timeout: Duration::from_secs(30),
            output_dir: PathBuf::from("test-results"),
            tag: None,
            name: None,
            repeat: 1,
        }
    }
}

/// Main E2E suite runner
pub struct SuiteRunner {
    config: RunnerConfig,
    env: Arc<Configuration>,
    groups: Vec<Arc<WorkflowGroup>>,
    cancel: CancellationToken,
    locks: ResourceLocks,
}

impl SuiteRunner {
    pub fn new(config: RunnerConfig, env: Configuration, groups: Vec<WorkflowGroup>) -> E2eResult<Self> {
        let mut names = HashSet::new();
        for group in &groups {
            group.validate()?;
            if !names.insert(group.name.clone()) {
                return Err(E2eError::SpecParse(format!("group '{}' is declared twice", group.name)));
            }
        }

        Ok(Self {
            config,
            env: Arc::new(env),
            groups: groups.into_iter().map(Arc::new).collect(),
            cancel: CancellationToken::new(),
            locks: ResourceLocks::new(),
        })
    }

    /// Token that stops the run when cancelled
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn environment(&self) -> &Configuration {
        &self.env
    }

    /// Groups matching the tag and name filters, in declaration order
    pub fn selected(&self) -> E2eResult<Vec<&WorkflowGroup>> {
        Ok(self.select()?.into_iter().map(Arc::as_ref).collect())
    }

    fn select(&self) -> E2eResult<Vec<&Arc<WorkflowGroup>>> {
        let selected: Vec<&Arc<WorkflowGroup>> = self
            .groups
            .iter()
            .filter(|g| self.config.tag.as_deref().map_or(true, |t| g.has_tag(t)))
            .filter(|g| self.config.name.as_deref().map_or(true, |n| g.name == n))
            .collect();

        if let Some(name) = &self.config.name {
            if selected.is_empty() {
                return Err(E2eError::SpecParse(format!("Group not found: {}", name)));
            }
        }
        Ok(selected)
    }

    /// Run every selected group instance
    ///
    /// Fails as a whole only when bootstrapping the session fails; everything
    /// else ends up in the report.
    pub async fn run(&self) -> E2eResult<SuiteReport> {
        let start = Instant::now();
        let repeat = self.config.repeat.max(1);
        let instances: Vec<(Arc<WorkflowGroup>, usize)> = self
            .select()?
            .into_iter()
            .flat_map(|g| (0..repeat).map(move |i| (Arc::clone(g), i)))
            .collect();

        info!(
            "Running {} group instance(s) against '{}'...",
            instances.len(),
            self.env.environment()
        );

        let mut slots: Vec<Option<GroupReport>> = vec![None; instances.len()];
        let mut runnable = Vec::new();

        for (idx, (group, instance)) in instances.iter().enumerate() {
            match self.env.resolve(&group.required_keys()) {
                Resolution::Configured(_) => runnable.push((idx, Arc::clone(group), *instance)),
                Resolution::Unconfigured(unconfigured) => {
                    info!("⊘ {} skipped: {}", group.name, unconfigured);
                    slots[idx] = Some(GroupReport::skipped(
                        &group.name,
                        *instance,
                        &group.tags,
                        &group.docs,
                        &group.step_names(),
                        &unconfigured,
                    ));
                }
            }
        }

        let browser = if runnable.iter().any(|(_, g, _)| g.needs_session) {
            let artifact = self.bootstrap().await?;
            Some(BrowserSession::new(
                BrowserDriver::unchecked(self.config.browser.clone()),
                Some(artifact.path),
            ))
        } else {
            None
        };
        let api = ManagementApi::from_config(&self.env, self.config.api_timeout)?;

        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let sequencer = Sequencer::new(self.config.sequencer.clone(), self.cancel.clone());
        let mut join_set = JoinSet::new();

        for (idx, group, instance) in runnable {
            let semaphore = Arc::clone(&semaphore);
            let locks = self.locks.clone();
            let cancel = self.cancel.clone();
            let sequencer = sequencer.clone();
            let ctx = StepContext::new(&group.name, instance, Arc::clone(&self.env))
                .with_api(api.clone())
                .with_browser(browser.clone());
            let span = info_span!("group", name = %group.name, instance);

            join_set.spawn(
                async move {
                    // Locks first: a group queued behind a busy resource must not
                    // hold a worker slot an independent group could use.
                    let _guard = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return (idx, None),
                        guard = locks.acquire(&group.resources, group.exclusive) => guard,
                    };
                    let _permit = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return (idx, None),
                        permit = semaphore.acquire_owned() => match permit {
                            Ok(permit) => permit,
                            Err(_) => return (idx, None),
                        },
                    };

                    info!("▶ {}", group.name);
                    let report = match AssertUnwindSafe(sequencer.run(&group, &ctx)).catch_unwind().await {
                        Ok(report) => report,
                        Err(panic) => GroupReport::crashed(
                            &group.name,
                            instance,
                            &group.tags,
                            &group.docs,
                            &group.step_names(),
                            &panic_message(panic),
                        ),
                    };
                    (idx, Some(report))
                }
                .instrument(span),
            );
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((idx, report)) => slots[idx] = report,
                Err(e) => error!("Group task failed: {}", e),
            }
        }

        let cancelled = self.cancel.is_cancelled();
        let reports: Vec<GroupReport> = slots
            .into_iter()
            .zip(instances.iter())
            .map(|(slot, (group, instance))| settle(slot, group, *instance, cancelled))
            .collect();

        let duration_ms = start.elapsed().as_millis() as u64;
        let report = SuiteReport::new(self.env.environment(), reports, cancelled, duration_ms);

        info!("");
        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            report.passed, report.failed, report.skipped, duration_ms
        );

        Ok(report)
    }

    async fn bootstrap(&self) -> E2eResult<SessionArtifact> {
        let unchecked = SessionBootstrapper::new(
            BrowserDriver::unchecked(self.config.browser.clone()),
            &self.config.session_path,
            self.config.login_timeout,
        );
        if self.config.reuse_session {
            if let Some(artifact) = unchecked.reuse() {
                return Ok(artifact);
            }
        }

        let driver = BrowserDriver::new(self.config.browser.clone())?;
        let bootstrapper = SessionBootstrapper::new(driver, &self.config.session_path, self.config.login_timeout);

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(E2eError::Cancelled),
            artifact = bootstrapper.authenticate(&self.env) => artifact,
        }
    }

    /// Write results to `test-results.json` in the output directory
    pub fn write_results(&self, report: &SuiteReport) -> E2eResult<PathBuf> {
        report.write_json(&self.config.output_dir)
    }
}

/// Final report for one instance slot
///
/// An empty slot means the task never produced a report: expected when the
/// run was cancelled before the group started, a harness failure otherwise.
fn settle(slot: Option<GroupReport>, group: &WorkflowGroup, instance: usize, cancelled: bool) -> GroupReport {
    match slot {
        Some(report) => report,
        None if cancelled => {
            GroupReport::not_started(&group.name, instance, &group.tags, &group.docs, &group.step_names())
        }
        None => GroupReport::crashed(
            &group.name,
            instance,
            &group.tags,
            &group.docs,
            &group.step_names(),
            "group task ended without a report",
        ),
    }
}

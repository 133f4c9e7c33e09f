//! Declarative YAML group specifications
//!
//! UI groups are plain data: an ordered list of steps, each a list of
//! browser actions. They are turned into [`WorkflowGroup`]s whose steps run
//! the actions through the run's authenticated [`BrowserSession`].
//!
//! [`BrowserSession`]: crate::browser::BrowserSession

use platform_e2e_common::ConfigKey;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::browser::UiAction;
use crate::error::{E2eError, E2eResult};
use crate::sequencer::{Step, WorkflowGroup};

/// A group specification parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupSpec {
    /// Unique name for this group
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Tags for filtering groups
    #[serde(default)]
    pub tags: Vec<String>,

    /// Documentation links shown in reports
    #[serde(default)]
    pub docs: Vec<String>,

    /// Settings needed beyond those implied by the actions
    #[serde(default)]
    pub requires: Vec<ConfigKey>,

    /// Start from the signed-in session artifact
    #[serde(default = "default_true")]
    pub needs_session: bool,

    #[serde(default)]
    pub resources: Vec<String>,

    #[serde(default)]
    pub exclusive: bool,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Steps to execute in order
    pub steps: Vec<StepSpec>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    pub name: String,

    /// Keep the step declared but do not run it
    #[serde(default)]
    pub excluded: Option<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    pub actions: Vec<UiAction>,
}

impl GroupSpec {
    /// Parse a group spec from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        serde_yaml::from_str(yaml).map_err(E2eError::from)
    }

    /// Parse a group spec from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all group specs from a directory, in file name order
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut specs = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            let spec = Self::from_file(entry.path())?;
            specs.push(spec);
        }

        Ok(specs)
    }

    /// Declared keys plus `BASE_URL` and every placeholder the actions use
    pub fn required_keys(&self) -> Vec<ConfigKey> {
        let mut keys = vec![ConfigKey::BaseUrl];
        let implied = self
            .steps
            .iter()
            .flat_map(|s| s.actions.iter())
            .flat_map(UiAction::referenced_keys);

        for key in self.requires.iter().copied().chain(implied) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }

    pub fn into_group(self) -> E2eResult<WorkflowGroup> {
        let mut group = WorkflowGroup::new(&self.name)
            .describe(&self.description)
            .requires(&self.required_keys());
        group.tags = self.tags;
        group.docs = self.docs;
        group.needs_session = self.needs_session;
        group.resources = self.resources;
        group.exclusive = self.exclusive;
        group.timeout = self.timeout_secs.map(Duration::from_secs);

        for spec in self.steps {
            let prefix = format!("{}-{}", self.name, spec.name);
            let actions = Arc::new(spec.actions);

            let mut step = Step::new(spec.name, move |ctx, _state| {
                let actions = Arc::clone(&actions);
                let label = screenshot_label(&prefix, ctx.instance());
                Box::pin(async move {
                    ctx.browser()?.run(ctx.config(), &actions, &label).await?;
                    Ok(())
                })
            });
            if let Some(reason) = spec.excluded {
                step = step.excluded(reason);
            }
            if let Some(secs) = spec.timeout_secs {
                step = step.with_timeout(Duration::from_secs(secs));
            }
            group = group.step(step);
        }

        group.validate()?;
        Ok(group)
    }
}

/// Load and convert every group under `dir`
pub fn load_groups(dir: &Path) -> E2eResult<Vec<WorkflowGroup>> {
    GroupSpec::load_all(dir)?.into_iter().map(GroupSpec::into_group).collect()
}

/// Repeated instances run concurrently and must not share screenshot files
fn screenshot_label(prefix: &str, instance: usize) -> String {
    format!("{}-{}", prefix, instance)
}

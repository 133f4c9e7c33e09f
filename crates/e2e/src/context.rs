//! Per-instance services handed to every step

use platform_e2e_common::{ConfigKey, Configuration, Unconfigured};
use std::sync::Arc;

use crate::api::ManagementApi;
use crate::browser::BrowserSession;
use crate::error::E2eResult;

/// What a step may use: the run's configuration, the management API client
/// and a browser session, all scoped to one group instance.
pub struct StepContext {
    group: String,
    instance: usize,
    run_id: String,
    config: Arc<Configuration>,
    api: Option<ManagementApi>,
    browser: Option<BrowserSession>,
}

impl StepContext {
    pub fn new(group: &str, instance: usize, config: Arc<Configuration>) -> Self {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            group: group.to_string(),
            instance,
            run_id: run_id[..8].to_string(),
            config,
            api: None,
            browser: None,
        }
    }

    pub fn with_api(mut self, api: Option<ManagementApi>) -> Self {
        self.api = api;
        self
    }

    pub fn with_browser(mut self, browser: Option<BrowserSession>) -> Self {
        self.browser = browser;
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn instance(&self) -> usize {
        self.instance
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn api(&self) -> E2eResult<&ManagementApi> {
        self.api.as_ref().ok_or_else(|| {
            Unconfigured {
                missing: missing(&self.config, &[ConfigKey::ApiUrl, ConfigKey::AccessToken]),
            }
            .into()
        })
    }

    pub fn browser(&self) -> E2eResult<&BrowserSession> {
        self.browser.as_ref().ok_or_else(|| {
            Unconfigured {
                missing: missing(&self.config, &[ConfigKey::BaseUrl]),
            }
            .into()
        })
    }

    pub fn project_ref(&self) -> E2eResult<&str> {
        self.require(ConfigKey::ProjectRef)
    }

    pub fn require(&self, key: ConfigKey) -> E2eResult<&str> {
        self.config
            .get(key)
            .ok_or_else(|| Unconfigured { missing: vec![key] }.into())
    }

    /// Resource name unique to this group instance, safe as a SQL identifier
    pub fn unique_name(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.run_id)
    }
}

fn missing(config: &Configuration, keys: &[ConfigKey]) -> Vec<ConfigKey> {
    let absent: Vec<ConfigKey> = keys.iter().copied().filter(|k| config.get(*k).is_none()).collect();
    // Present but unusable (e.g. no driver installed) still names the keys
    if absent.is_empty() {
        keys.to_vec()
    } else {
        absent
    }
}

//! Session bootstrapping
//!
//! Logs in once through the dashboard's sign-in page and persists the
//! browser storage state so every UI group starts authenticated.

use chrono::{DateTime, Utc};
use platform_e2e_common::{ConfigKey, Configuration};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::browser::{BrowserDriver, ScriptOptions, UiAction};
use crate::error::{E2eError, E2eResult};

pub const SIGN_IN_PATH: &str = "/dashboard/sign-in";
pub const DEFAULT_SESSION_PATH: &str = ".auth/session.json";

const EMAIL_VAR: &str = "E2E_LOGIN_EMAIL";
const PASSWORD_VAR: &str = "E2E_LOGIN_PASSWORD";

/// Whether a landing URL means the login went through
pub fn is_authenticated_url(url: &str) -> bool {
    url.contains("/dashboard") && !url.contains(SIGN_IN_PATH)
}

/// Persisted, opaque authenticated browser state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionArtifact {
    pub path: PathBuf,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
    /// Set when produced by a login in this run
    pub landing_url: Option<String>,
}

impl SessionArtifact {
    /// Load an existing artifact; it must be a JSON document
    pub fn load(path: &Path) -> E2eResult<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice::<serde_json::Value>(&bytes)?;

        let created_at = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Self {
            path: path.to_path_buf(),
            sha256: hex::encode(Sha256::digest(&bytes)),
            created_at,
            landing_url: None,
        })
    }
}

/// Performs the one login of a run
#[derive(Debug, Clone)]
pub struct SessionBootstrapper {
    driver: BrowserDriver,
    artifact_path: PathBuf,
    login_timeout: Duration,
}

impl SessionBootstrapper {
    pub fn new(driver: BrowserDriver, artifact_path: impl Into<PathBuf>, login_timeout: Duration) -> Self {
        Self {
            driver,
            artifact_path: artifact_path.into(),
            login_timeout,
        }
    }

    pub fn artifact_path(&self) -> &Path {
        &self.artifact_path
    }

    /// Reuse a previously written artifact if it is still readable
    pub fn reuse(&self) -> Option<SessionArtifact> {
        if !self.artifact_path.exists() {
            return None;
        }
        match SessionArtifact::load(&self.artifact_path) {
            Ok(artifact) => {
                info!("Reusing session artifact {} ({})", artifact.path.display(), &artifact.sha256[..12]);
                Some(artifact)
            }
            Err(e) => {
                warn!("Ignoring unreadable session artifact {}: {}", self.artifact_path.display(), e);
                None
            }
        }
    }

    /// Sign in and write the session artifact
    pub async fn authenticate(&self, config: &Configuration) -> E2eResult<SessionArtifact> {
        let session = config.resolve(&ConfigKey::SESSION).into_result()?;
        let email = session.get(ConfigKey::Email).unwrap_or_default();
        let password = session.get(ConfigKey::Password).unwrap_or_default();

        if let Some(parent) = self.artifact_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Signing in to {} as {}", config.environment(), email);

        let options = ScriptOptions {
            storage_state: None,
            save_storage_to: Some(&self.artifact_path),
            failure_screenshot: Some("sign-in"),
        };
        let env = [(EMAIL_VAR, email), (PASSWORD_VAR, password)];
        let actions = login_actions();
        let login = self.driver.run_actions(config, &actions, &options, &env);

        let page = match tokio::time::timeout(self.login_timeout, login).await {
            Ok(result) => result.map_err(login_failure)?,
            Err(_) => {
                return Err(E2eError::AuthenticationFailed(format!(
                    "no post-login redirect within {:?}",
                    self.login_timeout
                )))
            }
        };

        if !is_authenticated_url(&page.url) {
            return Err(E2eError::AuthenticationFailed(format!("still at {} after sign-in", page.url)));
        }

        let mut artifact = SessionArtifact::load(&self.artifact_path).map_err(|e| {
            E2eError::AuthenticationFailed(format!("session artifact {} unusable: {}", self.artifact_path.display(), e))
        })?;
        artifact.landing_url = Some(page.url);

        info!("Session written to {} (sha256 {})", artifact.path.display(), artifact.sha256);
        Ok(artifact)
    }
}

fn login_actions() -> Vec<UiAction> {
    vec![
        UiAction::Goto {
            path: SIGN_IN_PATH.to_string(),
        },
        UiAction::FillFromEnv {
            label: "Email".to_string(),
            var: EMAIL_VAR.to_string(),
        },
        UiAction::FillFromEnv {
            label: "Password".to_string(),
            var: PASSWORD_VAR.to_string(),
        },
        UiAction::Click {
            role: "button".to_string(),
            name: "Sign In".to_string(),
        },
        UiAction::ExpectUrl {
            pattern: "/dashboard(?!/sign-in)".to_string(),
        },
    ]
}

/// A login that never reached the dashboard is an authentication failure;
/// anything else is a harness problem and keeps its own kind
fn login_failure(error: E2eError) -> E2eError {
    match error {
        E2eError::AssertionMismatch { actual, expected, .. } => {
            E2eError::AuthenticationFailed(format!("expected {expected}, browser at {actual}"))
        }
        E2eError::Timeout { what, .. } => E2eError::AuthenticationFailed(what),
        other => other,
    }
}

//! Playwright browser automation
//!
//! Each call generates a small Node script from a list of [`UiAction`]s and
//! runs it with `node`. The script reports one JSON line on stdout which is
//! mapped back onto the harness error taxonomy: a failed URL or visibility
//! expectation becomes [`E2eError::AssertionMismatch`], a navigation or
//! click that never completes becomes [`E2eError::Timeout`].

use platform_e2e_common::{ConfigKey, Configuration, Unconfigured};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::str::FromStr;
use tokio::process::Command as TokioCommand;
use tracing::{debug, info};

use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl FromStr for Browser {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(format!("unknown browser '{other}' (expected chromium, firefox or webkit)")),
        }
    }
}

/// One browser interaction or expectation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UiAction {
    /// Navigate to a path relative to `BASE_URL`; may contain `{orgRef}` / `{projectRef}`
    Goto { path: String },

    /// Click the element with this ARIA role and accessible name
    Click { role: String, name: String },

    /// Fill the input labelled `label`
    Fill { label: String, value: String },

    /// Fill the input labelled `label` from an environment variable of the driver process
    FillFromEnv { label: String, var: String },

    /// The element with this role and name must become visible
    ExpectVisible { role: String, name: String },

    /// The page URL must match this JavaScript regular expression
    ExpectUrl { pattern: String },
}

impl UiAction {
    pub fn label(&self) -> String {
        match self {
            UiAction::Goto { path } => format!("goto:{}", path),
            UiAction::Click { role, name } => format!("click:{}[{}]", role, name),
            UiAction::Fill { label, .. } | UiAction::FillFromEnv { label, .. } => format!("fill:{}", label),
            UiAction::ExpectVisible { role, name } => format!("expect-visible:{}[{}]", role, name),
            UiAction::ExpectUrl { pattern } => format!("expect-url:{}", pattern),
        }
    }

    /// Config keys referenced by placeholders
    pub fn referenced_keys(&self) -> Vec<ConfigKey> {
        let template = match self {
            UiAction::Goto { path } => path,
            UiAction::ExpectUrl { pattern } => pattern,
            _ => return Vec::new(),
        };
        let mut keys = Vec::new();
        if template.contains("{orgRef}") {
            keys.push(ConfigKey::OrgRef);
        }
        if template.contains("{projectRef}") {
            keys.push(ConfigKey::ProjectRef);
        }
        keys
    }

    /// Substitute configuration placeholders in paths and patterns
    fn render(&self, config: &Configuration) -> Result<Self, Unconfigured> {
        Ok(match self {
            UiAction::Goto { path } => UiAction::Goto {
                path: config.render(path)?,
            },
            UiAction::ExpectUrl { pattern } => UiAction::ExpectUrl {
                pattern: config.render(pattern)?,
            },
            other => other.clone(),
        })
    }
}

/// Final page state of a successful script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageReport {
    pub url: String,
}

/// What the generated script prints
#[derive(Debug, Deserialize)]
struct ScriptOutcome {
    ok: bool,
    #[serde(default)]
    url: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    expected: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// Extra behaviour for one script run
#[derive(Debug, Clone, Default)]
pub struct ScriptOptions<'a> {
    /// Storage state to start the context from
    pub storage_state: Option<&'a Path>,
    /// Write the context's storage state here after the last action
    pub save_storage_to: Option<&'a Path>,
    /// Screenshot name to capture if an action fails
    pub failure_screenshot: Option<&'a str>,
}

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    /// Per-action timeout inside the browser
    pub action_timeout_ms: u64,
    pub screenshot_dir: PathBuf,
    /// Directory whose `node_modules` provides `playwright`
    pub node_project_dir: PathBuf,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            action_timeout_ms: 30_000,
            screenshot_dir: PathBuf::from("test-results/screenshots"),
            node_project_dir: PathBuf::from("."),
        }
    }
}

/// Playwright driver
#[derive(Debug, Clone)]
pub struct BrowserDriver {
    config: BrowserConfig,
}

impl BrowserDriver {
    /// Create a driver, verifying Playwright is installed
    pub fn new(config: BrowserConfig) -> E2eResult<Self> {
        Self::check_playwright_installed(&config.node_project_dir)?;
        std::fs::create_dir_all(&config.screenshot_dir)?;
        Ok(Self { config })
    }

    /// Create a driver without probing for Playwright
    pub fn unchecked(config: BrowserConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    fn check_playwright_installed(project_dir: &Path) -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .current_dir(project_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    /// Build the Playwright script for a list of actions
    pub fn build_script(&self, base_url: &str, actions: &[UiAction], options: &ScriptOptions<'_>) -> String {
        let mut script = String::new();

        let storage_state = options
            .storage_state
            .map(|p| format!(", storageState: {}", js_str(&p.to_string_lossy())))
            .unwrap_or_default();

        script.push_str(&format!(
            r#"
const {{ chromium, firefox, webkit }} = require('playwright');

(async () => {{
  const browser = await {browser}.launch({{ headless: {headless} }});
  const context = await browser.newContext({{
    viewport: {{ width: {width}, height: {height} }}{storage_state}
  }});
  const page = await context.newPage();
  page.setDefaultTimeout({timeout});
  const baseUrl = {base_url};
  let current = {{ kind: 'error', expected: null }};

  try {{
"#,
            browser = self.config.browser.as_str(),
            headless = self.config.headless,
            width = self.config.viewport_width,
            height = self.config.viewport_height,
            storage_state = storage_state,
            timeout = self.config.action_timeout_ms,
            base_url = js_str(base_url),
        ));

        for (i, action) in actions.iter().enumerate() {
            script.push_str(&format!("\n    // Step {}: {}\n", i + 1, action.label()));
            script.push_str(&self.action_to_js(action));
            script.push('\n');
        }

        if let Some(path) = options.save_storage_to {
            script.push_str(&format!(
                "\n    current = {{ kind: 'error', expected: null }};\n    await context.storageState({{ path: {} }});\n",
                js_str(&path.to_string_lossy())
            ));
        }

        let screenshot = options
            .failure_screenshot
            .map(|name| {
                let path = self.config.screenshot_dir.join(format!("{}.png", sanitize(name)));
                format!(
                    "    await page.screenshot({{ path: {}, fullPage: true }}).catch(() => {{}});\n",
                    js_str(&path.to_string_lossy())
                )
            })
            .unwrap_or_default();

        script.push_str(&format!(
            r#"
    console.log(JSON.stringify({{ ok: true, url: page.url() }}));
  }} catch (error) {{
{screenshot}    console.log(JSON.stringify({{ ok: false, kind: current.kind, expected: current.expected, url: page.url(), message: error.message }}));
    process.exitCode = 1;
  }} finally {{
    await browser.close();
  }}
}})();
"#,
            screenshot = screenshot,
        ));

        script
    }

    /// Convert an action to JavaScript code
    fn action_to_js(&self, action: &UiAction) -> String {
        match action {
            UiAction::Goto { path } => format!(
                "    current = {{ kind: 'timeout', expected: null }};\n    await page.goto(baseUrl + {});",
                js_str(path)
            ),
            UiAction::Click { role, name } => format!(
                "    current = {{ kind: 'timeout', expected: null }};\n    await page.getByRole({}, {{ name: {} }}).first().click();",
                js_str(role),
                js_str(name)
            ),
            UiAction::Fill { label, value } => format!(
                "    current = {{ kind: 'timeout', expected: null }};\n    await page.getByLabel({}).fill({});",
                js_str(label),
                js_str(value)
            ),
            UiAction::FillFromEnv { label, var } => format!(
                "    current = {{ kind: 'timeout', expected: null }};\n    await page.getByLabel({}).fill(process.env[{}] || '');",
                js_str(label),
                js_str(var)
            ),
            UiAction::ExpectVisible { role, name } => format!(
                "    current = {{ kind: 'assertion', expected: {} }};\n    await page.getByRole({}, {{ name: {} }}).first().waitFor({{ state: 'visible' }});",
                js_str(&format!("{} \"{}\" visible", role, name)),
                js_str(role),
                js_str(name)
            ),
            UiAction::ExpectUrl { pattern } => format!(
                "    current = {{ kind: 'assertion', expected: {} }};\n    await page.waitForURL(new RegExp({}));",
                js_str(&format!("url matching /{}/", pattern)),
                js_str(pattern)
            ),
        }
    }

    /// Render placeholders, run the actions and report the final page
    pub async fn run_actions(
        &self,
        config: &Configuration,
        actions: &[UiAction],
        options: &ScriptOptions<'_>,
        env: &[(&str, &str)],
    ) -> E2eResult<PageReport> {
        let base_url = config.get(ConfigKey::BaseUrl).ok_or_else(|| Unconfigured {
            missing: vec![ConfigKey::BaseUrl],
        })?;
        let rendered = actions
            .iter()
            .map(|a| a.render(config))
            .collect::<Result<Vec<_>, _>>()?;

        let script = self.build_script(base_url, &rendered, options);
        self.run_script(&script, env).await
    }

    /// Execute a generated script via Node
    pub async fn run_script(&self, script: &str, env: &[(&str, &str)]) -> E2eResult<PageReport> {
        let temp_dir = tempfile::tempdir()?;
        let script_path = temp_dir.path().join("e2e.js");
        std::fs::write(&script_path, script)?;

        debug!("Running Playwright script: {}", script_path.display());

        let node_path = self.config.node_project_dir.join("node_modules");
        let mut cmd = TokioCommand::new("node");
        cmd.arg(&script_path)
            .current_dir(&self.config.node_project_dir)
            .env("NODE_PATH", node_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (name, value) in env {
            cmd.env(name, value);
        }

        let output = cmd.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout);

        match parse_outcome(&stdout) {
            Some(outcome) => outcome.into_result(),
            None => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(E2eError::Playwright(format!(
                    "Script produced no result (status {}):\nstdout: {}\nstderr: {}",
                    output.status, stdout, stderr
                )))
            }
        }
    }
}

impl ScriptOutcome {
    fn into_result(self) -> E2eResult<PageReport> {
        if self.ok {
            return Ok(PageReport { url: self.url });
        }

        let message = self.message.unwrap_or_else(|| "unknown browser error".to_string());
        match self.kind.as_deref() {
            Some("assertion") => Err(E2eError::AssertionMismatch {
                actual: self.url,
                expected: self.expected.unwrap_or_default(),
                location: "browser".to_string(),
            }),
            Some("timeout") => Err(E2eError::Timeout {
                what: format!("{} (at {})", first_line(&message), self.url),
                attempts: 1,
            }),
            _ => Err(E2eError::Playwright(message)),
        }
    }
}

/// Last JSON object line printed by the script
fn parse_outcome(stdout: &str) -> Option<ScriptOutcome> {
    stdout
        .lines()
        .rev()
        .filter(|line| line.trim_start().starts_with('{'))
        .find_map(|line| serde_json::from_str(line).ok())
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or(s)
}

/// JSON string literal, valid in JavaScript
fn js_str(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect()
}

/// A driver bound to the run's session artifact
#[derive(Debug, Clone)]
pub struct BrowserSession {
    driver: BrowserDriver,
    storage_state: Option<PathBuf>,
}

impl BrowserSession {
    pub fn new(driver: BrowserDriver, storage_state: Option<PathBuf>) -> Self {
        Self { driver, storage_state }
    }

    /// Run actions in a fresh authenticated context
    pub async fn run(&self, config: &Configuration, actions: &[UiAction], label: &str) -> E2eResult<PageReport> {
        let options = ScriptOptions {
            storage_state: self.storage_state.as_deref(),
            save_storage_to: None,
            failure_screenshot: Some(label),
        };
        let page = self.driver.run_actions(config, actions, &options, &[]).await?;
        info!("  page: {}", page.url);
        Ok(page)
    }
}

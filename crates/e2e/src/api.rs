//! Management API client
//!
//! Every operation goes through an [`Endpoint`] that fixes its method, path
//! and the status codes the contract allows. Anything else comes back as
//! [`E2eError::UnexpectedStatus`]; there is no retry-and-ignore.

use platform_e2e_common::{ConfigKey, Configuration};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::{E2eError, E2eResult};

const BODY_SNIPPET_LEN: usize = 512;

/// Management API operations exercised by the suite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    RunQuery,
    ApplyMigration,
    GetAuthConfig,
    UpdateAuthConfig,
    GetBranchingConfig,
    UpdateBranchingConfig,
    ListBackups,
    CreateRestorePoint,
    RestorePitr,
    ListBranches,
    CreateBranch,
    GetBranch,
    DeleteBranch,
}

impl Endpoint {
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::RunQuery => "run_query",
            Endpoint::ApplyMigration => "apply_migration",
            Endpoint::GetAuthConfig => "get_auth_config",
            Endpoint::UpdateAuthConfig => "update_auth_config",
            Endpoint::GetBranchingConfig => "get_branching_config",
            Endpoint::UpdateBranchingConfig => "update_branching_config",
            Endpoint::ListBackups => "list_backups",
            Endpoint::CreateRestorePoint => "create_restore_point",
            Endpoint::RestorePitr => "restore_pitr",
            Endpoint::ListBranches => "list_branches",
            Endpoint::CreateBranch => "create_branch",
            Endpoint::GetBranch => "get_branch",
            Endpoint::DeleteBranch => "delete_branch",
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Endpoint::GetAuthConfig
            | Endpoint::GetBranchingConfig
            | Endpoint::ListBackups
            | Endpoint::ListBranches
            | Endpoint::GetBranch => Method::GET,
            Endpoint::UpdateAuthConfig | Endpoint::UpdateBranchingConfig => Method::PATCH,
            Endpoint::DeleteBranch => Method::DELETE,
            Endpoint::RunQuery
            | Endpoint::ApplyMigration
            | Endpoint::CreateRestorePoint
            | Endpoint::RestorePitr
            | Endpoint::CreateBranch => Method::POST,
        }
    }

    /// Path for `target`, a project ref or, for branch endpoints, a branch id
    pub fn path(&self, target: &str) -> String {
        match self {
            Endpoint::RunQuery => format!("/v1/projects/{target}/database/query"),
            Endpoint::ApplyMigration => format!("/v1/projects/{target}/database/migrations"),
            Endpoint::GetAuthConfig | Endpoint::UpdateAuthConfig => format!("/v1/projects/{target}/config/auth"),
            Endpoint::GetBranchingConfig | Endpoint::UpdateBranchingConfig => {
                format!("/v1/projects/{target}/config/branching")
            }
            Endpoint::ListBackups => format!("/v1/projects/{target}/database/backups"),
            Endpoint::CreateRestorePoint => format!("/v1/projects/{target}/database/backups/restore-point"),
            Endpoint::RestorePitr => format!("/v1/projects/{target}/database/backups/restore-pitr"),
            Endpoint::ListBranches | Endpoint::CreateBranch => format!("/v1/projects/{target}/branches"),
            Endpoint::GetBranch | Endpoint::DeleteBranch => format!("/v1/branches/{target}"),
        }
    }

    /// Status codes the contract allows
    pub fn expected_status(&self) -> &'static [u16] {
        match self {
            Endpoint::RunQuery | Endpoint::CreateRestorePoint | Endpoint::RestorePitr | Endpoint::CreateBranch => {
                &[201]
            }
            Endpoint::ApplyMigration
            | Endpoint::GetAuthConfig
            | Endpoint::UpdateAuthConfig
            | Endpoint::GetBranchingConfig
            | Endpoint::UpdateBranchingConfig
            | Endpoint::ListBackups
            | Endpoint::ListBranches
            | Endpoint::GetBranch
            | Endpoint::DeleteBranch => &[200],
        }
    }
}

/// Decoded response of an accepted call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// `Null` for an empty body, a JSON string for a non-JSON body
    pub body: Value,
}

impl ApiResponse {
    /// Row objects of a query result
    pub fn rows(&self) -> &[Value] {
        self.body.as_array().map(Vec::as_slice).unwrap_or_default()
    }

    /// Column of the first row
    pub fn scalar(&self, column: &str) -> Option<&Value> {
        self.rows().first().and_then(|row| row.get(column))
    }
}

/// Bearer-token JSON client for the management API
#[derive(Clone)]
pub struct ManagementApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for ManagementApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagementApi")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl ManagementApi {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> E2eResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("platform-e2e/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    /// Client for the configured API, `None` when URL or token is absent
    pub fn from_config(config: &Configuration, timeout: Duration) -> E2eResult<Option<Self>> {
        match (config.get(ConfigKey::ApiUrl), config.get(ConfigKey::AccessToken)) {
            (Some(url), Some(token)) => Self::new(url, token, timeout).map(Some),
            _ => Ok(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Issue a call and enforce the endpoint's status contract
    pub async fn call(
        &self,
        endpoint: Endpoint,
        target: &str,
        body: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> E2eResult<ApiResponse> {
        let url = format!("{}{}", self.base_url, endpoint.path(target));
        debug!("{} {}", endpoint.method(), url);

        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| E2eError::SpecParse(format!("invalid header name {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| E2eError::SpecParse(format!("invalid header value for {name}: {e}")))?;
            header_map.insert(name, value);
        }

        let mut request = self
            .client
            .request(endpoint.method(), &url)
            .bearer_auth(&self.token)
            .headers(header_map);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        if !endpoint.expected_status().contains(&status) {
            return Err(E2eError::UnexpectedStatus {
                endpoint: endpoint.name().to_string(),
                expected: endpoint.expected_status().to_vec(),
                actual: status,
                body: snippet(&text),
            });
        }

        Ok(ApiResponse {
            status,
            body: decode_body(&text),
        })
    }

    /// Execute SQL; `read_only` marks queries that must not mutate
    pub async fn run_query(&self, project_ref: &str, sql: &str, read_only: bool) -> E2eResult<ApiResponse> {
        let body = json!({ "query": sql, "read_only": read_only });
        self.call(Endpoint::RunQuery, project_ref, Some(&body), &[]).await
    }

    /// Apply a migration at most once per idempotency key
    pub async fn apply_migration(
        &self,
        project_ref: &str,
        name: &str,
        sql: &str,
        idempotency_key: &str,
    ) -> E2eResult<ApiResponse> {
        let body = json!({ "name": name, "query": sql });
        self.call(
            Endpoint::ApplyMigration,
            project_ref,
            Some(&body),
            &[("Idempotency-Key", idempotency_key)],
        )
        .await
    }

    pub async fn get_auth_config(&self, project_ref: &str) -> E2eResult<ApiResponse> {
        self.call(Endpoint::GetAuthConfig, project_ref, None, &[]).await
    }

    pub async fn update_auth_config(&self, project_ref: &str, patch: &Value) -> E2eResult<ApiResponse> {
        self.call(Endpoint::UpdateAuthConfig, project_ref, Some(patch), &[]).await
    }

    pub async fn get_branching_config(&self, project_ref: &str) -> E2eResult<ApiResponse> {
        self.call(Endpoint::GetBranchingConfig, project_ref, None, &[]).await
    }

    /// Toggle the project's branching flag
    pub async fn set_branching_enabled(&self, project_ref: &str, enabled: bool) -> E2eResult<ApiResponse> {
        let body = json!({ "enabled": enabled });
        self.call(Endpoint::UpdateBranchingConfig, project_ref, Some(&body), &[]).await
    }

    pub async fn list_backups(&self, project_ref: &str) -> E2eResult<ApiResponse> {
        self.call(Endpoint::ListBackups, project_ref, None, &[]).await
    }

    pub async fn create_restore_point(&self, project_ref: &str, name: &str) -> E2eResult<ApiResponse> {
        let body = json!({ "name": name });
        self.call(Endpoint::CreateRestorePoint, project_ref, Some(&body), &[]).await
    }

    /// Restore the database to a unix timestamp
    pub async fn restore_pitr(&self, project_ref: &str, recovery_time_target: i64) -> E2eResult<ApiResponse> {
        let body = json!({ "recovery_time_target_unix": recovery_time_target });
        self.call(Endpoint::RestorePitr, project_ref, Some(&body), &[]).await
    }

    pub async fn list_branches(&self, project_ref: &str) -> E2eResult<ApiResponse> {
        self.call(Endpoint::ListBranches, project_ref, None, &[]).await
    }

    pub async fn create_branch(&self, project_ref: &str, branch_name: &str) -> E2eResult<ApiResponse> {
        let body = json!({ "branch_name": branch_name });
        self.call(Endpoint::CreateBranch, project_ref, Some(&body), &[]).await
    }

    pub async fn get_branch(&self, branch_id: &str) -> E2eResult<ApiResponse> {
        self.call(Endpoint::GetBranch, branch_id, None, &[]).await
    }

    pub async fn delete_branch(&self, branch_id: &str) -> E2eResult<ApiResponse> {
        self.call(Endpoint::DeleteBranch, branch_id, None, &[]).await
    }
}

fn decode_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

fn snippet(text: &str) -> String {
    if text.len() <= BODY_SNIPPET_LEN {
        return text.to_string();
    }
    let mut end = BODY_SNIPPET_LEN;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

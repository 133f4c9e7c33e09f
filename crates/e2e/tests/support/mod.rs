//! In-process stand-in for the management API
//!
//! Understands just enough SQL to track tables and row counts, honours
//! idempotency keys on migrations and reports new branches healthy at once.

#![allow(dead_code)]

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use platform_e2e_common::Configuration;
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub const TOKEN: &str = "test-token";
pub const PROJECT_REF: &str = "abcdefghij";

#[derive(Debug)]
pub struct MockState {
    pub tables: BTreeMap<String, u64>,
    pub idempotency_keys: HashSet<String>,
    pub migrations_applied: usize,
    pub auth: Value,
    pub auth_patches: usize,
    pub branching_enabled: bool,
    pub branches: BTreeMap<String, Value>,
    pub backups: Vec<Value>,
    pub pitr_requests: usize,
    /// Queries rejected with 503 after each point-in-time restore
    pub restore_settling_queries: u32,
    restoring: u32,
    next_branch: u32,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            tables: BTreeMap::new(),
            idempotency_keys: HashSet::new(),
            migrations_applied: 0,
            auth: json!({ "mailer_otp_exp": 3600, "site_url": "http://localhost:3000" }),
            auth_patches: 0,
            branching_enabled: false,
            branches: BTreeMap::new(),
            backups: Vec::new(),
            pitr_requests: 0,
            restore_settling_queries: 0,
            restoring: 0,
            next_branch: 0,
        }
    }
}

type Shared = Arc<Mutex<MockState>>;

pub struct MockPlatform {
    pub base_url: String,
    pub state: Shared,
}

impl MockPlatform {
    pub async fn start() -> Self {
        let state: Shared = Arc::new(Mutex::new(MockState::default()));

        let app = Router::new()
            .route("/v1/projects/:project/database/query", post(run_query))
            .route("/v1/projects/:project/database/migrations", post(apply_migration))
            .route("/v1/projects/:project/config/auth", get(get_auth).patch(patch_auth))
            .route("/v1/projects/:project/config/branching", get(get_branching).patch(patch_branching))
            .route("/v1/projects/:project/database/backups", get(list_backups))
            .route("/v1/projects/:project/database/backups/restore-point", post(create_restore_point))
            .route("/v1/projects/:project/database/backups/restore-pitr", post(restore_pitr))
            .route("/v1/projects/:project/branches", get(list_branches).post(create_branch))
            .route("/v1/branches/:id", delete(delete_branch).get(get_branch))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    /// Fully configured API environment pointing at this mock
    pub fn env(&self) -> Configuration {
        self.env_with_token(TOKEN)
    }

    pub fn env_with_token(&self, token: &str) -> Configuration {
        Configuration::from_pairs(
            "mock",
            [
                ("API_URL", self.base_url.as_str()),
                ("PROJECT_REF", PROJECT_REF),
                ("ACCESS_TOKEN", token),
            ],
        )
        .unwrap()
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {TOKEN}"))
        .unwrap_or(false)
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "message": "invalid token" }))).into_response()
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
}

fn execute(state: &mut MockState, sql: &str) -> Result<Value, String> {
    let create = Regex::new(r"^create table if not exists public\.(\w+)").unwrap();
    let insert = Regex::new(r"^insert into public\.(\w+)").unwrap();
    let count = Regex::new(r"^select count\(\*\)::int as total from public\.(\w+)$").unwrap();
    let drop = Regex::new(r"^drop table if exists public\.(\w+)$").unwrap();
    let regclass = Regex::new(r"^select to_regclass\('public\.(\w+)'\) as relation$").unwrap();

    let mut result = json!([]);
    for statement in sql.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        let statement = statement.to_lowercase();
        result = if let Some(c) = create.captures(&statement) {
            state.tables.entry(c[1].to_string()).or_insert(0);
            json!([])
        } else if let Some(c) = insert.captures(&statement) {
            let rows = statement.matches("('").count() as u64;
            let total = state
                .tables
                .get_mut(&c[1])
                .ok_or_else(|| format!("relation \"public.{}\" does not exist", &c[1]))?;
            *total += rows;
            json!([])
        } else if let Some(c) = count.captures(&statement) {
            let total = state
                .tables
                .get(&c[1])
                .ok_or_else(|| format!("relation \"public.{}\" does not exist", &c[1]))?;
            json!([{ "total": total }])
        } else if let Some(c) = drop.captures(&statement) {
            state.tables.remove(&c[1]);
            json!([])
        } else if let Some(c) = regclass.captures(&statement) {
            let relation = state.tables.contains_key(&c[1]).then(|| format!("public.{}", &c[1]));
            json!([{ "relation": relation }])
        } else if statement == "select 1 as health_check" {
            json!([{ "health_check": 1 }])
        } else {
            return Err(format!("unsupported statement: {statement}"));
        };
    }
    Ok(result)
}

async fn run_query(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    {
        let mut state = state.lock();
        if state.restoring > 0 {
            state.restoring -= 1;
            return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "message": "database is restoring" }))).into_response();
        }
    }
    let sql = body["query"].as_str().unwrap_or_default().to_string();
    if body["read_only"].as_bool() == Some(true) && !sql.trim_start().to_lowercase().starts_with("select") {
        return bad_request("read-only query attempted a write".to_string());
    }
    match execute(&mut state.lock(), &sql) {
        Ok(rows) => (StatusCode::CREATED, Json(rows)).into_response(),
        Err(message) => bad_request(message),
    }
}

async fn apply_migration(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut state = state.lock();
    let key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if let Some(key) = &key {
        if state.idempotency_keys.contains(key) {
            return (StatusCode::OK, Json(json!({ "name": body["name"] }))).into_response();
        }
    }

    {
        if state.restoring > 0 {
            state.restoring -= 1;
            return (StatusCode::SERVICE_UNAVAILABLE, Json(json!({ "message": "database is restoring" }))).into_response();
        }
    }
    let sql = body["query"].as_str().unwrap_or_default().to_string();
    match execute(&mut state, &sql) {
        Ok(_) => {
            state.migrations_applied += 1;
            if let Some(key) = key {
                state.idempotency_keys.insert(key);
            }
            (StatusCode::OK, Json(json!({ "name": body["name"] }))).into_response()
        }
        Err(message) => bad_request(message),
    }
}

async fn get_auth(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    (StatusCode::OK, Json(state.lock().auth.clone())).into_response()
}

async fn patch_auth(State(state): State<Shared>, headers: HeaderMap, Json(patch): Json<Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut state = state.lock();
    if let (Some(auth), Some(patch)) = (state.auth.as_object_mut(), patch.as_object()) {
        for (k, v) in patch {
            auth.insert(k.clone(), v.clone());
        }
    }
    state.auth_patches += 1;
    (StatusCode::OK, Json(state.auth.clone())).into_response()
}

async fn get_branching(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    (StatusCode::OK, Json(json!({ "enabled": state.lock().branching_enabled }))).into_response()
}

async fn patch_branching(State(state): State<Shared>, headers: HeaderMap, Json(patch): Json<Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut state = state.lock();
    if let Some(enabled) = patch["enabled"].as_bool() {
        state.branching_enabled = enabled;
    }
    (StatusCode::OK, Json(json!({ "enabled": state.branching_enabled }))).into_response()
}

async fn list_backups(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let backups = state.lock().backups.clone();
    (StatusCode::OK, Json(json!({ "pitr_enabled": true, "backups": backups }))).into_response()
}

async fn create_restore_point(State(state): State<Shared>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let point = json!({ "name": body["name"], "status": "AVAILABLE" });
    state.lock().backups.push(point.clone());
    (StatusCode::CREATED, Json(point)).into_response()
}

async fn restore_pitr(State(state): State<Shared>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut state = state.lock();
    state.pitr_requests += 1;
    state.restoring = state.restore_settling_queries;
    // Every table the harness creates postdates the recovery target
    state.tables.clear();
    (StatusCode::CREATED, Json(json!({ "status": "RESTORING" }))).into_response()
}

async fn list_branches(State(state): State<Shared>, Path(_project): Path<String>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let branches: Vec<Value> = state.lock().branches.values().cloned().collect();
    (StatusCode::OK, Json(json!(branches))).into_response()
}

async fn create_branch(
    State(state): State<Shared>,
    Path(_project): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut state = state.lock();
    if !state.branching_enabled {
        return bad_request("branching is not enabled for this project".to_string());
    }
    state.next_branch += 1;
    let id = format!("branch-{}", state.next_branch);
    let branch = json!({ "id": id, "name": body["branch_name"], "status": "ACTIVE_HEALTHY" });
    state.branches.insert(id.clone(), branch.clone());

    let mut created = branch;
    created["status"] = json!("CREATING_PROJECT");
    (StatusCode::CREATED, Json(created)).into_response()
}

async fn get_branch(State(state): State<Shared>, Path(id): Path<String>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    match state.lock().branches.get(&id) {
        Some(branch) => (StatusCode::OK, Json(branch.clone())).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "message": "branch not found" }))).into_response(),
    }
}

async fn delete_branch(State(state): State<Shared>, Path(id): Path<String>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    match state.lock().branches.remove(&id) {
        Some(_) => (StatusCode::OK, Json(json!({ "message": "ok" }))).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "message": "branch not found" }))).into_response(),
    }
}

//! Built-in management API groups

use platform_e2e_common::ConfigKey;

use crate::api::ApiResponse;
use crate::assertions::{poll_until, PollPolicy};
use crate::context::StepContext;
use crate::error::{E2eError, E2eResult};
use crate::sequencer::WorkflowGroup;

mod auth_config;
mod backups;
mod branches;
mod health;
mod migrations;

pub use auth_config::auth_config;
pub use backups::backup_restore;
pub use branches::branch_lifecycle;
pub use health::api_health;
pub use migrations::{migration_idempotency, migration_rollback};

/// Every API group shipped with the harness
pub fn builtin() -> Vec<WorkflowGroup> {
    vec![
        api_health(),
        migration_rollback(),
        migration_idempotency(),
        auth_config(),
        backup_restore(),
        branch_lifecycle(),
    ]
}

/// Skeleton shared by all API groups
fn api_group(name: &str, description: &str) -> WorkflowGroup {
    WorkflowGroup::new(name)
        .describe(description)
        .tag("api")
        .requires(&ConfigKey::API)
}

/// Poll until the project database answers queries again after a restore
async fn wait_for_database(ctx: &StepContext, policy: PollPolicy) -> E2eResult<u32> {
    let api = ctx.api()?;
    let project_ref = ctx.project_ref()?;

    poll_until("database to answer after restore", policy, move || async move {
        accepting_queries(api.run_query(project_ref, "SELECT 1 as health_check", true).await)
    })
    .await
}

/// A restoring database rejects queries; that is "not yet", not a failure
fn accepting_queries(result: E2eResult<ApiResponse>) -> E2eResult<bool> {
    match result {
        Ok(response) => Ok(!response.body.is_null()),
        Err(E2eError::UnexpectedStatus { .. }) | Err(E2eError::Http(_)) => Ok(false),
        Err(e) => Err(e),
    }
}

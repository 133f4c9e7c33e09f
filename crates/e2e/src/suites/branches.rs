//! Branch lifecycle: enable branching, create, wait healthy, read, delete

use serde_json::Value;
use std::time::Duration;

use crate::assertions::{ensure, ensure_eq, poll_until, PollPolicy};
use crate::context::StepContext;
use crate::error::E2eResult;
use crate::sequencer::{Step, StepFuture, WorkflowGroup};
use crate::state::CarriedState;

pub const ACTIVE_HEALTHY: &str = "ACTIVE_HEALTHY";
const BRANCH_HEALTHY: PollPolicy = PollPolicy::new(Duration::from_secs(5), 60);

pub fn branch_lifecycle() -> WorkflowGroup {
    super::api_group("branch-lifecycle", "Create a preview branch, wait until healthy and delete it")
        .tag("branching")
        .doc("management-api/branches")
        .resource("branching")
        .with_timeout(Duration::from_secs(900))
        .step(Step::new("enable branching", enable_branching))
        .step(Step::new("create branch", create_branch))
        .step(Step::new("wait for branch health", wait_for_health).with_timeout(Duration::from_secs(330)))
        .step(Step::new("read branch", read_branch))
        .step(Step::new("delete branch", delete_branch))
        .finally(cleanup)
}

fn enable_branching<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let api = ctx.api()?;
        let project_ref = ctx.project_ref()?;

        let response = api.get_branching_config(project_ref).await?;
        let enabled = response.body.get("enabled").and_then(Value::as_bool);
        ensure(enabled.is_some(), "a boolean branching flag", &response.body)?;
        state.set("branching_was_enabled", enabled)?;

        if enabled == Some(false) {
            api.set_branching_enabled(project_ref, true).await?;
        }
        Ok(())
    })
}

fn create_branch<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let name = ctx.unique_name("e2e_branch");
        let response = ctx.api()?.create_branch(ctx.project_ref()?, &name).await?;
        let id = response.body.get("id").and_then(Value::as_str);
        ensure(id.is_some(), "a branch id", &response.body)?;
        state.set("branch_name", &name)?;
        state.set("branch_id", id)
    })
}

fn wait_for_health<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let id = state.get_str("branch_id")?;
        let api = ctx.api()?;

        poll_until(&format!("branch {id} to become {ACTIVE_HEALTHY}"), BRANCH_HEALTHY, move || async move {
            let response = api.get_branch(id).await?;
            Ok(response.body["status"] == ACTIVE_HEALTHY)
        })
        .await?;
        Ok(())
    })
}

fn read_branch<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let response = ctx.api()?.get_branch(state.get_str("branch_id")?).await?;
        ensure_eq(response.body["name"].as_str(), Some(state.get_str("branch_name")?))?;
        ensure_eq(response.body["status"].as_str(), Some(ACTIVE_HEALTHY))
    })
}

fn delete_branch<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        ctx.api()?.delete_branch(state.get_str("branch_id")?).await?;
        state.set("branch_deleted", true)
    })
}

/// Delete a leftover branch and turn branching back off if it was off
fn cleanup<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let leftover = match state.get_opt::<String>("branch_id")? {
            Some(id) if !state.contains("branch_deleted") => Some(id),
            _ => None,
        };
        let deleted = match leftover {
            Some(id) => remove_branch(ctx, &id).await,
            None => Ok(()),
        };

        let restored = match state.get_opt::<bool>("branching_was_enabled")? {
            Some(false) => ctx
                .api()?
                .set_branching_enabled(ctx.project_ref()?, false)
                .await
                .map(|_| ()),
            _ => Ok(()),
        };

        deleted.and(restored)
    })
}

async fn remove_branch(ctx: &StepContext, id: &str) -> E2eResult<()> {
    ctx.api()?.delete_branch(id).await?;
    Ok(())
}

use crate::assertions::{ensure_defined, ensure_eq};
use crate::context::StepContext;
use crate::sequencer::{Step, StepFuture, WorkflowGroup};
use crate::state::CarriedState;

pub fn api_health() -> WorkflowGroup {
    super::api_group("api-health", "Management API answers a read-only query")
        .tag("smoke")
        .doc("management-api/database/query")
        .step(Step::new("health check query", health_check))
}

fn health_check<'a>(ctx: &'a StepContext, _state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let response = ctx
            .api()?
            .run_query(ctx.project_ref()?, "SELECT 1 as health_check", true)
            .await?;
        ensure_eq(response.status, 201)?;
        ensure_defined(&response.body)?;
        Ok(())
    })
}

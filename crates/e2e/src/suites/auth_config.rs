//! Auth configuration round trip
//!
//! Changes the email OTP expiry, waits for the change to become visible and
//! restores the captured prior value in the finalizer. Serialized on the
//! `auth-config` resource because the setting is project-wide.

use serde_json::{json, Value};
use std::time::Duration;

use crate::assertions::{ensure, poll_until, PollPolicy};
use crate::context::StepContext;
use crate::sequencer::{Step, StepFuture, WorkflowGroup};
use crate::state::CarriedState;

const SETTING: &str = "mailer_otp_exp";
const CONFIG_VISIBLE: PollPolicy = PollPolicy::new(Duration::from_secs(2), 15);

pub fn auth_config() -> WorkflowGroup {
    super::api_group("auth-config", "Patch an auth setting and restore it afterwards")
        .tag("auth")
        .doc("management-api/config/auth")
        .resource("auth-config")
        .step(Step::new("capture current setting", capture_setting))
        .step(Step::new("update setting", update_setting))
        .step(Step::new("verify setting", verify_setting))
        .finally(restore_setting)
}

/// A different but valid expiry
fn next_value(prior: u64) -> u64 {
    if prior == 3600 {
        1800
    } else {
        3600
    }
}

fn capture_setting<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let response = ctx.api()?.get_auth_config(ctx.project_ref()?).await?;
        let prior = response.body.get(SETTING).and_then(Value::as_u64);
        ensure(prior.is_some(), &format!("a numeric {SETTING}"), &response.body[SETTING])?;
        state.set("prior_value", prior)
    })
}

fn update_setting<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let prior: u64 = state.get("prior_value")?;
        let target = next_value(prior);
        state.set("target_value", target)?;
        ctx.api()?
            .update_auth_config(ctx.project_ref()?, &json!({ SETTING: target }))
            .await?;
        Ok(())
    })
}

fn verify_setting<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let target: u64 = state.get("target_value")?;
        let api = ctx.api()?;
        let project_ref = ctx.project_ref()?;

        poll_until(&format!("{SETTING} to read back as {target}"), CONFIG_VISIBLE, move || async move {
            let response = api.get_auth_config(project_ref).await?;
            Ok(response.body.get(SETTING).and_then(Value::as_u64) == Some(target))
        })
        .await?;
        Ok(())
    })
}

fn restore_setting<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let Some(prior) = state.get_opt::<u64>("prior_value")? else {
            return Ok(());
        };
        if !state.contains("target_value") {
            return Ok(());
        }
        ctx.api()?
            .update_auth_config(ctx.project_ref()?, &json!({ SETTING: prior }))
            .await?;
        Ok(())
    })
}

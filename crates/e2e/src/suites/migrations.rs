//! Schema migration groups
//!
//! Both groups create a uniquely named table so concurrent instances never
//! collide, and drop it in the finalizer.

use serde_json::{json, Value};
use std::time::Duration;

use crate::assertions::{ensure_defined, ensure_eq, PollPolicy};
use crate::context::StepContext;
use crate::error::E2eResult;
use crate::sequencer::{Step, StepFuture, WorkflowGroup};
use crate::state::CarriedState;

const ROLLBACK_EXCLUDED: &str = "point-in-time rollback is not yet stable on the platform";
const RESTORE_SETTLED: PollPolicy = PollPolicy::new(Duration::from_secs(10), 30);

pub fn migration_rollback() -> WorkflowGroup {
    super::api_group(
        "migration-rollback",
        "Migrate, write and verify rows, then roll the migration back",
    )
    .tag("migrations")
    .doc("management-api/database/migrations")
    .resource("database")
    .step(Step::new("apply table migration", apply_rollback_migration))
    .step(Step::new("insert rows", insert_rows))
    .step(Step::new("verify row count", verify_row_count))
    .step(Step::new("roll back migration", roll_back).excluded(ROLLBACK_EXCLUDED))
    .step(
        Step::new("verify rollback", verify_rolled_back)
            .excluded(ROLLBACK_EXCLUDED)
            .with_timeout(Duration::from_secs(330)),
    )
    .finally(drop_table)
}

pub fn migration_idempotency() -> WorkflowGroup {
    super::api_group(
        "migration-idempotency",
        "Re-applying a migration with the same idempotency key is a no-op",
    )
    .tag("migrations")
    .doc("management-api/database/migrations")
    .resource("database")
    .step(Step::new("apply migration", apply_seeded_migration))
    .step(Step::new("count rows", count_rows_before))
    .step(Step::new("re-apply with same key", reapply_migration))
    .step(Step::new("count rows unchanged", count_rows_after))
    .finally(drop_table)
}

fn create_table_sql(table: &str) -> String {
    format!(
        "create table if not exists public.{table} \
         (id bigint generated always as identity primary key, label text not null)"
    )
}

fn count_sql(table: &str) -> String {
    format!("select count(*)::int as total from public.{table}")
}

async fn row_count(ctx: &StepContext, table: &str) -> E2eResult<Value> {
    let response = ctx.api()?.run_query(ctx.project_ref()?, &count_sql(table), true).await?;
    ensure_eq(response.status, 201)?;
    ensure_defined(&response.body)?;
    Ok(response.scalar("total").cloned().unwrap_or(Value::Null))
}

fn apply_rollback_migration<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let table = ctx.unique_name("e2e_rollback");
        let migration = format!("create_{table}");
        state.set("checkpoint_unix", chrono::Utc::now().timestamp())?;
        state.set("table", &table)?;

        let key = uuid::Uuid::new_v4().to_string();
        ctx.api()?
            .apply_migration(ctx.project_ref()?, &migration, &create_table_sql(&table), &key)
            .await?;
        Ok(())
    })
}

fn insert_rows<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let table = state.get_str("table")?;
        let sql = format!("insert into public.{table} (label) values ('alpha'), ('beta'), ('gamma'), ('delta')");
        let response = ctx.api()?.run_query(ctx.project_ref()?, &sql, false).await?;
        ensure_eq(response.status, 201)?;
        Ok(())
    })
}

fn verify_row_count<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let total = row_count(ctx, state.get_str("table")?).await?;
        ensure_eq(total, json!(4))
    })
}

fn roll_back<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let checkpoint: i64 = state.get("checkpoint_unix")?;
        let response = ctx.api()?.restore_pitr(ctx.project_ref()?, checkpoint).await?;
        ensure_defined(&response.body)?;
        state.set("rolled_back", true)
    })
}

fn verify_rolled_back<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let rolled_back: bool = state.get("rolled_back")?;
        ensure_eq(rolled_back, true)?;
        super::wait_for_database(ctx, RESTORE_SETTLED).await?;
        let sql = format!("select to_regclass('public.{}') as relation", state.get_str("table")?);
        let response = ctx.api()?.run_query(ctx.project_ref()?, &sql, true).await?;
        ensure_eq(response.scalar("relation"), Some(&Value::Null))
    })
}

fn apply_seeded_migration<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let table = ctx.unique_name("e2e_idempotent");
        let sql = format!(
            "{}; insert into public.{table} (label) values ('seed')",
            create_table_sql(&table)
        );
        let migration = format!("seed_{table}");
        let key = uuid::Uuid::new_v4().to_string();
        state.set("table", &table)?;
        state.set("migration", &migration)?;
        state.set("migration_sql", &sql)?;
        state.set("idempotency_key", &key)?;

        ctx.api()?.apply_migration(ctx.project_ref()?, &migration, &sql, &key).await?;
        Ok(())
    })
}

fn count_rows_before<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let total = row_count(ctx, state.get_str("table")?).await?;
        ensure_eq(&total, &json!(1))?;
        state.set("rows_before", total)
    })
}

fn reapply_migration<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let response = ctx
            .api()?
            .apply_migration(
                ctx.project_ref()?,
                state.get_str("migration")?,
                state.get_str("migration_sql")?,
                state.get_str("idempotency_key")?,
            )
            .await?;
        ensure_eq(response.status, 200)
    })
}

fn count_rows_after<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let before: Value = state.get("rows_before")?;
        let after = row_count(ctx, state.get_str("table")?).await?;
        ensure_eq(after, before)
    })
}

fn drop_table<'a>(ctx: &'a StepContext, state: &'a mut CarriedState) -> StepFuture<'a> {
    Box::pin(async move {
        let Some(table) = state.get_opt::<String>("table")? else {
            return Ok(());
        };
        let sql = format!("drop table if exists public.{table}");
        ctx.api()?.run_query(ctx.project_ref()?, &sql, false).await?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_group_shape() {
        let group = migration_rollback();
        assert_eq!(group.steps().len(), 5);
        let excluded: Vec<&str> = group
            .steps()
            .iter()
            .filter(|s| s.exclusion().is_some())
            .map(|s| s.name())
            .collect();
        assert_eq!(excluded, vec!["roll back migration", "verify rollback"]);
    }

    #[test]
    fn test_sql_uses_qualified_table() {
        let sql = create_table_sql("e2e_rollback_1a2b3c4d");
        assert!(sql.starts_with("create table if not exists public.e2e_rollback_1a2b3c4d ("));
        assert_eq!(count_sql("t"), "select count(*)::int as total from public.t");
    }
}

//! Uniform stub dispatcher for the commands that only need acknowledgement
//! plumbing (rate limiting, audit trail, a job id) without any real
//! business logic behind them: `deploy`, `backup`, `restore`, `logs`,
//! `secrets`, `cost`, `slo`, `session`, `memory`, `search`, `workflow`,
//! `dashboard`, `template`, `troubleshoot`.

use masterclaw_core::AuditEventType;
use masterclaw_core::audit::PendingRecord;
use masterclaw_protocol::CommandContext;
use masterclaw_protocol::McError;
use uuid::Uuid;

use crate::cli_args::GenericArgs;
use crate::output::HandlerOutput;
use crate::state::AppState;

pub async fn run(ctx: &CommandContext, state: &AppState, category: &str, args: GenericArgs) -> Result<HandlerOutput, McError> {
    let job_id = format!("job_{}", Uuid::new_v4());

    state
        .audit
        .append(PendingRecord {
            correlation_id: ctx.correlation_id.clone(),
            user_identity: ctx.user_identity.clone(),
            event_type: AuditEventType::CommandExec,
            subject_ref: category.to_string(),
            details: serde_json::json!({ "jobId": job_id, "args": args.args }),
        })
        .map_err(|e| McError::generic(format!("failed to write audit record: {e}")))?;

    let data = serde_json::json!({
        "category": category,
        "jobId": job_id,
        "accepted": true,
        "args": args.args,
    });
    let human = format!("{category} accepted as job {job_id}");
    Ok(HandlerOutput::new(data, human))
}

//! `mc exec`: run a command inside a whitelisted container via argv-only
//! `docker exec`, never a shell.

use std::time::Duration;

use masterclaw_core::AuditEventType;
use masterclaw_core::audit::PendingRecord;
use masterclaw_exec::ContainerExecDescriptor;
use masterclaw_exec::exec_in_container;
use masterclaw_protocol::CommandContext;
use masterclaw_protocol::McError;

use crate::cli_args::ExecArgs;
use crate::output::HandlerOutput;
use crate::state::AppState;

pub async fn run(ctx: &CommandContext, state: &AppState, args: ExecArgs) -> Result<HandlerOutput, McError> {
    let mut descriptor = ContainerExecDescriptor::new(args.container.clone(), args.command);
    descriptor.shell = args.shell;
    descriptor.timeout = Duration::from_secs(args.timeout_secs);

    let container = args.container.clone();
    let result = exec_in_container(descriptor, &state.audit, &ctx.correlation_id, &ctx.user_identity).await;

    // Validation failures (shell chaining, blocked tokens, etc.) never reach
    // a subprocess and are audited by `exec_in_container` itself as a
    // `SECURITY_VIOLATION`, same as a resource-limit kill; every invocation
    // that does spawn gets its own `COMMAND_EXEC` record here, success or
    // failure.
    let result = match result {
        Ok(result) => {
            let _ = state.audit.append(PendingRecord {
                correlation_id: ctx.correlation_id.clone(),
                user_identity: ctx.user_identity.clone(),
                event_type: AuditEventType::CommandExec,
                subject_ref: container.clone(),
                details: serde_json::json!({ "exitCode": result.process.exit_code }),
            });
            result
        }
        Err(err) => return Err(err),
    };

    let stdout = String::from_utf8_lossy(&result.process.stdout).to_string();
    let stderr = String::from_utf8_lossy(&result.process.stderr).to_string();

    let human = if result.process.exit_code == 0 {
        stdout.clone()
    } else {
        format!("{stdout}\n{stderr}\n(exit code {})", result.process.exit_code)
    };

    let data = serde_json::json!({
        "container": args.container,
        "exitCode": result.process.exit_code,
        "stdout": stdout,
        "stderr": stderr,
        "stdoutTruncated": result.process.stdout_truncated,
        "stderrTruncated": result.process.stderr_truncated,
        "resourceViolation": result.resource_violation.map(|v| serde_json::json!({
            "description": v.description,
            "hint": v.hint,
        })),
    });

    if result.process.exit_code != 0 {
        return Err(McError::generic(format!(
            "container command exited with code {}",
            result.process.exit_code
        ))
        .with_details(data));
    }

    Ok(HandlerOutput::new(data, human))
}

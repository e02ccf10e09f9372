//! `mc audit`: verify the signature chain, or tail the most recent records.

use std::fs;
use std::io::BufRead;

use masterclaw_core::audit::AuditRecord;
use masterclaw_protocol::CommandContext;
use masterclaw_protocol::McError;

use crate::cli_args::AuditAction;
use crate::cli_args::AuditArgs;
use crate::output::HandlerOutput;
use crate::state::AppState;

pub async fn run(_ctx: &CommandContext, state: &AppState, args: AuditArgs) -> Result<HandlerOutput, McError> {
    match args.action {
        AuditAction::Verify => {
            let result = state
                .audit
                .verify()
                .map_err(|e| McError::generic(format!("failed to read audit log: {e}")))?;
            match result {
                Ok(()) => Ok(HandlerOutput::new(
                    serde_json::json!({ "verified": true }),
                    "audit log chain verified intact".to_string(),
                )),
                Err(index) => Err(McError::signature_mismatch(index)),
            }
        }
        AuditAction::Tail { limit } => {
            let path = state.state_dir.path("audit.log");
            let records = tail_records(&path, limit)
                .map_err(|e| McError::generic(format!("failed to read audit log: {e}")))?;
            let human = records
                .iter()
                .map(|r| format!("{} {:?} {} {}", r.timestamp, r.event_type, r.subject_ref, r.user_identity))
                .collect::<Vec<_>>()
                .join("\n");
            Ok(HandlerOutput::new(
                serde_json::json!({ "records": records }),
                if human.is_empty() { "no audit records".to_string() } else { human },
            ))
        }
    }
}

fn tail_records(path: &std::path::Path, limit: usize) -> std::io::Result<Vec<AuditRecord>> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let reader = std::io::BufReader::new(file);
    let mut all = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(record) = serde_json::from_str::<AuditRecord>(&line) {
            all.push(record);
        }
    }
    let start = all.len().saturating_sub(limit);
    Ok(all.split_off(start))
}

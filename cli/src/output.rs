//! JSON/human output envelopes (§6): exactly one line to stdout on success
//! and one line to stderr on failure, so scripting against `mc --json`
//! never has to guess where the payload ends.

use masterclaw_protocol::CommandContext;
use masterclaw_protocol::McError;
use masterclaw_protocol::OutputMode;
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// What a handler hands back to the dispatcher: the structured payload for
/// JSON mode, and the already-rendered line for human mode.
pub struct HandlerOutput {
    pub data: Value,
    pub human: String,
}

impl HandlerOutput {
    pub fn new(data: Value, human: impl Into<String>) -> Self {
        Self { data, human: human.into() }
    }
}

pub fn emit_success(ctx: &CommandContext, quiet: bool, output: &HandlerOutput) {
    match ctx.output_mode {
        OutputMode::Json => {
            let envelope = serde_json::json!({
                "ok": true,
                "ts": now_rfc3339(),
                "correlationID": ctx.correlation_id.as_str(),
                "exitCode": 0,
                "data": output.data,
            });
            println!("{envelope}");
        }
        OutputMode::Human => {
            if !quiet {
                println!("{}", output.human);
            }
        }
    }
}

pub fn emit_error(ctx: &CommandContext, err: &McError) {
    match ctx.output_mode {
        OutputMode::Json => {
            let envelope = serde_json::json!({
                "ok": false,
                "ts": now_rfc3339(),
                "category": serde_json::to_value(err.kind).unwrap_or(Value::Null),
                "exitCode": err.exit_code.as_i32(),
                "message": err.message,
                "correlationID": ctx.correlation_id.as_str(),
                "details": err.details,
            });
            println!("{envelope}");
        }
        OutputMode::Human => {
            eprintln!("error: {}", err.message);
        }
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

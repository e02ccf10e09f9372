//! `mc rate-limit`: inspect or reset the sliding-window admission state.

use masterclaw_core::ratelimit::default_limits;
use masterclaw_core::ratelimit::limit_for;
use masterclaw_protocol::CommandContext;
use masterclaw_protocol::McError;

use crate::cli_args::RateLimitAction;
use crate::cli_args::RateLimitArgs;
use crate::output::HandlerOutput;
use crate::ratelimit_gate;
use crate::state::AppState;

pub async fn run(ctx: &CommandContext, state: &AppState, args: RateLimitArgs) -> Result<HandlerOutput, McError> {
    match args.action {
        RateLimitAction::Show => {
            let rate_state = ratelimit_gate::load(&state.state_dir);
            let limits = default_limits();
            let key_prefix = format!("{}:", ctx.user_identity);

            let mut rows = Vec::new();
            for (window_key, timestamps) in &rate_state.windows {
                if !window_key.starts_with(&key_prefix) {
                    continue;
                }
                let category = &window_key[key_prefix.len()..];
                let limit = limit_for(category, &limits);
                rows.push(serde_json::json!({
                    "category": category,
                    "used": timestamps.len(),
                    "max": limit.max_requests,
                    "windowSecs": limit.window.as_secs(),
                }));
            }

            let human = if rows.is_empty() {
                "no active rate-limit windows for this user".to_string()
            } else {
                rows.iter()
                    .map(|r| format!("{}: {}/{} in {}s", r["category"], r["used"], r["max"], r["windowSecs"]))
                    .collect::<Vec<_>>()
                    .join("\n")
            };
            Ok(HandlerOutput::new(serde_json::json!({ "windows": rows }), human))
        }
        RateLimitAction::Reset { category } => {
            ratelimit_gate::reset_category(&state.state_dir, &category)?;
            Ok(HandlerOutput::new(
                serde_json::json!({ "category": category, "reset": true }),
                format!("reset rate-limit windows for category {category}"),
            ))
        }
    }
}

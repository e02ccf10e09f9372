//! Top-level command dispatch: resolve a correlation id, build process state,
//! gate on the rate limiter, run the matched handler under cooperative
//! cancellation, then render and flush exactly once.

use std::collections::BTreeMap;

use masterclaw_core::AuditEventType;
use masterclaw_core::audit::PendingRecord;
use masterclaw_core::logger::install_exit_flush_hooks;
use masterclaw_core::logger::set_current_correlation_id;
use masterclaw_protocol::CommandContext;
use masterclaw_protocol::CorrelationId;
use masterclaw_protocol::McError;
use masterclaw_protocol::OutputMode;

use crate::cli_args::Cli;
use crate::cli_args::Command;
use crate::cli_args::ConfigAction;
use crate::cli_args::ConfigArgs;
use crate::handlers;
use crate::output::emit_error;
use crate::output::emit_success;
use crate::ratelimit_gate;
use crate::state::AppState;

pub async fn run(cli: Cli) -> i32 {
    let correlation_id = CorrelationId::resolve(None, std::env::var("MC_CORRELATION_ID").ok().as_deref());
    set_current_correlation_id(correlation_id.clone());

    let output_mode = if cli.json || std::env::var("MC_JSON_OUTPUT").as_deref() == Ok("1") {
        OutputMode::Json
    } else {
        OutputMode::Human
    };
    let command_path = command_path_for(&cli.command);
    let flags = flags_for(&cli);
    let ctx = CommandContext::new(correlation_id.clone(), command_path, flags, output_mode, false);

    let state = match AppState::init(&correlation_id, &ctx.user_identity, ctx.debug_enabled) {
        Ok(state) => state,
        Err(err) => {
            emit_error(&ctx, &err);
            return err.exit_code.as_i32();
        }
    };

    install_exit_flush_hooks(state.logger.clone());

    let quiet = cli.quiet;
    let exit_code = tokio::select! {
        result = dispatch(&ctx, &state, cli) => {
            match result {
                Ok(output) => {
                    emit_success(&ctx, quiet, &output);
                    0
                }
                Err(err) => {
                    emit_error(&ctx, &err);
                    err.exit_code.as_i32()
                }
            }
        }
        _ = wait_for_termination() => {
            let err = McError::cancelled();
            emit_error(&ctx, &err);
            err.exit_code.as_i32()
        }
    };

    state.logger.flush();
    exit_code
}

#[cfg(unix)]
async fn wait_for_termination() {
    use tokio::signal::unix::SignalKind;
    use tokio::signal::unix::signal;

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(_) => std::future::pending().await,
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_termination() {
    let _ = tokio::signal::ctrl_c().await;
}

async fn dispatch(ctx: &CommandContext, state: &AppState, cli: Cli) -> Result<crate::output::HandlerOutput, McError> {
    gate_rate_limit(ctx, state)?;

    match cli.command {
        Command::Config(args) => handlers::config::run(ctx, state, args).await,
        Command::Status => handlers::status::run(ctx, state).await,
        Command::Health => handlers::health::run(ctx, state).await,
        Command::Exec(args) => handlers::exec::run(ctx, state, args).await,
        Command::Heal(args) => handlers::heal::run(ctx, state, args.apply, cli.force).await,
        Command::Prune(args) => handlers::prune::run(ctx, state, args.apply, cli.force).await,
        Command::Scan => handlers::scan::run(ctx, state).await,
        Command::Audit(args) => handlers::audit::run(ctx, state, args).await,
        Command::RateLimit(args) => handlers::ratelimit::run(ctx, state, args).await,
        Command::Circuits(args) => handlers::circuits::run(ctx, state, args).await,
        Command::Events(args) => handlers::events::run(ctx, state, args).await,
        Command::Deploy(args) => handlers::generic::run(ctx, state, "deploy", args).await,
        Command::Backup(args) => handlers::generic::run(ctx, state, "backup", args).await,
        Command::Restore(args) => handlers::generic::run(ctx, state, "restore", args).await,
        Command::Logs(args) => handlers::generic::run(ctx, state, "logs", args).await,
        Command::Secrets(args) => handlers::generic::run(ctx, state, "secrets", args).await,
        Command::Cost(args) => handlers::generic::run(ctx, state, "cost", args).await,
        Command::Slo(args) => handlers::generic::run(ctx, state, "slo", args).await,
        Command::Session(args) => handlers::generic::run(ctx, state, "session", args).await,
        Command::Memory(args) => handlers::generic::run(ctx, state, "memory", args).await,
        Command::Search(args) => handlers::generic::run(ctx, state, "search", args).await,
        Command::Workflow(args) => handlers::generic::run(ctx, state, "workflow", args).await,
        Command::Dashboard(args) => handlers::generic::run(ctx, state, "dashboard", args).await,
        Command::Template(args) => handlers::generic::run(ctx, state, "template", args).await,
        Command::Troubleshoot(args) => handlers::generic::run(ctx, state, "troubleshoot", args).await,
    }
}

fn gate_rate_limit(ctx: &CommandContext, state: &AppState) -> Result<(), McError> {
    let category = rate_limit_category(ctx.command_path.as_slice());
    let admission = ratelimit_gate::check(&state.state_dir, &state.audit, &ctx.correlation_id, &ctx.user_identity, category)?;
    if admission.allowed {
        return Ok(());
    }

    let _ = state.audit.append(PendingRecord {
        correlation_id: ctx.correlation_id.clone(),
        user_identity: ctx.user_identity.clone(),
        event_type: AuditEventType::RateLimitDenied,
        subject_ref: category.to_string(),
        details: serde_json::json!({ "retryAfterMillis": admission.retry_after.as_millis() as u64 }),
    });

    Err(McError::rate_limited(admission.retry_after.as_millis() as u64))
}

/// `config set` gets its own, stricter rate-limit bucket (`config-fix`);
/// everything else uses the command's top-level category.
fn rate_limit_category(command_path: &[String]) -> &str {
    if command_path.first().map(String::as_str) == Some("config") && command_path.get(1).map(String::as_str) == Some("set")
    {
        "config-fix"
    } else {
        command_path.first().map(String::as_str).unwrap_or("unknown")
    }
}

fn command_path_for(command: &Command) -> Vec<String> {
    let mut path = vec![command.category().to_string()];
    match command {
        Command::Config(args) => path.push(args.action.name().to_string()),
        Command::Audit(args) => path.push(args.action.name().to_string()),
        Command::RateLimit(args) => path.push(args.action.name().to_string()),
        Command::Circuits(args) => path.push(args.action.name().to_string()),
        Command::Events(args) => path.push(args.action.name().to_string()),
        _ => {}
    }
    path
}

fn flags_for(cli: &Cli) -> BTreeMap<String, String> {
    let mut flags = BTreeMap::new();
    flags.insert("json".to_string(), cli.json.to_string());
    flags.insert("quiet".to_string(), cli.quiet.to_string());
    flags.insert("force".to_string(), cli.force.to_string());
    if let Command::Config(ConfigArgs { action: ConfigAction::Set { key, .. } }) = &cli.command {
        flags.insert("configKey".to_string(), key.clone());
    }
    flags
}

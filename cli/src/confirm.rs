//! Interactive confirmation gate for destructive operations (`heal --apply`,
//! `prune --apply`). `--force` bypasses the prompt; running non-interactively
//! without `--force` is treated as a refusal rather than a silent yes.

use std::io::IsTerminal;
use std::io::Write;

use masterclaw_protocol::McError;

pub fn confirm_dangerous(force: bool, prompt: &str) -> Result<(), McError> {
    if force {
        return Ok(());
    }
    if !std::io::stdin().is_terminal() {
        return Err(McError::usage(format!(
            "{prompt} refusing to proceed without --force on a non-interactive terminal"
        )));
    }

    eprint!("{prompt} [y/N] ");
    let _ = std::io::stderr().flush();
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .map_err(|e| McError::generic(format!("failed to read confirmation: {e}")))?;

    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Ok(()),
        _ => Err(McError::cancelled()),
    }
}

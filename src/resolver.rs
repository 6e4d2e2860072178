// resolver.rs - Maps prefixed chat input onto a command table entry
// Tokens are joined with '-' and extended greedily while the joined path is
// still a prefix of some table key. The longest candidate that is an actual
// entry wins; whatever follows it becomes the argument list.

use log::debug;
use serenity::model::id::UserId;

use crate::config::{DispatchConfig, PermissionPolicy};
use crate::error::{CommandError, CommandResult};
use crate::permissions::{Permission, PermissionSet};
use crate::table::{CommandEntry, CommandTable};

const OVERRIDE_TOKENS: [&str; 2] = ["override", "o"];

#[derive(Debug, Clone)]
pub struct Resolution {
    pub key: String,
    pub entry: CommandEntry,
    /// Unconsumed tokens in their original case
    pub args: Vec<String>,
    /// Permission checks are skipped for this invocation
    pub overridden: bool,
}

/// Resolves `body` (input with the prefix already stripped)
///
/// A leading override token is only consumed when the developer sends it; for
/// anyone else it is an ordinary first token.
pub fn resolve(
    table: &CommandTable,
    body: &str,
    author: UserId,
    developer: UserId,
) -> CommandResult<Resolution> {
    let tokens: Vec<&str> = body.split_whitespace().collect();
    let lowered: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();

    let overridden = author == developer
        && lowered
            .first()
            .map_or(false, |t| OVERRIDE_TOKENS.contains(&t.as_str()));
    let start = usize::from(overridden);

    let mut candidate = String::new();
    let mut best: Option<(String, usize)> = None;
    for (idx, token) in lowered.iter().enumerate().skip(start) {
        if !candidate.is_empty() {
            candidate.push('-');
        }
        candidate.push_str(token);
        if !table.is_path(&candidate) {
            break;
        }
        if table.contains(&candidate) {
            best = Some((candidate.clone(), idx + 1));
        }
    }

    let (key, consumed) = best.ok_or(CommandError::CommandNotFound)?;
    let entry = table.get(&key).cloned().ok_or(CommandError::CommandNotFound)?;
    let args = tokens[consumed..].iter().map(|t| t.to_string()).collect();

    debug!("🔎 Resolved '{}' to {} (override: {})", body, key, overridden);
    Ok(Resolution {
        key,
        entry,
        args,
        overridden,
    })
}

/// Checks the invoker against the entry's required permissions
pub fn check_permissions(
    entry: &CommandEntry,
    member_permissions: &PermissionSet,
    author: UserId,
    config: &DispatchConfig,
) -> CommandResult<()> {
    let mut held = member_permissions.clone();
    if author == config.developer_id {
        held.insert(Permission::Developer);
    }
    let missing = entry.permissions.missing_from(&held);

    let denied = match config.permission_policy {
        PermissionPolicy::Legacy => missing.contains(Permission::Developer),
        PermissionPolicy::Strict => !missing.is_empty(),
    };
    if denied {
        debug!("🚫 {} lacks {} for {}", author, missing, entry.name);
        return Err(CommandError::PermissionNotMet);
    }
    Ok(())
}

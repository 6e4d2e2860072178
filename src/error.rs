// error.rs - Error taxonomy for command dispatch, state persistence and the gateway
// Two kinds (CommandNotFound, PermissionNotMet) are intentionally silent: the
// session drops them instead of rendering anything back to the channel.

use thiserror::Error;

use crate::permissions::PermissionSet;

/// Result type returned by command handlers, listeners and lifecycle operations
pub type CommandResult<T = String> = std::result::Result<T, CommandError>;

/// Persistence failures while writing a tenant document
#[derive(Error, Debug)]
pub enum StateError {
    #[error("State I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure reported by the gateway collaborator (send/edit/delete/roles)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Gateway request failed: {0}")]
pub struct GatewayError(pub String);

/// Errors surfaced at the dispatch boundary
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("COMMAND_NOT_FOUND")]
    CommandNotFound,

    #[error("PERMISSION_NOT_MET")]
    PermissionNotMet,

    #[error("Module **{0}** does not exist!")]
    ModuleNotFound(String),

    #[error("Can't enable module, missing permissions: {0}")]
    InsufficientPermissions(PermissionSet),

    #[error("Module **{0}** is already enabled!")]
    AlreadyEnabled(String),

    #[error("Module **{0}** is not enabled!")]
    NotEnabled(String),

    #[error("Can't disable the base module, otherwise you can't re-enable it!")]
    BaseModule,

    /// Domain validation failure raised by a command body, shown verbatim
    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Failed to save settings: {0}")]
    State(#[from] StateError),
}

impl CommandError {
    pub fn validation(message: impl Into<String>) -> Self {
        CommandError::Validation(message.into())
    }

    /// Silent errors are never rendered; arbitrary chat text often looks like a command
    pub fn is_silent(&self) -> bool {
        matches!(self, CommandError::CommandNotFound | CommandError::PermissionNotMet)
    }
}

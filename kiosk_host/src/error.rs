//! Command-wrapper level errors: a link failure, or a response frame that
//! doesn't parse into the type the caller expected.

use crate::capability::LinkError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("malformed response: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type CommandResult<T> = Result<T, CommandError>;

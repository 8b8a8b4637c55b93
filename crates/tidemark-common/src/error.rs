use thiserror::Error;

use crate::Direction;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("migration already registered: {0}")]
    RegistrationConflict(String),

    #[error("migration ledger unavailable: {0}")]
    LedgerUnavailable(String),

    #[error("migration {name} failed while running {direction}")]
    SchemaActionFailed {
        name: String,
        direction: Direction,
        #[source]
        source: Box<Error>,
    },

    #[error("migration lock error: {0}")]
    Lock(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap a failure raised by a migration's up or down action.
    pub fn schema_action(name: impl Into<String>, direction: Direction, source: Error) -> Self {
        Error::SchemaActionFailed {
            name: name.into(),
            direction,
            source: Box::new(source),
        }
    }
}

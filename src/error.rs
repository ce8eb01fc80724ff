#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum LedgerError {
    #[error("{kind} '{id}' does not exist")]
    NotFound { kind: &'static str, id: String },
    #[error("Product '{0}' is not registered")]
    UnknownProduct(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Cannot {action} {kind} '{id}' while it is {state}")]
    InvalidTransition {
        kind: &'static str,
        id: String,
        action: &'static str,
        state: String,
    },
    #[error("{kind} '{id}' was kept: {detail}")]
    Incomplete {
        kind: &'static str,
        id: String,
        detail: String,
    },
    #[error("Customer identifier is empty after normalisation")]
    EmptyIdentity,
    #[error("Deposit amount must be greater than zero")]
    InvalidAmount,
}

impl LedgerError {
    pub fn not_found(kind: &'static str, id: &str) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

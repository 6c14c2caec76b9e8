// ❌ Registry errors - CRUD layer (customers, vehicles, history)

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid plate '{0}'")]
    InvalidPlate(String),

    #[error("plate '{0}' already exists")]
    DuplicatePlate(String),

    #[error("customer '{0}' not found")]
    CustomerNotFound(String),

    #[error("vehicle '{0}' not found")]
    VehicleNotFound(String),

    #[error("customer '{0}' still owns vehicles")]
    CustomerHasVehicles(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl RegistryError {
    /// Errors caused by the caller's payload rather than by the store.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, RegistryError::Database(_))
    }
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

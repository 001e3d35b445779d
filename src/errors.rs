//! Errores del binario: uso incorrecto, fallos de la capa de acceso y de la
//! conexión. Cada familia tiene su código de salida.
use lens_core::LensError;
use lens_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("usage: {0}")]
    Usage(String),
    #[error(transparent)]
    Lens(#[from] LensError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Usage(_) => 2,
            CliError::Lens(e) if e.is_validation() => 2,
            CliError::Lens(LensError::DatapointNotFound { .. }) => 4,
            _ => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_by_family() {
        assert_eq!(CliError::Usage("x".into()).exit_code(), 2);
        assert_eq!(CliError::Lens(LensError::AmbiguousCursor).exit_code(), 2);
        assert_eq!(CliError::Persistence(PersistenceError::Config("missing".into())).exit_code(), 5);
    }
}

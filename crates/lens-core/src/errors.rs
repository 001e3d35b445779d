//! Errores de la capa de acceso.
//!
//! Tres familias (ver `LensError::is_validation` y
//! `LensError::is_consistency_violation`):
//! - Validación: mal uso de parámetros, nunca se reintenta.
//! - Consistencia: más de una fila viva para una clave única; indica datos
//!   corruptos aguas arriba y no se traga.
//! - Almacén: fallos del backend, propagados tal cual como `StoreError`.

use thiserror::Error;
use uuid::Uuid;

use crate::model::FunctionKind;

/// Fallo genérico del backend (transporte, SQL, pool).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("store failure in {operation}: {message}")]
pub struct StoreError {
    pub operation: String,
    pub message: String,
}

impl StoreError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self { operation: operation.into(),
               message: message.into() }
    }
}

#[derive(Debug, Error)]
pub enum LensError {
    #[error("`before` and `after` are mutually exclusive")]
    AmbiguousCursor,
    #[error("page size must be between 1 and {max}, got {got}")]
    InvalidPageSize { got: u32, max: u32 },
    #[error("variant_name filter requires function_name")]
    MissingFunctionName,
    #[error("unsupported parameter: {0}")]
    UnsupportedParameter(&'static str),
    #[error("invalid dataset name: {0:?}")]
    InvalidDatasetName(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("unknown metric: {0}")]
    UnknownMetric(String),
    #[error("function {function} is {actual}, not {requested}")]
    FunctionKindMismatch {
        function: String,
        requested: FunctionKind,
        actual: FunctionKind,
    },
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("invalid metric filter: {0}")]
    InvalidMetricFilter(String),
    #[error("consistency violation: {live_rows} rows for dataset={dataset} id={id} in {table}")]
    ConsistencyViolation {
        table: String,
        dataset: String,
        id: Uuid,
        live_rows: usize,
    },
    #[error("datapoint not found: dataset={dataset} id={id}")]
    DatapointNotFound { dataset: String, id: Uuid },
    #[error("row decode error: {0}")]
    Decode(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LensError {
    /// Errores de parámetros: se devuelven de inmediato y no se reintentan.
    pub fn is_validation(&self) -> bool {
        matches!(self,
                 Self::AmbiguousCursor
                 | Self::InvalidPageSize { .. }
                 | Self::MissingFunctionName
                 | Self::UnsupportedParameter(_)
                 | Self::InvalidDatasetName(_)
                 | Self::UnknownFunction(_)
                 | Self::UnknownMetric(_)
                 | Self::FunctionKindMismatch { .. }
                 | Self::InvalidIdentifier(_)
                 | Self::InvalidMetricFilter(_))
    }

    pub fn is_consistency_violation(&self) -> bool {
        matches!(self, Self::ConsistencyViolation { .. })
    }
}

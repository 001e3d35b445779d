//! Capacidad de acceso al almacén analítico.
//!
//! Contrato:
//! - Las lecturas son puras y pueden correr en paralelo sin límite.
//! - Las escrituras sólo agregan filas; no hay locks ni transacciones
//!   multi-sentencia, y una fila recién escrita puede no ser visible de
//!   inmediato para la siguiente lectura.
//! - Ningún backend reintenta: los errores suben tal cual como `StoreError`.
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::errors::{LensError, StoreError};
use crate::query::{InsertSelect, Select, Table};

mod memory;

pub use memory::InMemoryStore;

/// Fila de resultado: objeto JSON con los nombres de salida como claves.
pub type Row = Map<String, Value>;

#[async_trait]
pub trait QueryStore: Send + Sync {
    /// Ejecuta un select y devuelve sus filas.
    async fn fetch(&self, query: &Select) -> Result<Vec<Row>, StoreError>;
    /// `INSERT ... SELECT`; devuelve la cantidad de filas escritas.
    async fn insert_select(&self, statement: &InsertSelect) -> Result<u64, StoreError>;
    /// Agrega filas literales; devuelve la cantidad de filas escritas.
    async fn insert_rows(&self, table: &Table, rows: &[Row]) -> Result<u64, StoreError>;
}

/// Decodifica filas a un tipo concreto.
pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, LensError> {
    rows.into_iter().map(decode_row).collect()
}

pub fn decode_row<T: DeserializeOwned>(row: Row) -> Result<T, LensError> {
    serde_json::from_value(Value::Object(row)).map_err(|e| LensError::Decode(e.to_string()))
}

/// Serializa un registro a fila; sólo acepta tipos que serializan a objeto.
pub fn encode_row<T: serde::Serialize>(record: &T) -> Result<Row, LensError> {
    match serde_json::to_value(record).map_err(|e| LensError::Decode(e.to_string()))? {
        Value::Object(map) => Ok(map),
        other => Err(LensError::Decode(format!("expected an object row, got {other}"))),
    }
}

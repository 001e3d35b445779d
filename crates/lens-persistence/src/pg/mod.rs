//! Implementación Postgres (Diesel) del `QueryStore` de lens-core.
//!
//! - Cada operación compila la IR con `lens_core::query::compile_*` y la
//!   ejecuta vía `sql_query`, ligando cada literal con su tipo SQL.
//! - Las filas vuelven como un único JSONB por fila (`to_jsonb`), así el mismo
//!   decodificador sirve para el backend en memoria y para Postgres.
//! - Diesel es bloqueante: el trabajo corre en `spawn_blocking` sobre un
//!   `ConnectionProvider` compartido.
//! - Sin reintentos ni transacciones multi-sentencia; los fallos suben como
//!   `StoreError` con el nombre de la operación.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_builder::{BoxedSqlQuery, SqlQuery};
use diesel::r2d2::{self, ConnectionManager};
use diesel::sql_types::{BigInt, Bool, Double, Jsonb, Text, Timestamptz};
use lens_core::query::{compile_fetch, compile_insert_rows, compile_insert_select, CompiledQuery, InsertSelect, Literal, Select, Table};
use lens_core::{QueryStore, Row, StoreError};
use log::{debug, error, warn};
use serde_json::Value;

use crate::error::PersistenceError;
use crate::migrations::run_pending_migrations;

/// Alias de tipo para el pool r2d2 de conexiones Postgres.
///
/// Notas operativas:
/// - El pool se construye con `min_idle` (mínimo de conexiones inactivas) y
///   `max_size` (límite superior total).
/// - Al construirlo, se corre automáticamente el set de migraciones pendientes
///   (una sola vez).
pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub type PgPooledConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

/// Proveedor abstracto de conexiones.
///
/// Permite inyectar un pool real (producción/tests de integración) o un
/// proveedor alternativo sin acoplar `PgStore` a r2d2.
pub trait ConnectionProvider: Send + Sync + 'static {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError>;
}

/// Implementación concreta de `ConnectionProvider` respaldada por un `PgPool`.
pub struct PoolProvider {
    pub pool: PgPool,
}

impl ConnectionProvider for PoolProvider {
    fn connection(&self) -> Result<PgPooledConnection, PersistenceError> {
        self.pool
            .get()
            .map_err(|e| PersistenceError::TransientIo(format!("pool error: {e}")))
    }
}

/// Fila de `compile_fetch`: la fila completa como objeto JSONB.
#[derive(QueryableByName, Debug)]
struct JsonRow {
    #[diesel(sql_type = Jsonb)]
    row: Value,
}

/// Liga los parámetros en orden (`$1`, `$2`, ...) con su tipo SQL.
fn bind_params(compiled: CompiledQuery) -> BoxedSqlQuery<'static, Pg, SqlQuery> {
    let mut query = diesel::sql_query(compiled.sql).into_boxed::<Pg>();
    for param in compiled.params {
        query = match param {
            Literal::Text(v) => query.bind::<Text, _>(v),
            Literal::Uuid(v) => query.bind::<diesel::sql_types::Uuid, _>(v),
            Literal::Bool(v) => query.bind::<Bool, _>(v),
            Literal::Float(v) => query.bind::<Double, _>(v),
            Literal::Int(v) => query.bind::<BigInt, _>(v),
            Literal::Json(v) => query.bind::<Jsonb, _>(v),
            Literal::Timestamp(v) => query.bind::<Timestamptz, _>(v),
        };
    }
    query
}

fn compile_error(e: lens_core::LensError) -> PersistenceError {
    PersistenceError::Compile(e.to_string())
}

/// `QueryStore` sobre Postgres.
pub struct PgStore<P: ConnectionProvider> {
    provider: Arc<P>,
}

impl<P: ConnectionProvider> Clone for PgStore<P> {
    fn clone(&self) -> Self {
        Self { provider: Arc::clone(&self.provider) }
    }
}

impl<P: ConnectionProvider> PgStore<P> {
    pub fn new(provider: P) -> Self {
        Self { provider: Arc::new(provider) }
    }

    /// Ejecuta `work` con una conexión del proveedor en el pool bloqueante de
    /// tokio.
    async fn run_blocking<T, F>(&self, operation: &'static str, work: F) -> Result<T, StoreError>
        where T: Send + 'static,
              F: FnOnce(&mut PgConnection) -> Result<T, PersistenceError> + Send + 'static
    {
        let provider = Arc::clone(&self.provider);
        let joined = tokio::task::spawn_blocking(move || {
                         let mut conn = provider.connection()?;
                         work(&mut *conn)
                     }).await;
        match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                if e.is_retryable() {
                    warn!("{operation}:retryable error err={e}");
                } else {
                    error!("{operation}:error err={e}");
                }
                Err(e.into_store_error(operation))
            }
            Err(join) => {
                error!("{operation}:blocking task failed err={join}");
                Err(StoreError::new(operation, format!("blocking task failed: {join}")))
            }
        }
    }
}

#[async_trait]
impl<P: ConnectionProvider> QueryStore for PgStore<P> {
    async fn fetch(&self, query: &Select) -> Result<Vec<Row>, StoreError> {
        let compiled = compile_fetch(query).map_err(|e| compile_error(e).into_store_error("fetch"))?;
        debug!("fetch:start params={}", compiled.params.len());
        let rows = self.run_blocking("fetch", move |conn| {
                           let rows: Vec<JsonRow> = bind_params(compiled).load(conn)?;
                           rows.into_iter()
                               .map(|r| match r.row {
                                   Value::Object(map) => Ok(map),
                                   other => Err(PersistenceError::Decode(format!("expected a JSON object row, got {other}"))),
                               })
                               .collect::<Result<Vec<Row>, PersistenceError>>()
                       })
                       .await?;
        debug!("fetch:done rows={}", rows.len());
        Ok(rows)
    }

    async fn insert_select(&self, statement: &InsertSelect) -> Result<u64, StoreError> {
        let compiled = compile_insert_select(statement).map_err(|e| compile_error(e).into_store_error("insert_select"))?;
        debug!("insert_select:start table={}", statement.table.name());
        let written = self.run_blocking("insert_select", move |conn| Ok(bind_params(compiled).execute(conn)? as u64))
                          .await?;
        debug!("insert_select:done table={} written={written}", statement.table.name());
        Ok(written)
    }

    async fn insert_rows(&self, table: &Table, rows: &[Row]) -> Result<u64, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }
        let compiled = compile_insert_rows(table, rows).map_err(|e| compile_error(e).into_store_error("insert_rows"))?;
        debug!("insert_rows:start table={} rows={}", table.name(), rows.len());
        let written = self.run_blocking("insert_rows", move |conn| Ok(bind_params(compiled).execute(conn)? as u64))
                          .await?;
        debug!("insert_rows:done table={} written={written}", table.name());
        Ok(written)
    }
}

/// Construye un pool r2d2 y corre migraciones pendientes.
///
/// Comportamiento:
/// - Valida y ajusta tamaños (si `min_size > max_size`, usa `min_size =
///   max_size`).
/// - Ejecuta migraciones inmediatamente tras el primer `get()`.
/// - Devuelve `PersistenceError::TransientIo` ante errores del pool/manager.
pub fn build_pool(database_url: &str, min_size: u32, max_size: u32) -> Result<PgPool, PersistenceError> {
    let validated_min = if min_size == 0 { 1 } else { min_size };
    let validated_max = if max_size == 0 { 1 } else { max_size };
    if validated_min > validated_max {
        warn!("build_pool: min_size > max_size ({validated_min} > {validated_max}), ajustando min=max");
    }
    let final_min = validated_min.min(validated_max);
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder().min_idle(Some(final_min))
                                    .max_size(validated_max)
                                    .build(manager)
                                    .map_err(|e| PersistenceError::TransientIo(format!("pool build: {e}")))?;
    {
        let mut conn = pool.get()
                           .map_err(|e| PersistenceError::TransientIo(format!("pool get for migrations: {e}")))?;
        run_pending_migrations(&mut conn)?;
    }
    Ok(pool)
}

/// Helper de desarrollo: carga `.env`, lee configuración (DATABASE_URL,
/// tamaños) y construye un pool ya migrado.
pub fn build_dev_pool_from_env() -> Result<PgPool, PersistenceError> {
    crate::config::init_dotenv();
    let cfg = crate::config::DbConfig::from_env()?;
    build_pool(&cfg.url, cfg.min_connections, cfg.max_connections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use diesel::debug_query;
    use lens_core::query::{col, Predicate, Projection, Source};

    #[test]
    fn bound_query_keeps_placeholders_out_of_the_text() {
        let table = Table::new("inference_by_id").unwrap();
        let select = Select::from(Source::Table(table), "i", Projection::columns("i", &["id"]))
            .filter(Predicate::eq(col("i", "function_name"), "x'; DROP TABLE inference_by_id; --"));
        let compiled = compile_fetch(&select).unwrap();
        let query = bind_params(compiled);
        let rendered = debug_query::<Pg, _>(&query).to_string();
        let sql = rendered.split(" -- binds").next().unwrap();
        assert!(sql.contains("\"i\".\"function_name\" = $1"));
        assert!(!sql.contains("DROP TABLE"));
    }
}

//! lens-persistence
//!
//! Backend Postgres (Diesel) del `QueryStore` de lens-core.
//!
//! Módulos:
//! - `pg`: pool r2d2, proveedor de conexiones y `PgStore`, que compila la IR
//!   a SQL con parámetros ligados y la ejecuta fuera del runtime async.
//! - `migrations`: runner embebido de migraciones Diesel (tablas del gateway,
//!   índice `inference_by_id` y tablas de datapoints versionadas).
//! - `config`: carga de configuración de conexión desde .env.

pub mod config;
pub mod error;
pub mod migrations;
pub mod pg;

pub use config::{init_dotenv, DbConfig};
pub use error::PersistenceError;
pub use pg::{build_dev_pool_from_env, build_pool, ConnectionProvider, PgPool, PgStore, PoolProvider};

//! lens-core: capa de acceso a datos del dashboard de observabilidad.
//!
//! Módulos:
//! - `model`: registros de inferencia, feedback, datapoints y páginas.
//! - `query`: representación intermedia (IR) de consultas y su compilación a
//!   SQL Postgres.
//! - `store`: trait `QueryStore` (capacidad del almacén) y backend en memoria.
//! - `config`: configuración del gateway y su caché con recarga single-flight.
//! - `browse`: paginación por cursor, límites y vecinos.
//! - `dataset`: construcción de selecciones, materialización y ciclo de vida
//!   de datapoints.

pub mod browse;
pub mod config;
pub mod constants;
pub mod dataset;
pub mod errors;
pub mod model;
pub mod query;
pub mod store;

pub use browse::{PageSpec, RecordFilter};
pub use config::{ConfigCache, ConfigLoader, FileConfigLoader, GatewayConfig, StaticConfigLoader};
pub use dataset::{DatasetQueryParams, MaterializeParams, MetricFilter, OutputSource};
pub use errors::{LensError, StoreError};
pub use model::{AdjacentIds, Bounds, Cursor, Datapoint, EpisodeRecord, FeedbackKind, FeedbackRecord, FunctionKind, InferenceRecord,
                InferenceSummary, Page, PageRequest, Pageable};
pub use store::{InMemoryStore, QueryStore, Row};

//! Configuración del gateway: funciones, métricas y mapeo a tablas físicas.

mod cache;
mod gateway;
mod loader;

pub use cache::ConfigCache;
pub use gateway::{FunctionConfig, GatewayConfig, MetricConfig, MetricKind, MetricLevel, Optimize, TableMap};
pub use loader::{ConfigLoader, FileConfigLoader, StaticConfigLoader};

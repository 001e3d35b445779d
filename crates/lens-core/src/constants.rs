//! Constantes compartidas de la capa de acceso.

/// Tamaño máximo de página aceptado por el motor de paginación.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Nombres de dataset reservados por la UI (el constructor de datasets usa
/// `builder` como ruta propia).
pub const RESERVED_DATASET_NAMES: &[&str] = &["builder"];

/// Prefijo del espacio de nombres interno; ningún dataset de usuario puede
/// empezar con él.
pub const RESERVED_NAMESPACE_PREFIX: &str = "lens::";

/// Columna auxiliar con el número de fila de las fuentes `Latest`.
pub const ROW_NUMBER_COLUMN: &str = "lens_rn";

/// Variable de entorno con la ruta del archivo de configuración del gateway.
pub const CONFIG_PATH_ENV: &str = "INFERLENS_CONFIG_PATH";

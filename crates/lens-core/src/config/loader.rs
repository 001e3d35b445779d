//! Fuentes de configuración.
use std::path::PathBuf;

use async_trait::async_trait;
use log::debug;

use super::GatewayConfig;
use crate::constants::CONFIG_PATH_ENV;
use crate::errors::LensError;

/// Origen de la configuración; la caché decide cuándo se vuelve a leer.
#[async_trait]
pub trait ConfigLoader: Send + Sync {
    async fn load(&self) -> Result<GatewayConfig, LensError>;
}

/// Lee la configuración de un archivo JSON.
pub struct FileConfigLoader {
    pub path: PathBuf,
}

impl FileConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Toma la ruta de `INFERLENS_CONFIG_PATH` (cargando `.env` si existe).
    pub fn from_env() -> Result<Self, LensError> {
        let _ = dotenvy::dotenv();
        let path = std::env::var(CONFIG_PATH_ENV).map_err(|_| LensError::Config(format!("{CONFIG_PATH_ENV} is not set")))?;
        Ok(Self::new(path))
    }
}

#[async_trait]
impl ConfigLoader for FileConfigLoader {
    async fn load(&self) -> Result<GatewayConfig, LensError> {
        debug!("config:load path={}", self.path.display());
        let text = tokio::fs::read_to_string(&self.path).await
                                                         .map_err(|e| LensError::Config(format!("read {}: {e}", self.path.display())))?;
        serde_json::from_str(&text).map_err(|e| LensError::Config(format!("parse {}: {e}", self.path.display())))
    }
}

/// Configuración fija en memoria (tests, embebido).
pub struct StaticConfigLoader(pub GatewayConfig);

#[async_trait]
impl ConfigLoader for StaticConfigLoader {
    async fn load(&self) -> Result<GatewayConfig, LensError> {
        Ok(self.0.clone())
    }
}

//! Caché explícita de configuración.
//!
//! - `init`: fuerza una carga.
//! - `get`: devuelve la vigente o recarga si no hay ninguna.
//! - `invalidate`: descarta la vigente; la próxima `get` recarga.
//!
//! Las recargas son single-flight: un único `Mutex` serializa a los
//! recargadores y quien llega tarde reutiliza el resultado del primero. Cada
//! carga se compara por huella SHA-256 con la anterior; si no cambió se
//! conserva el mismo `Arc`.
use std::sync::Arc;

use log::{debug, error};
use tokio::sync::{Mutex, RwLock};

use super::{ConfigLoader, GatewayConfig};
use crate::errors::LensError;

#[derive(Clone)]
struct Cached {
    config: Arc<GatewayConfig>,
    fingerprint: String,
}

#[derive(Default)]
struct CacheState {
    current: Option<Cached>,
    /// Última configuración invalidada, para comparar huellas al recargar.
    retired: Option<Cached>,
}

pub struct ConfigCache<L: ConfigLoader> {
    loader: L,
    state: RwLock<CacheState>,
    reload: Mutex<()>,
}

impl<L: ConfigLoader> ConfigCache<L> {
    pub fn new(loader: L) -> Self {
        Self { loader,
               state: RwLock::new(CacheState::default()),
               reload: Mutex::new(()) }
    }

    /// Carga la configuración aunque ya haya una vigente.
    pub async fn init(&self) -> Result<Arc<GatewayConfig>, LensError> {
        let _guard = self.reload.lock().await;
        self.reload_locked().await
    }

    pub async fn get(&self) -> Result<Arc<GatewayConfig>, LensError> {
        if let Some(cached) = &self.state.read().await.current {
            return Ok(Arc::clone(&cached.config));
        }
        let _guard = self.reload.lock().await;
        // Otro llamador pudo haber recargado mientras esperábamos el lock.
        if let Some(cached) = &self.state.read().await.current {
            return Ok(Arc::clone(&cached.config));
        }
        self.reload_locked().await
    }

    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        if let Some(current) = state.current.take() {
            debug!("config:invalidate fingerprint={}", current.fingerprint);
            state.retired = Some(current);
        }
    }

    /// Huella de la configuración vigente, si hay una.
    pub async fn fingerprint(&self) -> Option<String> {
        self.state.read().await.current.as_ref().map(|c| c.fingerprint.clone())
    }

    async fn reload_locked(&self) -> Result<Arc<GatewayConfig>, LensError> {
        let loaded = self.loader.load().await.map_err(|e| {
                                                 error!("config:reload error err={e}");
                                                 e
                                             })?;
        let fingerprint = loaded.fingerprint()?;
        let mut state = self.state.write().await;
        let previous = state.current.as_ref().or(state.retired.as_ref());
        let cached = match previous {
            Some(prev) if prev.fingerprint == fingerprint => {
                debug!("config:reload unchanged fingerprint={fingerprint}");
                prev.clone()
            }
            _ => {
                debug!("config:reload updated fingerprint={fingerprint}");
                Cached { config: Arc::new(loaded),
                         fingerprint }
            }
        };
        state.current = Some(cached.clone());
        state.retired = None;
        Ok(cached.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FunctionConfig;
    use crate::model::FunctionKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingLoader {
        loads: AtomicUsize,
        config: std::sync::Mutex<GatewayConfig>,
    }

    impl CountingLoader {
        fn new() -> Self {
            Self { loads: AtomicUsize::new(0),
                   config: std::sync::Mutex::new(GatewayConfig::default()) }
        }
    }

    #[async_trait]
    impl ConfigLoader for CountingLoader {
        async fn load(&self) -> Result<GatewayConfig, LensError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(self.config.lock().unwrap().clone())
        }
    }

    #[tokio::test]
    async fn concurrent_misses_trigger_a_single_load() {
        let cache = Arc::new(ConfigCache::new(CountingLoader::new()));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let c = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { c.get().await.map(|_| ()) }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(cache.loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_reload_and_keeps_arc_when_unchanged() {
        let cache = ConfigCache::new(CountingLoader::new());
        let first = cache.get().await.unwrap();
        cache.invalidate().await;
        assert!(cache.fingerprint().await.is_none());
        let second = cache.get().await.unwrap();
        assert_eq!(cache.loader.loads.load(Ordering::SeqCst), 2);
        assert!(Arc::ptr_eq(&first, &second), "huella igual debe conservar el mismo Arc");
    }

    #[tokio::test]
    async fn changed_config_replaces_cached_value() {
        let cache = ConfigCache::new(CountingLoader::new());
        let before = cache.get().await.unwrap();
        cache.loader
             .config
             .lock()
             .unwrap()
             .functions
             .insert("f".into(), FunctionConfig { kind: FunctionKind::Chat });
        let after = cache.init().await.unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after.functions.contains_key("f"));
    }
}

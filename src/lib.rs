//! inferlens
//!
//! Fachada de la capa de acceso a datos del dashboard: `LensService` une un
//! `QueryStore` (Postgres o memoria) con la caché de configuración del
//! gateway y expone cada operación como un método async.
//!
//! Cada llamada toma la configuración vigente de la caché; `invalidate_config`
//! fuerza una recarga en la siguiente llamada.

pub mod errors;

use std::collections::BTreeMap;
use std::sync::Arc;

use lens_core::browse;
use lens_core::dataset;
use lens_core::model::{DatapointDraft, DatasetSummary};
use lens_core::query::Select;
use uuid::Uuid;

pub use lens_core::{AdjacentIds, Bounds, ConfigCache, ConfigLoader, Datapoint, DatasetQueryParams, EpisodeRecord, FeedbackKind,
                    FeedbackRecord, FunctionKind, GatewayConfig, InferenceRecord, InferenceSummary, LensError, MaterializeParams,
                    Page, PageRequest, QueryStore, RecordFilter};

pub struct LensService<S: QueryStore, L: ConfigLoader> {
    store: S,
    config: ConfigCache<L>,
}

impl<S: QueryStore, L: ConfigLoader> LensService<S, L> {
    pub fn new(store: S, loader: L) -> Self {
        Self { store,
               config: ConfigCache::new(loader) }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Carga la configuración por adelantado para fallar al arrancar y no en
    /// la primera consulta.
    pub async fn init(&self) -> Result<Arc<GatewayConfig>, LensError> {
        self.config.init().await
    }

    pub async fn invalidate_config(&self) {
        self.config.invalidate().await
    }

    pub async fn config_fingerprint(&self) -> Option<String> {
        self.config.fingerprint().await
    }

    // --- navegación ---

    pub async fn query_inference_page(&self, filter: &RecordFilter, request: &PageRequest) -> Result<Page<InferenceSummary>, LensError> {
        let config = self.config.get().await?;
        browse::query_inference_page(&self.store, &config, filter, request).await
    }

    pub async fn query_episode_page(&self, filter: &RecordFilter, request: &PageRequest) -> Result<Page<EpisodeRecord>, LensError> {
        let config = self.config.get().await?;
        browse::query_episode_page(&self.store, &config, filter, request).await
    }

    pub async fn query_feedback_page(&self,
                                     kind: FeedbackKind,
                                     target_id: Uuid,
                                     request: &PageRequest)
                                     -> Result<Page<FeedbackRecord>, LensError> {
        let config = self.config.get().await?;
        browse::query_feedback_page(&self.store, &config, kind, target_id, request).await
    }

    pub async fn query_inference_bounds(&self, filter: &RecordFilter) -> Result<Bounds, LensError> {
        let config = self.config.get().await?;
        browse::query_inference_bounds(&self.store, &config, filter).await
    }

    pub async fn query_episode_bounds(&self, filter: &RecordFilter) -> Result<Bounds, LensError> {
        let config = self.config.get().await?;
        browse::query_episode_bounds(&self.store, &config, filter).await
    }

    pub async fn query_feedback_bounds(&self, kind: FeedbackKind, target_id: Uuid) -> Result<Bounds, LensError> {
        let config = self.config.get().await?;
        browse::query_feedback_bounds(&self.store, &config, kind, target_id).await
    }

    pub async fn get_adjacent_inference_ids(&self, current: Uuid, filter: &RecordFilter) -> Result<AdjacentIds, LensError> {
        let config = self.config.get().await?;
        browse::get_adjacent_inference_ids(&self.store, &config, current, filter).await
    }

    pub async fn get_adjacent_episode_ids(&self, current: Uuid, filter: &RecordFilter) -> Result<AdjacentIds, LensError> {
        let config = self.config.get().await?;
        browse::get_adjacent_episode_ids(&self.store, &config, current, filter).await
    }

    pub async fn get_inference(&self, id: Uuid) -> Result<Option<InferenceRecord>, LensError> {
        let config = self.config.get().await?;
        browse::get_inference(&self.store, &config, id).await
    }

    pub async fn latest_feedback_by_metric(&self, target_id: Uuid) -> Result<BTreeMap<String, Uuid>, LensError> {
        let config = self.config.get().await?;
        browse::latest_feedback_by_metric(&self.store, &config, target_id).await
    }

    // --- datasets ---

    /// Selección compilable sin ejecutarla (para previsualizar o depurar).
    pub async fn build_selection(&self, params: &DatasetQueryParams) -> Result<Select, LensError> {
        let config = self.config.get().await?;
        dataset::build_selection(&config, params)
    }

    pub async fn count_rows(&self, params: &DatasetQueryParams) -> Result<u64, LensError> {
        let config = self.config.get().await?;
        dataset::count_rows(&self.store, &config, params).await
    }

    pub async fn materialize(&self, params: &MaterializeParams) -> Result<u64, LensError> {
        let config = self.config.get().await?;
        dataset::materialize(&self.store, &config, params).await
    }

    pub async fn get_datapoint(&self, dataset_name: &str, id: Uuid, allow_stale: bool) -> Result<Option<Datapoint>, LensError> {
        let config = self.config.get().await?;
        dataset::get_datapoint(&self.store, &config, dataset_name, id, allow_stale).await
    }

    pub async fn stale_datapoint(&self, dataset_name: &str, id: Uuid, kind: FunctionKind) -> Result<u64, LensError> {
        let config = self.config.get().await?;
        dataset::stale_datapoint(&self.store, &config, dataset_name, id, kind).await
    }

    pub async fn insert_datapoint(&self, dataset_name: &str, draft: DatapointDraft) -> Result<Datapoint, LensError> {
        let config = self.config.get().await?;
        dataset::insert_datapoint(&self.store, &config, dataset_name, draft).await
    }

    pub async fn replace_datapoint(&self, datapoint: Datapoint) -> Result<Datapoint, LensError> {
        let config = self.config.get().await?;
        dataset::replace_datapoint(&self.store, &config, datapoint).await
    }

    pub async fn list_datasets(&self) -> Result<Vec<DatasetSummary>, LensError> {
        let config = self.config.get().await?;
        dataset::list_datasets(&self.store, &config).await
    }
}

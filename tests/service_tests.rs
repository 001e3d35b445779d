//! Recorrido de la fachada sobre `InMemoryStore`: navegación, datasets y
//! recarga de configuración.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use inferlens::{DatasetQueryParams, FunctionKind, GatewayConfig, LensError, LensService, MaterializeParams, PageRequest, RecordFilter};
use lens_core::{ConfigLoader, InMemoryStore, StaticConfigLoader};
use serde_json::json;
use uuid::Uuid;

fn config() -> GatewayConfig {
    serde_json::from_value(json!({
        "functions": { "write_haiku": { "kind": "chat" } },
        "metrics": { "haiku_rating": { "type": "float", "level": "inference" } }
    })).expect("config de test")
}

fn ordered_id(n: u64) -> Uuid {
    let millis = 1_700_000_000_000u128 + n as u128;
    Uuid::from_u128((millis << 80) | (0x7u128 << 76) | (0x8u128 << 60) | n as u128)
}

fn seeded_service(count: u64) -> (LensService<InMemoryStore, StaticConfigLoader>, Vec<Uuid>) {
    let cfg = config();
    let store = InMemoryStore::new();
    let episode = ordered_id(9_000);
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("fecha");
    let mut ids = Vec::new();
    for n in 1..=count {
        let id = ordered_id(n);
        ids.push(id);
        let ts = base + Duration::seconds(n as i64);
        store.seed(&cfg.inference_index_table().expect("índice"),
                   [json!({
                       "id": id, "function_name": "write_haiku", "variant_name": "v1",
                       "episode_id": episode, "function_kind": "chat", "timestamp": ts,
                   }).as_object()
                     .cloned()
                     .expect("fila")]);
        store.seed(&cfg.inference_table(FunctionKind::Chat).expect("tabla chat"),
                   [json!({
                       "id": id, "function_name": "write_haiku", "variant_name": "v1",
                       "episode_id": episode, "input": { "messages": [] },
                       "output": [{ "type": "text", "text": format!("haiku {n}") }],
                       "tool_params": null, "tags": {}, "timestamp": ts,
                   }).as_object()
                     .cloned()
                     .expect("fila")]);
    }
    (LensService::new(store, StaticConfigLoader(cfg)), ids)
}

#[tokio::test]
async fn browse_then_build_a_dataset() {
    let (service, ids) = seeded_service(12);
    let filter = RecordFilter::function("write_haiku");

    let page = service.query_inference_page(&filter, &PageRequest::new(5)).await.unwrap();
    assert_eq!(page.items.iter().map(|i| i.id).collect::<Vec<_>>(), ids.iter().rev().take(5).copied().collect::<Vec<_>>());
    assert!(page.has_next_page && !page.has_previous_page);

    let bounds = service.query_inference_bounds(&filter).await.unwrap();
    assert_eq!((bounds.first_id, bounds.last_id, bounds.count), (Some(ids[0]), Some(ids[11]), 12));

    let adjacent = service.get_adjacent_inference_ids(ids[5], &filter).await.unwrap();
    assert_eq!((adjacent.previous_id, adjacent.next_id), (Some(ids[4]), Some(ids[6])));

    let mut selection = DatasetQueryParams::new(FunctionKind::Chat);
    selection.function_name = Some("write_haiku".into());
    assert_eq!(service.count_rows(&selection).await.unwrap(), 12);

    let params = MaterializeParams { dataset_name: "gold".into(),
                                     selection };
    assert_eq!(service.materialize(&params).await.unwrap(), 12);
    assert_eq!(service.materialize(&params).await.unwrap(), 0);

    let datasets = service.list_datasets().await.unwrap();
    assert_eq!(datasets.len(), 1);
    assert_eq!((datasets[0].dataset_name.as_str(), datasets[0].count), ("gold", 12));

    let inference = service.get_inference(ids[3]).await.unwrap().expect("inferencia");
    assert_eq!(inference.id(), ids[3]);
}

#[tokio::test]
async fn validation_errors_reach_the_caller() {
    let (service, _) = seeded_service(1);
    let err = service.query_inference_page(&RecordFilter::default(), &PageRequest::new(0)).await.unwrap_err();
    assert!(matches!(err, LensError::InvalidPageSize { got: 0, .. }));

    let mut selection = DatasetQueryParams::new(FunctionKind::Chat);
    selection.function_name = Some("nope".into());
    let err = service.count_rows(&selection).await.unwrap_err();
    assert!(matches!(err, LensError::UnknownFunction(_)));
    assert!(err.is_validation());
}

struct CountingLoader {
    loads: Arc<AtomicUsize>,
}

#[async_trait]
impl ConfigLoader for CountingLoader {
    async fn load(&self) -> Result<GatewayConfig, LensError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(config())
    }
}

#[tokio::test]
async fn config_is_cached_until_invalidated() {
    let loads = Arc::new(AtomicUsize::new(0));
    let service = LensService::new(InMemoryStore::new(), CountingLoader { loads: Arc::clone(&loads) });

    service.list_datasets().await.unwrap();
    service.list_datasets().await.unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 1);
    let before = service.config_fingerprint().await.expect("huella");

    service.invalidate_config().await;
    assert!(service.config_fingerprint().await.is_none());
    service.list_datasets().await.unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 2);
    assert_eq!(service.config_fingerprint().await, Some(before));
}

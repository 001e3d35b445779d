//! Paridad del backend Postgres con el de memoria sobre las operaciones
//! principales. Se omiten sin DATABASE_URL.

use chrono::{Duration, SubsecRound, Utc};
use lens_core::browse::{get_adjacent_inference_ids, query_inference_bounds, query_inference_page};
use lens_core::dataset::{count_rows, get_datapoint, materialize, stale_datapoint};
use lens_core::model::FunctionKind;
use lens_core::query::{col, Predicate, Projection, Select, Source};
use lens_core::{DatasetQueryParams, MaterializeParams, PageRequest, QueryStore, RecordFilter, Row};
use serde_json::json;
use test_support::*;
use uuid::Uuid;

/// Siembra `n` inferencias de chat en un episodio propio; el trigger llena
/// `inference_by_id`. Devuelve el episodio y los ids ascendentes.
async fn seed_episode<S: QueryStore>(store: &S, n: usize, variant: &str) -> (Uuid, Vec<Uuid>) {
    let cfg = config();
    let episode = Uuid::now_v7();
    let base = Utc::now().trunc_subsecs(6);
    let mut ids = Vec::with_capacity(n);
    let mut rows: Vec<Row> = Vec::with_capacity(n);
    for i in 0..n {
        let id = Uuid::now_v7();
        ids.push(id);
        rows.push(json!({
                      "id": id,
                      "function_name": "write_haiku",
                      "variant_name": variant,
                      "episode_id": episode,
                      "input": { "messages": [] },
                      "output": [{ "type": "text", "text": format!("haiku {i}") }],
                      "tool_params": null,
                      "tags": {},
                      "timestamp": base + Duration::milliseconds(i as i64),
                  }).as_object()
                    .cloned()
                    .expect("fila objeto"));
    }
    let written = store.insert_rows(&cfg.inference_table(FunctionKind::Chat).unwrap(), &rows).await.unwrap();
    assert_eq!(written, n as u64);
    ids.sort();
    (episode, ids)
}

#[tokio::test]
async fn paging_bounds_and_adjacency_over_postgres() {
    let Some(store) = pg_store() else {
        eprintln!("skip paging_bounds_and_adjacency_over_postgres (no DATABASE_URL)");
        return;
    };
    let cfg = config();
    let (episode, ids) = seed_episode(&store, 25, "v1").await;
    let filter = RecordFilter::function("write_haiku").with_episode(episode);

    let p1 = query_inference_page(&store, &cfg, &filter, &PageRequest::new(10)).await.unwrap();
    assert_eq!((p1.items.len(), p1.has_next_page, p1.has_previous_page), (10, true, false));
    let p2 = query_inference_page(&store, &cfg, &filter, &PageRequest::new(10).before(p1.last_id().unwrap())).await
                                                                                                            .unwrap();
    assert_eq!((p2.items.len(), p2.has_next_page, p2.has_previous_page), (10, true, true));
    let p3 = query_inference_page(&store, &cfg, &filter, &PageRequest::new(10).before(p2.last_id().unwrap())).await
                                                                                                            .unwrap();
    assert_eq!((p3.items.len(), p3.has_next_page, p3.has_previous_page), (5, false, true));

    let back = query_inference_page(&store, &cfg, &filter, &PageRequest::new(10).after(ids[0])).await.unwrap();
    assert_eq!(back.items.first().map(|i| i.id), Some(ids[10]));
    assert!(back.has_next_page && back.has_previous_page);

    let bounds = query_inference_bounds(&store, &cfg, &filter).await.unwrap();
    assert_eq!((bounds.first_id, bounds.last_id, bounds.count), (Some(ids[0]), Some(ids[24]), 25));

    let empty = query_inference_bounds(&store, &cfg, &RecordFilter::default().with_episode(Uuid::now_v7())).await.unwrap();
    assert_eq!((empty.first_id, empty.last_id, empty.count), (None, None, 0));

    let edge = get_adjacent_inference_ids(&store, &cfg, ids[0], &filter).await.unwrap();
    assert_eq!((edge.previous_id, edge.next_id), (None, Some(ids[1])));
}

#[tokio::test]
async fn materialize_dedups_and_stale_is_terminal_over_postgres() {
    let Some(store) = pg_store() else {
        eprintln!("skip materialize_dedups_and_stale_is_terminal_over_postgres (no DATABASE_URL)");
        return;
    };
    let cfg = config();
    let variant = format!("v-{}", Uuid::now_v7().simple());
    seed_episode(&store, 4, &variant).await;

    let mut selection = DatasetQueryParams::new(FunctionKind::Chat);
    selection.function_name = Some("write_haiku".into());
    selection.variant_name = Some(variant);
    assert_eq!(count_rows(&store, &cfg, &selection).await.unwrap(), 4);

    let params = MaterializeParams { dataset_name: format!("ds-{}", Uuid::now_v7().simple()),
                                     selection };
    assert_eq!(materialize(&store, &cfg, &params).await.unwrap(), 4);
    assert_eq!(materialize(&store, &cfg, &params).await.unwrap(), 0);

    let dataset = params.dataset_name.as_str();
    let table = cfg.datapoint_table(FunctionKind::Chat).unwrap();
    let rows = store.fetch(&Select::from(Source::Table(table), "dp", Projection::columns("dp", &["id"]))
                           .filter(Predicate::eq(col("dp", "dataset_name"), dataset))
                           .limit(1))
                    .await
                    .unwrap();
    let id: Uuid = serde_json::from_value(rows[0]["id"].clone()).unwrap();

    assert!(get_datapoint(&store, &cfg, dataset, id, false).await.unwrap().is_some());
    assert_eq!(stale_datapoint(&store, &cfg, dataset, id, FunctionKind::Chat).await.unwrap(), 1);
    assert!(get_datapoint(&store, &cfg, dataset, id, false).await.unwrap().is_none());
    let stale = get_datapoint(&store, &cfg, dataset, id, true).await.unwrap().unwrap();
    assert!(stale.is_stale());
    assert_eq!(stale_datapoint(&store, &cfg, dataset, id, FunctionKind::Chat).await.unwrap(), 0);
    assert_eq!(materialize(&store, &cfg, &params).await.unwrap(), 1);
}

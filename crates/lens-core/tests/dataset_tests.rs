//! Selección, materialización y ciclo de vida de datapoints.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use lens_core::dataset::{build_selection, count_rows, get_datapoint, insert_datapoint, list_datasets, materialize, replace_datapoint,
                         stale_datapoint};
use lens_core::model::{ChatDatapoint, Datapoint, DatapointDraft, FunctionKind, OutputShape};
use lens_core::query::{col, Comparator, Literal, Predicate, Projection, Select, Source};
use lens_core::{DatasetQueryParams, InMemoryStore, LensError, MaterializeParams, MetricFilter, OutputSource, QueryStore};
use serde_json::json;
use test_support::*;
use uuid::Uuid;

fn haiku_params() -> DatasetQueryParams {
    let mut params = DatasetQueryParams::new(FunctionKind::Chat);
    params.function_name = Some("write_haiku".into());
    params
}

fn materialize_params(dataset: &str) -> MaterializeParams {
    MaterializeParams { dataset_name: dataset.into(),
                        selection: haiku_params() }
}

#[tokio::test]
async fn demonstration_output_uses_latest_demo_and_drops_undemonstrated() {
    let store = InMemoryStore::new();
    let cfg = config();
    let ids = seed_chat_run(&store, &cfg, 3);
    seed_demonstration(&store, &cfg, 1, ids[0], json!("old demo"));
    seed_demonstration(&store, &cfg, 2, ids[0], json!("new demo"));
    seed_demonstration(&store, &cfg, 3, ids[2], json!("only demo"));

    let mut params = haiku_params();
    params.output_source = OutputSource::Demonstration;
    let rows = store.fetch(&build_selection(&cfg, &params).unwrap()).await.unwrap();
    let outputs: Vec<_> = rows.iter().map(|r| (r["id"].clone(), r["output"].clone())).collect();
    assert_eq!(outputs,
               vec![(json!(ids[2]), json!("only demo")), (json!(ids[0]), json!("new demo"))]);
}

#[tokio::test]
async fn none_output_nulls_the_column() {
    let store = InMemoryStore::new();
    let cfg = config();
    seed_chat_run(&store, &cfg, 2);
    let mut params = haiku_params();
    params.output_source = OutputSource::None;
    let rows = store.fetch(&build_selection(&cfg, &params).unwrap()).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r["output"].is_null()));
}

#[tokio::test]
async fn metric_filter_uses_latest_feedback_only() {
    let store = InMemoryStore::new();
    let cfg = config();
    let ids = seed_chat_run(&store, &cfg, 3);
    // ids[0]: 0.9 y luego 0.1 -> vigente 0.1
    seed_float_feedback(&store, &cfg, 1, ids[0], "haiku_rating", 0.9);
    seed_float_feedback(&store, &cfg, 2, ids[0], "haiku_rating", 0.1);
    // ids[1]: sólo 0.8
    seed_float_feedback(&store, &cfg, 3, ids[1], "haiku_rating", 0.8);
    // ids[2]: sin feedback

    let mut params = haiku_params();
    params.metric_filter = Some(MetricFilter { metric_name: "haiku_rating".into(),
                                               comparator: Comparator::Gt,
                                               threshold: 0.5 });
    let rows = store.fetch(&build_selection(&cfg, &params).unwrap()).await.unwrap();
    assert_eq!(rows.iter().map(|r| r["id"].clone()).collect::<Vec<_>>(), vec![json!(ids[1])]);
    params.metric_filter = Some(MetricFilter { metric_name: "haiku_rating".into(),
                                               comparator: Comparator::Le,
                                               threshold: 0.5 });
    assert_eq!(count_rows(&store, &cfg, &params).await.unwrap(), 1);
}

#[tokio::test]
async fn episode_level_boolean_metric_selects_whole_episodes() {
    let store = InMemoryStore::new();
    let cfg = config();
    let (good, bad) = (ordered_id(30_001), ordered_id(30_002));
    let ids = seed_inferences(&store,
                              &cfg,
                              &[Seed::chat(1, "write_haiku", "v1").in_episode(good),
                                Seed::chat(2, "write_haiku", "v1").in_episode(bad),
                                Seed::chat(3, "write_haiku", "v1").in_episode(good)]);
    seed_boolean_feedback(&store, &cfg, 1, good, "task_success", true);
    seed_boolean_feedback(&store, &cfg, 2, bad, "task_success", true);
    seed_boolean_feedback(&store, &cfg, 3, bad, "task_success", false);

    let mut params = haiku_params();
    params.metric_filter = Some(MetricFilter { metric_name: "task_success".into(),
                                               comparator: Comparator::Eq,
                                               threshold: 1.0 });
    let rows = store.fetch(&build_selection(&cfg, &params).unwrap()).await.unwrap();
    assert_eq!(rows.iter().map(|r| r["id"].clone()).collect::<Vec<_>>(),
               vec![json!(ids[2]), json!(ids[0])]);
}

#[tokio::test]
async fn limit_and_offset_apply_after_ordering() {
    let store = InMemoryStore::new();
    let cfg = config();
    let ids = seed_chat_run(&store, &cfg, 6);
    let mut params = haiku_params();
    params.limit = Some(2);
    params.offset = Some(1);
    let rows = store.fetch(&build_selection(&cfg, &params).unwrap()).await.unwrap();
    assert_eq!(rows.iter().map(|r| r["id"].clone()).collect::<Vec<_>>(),
               vec![json!(ids[4]), json!(ids[3])]);
}

#[tokio::test]
async fn materialize_twice_writes_everything_then_nothing() {
    let store = InMemoryStore::new();
    let cfg = config();
    let ids = seed_chat_run(&store, &cfg, 4);
    seed_inferences(&store, &cfg, &[Seed::chat(5, "summarize", "v1")]);

    assert_eq!(materialize(&store, &cfg, &materialize_params("golden")).await.unwrap(), 4);
    assert_eq!(materialize(&store, &cfg, &materialize_params("golden")).await.unwrap(), 0);
    // Otro dataset no comparte deduplicación.
    assert_eq!(materialize(&store, &cfg, &materialize_params("silver")).await.unwrap(), 4);

    let datasets = list_datasets(&store, &cfg).await.unwrap();
    assert_eq!(datasets.iter().map(|d| (d.dataset_name.as_str(), d.count)).collect::<Vec<_>>(),
               vec![("golden", 4), ("silver", 4)]);

    let table = cfg.datapoint_table(FunctionKind::Chat).unwrap();
    let golden = Select::from(Source::Table(table),
                              "dp",
                              Projection::columns("dp", &["id", "source_inference_id", "is_custom", "is_deleted", "staled_at", "dataset_name"]))
        .filter(Predicate::eq(col("dp", "dataset_name"), Literal::from("golden")));
    let rows = store.fetch(&golden).await.unwrap();
    assert_eq!(rows.len(), 4);
    for r in &rows {
        assert_eq!(r["is_custom"], json!(false));
        assert_eq!(r["is_deleted"], json!(false));
        assert!(r["staled_at"].is_null());
        let source: Uuid = serde_json::from_value(r["source_inference_id"].clone()).unwrap();
        assert!(ids.contains(&source));
        let id: Uuid = serde_json::from_value(r["id"].clone()).unwrap();
        assert!(!ids.contains(&id), "el datapoint recibe id propio");
    }
}

#[tokio::test]
async fn concurrent_materialize_before_merge_duplicates_rows() {
    let store = InMemoryStore::with_deferred_merge();
    let cfg = config();
    seed_chat_run(&store, &cfg, 3);

    // Ninguna escritura es visible para el chequeo de la otra.
    let params = materialize_params("race");
    let (a, b) = tokio::join!(materialize(&store, &cfg, &params), materialize(&store, &cfg, &params));
    assert_eq!(a.unwrap() + b.unwrap(), 6);
    assert_eq!(store.merge_pending(), 6);

    let datasets = list_datasets(&store, &cfg).await.unwrap();
    assert_eq!(datasets[0].count, 6);
    // Una vez visibles, la deduplicación vuelve a actuar.
    assert_eq!(materialize(&store, &cfg, &params).await.unwrap(), 0);
}

#[tokio::test]
async fn stale_then_get_hides_row_unless_allowed() {
    let store = InMemoryStore::new();
    let cfg = config();
    let ids = seed_chat_run(&store, &cfg, 1);
    materialize(&store, &cfg, &materialize_params("golden")).await.unwrap();
    let datasets = list_datasets(&store, &cfg).await.unwrap();
    assert_eq!(datasets.len(), 1);

    let table = cfg.datapoint_table(FunctionKind::Chat).unwrap();
    let rows = store.fetch(&Select::from(Source::Table(table), "dp", Projection::columns("dp", &["id"]))).await.unwrap();
    let id: Uuid = serde_json::from_value(rows[0]["id"].clone()).unwrap();

    let live = get_datapoint(&store, &cfg, "golden", id, false).await.unwrap().expect("vivo");
    assert!(!live.is_stale());
    assert_eq!(live.source_inference_id(), Some(ids[0]));

    assert_eq!(stale_datapoint(&store, &cfg, "golden", id, FunctionKind::Chat).await.unwrap(), 1);
    assert!(get_datapoint(&store, &cfg, "golden", id, false).await.unwrap().is_none());
    let stale = get_datapoint(&store, &cfg, "golden", id, true).await.unwrap().expect("retirado");
    assert!(stale.is_stale());
    assert_eq!(stale.source_inference_id(), Some(ids[0]));

    // Retirado es terminal: no se vuelve a sellar.
    assert_eq!(stale_datapoint(&store, &cfg, "golden", id, FunctionKind::Chat).await.unwrap(), 0);
    // Materializar de nuevo crea un id nuevo en vez de revivir el anterior.
    assert_eq!(materialize(&store, &cfg, &materialize_params("golden")).await.unwrap(), 1);
    let again = list_datasets(&store, &cfg).await.unwrap();
    assert_eq!(again[0].count, 1);
    assert!(get_datapoint(&store, &cfg, "golden", id, false).await.unwrap().is_none());
}

/// Versión viva sellada con `updated_at` dado, como si la hubiera escrito un
/// cliente con el reloj adelantado.
fn seed_live_version(store: &InMemoryStore, id: Uuid, updated_at: DateTime<Utc>) {
    let cfg = config();
    let dp = ChatDatapoint { dataset_name: "golden".into(),
                             function_name: "write_haiku".into(),
                             id,
                             episode_id: None,
                             input: json!({}),
                             output: Some(json!("v1")),
                             tool_params: None,
                             tags: Default::default(),
                             auxiliary: String::new(),
                             is_deleted: false,
                             is_custom: true,
                             source_inference_id: None,
                             updated_at,
                             staled_at: None };
    store.seed(&cfg.datapoint_table(FunctionKind::Chat).unwrap(),
               [lens_core::store::encode_row(&dp).unwrap()]);
}

#[tokio::test]
async fn stale_sorts_above_a_version_stamped_in_the_future() {
    let store = InMemoryStore::new();
    let cfg = config();
    let id = ordered_id(7);
    let ahead = (Utc::now() + Duration::hours(1)).trunc_subsecs(6);
    seed_live_version(&store, id, ahead);

    assert_eq!(stale_datapoint(&store, &cfg, "golden", id, FunctionKind::Chat).await.unwrap(), 1);
    assert!(get_datapoint(&store, &cfg, "golden", id, false).await.unwrap().is_none());
    let stale = get_datapoint(&store, &cfg, "golden", id, true).await.unwrap().expect("retirado");
    assert!(stale.updated_at() > ahead);
    assert_eq!(stale.staled_at(), Some(stale.updated_at()));
    assert_eq!(stale_datapoint(&store, &cfg, "golden", id, FunctionKind::Chat).await.unwrap(), 0);
}

#[tokio::test]
async fn replace_then_stale_keep_strict_version_order() {
    let store = InMemoryStore::new();
    let cfg = config();
    let id = ordered_id(8);
    let ahead = (Utc::now() + Duration::hours(1)).trunc_subsecs(6);
    seed_live_version(&store, id, ahead);

    let current = get_datapoint(&store, &cfg, "golden", id, false).await.unwrap().expect("vivo");
    let Datapoint::Chat(mut chat) = current else { panic!("esperaba chat") };
    chat.output = Some(json!("v2"));
    let replaced = replace_datapoint(&store, &cfg, Datapoint::Chat(chat)).await.unwrap();
    assert_eq!(replaced.updated_at(), ahead + Duration::microseconds(1));

    // Sin esperar al reloj: cada versión queda un microsegundo por encima.
    assert_eq!(stale_datapoint(&store, &cfg, "golden", id, FunctionKind::Chat).await.unwrap(), 1);
    assert!(get_datapoint(&store, &cfg, "golden", id, false).await.unwrap().is_none());
    let stale = get_datapoint(&store, &cfg, "golden", id, true).await.unwrap().expect("retirado");
    assert_eq!(stale.updated_at(), ahead + Duration::microseconds(2));
    let Datapoint::Chat(stale) = stale else { panic!("esperaba chat") };
    assert_eq!(stale.output, Some(json!("v2")));
}

#[tokio::test]
async fn stale_of_missing_datapoint_writes_nothing() {
    let store = InMemoryStore::new();
    let cfg = config();
    assert_eq!(stale_datapoint(&store, &cfg, "golden", ordered_id(1), FunctionKind::Structured).await.unwrap(), 0);
}

#[tokio::test]
async fn two_live_rows_for_one_key_is_a_consistency_violation() {
    let store = InMemoryStore::new();
    let cfg = config();
    let id = ordered_id(5);
    for function_name in ["write_haiku", "summarize"] {
        let dp = ChatDatapoint { dataset_name: "golden".into(),
                                 function_name: function_name.into(),
                                 id,
                                 episode_id: None,
                                 input: json!({}),
                                 output: None,
                                 tool_params: None,
                                 tags: Default::default(),
                                 auxiliary: String::new(),
                                 is_deleted: false,
                                 is_custom: true,
                                 source_inference_id: None,
                                 updated_at: at(1),
                                 staled_at: None };
        store.seed(&cfg.datapoint_table(FunctionKind::Chat).unwrap(),
                   [lens_core::store::encode_row(&dp).unwrap()]);
    }
    let err = get_datapoint(&store, &cfg, "golden", id, false).await.unwrap_err();
    assert!(err.is_consistency_violation());
    assert!(matches!(err, LensError::ConsistencyViolation { live_rows: 2, .. }));
}

#[tokio::test]
async fn custom_datapoints_can_be_inserted_and_replaced() {
    let store = InMemoryStore::new();
    let cfg = config();
    let draft = DatapointDraft { function_name: "write_haiku".into(),
                                 episode_id: None,
                                 input: json!({"messages": []}),
                                 output: Some(json!("first")),
                                 tags: Default::default(),
                                 shape: OutputShape::Chat { tool_params: None } };
    let inserted = insert_datapoint(&store, &cfg, "handmade", draft.clone()).await.unwrap();
    let Datapoint::Chat(mut chat) = inserted.clone() else { panic!("esperaba chat") };
    assert!(chat.is_custom);
    assert_eq!(chat.source_inference_id, None);

    chat.output = Some(json!("second"));
    replace_datapoint(&store, &cfg, Datapoint::Chat(chat)).await.unwrap();
    let current = get_datapoint(&store, &cfg, "handmade", inserted.id(), false).await.unwrap().expect("vigente");
    let Datapoint::Chat(current) = current else { panic!("esperaba chat") };
    assert_eq!(current.output, Some(json!("second")));
    assert_eq!(list_datasets(&store, &cfg).await.unwrap()[0].count, 1);

    // Reemplazar algo retirado no está permitido.
    stale_datapoint(&store, &cfg, "handmade", inserted.id(), FunctionKind::Chat).await.unwrap();
    let err = replace_datapoint(&store, &cfg, Datapoint::Chat(current)).await.unwrap_err();
    assert!(matches!(err, LensError::DatapointNotFound { .. }));

    // Función de otro tipo.
    let mut wrong = draft;
    wrong.function_name = "extract".into();
    assert!(matches!(insert_datapoint(&store, &cfg, "handmade", wrong).await,
                     Err(LensError::FunctionKindMismatch { .. })));
    assert!(matches!(insert_datapoint(&store, &cfg, "builder", DatapointDraft { function_name: "write_haiku".into(),
                                                                                episode_id: None,
                                                                                input: json!({}),
                                                                                output: None,
                                                                                tags: Default::default(),
                                                                                shape: OutputShape::Chat { tool_params: None } })
                         .await,
                     Err(LensError::InvalidDatasetName(_))));
}

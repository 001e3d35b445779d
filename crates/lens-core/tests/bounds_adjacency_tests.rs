
use lens_core::browse::{get_adjacent_episode_ids, get_adjacent_inference_ids, get_inference, latest_feedback_by_metric, query_episode_bounds,
                        query_feedback_bounds, query_inference_bounds};
use lens_core::model::{FeedbackKind, FunctionKind, InferenceRecord};
use lens_core::{AdjacentIds, Bounds, InMemoryStore, RecordFilter};
use test_support::*;

#[tokio::test]
async fn bounds_of_empty_filter_are_null_with_zero_count() {
    let store = InMemoryStore::new();
    let cfg = config();
    seed_chat_run(&store, &cfg, 4);
    let bounds = query_inference_bounds(&store, &cfg, &RecordFilter::function("summarize")).await.unwrap();
    assert_eq!(bounds,
               Bounds { first_id: None,
                        last_id: None,
                        count: 0 });
}

#[tokio::test]
async fn bounds_report_extremes_and_count() {
    let store = InMemoryStore::new();
    let cfg = config();
    let ids = seed_inferences(&store,
                              &cfg,
                              &[Seed::chat(3, "write_haiku", "v1"),
                                Seed::chat(7, "write_haiku", "v2"),
                                Seed::chat(9, "summarize", "v1"),
                                Seed::chat(12, "write_haiku", "v1")]);
    let bounds = query_inference_bounds(&store, &cfg, &RecordFilter::function("write_haiku")).await.unwrap();
    assert_eq!(bounds.first_id, Some(ids[0]));
    assert_eq!(bounds.last_id, Some(ids[3]));
    assert_eq!(bounds.count, 3);
}

#[tokio::test]
async fn episode_bounds_count_distinct_episodes() {
    let store = InMemoryStore::new();
    let cfg = config();
    let (e1, e2) = (ordered_id(80_001), ordered_id(80_002));
    seed_inferences(&store,
                    &cfg,
                    &[Seed::chat(1, "write_haiku", "v1").in_episode(e1),
                      Seed::chat(2, "write_haiku", "v1").in_episode(e1),
                      Seed::chat(3, "write_haiku", "v1").in_episode(e2)]);
    let bounds = query_episode_bounds(&store, &cfg, &RecordFilter::default()).await.unwrap();
    assert_eq!(bounds.count, 2);
    assert_eq!(bounds.first_id, Some(e1));
    assert_eq!(bounds.last_id, Some(e2));

    let adjacent = get_adjacent_episode_ids(&store, &cfg, e2, &RecordFilter::default()).await.unwrap();
    assert_eq!(adjacent,
               AdjacentIds { previous_id: Some(e1),
                             next_id: None });
}

#[tokio::test]
async fn adjacency_at_extremes_is_null() {
    let store = InMemoryStore::new();
    let cfg = config();
    let ids = seed_chat_run(&store, &cfg, 5);
    let f = RecordFilter::default();

    let first = get_adjacent_inference_ids(&store, &cfg, ids[0], &f).await.unwrap();
    assert_eq!(first.previous_id, None);
    assert_eq!(first.next_id, Some(ids[1]));

    let last = get_adjacent_inference_ids(&store, &cfg, ids[4], &f).await.unwrap();
    assert_eq!(last.previous_id, Some(ids[3]));
    assert_eq!(last.next_id, None);

    let middle = get_adjacent_inference_ids(&store, &cfg, ids[2], &f).await.unwrap();
    assert_eq!(middle,
               AdjacentIds { previous_id: Some(ids[1]),
                             next_id: Some(ids[3]) });
}

#[tokio::test]
async fn adjacency_works_when_current_is_filtered_out() {
    let store = InMemoryStore::new();
    let cfg = config();
    let ids = seed_inferences(&store,
                              &cfg,
                              &[Seed::chat(1, "write_haiku", "v1"),
                                Seed::chat(2, "summarize", "v1"),
                                Seed::chat(3, "write_haiku", "v1")]);
    let adjacent = get_adjacent_inference_ids(&store, &cfg, ids[1], &RecordFilter::function("write_haiku")).await
                                                                                                          .unwrap();
    assert_eq!(adjacent,
               AdjacentIds { previous_id: Some(ids[0]),
                             next_id: Some(ids[2]) });
}

#[tokio::test]
async fn feedback_bounds_and_latest_per_metric() {
    let store = InMemoryStore::new();
    let cfg = config();
    let ids = seed_chat_run(&store, &cfg, 1);
    let target = ids[0];
    seed_float_feedback(&store, &cfg, 1, target, "haiku_rating", 0.1);
    let newest_rating = seed_float_feedback(&store, &cfg, 5, target, "haiku_rating", 0.7);
    seed_boolean_feedback(&store, &cfg, 2, target, "exact_match", false);
    let newest_match = seed_boolean_feedback(&store, &cfg, 3, target, "exact_match", true);
    seed_boolean_feedback(&store, &cfg, 4, ordered_id(4242), "exact_match", true);

    let bounds = query_feedback_bounds(&store, &cfg, FeedbackKind::Boolean, target).await.unwrap();
    assert_eq!(bounds.count, 2);
    assert_eq!(bounds.last_id, Some(newest_match));

    let latest = latest_feedback_by_metric(&store, &cfg, target).await.unwrap();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest["haiku_rating"], newest_rating);
    assert_eq!(latest["exact_match"], newest_match);
}

#[tokio::test]
async fn inference_lookup_resolves_the_kind_table() {
    let store = InMemoryStore::new();
    let cfg = config();
    let ids = seed_inferences(&store, &cfg, &[Seed::chat(1, "write_haiku", "v1"), Seed::structured(2, "extract", "v1")]);

    let chat = get_inference(&store, &cfg, ids[0]).await.unwrap().expect("chat");
    assert_eq!(chat.kind(), FunctionKind::Chat);
    assert_eq!(chat.function_name(), "write_haiku");

    match get_inference(&store, &cfg, ids[1]).await.unwrap() {
        Some(InferenceRecord::Structured(s)) => {
            assert_eq!(s.id, ids[1]);
            assert_eq!(s.output_schema["type"], "object");
        }
        other => panic!("esperaba structured, obtuve {other:?}"),
    }

    assert!(get_inference(&store, &cfg, ordered_id(777)).await.unwrap().is_none());
}

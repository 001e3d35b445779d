//! Lecturas puntuales: una inferencia por id y el feedback vigente por
//! métrica de un objetivo.
use std::collections::BTreeMap;

use log::{debug, error};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::errors::LensError;
use crate::model::{FeedbackKind, FunctionKind, InferenceRecord};
use crate::query::{col, Direction, Predicate, Projection, Select, SortKey, Source};
use crate::store::{decode_row, decode_rows, QueryStore};

#[derive(Deserialize)]
struct KindRow {
    function_kind: FunctionKind,
}

#[derive(Deserialize)]
struct MetricRow {
    metric_name: String,
    id: Uuid,
}

/// Resuelve el tipo vía `inference_by_id` y luego lee la fila completa de la
/// tabla de ese tipo. `None` si el id no existe.
pub async fn get_inference<S>(store: &S, config: &GatewayConfig, id: Uuid) -> Result<Option<InferenceRecord>, LensError>
    where S: QueryStore + ?Sized
{
    debug!("get_inference:start id={id}");
    let index = Select::from(Source::Table(config.inference_index_table()?),
                             "i",
                             Projection::columns("i", &["function_kind"])).filter(Predicate::eq(col("i", "id"), id))
                                                                           .limit(1);
    let Some(row) = store.fetch(&index).await?.into_iter().next() else {
        debug!("get_inference:done id={id} found=false");
        return Ok(None);
    };
    let kind = decode_row::<KindRow>(row)?.function_kind;

    let columns: &[&'static str] = match kind {
        FunctionKind::Chat => &["id", "function_name", "variant_name", "episode_id", "input", "output", "tool_params", "tags", "timestamp"],
        FunctionKind::Structured => {
            &["id", "function_name", "variant_name", "episode_id", "input", "output", "output_schema", "tags", "timestamp"]
        }
    };
    let select = Select::from(Source::Table(config.inference_table(kind)?), "i", Projection::columns("i", columns))
        .filter(Predicate::eq(col("i", "id"), id))
        .limit(1);
    let rows = store.fetch(&select).await.map_err(|e| {
                                               error!("get_inference:fetch error id={id} kind={kind} err={e}");
                                               e
                                           })?;
    let record = match rows.into_iter().next() {
        None => None,
        Some(row) => Some(match kind {
            FunctionKind::Chat => InferenceRecord::Chat(decode_row(row)?),
            FunctionKind::Structured => InferenceRecord::Structured(decode_row(row)?),
        }),
    };
    debug!("get_inference:done id={id} found={}", record.is_some());
    Ok(record)
}

/// Id del feedback más reciente por métrica (booleana o flotante) para un
/// objetivo. Una pasada de ventana por tabla; ambas en paralelo.
pub async fn latest_feedback_by_metric<S>(store: &S, config: &GatewayConfig, target_id: Uuid) -> Result<BTreeMap<String, Uuid>, LensError>
    where S: QueryStore + ?Sized
{
    debug!("latest_feedback_by_metric:start target_id={target_id}");
    let boolean = latest_per_metric(config, FeedbackKind::Boolean, target_id)?;
    let float = latest_per_metric(config, FeedbackKind::Float, target_id)?;
    let (boolean, float) = tokio::try_join!(store.fetch(&boolean), store.fetch(&float)).map_err(|e| {
                                                                                              error!("latest_feedback_by_metric:fetch error target_id={target_id} err={e}");
                                                                                              e
                                                                                          })?;
    let mut out = BTreeMap::new();
    for row in decode_rows::<MetricRow>(boolean)?.into_iter().chain(decode_rows::<MetricRow>(float)?) {
        out.insert(row.metric_name, row.id);
    }
    debug!("latest_feedback_by_metric:done target_id={target_id} metrics={}", out.len());
    Ok(out)
}

fn latest_per_metric(config: &GatewayConfig, kind: FeedbackKind, target_id: Uuid) -> Result<Select, LensError> {
    let source = Source::Latest { table: config.feedback_table(kind)?,
                                  partition_by: vec!["target_id", "metric_name"],
                                  order_by: vec![SortKey { column: "timestamp",
                                                           direction: Direction::Desc },
                                                 SortKey { column: "id",
                                                           direction: Direction::Desc },],
                                  key_filters: vec![("target_id", target_id.into())] };
    Ok(Select::from(source, "f", Projection::columns("f", &["metric_name", "id"])).order("metric_name", Direction::Asc))
}

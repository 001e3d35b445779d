//! Extremos (id mínimo y máximo) y cardinalidad de un filtro.
use log::{debug, error};
use uuid::Uuid;

use super::page_spec::{PageSpec, RecordFilter};
use crate::config::GatewayConfig;
use crate::errors::LensError;
use crate::model::{Bounds, FeedbackKind};
use crate::query::{Aggregate, Projection, ValueType};
use crate::store::{decode_rows, QueryStore};

/// Sin filas: `first_id` y `last_id` nulos y `count = 0`, nunca un error.
pub async fn query_bounds<S>(store: &S, spec: &PageSpec) -> Result<Bounds, LensError>
    where S: QueryStore + ?Sized
{
    debug!("query_bounds:start source={}", spec.alias);
    // En fuentes agrupadas se cuentan claves, no filas de entrada.
    let count = if spec.is_grouped() { Aggregate::count_distinct(spec.id_column) } else { Aggregate::count() };
    let select = spec.base_select(Projection::Aggregates { group_by: None,
                                                           items: vec![(Aggregate::min(spec.id_column, ValueType::Uuid), "first_id"),
                                                                       (Aggregate::max(spec.id_column, ValueType::Uuid), "last_id"),
                                                                       (count, "count"),] });
    let rows = store.fetch(&select).await.map_err(|e| {
                                               error!("query_bounds:fetch error source={} err={e}", spec.alias);
                                               e
                                           })?;
    let bounds = decode_rows::<Bounds>(rows)?.into_iter().next().unwrap_or_default();
    debug!("query_bounds:done source={} count={}", spec.alias, bounds.count);
    Ok(bounds)
}

pub async fn query_inference_bounds<S>(store: &S, config: &GatewayConfig, filter: &RecordFilter) -> Result<Bounds, LensError>
    where S: QueryStore + ?Sized
{
    query_bounds(store, &PageSpec::inferences(config, filter)?).await
}

pub async fn query_episode_bounds<S>(store: &S, config: &GatewayConfig, filter: &RecordFilter) -> Result<Bounds, LensError>
    where S: QueryStore + ?Sized
{
    query_bounds(store, &PageSpec::episodes(config, filter)?).await
}

pub async fn query_feedback_bounds<S>(store: &S, config: &GatewayConfig, kind: FeedbackKind, target_id: Uuid) -> Result<Bounds, LensError>
    where S: QueryStore + ?Sized
{
    query_bounds(store, &PageSpec::feedback(config, kind, target_id)?).await
}

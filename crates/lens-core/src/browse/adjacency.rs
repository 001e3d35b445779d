//! Vecinos inmediatos de un id dentro de un filtro.
use log::{debug, error};
use uuid::Uuid;

use super::page_spec::{PageSpec, RecordFilter};
use crate::config::GatewayConfig;
use crate::errors::LensError;
use crate::model::AdjacentIds;
use crate::query::{Aggregate, Predicate, Projection, ValueType};
use crate::store::{decode_rows, QueryStore};

/// `previous_id`: mayor id < `current`; `next_id`: menor id > `current`.
/// `current` no necesita pertenecer al filtro. Ambos se resuelven en una sola
/// consulta con agregados filtrados.
pub async fn get_adjacent_ids<S>(store: &S, spec: &PageSpec, current: Uuid) -> Result<AdjacentIds, LensError>
    where S: QueryStore + ?Sized
{
    debug!("get_adjacent_ids:start source={} current={current}", spec.alias);
    let id = spec.id_column;
    let select = spec.base_select(Projection::Aggregates { group_by: None,
                                                           items: vec![(Aggregate::max(id, ValueType::Uuid).filtered(Predicate::lt(id, current)),
                                                                        "previous_id"),
                                                                       (Aggregate::min(id, ValueType::Uuid).filtered(Predicate::gt(id, current)),
                                                                        "next_id"),] });
    let rows = store.fetch(&select).await.map_err(|e| {
                                               error!("get_adjacent_ids:fetch error current={current} err={e}");
                                               e
                                           })?;
    let adjacent = decode_rows::<AdjacentIds>(rows)?.into_iter().next().unwrap_or_default();
    debug!("get_adjacent_ids:done current={current} previous={:?} next={:?}",
           adjacent.previous_id,
           adjacent.next_id);
    Ok(adjacent)
}

pub async fn get_adjacent_inference_ids<S>(store: &S, config: &GatewayConfig, current: Uuid, filter: &RecordFilter) -> Result<AdjacentIds, LensError>
    where S: QueryStore + ?Sized
{
    get_adjacent_ids(store, &PageSpec::inferences(config, filter)?, current).await
}

pub async fn get_adjacent_episode_ids<S>(store: &S, config: &GatewayConfig, current: Uuid, filter: &RecordFilter) -> Result<AdjacentIds, LensError>
    where S: QueryStore + ?Sized
{
    get_adjacent_ids(store, &PageSpec::episodes(config, filter)?, current).await
}

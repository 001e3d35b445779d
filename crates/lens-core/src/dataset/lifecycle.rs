//! Ciclo de vida de datapoints.
//!
//! No hay UPDATE ni DELETE: cada cambio escribe una versión nueva de la fila.
//! `Active --stale--> Staled` es terminal para un id; una materialización
//! posterior de la misma inferencia crea un id nuevo.
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, SubsecRound, Utc};
use log::{debug, error, info};
use uuid::Uuid;

use super::names::validate_dataset_name;
use crate::config::GatewayConfig;
use crate::errors::LensError;
use crate::model::{Datapoint, DatapointDraft, DatasetSummary, FunctionKind};
use crate::query::{col, Aggregate, Direction, Literal, Predicate, Projection, Select, SortKey, Source, ValueType};
use crate::store::{decode_row, decode_rows, encode_row, QueryStore, Row};

const LIVE: &str = "dp";

fn datapoint_columns(kind: FunctionKind) -> &'static [&'static str] {
    match kind {
        FunctionKind::Chat => &["dataset_name", "function_name", "id", "episode_id", "input", "output", "tool_params", "tags", "auxiliary",
                                "is_deleted", "is_custom", "source_inference_id", "updated_at", "staled_at"],
        FunctionKind::Structured => &["dataset_name", "function_name", "id", "episode_id", "input", "output", "output_schema", "tags",
                                      "auxiliary", "is_deleted", "is_custom", "source_inference_id", "updated_at", "staled_at"],
    }
}

/// Versión vigente de cada `(dataset_name, function_name, id)` del dataset,
/// opcionalmente acotada a un id.
pub(crate) fn latest_datapoints(config: &GatewayConfig, kind: FunctionKind, dataset_name: Option<&str>, id: Option<Uuid>) -> Result<Source, LensError> {
    let mut key_filters = Vec::new();
    if let Some(name) = dataset_name {
        key_filters.push(("dataset_name", Literal::from(name)));
    }
    if let Some(id) = id {
        key_filters.push(("id", Literal::from(id)));
    }
    Ok(Source::Latest { table: config.datapoint_table(kind)?,
                        partition_by: vec!["dataset_name", "function_name", "id"],
                        order_by: vec![SortKey { column: "updated_at",
                                                 direction: Direction::Desc },
                                       SortKey { column: "version",
                                                 direction: Direction::Desc },],
                        key_filters })
}

fn point_lookup(config: &GatewayConfig, kind: FunctionKind, dataset_name: &str, id: Uuid, allow_stale: bool) -> Result<Select, LensError> {
    let mut select = Select::from(latest_datapoints(config, kind, Some(dataset_name), Some(id))?,
                                  LIVE,
                                  Projection::columns(LIVE, datapoint_columns(kind)));
    if !allow_stale {
        select = select.filter(Predicate::IsNull(col(LIVE, "staled_at")));
    }
    Ok(select)
}

/// Busca un datapoint por `(dataset, id)` en las tablas de ambos tipos.
///
/// Con `allow_stale = false` descarta la versión vigente si está retirada.
/// Más de una fila vigente es una violación de consistencia, distinta de un
/// "no encontrado" (`Ok(None)`).
pub async fn get_datapoint<S>(store: &S, config: &GatewayConfig, dataset_name: &str, id: Uuid, allow_stale: bool) -> Result<Option<Datapoint>, LensError>
    where S: QueryStore + ?Sized
{
    debug!("get_datapoint:start dataset={dataset_name} id={id} allow_stale={allow_stale}");
    let chat = point_lookup(config, FunctionKind::Chat, dataset_name, id, allow_stale)?;
    let structured = point_lookup(config, FunctionKind::Structured, dataset_name, id, allow_stale)?;
    let (chat_rows, structured_rows) = tokio::try_join!(store.fetch(&chat), store.fetch(&structured)).map_err(|e| {
                                                                                                           error!("get_datapoint:fetch error dataset={dataset_name} id={id} err={e}");
                                                                                                           e
                                                                                                       })?;

    let live_rows = chat_rows.len() + structured_rows.len();
    if live_rows > 1 {
        let mut tables = Vec::new();
        if !chat_rows.is_empty() {
            tables.push(config.tables.chat_datapoint.clone());
        }
        if !structured_rows.is_empty() {
            tables.push(config.tables.structured_datapoint.clone());
        }
        error!("get_datapoint:consistency dataset={dataset_name} id={id} live_rows={live_rows}");
        return Err(LensError::ConsistencyViolation { table: tables.join(","),
                                                     dataset: dataset_name.to_string(),
                                                     id,
                                                     live_rows });
    }

    let found = match (chat_rows.into_iter().next(), structured_rows.into_iter().next()) {
        (Some(row), _) => Some(decode_datapoint(FunctionKind::Chat, row)?),
        (None, Some(row)) => Some(decode_datapoint(FunctionKind::Structured, row)?),
        (None, None) => None,
    };
    debug!("get_datapoint:done dataset={dataset_name} id={id} found={}", found.is_some());
    Ok(found)
}

/// Primer instante que ordena después de `current` bajo
/// `updated_at DESC, version DESC`, sin ir detrás del reloj local.
fn next_version_stamp(current: DateTime<Utc>) -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6).max(current + Duration::microseconds(1))
}

fn decode_datapoint(kind: FunctionKind, row: Row) -> Result<Datapoint, LensError> {
    Ok(match kind {
        FunctionKind::Chat => Datapoint::Chat(decode_row(row)?),
        FunctionKind::Structured => Datapoint::Structured(decode_row(row)?),
    })
}

/// Retira el datapoint escribiendo una versión nueva con `staled_at` igual a
/// su `updated_at`. Sólo actúa sobre filas vivas: devuelve 0 si el datapoint
/// no existe o ya estaba retirado.
///
/// El sello queda al menos 1µs después de la versión vigente leída, sin
/// importar qué reloj la selló.
pub async fn stale_datapoint<S>(store: &S, config: &GatewayConfig, dataset_name: &str, id: Uuid, kind: FunctionKind) -> Result<u64, LensError>
    where S: QueryStore + ?Sized
{
    debug!("stale_datapoint:start dataset={dataset_name} id={id} kind={kind}");
    let live = point_lookup(config, kind, dataset_name, id, false)?;
    let rows = store.fetch(&live).await.map_err(|e| {
                                           error!("stale_datapoint:fetch error dataset={dataset_name} id={id} err={e}");
                                           e
                                       })?;
    // Un mismo id puede existir bajo varias funciones; se retiran todas.
    let staled = rows.into_iter()
                     .map(|row| {
                         let current = decode_datapoint(kind, row)?;
                         let now = next_version_stamp(current.updated_at());
                         datapoint_row(&current.into_stale_version(now))
                     })
                     .collect::<Result<Vec<Row>, LensError>>()?;
    let written = store.insert_rows(&config.datapoint_table(kind)?, &staled)
                       .await
                       .map_err(|e| {
                           error!("stale_datapoint:insert error dataset={dataset_name} id={id} err={e}");
                           e
                       })?;
    info!("stale_datapoint:done dataset={dataset_name} id={id} written={written}");
    Ok(written)
}

fn datapoint_row(datapoint: &Datapoint) -> Result<Row, LensError> {
    match datapoint {
        Datapoint::Chat(d) => encode_row(d),
        Datapoint::Structured(d) => encode_row(d),
    }
}

/// Agrega un datapoint escrito a mano (`is_custom`, sin inferencia de
/// origen, id nuevo).
pub async fn insert_datapoint<S>(store: &S, config: &GatewayConfig, dataset_name: &str, draft: DatapointDraft) -> Result<Datapoint, LensError>
    where S: QueryStore + ?Sized
{
    validate_dataset_name(dataset_name)?;
    config.expect_function_kind(&draft.function_name, draft.kind())?;
    let kind = draft.kind();
    let datapoint = draft.into_datapoint(dataset_name, Uuid::now_v7(), Utc::now().trunc_subsecs(6));
    debug!("insert_datapoint:start dataset={dataset_name} id={} kind={kind}", datapoint.id());
    store.insert_rows(&config.datapoint_table(kind)?, &[datapoint_row(&datapoint)?])
         .await
         .map_err(|e| {
             error!("insert_datapoint:insert error dataset={dataset_name} err={e}");
             e
         })?;
    info!("insert_datapoint:done dataset={dataset_name} id={}", datapoint.id());
    Ok(datapoint)
}

/// Reemplaza un datapoint vivo escribiendo una versión nueva con el mismo id.
/// La identidad `(dataset, function_name, id)` y el tipo deben coincidir con
/// la fila vigente.
pub async fn replace_datapoint<S>(store: &S, config: &GatewayConfig, datapoint: Datapoint) -> Result<Datapoint, LensError>
    where S: QueryStore + ?Sized
{
    let dataset_name = datapoint.dataset_name().to_string();
    let id = datapoint.id();
    validate_dataset_name(&dataset_name)?;
    debug!("replace_datapoint:start dataset={dataset_name} id={id}");

    let current = get_datapoint(store, config, &dataset_name, id, false).await?
                                                                        .filter(|c| c.function_name() == datapoint.function_name())
                                                                        .ok_or_else(|| LensError::DatapointNotFound { dataset: dataset_name.clone(),
                                                                                                                      id })?;
    if current.kind() != datapoint.kind() {
        return Err(LensError::FunctionKindMismatch { function: datapoint.function_name().to_string(),
                                                     requested: datapoint.kind(),
                                                     actual: current.kind() });
    }

    let next = datapoint.into_new_version(next_version_stamp(current.updated_at()));
    store.insert_rows(&config.datapoint_table(next.kind())?, &[datapoint_row(&next)?])
         .await
         .map_err(|e| {
             error!("replace_datapoint:insert error dataset={dataset_name} id={id} err={e}");
             e
         })?;
    info!("replace_datapoint:done dataset={dataset_name} id={id}");
    Ok(next)
}

#[derive(serde::Deserialize)]
struct DatasetAggregate {
    dataset_name: String,
    count: u64,
    last_updated: DateTime<Utc>,
}

/// Datasets con al menos una fila viva, con su cantidad de filas vivas y la
/// última escritura, sumando ambas tablas de datapoints.
pub async fn list_datasets<S>(store: &S, config: &GatewayConfig) -> Result<Vec<DatasetSummary>, LensError>
    where S: QueryStore + ?Sized
{
    debug!("list_datasets:start");
    let per_kind = |kind: FunctionKind| -> Result<Select, LensError> {
        Ok(Select::from(latest_datapoints(config, kind, None, None)?,
                        LIVE,
                        Projection::Aggregates { group_by: Some((col(LIVE, "dataset_name"), "dataset_name")),
                                                 items: vec![(Aggregate::count(), "count"),
                                                             (Aggregate::max(col(LIVE, "updated_at"), ValueType::Timestamp), "last_updated"),] })
           .filter(Predicate::IsNull(col(LIVE, "staled_at"))))
    };
    let chat = per_kind(FunctionKind::Chat)?;
    let structured = per_kind(FunctionKind::Structured)?;
    let (chat, structured) = tokio::try_join!(store.fetch(&chat), store.fetch(&structured)).map_err(|e| {
                                                                                              error!("list_datasets:fetch error err={e}");
                                                                                              e
                                                                                          })?;

    let mut merged: BTreeMap<String, DatasetSummary> = BTreeMap::new();
    for agg in decode_rows::<DatasetAggregate>(chat)?.into_iter().chain(decode_rows::<DatasetAggregate>(structured)?) {
        merged.entry(agg.dataset_name.clone())
              .and_modify(|s| {
                  s.count += agg.count;
                  s.last_updated = s.last_updated.max(agg.last_updated);
              })
              .or_insert(DatasetSummary { dataset_name: agg.dataset_name,
                                          count: agg.count,
                                          last_updated: agg.last_updated });
    }
    debug!("list_datasets:done datasets={}", merged.len());
    Ok(merged.into_values().collect())
}

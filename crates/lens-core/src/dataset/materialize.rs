//! Materialización de una selección como datapoints de un dataset.
//!
//! Un único `INSERT ... SELECT`: cada fila seleccionada recibe un id nuevo,
//! el nombre del dataset y los campos de auditoría por defecto, y se descarta
//! si el dataset ya tiene una fila viva con la misma
//! `(function_name, source_inference_id)`.
//!
//! La deduplicación es orientativa. Dos llamadas concurrentes sobre filas de
//! origen solapadas pueden pasar ambas el chequeo antes de que cualquiera de
//! las escrituras sea visible, y entonces se crean datapoints duplicados. El
//! almacén no ofrece nada más fuerte y este módulo no lo simula.
use log::{debug, error, info};
use serde::{Deserialize, Serialize};

use super::builder::{build_selection, shape_column, DatasetQueryParams};
use super::lifecycle::latest_datapoints;
use super::names::validate_dataset_name;
use crate::config::GatewayConfig;
use crate::errors::LensError;
use crate::query::{col, Expr, InsertSelect, Join, JoinKind, Literal, Predicate, Projection, Select, Source, ValueType};
use crate::store::QueryStore;

const SELECTED: &str = "s";
const EXISTING: &str = "existing";
const LIVE: &str = "dp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializeParams {
    pub dataset_name: String,
    pub selection: DatasetQueryParams,
}

pub fn build_materialization(config: &GatewayConfig, params: &MaterializeParams) -> Result<InsertSelect, LensError> {
    validate_dataset_name(&params.dataset_name)?;
    let selection = build_selection(config, &params.selection)?;
    let shape = shape_column(params.selection.kind);

    let existing = Select::from(latest_datapoints(config, params.selection.kind, Some(params.dataset_name.as_str()), None)?,
                                LIVE,
                                Projection::columns(LIVE, &["function_name", "source_inference_id", "id"]))
        .filter(Predicate::IsNull(col(LIVE, "staled_at")));

    let selected = |name: &'static str| (Expr::Column(col(SELECTED, name)), name);
    let items = vec![(Expr::FreshId, "id"),
                     (Expr::Literal(Literal::from(params.dataset_name.as_str())), "dataset_name"),
                     selected("function_name"),
                     selected("episode_id"),
                     selected("input"),
                     selected("output"),
                     selected(shape),
                     selected("tags"),
                     (Expr::Literal(Literal::from("")), "auxiliary"),
                     (Expr::Literal(Literal::Bool(false)), "is_deleted"),
                     (Expr::Literal(Literal::Bool(false)), "is_custom"),
                     (Expr::Column(col(SELECTED, "id")), "source_inference_id"),
                     (Expr::Now, "updated_at"),
                     (Expr::Null(ValueType::Timestamp), "staled_at"),];
    let columns = items.iter().map(|(_, name)| *name).collect();

    let select = Select::from(Source::Subquery(Box::new(selection)), SELECTED, Projection::Columns(items))
        .join(Join { kind: JoinKind::Left,
                     source: Source::Subquery(Box::new(existing)),
                     alias: EXISTING,
                     on: vec![(col(SELECTED, "function_name"), col(EXISTING, "function_name")),
                              (col(SELECTED, "id"), col(EXISTING, "source_inference_id")),] })
        .filter(Predicate::IsNull(col(EXISTING, "id")));

    Ok(InsertSelect { table: config.datapoint_table(params.selection.kind)?,
                      columns,
                      select })
}

/// Devuelve cuántas filas se escribieron.
pub async fn materialize<S>(store: &S, config: &GatewayConfig, params: &MaterializeParams) -> Result<u64, LensError>
    where S: QueryStore + ?Sized
{
    debug!("materialize:start dataset={} kind={} function={:?}",
           params.dataset_name,
           params.selection.kind,
           params.selection.function_name);
    let statement = build_materialization(config, params)?;
    let written = store.insert_select(&statement).await.map_err(|e| {
                                                          error!("materialize:insert error dataset={} err={e}", params.dataset_name);
                                                          e
                                                      })?;
    info!("materialize:done dataset={} written={written}", params.dataset_name);
    Ok(written)
}

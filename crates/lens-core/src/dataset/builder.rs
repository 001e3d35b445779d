//! Constructor de selecciones de dataset.
//!
//! La selección lee la tabla de inferencias del tipo pedido (alias `i`) y
//! produce siempre las mismas columnas: `id`, `episode_id`, `function_name`,
//! `variant_name`, `input`, `output`, la columna de forma del tipo
//! (`tool_params` u `output_schema`) y `tags`, en id descendente.
//!
//! Feedback "más reciente por objetivo" se resuelve con `Source::Latest`: una
//! sola pasada de ventana particionada por objetivo (y métrica), nunca una
//! consulta por fila.
use log::{debug, error};
use serde::{Deserialize, Serialize};

use crate::config::{GatewayConfig, MetricKind, MetricLevel};
use crate::errors::LensError;
use crate::model::{FeedbackKind, FunctionKind};
use crate::query::{col, Aggregate, Comparator, Direction, Expr, Join, JoinKind, Literal, Predicate, Projection, Select, SortKey, Source,
                   Table, ValueType};
use crate::store::QueryStore;

const INFERENCE: &str = "i";
const DEMONSTRATION: &str = "demo";
const METRIC: &str = "metric";

/// De dónde sale la columna `output` de cada fila seleccionada.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSource {
    /// La salida original de la inferencia.
    #[default]
    Inference,
    /// El valor de la demostración más reciente; excluye inferencias sin
    /// demostración.
    Demonstration,
    /// Salida nula.
    None,
}

/// Restringe a inferencias cuyo feedback más reciente para `metric_name`
/// cumple `value <comparator> threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricFilter {
    pub metric_name: String,
    pub comparator: Comparator,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetQueryParams {
    pub kind: FunctionKind,
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub variant_name: Option<String>,
    #[serde(default)]
    pub output_source: OutputSource,
    #[serde(default)]
    pub metric_filter: Option<MetricFilter>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

impl DatasetQueryParams {
    pub fn new(kind: FunctionKind) -> Self {
        Self { kind,
               function_name: None,
               variant_name: None,
               output_source: OutputSource::default(),
               metric_filter: None,
               limit: None,
               offset: None }
    }
}

/// Columna propia de cada tipo de función.
pub(crate) fn shape_column(kind: FunctionKind) -> &'static str {
    match kind {
        FunctionKind::Chat => "tool_params",
        FunctionKind::Structured => "output_schema",
    }
}

fn latest_by(table: Table, partition_by: Vec<&'static str>, key_filters: Vec<(&'static str, Literal)>) -> Source {
    Source::Latest { table,
                     partition_by,
                     order_by: vec![SortKey { column: "timestamp",
                                              direction: Direction::Desc },
                                    SortKey { column: "id",
                                              direction: Direction::Desc },],
                     key_filters }
}

fn metric_threshold(filter: &MetricFilter, kind: MetricKind) -> Result<Literal, LensError> {
    if !filter.threshold.is_finite() {
        return Err(LensError::InvalidMetricFilter(format!("threshold must be finite, got {}", filter.threshold)));
    }
    match kind {
        MetricKind::Float => Ok(Literal::Float(filter.threshold)),
        MetricKind::Boolean => {
            if !matches!(filter.comparator, Comparator::Eq | Comparator::Ne) {
                return Err(LensError::InvalidMetricFilter(format!("boolean metric {} only supports = and !=", filter.metric_name)));
            }
            if filter.threshold == 1.0 {
                Ok(Literal::Bool(true))
            } else if filter.threshold == 0.0 {
                Ok(Literal::Bool(false))
            } else {
                Err(LensError::InvalidMetricFilter(format!("boolean metric {} needs threshold 0 or 1, got {}",
                                                           filter.metric_name, filter.threshold)))
            }
        }
    }
}

/// Construye la selección descrita por `params`.
pub fn build_selection(config: &GatewayConfig, params: &DatasetQueryParams) -> Result<Select, LensError> {
    if params.variant_name.is_some() && params.function_name.is_none() {
        return Err(LensError::MissingFunctionName);
    }
    if let Some(function) = &params.function_name {
        config.expect_function_kind(function, params.kind)?;
    }

    let output = match params.output_source {
        OutputSource::Inference => Expr::Column(col(INFERENCE, "output")),
        OutputSource::Demonstration => Expr::Column(col(DEMONSTRATION, "value")),
        OutputSource::None => Expr::Null(ValueType::Json),
    };
    let projection = Projection::Columns(vec![(Expr::Column(col(INFERENCE, "id")), "id"),
                                              (Expr::Column(col(INFERENCE, "episode_id")), "episode_id"),
                                              (Expr::Column(col(INFERENCE, "function_name")), "function_name"),
                                              (Expr::Column(col(INFERENCE, "variant_name")), "variant_name"),
                                              (Expr::Column(col(INFERENCE, "input")), "input"),
                                              (output, "output"),
                                              (Expr::Column(col(INFERENCE, shape_column(params.kind))), shape_column(params.kind)),
                                              (Expr::Column(col(INFERENCE, "tags")), "tags"),]);
    let mut select = Select::from(Source::Table(config.inference_table(params.kind)?), INFERENCE, projection);

    if params.output_source == OutputSource::Demonstration {
        let table = config.feedback_table(FeedbackKind::Demonstration)?;
        select = select.join(Join { kind: JoinKind::Inner,
                                    source: latest_by(table, vec!["inference_id"], Vec::new()),
                                    alias: DEMONSTRATION,
                                    on: vec![(col(INFERENCE, "id"), col(DEMONSTRATION, "inference_id"))] });
    }

    if let Some(filter) = &params.metric_filter {
        let metric = config.metric(&filter.metric_name)?;
        let threshold = metric_threshold(filter, metric.kind)?;
        let table = config.feedback_table(metric.kind.feedback_kind())?;
        let target = match metric.level {
            MetricLevel::Inference => col(INFERENCE, "id"),
            MetricLevel::Episode => col(INFERENCE, "episode_id"),
        };
        select = select.join(Join { kind: JoinKind::Inner,
                                    source: latest_by(table,
                                                      vec!["target_id", "metric_name"],
                                                      vec![("metric_name", Literal::from(filter.metric_name.as_str()))]),
                                    alias: METRIC,
                                    on: vec![(target, col(METRIC, "target_id"))] })
                       .filter(Predicate::compare(col(METRIC, "value"), filter.comparator, threshold));
    }

    if let Some(function) = &params.function_name {
        select = select.filter(Predicate::eq(col(INFERENCE, "function_name"), function.as_str()));
    }
    if let Some(variant) = &params.variant_name {
        select = select.filter(Predicate::eq(col(INFERENCE, "variant_name"), variant.as_str()));
    }
    select = select.order("id", Direction::Desc);
    if let Some(limit) = params.limit {
        select = select.limit(limit);
    }
    if let Some(offset) = params.offset {
        select = select.offset(offset);
    }
    Ok(select)
}

/// Conteo de la misma selección. `limit`/`offset` no tienen semántica de
/// conteo definida y se rechazan.
pub fn count_selection(config: &GatewayConfig, params: &DatasetQueryParams) -> Result<Select, LensError> {
    if params.limit.is_some() {
        return Err(LensError::UnsupportedParameter("limit"));
    }
    if params.offset.is_some() {
        return Err(LensError::UnsupportedParameter("offset"));
    }
    let mut selection = build_selection(config, params)?;
    selection.order_by.clear();
    Ok(Select::from(Source::Subquery(Box::new(selection)),
                    "s",
                    Projection::Aggregates { group_by: None,
                                             items: vec![(Aggregate::count(), "count")] }))
}

pub async fn count_rows<S>(store: &S, config: &GatewayConfig, params: &DatasetQueryParams) -> Result<u64, LensError>
    where S: QueryStore + ?Sized
{
    debug!("count_rows:start kind={} function={:?}", params.kind, params.function_name);
    let select = count_selection(config, params)?;
    let rows = store.fetch(&select).await.map_err(|e| {
                                               error!("count_rows:fetch error kind={} err={e}", params.kind);
                                               e
                                           })?;
    let count = rows.first().and_then(|r| r.get("count")).and_then(|v| v.as_u64()).unwrap_or(0);
    debug!("count_rows:done kind={} count={count}", params.kind);
    Ok(count)
}

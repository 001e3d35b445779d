//! Descripción de fuentes paginables.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::errors::LensError;
use crate::model::FeedbackKind;
use crate::query::{col, Aggregate, ColumnRef, Direction, Predicate, Projection, Select, Source, ValueType};

/// Filtro conjuntivo sobre inferencias; cualquier subconjunto de campos.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFilter {
    #[serde(default)]
    pub function_name: Option<String>,
    #[serde(default)]
    pub variant_name: Option<String>,
    #[serde(default)]
    pub episode_id: Option<Uuid>,
}

impl RecordFilter {
    pub fn function(name: impl Into<String>) -> Self {
        Self { function_name: Some(name.into()),
               ..Self::default() }
    }

    pub fn with_variant(mut self, name: impl Into<String>) -> Self {
        self.variant_name = Some(name.into());
        self
    }

    pub fn with_episode(mut self, episode_id: Uuid) -> Self {
        self.episode_id = Some(episode_id);
        self
    }

    fn predicates(&self, alias: &'static str) -> Vec<Predicate> {
        let mut out = Vec::new();
        if let Some(f) = &self.function_name {
            out.push(Predicate::eq(col(alias, "function_name"), f.as_str()));
        }
        if let Some(v) = &self.variant_name {
            out.push(Predicate::eq(col(alias, "variant_name"), v.as_str()));
        }
        if let Some(e) = self.episode_id {
            out.push(Predicate::eq(col(alias, "episode_id"), e));
        }
        out
    }
}

const INFERENCE_ALIAS: &str = "i";
const FEEDBACK_ALIAS: &str = "f";

/// Fuente paginable: de dónde leer, cómo filtrar, qué columna es el cursor y
/// qué proyectar por fila.
#[derive(Debug, Clone, PartialEq)]
pub struct PageSpec {
    pub source: Source,
    pub alias: &'static str,
    pub predicates: Vec<Predicate>,
    /// Columna de entrada sobre la que se aplican cursores.
    pub id_column: ColumnRef,
    /// Nombre de salida del id (para ordenar).
    pub id_output: &'static str,
    pub projection: Projection,
}

impl PageSpec {
    /// Inferencias de cualquier tipo vía `inference_by_id`.
    pub fn inferences(config: &GatewayConfig, filter: &RecordFilter) -> Result<Self, LensError> {
        Ok(Self { source: Source::Table(config.inference_index_table()?),
                  alias: INFERENCE_ALIAS,
                  predicates: filter.predicates(INFERENCE_ALIAS),
                  id_column: col(INFERENCE_ALIAS, "id"),
                  id_output: "id",
                  projection: Projection::columns(INFERENCE_ALIAS,
                                                  &["id", "function_name", "variant_name", "episode_id", "function_kind", "timestamp"]) })
    }

    /// Episodios derivados agrupando inferencias por `episode_id`. El cursor
    /// es la propia clave de agrupación, así que filtrarlo antes de agrupar no
    /// parte ningún episodio.
    pub fn episodes(config: &GatewayConfig, filter: &RecordFilter) -> Result<Self, LensError> {
        let a = INFERENCE_ALIAS;
        Ok(Self { source: Source::Table(config.inference_index_table()?),
                  alias: a,
                  predicates: filter.predicates(a),
                  id_column: col(a, "episode_id"),
                  id_output: "episode_id",
                  projection: Projection::Aggregates { group_by: Some((col(a, "episode_id"), "episode_id")),
                                                       items: vec![(Aggregate::count(), "count"),
                                                                   (Aggregate::min(col(a, "timestamp"), ValueType::Timestamp), "start_time"),
                                                                   (Aggregate::max(col(a, "timestamp"), ValueType::Timestamp), "end_time"),
                                                                   (Aggregate::max(col(a, "id"), ValueType::Uuid), "last_inference_id"),] } })
    }

    /// Feedback de un objetivo (inferencia o episodio) en una tabla.
    pub fn feedback(config: &GatewayConfig, kind: FeedbackKind, target_id: Uuid) -> Result<Self, LensError> {
        let f = FEEDBACK_ALIAS;
        let columns: &[&'static str] = match kind {
            FeedbackKind::Boolean | FeedbackKind::Float => &["id", "target_id", "metric_name", "value", "tags", "timestamp"],
            FeedbackKind::Demonstration => &["id", "inference_id", "value", "tags", "timestamp"],
        };
        Ok(Self { source: Source::Table(config.feedback_table(kind)?),
                  alias: f,
                  predicates: vec![Predicate::eq(col(f, kind.target_column()), target_id)],
                  id_column: col(f, "id"),
                  id_output: "id",
                  projection: Projection::columns(f, columns) })
    }

    pub fn is_grouped(&self) -> bool {
        matches!(self.projection, Projection::Aggregates { group_by: Some(_), .. })
    }

    /// Select base sin cursor, orden ni límite.
    pub(crate) fn base_select(&self, projection: Projection) -> Select {
        let mut select = Select::from(self.source.clone(), self.alias, projection);
        select.predicates = self.predicates.clone();
        select
    }

    pub(crate) fn rows_select(&self, cursor_predicate: Option<Predicate>, direction: Direction, limit: u64) -> Select {
        let mut select = self.base_select(self.projection.clone());
        if let Some(p) = cursor_predicate {
            select.predicates.push(p);
        }
        select.order(self.id_output, direction).limit(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_builds_only_present_predicates() {
        let cfg = GatewayConfig::default();
        let spec = PageSpec::inferences(&cfg, &RecordFilter::function("f").with_variant("v")).unwrap();
        assert_eq!(spec.predicates.len(), 2);
        let spec = PageSpec::inferences(&cfg, &RecordFilter::default()).unwrap();
        assert!(spec.predicates.is_empty());
        assert!(!spec.is_grouped());
        assert!(PageSpec::episodes(&cfg, &RecordFilter::default()).unwrap().is_grouped());
    }
}

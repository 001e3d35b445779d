use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::LensError;
use crate::model::{FeedbackKind, FunctionKind};
use crate::query::Table;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfig {
    pub kind: FunctionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Boolean,
    Float,
}

impl MetricKind {
    pub fn feedback_kind(&self) -> FeedbackKind {
        match self {
            MetricKind::Boolean => FeedbackKind::Boolean,
            MetricKind::Float => FeedbackKind::Float,
        }
    }
}

/// Nivel al que se asigna la métrica: una inferencia o un episodio entero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricLevel {
    Inference,
    Episode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Optimize {
    Max,
    Min,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricConfig {
    #[serde(rename = "type")]
    pub kind: MetricKind,
    pub level: MetricLevel,
    #[serde(default = "default_optimize")]
    pub optimize: Optimize,
}

fn default_optimize() -> Optimize {
    Optimize::Max
}

/// Nombres físicos de las tablas; cada clave puede sobrescribirse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableMap {
    pub inference_by_id: String,
    pub chat_inference: String,
    pub structured_inference: String,
    pub boolean_metric_feedback: String,
    pub float_metric_feedback: String,
    pub demonstration_feedback: String,
    pub chat_datapoint: String,
    pub structured_datapoint: String,
}

impl Default for TableMap {
    fn default() -> Self {
        Self { inference_by_id: "inference_by_id".into(),
               chat_inference: "chat_inference".into(),
               structured_inference: "structured_inference".into(),
               boolean_metric_feedback: "boolean_metric_feedback".into(),
               float_metric_feedback: "float_metric_feedback".into(),
               demonstration_feedback: "demonstration_feedback".into(),
               chat_datapoint: "chat_inference_datapoint".into(),
               structured_datapoint: "structured_inference_datapoint".into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub functions: BTreeMap<String, FunctionConfig>,
    #[serde(default)]
    pub metrics: BTreeMap<String, MetricConfig>,
    #[serde(default)]
    pub tables: TableMap,
}

impl GatewayConfig {
    pub fn function(&self, name: &str) -> Result<&FunctionConfig, LensError> {
        self.functions.get(name).ok_or_else(|| LensError::UnknownFunction(name.to_string()))
    }

    pub fn metric(&self, name: &str) -> Result<&MetricConfig, LensError> {
        self.metrics.get(name).ok_or_else(|| LensError::UnknownMetric(name.to_string()))
    }

    /// Verifica que la función exista y sea del tipo pedido.
    pub fn expect_function_kind(&self, name: &str, requested: FunctionKind) -> Result<(), LensError> {
        let actual = self.function(name)?.kind;
        if actual != requested {
            return Err(LensError::FunctionKindMismatch { function: name.to_string(),
                                                         requested,
                                                         actual });
        }
        Ok(())
    }

    pub fn inference_index_table(&self) -> Result<Table, LensError> {
        Table::new(self.tables.inference_by_id.as_str())
    }

    pub fn inference_table(&self, kind: FunctionKind) -> Result<Table, LensError> {
        match kind {
            FunctionKind::Chat => Table::new(self.tables.chat_inference.as_str()),
            FunctionKind::Structured => Table::new(self.tables.structured_inference.as_str()),
        }
    }

    pub fn datapoint_table(&self, kind: FunctionKind) -> Result<Table, LensError> {
        match kind {
            FunctionKind::Chat => Table::new(self.tables.chat_datapoint.as_str()),
            FunctionKind::Structured => Table::new(self.tables.structured_datapoint.as_str()),
        }
    }

    pub fn feedback_table(&self, kind: FeedbackKind) -> Result<Table, LensError> {
        match kind {
            FeedbackKind::Boolean => Table::new(self.tables.boolean_metric_feedback.as_str()),
            FeedbackKind::Float => Table::new(self.tables.float_metric_feedback.as_str()),
            FeedbackKind::Demonstration => Table::new(self.tables.demonstration_feedback.as_str()),
        }
    }

    /// SHA-256 hex del JSON de la configuración. Los mapas son `BTreeMap`, así
    /// que la serialización es estable.
    pub fn fingerprint(&self) -> Result<String, LensError> {
        let bytes = serde_json::to_vec(self).map_err(|e| LensError::Config(format!("serialize config: {e}")))?;
        let digest = Sha256::digest(&bytes);
        Ok(digest.iter().map(|b| format!("{b:02x}")).collect())
    }
}

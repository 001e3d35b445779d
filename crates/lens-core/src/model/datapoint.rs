//! Datapoints: filas de dataset mutables por reemplazo.
//!
//! Cada escritura es una versión nueva de la fila; la versión vigente de un
//! `(dataset_name, function_name, id)` es la de mayor `updated_at` (desempate
//! por la versión asignada por el almacén). Una versión con `staled_at` no
//! nulo está retirada y nunca se reactiva.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{FunctionKind, Tags};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatDatapoint {
    pub dataset_name: String,
    pub function_name: String,
    pub id: Uuid,
    #[serde(default)]
    pub episode_id: Option<Uuid>,
    pub input: Value,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub tool_params: Option<Value>,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub auxiliary: String,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_custom: bool,
    #[serde(default)]
    pub source_inference_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub staled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredDatapoint {
    pub dataset_name: String,
    pub function_name: String,
    pub id: Uuid,
    #[serde(default)]
    pub episode_id: Option<Uuid>,
    pub input: Value,
    #[serde(default)]
    pub output: Option<Value>,
    pub output_schema: Value,
    #[serde(default)]
    pub tags: Tags,
    #[serde(default)]
    pub auxiliary: String,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub is_custom: bool,
    #[serde(default)]
    pub source_inference_id: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub staled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "function_kind", rename_all = "snake_case")]
pub enum Datapoint {
    Chat(ChatDatapoint),
    Structured(StructuredDatapoint),
}

impl Datapoint {
    pub fn kind(&self) -> FunctionKind {
        match self {
            Datapoint::Chat(_) => FunctionKind::Chat,
            Datapoint::Structured(_) => FunctionKind::Structured,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Datapoint::Chat(d) => d.id,
            Datapoint::Structured(d) => d.id,
        }
    }

    pub fn dataset_name(&self) -> &str {
        match self {
            Datapoint::Chat(d) => &d.dataset_name,
            Datapoint::Structured(d) => &d.dataset_name,
        }
    }

    pub fn function_name(&self) -> &str {
        match self {
            Datapoint::Chat(d) => &d.function_name,
            Datapoint::Structured(d) => &d.function_name,
        }
    }

    pub fn source_inference_id(&self) -> Option<Uuid> {
        match self {
            Datapoint::Chat(d) => d.source_inference_id,
            Datapoint::Structured(d) => d.source_inference_id,
        }
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        match self {
            Datapoint::Chat(d) => d.updated_at,
            Datapoint::Structured(d) => d.updated_at,
        }
    }

    pub fn staled_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Datapoint::Chat(d) => d.staled_at,
            Datapoint::Structured(d) => d.staled_at,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.staled_at().is_some()
    }

    /// Prepara la fila de una nueva versión: mismo id, `updated_at` fresco y
    /// sin `staled_at`.
    pub(crate) fn into_new_version(self, now: DateTime<Utc>) -> Self {
        match self {
            Datapoint::Chat(mut d) => {
                d.updated_at = now;
                d.staled_at = None;
                Datapoint::Chat(d)
            }
            Datapoint::Structured(mut d) => {
                d.updated_at = now;
                d.staled_at = None;
                Datapoint::Structured(d)
            }
        }
    }

    /// Versión retirada: mismo contenido, `updated_at = staled_at = now`.
    pub(crate) fn into_stale_version(self, now: DateTime<Utc>) -> Self {
        match self {
            Datapoint::Chat(mut d) => {
                d.updated_at = now;
                d.staled_at = Some(now);
                Datapoint::Chat(d)
            }
            Datapoint::Structured(mut d) => {
                d.updated_at = now;
                d.staled_at = Some(now);
                Datapoint::Structured(d)
            }
        }
    }
}

/// Forma de salida de un datapoint escrito a mano.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "function_kind", rename_all = "snake_case")]
pub enum OutputShape {
    Chat {
        #[serde(default)]
        tool_params: Option<Value>,
    },
    Structured { output_schema: Value },
}

/// Datapoint escrito a mano (sin inferencia de origen).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapointDraft {
    pub function_name: String,
    #[serde(default)]
    pub episode_id: Option<Uuid>,
    pub input: Value,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub tags: Tags,
    pub shape: OutputShape,
}

impl DatapointDraft {
    pub fn kind(&self) -> FunctionKind {
        match self.shape {
            OutputShape::Chat { .. } => FunctionKind::Chat,
            OutputShape::Structured { .. } => FunctionKind::Structured,
        }
    }

    /// Materializa el borrador como datapoint `is_custom` con id nuevo.
    pub fn into_datapoint(self, dataset_name: &str, id: Uuid, now: DateTime<Utc>) -> Datapoint {
        match self.shape {
            OutputShape::Chat { tool_params } => Datapoint::Chat(ChatDatapoint { dataset_name: dataset_name.to_string(),
                                                                                 function_name: self.function_name,
                                                                                 id,
                                                                                 episode_id: self.episode_id,
                                                                                 input: self.input,
                                                                                 output: self.output,
                                                                                 tool_params,
                                                                                 tags: self.tags,
                                                                                 auxiliary: String::new(),
                                                                                 is_deleted: false,
                                                                                 is_custom: true,
                                                                                 source_inference_id: None,
                                                                                 updated_at: now,
                                                                                 staled_at: None }),
            OutputShape::Structured { output_schema } => {
                Datapoint::Structured(StructuredDatapoint { dataset_name: dataset_name.to_string(),
                                                            function_name: self.function_name,
                                                            id,
                                                            episode_id: self.episode_id,
                                                            input: self.input,
                                                            output: self.output,
                                                            output_schema,
                                                            tags: self.tags,
                                                            auxiliary: String::new(),
                                                            is_deleted: false,
                                                            is_custom: true,
                                                            source_inference_id: None,
                                                            updated_at: now,
                                                            staled_at: None })
            }
        }
    }
}

/// Resumen por dataset: filas vivas y última escritura.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub dataset_name: String,
    pub count: u64,
    pub last_updated: DateTime<Utc>,
}

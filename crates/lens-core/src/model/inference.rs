//! Registros de inferencia (append-only) y episodios derivados.
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{Pageable, Tags};

/// Tipo de función del gateway. Cada variante vive en su propia tabla física
/// (inferencias y datapoints), resuelta vía configuración.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FunctionKind {
    Chat,
    Structured,
}

impl FunctionKind {
    pub const ALL: [FunctionKind; 2] = [FunctionKind::Chat, FunctionKind::Structured];

    pub fn as_str(&self) -> &'static str {
        match self {
            FunctionKind::Chat => "chat",
            FunctionKind::Structured => "structured",
        }
    }
}

impl fmt::Display for FunctionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fila del índice `inference_by_id`: lo mínimo para listar inferencias de
/// cualquier tipo ordenadas por id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceSummary {
    pub id: Uuid,
    pub function_name: String,
    pub variant_name: String,
    pub episode_id: Uuid,
    pub function_kind: FunctionKind,
    pub timestamp: DateTime<Utc>,
}

impl Pageable for InferenceSummary {
    fn page_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatInference {
    pub id: Uuid,
    pub function_name: String,
    pub variant_name: String,
    pub episode_id: Uuid,
    pub input: Value,
    pub output: Value,
    #[serde(default)]
    pub tool_params: Option<Value>,
    #[serde(default)]
    pub tags: Tags,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredInference {
    pub id: Uuid,
    pub function_name: String,
    pub variant_name: String,
    pub episode_id: Uuid,
    pub input: Value,
    pub output: Value,
    pub output_schema: Value,
    #[serde(default)]
    pub tags: Tags,
    pub timestamp: DateTime<Utc>,
}

/// Inferencia completa; la forma de la salida depende del tipo de función.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "function_kind", rename_all = "snake_case")]
pub enum InferenceRecord {
    Chat(ChatInference),
    Structured(StructuredInference),
}

impl InferenceRecord {
    pub fn id(&self) -> Uuid {
        match self {
            InferenceRecord::Chat(r) => r.id,
            InferenceRecord::Structured(r) => r.id,
        }
    }

    pub fn kind(&self) -> FunctionKind {
        match self {
            InferenceRecord::Chat(_) => FunctionKind::Chat,
            InferenceRecord::Structured(_) => FunctionKind::Structured,
        }
    }

    pub fn function_name(&self) -> &str {
        match self {
            InferenceRecord::Chat(r) => &r.function_name,
            InferenceRecord::Structured(r) => &r.function_name,
        }
    }

    pub fn episode_id(&self) -> Uuid {
        match self {
            InferenceRecord::Chat(r) => r.episode_id,
            InferenceRecord::Structured(r) => r.episode_id,
        }
    }
}

/// Episodio: agrupación virtual de inferencias con el mismo `episode_id`.
/// Nada de esto se almacena; se deriva agregando `inference_by_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeRecord {
    pub episode_id: Uuid,
    pub count: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub last_inference_id: Uuid,
}

impl Pageable for EpisodeRecord {
    fn page_id(&self) -> Uuid {
        self.episode_id
    }
}

//! Feedback asociado a inferencias o episodios.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{Pageable, Tags};

/// Tabla de feedback: métricas booleanas, flotantes o demostraciones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    Boolean,
    Float,
    Demonstration,
}

impl FeedbackKind {
    /// Columna que referencia al objetivo (inferencia o episodio).
    pub fn target_column(&self) -> &'static str {
        match self {
            FeedbackKind::Boolean | FeedbackKind::Float => "target_id",
            FeedbackKind::Demonstration => "inference_id",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BooleanFeedback {
    pub id: Uuid,
    pub target_id: Uuid,
    pub metric_name: String,
    pub value: bool,
    #[serde(default)]
    pub tags: Tags,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloatFeedback {
    pub id: Uuid,
    pub target_id: Uuid,
    pub metric_name: String,
    pub value: f64,
    #[serde(default)]
    pub tags: Tags,
    pub timestamp: DateTime<Utc>,
}

/// Demostración: salida "ideal" provista por un humano para una inferencia.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DemonstrationFeedback {
    pub id: Uuid,
    pub inference_id: Uuid,
    pub value: Value,
    #[serde(default)]
    pub tags: Tags,
    pub timestamp: DateTime<Utc>,
}

impl Pageable for BooleanFeedback {
    fn page_id(&self) -> Uuid {
        self.id
    }
}

impl Pageable for FloatFeedback {
    fn page_id(&self) -> Uuid {
        self.id
    }
}

impl Pageable for DemonstrationFeedback {
    fn page_id(&self) -> Uuid {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "feedback_kind", rename_all = "snake_case")]
pub enum FeedbackRecord {
    Boolean(BooleanFeedback),
    Float(FloatFeedback),
    Demonstration(DemonstrationFeedback),
}

impl Pageable for FeedbackRecord {
    fn page_id(&self) -> Uuid {
        match self {
            FeedbackRecord::Boolean(f) => f.id,
            FeedbackRecord::Float(f) => f.id,
            FeedbackRecord::Demonstration(f) => f.id,
        }
    }
}

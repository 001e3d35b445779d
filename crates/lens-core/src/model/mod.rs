//! Modelo de datos: registros inmutables del gateway, datapoints mutables por
//! reemplazo y tipos de paginación.

mod datapoint;
mod feedback;
mod inference;
mod page;

pub use datapoint::{ChatDatapoint, Datapoint, DatapointDraft, DatasetSummary, OutputShape, StructuredDatapoint};
pub use feedback::{BooleanFeedback, DemonstrationFeedback, FeedbackKind, FeedbackRecord, FloatFeedback};
pub use inference::{ChatInference, EpisodeRecord, FunctionKind, InferenceRecord, InferenceSummary, StructuredInference};
pub use page::{AdjacentIds, Bounds, Cursor, Page, PageRequest, Pageable};

/// Tags libres asociados a inferencias, feedback y datapoints.
pub type Tags = std::collections::BTreeMap<String, String>;

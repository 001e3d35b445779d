//! Navegación del flujo de inferencias: páginas por cursor, extremos y
//! vecinos, sobre inferencias, episodios y feedback.

mod adjacency;
mod bounds;
mod pagination;
mod records;
mod page_spec;

pub use adjacency::{get_adjacent_episode_ids, get_adjacent_ids, get_adjacent_inference_ids};
pub use bounds::{query_bounds, query_episode_bounds, query_feedback_bounds, query_inference_bounds};
pub use pagination::{query_episode_page, query_feedback_page, query_inference_page, query_page};
pub use records::{get_inference, latest_feedback_by_metric};
pub use page_spec::{PageSpec, RecordFilter};

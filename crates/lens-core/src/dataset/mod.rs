//! Datasets: selección de inferencias, materialización como datapoints y
//! ciclo de vida de cada datapoint.

mod builder;
mod lifecycle;
mod materialize;
mod names;

pub use builder::{build_selection, count_rows, count_selection, DatasetQueryParams, MetricFilter, OutputSource};
pub use lifecycle::{get_datapoint, insert_datapoint, list_datasets, replace_datapoint, stale_datapoint};
pub use materialize::{build_materialization, materialize, MaterializeParams};
pub use names::validate_dataset_name;

use crate::constants::{RESERVED_DATASET_NAMES, RESERVED_NAMESPACE_PREFIX};
use crate::errors::LensError;

/// Rechaza nombres vacíos, reservados o dentro del espacio interno.
pub fn validate_dataset_name(name: &str) -> Result<(), LensError> {
    let trimmed = name.trim();
    if trimmed.is_empty() || trimmed != name {
        return Err(LensError::InvalidDatasetName(name.to_string()));
    }
    if RESERVED_DATASET_NAMES.contains(&name) || name.starts_with(RESERVED_NAMESPACE_PREFIX) {
        return Err(LensError::InvalidDatasetName(name.to_string()));
    }
    Ok(())
}

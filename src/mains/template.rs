use super::PhaseSourceMainsOptions;
use crate::error::{BalancerError, Result};
use crate::reading::ReadingSource;

/// One expression per phase, rendered on every update
pub(super) fn phase_sources(options: &PhaseSourceMainsOptions) -> Result<[ReadingSource; 3]> {
    if options.phase_sources().iter().any(|t| t.trim().is_empty()) {
        return Err(BalancerError::config("Mains phase templates cannot be empty"));
    }
    Ok(options.phase_sources().map(ReadingSource::template))
}

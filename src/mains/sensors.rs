use super::PhaseSourceMainsOptions;
use crate::error::{BalancerError, Result};
use crate::host::Host;
use crate::reading::ReadingSource;

/// Explicit sensor entities, which must exist when the mains is built
pub(super) async fn phase_sources<H: Host + ?Sized>(
    host: &H,
    options: &PhaseSourceMainsOptions,
) -> Result<[ReadingSource; 3]> {
    for entity_id in options.phase_sources() {
        if host.get_state(entity_id).await?.is_none() {
            return Err(BalancerError::setup(format!(
                "Mains sensor {} does not exist",
                entity_id
            )));
        }
    }
    Ok(options.phase_sources().map(ReadingSource::entity))
}

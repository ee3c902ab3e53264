//! Meter device exposing one `*_current_*N` sensor per phase

use crate::error::{BalancerError, Result};
use crate::host::Host;
use crate::reading::ReadingSource;

/// Find the per-phase current sensors of a meter device
pub(super) async fn phase_sources<H: Host + ?Sized>(
    host: &H,
    device_id: &str,
) -> Result<[ReadingSource; 3]> {
    let entities = host.device_entities(device_id).await?;
    let find = |suffix: char| {
        entities
            .iter()
            .find(|e| e.contains("_current") && e.ends_with(suffix))
            .map(ReadingSource::entity)
            .ok_or_else(|| {
                BalancerError::setup(format!(
                    "Device {} has no current sensor for phase {}",
                    device_id, suffix
                ))
            })
    };
    Ok([find('1')?, find('2')?, find('3')?])
}

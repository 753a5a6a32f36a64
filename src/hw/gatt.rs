use tracing::instrument;

use super::model::{CharacteristicInfo, ServiceInfo};
use crate::config::GattRequirement;
use crate::error::LinkError;

/// Resolves the notify characteristic required for streaming.
///
/// # Errors
///
/// Returns an error when the service or characteristic is missing, or when
/// the characteristic cannot notify.
#[instrument(skip_all, level = "debug", fields(service_count = services.len()))]
pub(crate) fn negotiate_notify_endpoint<'a>(
    services: &'a [ServiceInfo],
    requirement: &GattRequirement,
) -> Result<&'a CharacteristicInfo, LinkError> {
    let service = services
        .iter()
        .find(|service| service.uuid().eq_ignore_ascii_case(requirement.service_uuid()))
        .ok_or_else(|| LinkError::MissingService {
            uuid: requirement.service_uuid().to_string(),
        })?;

    let characteristic = service
        .characteristic(requirement.characteristic_uuid())
        .ok_or_else(|| LinkError::MissingCharacteristic {
            uuid: requirement.characteristic_uuid().to_string(),
        })?;

    if !characteristic.supports_notify() {
        return Err(LinkError::NotifyUnsupported {
            uuid: characteristic.uuid().to_string(),
        });
    }

    Ok(characteristic)
}

//! Zone to region mapping

use crate::error::{CoreError, Result};

/// Region of an ali zone.
///
/// Zones are either `<region>-<letter>` (`cn-qingdao-b`) or
/// `<region><letter>` (`ap-southeast-1a`).
pub fn ali_region_from_zone(zone: &str) -> Result<String> {
    if let Some((region, suffix)) = zone.rsplit_once('-') {
        if suffix.len() == 1 && suffix.chars().all(|c| c.is_ascii_lowercase()) {
            if region.is_empty() {
                return Err(CoreError::InvalidZone(zone.to_string()));
            }
            return Ok(region.to_string());
        }
    }

    let trimmed = zone.trim_end_matches(|c: char| c.is_ascii_lowercase());
    if trimmed.len() == zone.len() || !trimmed.ends_with(|c: char| c.is_ascii_digit()) {
        return Err(CoreError::InvalidZone(zone.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Location of an azure zone, which must be exactly `<location>-<n>`.
pub fn azure_location_from_zone(zone: &str) -> Result<String> {
    let parts: Vec<&str> = zone.split('-').collect();
    match parts.as_slice() {
        [location, number]
            if !location.is_empty()
                && !number.is_empty()
                && number.chars().all(|c| c.is_ascii_digit()) =>
        {
            Ok(location.to_string())
        }
        _ => Err(CoreError::InvalidZone(zone.to_string())),
    }
}

/// Availability-zone number of an azure zone (`eastus-1` → `1`)
pub fn azure_zone_number(zone: &str) -> Result<String> {
    azure_location_from_zone(zone)?;
    zone.rsplit_once('-')
        .map(|(_, n)| n.to_string())
        .ok_or_else(|| CoreError::InvalidZone(zone.to_string()))
}

//! Fixed control-plane ports

use std::ops::RangeInclusive;

/// Controller bootstrap gRPC
pub const CONTROLLER_BOOTSTRAP: u16 = 3992;

/// DNS controller and gossip
pub const DNS_GOSSIP: [RangeInclusive<u16>; 2] = [3993..=3994, 3998..=4000];

/// etcd manager gRPC and quarantine
pub const ETCD_MANAGER: RangeInclusive<u16> = 3994..=3997;

pub const SSH: u16 = 22;

/// API listener front-end port
pub const API_FRONTEND: u16 = 443;

/// API listener back-end port
pub const API_BACKEND: u16 = 443;

pub const ETCD_CLIENT: u16 = 4001;

/// Every reserved range, including the single bootstrap port
pub fn reserved_ranges() -> Vec<RangeInclusive<u16>> {
    let mut ranges = vec![CONTROLLER_BOOTSTRAP..=CONTROLLER_BOOTSTRAP];
    ranges.extend(DNS_GOSSIP.iter().cloned());
    ranges.push(ETCD_MANAGER);
    ranges
}

pub fn is_reserved(port: u16) -> bool {
    reserved_ranges().iter().any(|r| r.contains(&port))
}

/// Whether `[start, end]` touches any reserved port
pub fn overlaps_reserved(start: u32, end: u32) -> bool {
    reserved_ranges()
        .iter()
        .any(|r| start <= *r.end() as u32 && end >= *r.start() as u32)
}

//! Shapes store memberships into the per-user and per-device address views.

use std::net::IpAddr;

use ipnetwork::IpNetwork;
use ipwarden_types::ips::{DeviceIps, DeviceLocationIps, LocationDevices, SplitIp};

use crate::db::DeviceAddresses;
use crate::net;

/// Split every address against the location network containing it. Addresses
/// that no longer fall inside any location network are left out.
fn split_all(addresses: &[IpAddr], location_address: &[IpNetwork]) -> Vec<SplitIp> {
    addresses
        .iter()
        .filter_map(|ip| {
            location_address
                .iter()
                .find(|net| net.contains(*ip))
                .map(|net| net::split_ip(*ip, net))
        })
        .collect()
}

/// Group memberships by location. Rows must arrive ordered by location.
pub fn user_view(rows: Vec<DeviceAddresses>) -> Vec<LocationDevices> {
    let mut locations: Vec<LocationDevices> = Vec::new();

    for row in rows {
        let device = DeviceIps {
            device_id: row.device_id,
            device_name: row.device_name,
            wireguard_ips: split_all(&row.addresses, &row.location_address),
        };

        match locations.last_mut() {
            Some(loc) if loc.location_id == row.location_id => loc.devices.push(device),
            _ => locations.push(LocationDevices {
                location_id: row.location_id,
                location_name: row.location_name,
                devices: vec![device],
            }),
        }
    }

    locations
}

pub fn device_view(rows: Vec<DeviceAddresses>) -> Vec<DeviceLocationIps> {
    rows.into_iter()
        .map(|row| DeviceLocationIps {
            wireguard_ips: split_all(&row.addresses, &row.location_address),
            location_id: row.location_id,
            location_name: row.location_name,
        })
        .collect()
}

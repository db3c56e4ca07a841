// Copyright (C) 2025 Joseph Sacchini
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the Free
// Software Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License for more
// details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Per-location WireGuard address views and assignment requests.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An address split into the part fixed by the location network and the part
/// an administrator may edit.
///
/// `network_part` followed by `modifiable_part` always spells `ip`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitIp {
    /// The full address.
    pub ip: String,
    /// Leading segments shared by every address of the network, delimiter included.
    pub network_part: String,
    /// Remaining segments.
    pub modifiable_part: String,
    /// Prefix length of the containing network.
    pub network_prefix: String,
}

/// Addresses of one device inside a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIps {
    /// Device identifier.
    pub device_id: Uuid,
    /// Device name.
    pub device_name: String,
    /// Current addresses, ascending.
    pub wireguard_ips: Vec<SplitIp>,
}

/// A location with every device of one user that participates in it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationDevices {
    /// Location identifier.
    pub location_id: Uuid,
    /// Location name.
    pub location_name: String,
    /// Devices ordered by name.
    pub devices: Vec<DeviceIps>,
}

/// A location one device participates in, with that device's addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLocationIps {
    /// Location identifier.
    pub location_id: Uuid,
    /// Location name.
    pub location_name: String,
    /// Current addresses, ascending.
    pub wireguard_ips: Vec<SplitIp>,
}

/// Response of the per-user address view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIpsResponse {
    /// Locations ordered by name.
    pub locations: Vec<LocationDevices>,
}

/// Response of the per-device address view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIpsResponse {
    /// Locations ordered by name.
    pub locations: Vec<DeviceLocationIps>,
}

/// Request body for checking a single candidate address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateIpRequest {
    /// Device the address is meant for.
    pub device_id: Uuid,
    /// Location identifier.
    pub location: Uuid,
    /// Candidate address as typed by the user.
    pub ip: String,
}

/// One entry of a batch assignment. An empty `ips` list (after trimming)
/// clears the device's addresses in that location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpAssignment {
    /// Device identifier.
    pub device_id: Uuid,
    /// Location identifier.
    pub location_id: Uuid,
    /// Full addresses to hold in the location.
    #[serde(default)]
    pub ips: Vec<String>,
}

/// An address in use inside a location pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InUseAddress {
    /// The address.
    pub ip: String,
    /// Device holding it.
    pub device_id: Uuid,
}

/// Response of the pool state endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStateResponse {
    /// Location identifier.
    pub location_id: Uuid,
    /// Location networks in CIDR notation.
    pub address: Vec<String>,
    /// Addresses in use, ascending.
    pub in_use: Vec<InUseAddress>,
}

/// Response of the next-free-address endpoint: one address per location network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextAvailableResponse {
    /// Location identifier.
    pub location_id: Uuid,
    /// Lowest free address of each network, in network order.
    pub addresses: Vec<String>,
}

/// Why a candidate address was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum Rejection {
    /// Not an IPv4 or IPv6 address.
    #[error("not a valid IP address")]
    MalformedAddress,

    /// Not inside any network of the location.
    #[error("address is outside the location network")]
    OutOfRange,

    /// Network, broadcast or gateway address.
    #[error("address is reserved")]
    ReservedAddress,

    /// Held by another device in the same location.
    #[error("address is already assigned to another device")]
    Collision,
}

/// Error body returned by every failing endpoint. The rejected triple is
/// only present for address rejections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human readable message, safe to show to the user as-is.
    pub error: String,
    /// Device of the rejected entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<Uuid>,
    /// Location of the rejected entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_id: Option<Uuid>,
    /// Rejected address, as submitted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Machine readable rejection reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<Rejection>,
}

impl ErrorResponse {
    /// An error without an attached address triple.
    pub fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            device_id: None,
            location_id: None,
            address: None,
            reason: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Rejection::MalformedAddress, "\"malformed_address\"" ; "malformed")]
    #[test_case(Rejection::OutOfRange, "\"out_of_range\"" ; "out of range")]
    #[test_case(Rejection::ReservedAddress, "\"reserved_address\"" ; "reserved")]
    #[test_case(Rejection::Collision, "\"collision\"" ; "collision")]
    fn rejection_wire_name(reason: Rejection, expected: &str) {
        assert_eq!(serde_json::to_string(&reason).unwrap(), expected);
    }

    #[test]
    fn plain_error_omits_triple() {
        let json = serde_json::to_string(&ErrorResponse::message("not found")).unwrap();
        assert_eq!(json, r#"{"error":"not found"}"#);
    }

    #[test]
    fn assignment_without_ips_means_unassign() {
        let id = Uuid::new_v4();
        let body = format!(r#"{{"device_id":"{id}","location_id":"{id}"}}"#);
        let entry: IpAssignment = serde_json::from_str(&body).unwrap();
        assert!(entry.ips.is_empty());
    }

    #[test]
    fn validate_request_uses_location_field() {
        let id = Uuid::new_v4();
        let body = format!(r#"{{"device_id":"{id}","location":"{id}","ip":"10.0.0.5"}}"#);
        let req: ValidateIpRequest = serde_json::from_str(&body).unwrap();
        assert_eq!(req.location, id);
        assert_eq!(req.ip, "10.0.0.5");
    }
}

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

//! CIDR math for location networks.
//!
//! A location network is stored the way an administrator types it: the host
//! part of `10.10.0.1/24` is the gateway's own address and the pool is
//! `10.10.0.0/24`.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;
use ipwarden_types::ips::SplitIp;

// ---------------------------------------------------------------------------
// Bounds
// ---------------------------------------------------------------------------

fn from_u128(net: &IpNetwork, n: u128) -> IpAddr {
    match net {
        // n never exceeds the v4 broadcast address
        IpNetwork::V4(_) => IpAddr::V4(Ipv4Addr::from(n as u32)),
        IpNetwork::V6(_) => IpAddr::V6(Ipv6Addr::from(n)),
    }
}

/// First and last address of the network as integers.
fn bounds(net: &IpNetwork) -> (u128, u128) {
    let (first, host_bits) = match net {
        IpNetwork::V4(v4) => (u128::from(u32::from(v4.network())), 32 - u32::from(v4.prefix())),
        IpNetwork::V6(v6) => (u128::from(v6.network()), 128 - u32::from(v6.prefix())),
    };
    let span = if host_bits >= 128 {
        u128::MAX
    } else {
        (1u128 << host_bits) - 1
    };
    (first, first | span)
}

/// Last address of the network (the IPv4 broadcast address).
pub fn last_address(net: &IpNetwork) -> IpAddr {
    from_u128(net, bounds(net).1)
}

// ---------------------------------------------------------------------------
// Reserved addresses
// ---------------------------------------------------------------------------

/// Point-to-point sized networks (/31, /32, /127, /128) have no network or
/// broadcast address to give up.
fn has_network_address(net: &IpNetwork) -> bool {
    match net {
        IpNetwork::V4(v4) => v4.prefix() <= 30,
        IpNetwork::V6(v6) => v6.prefix() <= 126,
    }
}

fn has_broadcast_address(net: &IpNetwork) -> bool {
    matches!(net, IpNetwork::V4(v4) if v4.prefix() <= 30)
}

/// The gateway address, when the network was given with a host part.
pub fn gateway_address(net: &IpNetwork) -> Option<IpAddr> {
    let ip = net.ip();
    (ip != net.network()).then_some(ip)
}

pub fn is_reserved(net: &IpNetwork, ip: IpAddr) -> bool {
    if gateway_address(net) == Some(ip) {
        return true;
    }
    if has_network_address(net) && ip == net.network() {
        return true;
    }
    has_broadcast_address(net) && ip == last_address(net)
}

// ---------------------------------------------------------------------------
// Allocation
// ---------------------------------------------------------------------------

/// Lowest assignable address of `net` not present in `in_use`.
pub fn first_free(net: &IpNetwork, in_use: &BTreeSet<IpAddr>) -> Option<IpAddr> {
    let (first, last) = bounds(net);
    (first..=last)
        .map(|n| from_u128(net, n))
        .find(|ip| !is_reserved(net, *ip) && !in_use.contains(ip))
}

// ---------------------------------------------------------------------------
// Network / modifiable split
// ---------------------------------------------------------------------------

fn segments(ip: IpAddr) -> Vec<u16> {
    match ip {
        IpAddr::V4(v4) => v4.octets().iter().map(|o| u16::from(*o)).collect(),
        IpAddr::V6(v6) => v6.segments().to_vec(),
    }
}

/// Split `ip` at the first segment that varies between hosts of `net`.
///
/// IPv4 segments are decimal octets joined by `.`; IPv6 segments are 16-bit
/// groups printed as four hex digits and joined by `:`. A single-address
/// network keeps its last segment modifiable so the two halves still spell a
/// valid address.
pub fn split_ip(ip: IpAddr, net: &IpNetwork) -> SplitIp {
    let (delimiter, v4) = if ip.is_ipv4() { (".", true) } else { (":", false) };
    let fmt_segment = |s: &u16| if v4 { s.to_string() } else { format!("{s:04x}") };

    let ip_segments = segments(ip);
    let first_segments = segments(net.network());
    let last_segments = segments(last_address(net));

    let boundary = first_segments
        .iter()
        .zip(&last_segments)
        .position(|(a, b)| a != b)
        .unwrap_or(ip_segments.len() - 1);

    let (fixed, modifiable) = ip_segments.split_at(boundary);

    let mut network_part = String::new();
    for segment in fixed {
        network_part.push_str(&fmt_segment(segment));
        network_part.push_str(delimiter);
    }
    let modifiable_part = modifiable
        .iter()
        .map(fmt_segment)
        .collect::<Vec<_>>()
        .join(delimiter);

    SplitIp {
        ip: ip.to_string(),
        network_part,
        modifiable_part,
        network_prefix: net.prefix().to_string(),
    }
}

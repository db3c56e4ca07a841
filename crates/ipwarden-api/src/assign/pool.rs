use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use ipwarden_types::ips::{InUseAddress, PoolStateResponse, Rejection};
use uuid::Uuid;

use super::AssignmentError;
use crate::net;

/// Everything known about one location's address pool at a point in time:
/// its networks, who holds which address and which devices are members.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolState {
    pub location_id: Uuid,
    pub address: Vec<IpNetwork>,
    pub assigned: BTreeMap<IpAddr, Uuid>,
    pub members: BTreeSet<Uuid>,
}

/// Parse a candidate the way it was typed, surrounding whitespace aside.
pub fn parse_candidate(candidate: &str) -> Result<IpAddr, Rejection> {
    candidate
        .trim()
        .parse()
        .map_err(|_| Rejection::MalformedAddress)
}

impl PoolState {
    pub fn new(location_id: Uuid, address: Vec<IpNetwork>) -> Self {
        Self {
            location_id,
            address,
            assigned: BTreeMap::new(),
            members: BTreeSet::new(),
        }
    }

    /// The location network `ip` falls into, if any.
    pub fn containing_network(&self, ip: IpAddr) -> Option<&IpNetwork> {
        self.address.iter().find(|net| net.contains(ip))
    }

    pub fn is_member(&self, device_id: Uuid) -> bool {
        self.members.contains(&device_id)
    }

    pub fn holder(&self, ip: IpAddr) -> Option<Uuid> {
        self.assigned.get(&ip).copied()
    }

    /// Range and reserved-address rules, without looking at who holds what.
    pub fn check_range(&self, ip: IpAddr) -> Result<(), Rejection> {
        let net = self.containing_network(ip).ok_or(Rejection::OutOfRange)?;
        if net::is_reserved(net, ip) {
            return Err(Rejection::ReservedAddress);
        }
        Ok(())
    }

    /// Full rule set for handing `ip` to `device_id`. An address the device
    /// already holds is accepted.
    pub fn check(&self, device_id: Uuid, ip: IpAddr) -> Result<(), Rejection> {
        self.check_range(ip)?;
        match self.holder(ip) {
            Some(holder) if holder != device_id => Err(Rejection::Collision),
            _ => Ok(()),
        }
    }

    /// Lowest free address of every location network, in network order.
    pub fn next_available(&self) -> Result<Vec<IpAddr>, AssignmentError> {
        let in_use: BTreeSet<IpAddr> = self.assigned.keys().copied().collect();
        self.address
            .iter()
            .map(|net| {
                net::first_free(net, &in_use)
                    .ok_or(AssignmentError::PoolExhausted { network: *net })
            })
            .collect()
    }

    pub fn to_response(&self) -> PoolStateResponse {
        PoolStateResponse {
            location_id: self.location_id,
            address: self.address.iter().map(ToString::to_string).collect(),
            in_use: self
                .assigned
                .iter()
                .map(|(ip, device_id)| InUseAddress {
                    ip: ip.to_string(),
                    device_id: *device_id,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn pool(cidrs: &[&str]) -> PoolState {
        PoolState::new(
            Uuid::nil(),
            cidrs.iter().map(|c| c.parse().unwrap()).collect(),
        )
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test_case("10.10.0.5", Ok(()) ; "host inside")]
    #[test_case("10.10.1.5", Err(Rejection::OutOfRange) ; "other subnet")]
    #[test_case("fd00::5", Err(Rejection::OutOfRange) ; "wrong family")]
    #[test_case("10.10.0.0", Err(Rejection::ReservedAddress) ; "network address")]
    #[test_case("10.10.0.255", Err(Rejection::ReservedAddress) ; "broadcast")]
    fn test_check_empty_pool(addr: &str, expected: Result<(), Rejection>) {
        assert_eq!(pool(&["10.10.0.0/24"]).check(Uuid::new_v4(), ip(addr)), expected);
    }

    #[test]
    fn test_check_collision_only_for_other_devices() {
        let mut p = pool(&["10.10.0.0/24"]);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        p.assigned.insert(ip("10.10.0.5"), a);

        assert_eq!(p.check(a, ip("10.10.0.5")), Ok(()));
        assert_eq!(p.check(b, ip("10.10.0.5")), Err(Rejection::Collision));
    }

    #[test]
    fn test_check_is_repeatable() {
        let mut p = pool(&["10.10.0.1/24"]);
        p.assigned.insert(ip("10.10.0.9"), Uuid::new_v4());
        let device = Uuid::new_v4();
        for addr in ["10.10.0.9", "10.10.0.10", "10.10.0.1"] {
            assert_eq!(p.check(device, ip(addr)), p.check(device, ip(addr)));
        }
        assert!(p.assigned.len() == 1, "check must not reserve anything");
    }

    #[test]
    fn test_dual_stack_checks_each_family() {
        let p = pool(&["10.10.0.1/24", "fd00::1/64"]);
        let device = Uuid::new_v4();
        assert_eq!(p.check(device, ip("fd00::20")), Ok(()));
        assert_eq!(p.check(device, ip("fd00::1")), Err(Rejection::ReservedAddress));
        assert_eq!(p.check(device, ip("10.10.0.20")), Ok(()));
    }

    #[test_case(" 10.0.0.4 ", Ok(ip("10.0.0.4")) ; "trimmed")]
    #[test_case("10.0.0.", Err(Rejection::MalformedAddress) ; "network part only")]
    #[test_case("10.0.0.4/24", Err(Rejection::MalformedAddress) ; "with prefix")]
    #[test_case("fd00::zz", Err(Rejection::MalformedAddress) ; "bad hex")]
    fn test_parse_candidate(input: &str, expected: Result<IpAddr, Rejection>) {
        assert_eq!(parse_candidate(input), expected);
    }

    #[test]
    fn test_next_available_per_network() {
        let mut p = pool(&["10.10.0.1/24", "fd00::1/64"]);
        p.assigned.insert(ip("10.10.0.2"), Uuid::new_v4());
        assert_eq!(
            p.next_available().unwrap(),
            vec![ip("10.10.0.3"), ip("fd00::2")]
        );
    }

    #[test]
    fn test_next_available_exhausted() {
        let mut p = pool(&["10.10.0.1/30"]);
        p.assigned.insert(ip("10.10.0.2"), Uuid::new_v4());
        assert!(matches!(
            p.next_available(),
            Err(AssignmentError::PoolExhausted { .. })
        ));
    }

    #[test]
    fn test_response_lists_addresses_in_order() {
        let mut p = pool(&["10.10.0.0/24"]);
        let d = Uuid::new_v4();
        p.assigned.insert(ip("10.10.0.20"), d);
        p.assigned.insert(ip("10.10.0.3"), d);
        let resp = p.to_response();
        let ips: Vec<_> = resp.in_use.iter().map(|u| u.ip.as_str()).collect();
        assert_eq!(ips, vec!["10.10.0.3", "10.10.0.20"]);
        assert_eq!(resp.address, vec!["10.10.0.0/24"]);
    }
}

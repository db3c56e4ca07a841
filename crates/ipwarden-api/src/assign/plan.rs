//! Batch planning for the assignment committer.
//!
//! Planning is pure: it takes the pool state of every touched location
//! (loaded under the location locks) and either produces the writes for the
//! whole batch or the first failing entry. Nothing is written on failure.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;

use ipwarden_types::ips::{IpAssignment, Rejection};
use uuid::Uuid;

use super::pool::{parse_candidate, PoolState};
use super::AssignmentError;
use crate::db::Write;

/// A batch entry with blank addresses dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub device_id: Uuid,
    pub location_id: Uuid,
    pub addresses: Vec<String>,
}

impl Entry {
    /// No address left after trimming: clear the device's addresses.
    pub fn is_unassign(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// Trim addresses, drop empty ones and refuse repeated (device, location) pairs.
pub fn normalize(batch: Vec<IpAssignment>) -> Result<Vec<Entry>, AssignmentError> {
    let mut seen = HashSet::with_capacity(batch.len());
    let mut entries = Vec::with_capacity(batch.len());

    for assignment in batch {
        if !seen.insert((assignment.device_id, assignment.location_id)) {
            return Err(AssignmentError::DuplicateEntry {
                device_id: assignment.device_id,
                location_id: assignment.location_id,
            });
        }
        let addresses = assignment
            .ips
            .iter()
            .map(|ip| ip.trim())
            .filter(|ip| !ip.is_empty())
            .map(str::to_string)
            .collect();
        entries.push(Entry {
            device_id: assignment.device_id,
            location_id: assignment.location_id,
            addresses,
        });
    }

    Ok(entries)
}

/// Distinct locations touched by the batch, sorted. Locks are taken in this order.
pub fn touched_locations(entries: &[Entry]) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = entries.iter().map(|e| e.location_id).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn rejected(entry: &Entry, address: &str, reason: Rejection) -> AssignmentError {
    AssignmentError::Rejected {
        device_id: entry.device_id,
        location_id: entry.location_id,
        address: address.to_string(),
        reason,
    }
}

/// Validate the whole batch against `pools` and compute its writes.
///
/// Collisions are judged against the state the batch would leave behind:
/// every touched (device, location) pair first gives up its current
/// addresses, then the batch claims its own in submission order. Two entries
/// claiming one address collide even if neither held it before, while
/// devices swapping addresses inside one batch do not.
pub fn plan(
    entries: &[Entry],
    pools: &HashMap<Uuid, PoolState>,
) -> Result<Vec<Write>, AssignmentError> {
    // Pass 1: membership, syntax, range and reserved addresses.
    let mut parsed: Vec<Vec<(IpAddr, &str)>> = Vec::with_capacity(entries.len());
    for entry in entries {
        let pool = pools
            .get(&entry.location_id)
            .ok_or(AssignmentError::LocationNotFound)?;

        if !pool.is_member(entry.device_id) {
            return Err(AssignmentError::DeviceNotInLocation {
                device_id: entry.device_id,
                location_id: entry.location_id,
            });
        }

        let mut addresses: Vec<(IpAddr, &str)> = Vec::with_capacity(entry.addresses.len());
        for raw in &entry.addresses {
            let ip = parse_candidate(raw).map_err(|reason| rejected(entry, raw, reason))?;
            pool.check_range(ip)
                .map_err(|reason| rejected(entry, raw, reason))?;
            if !addresses.iter().any(|(seen, _)| *seen == ip) {
                addresses.push((ip, raw.as_str()));
            }
        }
        parsed.push(addresses);
    }

    // Pass 2: collisions against the final state.
    let mut final_state: HashMap<Uuid, BTreeMap<IpAddr, Uuid>> = HashMap::new();
    for entry in entries {
        let held = final_state
            .entry(entry.location_id)
            .or_insert_with(|| pools[&entry.location_id].assigned.clone());
        held.retain(|_, holder| *holder != entry.device_id);
    }

    for (entry, addresses) in entries.iter().zip(&parsed) {
        let held = final_state
            .get_mut(&entry.location_id)
            .ok_or(AssignmentError::LocationNotFound)?;
        for (ip, raw) in addresses {
            match held.get(ip) {
                Some(holder) if *holder != entry.device_id => {
                    return Err(rejected(entry, raw, Rejection::Collision));
                }
                _ => {
                    held.insert(*ip, entry.device_id);
                }
            }
        }
    }

    Ok(entries
        .iter()
        .zip(parsed)
        .map(|(entry, addresses)| Write::Replace {
            device_id: entry.device_id,
            location_id: entry.location_id,
            addresses: addresses.into_iter().map(|(ip, _)| ip).collect(),
        })
        .collect())
}

/// Writes for a device joining a location: membership plus the lowest free
/// address of every location network.
pub fn plan_join(
    device_id: Uuid,
    location_id: Uuid,
    pools: &HashMap<Uuid, PoolState>,
) -> Result<Vec<Write>, AssignmentError> {
    let pool = pools
        .get(&location_id)
        .ok_or(AssignmentError::LocationNotFound)?;

    if pool.is_member(device_id) {
        return Err(AssignmentError::AlreadyMember {
            device_id,
            location_id,
        });
    }

    Ok(vec![Write::Join {
        device_id,
        location_id,
        addresses: pool.next_available()?,
    }])
}

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

//! Per-location WireGuard address assignment.
//!
//! Validation is a plain read and never blocks. Every address write goes
//! through [`AssignmentService::apply_locked`], which serializes writers per
//! location (in-process mutexes plus row locks in the store) and retries a
//! conflicting transaction once.

pub mod plan;
pub mod pool;
pub mod view;

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use ipnetwork::IpNetwork;
use ipwarden_types::ips::{DeviceLocationIps, IpAssignment, LocationDevices, Rejection, SplitIp};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{AddressStore, Device, Location, StoreError, User, Write};
use crate::net;
use pool::PoolState;

/// A conflicting commit is attempted at most this many times.
pub const MAX_COMMIT_ATTEMPTS: usize = 2;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AssignmentError {
    #[error("{address}: {reason}")]
    Rejected {
        device_id: Uuid,
        location_id: Uuid,
        address: String,
        reason: Rejection,
    },

    #[error("no available addresses left in {network}")]
    PoolExhausted { network: IpNetwork },

    #[error("location not found")]
    LocationNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("device not found")]
    DeviceNotFound,

    #[error("device {device_id} is not part of location {location_id}")]
    DeviceNotInLocation { device_id: Uuid, location_id: Uuid },

    #[error("device {device_id} is already part of location {location_id}")]
    AlreadyMember { device_id: Uuid, location_id: Uuid },

    #[error("device {device_id} is listed more than once for location {location_id}")]
    DuplicateEntry { device_id: Uuid, location_id: Uuid },

    #[error("{0}")]
    Invalid(String),

    #[error("address pool was modified concurrently, please retry")]
    TransactionConflict,

    #[error(transparent)]
    Store(#[from] StoreError),
}

type Result<T> = std::result::Result<T, AssignmentError>;

fn parse_networks(address: &[String]) -> Result<Vec<IpNetwork>> {
    if address.is_empty() {
        return Err(AssignmentError::Invalid(
            "a location needs at least one network".into(),
        ));
    }

    let mut networks: Vec<IpNetwork> = Vec::with_capacity(address.len());
    for raw in address {
        let net: IpNetwork = raw
            .trim()
            .parse()
            .map_err(|_| AssignmentError::Invalid(format!("invalid network address: {raw}")))?;
        if networks
            .iter()
            .any(|other| other.contains(net.network()) || net.contains(other.network()))
        {
            return Err(AssignmentError::Invalid(format!(
                "network {net} overlaps another network of this location"
            )));
        }
        networks.push(net);
    }
    Ok(networks)
}

// ---------------------------------------------------------------------------
// AssignmentService
// ---------------------------------------------------------------------------

pub struct AssignmentService<S> {
    store: S,
    locks: DashMap<Uuid, Arc<Mutex<()>>>,
}

impl<S: AddressStore> AssignmentService<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // -- Locking -------------------------------------------------------------

    /// `ids` must be sorted so that overlapping callers lock in the same order.
    async fn lock_locations(&self, ids: &[Uuid]) -> Vec<OwnedMutexGuard<()>> {
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let mutex = self.locks.entry(*id).or_default().clone();
            guards.push(mutex.lock_owned().await);
        }
        guards
    }

    /// Drop lock entries nobody holds or waits on. Waiters keep a clone of
    /// the `Arc`, and cloning happens under the map's shard lock.
    fn release_locks(&self, ids: &[Uuid]) {
        for id in ids {
            self.locks
                .remove_if(id, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }

    /// Locations with a live lock entry.
    pub fn lock_count(&self) -> usize {
        self.locks.len()
    }

    async fn apply_locked<F>(&self, ids: &[Uuid], plan: F) -> Result<Vec<Write>>
    where
        F: Fn(&HashMap<Uuid, PoolState>) -> Result<Vec<Write>> + Send + Sync,
    {
        let guards = self.lock_locations(ids).await;
        let result = self.apply_with_retry(ids, &plan).await;
        drop(guards);
        self.release_locks(ids);
        result
    }

    async fn apply_with_retry<F>(&self, ids: &[Uuid], plan: &F) -> Result<Vec<Write>>
    where
        F: Fn(&HashMap<Uuid, PoolState>) -> Result<Vec<Write>> + Send + Sync,
    {
        let mut attempt = 1;
        loop {
            match self.store.apply(ids, plan).await {
                Err(AssignmentError::TransactionConflict) if attempt < MAX_COMMIT_ATTEMPTS => {
                    warn!(attempt, "address transaction conflict, retrying");
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    // -- Lookups -------------------------------------------------------------

    async fn user(&self, username: &str) -> Result<User> {
        self.store
            .get_user(username)
            .await?
            .ok_or(AssignmentError::UserNotFound)
    }

    /// A device that exists and belongs to `user`; anything else is not found.
    async fn owned_device(&self, user: &User, device_id: Uuid) -> Result<Device> {
        self.store
            .get_device(device_id)
            .await?
            .filter(|d| d.user_id == user.id)
            .ok_or(AssignmentError::DeviceNotFound)
    }

    // -- Locations -----------------------------------------------------------

    #[tracing::instrument(skip(self))]
    pub async fn create_location(&self, name: &str, address: &[String]) -> Result<Location> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AssignmentError::Invalid("location name is required".into()));
        }
        let networks = parse_networks(address)?;
        let location = self.store.create_location(name, &networks).await?;
        info!(location_id = %location.id, name = %location.name, "created location");
        Ok(location)
    }

    pub async fn get_location(&self, id: Uuid) -> Result<Location> {
        self.store
            .get_location(id)
            .await?
            .ok_or(AssignmentError::LocationNotFound)
    }

    pub async fn list_locations(&self) -> Result<Vec<Location>> {
        Ok(self.store.list_locations().await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_location(&self, id: Uuid) -> Result<()> {
        if !self.store.delete_location(id).await? {
            return Err(AssignmentError::LocationNotFound);
        }
        info!(location_id = %id, "deleted location");
        Ok(())
    }

    // -- Address pool registry -----------------------------------------------

    #[tracing::instrument(skip(self))]
    pub async fn pool_state(&self, location_id: Uuid) -> Result<PoolState> {
        self.store
            .load_pool(location_id)
            .await?
            .ok_or(AssignmentError::LocationNotFound)
    }

    #[tracing::instrument(skip(self))]
    pub async fn suggest_next_available(&self, location_id: Uuid) -> Result<Vec<IpAddr>> {
        self.pool_state(location_id).await?.next_available()
    }

    // -- Users and devices ---------------------------------------------------

    #[tracing::instrument(skip(self))]
    pub async fn create_user(&self, username: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AssignmentError::Invalid("username is required".into()));
        }
        Ok(self.store.create_user(username).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn create_device(&self, username: &str, name: &str) -> Result<Device> {
        let user = self.user(username).await?;
        let name = name.trim();
        if name.is_empty() {
            return Err(AssignmentError::Invalid("device name is required".into()));
        }
        Ok(self.store.create_device(user.id, name).await?)
    }

    #[tracing::instrument(skip(self))]
    pub async fn delete_device(&self, username: &str, device_id: Uuid) -> Result<()> {
        let user = self.user(username).await?;
        self.owned_device(&user, device_id).await?;
        self.store.delete_device(device_id).await?;
        info!(%device_id, "deleted device");
        Ok(())
    }

    /// Add the device to a location and hand it the lowest free address of
    /// every location network.
    #[tracing::instrument(skip(self))]
    pub async fn join_location(
        &self,
        username: &str,
        device_id: Uuid,
        location_id: Uuid,
    ) -> Result<Vec<IpAddr>> {
        let user = self.user(username).await?;
        self.owned_device(&user, device_id).await?;

        let writes = self
            .apply_locked(&[location_id], |pools| {
                plan::plan_join(device_id, location_id, pools)
            })
            .await?;

        let addresses: Vec<IpAddr> = writes
            .into_iter()
            .flat_map(|write| match write {
                Write::Join { addresses, .. } | Write::Replace { addresses, .. } => addresses,
            })
            .collect();
        info!(%device_id, %location_id, ?addresses, "device joined location");
        Ok(addresses)
    }

    #[tracing::instrument(skip(self))]
    pub async fn leave_location(
        &self,
        username: &str,
        device_id: Uuid,
        location_id: Uuid,
    ) -> Result<()> {
        let user = self.user(username).await?;
        self.owned_device(&user, device_id).await?;
        self.get_location(location_id).await?;

        if !self.store.leave_location(device_id, location_id).await? {
            return Err(AssignmentError::DeviceNotInLocation {
                device_id,
                location_id,
            });
        }
        info!(%device_id, %location_id, "device left location");
        Ok(())
    }

    // -- Validator -----------------------------------------------------------

    /// Check a candidate address without reserving it. Concurrent commits may
    /// still take the address before it is submitted.
    #[tracing::instrument(skip(self))]
    pub async fn validate(
        &self,
        username: &str,
        device_id: Uuid,
        location_id: Uuid,
        candidate: &str,
    ) -> Result<SplitIp> {
        let user = self.user(username).await?;
        self.owned_device(&user, device_id).await?;
        let pool = self.pool_state(location_id).await?;

        let result = pool::parse_candidate(candidate).and_then(|ip| {
            pool.check(device_id, ip)?;
            pool.containing_network(ip)
                .map(|net| net::split_ip(ip, net))
                .ok_or(Rejection::OutOfRange)
        });

        match &result {
            Ok(split) => debug!(ip = %split.ip, "address is valid"),
            Err(reason) => debug!(%reason, "address rejected"),
        }

        result.map_err(|reason| AssignmentError::Rejected {
            device_id,
            location_id,
            address: candidate.trim().to_string(),
            reason,
        })
    }

    // -- Committer -----------------------------------------------------------

    /// Apply a batch of assignments for one user's devices, all or nothing.
    /// Returns the user's address view after the commit.
    #[tracing::instrument(skip(self, batch), fields(entries = batch.len()))]
    pub async fn commit(
        &self,
        username: &str,
        batch: Vec<IpAssignment>,
    ) -> Result<Vec<LocationDevices>> {
        let user = self.user(username).await?;
        let entries = plan::normalize(batch)?;

        let mut checked = HashSet::new();
        for entry in &entries {
            if checked.insert(entry.device_id) {
                self.owned_device(&user, entry.device_id).await?;
            }
        }

        if !entries.is_empty() {
            let ids = plan::touched_locations(&entries);
            let writes = self
                .apply_locked(&ids, |pools| plan::plan(&entries, pools))
                .await?;
            info!(
                user = %user.username,
                writes = writes.len(),
                locations = ids.len(),
                "committed address assignments"
            );
        }

        self.view_for(&user).await
    }

    // -- Query facade --------------------------------------------------------

    async fn view_for(&self, user: &User) -> Result<Vec<LocationDevices>> {
        let rows = self.store.user_addresses(user.id).await?;
        Ok(view::user_view(rows))
    }

    #[tracing::instrument(skip(self))]
    pub async fn user_view(&self, username: &str) -> Result<Vec<LocationDevices>> {
        let user = self.user(username).await?;
        self.view_for(&user).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn device_view(
        &self,
        username: &str,
        device_id: Uuid,
    ) -> Result<Vec<DeviceLocationIps>> {
        let user = self.user(username).await?;
        self.owned_device(&user, device_id).await?;
        let rows = self.store.device_addresses(device_id).await?;
        Ok(view::device_view(rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test_case(&["10.10.0.1/24"] ; "single v4")]
    #[test_case(&["10.10.0.1/24", "fd00::1/64"] ; "dual stack")]
    #[test_case(&[" 10.10.0.1/24 "] ; "whitespace")]
    #[test_case(&["10.10.0.1"] ; "no prefix is a host network")]
    fn test_parse_networks_ok(input: &[&str]) {
        assert_eq!(parse_networks(&strings(input)).unwrap().len(), input.len());
    }

    #[test_case(&[] ; "empty")]
    #[test_case(&["10.10.0.1/33"] ; "bad prefix")]
    #[test_case(&["not-a-cidr"] ; "garbage")]
    #[test_case(&["10.10.0.1/24", "10.10.0.128/25"] ; "overlap")]
    fn test_parse_networks_invalid(input: &[&str]) {
        let result = parse_networks(&strings(input));
        assert!(matches!(result, Err(AssignmentError::Invalid(_))));
    }
}

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::IpAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use ipnetwork::IpNetwork;
use uuid::Uuid;

use ipwarden_api::assign::pool::PoolState;
use ipwarden_api::assign::{AssignmentError, AssignmentService};
use ipwarden_api::db::{
    AddressStore, Device, DeviceAddresses, Location, Result, StoreError, User, Write,
};
use ipwarden_types::ips::{IpAssignment, LocationDevices};

// -- In-memory store --
// Mirrors the Postgres schema: one holder per (location, ip), addresses only
// for members, cascading deletes. Constraint violations surface the way the
// Postgres store classifies them, as transaction conflicts.

#[derive(Default, Clone)]
struct State {
    locations: Vec<Location>,
    users: Vec<User>,
    devices: Vec<Device>,
    members: BTreeSet<(Uuid, Uuid)>,
    addresses: BTreeMap<(Uuid, IpAddr), Uuid>,
}

impl State {
    fn pool(&self, location_id: Uuid) -> Option<PoolState> {
        let location = self.locations.iter().find(|l| l.id == location_id)?;
        let mut pool = PoolState::new(location.id, location.address.clone());
        for ((loc, ip), device) in &self.addresses {
            if *loc == location_id {
                pool.assigned.insert(*ip, *device);
            }
        }
        for (loc, device) in &self.members {
            if *loc == location_id {
                pool.members.insert(*device);
            }
        }
        Some(pool)
    }

    fn membership(&self, location_id: Uuid, device_id: Uuid) -> Option<DeviceAddresses> {
        let location = self.locations.iter().find(|l| l.id == location_id)?;
        let device = self.devices.iter().find(|d| d.id == device_id)?;
        Some(DeviceAddresses {
            location_id,
            location_name: location.name.clone(),
            location_address: location.address.clone(),
            device_id,
            device_name: device.name.clone(),
            addresses: self
                .addresses
                .iter()
                .filter(|((loc, _), holder)| *loc == location_id && **holder == device_id)
                .map(|((_, ip), _)| *ip)
                .collect(),
        })
    }

    fn remove_membership(&mut self, location_id: Uuid, device_id: Uuid) -> bool {
        self.addresses
            .retain(|(loc, _), holder| !(*loc == location_id && *holder == device_id));
        self.members.remove(&(location_id, device_id))
    }

    fn write(&mut self, write: &Write) -> std::result::Result<(), AssignmentError> {
        let (device_id, location_id, addresses) = match write {
            Write::Join {
                device_id,
                location_id,
                addresses,
            } => {
                if !self.members.insert((*location_id, *device_id)) {
                    return Err(AssignmentError::TransactionConflict);
                }
                (device_id, location_id, addresses)
            }
            Write::Replace {
                device_id,
                location_id,
                addresses,
            } => {
                if !addresses.is_empty() && !self.members.contains(&(*location_id, *device_id)) {
                    return Err(AssignmentError::TransactionConflict);
                }
                self.addresses
                    .retain(|(loc, _), holder| !(loc == location_id && holder == device_id));
                (device_id, location_id, addresses)
            }
        };
        for ip in addresses {
            if self.addresses.contains_key(&(*location_id, *ip)) {
                return Err(AssignmentError::TransactionConflict);
            }
            self.addresses.insert((*location_id, *ip), *device_id);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    conflicts: AtomicUsize,
    applies: AtomicUsize,
}

impl MemoryStore {
    /// Make the next `n` calls to `apply` fail with a transaction conflict.
    pub fn fail_next_applies(&self, n: usize) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    pub fn apply_calls(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }

    pub fn address_count(&self) -> usize {
        self.state.lock().unwrap().addresses.len()
    }
}

impl AddressStore for MemoryStore {
    async fn create_location(&self, name: &str, address: &[IpNetwork]) -> Result<Location> {
        let mut state = self.state.lock().unwrap();
        if state.locations.iter().any(|l| l.name == name) {
            return Err(StoreError::DuplicateLocationName);
        }
        let now = Utc::now();
        let location = Location {
            id: Uuid::new_v4(),
            name: name.to_string(),
            address: address.to_vec(),
            created_at: now,
            updated_at: now,
        };
        state.locations.push(location.clone());
        Ok(location)
    }

    async fn get_location(&self, id: Uuid) -> Result<Option<Location>> {
        let state = self.state.lock().unwrap();
        Ok(state.locations.iter().find(|l| l.id == id).cloned())
    }

    async fn list_locations(&self) -> Result<Vec<Location>> {
        let mut locations = self.state.lock().unwrap().locations.clone();
        locations.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(locations)
    }

    async fn delete_location(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let before = state.locations.len();
        state.locations.retain(|l| l.id != id);
        state.members.retain(|(loc, _)| *loc != id);
        state.addresses.retain(|(loc, _), _| *loc != id);
        Ok(state.locations.len() != before)
    }

    async fn create_user(&self, username: &str) -> Result<User> {
        let mut state = self.state.lock().unwrap();
        if state.users.iter().any(|u| u.username == username) {
            return Err(StoreError::DuplicateUsername);
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            created_at: now,
            updated_at: now,
        };
        state.users.push(user.clone());
        Ok(user)
    }

    async fn get_user(&self, username: &str) -> Result<Option<User>> {
        let state = self.state.lock().unwrap();
        Ok(state.users.iter().find(|u| u.username == username).cloned())
    }

    async fn create_device(&self, user_id: Uuid, name: &str) -> Result<Device> {
        let mut state = self.state.lock().unwrap();
        if state
            .devices
            .iter()
            .any(|d| d.user_id == user_id && d.name == name)
        {
            return Err(StoreError::DuplicateDeviceName);
        }
        let now = Utc::now();
        let device = Device {
            id: Uuid::new_v4(),
            user_id,
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        };
        state.devices.push(device.clone());
        Ok(device)
    }

    async fn get_device(&self, id: Uuid) -> Result<Option<Device>> {
        let state = self.state.lock().unwrap();
        Ok(state.devices.iter().find(|d| d.id == id).cloned())
    }

    async fn delete_device(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let before = state.devices.len();
        state.devices.retain(|d| d.id != id);
        state.members.retain(|(_, device)| *device != id);
        state.addresses.retain(|_, holder| *holder != id);
        Ok(state.devices.len() != before)
    }

    async fn load_pool(&self, location_id: Uuid) -> Result<Option<PoolState>> {
        Ok(self.state.lock().unwrap().pool(location_id))
    }

    async fn user_addresses(&self, user_id: Uuid) -> Result<Vec<DeviceAddresses>> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<DeviceAddresses> = state
            .members
            .iter()
            .filter(|(_, device_id)| {
                state
                    .devices
                    .iter()
                    .any(|d| d.id == *device_id && d.user_id == user_id)
            })
            .filter_map(|(loc, device)| state.membership(*loc, *device))
            .collect();
        rows.sort_by(|a, b| {
            (&a.location_name, &a.device_name).cmp(&(&b.location_name, &b.device_name))
        });
        Ok(rows)
    }

    async fn device_addresses(&self, device_id: Uuid) -> Result<Vec<DeviceAddresses>> {
        let state = self.state.lock().unwrap();
        let mut rows: Vec<DeviceAddresses> = state
            .members
            .iter()
            .filter(|(_, device)| *device == device_id)
            .filter_map(|(loc, device)| state.membership(*loc, *device))
            .collect();
        rows.sort_by(|a, b| a.location_name.cmp(&b.location_name));
        Ok(rows)
    }

    async fn leave_location(&self, device_id: Uuid, location_id: Uuid) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .remove_membership(location_id, device_id))
    }

    async fn apply<F>(
        &self,
        location_ids: &[Uuid],
        plan: F,
    ) -> std::result::Result<Vec<Write>, AssignmentError>
    where
        F: Fn(&HashMap<Uuid, PoolState>) -> std::result::Result<Vec<Write>, AssignmentError>
            + Send
            + Sync,
    {
        self.applies.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(AssignmentError::TransactionConflict);
        }

        let pools: HashMap<Uuid, PoolState> = {
            let state = self.state.lock().unwrap();
            location_ids
                .iter()
                .filter_map(|id| state.pool(*id).map(|p| (*id, p)))
                .collect()
        };

        // Let a concurrent writer run between read and write.
        tokio::task::yield_now().await;

        let writes = plan(&pools)?;

        let mut state = self.state.lock().unwrap();
        let mut next = state.clone();
        for write in &writes {
            next.write(write)?;
        }
        *state = next;
        Ok(writes)
    }
}

// -- Fixtures --

pub type Service = AssignmentService<MemoryStore>;

pub fn service() -> Service {
    AssignmentService::new(MemoryStore::default())
}

pub async fn location(svc: &Service, name: &str, cidrs: &[&str]) -> Uuid {
    let address: Vec<String> = cidrs.iter().map(|c| c.to_string()).collect();
    svc.create_location(name, &address).await.unwrap().id
}

/// Create the user if needed, then a device owned by it.
pub async fn device(svc: &Service, username: &str, name: &str) -> Uuid {
    if svc.store().get_user(username).await.unwrap().is_none() {
        svc.create_user(username).await.unwrap();
    }
    svc.create_device(username, name).await.unwrap().id
}

/// A device that is a member of `location_id`, holding the address join gave it.
pub async fn member(svc: &Service, username: &str, name: &str, location_id: Uuid) -> Uuid {
    let id = device(svc, username, name).await;
    svc.join_location(username, id, location_id).await.unwrap();
    id
}

pub fn assign(device_id: Uuid, location_id: Uuid, ips: &[&str]) -> IpAssignment {
    IpAssignment {
        device_id,
        location_id,
        ips: ips.iter().map(|s| s.to_string()).collect(),
    }
}

/// Addresses a device holds in a location according to a user view.
pub fn ips_in(view: &[LocationDevices], location_id: Uuid, device_id: Uuid) -> Vec<String> {
    view.iter()
        .filter(|l| l.location_id == location_id)
        .flat_map(|l| &l.devices)
        .filter(|d| d.device_id == device_id)
        .flat_map(|d| d.wireguard_ips.iter().map(|ip| ip.ip.clone()))
        .collect()
}

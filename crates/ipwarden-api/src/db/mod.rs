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

pub mod postgres;

use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

use crate::assign::AssignmentError;
use crate::assign::pool::PoolState;

pub use postgres::PgAddressStore;

pub async fn create_pool(database_url: &str, max_connections: u32) -> PgPool {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .expect("failed to create database connection pool")
}

pub async fn migrate(pool: &PgPool) {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .expect("failed to run database migrations");
}

// ---------------------------------------------------------------------------
// Model types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Location {
    pub id: Uuid,
    pub name: String,
    pub address: Vec<IpNetwork>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Device {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One device's membership in one location, with the addresses it holds there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAddresses {
    pub location_id: Uuid,
    pub location_name: String,
    pub location_address: Vec<IpNetwork>,
    pub device_id: Uuid,
    pub device_name: String,
    pub addresses: Vec<IpAddr>,
}

/// A change produced by the planner and applied inside the location locks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    /// Replace the device's addresses in the location. Empty clears them.
    Replace {
        device_id: Uuid,
        location_id: Uuid,
        addresses: Vec<IpAddr>,
    },
    /// Add the device to the location holding `addresses`.
    Join {
        device_id: Uuid,
        location_id: Uuid,
        addresses: Vec<IpAddr>,
    },
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("location name already taken")]
    DuplicateLocationName,

    #[error("username already taken")]
    DuplicateUsername,

    #[error("device name already taken for this user")]
    DuplicateDeviceName,
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// AddressStore
// ---------------------------------------------------------------------------

/// Persistence for locations, devices and their address assignments.
///
/// Reads never take location locks. [`AddressStore::apply`] is the only write
/// path for addresses: it locks the given locations, loads their pool state
/// and hands it to `plan`; the returned writes are applied atomically, or not
/// at all if `plan` fails.
pub trait AddressStore: Send + Sync {
    fn create_location(
        &self,
        name: &str,
        address: &[IpNetwork],
    ) -> impl Future<Output = Result<Location>> + Send;
    fn get_location(&self, id: Uuid) -> impl Future<Output = Result<Option<Location>>> + Send;
    fn list_locations(&self) -> impl Future<Output = Result<Vec<Location>>> + Send;
    fn delete_location(&self, id: Uuid) -> impl Future<Output = Result<bool>> + Send;

    fn create_user(&self, username: &str) -> impl Future<Output = Result<User>> + Send;
    fn get_user(&self, username: &str) -> impl Future<Output = Result<Option<User>>> + Send;

    fn create_device(
        &self,
        user_id: Uuid,
        name: &str,
    ) -> impl Future<Output = Result<Device>> + Send;
    fn get_device(&self, id: Uuid) -> impl Future<Output = Result<Option<Device>>> + Send;
    fn delete_device(&self, id: Uuid) -> impl Future<Output = Result<bool>> + Send;

    /// Current pool state of a location, `None` if the location is unknown.
    fn load_pool(&self, location_id: Uuid)
    -> impl Future<Output = Result<Option<PoolState>>> + Send;

    /// Memberships of every device of the user, ordered by location name then
    /// device name.
    fn user_addresses(
        &self,
        user_id: Uuid,
    ) -> impl Future<Output = Result<Vec<DeviceAddresses>>> + Send;

    /// Memberships of one device, ordered by location name.
    fn device_addresses(
        &self,
        device_id: Uuid,
    ) -> impl Future<Output = Result<Vec<DeviceAddresses>>> + Send;

    /// Remove a membership and its addresses. `false` if there was none.
    fn leave_location(
        &self,
        device_id: Uuid,
        location_id: Uuid,
    ) -> impl Future<Output = Result<bool>> + Send;

    fn apply<F>(
        &self,
        location_ids: &[Uuid],
        plan: F,
    ) -> impl Future<Output = std::result::Result<Vec<Write>, AssignmentError>> + Send
    where
        F: Fn(&HashMap<Uuid, PoolState>) -> std::result::Result<Vec<Write>, AssignmentError>
            + Send
            + Sync;
}

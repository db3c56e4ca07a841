//! ipwarden-types: Shared API type definitions for the ipwarden ecosystem.
//!
//! This crate contains the request/response types and rejection reasons
//! shared between the API server and its frontends.

#![warn(missing_docs)]

pub mod ips;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A VPN location and the address ranges it hands out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    /// Unique identifier.
    pub id: Uuid,
    /// Human-readable name (e.g. "Berlin office").
    pub name: String,
    /// Location networks in CIDR notation. The host part is the gateway's
    /// own address inside that network.
    pub address: Vec<String>,
    /// When this location was created.
    pub created_at: DateTime<Utc>,
    /// Last modification time.
    pub updated_at: DateTime<Utc>,
}

/// Request body for creating a location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLocationRequest {
    /// Location name, unique across the installation.
    pub name: String,
    /// One or more networks in CIDR notation, e.g. `10.10.0.1/24`.
    pub address: Vec<String>,
}

/// A user that owns devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier.
    pub id: Uuid,
    /// Login name.
    pub username: String,
    /// When this user was created.
    pub created_at: DateTime<Utc>,
}

/// Request body for creating a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    /// Login name, unique across the installation.
    pub username: String,
}

/// A device (WireGuard peer) belonging to a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning user.
    pub user_id: Uuid,
    /// Human-readable name (e.g. "work laptop").
    pub name: String,
    /// When this device was created.
    pub created_at: DateTime<Utc>,
}

/// Request body for creating a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateDeviceRequest {
    /// Device name, unique per user.
    pub name: String,
}

use std::collections::HashMap;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use sqlx::{PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::{AddressStore, Device, DeviceAddresses, Location, Result, StoreError, User, Write};
use crate::assign::AssignmentError;
use crate::assign::pool::PoolState;

/// Unique constraint backing "one holder per address per location".
const ADDRESS_UNIQUE: &str = "device_addresses_location_id_ip_key";
const MEMBERSHIP_PKEY: &str = "location_devices_pkey";
/// Addresses need a membership; it can vanish under an unlocked leave or delete.
const MEMBERSHIP_FKEY: &str = "device_addresses_membership_fkey";

#[derive(Debug, sqlx::FromRow)]
struct AssignmentRow {
    location_id: Uuid,
    device_id: Uuid,
    ip: IpNetwork,
}

#[derive(Debug, sqlx::FromRow)]
struct MemberRow {
    location_id: Uuid,
    device_id: Uuid,
}

#[derive(Debug, sqlx::FromRow)]
struct DeviceAddressRow {
    location_id: Uuid,
    location_name: String,
    location_address: Vec<IpNetwork>,
    device_id: Uuid,
    device_name: String,
    wireguard_ips: Vec<IpNetwork>,
}

impl From<DeviceAddressRow> for DeviceAddresses {
    fn from(row: DeviceAddressRow) -> Self {
        Self {
            location_id: row.location_id,
            location_name: row.location_name,
            location_address: row.location_address,
            device_id: row.device_id,
            device_name: row.device_name,
            addresses: row.wireguard_ips.iter().map(IpNetwork::ip).collect(),
        }
    }
}

const DEVICE_ADDRESSES_SELECT: &str = "
    SELECT l.id AS location_id,
           l.name AS location_name,
           l.address AS location_address,
           d.id AS device_id,
           d.name AS device_name,
           COALESCE(array_agg(da.ip ORDER BY da.ip) FILTER (WHERE da.ip IS NOT NULL), '{}')
               AS wireguard_ips
    FROM location_devices ld
    JOIN locations l ON l.id = ld.location_id
    JOIN devices d ON d.id = ld.device_id
    LEFT JOIN device_addresses da
           ON da.location_id = ld.location_id AND da.device_id = ld.device_id";

// ---------------------------------------------------------------------------
// Transaction helpers
// ---------------------------------------------------------------------------

/// Serialization failures, deadlocks and lost constraint races are worth one
/// more attempt; the retry re-plans against fresh state. A membership removed
/// mid-commit re-plans into `DeviceNotInLocation`.
fn classify(err: sqlx::Error) -> AssignmentError {
    if let sqlx::Error::Database(db_err) = &err {
        let retryable_code = matches!(db_err.code().as_deref(), Some("40001" | "40P01"));
        let lost_race = matches!(
            db_err.constraint(),
            Some(ADDRESS_UNIQUE | MEMBERSHIP_PKEY | MEMBERSHIP_FKEY)
        );
        if retryable_code || lost_race {
            return AssignmentError::TransactionConflict;
        }
    }
    AssignmentError::Store(StoreError::Database(err))
}

async fn load_pools(
    conn: &mut PgConnection,
    ids: &[Uuid],
    lock: bool,
) -> sqlx::Result<HashMap<Uuid, PoolState>> {
    let sql = if lock {
        "SELECT * FROM locations WHERE id = ANY($1) ORDER BY id FOR UPDATE"
    } else {
        "SELECT * FROM locations WHERE id = ANY($1)"
    };
    let locations: Vec<Location> = sqlx::query_as(sql).bind(ids).fetch_all(&mut *conn).await?;

    let assignments: Vec<AssignmentRow> = sqlx::query_as(
        "SELECT location_id, device_id, ip FROM device_addresses WHERE location_id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;

    let members: Vec<MemberRow> = sqlx::query_as(
        "SELECT location_id, device_id FROM location_devices WHERE location_id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut pools: HashMap<Uuid, PoolState> = locations
        .into_iter()
        .map(|l| (l.id, PoolState::new(l.id, l.address)))
        .collect();

    for row in assignments {
        if let Some(pool) = pools.get_mut(&row.location_id) {
            pool.assigned.insert(row.ip.ip(), row.device_id);
        }
    }
    for row in members {
        if let Some(pool) = pools.get_mut(&row.location_id) {
            pool.members.insert(row.device_id);
        }
    }

    Ok(pools)
}

async fn insert_addresses(
    conn: &mut PgConnection,
    device_id: Uuid,
    location_id: Uuid,
    addresses: &[IpAddr],
) -> sqlx::Result<()> {
    if addresses.is_empty() {
        return Ok(());
    }
    let ips: Vec<IpNetwork> = addresses.iter().copied().map(IpNetwork::from).collect();
    sqlx::query(
        "INSERT INTO device_addresses (location_id, device_id, ip)
         SELECT $1, $2, unnest($3::inet[])",
    )
    .bind(location_id)
    .bind(device_id)
    .bind(ips)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn apply_write(conn: &mut PgConnection, write: &Write) -> sqlx::Result<()> {
    match write {
        Write::Join {
            device_id,
            location_id,
            addresses,
        } => {
            sqlx::query("INSERT INTO location_devices (location_id, device_id) VALUES ($1, $2)")
                .bind(location_id)
                .bind(device_id)
                .execute(&mut *conn)
                .await?;
            insert_addresses(conn, *device_id, *location_id, addresses).await
        }
        Write::Replace {
            device_id,
            location_id,
            addresses,
        } => {
            sqlx::query("DELETE FROM device_addresses WHERE location_id = $1 AND device_id = $2")
                .bind(location_id)
                .bind(device_id)
                .execute(&mut *conn)
                .await?;
            insert_addresses(conn, *device_id, *location_id, addresses).await
        }
    }
}

// ---------------------------------------------------------------------------
// PgAddressStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PgAddressStore {
    pool: PgPool,
}

impl PgAddressStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AddressStore for PgAddressStore {
    // -- Locations -----------------------------------------------------------

    #[tracing::instrument(skip(self))]
    async fn create_location(&self, name: &str, address: &[IpNetwork]) -> Result<Location> {
        sqlx::query_as::<_, Location>(
            "INSERT INTO locations (name, address) VALUES ($1, $2) RETURNING *",
        )
        .bind(name)
        .bind(address)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.constraint() == Some("locations_name_key") => {
                StoreError::DuplicateLocationName
            }
            _ => StoreError::Database(e),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn get_location(&self, id: Uuid) -> Result<Option<Location>> {
        sqlx::query_as::<_, Location>("SELECT * FROM locations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    #[tracing::instrument(skip(self))]
    async fn list_locations(&self) -> Result<Vec<Location>> {
        sqlx::query_as::<_, Location>("SELECT * FROM locations ORDER BY name")
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_location(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM locations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- Users and devices ---------------------------------------------------

    #[tracing::instrument(skip(self))]
    async fn create_user(&self, username: &str) -> Result<User> {
        sqlx::query_as::<_, User>("INSERT INTO users (username) VALUES ($1) RETURNING *")
            .bind(username)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db_err)
                    if db_err.constraint() == Some("users_username_key") =>
                {
                    StoreError::DuplicateUsername
                }
                _ => StoreError::Database(e),
            })
    }

    #[tracing::instrument(skip(self))]
    async fn get_user(&self, username: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    #[tracing::instrument(skip(self))]
    async fn create_device(&self, user_id: Uuid, name: &str) -> Result<Device> {
        sqlx::query_as::<_, Device>(
            "INSERT INTO devices (user_id, name) VALUES ($1, $2) RETURNING *",
        )
        .bind(user_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err)
                if db_err.constraint() == Some("devices_user_id_name_key") =>
            {
                StoreError::DuplicateDeviceName
            }
            _ => StoreError::Database(e),
        })
    }

    #[tracing::instrument(skip(self))]
    async fn get_device(&self, id: Uuid) -> Result<Option<Device>> {
        sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    #[tracing::instrument(skip(self))]
    async fn delete_device(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM devices WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- Pools and views -----------------------------------------------------

    #[tracing::instrument(skip(self))]
    async fn load_pool(&self, location_id: Uuid) -> Result<Option<PoolState>> {
        let mut conn = self.pool.acquire().await?;
        let mut pools = load_pools(&mut conn, &[location_id], false).await?;
        Ok(pools.remove(&location_id))
    }

    #[tracing::instrument(skip(self))]
    async fn user_addresses(&self, user_id: Uuid) -> Result<Vec<DeviceAddresses>> {
        let sql = format!(
            "{DEVICE_ADDRESSES_SELECT}
             WHERE d.user_id = $1
             GROUP BY l.id, d.id
             ORDER BY l.name, d.name"
        );
        let rows: Vec<DeviceAddressRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        debug!(count = rows.len(), "loaded device-location memberships");
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn device_addresses(&self, device_id: Uuid) -> Result<Vec<DeviceAddresses>> {
        let sql = format!(
            "{DEVICE_ADDRESSES_SELECT}
             WHERE d.id = $1
             GROUP BY l.id, d.id
             ORDER BY l.name"
        );
        let rows: Vec<DeviceAddressRow> = sqlx::query_as(&sql)
            .bind(device_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn leave_location(&self, device_id: Uuid, location_id: Uuid) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM location_devices WHERE location_id = $1 AND device_id = $2")
                .bind(location_id)
                .bind(device_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- Locked writes -------------------------------------------------------

    #[tracing::instrument(skip(self, plan))]
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
        let mut tx = self.pool.begin().await.map_err(classify)?;

        // Row locks are taken in id order, matching the in-process lock order.
        let pools = load_pools(&mut tx, location_ids, true)
            .await
            .map_err(classify)?;

        // Dropping the transaction on a planning error rolls it back.
        let writes = plan(&pools)?;

        for write in &writes {
            apply_write(&mut tx, write).await.map_err(classify)?;
        }

        tx.commit().await.map_err(classify)?;
        debug!(writes = writes.len(), "applied address writes");
        Ok(writes)
    }
}

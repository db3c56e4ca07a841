pub mod ips;
pub mod locations;
pub mod users;

use actix_web::web;

use crate::db::AddressStore;
use crate::error::ApiError;

/// Register every API route for a service backed by `S`.
pub fn configure<S: AddressStore + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .error_handler(|err, _req| ApiError::BadRequest(err.to_string()).into()),
    )
    .configure(locations::configure::<S>)
    .configure(users::configure::<S>)
    .configure(ips::configure::<S>);
}

use actix_web::{web, HttpResponse};
use ipwarden_types::{CreateDeviceRequest, CreateUserRequest};
use serde::Serialize;
use uuid::Uuid;

use crate::assign::AssignmentService;
use crate::db::{self, AddressStore};
use crate::error::ApiError;
use crate::extract::AdminAuth;

#[derive(Debug, Serialize)]
struct JoinResponse {
    device_id: Uuid,
    location_id: Uuid,
    addresses: Vec<String>,
}

fn user_response(u: db::User) -> ipwarden_types::User {
    ipwarden_types::User {
        id: u.id,
        username: u.username,
        created_at: u.created_at,
    }
}

fn device_response(d: db::Device) -> ipwarden_types::Device {
    ipwarden_types::Device {
        id: d.id,
        user_id: d.user_id,
        name: d.name,
        created_at: d.created_at,
    }
}

async fn create_user<S: AddressStore + 'static>(
    _auth: AdminAuth,
    service: web::Data<AssignmentService<S>>,
    body: web::Json<CreateUserRequest>,
) -> Result<HttpResponse, ApiError> {
    let user = service.create_user(&body.username).await?;
    Ok(HttpResponse::Created().json(user_response(user)))
}

async fn create_device<S: AddressStore + 'static>(
    _auth: AdminAuth,
    service: web::Data<AssignmentService<S>>,
    path: web::Path<String>,
    body: web::Json<CreateDeviceRequest>,
) -> Result<HttpResponse, ApiError> {
    let device = service.create_device(&path, &body.name).await?;
    Ok(HttpResponse::Created().json(device_response(device)))
}

async fn delete_device<S: AddressStore + 'static>(
    _auth: AdminAuth,
    service: web::Data<AssignmentService<S>>,
    path: web::Path<(String, Uuid)>,
) -> Result<HttpResponse, ApiError> {
    let (username, device_id) = path.into_inner();
    service.delete_device(&username, device_id).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn join_location<S: AddressStore + 'static>(
    _auth: AdminAuth,
    service: web::Data<AssignmentService<S>>,
    path: web::Path<(String, Uuid, Uuid)>,
) -> Result<HttpResponse, ApiError> {
    let (username, device_id, location_id) = path.into_inner();
    let addresses = service
        .join_location(&username, device_id, location_id)
        .await?;
    Ok(HttpResponse::Created().json(JoinResponse {
        device_id,
        location_id,
        addresses: addresses.iter().map(ToString::to_string).collect(),
    }))
}

async fn leave_location<S: AddressStore + 'static>(
    _auth: AdminAuth,
    service: web::Data<AssignmentService<S>>,
    path: web::Path<(String, Uuid, Uuid)>,
) -> Result<HttpResponse, ApiError> {
    let (username, device_id, location_id) = path.into_inner();
    service
        .leave_location(&username, device_id, location_id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

pub fn configure<S: AddressStore + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/users").route(web::post().to(create_user::<S>)))
        .service(
            web::resource("/api/users/{username}/devices")
                .route(web::post().to(create_device::<S>)),
        )
        .service(
            web::resource("/api/users/{username}/devices/{device_id}")
                .route(web::delete().to(delete_device::<S>)),
        )
        .service(
            web::resource("/api/users/{username}/devices/{device_id}/locations/{location_id}")
                .route(web::post().to(join_location::<S>))
                .route(web::delete().to(leave_location::<S>)),
        );
}

use actix_web::{web, HttpResponse};
use ipwarden_types::ips::{DeviceIpsResponse, IpAssignment, UserIpsResponse, ValidateIpRequest};
use uuid::Uuid;

use crate::assign::AssignmentService;
use crate::db::AddressStore;
use crate::error::ApiError;
use crate::extract::AdminAuth;

async fn user_ips<S: AddressStore + 'static>(
    _auth: AdminAuth,
    service: web::Data<AssignmentService<S>>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let locations = service.user_view(&path).await?;
    Ok(HttpResponse::Ok().json(UserIpsResponse { locations }))
}

async fn device_ips<S: AddressStore + 'static>(
    _auth: AdminAuth,
    service: web::Data<AssignmentService<S>>,
    path: web::Path<(String, Uuid)>,
) -> Result<HttpResponse, ApiError> {
    let (username, device_id) = path.into_inner();
    let locations = service.device_view(&username, device_id).await?;
    Ok(HttpResponse::Ok().json(DeviceIpsResponse { locations }))
}

async fn validate_ip<S: AddressStore + 'static>(
    _auth: AdminAuth,
    service: web::Data<AssignmentService<S>>,
    path: web::Path<String>,
    body: web::Json<ValidateIpRequest>,
) -> Result<HttpResponse, ApiError> {
    let split = service
        .validate(&path, body.device_id, body.location, &body.ip)
        .await?;
    Ok(HttpResponse::Ok().json(split))
}

async fn assign_ips<S: AddressStore + 'static>(
    _auth: AdminAuth,
    service: web::Data<AssignmentService<S>>,
    path: web::Path<String>,
    body: web::Json<Vec<IpAssignment>>,
) -> Result<HttpResponse, ApiError> {
    let locations = service.commit(&path, body.into_inner()).await?;
    Ok(HttpResponse::Ok().json(UserIpsResponse { locations }))
}

pub fn configure<S: AddressStore + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/users/{username}/ips")
            .route(web::get().to(user_ips::<S>))
            .route(web::post().to(assign_ips::<S>)),
    )
    .service(
        web::resource("/api/users/{username}/ips/validate")
            .route(web::post().to(validate_ip::<S>)),
    )
    .service(
        web::resource("/api/users/{username}/devices/{device_id}/ips")
            .route(web::get().to(device_ips::<S>)),
    );
}

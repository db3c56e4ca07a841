use actix_web::{web, HttpResponse};
use ipwarden_types::CreateLocationRequest;
use ipwarden_types::ips::NextAvailableResponse;
use uuid::Uuid;

use crate::assign::AssignmentService;
use crate::db::{self, AddressStore};
use crate::error::ApiError;
use crate::extract::AdminAuth;

fn location_response(l: db::Location) -> ipwarden_types::Location {
    ipwarden_types::Location {
        id: l.id,
        name: l.name,
        address: l.address.iter().map(ToString::to_string).collect(),
        created_at: l.created_at,
        updated_at: l.updated_at,
    }
}

async fn list_locations<S: AddressStore + 'static>(
    _auth: AdminAuth,
    service: web::Data<AssignmentService<S>>,
) -> Result<HttpResponse, ApiError> {
    let locations = service.list_locations().await?;
    let resp: Vec<_> = locations.into_iter().map(location_response).collect();
    Ok(HttpResponse::Ok().json(resp))
}

async fn create_location<S: AddressStore + 'static>(
    _auth: AdminAuth,
    service: web::Data<AssignmentService<S>>,
    body: web::Json<CreateLocationRequest>,
) -> Result<HttpResponse, ApiError> {
    let location = service.create_location(&body.name, &body.address).await?;
    Ok(HttpResponse::Created().json(location_response(location)))
}

async fn get_location<S: AddressStore + 'static>(
    _auth: AdminAuth,
    service: web::Data<AssignmentService<S>>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let location = service.get_location(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(location_response(location)))
}

async fn delete_location<S: AddressStore + 'static>(
    _auth: AdminAuth,
    service: web::Data<AssignmentService<S>>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    service.delete_location(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

async fn pool_state<S: AddressStore + 'static>(
    _auth: AdminAuth,
    service: web::Data<AssignmentService<S>>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let pool = service.pool_state(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(pool.to_response()))
}

async fn next_ip<S: AddressStore + 'static>(
    _auth: AdminAuth,
    service: web::Data<AssignmentService<S>>,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, ApiError> {
    let location_id = path.into_inner();
    let addresses = service.suggest_next_available(location_id).await?;
    Ok(HttpResponse::Ok().json(NextAvailableResponse {
        location_id,
        addresses: addresses.iter().map(ToString::to_string).collect(),
    }))
}

pub fn configure<S: AddressStore + 'static>(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/locations")
            .route("", web::get().to(list_locations::<S>))
            .route("", web::post().to(create_location::<S>))
            .route("/{id}", web::get().to(get_location::<S>))
            .route("/{id}", web::delete().to(delete_location::<S>))
            .route("/{id}/pool", web::get().to(pool_state::<S>))
            .route("/{id}/next-ip", web::get().to(next_ip::<S>)),
    );
}

use actix_web::{web, App, HttpResponse, HttpServer};
use tracing::info;

use ipwarden_api::assign::AssignmentService;
use ipwarden_api::config::Config;
use ipwarden_api::db::{self, PgAddressStore};
use ipwarden_api::middleware::AccessLog;
use ipwarden_api::routes;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    #[cfg(distribute)]
    {
        fmt().json().with_env_filter(filter).init();
    }

    #[cfg(not(distribute))]
    {
        fmt().pretty().with_env_filter(filter).init();
    }
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "version": env!("GIT_VERSION"),
    }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env().expect("failed to load configuration");
    info!(addr = %config.bind_addr, version = env!("GIT_VERSION"), "starting ipwarden-api");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await;
    db::migrate(&pool).await;
    info!("database migrations applied");

    let service = web::Data::new(AssignmentService::new(PgAddressStore::new(pool)));
    let bind = config.bind_addr.clone();
    let config_data = web::Data::new(config);

    HttpServer::new(move || {
        App::new()
            .app_data(config_data.clone())
            .app_data(service.clone())
            .wrap(AccessLog)
            .wrap(tracing_actix_web::TracingLogger::default())
            .route("/health", web::get().to(health))
            .configure(routes::configure::<PgAddressStore>)
    })
    .bind(&bind)?
    .run()
    .await
}

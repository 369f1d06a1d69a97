//! # Table Booking Server
//!
//! Servidor web de reservas de mesas construido con Rust, Actix Web y MongoDB.
//!
//! ## Configuración
//!
//! El servidor se configura mediante variables de entorno (archivo `.env`):
//!
//! ```env
//! # Almacén: mongodb (por defecto) o memory
//! STORE_BACKEND=mongodb
//!
//! # Base de datos MongoDB (las transacciones requieren replica set)
//! MONGODB_URI=mongodb://localhost:27017/?replicaSet=rs0
//! MONGODB_DATABASE=table_booking
//!
//! # Servidor
//! BIND_ADDRESS=0.0.0.0:8080
//! STATIC_DIR=./static
//!
//! # Espera máxima por un bloqueo de reserva, en milisegundos
//! LOCK_TIMEOUT_MS=2000
//!
//! # Token del administrador inicial y datos de ejemplo
//! ADMIN_TOKEN=cambia-este-token
//! SEED_SAMPLE_DATA=true
//!
//! # Límite de peticiones por IP a /api
//! RATE_LIMIT_MAX_REQUESTS=100
//! RATE_LIMIT_WINDOW_SECS=900
//!
//! # Logging
//! RUST_LOG=table_booking=debug,mongodb=info
//! ```
//!
//! ## Ejecución
//!
//! ```bash
//! # MongoDB con replica set de un nodo
//! docker run -d --name mongo -p 27017:27017 mongo:latest --replSet rs0
//! docker exec mongo mongosh --eval "rs.initiate()"
//!
//! cargo run
//!
//! # Sin MongoDB
//! STORE_BACKEND=memory SEED_SAMPLE_DATA=true cargo run
//! ```
//!
//! ## Arquitectura
//!
//! ```text
//! API REST (Actix Web)
//!     ↓
//! Motor de disponibilidad (bloqueos + transacciones)
//!     ↓ Store
//! MongoDB | Memoria
//! ```

use actix_files::Files;
use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use table_booking::api::rate_limit::{Limit, RateLimiter};
use table_booking::api::{self, middleware::ErrorLogExt, AppState};
use table_booking::config::{Settings, StoreBackend};
use table_booking::db::{seed, MemoryStore, MongoRepo, Store};
use table_booking::engine::AvailabilityEngine;

fn io_error(error: impl std::fmt::Display) -> io::Error {
    io::Error::new(io::ErrorKind::Other, error.to_string())
}

/// Construye el almacén configurado
///
/// Con MongoDB, un fallo creando índices no impide arrancar.
async fn open_store(settings: &Settings) -> io::Result<Arc<dyn Store>> {
    match settings.store_backend {
        StoreBackend::MongoDb => {
            let repo = MongoRepo::init(&settings.mongodb_uri, &settings.mongodb_database)
                .await
                .map_err(io_error)?;
            repo.create_indexes()
                .await
                .log_warn_context("creando índices MongoDB")
                .ok();
            Ok(Arc::new(repo))
        }
        StoreBackend::Memory => {
            tracing::warn!("Usando almacén en memoria: los datos se pierden al reiniciar");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

/// Carga `.env`, configura el logging, abre el almacén, siembra los datos
/// iniciales y arranca el servidor HTTP.
///
/// # Errores
///
/// Retorna `std::io::Error` si la configuración es inválida, no se puede
/// conectar a MongoDB, falla la siembra o no se puede bindear la dirección.
#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("table_booking=debug,mongodb=info")),
        )
        .init();

    let settings = Settings::from_env()
        .log_error_context("leyendo configuración")
        .map_err(io_error)?;
    tracing::info!(backend = ?settings.store_backend, "Iniciando Table Booking Server");

    let store = open_store(&settings).await?;

    if settings.seed_sample_data {
        let inserted = seed::insert_sample_data(store.as_ref())
            .await
            .log_error_context("insertando datos de ejemplo")
            .map_err(io_error)?;
        if inserted {
            tracing::info!("Datos de ejemplo insertados");
        }
    }
    if let Some(token) = &settings.admin_token {
        let admin = seed::ensure_admin(store.as_ref(), token)
            .await
            .log_error_context("creando administrador inicial")
            .map_err(io_error)?;
        tracing::info!(staff_id = %admin.id, "Administrador inicial disponible");
    }

    let engine = AvailabilityEngine::new(store, settings.lock_timeout);
    let api_limit = Limit {
        max_requests: settings.rate_limit_max_requests,
        window: settings.rate_limit_window,
    };
    let rate_limiter = RateLimiter::new(api_limit, Limit::LOGIN);
    let state = AppState::with_rate_limiter(engine, rate_limiter.clone());

    // Limpieza periódica de las IPs cuya ventana terminó
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rate_limiter.cleanup().await;
        }
    });

    let static_dir = settings.static_dir.clone();
    let serve_static = static_dir.is_dir();
    if !serve_static {
        tracing::warn!(dir = %static_dir.display(), "Directorio de estáticos no encontrado");
    }

    tracing::info!("Servidor iniciando en {}", settings.bind_address);
    HttpServer::new(move || {
        let app = App::new()
            .wrap(Logger::default())
            .configure(api::configure_app(state.clone()));

        let app = if serve_static {
            app.service(Files::new("/static", &static_dir).index_file("index.html"))
        } else {
            app
        };

        app.route(
            "/",
            web::get().to(|| async {
                HttpResponse::PermanentRedirect()
                    .append_header(("Location", "/static/index.html"))
                    .finish()
            }),
        )
    })
    .bind(&settings.bind_address)?
    .run()
    .await
}

//! # Módulo API
//!
//! Rutas y controladores de la API REST, todas bajo el prefijo `/api`.
//!
//! ## Módulos principales
//!
//! - [`table`] - Mesas, disponibilidad y conflictos
//! - [`booking`] - Reservas: alta, cambios, estados, lotes e historial
//! - [`customer`] - Búsqueda y ficha de clientes
//! - [`staff`] - Personal y emisión de tokens
//! - [`auth`] - Login, verificación de token y cambio de contraseña
//! - [`notifications`] - Avisos del día para el personal
//! - [`analytics`] - Panel de estadísticas
//! - [`rate_limit`] - Límite de peticiones por IP
//! - [`errors`] - Manejo de errores de la aplicación

pub mod analytics;
pub mod auth;
pub mod booking;
pub mod customer;
pub mod errors;
pub mod export;
pub mod middleware;
pub mod notifications;
pub mod rate_limit;
pub mod staff;
pub mod table;
pub mod validation;

pub use errors::{AppError, AppResult, ErrorResponse};

use actix_web::middleware::from_fn;
use actix_web::{error, get, web, HttpResponse, Responder, ResponseError};
use serde_json::json;
use std::sync::Arc;

use crate::db::Store;
use crate::engine::AvailabilityEngine;
use rate_limit::RateLimiter;

/// Estado compartido por todos los controladores
#[derive(Clone)]
pub struct AppState {
    pub engine: AvailabilityEngine,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    pub fn new(engine: AvailabilityEngine) -> Self {
        Self::with_rate_limiter(engine, RateLimiter::default())
    }

    pub fn with_rate_limiter(engine: AvailabilityEngine, rate_limiter: RateLimiter) -> Self {
        AppState {
            engine,
            rate_limiter,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        self.engine.store()
    }
}

#[get("/health")]
async fn health(state: web::Data<AppState>) -> AppResult<impl Responder> {
    state.store().ping().await?;
    Ok(HttpResponse::Ok().json(json!({
        "status": "OK",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

/// Los cuerpos JSON mal formados o con campos desconocidos son errores 400
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(64 * 1024)
        .error_handler(|err, _req| {
            let message = err.to_string();
            error::InternalError::from_response(err, AppError::Validation(message).error_response())
                .into()
        })
}

pub fn query_config() -> web::QueryConfig {
    web::QueryConfig::default().error_handler(|err, _req| {
        let message = err.to_string();
        error::InternalError::from_response(err, AppError::Validation(message).error_response()).into()
    })
}

pub fn path_config() -> web::PathConfig {
    web::PathConfig::default().error_handler(|err, _req| {
        let message = err.to_string();
        error::InternalError::from_response(err, AppError::Validation(message).error_response()).into()
    })
}

/// Registra el estado, los extractores configurados y las rutas
pub fn configure_app(state: AppState) -> impl FnOnce(&mut web::ServiceConfig) {
    move |cfg| {
        cfg.app_data(web::Data::new(state))
            .app_data(json_config())
            .app_data(query_config())
            .app_data(path_config());
        init_routes(cfg);
    }
}

/// Configura todas las rutas de la API
///
/// Las rutas literales (`/tables/availability`, `/customers/search`,
/// `/bookings/batch`, `/bookings/export`) se registran antes que las que
/// llevan `{id}`. Todo `/api` pasa por el límite de peticiones por IP.
pub fn init_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .wrap(from_fn(rate_limit::limit_api_requests))
            .service(health)
            .configure(auth::routes)
            .configure(notifications::routes)
            .configure(table::routes)
            .configure(export::routes)
            .configure(booking::routes)
            .configure(customer::routes)
            .configure(staff::routes)
            .configure(analytics::routes),
    );
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::db::{MemoryStore, Section, Staff, StaffRole, Table};
    use std::time::Duration;

    pub struct TestContext {
        pub state: AppState,
        pub store: Arc<MemoryStore>,
        pub host_token: String,
        pub manager_token: String,
        pub admin_token: String,
        pub t1: Table,
        pub t2: Table,
    }

    pub async fn context() -> TestContext {
        let store = Arc::new(MemoryStore::new());
        let t1 = Table::new("T1", Section::Bistro, 2);
        let t2 = Table::new("T2", Section::Bistro, 4);
        store.insert_table(&t1).await.unwrap();
        store.insert_table(&t2).await.unwrap();
        store.insert_table(&Table::new("T30", Section::Terrace, 2)).await.unwrap();

        let mut tokens = Vec::new();
        for (name, role) in [
            ("john.doe", StaffRole::Host),
            ("sarah.wilson", StaffRole::Manager),
            ("admin", StaffRole::Admin),
        ] {
            let staff = Staff::new(name, "Test", &format!("{name}@restaurant.com"), role);
            store.insert_staff(&staff).await.unwrap();
            tokens.push(staff.access_token);
        }
        let admin_token = tokens.pop().unwrap();
        let manager_token = tokens.pop().unwrap();
        let host_token = tokens.pop().unwrap();

        let engine = AvailabilityEngine::new(store.clone(), Duration::from_millis(500));
        TestContext {
            state: AppState::new(engine),
            store,
            host_token,
            manager_token,
            admin_token,
            t1,
            t2,
        }
    }

    pub fn bearer(token: &str) -> (&'static str, String) {
        ("Authorization", format!("Bearer {token}"))
    }
}

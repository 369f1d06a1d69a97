//! # Errores de la API
//!
//! Cada capa tiene su propio enum de errores con `thiserror`:
//! [`StoreError`] → [`EngineError`] → [`AppError`]. Aquí se traducen a códigos
//! HTTP y a un cuerpo JSON `{"error", "message"}`.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use thiserror::Error;

use super::middleware::log_error_chain;
use crate::db::StoreError;
use crate::engine::EngineError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Error de base de datos en operación '{operation}': {source}")]
    Database {
        operation: String,
        #[source]
        source: mongodb::error::Error,
    },

    #[error("Error de validación en campo '{field}': {message}")]
    ValidationWithField { field: String, message: String },

    #[error("Error de validación: {0}")]
    Validation(String),

    #[error("No autorizado: {0}")]
    Unauthorized(String),

    #[error("Acceso denegado: {0}")]
    Forbidden(String),

    #[error("No encontrado: {resource_type} con ID '{id}'")]
    NotFoundWithId { resource_type: String, id: String },

    /// Solapamiento con una reserva activa de la misma mesa
    #[error("La mesa ya está reservada en {slot} (reserva {booking_id})")]
    BookingConflict { booking_id: String, slot: String },

    #[error("Conflicto: {0}")]
    Conflict(String),

    /// El cliente puede reintentar la petición
    #[error("Servicio no disponible temporalmente: {0}")]
    Unavailable(String),

    #[error("Demasiadas peticiones, inténtelo de nuevo en {retry_after} s")]
    RateLimited { retry_after: u64 },

    #[error("Error interno: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation_field(field: &str, message: &str) -> Self {
        Self::ValidationWithField {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn not_found_id(resource_type: &str, id: &str) -> Self {
        Self::NotFoundWithId {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Database { .. } => "Error de base de datos",
            Self::ValidationWithField { .. } | Self::Validation(_) => "Error de validación",
            Self::Unauthorized(_) => "No autorizado",
            Self::Forbidden(_) => "Acceso denegado",
            Self::NotFoundWithId { .. } => "No encontrado",
            Self::BookingConflict { .. } | Self::Conflict(_) => "Conflicto",
            Self::Unavailable(_) => "Servicio no disponible",
            Self::RateLimited { .. } => "Demasiadas peticiones",
            Self::Internal(_) => "Error interno",
        }
    }
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Database { operation, source } => Self::Database { operation, source },
            StoreError::Duplicate(message) => Self::Conflict(message),
            StoreError::WriteConflict(_) | StoreError::LockTimeout(_) => {
                Self::Unavailable(error.to_string())
            }
        }
    }
}

impl From<EngineError> for AppError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::Validation(message) => Self::Validation(message),
            EngineError::Conflict { booking_id, slot } => Self::BookingConflict {
                booking_id: booking_id.to_hex(),
                slot: slot.to_string(),
            },
            EngineError::Capacity { .. } | EngineError::InvalidTransition { .. } => {
                Self::Conflict(error.to_string())
            }
            EngineError::NotFound { kind, id } => Self::not_found_id(kind, &id.to_hex()),
            EngineError::WriteConflict(message) | EngineError::Transient(message) => {
                Self::Unavailable(message)
            }
            EngineError::Store(store) => store.into(),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationWithField { .. } | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFoundWithId { .. } => StatusCode::NOT_FOUND,
            Self::BookingConflict { .. } | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Database { .. } | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        match self {
            Self::Database { .. } | Self::Internal(_) => log_error_chain(self, Some("respuesta HTTP")),
            Self::Unavailable(message) => tracing::warn!(reason = %message, "Operación transitoria rechazada"),
            Self::Unauthorized(_) | Self::Forbidden(_) | Self::RateLimited { .. } => {
                tracing::warn!(status = status.as_u16(), error = %self, "Acceso rechazado")
            }
            _ => tracing::info!(status = status.as_u16(), error = %self, "Petición rechazada"),
        }

        // No se exponen detalles internos de la base de datos
        let message = match self {
            Self::Database { .. } => "Error interno del servidor".to_string(),
            Self::ValidationWithField { field, message } => format!("Campo '{field}': {message}"),
            other => other.to_string(),
        };
        let details = match self {
            Self::BookingConflict { booking_id, slot } => Some(serde_json::json!({
                "booking_id": booking_id,
                "slot": slot,
            })),
            Self::RateLimited { retry_after } => Some(serde_json::json!({
                "retry_after": retry_after,
            })),
            _ => None,
        };

        let mut builder = HttpResponse::build(status);
        match self {
            Self::Unavailable(_) => {
                builder.insert_header(("Retry-After", "1"));
            }
            Self::RateLimited { retry_after } => {
                builder.insert_header(("Retry-After", retry_after.to_string()));
            }
            _ => {}
        }
        builder.json(ErrorResponse {
            error: self.label().to_string(),
            message,
            details,
        })
    }
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

pub type AppResult<T> = Result<T, AppError>;

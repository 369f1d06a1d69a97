//! # Table Booking
//!
//! Servicio de reservas de mesas para restaurante. El núcleo es el motor de
//! disponibilidad ([`engine`]), que garantiza que ninguna mesa tenga dos
//! reservas activas solapadas aunque lleguen peticiones concurrentes.
//!
//! - [`db`] - Modelos y almacenes (MongoDB y memoria)
//! - [`engine`] - Disponibilidad, compromiso de reservas y ciclo de vida
//! - [`analytics`] - Agregados para el panel de estadísticas
//! - [`api`] - API REST con Actix Web
//! - [`config`] - Configuración por variables de entorno

pub mod analytics;
pub mod api;
pub mod config;
pub mod db;
pub mod engine;

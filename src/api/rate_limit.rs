//! # Límite de peticiones por IP
//!
//! Ventana fija por ruta e IP. Toda la API comparte un límite general y el
//! login tiene uno propio, más estricto. Superarlo devuelve 429 con
//! `Retry-After`.

use actix_web::body::{EitherBody, MessageBody};
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::middleware::Next;
use actix_web::{web, HttpRequest, ResponseError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::{AppError, AppResult, AppState};

/// Peticiones permitidas por ventana
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limit {
    pub max_requests: u32,
    pub window: Duration,
}

impl Limit {
    /// 100 peticiones cada 15 minutos
    pub const API: Limit = Limit {
        max_requests: 100,
        window: Duration::from_secs(15 * 60),
    };

    /// 5 intentos de login por minuto
    pub const LOGIN: Limit = Limit {
        max_requests: 5,
        window: Duration::from_secs(60),
    };
}

struct IpEntry {
    count: u32,
    window_start: Instant,
}

#[derive(Clone)]
pub struct RateLimiter {
    /// ruta -> (IP -> entrada)
    inner: Arc<Mutex<HashMap<&'static str, HashMap<String, IpEntry>>>>,
    api: Limit,
    login: Limit,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Limit::API, Limit::LOGIN)
    }
}

impl RateLimiter {
    pub fn new(api: Limit, login: Limit) -> Self {
        RateLimiter {
            inner: Arc::new(Mutex::new(HashMap::new())),
            api,
            login,
        }
    }

    /// Cuenta la petición; si supera el límite devuelve cuánto falta para
    /// que se abra la ventana siguiente
    async fn check(&self, route: &'static str, ip: &str, limit: Limit) -> Result<(), Duration> {
        let mut map = self.inner.lock().await;
        let now = Instant::now();
        let entry = map
            .entry(route)
            .or_default()
            .entry(ip.to_owned())
            .or_insert_with(|| IpEntry {
                count: 0,
                window_start: now,
            });

        if now.duration_since(entry.window_start) >= limit.window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;
        if entry.count <= limit.max_requests {
            Ok(())
        } else {
            Err(limit.window.saturating_sub(now.duration_since(entry.window_start)))
        }
    }

    pub async fn check_api(&self, ip: &str) -> AppResult<()> {
        self.check("api", ip, self.api).await.map_err(|wait| rejected(ip, "api", wait))
    }

    pub async fn check_login(&self, ip: &str) -> AppResult<()> {
        self.check("login", ip, self.login)
            .await
            .map_err(|wait| rejected(ip, "login", wait))
    }

    /// Elimina las entradas cuya ventana terminó
    pub async fn cleanup(&self) {
        let mut map = self.inner.lock().await;
        let now = Instant::now();
        for (route, entries) in map.iter_mut() {
            let window = if *route == "login" {
                self.login.window
            } else {
                self.api.window
            };
            entries.retain(|_, entry| now.duration_since(entry.window_start) < window);
        }
        map.retain(|_, entries| !entries.is_empty());
    }

    #[cfg(test)]
    async fn tracked_ips(&self) -> usize {
        self.inner.lock().await.values().map(HashMap::len).sum()
    }
}

fn rejected(ip: &str, route: &str, wait: Duration) -> AppError {
    let retry_after = wait.as_secs().max(1);
    tracing::warn!(ip = %ip, route, retry_after, "Límite de peticiones superado");
    AppError::RateLimited { retry_after }
}

/// IP del cliente: primera entrada de `X-Forwarded-For` o la dirección del par
pub fn client_ip(req: &HttpRequest) -> String {
    let forwarded = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_owned();
    }
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_owned())
}

/// Middleware del límite general de la API
pub async fn limit_api_requests<B: MessageBody>(
    req: ServiceRequest,
    next: Next<B>,
) -> Result<ServiceResponse<EitherBody<B>>, actix_web::Error> {
    let limiter = req
        .app_data::<web::Data<AppState>>()
        .map(|state| state.rate_limiter.clone());
    if let Some(limiter) = limiter {
        let ip = client_ip(req.request());
        if let Err(error) = limiter.check_api(&ip).await {
            let response = error.error_response();
            return Ok(req.into_response(response).map_into_right_body());
        }
    }
    next.call(req).await.map(ServiceResponse::map_into_left_body)
}

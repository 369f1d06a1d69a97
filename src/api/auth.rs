//! # Autenticación del personal
//!
//! Las operaciones que modifican datos exigen un token Bearer emitido a un
//! miembro activo del personal. Algunas además exigen un rol concreto.
//!
//! El token se obtiene al crear la cuenta o con `POST /api/auth/login`
//! (email y contraseña). Las contraseñas se guardan como hash argon2.

use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::rate_limit::client_ip;
use super::validation::validate_email;
use super::{AppError, AppResult, AppState};
use crate::db::{Staff, StaffRole};

pub const MANAGERS: &[StaffRole] = &[StaffRole::Manager, StaffRole::Admin];
pub const ADMINS: &[StaffRole] = &[StaffRole::Admin];

/// Extrae el token Bearer del header Authorization
///
/// # Errores
/// - `Unauthorized`: si falta el header, es inválido o no tiene el formato correcto
pub fn extract_token(req: &HttpRequest) -> AppResult<String> {
    let auth_header = req
        .headers()
        .get("authorization")
        .ok_or(AppError::Unauthorized("Falta header Authorization".to_string()))?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| AppError::Unauthorized("Header Authorization inválido".to_string()))?;

    match auth_str.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        _ => Err(AppError::Unauthorized("Formato de token inválido".to_string())),
    }
}

/// Miembro del personal dueño del token de la petición
pub async fn authenticate(state: &AppState, req: &HttpRequest) -> AppResult<Staff> {
    let token = extract_token(req)?;
    match state.store().staff_by_token(&token).await? {
        Some(staff) if staff.is_active => Ok(staff),
        Some(_) => Err(AppError::Unauthorized("Cuenta desactivada".to_string())),
        None => Err(AppError::Unauthorized("Token inválido".to_string())),
    }
}

/// Como [`authenticate`] pero además exige uno de los roles indicados
pub async fn require_role(state: &AppState, req: &HttpRequest, roles: &[StaffRole]) -> AppResult<Staff> {
    let staff = authenticate(state, req).await?;
    if !staff.has_role(roles) {
        tracing::warn!(
            staff_id = %staff.id,
            role = staff.role.as_str(),
            path = %req.path(),
            "Rol insuficiente"
        );
        return Err(AppError::Forbidden("Permisos insuficientes".to_string()));
    }
    Ok(staff)
}

pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Hash argon2 con sal aleatoria, en formato PHC
pub fn hash_password(password: &str) -> AppResult<String> {
    use argon2::password_hash::rand_core::OsRng;
    use argon2::password_hash::SaltString;
    use argon2::{Argon2, PasswordHasher};

    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AppError::Internal(format!("no se pudo calcular el hash: {e}")))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    use argon2::{Argon2, PasswordHash, PasswordVerifier};

    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

pub fn validate_password(field: &str, password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::validation_field(
            field,
            &format!("debe tener al menos {MIN_PASSWORD_LENGTH} caracteres"),
        ));
    }
    Ok(())
}

/// Datos públicos de la sesión
#[derive(Serialize)]
struct SessionUser {
    id: String,
    first_name: String,
    last_name: String,
    email: String,
    role: StaffRole,
    section: Option<String>,
}

impl From<Staff> for SessionUser {
    fn from(staff: Staff) -> Self {
        SessionUser {
            id: staff.id.to_hex(),
            first_name: staff.first_name,
            last_name: staff.last_name,
            email: staff.email,
            role: staff.role,
            section: staff.section,
        }
    }
}

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

/// Inicia sesión con email y contraseña
///
/// # Respuesta
/// ```json
/// {
///   "token": "a1b2c3d4-...",
///   "user": { "id": "...", "first_name": "Sarah", "role": "manager", ... },
///   "message": "Sesión iniciada correctamente"
/// }
/// ```
///
/// Credenciales incorrectas, cuenta desactivada o sin contraseña: 401.
#[post("/auth/login")]
async fn login(
    state: web::Data<AppState>,
    data: web::Json<LoginRequest>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    state.rate_limiter.check_login(&client_ip(&req)).await?;
    let email = validate_email(&data.email)?;
    validate_password("password", &data.password)?;

    let staff = state.store().staff_by_email(&email).await?;
    let verified = staff.filter(|staff| {
        staff.is_active
            && staff
                .password_hash
                .as_deref()
                .is_some_and(|hash| verify_password(&data.password, hash))
    });
    let Some(staff) = verified else {
        tracing::warn!(email = %email, "Intento de login fallido");
        return Err(AppError::Unauthorized("Credenciales inválidas".to_string()));
    };

    tracing::info!(staff_id = %staff.id, role = staff.role.as_str(), "Sesión iniciada");
    let token = staff.access_token.clone();
    Ok(HttpResponse::Ok().json(json!({
        "token": token,
        "user": SessionUser::from(staff),
        "message": "Sesión iniciada correctamente",
    })))
}

/// Comprueba el token de la petición
#[get("/auth/verify")]
async fn verify(state: web::Data<AppState>, req: HttpRequest) -> AppResult<impl Responder> {
    let staff = authenticate(&state, &req).await?;
    Ok(HttpResponse::Ok().json(json!({
        "valid": true,
        "user": SessionUser::from(staff),
    })))
}

#[derive(Deserialize)]
struct PasswordChange {
    #[serde(default)]
    current_password: String,
    new_password: String,
}

/// Cambia la contraseña del dueño del token.
///
/// Si la cuenta aún no tiene contraseña basta con el token para fijar la
/// primera; si la tiene, `current_password` debe coincidir (400 si no).
#[post("/auth/change-password")]
async fn change_password(
    state: web::Data<AppState>,
    data: web::Json<PasswordChange>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let staff = authenticate(&state, &req).await?;
    validate_password("new_password", &data.new_password)?;

    if let Some(hash) = &staff.password_hash {
        if !verify_password(&data.current_password, hash) {
            return Err(AppError::validation_field(
                "current_password",
                "la contraseña actual no es correcta",
            ));
        }
    }

    let hash = hash_password(&data.new_password)?;
    if !state.store().set_staff_password(&staff.id, &hash).await? {
        return Err(AppError::not_found_id("personal", &staff.id.to_hex()));
    }
    tracing::info!(staff_id = %staff.id, "Contraseña actualizada");

    Ok(HttpResponse::Ok().json(json!({
        "message": "Contraseña actualizada correctamente",
    })))
}

/// Configura las rutas de sesión
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(login);
    cfg.service(verify);
    cfg.service(change_password);
}

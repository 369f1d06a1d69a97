//! # API de Personal
//!
//! Consulta del personal activo y alta de nuevos miembros. El token de
//! acceso solo se devuelve una vez, al crear la cuenta.

use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::auth::{authenticate, hash_password, require_role, validate_password, ADMINS};
use super::validation::{parse_object_id, validate_email, validate_name};
use super::{AppError, AppResult, AppState};
use crate::db::{Staff, StaffRole};

/// Miembro del personal sin el token de acceso
#[derive(Serialize)]
struct StaffResponse {
    id: String,
    first_name: String,
    last_name: String,
    email: String,
    role: StaffRole,
    section: Option<String>,
    is_active: bool,
    created_at: i64,
}

impl From<Staff> for StaffResponse {
    fn from(staff: Staff) -> Self {
        StaffResponse {
            id: staff.id.to_hex(),
            first_name: staff.first_name,
            last_name: staff.last_name,
            email: staff.email,
            role: staff.role,
            section: staff.section,
            is_active: staff.is_active,
            created_at: staff.created_at,
        }
    }
}

#[derive(Deserialize)]
struct NewStaff {
    first_name: String,
    last_name: String,
    email: String,
    role: StaffRole,
    section: Option<String>,
    /// Contraseña opcional para `POST /auth/login`
    password: Option<String>,
}

/// Lista el personal activo
#[get("/staff")]
async fn list_staff(state: web::Data<AppState>) -> AppResult<impl Responder> {
    let staff: Vec<StaffResponse> = state
        .store()
        .active_staff()
        .await?
        .into_iter()
        .map(StaffResponse::from)
        .collect();
    Ok(HttpResponse::Ok().json(staff))
}

#[get("/staff/{id}")]
async fn get_staff(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    authenticate(&state, &req).await?;
    let id = parse_object_id("id", &path.into_inner())?;
    let staff = state
        .store()
        .staff(&id)
        .await?
        .ok_or_else(|| AppError::not_found_id("personal", &id.to_hex()))?;
    Ok(HttpResponse::Ok().json(StaffResponse::from(staff)))
}

/// Da de alta a un miembro del personal (solo admin)
///
/// # Respuesta
/// ```json
/// {
///   "message": "Personal creado correctamente",
///   "id": "507f1f77bcf86cd799439011",
///   "access_token": "a1b2c3d4-..."
/// }
/// ```
#[post("/staff")]
async fn create_staff(
    state: web::Data<AppState>,
    data: web::Json<NewStaff>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let admin = require_role(&state, &req, ADMINS).await?;
    let data = data.into_inner();

    let mut staff = Staff::new(
        &validate_name("first_name", &data.first_name)?,
        &validate_name("last_name", &data.last_name)?,
        &validate_email(&data.email)?,
        data.role,
    );
    staff.section = data.section.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    if let Some(password) = &data.password {
        validate_password("password", password)?;
        staff.password_hash = Some(hash_password(password)?);
    }

    state.store().insert_staff(&staff).await?;
    tracing::info!(
        staff_id = %staff.id,
        role = staff.role.as_str(),
        created_by = %admin.id,
        "Personal creado"
    );

    Ok(HttpResponse::Created().json(json!({
        "message": "Personal creado correctamente",
        "id": staff.id.to_hex(),
        "access_token": staff.access_token,
    })))
}

/// Configura las rutas relacionadas con el personal
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(list_staff);
    cfg.service(create_staff);
    cfg.service(get_staff);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_app;
    use crate::api::test_support::{bearer, context};
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::Value;

    #[actix_web::test]
    async fn listing_never_exposes_tokens() {
        let ctx = context().await;
        let app = test::init_service(App::new().configure(configure_app(ctx.state.clone()))).await;

        let req = test::TestRequest::get().uri("/api/staff").to_request();
        let staff: Vec<Value> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(staff.len(), 3);
        assert!(staff.iter().all(|s| s.get("access_token").is_none()));
    }

    #[actix_web::test]
    async fn only_admins_issue_new_tokens() {
        let ctx = context().await;
        let app = test::init_service(App::new().configure(configure_app(ctx.state.clone()))).await;
        let body = json!({
            "first_name": "Jane",
            "last_name": "Smith",
            "email": "jane.smith@restaurant.com",
            "role": "server",
            "section": "bistro",
        });

        let req = test::TestRequest::post()
            .uri("/api/staff")
            .insert_header(bearer(&ctx.manager_token))
            .set_json(&body)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/api/staff")
            .insert_header(bearer(&ctx.admin_token))
            .set_json(&body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;
        let token = created["access_token"].as_str().unwrap().to_string();

        // El nuevo token ya autentica
        let req = test::TestRequest::get()
            .uri(&format!("/api/staff/{}", created["id"].as_str().unwrap()))
            .insert_header(bearer(&token))
            .to_request();
        let detail: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(detail["role"], "server");
        assert_eq!(detail["section"], "bistro");
    }

    #[actix_web::test]
    async fn staff_created_with_a_password_can_log_in() {
        let ctx = context().await;
        let app = test::init_service(App::new().configure(configure_app(ctx.state.clone()))).await;
        let mut body = json!({
            "first_name": "Jane",
            "last_name": "Smith",
            "email": "jane.smith@restaurant.com",
            "role": "host",
            "password": "123",
        });

        let req = test::TestRequest::post()
            .uri("/api/staff")
            .insert_header(bearer(&ctx.admin_token))
            .set_json(&body)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        body["password"] = json!("mesa-ventana");
        let req = test::TestRequest::post()
            .uri("/api/staff")
            .insert_header(bearer(&ctx.admin_token))
            .set_json(&body)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "email": "jane.smith@restaurant.com", "password": "mesa-ventana" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let login: Value = test::read_body_json(resp).await;
        assert_eq!(login["user"]["role"], "host");
        assert!(login["token"].is_string());
    }
}

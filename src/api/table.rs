//! # API de Mesas
//!
//! Listado de mesas con su ocupación actual, búsqueda de mesas libres para
//! una franja y comprobación de conflictos antes de reservar.

use actix_web::{get, post, put, web, HttpRequest, HttpResponse, Responder};
use chrono::{Local, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::auth::{require_role, MANAGERS};
use super::booking::BookingResponse;
use super::validation::{parse_object_id, validate_date, validate_duration, validate_name, validate_time};
use super::{AppError, AppResult, AppState};
use crate::db::{
    Booking, BookingFilter, Section, SectionPreference, Table, TableStatus, DEFAULT_DURATION_MINUTES,
    MAX_PARTY_SIZE, MIN_PARTY_SIZE,
};
use crate::engine::availability::occupied_at;
use crate::engine::AvailabilityQuery;

#[derive(Serialize)]
struct TableResponse {
    id: String,
    table_number: String,
    section: Section,
    capacity: u8,
    status: TableStatus,
    /// Ocupación en este momento según las reservas confirmadas de hoy
    current_status: TableStatus,
    created_at: i64,
}

impl TableResponse {
    fn new(table: Table, current_status: TableStatus) -> Self {
        TableResponse {
            id: table.id.to_hex(),
            table_number: table.table_number,
            section: table.section,
            capacity: table.capacity,
            status: table.status,
            current_status,
            created_at: table.created_at,
        }
    }

    fn plain(table: Table) -> Self {
        let status = table.status;
        TableResponse::new(table, status)
    }
}

fn current_status(table: &Table, today_bookings: &[Booking]) -> TableStatus {
    if table.status == TableStatus::Maintenance {
        return TableStatus::Maintenance;
    }
    let now = Local::now();
    let minute = now.hour() * 60 + now.minute();
    match occupied_at(today_bookings, &table.id, now.date_naive(), minute) {
        Some(_) => TableStatus::Occupied,
        None => TableStatus::Available,
    }
}

#[derive(Deserialize)]
struct AvailabilityParams {
    date: String,
    time: String,
    duration: Option<u16>,
    party_size: u8,
    #[serde(default)]
    section: SectionPreference,
}

#[derive(Deserialize)]
struct ConflictParams {
    date: String,
    time: String,
    duration: Option<u16>,
    exclude: Option<String>,
}

#[derive(Deserialize)]
struct NewTable {
    table_number: String,
    section: Section,
    capacity: u8,
    status: Option<TableStatus>,
}

#[derive(Deserialize)]
struct TableStatusChange {
    status: TableStatus,
}

/// Lista todas las mesas con su estado actual
#[get("/tables")]
async fn list_tables(state: web::Data<AppState>) -> AppResult<impl Responder> {
    let tables = state.store().tables().await?;
    let today = BookingFilter {
        active_only: true,
        ..BookingFilter::on_date(Local::now().date_naive())
    };
    let bookings = state.store().bookings(&today).await?;

    let response: Vec<TableResponse> = tables
        .into_iter()
        .map(|t| {
            let current = current_status(&t, &bookings);
            TableResponse::new(t, current)
        })
        .collect();
    Ok(HttpResponse::Ok().json(response))
}

/// Mesas libres para una franja
///
/// # Parámetros
/// - `date`: YYYY-MM-DD
/// - `time`: HH:MM
/// - `duration`: minutos (120 por defecto)
/// - `party_size`: comensales
/// - `section`: zona preferida o `any`
#[get("/tables/availability")]
async fn table_availability(
    state: web::Data<AppState>,
    params: web::Query<AvailabilityParams>,
) -> AppResult<impl Responder> {
    let params = params.into_inner();
    let query = AvailabilityQuery {
        date: validate_date(&params.date)?,
        time: validate_time(&params.time)?,
        duration_minutes: validate_duration(params.duration.unwrap_or(DEFAULT_DURATION_MINUTES))?,
        party_size: params.party_size,
        section: params.section.section(),
    };

    let tables = state.engine.find_available_tables(&query).await?;
    let response: Vec<TableResponse> = tables.into_iter().map(TableResponse::plain).collect();
    Ok(HttpResponse::Ok().json(response))
}

/// Detalle de una mesa con sus próximas reservas activas
#[get("/tables/{id}")]
async fn get_table(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<impl Responder> {
    let id = parse_object_id("id", &path.into_inner())?;
    let table = state
        .store()
        .table(&id)
        .await?
        .ok_or_else(|| AppError::not_found_id("mesa", &id.to_hex()))?;

    let today = Local::now().date_naive();
    let filter = BookingFilter {
        table_id: Some(id),
        from: Some(today),
        active_only: true,
        ..Default::default()
    };
    let mut upcoming = state.store().bookings(&filter).await?;
    upcoming.sort_by(|a, b| a.date.cmp(&b.date).then(a.time.cmp(&b.time)));

    let today_bookings: Vec<Booking> = upcoming.iter().filter(|b| b.date == today).cloned().collect();
    let current = current_status(&table, &today_bookings);
    let number = table.table_number.clone();
    let bookings: Vec<BookingResponse> = upcoming
        .into_iter()
        .map(|b| BookingResponse::new(b, Some(number.clone())))
        .collect();

    Ok(HttpResponse::Ok().json(json!({
        "table": TableResponse::new(table, current),
        "upcoming_bookings": bookings,
    })))
}

/// Comprueba si una franja choca con alguna reserva activa de la mesa
///
/// `exclude` permite ignorar la propia reserva al modificarla.
#[get("/tables/{id}/conflict")]
async fn table_conflict(
    state: web::Data<AppState>,
    path: web::Path<String>,
    params: web::Query<ConflictParams>,
) -> AppResult<impl Responder> {
    let id = parse_object_id("id", &path.into_inner())?;
    let params = params.into_inner();
    let exclude = params
        .exclude
        .as_deref()
        .map(|e| parse_object_id("exclude", e))
        .transpose()?;

    let table = state
        .store()
        .table(&id)
        .await?
        .ok_or_else(|| AppError::not_found_id("mesa", &id.to_hex()))?;

    let conflict = state
        .engine
        .find_conflict(
            &id,
            validate_date(&params.date)?,
            validate_time(&params.time)?,
            validate_duration(params.duration.unwrap_or(DEFAULT_DURATION_MINUTES))?,
            exclude.as_ref(),
        )
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "has_conflict": conflict.is_some(),
        "conflicting_booking": conflict.map(|b| BookingResponse::new(b, Some(table.table_number))),
    })))
}

/// Crea una mesa (manager, admin)
#[post("/tables")]
async fn create_table(
    state: web::Data<AppState>,
    data: web::Json<NewTable>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    require_role(&state, &req, MANAGERS).await?;
    let data = data.into_inner();

    let table_number = validate_name("table_number", &data.table_number)?;
    if !(MIN_PARTY_SIZE..=MAX_PARTY_SIZE).contains(&data.capacity) {
        return Err(AppError::validation_field("capacity", "debe estar entre 1 y 20"));
    }

    let mut table = Table::new(&table_number, data.section, data.capacity);
    if let Some(status) = data.status {
        table.status = status;
    }
    state.store().insert_table(&table).await?;
    tracing::info!(table_id = %table.id, table_number = %table.table_number, "Mesa creada");

    Ok(HttpResponse::Created().json(TableResponse::plain(table)))
}

/// Cambia el estado administrativo de una mesa (manager, admin)
#[put("/tables/{id}/status")]
async fn update_table_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
    data: web::Json<TableStatusChange>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    require_role(&state, &req, MANAGERS).await?;
    let id = parse_object_id("id", &path.into_inner())?;

    if !state.store().set_table_status(&id, data.status).await? {
        return Err(AppError::not_found_id("mesa", &id.to_hex()));
    }
    tracing::info!(table_id = %id, status = data.status.as_str(), "Estado de mesa actualizado");

    Ok(HttpResponse::Ok().json(json!({
        "message": "Estado de mesa actualizado",
        "id": id.to_hex(),
        "status": data.status,
    })))
}

/// Configura las rutas relacionadas con mesas
///
/// - `GET /tables` - Listar con estado actual
/// - `GET /tables/availability` - Mesas libres para una franja
/// - `GET /tables/{id}` - Detalle y próximas reservas
/// - `GET /tables/{id}/conflict` - Comprobar conflicto
/// - `POST /tables` - Crear (manager, admin)
/// - `PUT /tables/{id}/status` - Cambiar estado (manager, admin)
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(list_tables);
    cfg.service(table_availability);
    cfg.service(create_table);
    cfg.service(get_table);
    cfg.service(table_conflict);
    cfg.service(update_table_status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_app;
    use crate::api::test_support::{bearer, context};
    use crate::db::{CustomerSnapshot, ServicePeriod};
    use crate::engine::BookingDraft;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::Value;

    async fn book(ctx: &crate::api::test_support::TestContext, table: &Table, time: &str) -> String {
        let mut draft = BookingDraft::new(
            CustomerSnapshot {
                name: "Margaret Briggs".to_string(),
                phone: "+61412345678".to_string(),
                email: None,
                company: None,
            },
            "2025-09-22".parse().unwrap(),
            validate_time(time).unwrap(),
            2,
            ServicePeriod::Dinner,
        );
        draft.table_id = Some(table.id);
        ctx.state.engine.commit_booking(draft, None).await.unwrap().to_hex()
    }

    #[actix_web::test]
    async fn availability_skips_booked_tables_and_respects_section() {
        let ctx = context().await;
        book(&ctx, &ctx.t1, "18:00").await;
        let app = test::init_service(App::new().configure(configure_app(ctx.state.clone()))).await;

        let req = test::TestRequest::get()
            .uri("/api/tables/availability?date=2025-09-22&time=19:00&party_size=2")
            .to_request();
        let tables: Vec<Value> = test::call_and_read_body_json(&app, req).await;
        let numbers: Vec<&str> = tables.iter().map(|t| t["table_number"].as_str().unwrap()).collect();
        assert_eq!(numbers, ["T2", "T30"]);

        let req = test::TestRequest::get()
            .uri("/api/tables/availability?date=2025-09-22&time=20:00&party_size=2&section=bistro")
            .to_request();
        let tables: Vec<Value> = test::call_and_read_body_json(&app, req).await;
        let numbers: Vec<&str> = tables.iter().map(|t| t["table_number"].as_str().unwrap()).collect();
        assert_eq!(numbers, ["T1", "T2"]);

        let req = test::TestRequest::get()
            .uri("/api/tables/availability?date=2025-09-22&time=23:30&duration=60&party_size=2")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn conflict_check_can_exclude_a_booking() {
        let ctx = context().await;
        let id = book(&ctx, &ctx.t1, "18:00").await;
        let app = test::init_service(App::new().configure(configure_app(ctx.state.clone()))).await;
        let t1 = ctx.t1.id.to_hex();

        let req = test::TestRequest::get()
            .uri(&format!("/api/tables/{t1}/conflict?date=2025-09-22&time=19:30&duration=60"))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["has_conflict"], true);
        assert_eq!(body["conflicting_booking"]["id"], id.as_str());

        let req = test::TestRequest::get()
            .uri(&format!(
                "/api/tables/{t1}/conflict?date=2025-09-22&time=19:30&duration=60&exclude={id}"
            ))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["has_conflict"], false);
    }

    #[actix_web::test]
    async fn table_management_requires_manager() {
        let ctx = context().await;
        let app = test::init_service(App::new().configure(configure_app(ctx.state.clone()))).await;
        let body = json!({ "table_number": "T40", "section": "main-lounge", "capacity": 6 });

        let req = test::TestRequest::post()
            .uri("/api/tables")
            .insert_header(bearer(&ctx.host_token))
            .set_json(&body)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/api/tables")
            .insert_header(bearer(&ctx.manager_token))
            .set_json(&body)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = test::TestRequest::put()
            .uri(&format!("/api/tables/{}/status", ctx.t2.id.to_hex()))
            .insert_header(bearer(&ctx.admin_token))
            .set_json(json!({ "status": "maintenance" }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/api/tables").to_request();
        let tables: Vec<Value> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(tables.len(), 4);
        let t2 = tables.iter().find(|t| t["table_number"] == "T2").unwrap();
        assert_eq!(t2["current_status"], "maintenance");
    }

    #[actix_web::test]
    async fn unknown_table_is_not_found() {
        let ctx = context().await;
        let app = test::init_service(App::new().configure(configure_app(ctx.state.clone()))).await;

        let req = test::TestRequest::get()
            .uri(&format!("/api/tables/{}", mongodb::bson::oid::ObjectId::new().to_hex()))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::NOT_FOUND);

        let req = test::TestRequest::get().uri("/api/tables/T1").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}

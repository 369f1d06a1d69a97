//! # API de Reservas
//!
//! Este módulo maneja todas las operaciones relacionadas con reservas:
//! - Crear reservas (con comprobación de conflictos de horario)
//! - Listar reservas con filtros opcionales
//! - Modificar una reserva con un conjunto cerrado de campos
//! - Cambios de estado, cancelación y operaciones en lote
//! - Historial de cambios
//!
//! Las operaciones que modifican datos requieren autenticación mediante token Bearer.

use actix_web::{delete, get, post, put, web, HttpRequest, HttpResponse, Responder};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use std::collections::HashMap;

use super::auth::{authenticate, require_role, MANAGERS};
use super::validation::{
    parse_object_id, validate_date, validate_duration, validate_email, validate_name,
    validate_notes, validate_party_size, validate_phone, validate_time,
};
use super::{AppError, AppResult, AppState};
use crate::db::{
    Booking, BookingFilter, BookingSnapshot, BookingStatus, CustomerSnapshot, HistoryAction,
    HistoryEntry, SectionPreference, ServicePeriod,
};
use crate::engine::{BatchAction, BookingChanges, BookingDraft};

/// Reserva tal como se envía al frontend: identificadores en hexadecimal,
/// fecha `YYYY-MM-DD` y hora `HH:MM`.
#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub id: String,
    pub customer_id: String,
    pub table_id: Option<String>,
    pub table_number: Option<String>,
    pub staff_id: Option<String>,
    pub date: String,
    pub time: String,
    pub duration: u16,
    pub party_size: u8,
    pub service: ServicePeriod,
    pub section: SectionPreference,
    pub status: BookingStatus,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub customer_company: Option<String>,
    pub tags: Option<String>,
    pub internal_notes: Option<String>,
    pub customer_notes: Option<String>,
    pub special_requirements: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl BookingResponse {
    pub fn new(booking: Booking, table_number: Option<String>) -> Self {
        BookingResponse {
            id: booking.id.to_hex(),
            customer_id: booking.customer_id.to_hex(),
            table_id: booking.table_id.map(|id| id.to_hex()),
            table_number,
            staff_id: booking.staff_id.map(|id| id.to_hex()),
            date: booking.date.to_string(),
            time: booking.time.format("%H:%M").to_string(),
            duration: booking.duration_minutes,
            party_size: booking.party_size,
            service: booking.service,
            section: booking.section,
            status: booking.status,
            customer_name: booking.customer.name,
            customer_phone: booking.customer.phone,
            customer_email: booking.customer.email,
            customer_company: booking.customer.company,
            tags: booking.tags,
            internal_notes: booking.internal_notes,
            customer_notes: booking.customer_notes,
            special_requirements: booking.special_requirements,
            created_at: booking.created_at,
            updated_at: booking.updated_at,
        }
    }
}

/// Número de mesa por identificador, para etiquetar las respuestas
pub async fn table_numbers(state: &AppState) -> AppResult<HashMap<ObjectId, String>> {
    Ok(state
        .store()
        .tables()
        .await?
        .into_iter()
        .map(|t| (t.id, t.table_number))
        .collect())
}

pub fn with_table_numbers(bookings: Vec<Booking>, numbers: &HashMap<ObjectId, String>) -> Vec<BookingResponse> {
    bookings
        .into_iter()
        .map(|b| {
            let number = b.table_id.and_then(|id| numbers.get(&id).cloned());
            BookingResponse::new(b, number)
        })
        .collect()
}

async fn respond_with(state: &AppState, booking: Booking) -> AppResult<BookingResponse> {
    let number = match booking.table_id {
        Some(id) => state.store().table(&id).await?.map(|t| t.table_number),
        None => None,
    };
    Ok(BookingResponse::new(booking, number))
}

#[derive(Serialize)]
struct HistoryResponse {
    id: String,
    action: HistoryAction,
    old_values: Option<BookingSnapshot>,
    new_values: Option<BookingSnapshot>,
    changed_by: Option<String>,
    notes: Option<String>,
    created_at: i64,
}

impl From<HistoryEntry> for HistoryResponse {
    fn from(entry: HistoryEntry) -> Self {
        HistoryResponse {
            id: entry.id.to_hex(),
            action: entry.action,
            old_values: entry.old_values,
            new_values: entry.new_values,
            changed_by: entry.changed_by.map(|id| id.to_hex()),
            notes: entry.notes,
            created_at: entry.created_at,
        }
    }
}

/// Máximo de reservas devueltas por un listado
const MAX_LIST_LIMIT: usize = 500;

fn list_limit(requested: Option<usize>) -> Option<usize> {
    requested.map(|limit| limit.min(MAX_LIST_LIMIT))
}

/// Parámetros de consulta para listar reservas
#[derive(Deserialize)]
struct BookingQuery {
    date: Option<String>,
    from: Option<String>,
    to: Option<String>,
    service: Option<ServicePeriod>,
    section: Option<SectionPreference>,
    status: Option<BookingStatus>,
    customer_id: Option<String>,
    table_id: Option<String>,
    limit: Option<usize>,
}

/// Datos para crear una reserva
///
/// La mesa se puede indicar por identificador o por número (`T1`).
#[derive(Deserialize)]
struct CreateBooking {
    customer_name: String,
    customer_phone: String,
    customer_email: Option<String>,
    customer_company: Option<String>,
    table_id: Option<String>,
    table_number: Option<String>,
    staff_id: Option<String>,
    date: String,
    time: String,
    duration: Option<u16>,
    party_size: u8,
    service: ServicePeriod,
    #[serde(default)]
    section: SectionPreference,
    status: Option<BookingStatus>,
    tags: Option<String>,
    internal_notes: Option<String>,
    customer_notes: Option<String>,
    special_requirements: Option<String>,
}

/// Distingue "campo ausente" (`None`) de "campo a null" (`Some(None)`)
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Campos modificables de una reserva. Cualquier otro campo se rechaza.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct BookingChangesRequest {
    #[serde(default, deserialize_with = "nullable")]
    table_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    staff_id: Option<Option<String>>,
    date: Option<String>,
    time: Option<String>,
    duration: Option<u16>,
    party_size: Option<u8>,
    service: Option<ServicePeriod>,
    section: Option<SectionPreference>,
    tags: Option<String>,
    internal_notes: Option<String>,
    customer_notes: Option<String>,
    special_requirements: Option<String>,
}

impl BookingChangesRequest {
    fn into_changes(self) -> AppResult<BookingChanges> {
        let optional_id = |field: &str, value: Option<Option<String>>| -> AppResult<Option<Option<ObjectId>>> {
            match value {
                Some(Some(hex)) => Ok(Some(Some(parse_object_id(field, &hex)?))),
                Some(None) => Ok(Some(None)),
                None => Ok(None),
            }
        };
        for (field, value) in [
            ("tags", &self.tags),
            ("internal_notes", &self.internal_notes),
            ("customer_notes", &self.customer_notes),
            ("special_requirements", &self.special_requirements),
        ] {
            validate_notes(field, value)?;
        }

        Ok(BookingChanges {
            table_id: optional_id("table_id", self.table_id)?,
            staff_id: optional_id("staff_id", self.staff_id)?,
            date: self.date.as_deref().map(validate_date).transpose()?,
            time: self.time.as_deref().map(validate_time).transpose()?,
            duration_minutes: self.duration.map(validate_duration).transpose()?,
            party_size: self.party_size.map(validate_party_size).transpose()?,
            service: self.service,
            section: self.section,
            tags: self.tags,
            internal_notes: self.internal_notes,
            customer_notes: self.customer_notes,
            special_requirements: self.special_requirements,
        })
    }
}

#[derive(Deserialize)]
struct StatusChange {
    status: BookingStatus,
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum BatchKind {
    Confirm,
    Cancel,
    UpdateStatus,
}

#[derive(Deserialize)]
struct BatchRequest {
    action: BatchKind,
    booking_ids: Vec<String>,
    status: Option<BookingStatus>,
}

/// Lista reservas: fecha descendente, hora ascendente
///
/// # Filtros disponibles
/// - `date`, o bien `from` y `to` (formato YYYY-MM-DD)
/// - `service`, `section`, `status`
/// - `customer_id`, `table_id`
/// - `limit` (como mucho 500)
#[get("/bookings")]
async fn list_bookings(
    state: web::Data<AppState>,
    query: web::Query<BookingQuery>,
) -> AppResult<impl Responder> {
    let query = query.into_inner();
    let filter = BookingFilter {
        date: query.date.as_deref().map(validate_date).transpose()?,
        from: query.from.as_deref().map(validate_date).transpose()?,
        to: query.to.as_deref().map(validate_date).transpose()?,
        service: query.service,
        section: query.section,
        status: query.status,
        customer_id: query
            .customer_id
            .as_deref()
            .map(|id| parse_object_id("customer_id", id))
            .transpose()?,
        table_id: query
            .table_id
            .as_deref()
            .map(|id| parse_object_id("table_id", id))
            .transpose()?,
        active_only: false,
        limit: list_limit(query.limit),
    };

    let bookings = state.store().bookings(&filter).await?;
    let numbers = table_numbers(&state).await?;
    Ok(HttpResponse::Ok().json(with_table_numbers(bookings, &numbers)))
}

#[get("/bookings/{id}")]
async fn get_booking(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<impl Responder> {
    let id = parse_object_id("id", &path.into_inner())?;
    let booking = state
        .store()
        .booking(&id)
        .await?
        .ok_or_else(|| AppError::not_found_id("reserva", &id.to_hex()))?;
    Ok(HttpResponse::Ok().json(respond_with(&state, booking).await?))
}

#[get("/bookings/{id}/history")]
async fn booking_history(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    authenticate(&state, &req).await?;
    let id = parse_object_id("id", &path.into_inner())?;
    if state.store().booking(&id).await?.is_none() {
        return Err(AppError::not_found_id("reserva", &id.to_hex()));
    }
    let history: Vec<HistoryResponse> = state
        .store()
        .history(&id)
        .await?
        .into_iter()
        .map(HistoryResponse::from)
        .collect();
    Ok(HttpResponse::Ok().json(history))
}

/// Crea una reserva
///
/// # Respuesta
/// ```json
/// {
///   "message": "Reserva creada correctamente",
///   "id": "507f1f77bcf86cd799439011",
///   "status": "pending"
/// }
/// ```
///
/// # Errores
/// - `400 Bad Request`: datos de validación incorrectos
/// - `401 Unauthorized`: token inválido o falta autorización
/// - `404 Not Found`: mesa o personal no encontrados
/// - `409 Conflict`: la mesa ya está reservada o no tiene capacidad
/// - `503 Service Unavailable`: bloqueo ocupado, reintentar
#[post("/bookings")]
async fn create_booking(
    state: web::Data<AppState>,
    data: web::Json<CreateBooking>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let staff = authenticate(&state, &req).await?;
    let data = data.into_inner();

    let customer = CustomerSnapshot {
        name: validate_name("customer_name", &data.customer_name)?,
        phone: validate_phone(&data.customer_phone)?,
        email: data.customer_email.as_deref().map(validate_email).transpose()?,
        company: data.customer_company,
    };
    for (field, value) in [
        ("tags", &data.tags),
        ("internal_notes", &data.internal_notes),
        ("customer_notes", &data.customer_notes),
        ("special_requirements", &data.special_requirements),
    ] {
        validate_notes(field, value)?;
    }

    let table_id = match (&data.table_id, &data.table_number) {
        (Some(id), _) => Some(parse_object_id("table_id", id)?),
        (None, Some(number)) => {
            let tables = state.store().tables().await?;
            let table = tables
                .into_iter()
                .find(|t| t.table_number == *number)
                .ok_or_else(|| AppError::not_found_id("mesa", number))?;
            Some(table.id)
        }
        (None, None) => None,
    };

    let mut draft = BookingDraft::new(
        customer,
        validate_date(&data.date)?,
        validate_time(&data.time)?,
        validate_party_size(data.party_size)?,
        data.service,
    );
    draft.table_id = table_id;
    draft.staff_id = data
        .staff_id
        .as_deref()
        .map(|id| parse_object_id("staff_id", id))
        .transpose()?;
    if let Some(duration) = data.duration {
        draft.duration_minutes = validate_duration(duration)?;
    }
    draft.section = data.section;
    if let Some(status) = data.status {
        draft.status = status;
    }
    draft.tags = data.tags;
    draft.internal_notes = data.internal_notes;
    draft.customer_notes = data.customer_notes;
    draft.special_requirements = data.special_requirements;
    let status = draft.status;

    let id = state.engine.commit_booking(draft, Some(staff.id)).await?;

    Ok(HttpResponse::Created().json(json!({
        "message": "Reserva creada correctamente",
        "id": id.to_hex(),
        "status": status,
    })))
}

#[put("/bookings/{id}")]
async fn update_booking(
    state: web::Data<AppState>,
    path: web::Path<String>,
    data: web::Json<BookingChangesRequest>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let staff = authenticate(&state, &req).await?;
    let id = parse_object_id("id", &path.into_inner())?;
    let changes = data.into_inner().into_changes()?;

    let booking = state.engine.update_booking(&id, &changes, Some(staff.id)).await?;
    Ok(HttpResponse::Ok().json(respond_with(&state, booking).await?))
}

#[post("/bookings/{id}/status")]
async fn change_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
    data: web::Json<StatusChange>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let staff = authenticate(&state, &req).await?;
    let id = parse_object_id("id", &path.into_inner())?;

    let booking = state
        .engine
        .transition_status(&id, data.status, Some(staff.id))
        .await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Estado actualizado correctamente",
        "id": id.to_hex(),
        "status": booking.status,
    })))
}

/// Cancela una reserva. No se borra: queda en estado `cancelled`.
#[delete("/bookings/{id}")]
async fn cancel_booking(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let staff = authenticate(&state, &req).await?;
    let id = parse_object_id("id", &path.into_inner())?;

    state.engine.cancel_booking(&id, Some(staff.id)).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": "Reserva cancelada correctamente",
        "id": id.to_hex(),
        "status": BookingStatus::Cancelled,
    })))
}

/// Confirma, cancela o cambia el estado de varias reservas a la vez.
/// Si una falla no se modifica ninguna.
#[post("/bookings/batch")]
async fn batch_update(
    state: web::Data<AppState>,
    data: web::Json<BatchRequest>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let staff = require_role(&state, &req, MANAGERS).await?;
    let data = data.into_inner();

    let action = match (data.action, data.status) {
        (BatchKind::Confirm, _) => BatchAction::Confirm,
        (BatchKind::Cancel, _) => BatchAction::Cancel,
        (BatchKind::UpdateStatus, Some(status)) => BatchAction::UpdateStatus(status),
        (BatchKind::UpdateStatus, None) => {
            return Err(AppError::validation_field(
                "status",
                "es obligatorio para la acción update_status",
            ))
        }
    };
    let ids = data
        .booking_ids
        .iter()
        .map(|id| parse_object_id("booking_ids", id))
        .collect::<AppResult<Vec<_>>>()?;

    let affected = state.engine.batch_update(action, &ids, Some(staff.id)).await?;
    Ok(HttpResponse::Ok().json(json!({
        "message": format!("{affected} reservas actualizadas"),
        "affected_rows": affected,
    })))
}

/// Configura las rutas relacionadas con reservas
///
/// - `GET /bookings` - Listar con filtros
/// - `POST /bookings/batch` - Operación en lote (manager, admin)
/// - `GET /bookings/{id}` - Detalle
/// - `GET /bookings/{id}/history` - Historial
/// - `POST /bookings` - Crear
/// - `PUT /bookings/{id}` - Modificar
/// - `POST /bookings/{id}/status` - Cambiar estado
/// - `DELETE /bookings/{id}` - Cancelar
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(list_bookings);
    cfg.service(batch_update);
    cfg.service(create_booking);
    cfg.service(get_booking);
    cfg.service(booking_history);
    cfg.service(update_booking);
    cfg.service(change_status);
    cfg.service(cancel_booking);
}

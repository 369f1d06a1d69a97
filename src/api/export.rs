//! # Exportación de reservas
//!
//! `GET /api/bookings/export?start_date&end_date&format=csv|json` descarga las
//! reservas de un rango de fechas (ambos extremos incluidos), ordenadas por
//! fecha y hora. CSV y JSON llevan las mismas columnas.

use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::auth::authenticate;
use super::booking::table_numbers;
use super::validation::validate_date;
use super::{AppError, AppResult, AppState};
use crate::db::{Booking, BookingFilter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ExportFormat {
    Csv,
    #[default]
    Json,
}

#[derive(Deserialize)]
struct ExportQuery {
    start_date: String,
    end_date: String,
    #[serde(default)]
    format: ExportFormat,
}

/// Fila exportada
#[derive(Debug, Serialize)]
struct ExportRow {
    id: String,
    date: String,
    time: String,
    duration: u16,
    party_size: u8,
    service: &'static str,
    section: &'static str,
    status: &'static str,
    table_number: Option<String>,
    customer_name: String,
    customer_phone: String,
    customer_email: Option<String>,
    customer_company: Option<String>,
    staff_name: Option<String>,
    tags: Option<String>,
    internal_notes: Option<String>,
    customer_notes: Option<String>,
    special_requirements: Option<String>,
    created_at: i64,
}

const CSV_HEADER: [&str; 19] = [
    "id",
    "date",
    "time",
    "duration",
    "party_size",
    "service",
    "section",
    "status",
    "table_number",
    "customer_name",
    "customer_phone",
    "customer_email",
    "customer_company",
    "staff_name",
    "tags",
    "internal_notes",
    "customer_notes",
    "special_requirements",
    "created_at",
];

impl ExportRow {
    fn new(booking: Booking, table_number: Option<String>, staff_name: Option<String>) -> Self {
        ExportRow {
            id: booking.id.to_hex(),
            date: booking.date.to_string(),
            time: booking.time.format("%H:%M").to_string(),
            duration: booking.duration_minutes,
            party_size: booking.party_size,
            service: booking.service.as_str(),
            section: booking.section.as_str(),
            status: booking.status.as_str(),
            table_number,
            customer_name: booking.customer.name,
            customer_phone: booking.customer.phone,
            customer_email: booking.customer.email,
            customer_company: booking.customer.company,
            staff_name,
            tags: booking.tags,
            internal_notes: booking.internal_notes,
            customer_notes: booking.customer_notes,
            special_requirements: booking.special_requirements,
            created_at: booking.created_at,
        }
    }

    /// Celdas en el orden de `CSV_HEADER`
    fn cells(&self) -> [String; 19] {
        let optional = |value: &Option<String>| value.clone().unwrap_or_default();
        [
            self.id.clone(),
            self.date.clone(),
            self.time.clone(),
            self.duration.to_string(),
            self.party_size.to_string(),
            self.service.to_string(),
            self.section.to_string(),
            self.status.to_string(),
            optional(&self.table_number),
            self.customer_name.clone(),
            self.customer_phone.clone(),
            optional(&self.customer_email),
            optional(&self.customer_company),
            optional(&self.staff_name),
            optional(&self.tags),
            optional(&self.internal_notes),
            optional(&self.customer_notes),
            optional(&self.special_requirements),
            self.created_at.to_string(),
        ]
    }
}

/// Entrecomilla la celda si lleva comas, comillas o saltos de línea
fn csv_cell(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn to_csv(rows: &[ExportRow]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(CSV_HEADER.join(","));
    for row in rows {
        let cells: Vec<String> = row.cells().iter().map(|cell| csv_cell(cell)).collect();
        lines.push(cells.join(","));
    }
    let mut csv = lines.join("\n");
    csv.push('\n');
    csv
}

async fn staff_names(state: &AppState, bookings: &[Booking]) -> AppResult<HashMap<ObjectId, String>> {
    let mut names = HashMap::new();
    for staff_id in bookings.iter().filter_map(|b| b.staff_id) {
        if names.contains_key(&staff_id) {
            continue;
        }
        if let Some(staff) = state.store().staff(&staff_id).await? {
            names.insert(staff_id, format!("{} {}", staff.first_name, staff.last_name));
        }
    }
    Ok(names)
}

/// Descarga las reservas entre `start_date` y `end_date`
#[get("/bookings/export")]
async fn export_bookings(
    state: web::Data<AppState>,
    query: web::Query<ExportQuery>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    let staff = authenticate(&state, &req).await?;
    let start = validate_date(&query.start_date)?;
    let end = validate_date(&query.end_date)?;
    if start > end {
        return Err(AppError::validation_field(
            "end_date",
            "debe ser igual o posterior a start_date",
        ));
    }

    let mut bookings = state.store().bookings(&BookingFilter::between(start, end)).await?;
    bookings.sort_by(|a, b| a.date.cmp(&b.date).then(a.time.cmp(&b.time)));

    let tables = table_numbers(&state).await?;
    let staff_by_id = staff_names(&state, &bookings).await?;
    let rows: Vec<ExportRow> = bookings
        .into_iter()
        .map(|b| {
            let table = b.table_id.and_then(|id| tables.get(&id).cloned());
            let staff_name = b.staff_id.and_then(|id| staff_by_id.get(&id).cloned());
            ExportRow::new(b, table, staff_name)
        })
        .collect();

    tracing::info!(
        staff_id = %staff.id,
        start = %start,
        end = %end,
        format = ?query.format,
        rows = rows.len(),
        "Reservas exportadas"
    );

    let extension = match query.format {
        ExportFormat::Csv => "csv",
        ExportFormat::Json => "json",
    };
    let disposition = ContentDisposition {
        disposition: DispositionType::Attachment,
        parameters: vec![DispositionParam::Filename(format!(
            "bookings-{start}-{end}.{extension}"
        ))],
    };

    let mut response = HttpResponse::Ok();
    response.insert_header(disposition);
    Ok(match query.format {
        ExportFormat::Csv => response
            .content_type("text/csv; charset=utf-8")
            .body(to_csv(&rows)),
        ExportFormat::Json => response.json(rows),
    })
}

/// Se registra antes que `/bookings/{id}`
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(export_bookings);
}

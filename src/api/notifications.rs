//! # Avisos para el personal
//!
//! `GET /api/notifications` resume lo que necesita atención ahora mismo.
//! Solo aparecen los avisos con al menos una reserva:
//!
//! | Aviso | Reservas contadas | Prioridad |
//! |---|---|---|
//! | llegadas próximas | confirmadas hoy en las próximas 2 horas | media |
//! | sin confirmar | pendientes de hoy en adelante | alta |
//! | confirmación urgente | pendientes de mañana | crítica |
//! | no presentados | `no-show` de ayer | baja |

use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use chrono::{Days, Local, NaiveDateTime, Timelike};
use serde::Serialize;

use super::auth::authenticate;
use super::{AppResult, AppState};
use crate::db::{Booking, BookingFilter, BookingStatus};

const UPCOMING_WINDOW_MINUTES: u32 = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: &'static str,
    pub message: String,
    pub count: usize,
    pub priority: Priority,
}

/// Avisos calculados a partir de las reservas desde ayer en adelante
pub fn build_notifications(bookings: &[Booking], now: NaiveDateTime) -> Vec<Notification> {
    let today = now.date();
    let yesterday = today.checked_sub_days(Days::new(1));
    let tomorrow = today.checked_add_days(Days::new(1));
    let now_minute = now.hour() * 60 + now.minute();
    let window = now_minute..=now_minute + UPCOMING_WINDOW_MINUTES;

    let count = |predicate: &dyn Fn(&Booking) -> bool| bookings.iter().filter(|b| predicate(b)).count();
    let upcoming = count(&|b| {
        b.date == today
            && b.status == BookingStatus::Confirmed
            && window.contains(&(b.time.hour() * 60 + b.time.minute()))
    });
    let unconfirmed = count(&|b| b.date >= today && b.status == BookingStatus::Pending);
    let urgent = count(&|b| Some(b.date) == tomorrow && b.status == BookingStatus::Pending);
    let no_shows = count(&|b| Some(b.date) == yesterday && b.status == BookingStatus::NoShow);

    let candidates = [
        (
            upcoming,
            NotificationKind::Info,
            "Llegadas próximas",
            format!("{upcoming} reservas llegan en las próximas 2 horas"),
            Priority::Medium,
        ),
        (
            unconfirmed,
            NotificationKind::Warning,
            "Reservas sin confirmar",
            format!("{unconfirmed} reservas necesitan confirmación"),
            Priority::High,
        ),
        (
            urgent,
            NotificationKind::Error,
            "Confirmaciones urgentes",
            format!("{urgent} reservas de mañana siguen pendientes"),
            Priority::Critical,
        ),
        (
            no_shows,
            NotificationKind::Warning,
            "No presentados",
            format!("{no_shows} clientes no se presentaron ayer"),
            Priority::Low,
        ),
    ];
    candidates
        .into_iter()
        .filter(|(count, ..)| *count > 0)
        .map(|(count, kind, title, message, priority)| Notification {
            kind,
            title,
            message,
            count,
            priority,
        })
        .collect()
}

#[derive(Serialize)]
struct NotificationsResponse {
    notifications: Vec<Notification>,
    total_count: usize,
    last_updated: String,
}

#[get("/notifications")]
async fn notifications(state: web::Data<AppState>, req: HttpRequest) -> AppResult<impl Responder> {
    authenticate(&state, &req).await?;
    let now = Local::now();
    let today = now.date_naive();
    let filter = BookingFilter {
        from: today.checked_sub_days(Days::new(1)),
        ..Default::default()
    };
    let bookings = state.store().bookings(&filter).await?;

    let notifications = build_notifications(&bookings, now.naive_local());
    let total_count = notifications.iter().map(|n| n.count).sum();
    Ok(HttpResponse::Ok().json(NotificationsResponse {
        notifications,
        total_count,
        last_updated: chrono::Utc::now().to_rfc3339(),
    }))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(notifications);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_app;
    use crate::api::test_support::{bearer, context};
    use crate::db::{
        current_timestamp, CustomerSnapshot, SectionPreference, ServicePeriod,
        DEFAULT_DURATION_MINUTES,
    };
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use chrono::{NaiveDate, NaiveTime};
    use mongodb::bson::oid::ObjectId;
    use serde_json::Value;

    fn booking(date: NaiveDate, time: &str, status: BookingStatus) -> Booking {
        let now = current_timestamp();
        Booking {
            id: ObjectId::new(),
            customer_id: ObjectId::new(),
            table_id: None,
            staff_id: None,
            date,
            time: NaiveTime::parse_from_str(time, "%H:%M").unwrap(),
            duration_minutes: DEFAULT_DURATION_MINUTES,
            party_size: 2,
            service: ServicePeriod::Dinner,
            section: SectionPreference::Any,
            status,
            customer: CustomerSnapshot {
                name: "Kim Etcell".to_string(),
                phone: "+61423456789".to_string(),
                email: None,
                company: None,
            },
            tags: None,
            internal_notes: None,
            customer_notes: None,
            special_requirements: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[::core::prelude::v1::test]
    fn counts_each_kind_of_attention() {
        let today: NaiveDate = "2025-09-22".parse().unwrap();
        let yesterday: NaiveDate = "2025-09-21".parse().unwrap();
        let tomorrow: NaiveDate = "2025-09-23".parse().unwrap();
        let now = today.and_hms_opt(18, 0, 0).unwrap();

        let bookings = vec![
            booking(today, "18:30", BookingStatus::Confirmed),
            booking(today, "20:00", BookingStatus::Confirmed),
            // fuera de la ventana de 2 horas
            booking(today, "20:30", BookingStatus::Confirmed),
            booking(today, "17:00", BookingStatus::Confirmed),
            booking(today, "21:00", BookingStatus::Pending),
            booking(tomorrow, "13:00", BookingStatus::Pending),
            booking(yesterday, "20:00", BookingStatus::NoShow),
            booking(yesterday, "21:00", BookingStatus::Pending),
        ];
        let built = build_notifications(&bookings, now);
        let summary: Vec<(&str, usize, Priority)> = built
            .iter()
            .map(|n| (n.title, n.count, n.priority))
            .collect();
        assert_eq!(
            summary,
            [
                ("Llegadas próximas", 2, Priority::Medium),
                ("Reservas sin confirmar", 2, Priority::High),
                ("Confirmaciones urgentes", 1, Priority::Critical),
                ("No presentados", 1, Priority::Low),
            ]
        );
    }

    #[::core::prelude::v1::test]
    fn quiet_days_have_no_notifications() {
        let today: NaiveDate = "2025-09-22".parse().unwrap();
        let bookings = vec![booking(today, "12:00", BookingStatus::Completed)];
        let now = today.and_hms_opt(9, 0, 0).unwrap();
        assert!(build_notifications(&bookings, now).is_empty());
    }

    #[actix_web::test]
    async fn endpoint_totals_the_counts_and_requires_a_token() {
        let ctx = context().await;
        let tomorrow = Local::now().date_naive().checked_add_days(Days::new(1)).unwrap();
        let mut draft = crate::engine::BookingDraft::new(
            CustomerSnapshot {
                name: "Kim Etcell".to_string(),
                phone: "+61423456789".to_string(),
                email: None,
                company: None,
            },
            tomorrow,
            NaiveTime::from_hms_opt(13, 0, 0).unwrap(),
            2,
            ServicePeriod::Lunch,
        );
        draft.table_id = Some(ctx.t1.id);
        ctx.state.engine.commit_booking(draft, None).await.unwrap();
        let app = test::init_service(App::new().configure(configure_app(ctx.state.clone()))).await;

        let req = test::TestRequest::get().uri("/api/notifications").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/api/notifications")
            .insert_header(bearer(&ctx.host_token))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        // pendiente de mañana: sin confirmar y urgente
        assert_eq!(body["total_count"], 2);
        let kinds: Vec<&str> = body["notifications"]
            .as_array()
            .unwrap()
            .iter()
            .map(|n| n["type"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, ["warning", "error"]);
        assert!(body["last_updated"].is_string());
    }
}

//! # API de Estadísticas

use actix_web::{get, web, HttpRequest, HttpResponse, Responder};
use chrono::Local;
use serde::Deserialize;

use super::auth::authenticate;
use super::validation::validate_date;
use super::{AppResult, AppState};
use crate::analytics::{dashboard, period_filter, Period};

#[derive(Deserialize)]
struct DashboardParams {
    date: Option<String>,
    #[serde(default)]
    period: Period,
}

/// Panel del periodo (`day`, `week` o `month`) que termina en `date`
/// (hoy si no se indica)
#[get("/analytics/dashboard")]
async fn get_dashboard(
    state: web::Data<AppState>,
    params: web::Query<DashboardParams>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    authenticate(&state, &req).await?;
    let params = params.into_inner();
    let date = match params.date.as_deref() {
        Some(date) => validate_date(date)?,
        None => Local::now().date_naive(),
    };

    let bookings = state.store().bookings(&period_filter(params.period, date)).await?;
    tracing::debug!(period = ?params.period, %date, bookings = bookings.len(), "Panel de estadísticas");
    Ok(HttpResponse::Ok().json(dashboard(&bookings, params.period, date)))
}

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(get_dashboard);
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
    use chrono::NaiveTime;
    use serde_json::Value;

    #[actix_web::test]
    async fn dashboard_counts_the_requested_day() {
        let ctx = context().await;
        for (table, party) in [(&ctx.t1, 2), (&ctx.t2, 4)] {
            let mut draft = BookingDraft::new(
                CustomerSnapshot {
                    name: "Karen Lord".to_string(),
                    phone: "+61445678901".to_string(),
                    email: None,
                    company: None,
                },
                "2025-09-22".parse().unwrap(),
                NaiveTime::from_hms_opt(19, 0, 0).unwrap(),
                party,
                ServicePeriod::Dinner,
            );
            draft.table_id = Some(table.id);
            ctx.state.engine.commit_booking(draft, None).await.unwrap();
        }
        let app = test::init_service(App::new().configure(configure_app(ctx.state.clone()))).await;

        let req = test::TestRequest::get()
            .uri("/api/analytics/dashboard?date=2025-09-22")
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/api/analytics/dashboard?date=2025-09-22&period=day")
            .insert_header(bearer(&ctx.manager_token))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["summary"]["total_bookings"], 2);
        assert_eq!(body["summary"]["total_covers"], 6);
        assert_eq!(body["service_breakdown"][0]["service"], "dinner");
    }
}

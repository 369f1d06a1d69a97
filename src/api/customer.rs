//! # API de Clientes
//!
//! Búsqueda rápida para el formulario de reservas, listado paginado y
//! ficha de cliente con sus últimas reservas.

use actix_web::{get, post, put, web, HttpRequest, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::auth::authenticate;
use super::booking::{table_numbers, with_table_numbers};
use super::validation::{parse_object_id, validate_email, validate_name, validate_notes, validate_phone};
use super::{AppError, AppResult, AppState};
use crate::db::{BookingFilter, Customer, CustomerChanges, Page};

const RECENT_BOOKINGS: usize = 10;

#[derive(Serialize)]
struct CustomerResponse {
    id: String,
    first_name: String,
    last_name: String,
    full_name: String,
    phone: String,
    email: Option<String>,
    company: Option<String>,
    tags: Option<String>,
    notes: Option<String>,
    website: Option<String>,
    social_media: Option<String>,
    documents: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl From<Customer> for CustomerResponse {
    fn from(customer: Customer) -> Self {
        CustomerResponse {
            id: customer.id.to_hex(),
            full_name: customer.full_name(),
            first_name: customer.first_name,
            last_name: customer.last_name,
            phone: customer.phone,
            email: customer.email,
            company: customer.company,
            tags: customer.tags,
            notes: customer.notes,
            website: customer.website,
            social_media: customer.social_media,
            documents: customer.documents,
            created_at: customer.created_at,
            updated_at: customer.updated_at,
        }
    }
}

#[derive(Deserialize)]
struct SearchParams {
    q: String,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct PageParams {
    page: Option<u32>,
    limit: Option<u32>,
}

#[derive(Deserialize)]
struct NewCustomer {
    first_name: String,
    last_name: String,
    phone: String,
    email: Option<String>,
    company: Option<String>,
    tags: Option<String>,
    notes: Option<String>,
    website: Option<String>,
    social_media: Option<String>,
    documents: Option<String>,
}

fn validate_extras(fields: [(&str, &Option<String>); 6]) -> AppResult<()> {
    for (field, value) in fields {
        validate_notes(field, value)?;
    }
    Ok(())
}

/// Busca clientes por nombre, teléfono, email o empresa
///
/// Los resultados se ordenan por relevancia: nombre completo, teléfono,
/// email y por último cualquier otro campo.
#[get("/customers/search")]
async fn search_customers(
    state: web::Data<AppState>,
    params: web::Query<SearchParams>,
) -> AppResult<impl Responder> {
    let query = params.q.trim();
    if query.chars().count() < 2 {
        return Err(AppError::validation_field("q", "debe tener al menos 2 caracteres"));
    }
    let limit = params.limit.unwrap_or(50);
    if !(1..=100).contains(&limit) {
        return Err(AppError::validation_field("limit", "debe estar entre 1 y 100"));
    }

    let customers = state.store().search_customers(query, limit).await?;
    let response: Vec<CustomerResponse> = customers.into_iter().map(CustomerResponse::from).collect();
    Ok(HttpResponse::Ok().json(response))
}

#[get("/customers")]
async fn list_customers(
    state: web::Data<AppState>,
    params: web::Query<PageParams>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    authenticate(&state, &req).await?;
    let page = params.page.unwrap_or(1);
    let limit = params.limit.unwrap_or(20);
    if page < 1 {
        return Err(AppError::validation_field("page", "debe ser mayor que 0"));
    }
    if !(1..=100).contains(&limit) {
        return Err(AppError::validation_field("limit", "debe estar entre 1 y 100"));
    }

    let (customers, total) = state.store().customers(Page { page, limit }).await?;
    let total_pages = total.div_ceil(u64::from(limit));
    let customers: Vec<CustomerResponse> = customers.into_iter().map(CustomerResponse::from).collect();

    Ok(HttpResponse::Ok().json(json!({
        "customers": customers,
        "pagination": {
            "page": page,
            "limit": limit,
            "total": total,
            "total_pages": total_pages,
        },
    })))
}

/// Ficha de cliente con sus 10 reservas más recientes
#[get("/customers/{id}")]
async fn get_customer(state: web::Data<AppState>, path: web::Path<String>) -> AppResult<impl Responder> {
    let id = parse_object_id("id", &path.into_inner())?;
    let customer = state
        .store()
        .customer(&id)
        .await?
        .ok_or_else(|| AppError::not_found_id("cliente", &id.to_hex()))?;

    let filter = BookingFilter {
        customer_id: Some(id),
        limit: Some(RECENT_BOOKINGS),
        ..Default::default()
    };
    let bookings = state.store().bookings(&filter).await?;
    let numbers = table_numbers(&state).await?;

    Ok(HttpResponse::Ok().json(json!({
        "customer": CustomerResponse::from(customer),
        "recent_bookings": with_table_numbers(bookings, &numbers),
    })))
}

/// Da de alta un cliente. El teléfono debe ser único.
#[post("/customers")]
async fn create_customer(
    state: web::Data<AppState>,
    data: web::Json<NewCustomer>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    authenticate(&state, &req).await?;
    let data = data.into_inner();
    validate_extras([
        ("company", &data.company),
        ("tags", &data.tags),
        ("notes", &data.notes),
        ("website", &data.website),
        ("social_media", &data.social_media),
        ("documents", &data.documents),
    ])?;

    let mut customer = Customer::new(
        &validate_name("first_name", &data.first_name)?,
        &validate_name("last_name", &data.last_name)?,
        &validate_phone(&data.phone)?,
    );
    customer.email = data.email.as_deref().map(validate_email).transpose()?;
    customer.company = data.company;
    customer.tags = data.tags;
    customer.notes = data.notes;
    customer.website = data.website;
    customer.social_media = data.social_media;
    customer.documents = data.documents;

    state.store().insert_customer(&customer).await?;
    tracing::info!(customer_id = %customer.id, "Cliente creado");

    Ok(HttpResponse::Created().json(json!({
        "message": "Cliente creado correctamente",
        "id": customer.id.to_hex(),
    })))
}

#[put("/customers/{id}")]
async fn update_customer(
    state: web::Data<AppState>,
    path: web::Path<String>,
    data: web::Json<CustomerChanges>,
    req: HttpRequest,
) -> AppResult<impl Responder> {
    authenticate(&state, &req).await?;
    let id = parse_object_id("id", &path.into_inner())?;
    let mut changes = data.into_inner();
    if changes.is_empty() {
        return Err(AppError::Validation("No hay campos para actualizar".to_string()));
    }

    changes.first_name = changes
        .first_name
        .as_deref()
        .map(|v| validate_name("first_name", v))
        .transpose()?;
    changes.last_name = changes
        .last_name
        .as_deref()
        .map(|v| validate_name("last_name", v))
        .transpose()?;
    changes.phone = changes.phone.as_deref().map(validate_phone).transpose()?;
    changes.email = changes.email.as_deref().map(validate_email).transpose()?;
    validate_extras([
        ("company", &changes.company),
        ("tags", &changes.tags),
        ("notes", &changes.notes),
        ("website", &changes.website),
        ("social_media", &changes.social_media),
        ("documents", &changes.documents),
    ])?;

    let customer = state
        .store()
        .update_customer(&id, &changes)
        .await?
        .ok_or_else(|| AppError::not_found_id("cliente", &id.to_hex()))?;
    Ok(HttpResponse::Ok().json(CustomerResponse::from(customer)))
}

/// Configura las rutas relacionadas con clientes
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(search_customers);
    cfg.service(list_customers);
    cfg.service(create_customer);
    cfg.service(get_customer);
    cfg.service(update_customer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::configure_app;
    use crate::api::test_support::{bearer, context};
    use crate::db::Store;
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use serde_json::Value;

    #[actix_web::test]
    async fn search_orders_by_relevance() {
        let ctx = context().await;
        let mut kim = Customer::new("Kim", "Etcell", "+61423456789");
        kim.company = Some("Margaret Foods".to_string());
        ctx.store.insert_customer(&kim).await.unwrap();
        ctx.store
            .insert_customer(&Customer::new("Margaret", "Briggs", "+61412345678"))
            .await
            .unwrap();
        let app = test::init_service(App::new().configure(configure_app(ctx.state.clone()))).await;

        let req = test::TestRequest::get().uri("/api/customers/search?q=margaret").to_request();
        let found: Vec<Value> = test::call_and_read_body_json(&app, req).await;
        let names: Vec<&str> = found.iter().map(|c| c["full_name"].as_str().unwrap()).collect();
        assert_eq!(names, ["Margaret Briggs", "Kim Etcell"]);

        let req = test::TestRequest::get().uri("/api/customers/search?q=m").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn create_rejects_duplicate_phone() {
        let ctx = context().await;
        let app = test::init_service(App::new().configure(configure_app(ctx.state.clone()))).await;
        let body = json!({
            "first_name": "Karen",
            "last_name": "Lord",
            "phone": "+61 445 678 901",
            "email": "Karen.Lord@email.com",
        });

        let req = test::TestRequest::post()
            .uri("/api/customers")
            .insert_header(bearer(&ctx.host_token))
            .set_json(&body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Value = test::read_body_json(resp).await;

        let req = test::TestRequest::post()
            .uri("/api/customers")
            .insert_header(bearer(&ctx.host_token))
            .set_json(&body)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::get()
            .uri(&format!("/api/customers/{}", created["id"].as_str().unwrap()))
            .insert_header(bearer(&ctx.host_token))
            .to_request();
        let detail: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(detail["customer"]["phone"], "+61445678901");
        assert_eq!(detail["customer"]["email"], "karen.lord@email.com");
        assert_eq!(detail["recent_bookings"].as_array().unwrap().len(), 0);
    }

    #[actix_web::test]
    async fn update_accepts_only_known_fields() {
        let ctx = context().await;
        let customer = Customer::new("Vanessa", "Gill", "+61467890123");
        ctx.store.insert_customer(&customer).await.unwrap();
        let app = test::init_service(App::new().configure(configure_app(ctx.state.clone()))).await;
        let uri = format!("/api/customers/{}", customer.id.to_hex());

        let req = test::TestRequest::put()
            .uri(&uri)
            .insert_header(bearer(&ctx.host_token))
            .set_json(json!({ "created_at": 0 }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::put()
            .uri(&uri)
            .insert_header(bearer(&ctx.host_token))
            .set_json(json!({ "company": "Marketing Co", "tags": "VIP" }))
            .to_request();
        let updated: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(updated["company"], "Marketing Co");
        assert_eq!(updated["first_name"], "Vanessa");
    }

    #[actix_web::test]
    async fn listing_is_paginated() {
        let ctx = context().await;
        for i in 0..3 {
            let customer = Customer::new("Jennifer", "Nunn", &format!("+6145678901{i}"));
            ctx.store.insert_customer(&customer).await.unwrap();
        }
        let app = test::init_service(App::new().configure(configure_app(ctx.state.clone()))).await;

        let req = test::TestRequest::get()
            .uri("/api/customers?page=2&limit=2")
            .insert_header(bearer(&ctx.host_token))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["customers"].as_array().unwrap().len(), 1);
        assert_eq!(body["pagination"]["total"], 3);
        assert_eq!(body["pagination"]["total_pages"], 2);

        let req = test::TestRequest::get()
            .uri("/api/customers?page=0")
            .insert_header(bearer(&ctx.host_token))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}

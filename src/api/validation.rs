//! Validación de forma de los datos de entrada

use chrono::{NaiveDate, NaiveTime};
use mongodb::bson::oid::ObjectId;

use super::{AppError, AppResult};
use crate::db::{
    sanitize_phone, MAX_DURATION_MINUTES, MAX_PARTY_SIZE, MIN_DURATION_MINUTES, MIN_PARTY_SIZE,
};

pub const MAX_NOTES_LEN: usize = 1000;
pub const MAX_EMAIL_LEN: usize = 255;

/// Valida y parsea una fecha en formato YYYY-MM-DD
pub fn validate_date(date_str: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .map_err(|_| AppError::validation_field("date", "formato de fecha inválido, use YYYY-MM-DD"))
}

/// Valida y parsea una hora en formato HH:MM
pub fn validate_time(time_str: &str) -> AppResult<NaiveTime> {
    let valid_shape = matches!(time_str.len(), 4 | 5) && time_str.contains(':');
    match NaiveTime::parse_from_str(time_str, "%H:%M") {
        Ok(time) if valid_shape => Ok(time),
        _ => Err(AppError::validation_field("time", "formato de hora inválido, use HH:MM")),
    }
}

/// Email con forma `x@y.z` y como mucho 255 caracteres
pub fn validate_email(email: &str) -> AppResult<String> {
    let email = email.trim();
    let valid = email.len() <= MAX_EMAIL_LEN
        && !email.contains(char::is_whitespace)
        && email.split_once('@').is_some_and(|(user, domain)| {
            !user.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        });
    if !valid {
        return Err(AppError::validation_field("email", "email inválido"));
    }
    Ok(email.to_lowercase())
}

/// Devuelve el teléfono saneado si tiene entre 10 y 20 caracteres
pub fn validate_phone(phone: &str) -> AppResult<String> {
    let sanitized = sanitize_phone(phone);
    if !(10..=20).contains(&sanitized.len()) {
        return Err(AppError::validation_field(
            "phone",
            "el teléfono debe tener entre 10 y 20 dígitos",
        ));
    }
    Ok(sanitized)
}

pub fn validate_name(field: &str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if !(2..=100).contains(&trimmed.chars().count()) {
        return Err(AppError::validation_field(field, "debe tener entre 2 y 100 caracteres"));
    }
    Ok(trimmed.to_string())
}

pub fn validate_notes(field: &str, value: &Option<String>) -> AppResult<()> {
    if value.as_ref().is_some_and(|v| v.chars().count() > MAX_NOTES_LEN) {
        return Err(AppError::validation_field(field, "no puede superar 1000 caracteres"));
    }
    Ok(())
}

pub fn validate_party_size(party_size: u8) -> AppResult<u8> {
    if !(MIN_PARTY_SIZE..=MAX_PARTY_SIZE).contains(&party_size) {
        return Err(AppError::validation_field("party_size", "debe estar entre 1 y 20"));
    }
    Ok(party_size)
}

pub fn validate_duration(duration: u16) -> AppResult<u16> {
    if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&duration) {
        return Err(AppError::validation_field("duration", "debe estar entre 30 y 300 minutos"));
    }
    Ok(duration)
}

pub fn parse_object_id(field: &str, value: &str) -> AppResult<ObjectId> {
    ObjectId::parse_str(value).map_err(|_| AppError::validation_field(field, "identificador inválido"))
}

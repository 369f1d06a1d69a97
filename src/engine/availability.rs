//! Filtrado de mesas candidatas. Funciones puras sobre datos ya leídos.

use chrono::{NaiveDate, NaiveTime};
use mongodb::bson::oid::ObjectId;
use serde::Deserialize;

use crate::db::{Booking, BookingStatus, Section, Table, TableStatus};

use super::TimeSlot;

/// Pregunta "¿qué mesas pueden sentar a `party_size` personas durante
/// `duration_minutes` desde `time` el día `date`?"
#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityQuery {
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: u16,
    pub party_size: u8,
    pub section: Option<Section>,
}

impl AvailabilityQuery {
    pub fn slot(&self) -> TimeSlot {
        TimeSlot::new(self.time, self.duration_minutes)
    }
}

/// Primera reserva activa de `table_id` en `date` que se solapa con `slot`,
/// ignorando la reserva `excluding`.
pub fn overlapping_booking<'a>(
    bookings: &'a [Booking],
    table_id: &ObjectId,
    date: NaiveDate,
    slot: &TimeSlot,
    excluding: Option<&ObjectId>,
) -> Option<&'a Booking> {
    bookings.iter().find(|b| {
        b.table_id.as_ref() == Some(table_id)
            && b.date == date
            && b.is_active()
            && Some(&b.id) != excluding
            && b.slot().overlaps(slot)
    })
}

/// Reserva que ocupa físicamente la mesa en el minuto indicado.
///
/// Una reserva pendiente todavía no ocupa la mesa.
pub fn occupied_at<'a>(
    bookings: &'a [Booking],
    table_id: &ObjectId,
    date: NaiveDate,
    minute: u32,
) -> Option<&'a Booking> {
    bookings.iter().find(|b| {
        b.table_id.as_ref() == Some(table_id)
            && b.date == date
            && matches!(
                b.status,
                BookingStatus::Confirmed | BookingStatus::Arrived | BookingStatus::Seated
            )
            && b.slot().contains_minute(minute)
    })
}

/// Mesas que cumplen la consulta, ordenadas por zona, capacidad y número
pub fn candidate_tables(tables: Vec<Table>, bookings: &[Booking], query: &AvailabilityQuery) -> Vec<Table> {
    let slot = query.slot();
    let mut candidates: Vec<Table> = tables
        .into_iter()
        .filter(|t| t.capacity >= query.party_size)
        .filter(|t| t.status == TableStatus::Available)
        .filter(|t| query.section.map_or(true, |s| t.section == s))
        .filter(|t| overlapping_booking(bookings, &t.id, query.date, &slot, None).is_none())
        .collect();
    candidates.sort_by(|a, b| {
        a.section
            .cmp(&b.section)
            .then(a.capacity.cmp(&b.capacity))
            .then_with(|| a.table_number.cmp(&b.table_number))
    });
    candidates
}

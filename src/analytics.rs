//! # Panel de estadísticas
//!
//! Agregados de reservas por periodo: resumen, desglose por servicio, zona,
//! hora y estado. Se calculan sobre las reservas ya leídas del almacén.

use chrono::{Days, NaiveDate, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::{Booking, BookingFilter, BookingStatus, SectionPreference, ServicePeriod};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    #[default]
    Day,
    Week,
    Month,
}

/// Fechas incluidas en el periodo que termina en `date`
pub fn date_range(period: Period, date: NaiveDate) -> (NaiveDate, NaiveDate) {
    match period {
        Period::Day => (date, date),
        Period::Week => (date - Days::new(7), date),
        Period::Month => (date - Days::new(30), date),
    }
}

/// Filtro de reservas del periodo
pub fn period_filter(period: Period, date: NaiveDate) -> BookingFilter {
    match period {
        Period::Day => BookingFilter::on_date(date),
        _ => {
            let (start, end) = date_range(period, date);
            BookingFilter::between(start, end)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub total_bookings: u64,
    pub confirmed_bookings: u64,
    pub cancelled_bookings: u64,
    pub no_shows: u64,
    pub avg_party_size: Option<f64>,
    pub total_covers: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceRow {
    pub service: ServicePeriod,
    pub count: u64,
    pub covers: u64,
    pub avg_party_size: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionRow {
    pub section: SectionPreference,
    pub count: u64,
    pub covers: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourRow {
    pub hour: u32,
    pub count: u64,
    pub covers: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusRow {
    pub status: BookingStatus,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DateRange {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dashboard {
    pub summary: Summary,
    pub service_breakdown: Vec<ServiceRow>,
    pub section_breakdown: Vec<SectionRow>,
    /// Solo para el periodo de un día
    pub hourly_breakdown: Vec<HourRow>,
    pub status_breakdown: Vec<StatusRow>,
    pub period: Period,
    pub date_range: DateRange,
}

#[derive(Default)]
struct Tally {
    count: u64,
    covers: u64,
}

impl Tally {
    fn add(&mut self, booking: &Booking) {
        self.count += 1;
        self.covers += u64::from(booking.party_size);
    }

    fn average(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        round2(self.covers as f64 / self.count as f64)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Calcula el panel para las reservas del periodo.
///
/// Las reservas fuera del rango de fechas se ignoran.
pub fn dashboard(bookings: &[Booking], period: Period, date: NaiveDate) -> Dashboard {
    let (start_date, end_date) = date_range(period, date);
    let in_range: Vec<&Booking> = bookings
        .iter()
        .filter(|b| b.date >= start_date && b.date <= end_date)
        .collect();

    let mut total = Tally::default();
    let mut by_service: BTreeMap<ServicePeriod, Tally> = BTreeMap::new();
    let mut by_section: BTreeMap<SectionPreference, Tally> = BTreeMap::new();
    let mut by_hour: BTreeMap<u32, Tally> = BTreeMap::new();
    let mut by_status: BTreeMap<BookingStatus, u64> = BTreeMap::new();

    for booking in &in_range {
        total.add(booking);
        by_service.entry(booking.service).or_default().add(booking);
        by_section.entry(booking.section).or_default().add(booking);
        by_hour.entry(booking.time.hour()).or_default().add(booking);
        *by_status.entry(booking.status).or_default() += 1;
    }

    let count_of = |status: BookingStatus| by_status.get(&status).copied().unwrap_or(0);
    let summary = Summary {
        total_bookings: total.count,
        confirmed_bookings: count_of(BookingStatus::Confirmed),
        cancelled_bookings: count_of(BookingStatus::Cancelled),
        no_shows: count_of(BookingStatus::NoShow),
        avg_party_size: (total.count > 0).then(|| total.average()),
        total_covers: total.covers,
    };

    let mut service_breakdown: Vec<ServiceRow> = by_service
        .iter()
        .map(|(service, tally)| ServiceRow {
            service: *service,
            count: tally.count,
            covers: tally.covers,
            avg_party_size: tally.average(),
        })
        .collect();
    service_breakdown.sort_by(|a, b| b.count.cmp(&a.count));

    let mut section_breakdown: Vec<SectionRow> = by_section
        .iter()
        .map(|(section, tally)| SectionRow {
            section: *section,
            count: tally.count,
            covers: tally.covers,
        })
        .collect();
    section_breakdown.sort_by(|a, b| b.count.cmp(&a.count));

    let hourly_breakdown = if period == Period::Day {
        by_hour
            .iter()
            .map(|(hour, tally)| HourRow {
                hour: *hour,
                count: tally.count,
                covers: tally.covers,
            })
            .collect()
    } else {
        Vec::new()
    };

    let status_breakdown = by_status
        .into_iter()
        .map(|(status, count)| StatusRow { status, count })
        .collect();

    Dashboard {
        summary,
        service_breakdown,
        section_breakdown,
        hourly_breakdown,
        status_breakdown,
        period,
        date_range: DateRange { start_date, end_date },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{current_timestamp, CustomerSnapshot};
    use chrono::NaiveTime;
    use mongodb::bson::oid::ObjectId;

    fn booking(date: &str, time: &str, party_size: u8, service: ServicePeriod, status: BookingStatus) -> Booking {
        let now = current_timestamp();
        Booking {
            id: ObjectId::new(),
            customer_id: ObjectId::new(),
            table_id: None,
            staff_id: None,
            date: date.parse().unwrap(),
            time: NaiveTime::parse_from_str(time, "%H:%M").unwrap(),
            duration_minutes: 120,
            party_size,
            service,
            section: SectionPreference::Terrace,
            status,
            customer: CustomerSnapshot {
                name: "Vanessa Gill".to_string(),
                phone: "+61467890123".to_string(),
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

    fn day() -> NaiveDate {
        "2025-09-22".parse().unwrap()
    }

    #[test]
    fn week_and_month_look_back_from_the_date() {
        assert_eq!(date_range(Period::Day, day()), (day(), day()));
        assert_eq!(date_range(Period::Week, day()).0, "2025-09-15".parse::<NaiveDate>().unwrap());
        assert_eq!(date_range(Period::Month, day()).0, "2025-08-23".parse::<NaiveDate>().unwrap());
    }

    #[test]
    fn summary_counts_statuses_and_covers() {
        let bookings = vec![
            booking("2025-09-22", "12:15", 2, ServicePeriod::Lunch, BookingStatus::Confirmed),
            booking("2025-09-22", "12:45", 4, ServicePeriod::Lunch, BookingStatus::Cancelled),
            booking("2025-09-22", "19:00", 3, ServicePeriod::Dinner, BookingStatus::NoShow),
            // fuera del día
            booking("2025-09-21", "19:00", 8, ServicePeriod::Dinner, BookingStatus::Confirmed),
        ];
        let panel = dashboard(&bookings, Period::Day, day());

        assert_eq!(panel.summary.total_bookings, 3);
        assert_eq!(panel.summary.confirmed_bookings, 1);
        assert_eq!(panel.summary.cancelled_bookings, 1);
        assert_eq!(panel.summary.no_shows, 1);
        assert_eq!(panel.summary.total_covers, 9);
        assert_eq!(panel.summary.avg_party_size, Some(3.0));

        assert_eq!(panel.service_breakdown[0].service, ServicePeriod::Lunch);
        assert_eq!(panel.service_breakdown[0].count, 2);
        assert_eq!(panel.service_breakdown[0].avg_party_size, 3.0);

        let hours: Vec<(u32, u64)> = panel.hourly_breakdown.iter().map(|h| (h.hour, h.count)).collect();
        assert_eq!(hours, [(12, 2), (19, 1)]);
    }

    #[test]
    fn hourly_breakdown_only_for_single_days() {
        let bookings = vec![booking("2025-09-20", "19:00", 2, ServicePeriod::Dinner, BookingStatus::Completed)];
        let panel = dashboard(&bookings, Period::Week, day());
        assert_eq!(panel.summary.total_bookings, 1);
        assert!(panel.hourly_breakdown.is_empty());
        assert_eq!(panel.date_range.start_date, "2025-09-15".parse::<NaiveDate>().unwrap());
    }

    #[test]
    fn empty_period_has_no_average() {
        let panel = dashboard(&[], Period::Month, day());
        assert_eq!(panel.summary.total_bookings, 0);
        assert_eq!(panel.summary.avg_party_size, None);
        assert!(panel.status_breakdown.is_empty());
    }
}

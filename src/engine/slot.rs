use chrono::{NaiveTime, Timelike};
use std::fmt;

use crate::db::{
    Booking, MAX_DURATION_MINUTES, MAX_PARTY_SIZE, MIN_DURATION_MINUTES, MIN_PARTY_SIZE,
};

use super::EngineError;

pub const MINUTES_PER_DAY: u32 = 24 * 60;

/// Intervalo semiabierto `[inicio, inicio + duración)` en minutos de un mismo día
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSlot {
    start: u32,
    duration: u32,
}

impl TimeSlot {
    pub fn new(start: NaiveTime, duration_minutes: u16) -> Self {
        Self::from_minutes(start.num_seconds_from_midnight() / 60, u32::from(duration_minutes))
    }

    pub fn from_minutes(start: u32, duration: u32) -> Self {
        TimeSlot { start, duration }
    }

    pub fn start_minute(&self) -> u32 {
        self.start
    }

    pub fn end_minute(&self) -> u32 {
        self.start + self.duration
    }

    pub fn duration_minutes(&self) -> u32 {
        self.duration
    }

    /// Dos intervalos contiguos (uno acaba cuando empieza el otro) no se solapan
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end_minute() && other.start < self.end_minute()
    }

    pub fn contains_minute(&self, minute: u32) -> bool {
        self.start <= minute && minute < self.end_minute()
    }

    /// Terminar exactamente a las 24:00 sigue dentro del día
    pub fn crosses_midnight(&self) -> bool {
        self.end_minute() > MINUTES_PER_DAY
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.end_minute();
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start / 60,
            self.start % 60,
            end / 60,
            end % 60
        )
    }
}

impl Booking {
    pub fn slot(&self) -> TimeSlot {
        TimeSlot::new(self.time, self.duration_minutes)
    }
}

pub(crate) fn validate_slot(slot: &TimeSlot) -> Result<(), EngineError> {
    let duration = slot.duration_minutes();
    if duration < u32::from(MIN_DURATION_MINUTES) || duration > u32::from(MAX_DURATION_MINUTES) {
        return Err(EngineError::Validation(format!(
            "la duración debe estar entre {MIN_DURATION_MINUTES} y {MAX_DURATION_MINUTES} minutos"
        )));
    }
    if slot.crosses_midnight() {
        return Err(EngineError::Validation(format!(
            "la reserva {slot} termina después de medianoche"
        )));
    }
    Ok(())
}

pub(crate) fn validate_party_size(party_size: u8) -> Result<(), EngineError> {
    if !(MIN_PARTY_SIZE..=MAX_PARTY_SIZE).contains(&party_size) {
        return Err(EngineError::Validation(format!(
            "el número de personas debe estar entre {MIN_PARTY_SIZE} y {MAX_PARTY_SIZE}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hour: u32, minute: u32, duration: u32) -> TimeSlot {
        TimeSlot::from_minutes(hour * 60 + minute, duration)
    }

    #[test]
    fn overlap_is_symmetric() {
        let cases = [
            (at(10, 0, 60), at(10, 30, 60)),
            (at(10, 0, 60), at(11, 0, 30)),
            (at(9, 0, 300), at(12, 0, 30)),
            (at(18, 0, 120), at(21, 0, 60)),
        ];
        for (a, b) in cases {
            assert_eq!(a.overlaps(&b), b.overlaps(&a), "{a} vs {b}");
        }
    }

    #[test]
    fn slot_overlaps_itself_unless_empty() {
        let slot = at(12, 0, 90);
        assert!(slot.overlaps(&slot));
        let empty = at(12, 0, 0);
        assert!(!empty.overlaps(&empty));
    }

    #[test]
    fn adjacent_slots_do_not_conflict() {
        assert!(!at(10, 0, 60).overlaps(&at(11, 0, 30)));
        assert!(!at(11, 0, 30).overlaps(&at(10, 0, 60)));
    }

    #[test]
    fn partially_covered_slots_conflict() {
        assert!(at(10, 0, 90).overlaps(&at(11, 0, 30)));
        assert!(at(18, 0, 120).overlaps(&at(19, 0, 60)));
        // contenido
        assert!(at(9, 0, 300).overlaps(&at(10, 0, 30)));
    }

    #[test]
    fn slot_from_time_ignores_seconds() {
        let time = NaiveTime::from_hms_opt(18, 0, 59).unwrap();
        let slot = TimeSlot::new(time, 120);
        assert_eq!(slot.start_minute(), 18 * 60);
        assert_eq!(slot.end_minute(), 20 * 60);
        assert_eq!(slot.to_string(), "18:00-20:00");
    }

    #[test]
    fn midnight_crossing_is_rejected() {
        let late = at(23, 30, 90);
        assert!(late.crosses_midnight());
        assert!(matches!(validate_slot(&late), Err(EngineError::Validation(_))));

        let until_midnight = at(22, 0, 120);
        assert!(!until_midnight.crosses_midnight());
        assert!(validate_slot(&until_midnight).is_ok());
        assert_eq!(until_midnight.to_string(), "22:00-24:00");
    }

    #[test]
    fn duration_bounds_are_enforced() {
        assert!(validate_slot(&at(12, 0, 29)).is_err());
        assert!(validate_slot(&at(12, 0, 30)).is_ok());
        assert!(validate_slot(&at(12, 0, 300)).is_ok());
        assert!(validate_slot(&at(12, 0, 301)).is_err());
    }

    #[test]
    fn party_size_bounds_are_enforced() {
        assert!(validate_party_size(0).is_err());
        assert!(validate_party_size(1).is_ok());
        assert!(validate_party_size(20).is_ok());
        assert!(validate_party_size(21).is_err());
    }
}

//! # Motor de disponibilidad
//!
//! Decide qué mesas pueden atender una reserva y aplica la regla de no
//! solapamiento al confirmarla.
//!
//! Cada operación que modifica reservas abre una transacción del almacén,
//! toma los bloqueos con nombre que necesita (reserva → franja → cliente),
//! vuelve a leer el estado dentro de la transacción y solo entonces escribe.
//! Cualquier error descarta la transacción completa. Si el almacén aborta la
//! transacción por un conflicto de escritura (MongoDB lo marca como
//! `TransientTransactionError`), la operación se repite desde el principio
//! dentro del mismo presupuesto `lock_timeout`; el reintento vuelve a leer y
//! devuelve el conflicto de horario real si lo hay.
//!
//! Las consultas de disponibilidad no toman bloqueos: su resultado es una
//! fotografía y el compromiso final vuelve a comprobar los conflictos.

pub mod availability;
pub mod commit;
pub mod error;
pub mod lifecycle;
pub mod slot;


pub use self::availability::AvailabilityQuery;
pub use self::commit::{BookingChanges, BookingDraft};
pub use self::error::EngineError;
pub use self::lifecycle::BatchAction;
pub use self::slot::TimeSlot;

use chrono::{NaiveDate, NaiveTime};
use mongodb::bson::oid::ObjectId;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::db::{Booking, BookingFilter, LockKey, Store, StoreError, StoreTx, Table};

pub type EngineResult<T> = Result<T, EngineError>;

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(2000);

const RETRY_BASE_DELAY: Duration = Duration::from_millis(5);

#[derive(Clone)]
pub struct AvailabilityEngine {
    store: Arc<dyn Store>,
    lock_timeout: Duration,
}

impl AvailabilityEngine {
    pub fn new(store: Arc<dyn Store>, lock_timeout: Duration) -> Self {
        AvailabilityEngine { store, lock_timeout }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Mesas libres para la consulta, ordenadas por zona, capacidad y número
    pub async fn find_available_tables(&self, query: &AvailabilityQuery) -> EngineResult<Vec<Table>> {
        slot::validate_slot(&query.slot())?;
        slot::validate_party_size(query.party_size)?;

        let tables = self.store.tables().await?;
        let filter = BookingFilter {
            active_only: true,
            ..BookingFilter::on_date(query.date)
        };
        let bookings = self.store.bookings(&filter).await?;
        let candidates = availability::candidate_tables(tables, &bookings, query);

        tracing::debug!(
            date = %query.date,
            slot = %query.slot(),
            party_size = query.party_size,
            found = candidates.len(),
            "Consulta de disponibilidad"
        );
        Ok(candidates)
    }

    /// Reserva activa de la mesa que se solapa con el intervalo, si existe
    pub async fn find_conflict(
        &self,
        table_id: &ObjectId,
        date: NaiveDate,
        time: NaiveTime,
        duration_minutes: u16,
        excluding: Option<&ObjectId>,
    ) -> EngineResult<Option<Booking>> {
        let slot = TimeSlot::new(time, duration_minutes);
        slot::validate_slot(&slot)?;

        let filter = BookingFilter {
            table_id: Some(*table_id),
            active_only: true,
            ..BookingFilter::on_date(date)
        };
        let bookings = self.store.bookings(&filter).await?;
        Ok(availability::overlapping_booking(&bookings, table_id, date, &slot, excluding).cloned())
    }

    pub async fn check_conflict(
        &self,
        table_id: &ObjectId,
        date: NaiveDate,
        time: NaiveTime,
        duration_minutes: u16,
        excluding: Option<&ObjectId>,
    ) -> EngineResult<bool> {
        Ok(self
            .find_conflict(table_id, date, time, duration_minutes, excluding)
            .await?
            .is_some())
    }

    fn retry(&self) -> Retry {
        Retry {
            started: Instant::now(),
            budget: self.lock_timeout,
            attempt: 0,
        }
    }

    /// Toma un bloqueo dentro de la transacción sin esperar más de `lock_timeout`
    async fn lock(&self, tx: &mut dyn StoreTx, key: LockKey) -> EngineResult<()> {
        match tokio::time::timeout(self.lock_timeout, tx.lock(&key)).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::warn!(
                    lock = %key,
                    timeout_ms = self.lock_timeout.as_millis() as u64,
                    "Tiempo de espera agotado esperando un bloqueo"
                );
                Err(StoreError::LockTimeout(key.to_string()).into())
            }
        }
    }

    /// Confirma la transacción si `result` es correcto y la descarta si no
    async fn finish<T>(&self, tx: Box<dyn StoreTx>, result: EngineResult<T>) -> EngineResult<T> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = tx.rollback().await {
                    tracing::warn!(error = %rollback_error, "No se pudo abortar la transacción");
                }
                Err(error)
            }
        }
    }
}

/// Repetición de una transacción abortada por conflicto de escritura
struct Retry {
    started: Instant,
    budget: Duration,
    attempt: u32,
}

impl Retry {
    fn allows(&self, error: &EngineError) -> bool {
        matches!(error, EngineError::WriteConflict(_)) && self.started.elapsed() < self.budget
    }

    /// Espera exponencial, sin pasarse del presupuesto restante
    async fn pause(&mut self, error: &EngineError) {
        self.attempt += 1;
        let remaining = self.budget.saturating_sub(self.started.elapsed());
        let delay = (RETRY_BASE_DELAY * 2u32.pow(self.attempt.min(6))).min(remaining);
        tracing::debug!(
            attempt = self.attempt,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Transacción abortada por conflicto de escritura, se reintenta"
        );
        tokio::time::sleep(delay).await;
    }
}

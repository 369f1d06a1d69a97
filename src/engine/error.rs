use mongodb::bson::oid::ObjectId;
use thiserror::Error;

use crate::db::{BookingStatus, StoreError};

use super::TimeSlot;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Error de validación: {0}")]
    Validation(String),

    /// La mesa ya tiene una reserva activa que se solapa con el intervalo pedido
    #[error("Conflicto de horario con la reserva {booking_id} ({slot})")]
    Conflict { booking_id: ObjectId, slot: TimeSlot },

    #[error("La mesa admite {capacity} personas, se pidieron {party_size}")]
    Capacity { party_size: u8, capacity: u8 },

    #[error("No encontrado: {kind} con ID '{id}'")]
    NotFound { kind: &'static str, id: ObjectId },

    /// Otra transacción escribió los mismos documentos. El motor repite la
    /// transacción mientras quede presupuesto de espera.
    #[error("Conflicto de escritura concurrente: {0}")]
    WriteConflict(String),

    /// Bloqueo no obtenido a tiempo; se puede reintentar
    #[error("Operación no disponible temporalmente: {0}")]
    Transient(String),

    #[error("No se puede pasar de '{from}' a '{to}'")]
    InvalidTransition { from: BookingStatus, to: BookingStatus },

    #[error(transparent)]
    Store(StoreError),
}

impl EngineError {
    pub(crate) fn not_found(kind: &'static str, id: ObjectId) -> Self {
        Self::NotFound { kind, id }
    }
}

impl From<StoreError> for EngineError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::WriteConflict(_) => Self::WriteConflict(error.to_string()),
            StoreError::LockTimeout(_) => Self::Transient(error.to_string()),
            other => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_write_conflicts_are_marked_for_retry() {
        let conflict = EngineError::from(StoreError::WriteConflict("lock".into()));
        assert!(matches!(conflict, EngineError::WriteConflict(_)));

        let timeout = EngineError::from(StoreError::LockTimeout("slot".into()));
        assert!(matches!(timeout, EngineError::Transient(_)));

        let duplicate = EngineError::from(StoreError::Duplicate("phone".into()));
        assert!(matches!(duplicate, EngineError::Store(StoreError::Duplicate(_))));
    }
}

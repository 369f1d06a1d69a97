use mongodb::bson::oid::ObjectId;

use crate::db::{current_timestamp, Booking, BookingStatus, HistoryEntry, LockKey, StoreTx};

use super::{AvailabilityEngine, EngineError, EngineResult};

/// Operación aplicada a varias reservas a la vez
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchAction {
    Confirm,
    Cancel,
    UpdateStatus(BookingStatus),
}

impl BatchAction {
    pub fn target(&self) -> BookingStatus {
        match self {
            BatchAction::Confirm => BookingStatus::Confirmed,
            BatchAction::Cancel => BookingStatus::Cancelled,
            BatchAction::UpdateStatus(status) => *status,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchAction::Confirm => "confirm",
            BatchAction::Cancel => "cancel",
            BatchAction::UpdateStatus(_) => "update_status",
        }
    }
}

/// Resultado de aplicar un cambio de estado dentro de una transacción
enum Outcome {
    Changed(Booking),
    /// Ya estaba cancelada; no se escribe nada
    AlreadyCancelled(Booking),
}

impl AvailabilityEngine {
    /// Mueve la reserva al estado `next` si la transición está permitida.
    ///
    /// No vuelve a comprobar conflictos: pasar a un estado inactivo solo
    /// libera la franja.
    pub async fn transition_status(
        &self,
        id: &ObjectId,
        next: BookingStatus,
        actor: Option<ObjectId>,
    ) -> EngineResult<Booking> {
        let mut retry = self.retry();
        loop {
            let mut tx = self.store.begin().await?;
            let result = self.change_status(tx.as_mut(), id, next, actor, None).await;
            match self.finish(tx, result).await {
                Err(error) if retry.allows(&error) => retry.pause(&error).await,
                Err(error) => return Err(error),
                Ok(Outcome::Changed(booking) | Outcome::AlreadyCancelled(booking)) => {
                    return Ok(booking)
                }
            }
        }
    }

    /// Cancela la reserva. Cancelar una reserva ya cancelada no hace nada.
    pub async fn cancel_booking(&self, id: &ObjectId, actor: Option<ObjectId>) -> EngineResult<Booking> {
        self.transition_status(id, BookingStatus::Cancelled, actor).await
    }

    /// Aplica la acción a todas las reservas o a ninguna.
    ///
    /// Devuelve cuántas reservas cambiaron de estado.
    pub async fn batch_update(
        &self,
        action: BatchAction,
        ids: &[ObjectId],
        actor: Option<ObjectId>,
    ) -> EngineResult<usize> {
        if ids.is_empty() {
            return Err(EngineError::Validation(
                "se necesita al menos una reserva".to_string(),
            ));
        }
        // orden fijo de bloqueos entre lotes concurrentes
        let mut ids = ids.to_vec();
        ids.sort();
        ids.dedup();

        let mut retry = self.retry();
        let affected = loop {
            let mut tx = self.store.begin().await?;
            let result = self.apply_batch(tx.as_mut(), action, &ids, actor).await;
            match self.finish(tx, result).await {
                Err(error) if retry.allows(&error) => retry.pause(&error).await,
                outcome => break outcome?,
            }
        };

        tracing::info!(
            action = action.as_str(),
            requested = ids.len(),
            affected,
            "Operación en lote aplicada"
        );
        Ok(affected)
    }

    async fn apply_batch(
        &self,
        tx: &mut dyn StoreTx,
        action: BatchAction,
        ids: &[ObjectId],
        actor: Option<ObjectId>,
    ) -> EngineResult<usize> {
        let note = format!("Operación en lote: {}", action.as_str());
        let mut affected = 0;
        for id in ids {
            let outcome = self
                .change_status(tx, id, action.target(), actor, Some(note.clone()))
                .await?;
            if let Outcome::Changed(_) = outcome {
                affected += 1;
            }
        }
        Ok(affected)
    }

    async fn change_status(
        &self,
        tx: &mut dyn StoreTx,
        id: &ObjectId,
        next: BookingStatus,
        actor: Option<ObjectId>,
        notes: Option<String>,
    ) -> EngineResult<Outcome> {
        self.lock(tx, LockKey::Booking(*id)).await?;
        let current = tx
            .booking(id)
            .await?
            .ok_or_else(|| EngineError::not_found("reserva", *id))?;

        if next == BookingStatus::Cancelled && current.status == BookingStatus::Cancelled {
            return Ok(Outcome::AlreadyCancelled(current));
        }
        if !current.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: current.status,
                to: next,
            });
        }

        let mut updated = current.clone();
        updated.status = next;
        updated.updated_at = current_timestamp();
        tx.replace_booking(&updated).await?;
        tx.append_history(
            &HistoryEntry::new(
                *id,
                next.history_action(),
                Some(current.snapshot()),
                Some(updated.snapshot()),
                actor,
            )
            .with_notes(notes),
        )
        .await?;

        tracing::info!(
            booking_id = %id,
            table_id = ?updated.table_id.map(|t| t.to_hex()),
            date = %updated.date,
            from = %current.status,
            to = %next,
            "Estado de reserva actualizado"
        );
        Ok(Outcome::Changed(updated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_actions_map_to_target_statuses() {
        assert_eq!(BatchAction::Confirm.target(), BookingStatus::Confirmed);
        assert_eq!(BatchAction::Cancel.target(), BookingStatus::Cancelled);
        let update = BatchAction::UpdateStatus(BookingStatus::NoShow);
        assert_eq!(update.target(), BookingStatus::NoShow);
        assert_eq!(update.as_str(), "update_status");
    }
}

use chrono::{NaiveDate, NaiveTime};
use mongodb::bson::oid::ObjectId;

use crate::db::{
    current_timestamp, sanitize_phone, Booking, BookingStatus, Customer, CustomerSnapshot,
    HistoryAction, HistoryEntry, LockKey, SectionPreference, ServicePeriod, StoreTx,
    DEFAULT_DURATION_MINUTES,
};

use super::availability::overlapping_booking;
use super::slot::{validate_party_size, validate_slot};
use super::{AvailabilityEngine, EngineError, EngineResult, TimeSlot};

/// Reserva propuesta, todavía sin identificador ni cliente resuelto
#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub customer: CustomerSnapshot,
    pub table_id: Option<ObjectId>,
    pub staff_id: Option<ObjectId>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: u16,
    pub party_size: u8,
    pub service: ServicePeriod,
    pub section: SectionPreference,
    pub status: BookingStatus,
    pub tags: Option<String>,
    pub internal_notes: Option<String>,
    pub customer_notes: Option<String>,
    pub special_requirements: Option<String>,
}

impl BookingDraft {
    pub fn new(
        customer: CustomerSnapshot,
        date: NaiveDate,
        time: NaiveTime,
        party_size: u8,
        service: ServicePeriod,
    ) -> Self {
        BookingDraft {
            customer,
            table_id: None,
            staff_id: None,
            date,
            time,
            duration_minutes: DEFAULT_DURATION_MINUTES,
            party_size,
            service,
            section: SectionPreference::Any,
            status: BookingStatus::Pending,
            tags: None,
            internal_notes: None,
            customer_notes: None,
            special_requirements: None,
        }
    }

    pub fn slot(&self) -> TimeSlot {
        TimeSlot::new(self.time, self.duration_minutes)
    }
}

/// Cambios sobre una reserva existente. `None` deja el campo como está;
/// `Some(None)` en mesa o personal los desasigna.
#[derive(Debug, Clone, Default)]
pub struct BookingChanges {
    pub table_id: Option<Option<ObjectId>>,
    pub staff_id: Option<Option<ObjectId>>,
    pub date: Option<NaiveDate>,
    pub time: Option<NaiveTime>,
    pub duration_minutes: Option<u16>,
    pub party_size: Option<u8>,
    pub service: Option<ServicePeriod>,
    pub section: Option<SectionPreference>,
    pub tags: Option<String>,
    pub internal_notes: Option<String>,
    pub customer_notes: Option<String>,
    pub special_requirements: Option<String>,
}

impl BookingChanges {
    pub fn is_empty(&self) -> bool {
        !self.touches_schedule()
            && self.staff_id.is_none()
            && self.service.is_none()
            && self.section.is_none()
            && self.tags.is_none()
            && self.internal_notes.is_none()
            && self.customer_notes.is_none()
            && self.special_requirements.is_none()
    }

    /// Cambios que obligan a volver a comprobar conflictos y capacidad
    pub fn touches_schedule(&self) -> bool {
        self.table_id.is_some()
            || self.date.is_some()
            || self.time.is_some()
            || self.duration_minutes.is_some()
            || self.party_size.is_some()
    }

    pub fn apply(&self, booking: &mut Booking) {
        if let Some(table_id) = self.table_id {
            booking.table_id = table_id;
        }
        if let Some(staff_id) = self.staff_id {
            booking.staff_id = staff_id;
        }
        if let Some(date) = self.date {
            booking.date = date;
        }
        if let Some(time) = self.time {
            booking.time = time;
        }
        if let Some(duration) = self.duration_minutes {
            booking.duration_minutes = duration;
        }
        if let Some(party_size) = self.party_size {
            booking.party_size = party_size;
        }
        if let Some(service) = self.service {
            booking.service = service;
        }
        if let Some(section) = self.section {
            booking.section = section;
        }
        let texts = [
            (&self.tags, &mut booking.tags),
            (&self.internal_notes, &mut booking.internal_notes),
            (&self.customer_notes, &mut booking.customer_notes),
            (&self.special_requirements, &mut booking.special_requirements),
        ];
        for (change, field) in texts {
            if let Some(value) = change {
                *field = Some(value.clone());
            }
        }
        booking.updated_at = current_timestamp();
    }
}

impl AvailabilityEngine {
    /// Crea la reserva en una sola transacción.
    ///
    /// Con mesa: comprueba capacidad, bloquea la franja (mesa, fecha) y
    /// rechaza cualquier solapamiento con una reserva activa. Sin mesa la
    /// reserva queda sin asignar. El cliente se resuelve por teléfono y se
    /// crea si no existe.
    pub async fn commit_booking(
        &self,
        draft: BookingDraft,
        actor: Option<ObjectId>,
    ) -> EngineResult<ObjectId> {
        validate_slot(&draft.slot())?;
        validate_party_size(draft.party_size)?;
        if !matches!(draft.status, BookingStatus::Pending | BookingStatus::Confirmed) {
            return Err(EngineError::Validation(format!(
                "una reserva nueva no puede empezar en estado '{}'",
                draft.status
            )));
        }
        if sanitize_phone(&draft.customer.phone).is_empty() {
            return Err(EngineError::Validation(
                "el teléfono del cliente es obligatorio".to_string(),
            ));
        }

        let mut retry = self.retry();
        loop {
            let mut tx = self.store.begin().await?;
            let result = self.insert_booking(tx.as_mut(), draft.clone(), actor).await;
            match self.finish(tx, result).await {
                Err(error) if retry.allows(&error) => retry.pause(&error).await,
                outcome => return outcome,
            }
        }
    }

    async fn insert_booking(
        &self,
        tx: &mut dyn StoreTx,
        draft: BookingDraft,
        actor: Option<ObjectId>,
    ) -> EngineResult<ObjectId> {
        let slot = draft.slot();
        if let Some(table_id) = &draft.table_id {
            self.reserve_slot(tx, table_id, draft.date, &slot, draft.party_size, None)
                .await?;
        }
        if let Some(staff_id) = draft.staff_id {
            if tx.staff(&staff_id).await?.is_none() {
                return Err(EngineError::not_found("personal", staff_id));
            }
        }

        let mut snapshot = draft.customer;
        snapshot.phone = sanitize_phone(&snapshot.phone);
        let customer_id = self.resolve_customer(tx, &snapshot).await?;

        let now = current_timestamp();
        let booking = Booking {
            id: ObjectId::new(),
            customer_id,
            table_id: draft.table_id,
            staff_id: draft.staff_id,
            date: draft.date,
            time: draft.time,
            duration_minutes: draft.duration_minutes,
            party_size: draft.party_size,
            service: draft.service,
            section: draft.section,
            status: draft.status,
            customer: snapshot,
            tags: draft.tags,
            internal_notes: draft.internal_notes,
            customer_notes: draft.customer_notes,
            special_requirements: draft.special_requirements,
            created_at: now,
            updated_at: now,
        };
        tx.insert_booking(&booking).await?;
        tx.append_history(&HistoryEntry::new(
            booking.id,
            HistoryAction::Created,
            None,
            Some(booking.snapshot()),
            actor,
        ))
        .await?;

        tracing::info!(
            booking_id = %booking.id,
            table_id = ?booking.table_id.map(|id| id.to_hex()),
            date = %booking.date,
            slot = %slot,
            party_size = booking.party_size,
            "Reserva creada"
        );
        Ok(booking.id)
    }

    /// Aplica los cambios a la reserva. Si afectan a mesa, fecha, hora,
    /// duración o comensales se repite la comprobación de conflictos
    /// excluyendo la propia reserva.
    pub async fn update_booking(
        &self,
        id: &ObjectId,
        changes: &BookingChanges,
        actor: Option<ObjectId>,
    ) -> EngineResult<Booking> {
        if changes.is_empty() {
            return Err(EngineError::Validation("no hay campos que actualizar".to_string()));
        }
        if let Some(party_size) = changes.party_size {
            validate_party_size(party_size)?;
        }

        let mut retry = self.retry();
        loop {
            let mut tx = self.store.begin().await?;
            let result = self.apply_changes(tx.as_mut(), id, changes, actor).await;
            match self.finish(tx, result).await {
                Err(error) if retry.allows(&error) => retry.pause(&error).await,
                outcome => return outcome,
            }
        }
    }

    async fn apply_changes(
        &self,
        tx: &mut dyn StoreTx,
        id: &ObjectId,
        changes: &BookingChanges,
        actor: Option<ObjectId>,
    ) -> EngineResult<Booking> {
        self.lock(tx, LockKey::Booking(*id)).await?;
        let current = tx
            .booking(id)
            .await?
            .ok_or_else(|| EngineError::not_found("reserva", *id))?;

        let mut updated = current.clone();
        changes.apply(&mut updated);

        if changes.touches_schedule() {
            if !current.is_active() {
                return Err(EngineError::Validation(format!(
                    "no se puede reprogramar una reserva en estado '{}'",
                    current.status
                )));
            }
            let slot = updated.slot();
            validate_slot(&slot)?;
            if let Some(table_id) = &updated.table_id {
                self.reserve_slot(tx, table_id, updated.date, &slot, updated.party_size, Some(id))
                    .await?;
            }
        }
        if let Some(Some(staff_id)) = changes.staff_id {
            if tx.staff(&staff_id).await?.is_none() {
                return Err(EngineError::not_found("personal", staff_id));
            }
        }

        tx.replace_booking(&updated).await?;
        tx.append_history(&HistoryEntry::new(
            *id,
            HistoryAction::Updated,
            Some(current.snapshot()),
            Some(updated.snapshot()),
            actor,
        ))
        .await?;

        tracing::info!(
            booking_id = %id,
            table_id = ?updated.table_id.map(|t| t.to_hex()),
            date = %updated.date,
            "Reserva actualizada"
        );
        Ok(updated)
    }

    /// Comprueba capacidad y solapamiento para ocupar `slot` en la mesa.
    ///
    /// Deja tomado el bloqueo de la franja hasta el final de la transacción.
    pub(crate) async fn reserve_slot(
        &self,
        tx: &mut dyn StoreTx,
        table_id: &ObjectId,
        date: NaiveDate,
        slot: &TimeSlot,
        party_size: u8,
        excluding: Option<&ObjectId>,
    ) -> EngineResult<()> {
        let table = tx
            .table(table_id)
            .await?
            .ok_or_else(|| EngineError::not_found("mesa", *table_id))?;
        if table.capacity < party_size {
            return Err(EngineError::Capacity {
                party_size,
                capacity: table.capacity,
            });
        }

        self.lock(
            tx,
            LockKey::Slot {
                table_id: *table_id,
                date,
            },
        )
        .await?;

        let bookings = tx.active_bookings_for_table(table_id, date).await?;
        if let Some(existing) = overlapping_booking(&bookings, table_id, date, slot, excluding) {
            tracing::warn!(
                table_id = %table_id,
                date = %date,
                requested = %slot,
                existing_booking = %existing.id,
                existing_slot = %existing.slot(),
                "Conflicto de horario"
            );
            return Err(EngineError::Conflict {
                booking_id: existing.id,
                slot: existing.slot(),
            });
        }
        Ok(())
    }

    /// Cliente con ese teléfono, creado o refrescado con los datos de la
    /// reserva bajo el bloqueo `customer:<teléfono>`
    async fn resolve_customer(
        &self,
        tx: &mut dyn StoreTx,
        snapshot: &CustomerSnapshot,
    ) -> EngineResult<ObjectId> {
        self.lock(tx, LockKey::Customer(snapshot.phone.clone())).await?;
        if let Some(mut existing) = tx.customer_by_phone(&snapshot.phone).await? {
            if existing.refresh_from(snapshot) {
                tx.replace_customer(&existing).await?;
                tracing::debug!(
                    customer_id = %existing.id,
                    "Datos del cliente actualizados desde una reserva"
                );
            }
            return Ok(existing.id);
        }
        let customer = Customer::from_snapshot(snapshot);
        tx.insert_customer(&customer).await?;
        tracing::info!(
            customer_id = %customer.id,
            phone = %customer.phone,
            "Cliente creado desde una reserva"
        );
        Ok(customer.id)
    }
}

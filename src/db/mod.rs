//! # Capa de persistencia
//!
//! El almacén se construye una vez al arrancar y se inyecta en el motor de
//! disponibilidad y en la API como `Arc<dyn Store>`. Hay dos implementaciones:
//!
//! - [`MongoRepo`] - MongoDB con transacciones multi-documento (requiere replica set)
//! - [`MemoryStore`] - almacén en proceso con el mismo contrato transaccional
//!
//! Toda mutación de reservas pasa por una transacción [`StoreTx`]: los
//! bloqueos con nombre ([`LockKey`]) se toman dentro de la transacción y se
//! liberan al confirmarla o descartarla.

pub mod memory;
pub mod models;
pub mod mongodb;
pub mod seed;

pub use self::memory::MemoryStore;
pub use self::models::*;
pub use self::mongodb::MongoRepo;

use ::mongodb::bson::oid::ObjectId;
use async_trait::async_trait;
use chrono::NaiveDate;
use std::fmt;
use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Error de base de datos en operación '{operation}': {source}")]
    Database {
        operation: String,
        #[source]
        source: ::mongodb::error::Error,
    },

    /// Otra transacción escribió el mismo documento; se puede reintentar
    #[error("Conflicto de escritura concurrente: {0}")]
    WriteConflict(String),

    #[error("Registro duplicado: {0}")]
    Duplicate(String),

    #[error("Tiempo de espera agotado esperando el bloqueo '{0}'")]
    LockTimeout(String),
}

/// Recurso protegido por un bloqueo dentro de una transacción.
///
/// Orden de adquisición: reserva → franja → cliente.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LockKey {
    /// Reservas activas de una mesa en una fecha
    Slot { table_id: ObjectId, date: NaiveDate },
    Booking(ObjectId),
    /// Alta de cliente por teléfono
    Customer(String),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Slot { table_id, date } => write!(f, "slot:{}:{}", table_id.to_hex(), date),
            LockKey::Booking(id) => write!(f, "booking:{}", id.to_hex()),
            LockKey::Customer(phone) => write!(f, "customer:{phone}"),
        }
    }
}

/// Filtro de listado de reservas. Los campos `None` no filtran.
#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub date: Option<NaiveDate>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub service: Option<ServicePeriod>,
    pub section: Option<SectionPreference>,
    pub status: Option<BookingStatus>,
    pub customer_id: Option<ObjectId>,
    pub table_id: Option<ObjectId>,
    pub active_only: bool,
    pub limit: Option<usize>,
}

impl BookingFilter {
    pub fn on_date(date: NaiveDate) -> Self {
        BookingFilter {
            date: Some(date),
            ..Default::default()
        }
    }

    pub fn between(from: NaiveDate, to: NaiveDate) -> Self {
        BookingFilter {
            from: Some(from),
            to: Some(to),
            ..Default::default()
        }
    }

    pub fn matches(&self, booking: &Booking) -> bool {
        self.date.map_or(true, |d| booking.date == d)
            && self.from.map_or(true, |d| booking.date >= d)
            && self.to.map_or(true, |d| booking.date <= d)
            && self.service.map_or(true, |s| booking.service == s)
            && self.section.map_or(true, |s| booking.section == s)
            && self.status.map_or(true, |s| booking.status == s)
            && self.customer_id.map_or(true, |id| booking.customer_id == id)
            && self.table_id.map_or(true, |id| booking.table_id == Some(id))
            && (!self.active_only || booking.is_active())
    }
}

/// Orden de los listados: fecha descendente, hora ascendente
pub fn listing_order(a: &Booking, b: &Booking) -> std::cmp::Ordering {
    b.date.cmp(&a.date).then(a.time.cmp(&b.time))
}

#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: u32,
    pub limit: u32,
}

impl Page {
    pub fn skip(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }
}

/// Almacén de mesas, personal, clientes y reservas.
///
/// Las lecturas no toman bloqueos. Las mutaciones de reservas solo existen en
/// [`StoreTx`].
#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    async fn insert_table(&self, table: &Table) -> StoreResult<()>;
    /// Ordenadas por zona y número de mesa
    async fn tables(&self) -> StoreResult<Vec<Table>>;
    async fn table(&self, id: &ObjectId) -> StoreResult<Option<Table>>;
    async fn set_table_status(&self, id: &ObjectId, status: TableStatus) -> StoreResult<bool>;

    async fn insert_staff(&self, staff: &Staff) -> StoreResult<()>;
    async fn active_staff(&self) -> StoreResult<Vec<Staff>>;
    async fn staff(&self, id: &ObjectId) -> StoreResult<Option<Staff>>;
    async fn staff_by_token(&self, token: &str) -> StoreResult<Option<Staff>>;
    async fn staff_by_email(&self, email: &str) -> StoreResult<Option<Staff>>;
    async fn set_staff_password(&self, id: &ObjectId, password_hash: &str) -> StoreResult<bool>;

    async fn insert_customer(&self, customer: &Customer) -> StoreResult<()>;
    async fn customer(&self, id: &ObjectId) -> StoreResult<Option<Customer>>;
    /// Página de clientes (más recientes primero) y total de clientes
    async fn customers(&self, page: Page) -> StoreResult<(Vec<Customer>, u64)>;
    async fn search_customers(&self, query: &str, limit: usize) -> StoreResult<Vec<Customer>>;
    async fn update_customer(
        &self,
        id: &ObjectId,
        changes: &CustomerChanges,
    ) -> StoreResult<Option<Customer>>;

    async fn booking(&self, id: &ObjectId) -> StoreResult<Option<Booking>>;
    async fn bookings(&self, filter: &BookingFilter) -> StoreResult<Vec<Booking>>;
    /// Historial de una reserva en orden cronológico
    async fn history(&self, booking_id: &ObjectId) -> StoreResult<Vec<HistoryEntry>>;

    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;
}

/// Transacción aislada sobre el almacén.
///
/// Si se descarta sin `commit` no queda ninguna escritura aplicada.
#[async_trait]
pub trait StoreTx: Send {
    /// Espera hasta obtener el bloqueo; el llamador acota la espera.
    async fn lock(&mut self, key: &LockKey) -> StoreResult<()>;

    async fn table(&mut self, id: &ObjectId) -> StoreResult<Option<Table>>;
    async fn staff(&mut self, id: &ObjectId) -> StoreResult<Option<Staff>>;
    async fn booking(&mut self, id: &ObjectId) -> StoreResult<Option<Booking>>;
    async fn active_bookings_for_table(
        &mut self,
        table_id: &ObjectId,
        date: NaiveDate,
    ) -> StoreResult<Vec<Booking>>;
    async fn customer_by_phone(&mut self, phone: &str) -> StoreResult<Option<Customer>>;

    async fn insert_customer(&mut self, customer: &Customer) -> StoreResult<()>;
    async fn replace_customer(&mut self, customer: &Customer) -> StoreResult<()>;
    async fn insert_booking(&mut self, booking: &Booking) -> StoreResult<()>;
    async fn replace_booking(&mut self, booking: &Booking) -> StoreResult<()>;
    async fn append_history(&mut self, entry: &HistoryEntry) -> StoreResult<()>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
    async fn rollback(self: Box<Self>) -> StoreResult<()>;
}

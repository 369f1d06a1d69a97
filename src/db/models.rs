//! # Modelos de dominio
//!
//! Documentos persistidos por el almacén: mesas, reservas, clientes, personal
//! e historial de reservas. Todos los identificadores son `ObjectId` y todas
//! las marcas de tiempo son segundos unix.

use chrono::{NaiveDate, NaiveTime};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_DURATION_MINUTES: u16 = 120;
pub const MIN_DURATION_MINUTES: u16 = 30;
pub const MAX_DURATION_MINUTES: u16 = 300;
pub const MIN_PARTY_SIZE: u8 = 1;
pub const MAX_PARTY_SIZE: u8 = 20;

/// Zona física del restaurante donde se ubica una mesa
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Section {
    Bistro,
    Central,
    MainLounge,
    Terrace,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Bistro => "bistro",
            Section::Central => "central",
            Section::MainLounge => "main-lounge",
            Section::Terrace => "terrace",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableStatus {
    Available,
    Occupied,
    Maintenance,
}

impl TableStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableStatus::Available => "available",
            TableStatus::Occupied => "occupied",
            TableStatus::Maintenance => "maintenance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServicePeriod {
    Breakfast,
    Lunch,
    Brunch,
    Dinner,
    LateNight,
}

impl ServicePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServicePeriod::Breakfast => "breakfast",
            ServicePeriod::Lunch => "lunch",
            ServicePeriod::Brunch => "brunch",
            ServicePeriod::Dinner => "dinner",
            ServicePeriod::LateNight => "late-night",
        }
    }
}

/// Preferencia de zona indicada por el cliente (`any` = sin preferencia)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SectionPreference {
    #[default]
    Any,
    Bistro,
    Central,
    MainLounge,
    Terrace,
}

impl SectionPreference {
    /// Zona concreta solicitada, o `None` si el cliente acepta cualquiera
    pub fn section(&self) -> Option<Section> {
        match self {
            SectionPreference::Any => None,
            SectionPreference::Bistro => Some(Section::Bistro),
            SectionPreference::Central => Some(Section::Central),
            SectionPreference::MainLounge => Some(Section::MainLounge),
            SectionPreference::Terrace => Some(Section::Terrace),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self.section() {
            Some(section) => section.as_str(),
            None => "any",
        }
    }
}

/// Estado del ciclo de vida de una reserva
///
/// ```text
/// pending → confirmed → arrived → seated → completed
/// pending | confirmed → cancelled
/// confirmed → no-show
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookingStatus {
    #[default]
    Pending,
    Confirmed,
    Arrived,
    Seated,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub const ACTIVE: [BookingStatus; 4] = [
        BookingStatus::Pending,
        BookingStatus::Confirmed,
        BookingStatus::Arrived,
        BookingStatus::Seated,
    ];

    /// Una reserva activa ocupa el intervalo de su mesa
    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, Arrived)
                | (Arrived, Seated)
                | (Seated, Completed)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
                | (Confirmed, NoShow)
        )
    }

    /// Acción de historial que registra la llegada a este estado
    pub fn history_action(&self) -> HistoryAction {
        match self {
            BookingStatus::Confirmed => HistoryAction::Confirmed,
            BookingStatus::Cancelled => HistoryAction::Cancelled,
            BookingStatus::Completed => HistoryAction::Completed,
            _ => HistoryAction::Updated,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Arrived => "arrived",
            BookingStatus::Seated => "seated",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no-show",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HistoryAction {
    Created,
    Updated,
    Confirmed,
    Cancelled,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StaffRole {
    Host,
    Server,
    Manager,
    Admin,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Host => "host",
            StaffRole::Server => "server",
            StaffRole::Manager => "manager",
            StaffRole::Admin => "admin",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Table {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub table_number: String,
    pub section: Section,
    pub capacity: u8,
    pub status: TableStatus,
    pub created_at: i64, // timestamp unix
}

impl Table {
    pub fn new(table_number: &str, section: Section, capacity: u8) -> Self {
        Table {
            id: ObjectId::new(),
            table_number: table_number.to_string(),
            section,
            capacity,
            status: TableStatus::Available,
            created_at: current_timestamp(),
        }
    }
}

/// Datos del cliente copiados en la reserva al crearla.
///
/// Nunca se modifica después: ediciones posteriores del cliente no alteran
/// lo que se registró en la reserva.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CustomerSnapshot {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
    pub company: Option<String>,
}

impl CustomerSnapshot {
    /// Separa el nombre completo en (nombre, apellidos) por el primer espacio
    pub fn split_name(&self) -> (String, String) {
        let name = self.name.trim();
        match name.split_once(' ') {
            Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
            None => (name.to_string(), String::new()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Booking {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub customer_id: ObjectId,
    pub table_id: Option<ObjectId>,
    pub staff_id: Option<ObjectId>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: u16,
    pub party_size: u8,
    pub service: ServicePeriod,
    pub section: SectionPreference,
    pub status: BookingStatus,
    pub customer: CustomerSnapshot,
    pub tags: Option<String>,
    pub internal_notes: Option<String>,
    pub customer_notes: Option<String>,
    pub special_requirements: Option<String>,
    pub created_at: i64, // timestamp unix
    pub updated_at: i64, // timestamp unix
}

impl Booking {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn snapshot(&self) -> BookingSnapshot {
        BookingSnapshot {
            status: self.status,
            table_id: self.table_id,
            staff_id: self.staff_id,
            date: self.date,
            time: self.time,
            duration_minutes: self.duration_minutes,
            party_size: self.party_size,
            service: self.service,
            section: self.section,
        }
    }
}

/// Valores de una reserva guardados en el historial antes/después de un cambio
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BookingSnapshot {
    pub status: BookingStatus,
    pub table_id: Option<ObjectId>,
    pub staff_id: Option<ObjectId>,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub duration_minutes: u16,
    pub party_size: u8,
    pub service: ServicePeriod,
    pub section: SectionPreference,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HistoryEntry {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub booking_id: ObjectId,
    pub action: HistoryAction,
    pub old_values: Option<BookingSnapshot>,
    pub new_values: Option<BookingSnapshot>,
    pub changed_by: Option<ObjectId>,
    pub notes: Option<String>,
    pub created_at: i64, // timestamp unix
}

impl HistoryEntry {
    pub fn new(
        booking_id: ObjectId,
        action: HistoryAction,
        old_values: Option<BookingSnapshot>,
        new_values: Option<BookingSnapshot>,
        changed_by: Option<ObjectId>,
    ) -> Self {
        HistoryEntry {
            id: ObjectId::new(),
            booking_id,
            action,
            old_values,
            new_values,
            changed_by,
            notes: None,
            created_at: current_timestamp(),
        }
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Customer {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub company: Option<String>,
    pub tags: Option<String>,
    pub notes: Option<String>,
    pub website: Option<String>,
    pub social_media: Option<String>,
    pub documents: Option<String>,
    pub created_at: i64, // timestamp unix
    pub updated_at: i64, // timestamp unix
}

impl Customer {
    pub fn new(first_name: &str, last_name: &str, phone: &str) -> Self {
        let now = current_timestamp();
        Customer {
            id: ObjectId::new(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            phone: sanitize_phone(phone),
            email: None,
            company: None,
            tags: None,
            notes: None,
            website: None,
            social_media: None,
            documents: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Cliente nuevo a partir de los datos capturados en una reserva
    pub fn from_snapshot(snapshot: &CustomerSnapshot) -> Self {
        let (first_name, last_name) = snapshot.split_name();
        let mut customer = Customer::new(&first_name, &last_name, &snapshot.phone);
        customer.email = snapshot.email.clone();
        customer.company = snapshot.company.clone();
        customer
    }

    /// Refresca nombre, email y empresa con los datos de una reserva.
    ///
    /// Un email o una empresa vacíos no borran los guardados. Devuelve `true`
    /// si algo cambió.
    pub fn refresh_from(&mut self, snapshot: &CustomerSnapshot) -> bool {
        let (first_name, last_name) = snapshot.split_name();
        let mut changed = false;
        if !first_name.is_empty() && (first_name != self.first_name || last_name != self.last_name) {
            self.first_name = first_name;
            self.last_name = last_name;
            changed = true;
        }
        for (value, field) in [
            (&snapshot.email, &mut self.email),
            (&snapshot.company, &mut self.company),
        ] {
            if value.is_some() && *field != *value {
                *field = value.clone();
                changed = true;
            }
        }
        if changed {
            self.updated_at = current_timestamp();
        }
        changed
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }

    /// Prioridad de un cliente en la búsqueda: 1 nombre completo, 2 teléfono,
    /// 3 email, 4 otro campo. `None` si no coincide.
    pub fn search_rank(&self, query: &str) -> Option<u8> {
        let needle = query.to_lowercase();
        let contains = |value: &str| value.to_lowercase().contains(&needle);
        let optional = |value: &Option<String>| value.as_deref().is_some_and(contains);

        if contains(&self.full_name()) {
            Some(1)
        } else if contains(&self.phone) {
            Some(2)
        } else if optional(&self.email) {
            Some(3)
        } else if contains(&self.first_name) || contains(&self.last_name) || optional(&self.company) {
            Some(4)
        } else {
            None
        }
    }
}

/// Campos modificables de un cliente. Cualquier otro campo se rechaza.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomerChanges {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub tags: Option<String>,
    pub notes: Option<String>,
    pub website: Option<String>,
    pub social_media: Option<String>,
    pub documents: Option<String>,
}

impl CustomerChanges {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.phone.is_none()
            && self.email.is_none()
            && self.company.is_none()
            && self.tags.is_none()
            && self.notes.is_none()
            && self.website.is_none()
            && self.social_media.is_none()
            && self.documents.is_none()
    }

    pub fn apply(&self, customer: &mut Customer) {
        if let Some(first_name) = &self.first_name {
            customer.first_name = first_name.clone();
        }
        if let Some(last_name) = &self.last_name {
            customer.last_name = last_name.clone();
        }
        if let Some(phone) = &self.phone {
            customer.phone = sanitize_phone(phone);
        }
        let optional = [
            (&self.email, &mut customer.email),
            (&self.company, &mut customer.company),
            (&self.tags, &mut customer.tags),
            (&self.notes, &mut customer.notes),
            (&self.website, &mut customer.website),
            (&self.social_media, &mut customer.social_media),
            (&self.documents, &mut customer.documents),
        ];
        for (change, field) in optional {
            if let Some(value) = change {
                *field = Some(value.clone());
            }
        }
        customer.updated_at = current_timestamp();
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Staff {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub role: StaffRole,
    pub section: Option<String>,
    pub is_active: bool,
    pub access_token: String,
    /// Hash argon2 (PHC); sin él solo se entra con el token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    pub created_at: i64, // timestamp unix
}

impl Staff {
    /// Nuevo miembro del personal con un token de acceso recién generado
    pub fn new(first_name: &str, last_name: &str, email: &str, role: StaffRole) -> Self {
        Staff {
            id: ObjectId::new(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            email: email.to_lowercase(),
            role,
            section: None,
            is_active: true,
            access_token: uuid::Uuid::new_v4().to_string(),
            password_hash: None,
            created_at: current_timestamp(),
        }
    }

    pub fn has_role(&self, roles: &[StaffRole]) -> bool {
        roles.contains(&self.role)
    }
}

// Función auxiliar para obtener timestamp actual
pub fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Deja solo dígitos y `+` en un número de teléfono
pub fn sanitize_phone(phone: &str) -> String {
    phone.chars().filter(|c| c.is_ascii_digit() || *c == '+').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_statuses_occupy_the_table() {
        assert!(BookingStatus::Pending.is_active());
        assert!(BookingStatus::Seated.is_active());
        assert!(!BookingStatus::Completed.is_active());
        assert!(!BookingStatus::Cancelled.is_active());
        assert!(!BookingStatus::NoShow.is_active());
    }

    #[test]
    fn lifecycle_only_allows_documented_edges() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(NoShow));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(NoShow));
        assert!(!Pending.can_transition_to(Seated));
        assert!(!Seated.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Cancelled.can_transition_to(Confirmed));
    }

    #[test]
    fn enums_use_kebab_case_on_the_wire() {
        assert_eq!(serde_json::to_string(&Section::MainLounge).unwrap(), "\"main-lounge\"");
        assert_eq!(serde_json::to_string(&BookingStatus::NoShow).unwrap(), "\"no-show\"");
        assert_eq!(serde_json::to_string(&ServicePeriod::LateNight).unwrap(), "\"late-night\"");
        assert_eq!(SectionPreference::Terrace.as_str(), "terrace");
        assert_eq!(SectionPreference::Any.section(), None);
    }

    #[test]
    fn snapshot_name_split_keeps_compound_surnames() {
        let snapshot = CustomerSnapshot {
            name: "Margaret Briggs Hale".to_string(),
            phone: "+61412345678".to_string(),
            email: None,
            company: None,
        };
        assert_eq!(snapshot.split_name(), ("Margaret".to_string(), "Briggs Hale".to_string()));
    }

    #[test]
    fn phone_sanitizing_strips_formatting() {
        assert_eq!(sanitize_phone("+61 (412) 345-678"), "+61412345678");
    }

    #[test]
    fn search_rank_prefers_name_over_phone() {
        let mut customer = Customer::new("Kim", "Etcell", "+61423456789");
        customer.email = Some("kim.etcell@email.com".to_string());
        assert_eq!(customer.search_rank("kim e"), Some(1));
        assert_eq!(customer.search_rank("4234"), Some(2));
        assert_eq!(customer.search_rank("@email"), Some(3));
        assert_eq!(customer.search_rank("zzz"), None);
    }

    #[test]
    fn refresh_from_booking_keeps_missing_contact_fields() {
        let mut customer = Customer::new("Cathy", "MacIntyre", "+61434567890");
        customer.company = Some("ABC Corp".to_string());
        let snapshot = CustomerSnapshot {
            name: "Catherine MacIntyre".to_string(),
            phone: "+61434567890".to_string(),
            email: Some("catherine@email.com".to_string()),
            company: None,
        };
        assert!(customer.refresh_from(&snapshot));
        assert_eq!(customer.first_name, "Catherine");
        assert_eq!(customer.email.as_deref(), Some("catherine@email.com"));
        assert_eq!(customer.company.as_deref(), Some("ABC Corp"));

        // sin cambios no hay nada que guardar
        assert!(!customer.refresh_from(&snapshot));
    }

    #[test]
    fn customer_changes_leave_unset_fields_alone() {
        let mut customer = Customer::new("Cathy", "MacIntyre", "+61434567890");
        customer.company = Some("ABC Corp".to_string());
        let changes = CustomerChanges {
            email: Some("cathy@email.com".to_string()),
            phone: Some("+61 434 000 000".to_string()),
            ..Default::default()
        };
        changes.apply(&mut customer);
        assert_eq!(customer.email.as_deref(), Some("cathy@email.com"));
        assert_eq!(customer.phone, "+61434000000");
        assert_eq!(customer.company.as_deref(), Some("ABC Corp"));
    }
}

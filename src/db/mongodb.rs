use async_trait::async_trait;
use chrono::NaiveDate;
use mongodb::bson::{doc, oid::ObjectId, Bson, Document};
use mongodb::error::{ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR};
use mongodb::options::{Acknowledgment, IndexOptions, ReadConcern, ReturnDocument, WriteConcern};
use mongodb::{Client, ClientSession, Collection, Cursor, Database, IndexModel, SessionCursor};
use serde::de::DeserializeOwned;
use std::collections::HashSet;

use super::{
    current_timestamp, Booking, BookingFilter, BookingStatus, Customer, CustomerChanges,
    HistoryEntry, LockKey, Page, Staff, Store, StoreError, StoreResult, StoreTx, Table,
    TableStatus,
};
use crate::api::middleware::ErrorLogExt;

const DUPLICATE_KEY: i32 = 11000;

impl StoreError {
    /// Clasifica un error del driver: duplicados y errores transitorios de
    /// transacción tienen variante propia.
    pub fn database(operation: &str, source: mongodb::error::Error) -> Self {
        if source.contains_label(TRANSIENT_TRANSACTION_ERROR) {
            return Self::WriteConflict(format!("{operation}: {source}"));
        }
        if is_duplicate_key(&source) {
            return Self::Duplicate(format!("{operation}: {source}"));
        }
        Self::Database {
            operation: operation.to_string(),
            source,
        }
    }
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => e.code == DUPLICATE_KEY,
        ErrorKind::Command(e) => e.code == DUPLICATE_KEY,
        _ => false,
    }
}

fn active_statuses() -> Vec<&'static str> {
    BookingStatus::ACTIVE.iter().map(|s| s.as_str()).collect()
}

fn booking_filter_document(filter: &BookingFilter) -> Document {
    let mut document = Document::new();
    if let Some(date) = filter.date {
        document.insert("date", date.to_string());
    }
    let mut range = Document::new();
    if let Some(from) = filter.from {
        range.insert("$gte", from.to_string());
    }
    if let Some(to) = filter.to {
        range.insert("$lte", to.to_string());
    }
    if !range.is_empty() && filter.date.is_none() {
        document.insert("date", range);
    }
    if let Some(service) = filter.service {
        document.insert("service", service.as_str());
    }
    if let Some(section) = filter.section {
        document.insert("section", section.as_str());
    }
    if let Some(customer_id) = filter.customer_id {
        document.insert("customer_id", customer_id);
    }
    if let Some(table_id) = filter.table_id {
        document.insert("table_id", table_id);
    }
    match (filter.status, filter.active_only) {
        (Some(status), true) if !status.is_active() => {
            // ningún estado cumple ambas condiciones
            document.insert("status", doc! { "$in": Vec::<&str>::new() });
        }
        (Some(status), _) => {
            document.insert("status", status.as_str());
        }
        (None, true) => {
            document.insert("status", doc! { "$in": active_statuses() });
        }
        (None, false) => {}
    }
    document
}

fn customer_changes_document(changes: &CustomerChanges) -> Document {
    let mut set = doc! { "updated_at": current_timestamp() };
    let fields = [
        ("first_name", &changes.first_name),
        ("last_name", &changes.last_name),
        ("email", &changes.email),
        ("company", &changes.company),
        ("tags", &changes.tags),
        ("notes", &changes.notes),
        ("website", &changes.website),
        ("social_media", &changes.social_media),
        ("documents", &changes.documents),
    ];
    for (name, value) in fields {
        if let Some(value) = value {
            set.insert(name, value.as_str());
        }
    }
    if let Some(phone) = &changes.phone {
        set.insert("phone", super::sanitize_phone(phone));
    }
    set
}

/// Escapa los metacaracteres de expresiones regulares de una búsqueda literal
fn escape_regex(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

async fn collect<T>(mut cursor: Cursor<T>, operation: &str) -> StoreResult<Vec<T>>
where
    T: DeserializeOwned + Send + Sync,
{
    let mut results = Vec::new();
    while cursor
        .advance()
        .await
        .map_err(|e| StoreError::database(operation, e))?
    {
        results.push(
            cursor
                .deserialize_current()
                .map_err(|e| StoreError::database(operation, e))?,
        );
    }
    Ok(results)
}

#[derive(Debug, Clone)]
pub struct MongoRepo {
    pub client: Client,
    pub database: Database,
}

impl MongoRepo {
    pub async fn init(uri: &str, database_name: &str) -> StoreResult<MongoRepo> {
        let client = Client::with_uri_str(uri)
            .await
            .map_err(|e| StoreError::database("connect", e))?;

        let database = client.database(database_name);

        // Test connection
        database
            .run_command(doc! {"ping": 1})
            .await
            .log_error_context("validando conexión MongoDB")
            .map_err(|e| StoreError::database("ping", e))?;

        tracing::info!(database = %database_name, "Conexión a MongoDB establecida exitosamente");

        Ok(MongoRepo { client, database })
    }

    pub fn tables(&self) -> Collection<Table> {
        self.database.collection("tables")
    }

    pub fn staff(&self) -> Collection<Staff> {
        self.database.collection("staff")
    }

    pub fn customers(&self) -> Collection<Customer> {
        self.database.collection("customers")
    }

    pub fn bookings(&self) -> Collection<Booking> {
        self.database.collection("bookings")
    }

    pub fn booking_history(&self) -> Collection<HistoryEntry> {
        self.database.collection("booking_history")
    }

    pub fn locks(&self) -> Collection<Document> {
        self.database.collection("locks")
    }

    // Método para crear índices si es necesario
    pub async fn create_indexes(&self) -> StoreResult<()> {
        let unique = || IndexOptions::builder().unique(true).build();

        self.tables()
            .create_indexes(vec![
                IndexModel::builder()
                    .keys(doc! { "table_number": 1 })
                    .options(unique())
                    .build(),
                IndexModel::builder().keys(doc! { "section": 1, "capacity": 1 }).build(),
            ])
            .await
            .map_err(|e| StoreError::database("create_indexes_tables", e))?;

        self.staff()
            .create_indexes(vec![
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(unique())
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "access_token": 1 })
                    .options(unique())
                    .build(),
            ])
            .await
            .map_err(|e| StoreError::database("create_indexes_staff", e))?;

        // El email es opcional: solo se exige unicidad cuando está presente
        let email_unique = IndexOptions::builder()
            .unique(true)
            .partial_filter_expression(doc! { "email": { "$type": "string" } })
            .build();
        self.customers()
            .create_indexes(vec![
                IndexModel::builder()
                    .keys(doc! { "phone": 1 })
                    .options(unique())
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "email": 1 })
                    .options(email_unique)
                    .build(),
                IndexModel::builder()
                    .keys(doc! { "first_name": 1, "last_name": 1 })
                    .build(),
            ])
            .await
            .map_err(|e| StoreError::database("create_indexes_customers", e))?;

        self.bookings()
            .create_indexes(vec![
                IndexModel::builder()
                    .keys(doc! { "table_id": 1, "date": 1, "status": 1 })
                    .build(),
                IndexModel::builder().keys(doc! { "date": 1, "time": 1 }).build(),
                IndexModel::builder().keys(doc! { "customer_id": 1 }).build(),
                IndexModel::builder().keys(doc! { "status": 1 }).build(),
            ])
            .await
            .map_err(|e| StoreError::database("create_indexes_bookings", e))?;

        self.booking_history()
            .create_indexes(vec![IndexModel::builder()
                .keys(doc! { "booking_id": 1, "created_at": 1 })
                .build()])
            .await
            .map_err(|e| StoreError::database("create_indexes_history", e))?;

        tracing::info!("Índices MongoDB creados exitosamente");
        Ok(())
    }
}

#[async_trait]
impl Store for MongoRepo {
    async fn ping(&self) -> StoreResult<()> {
        self.database
            .run_command(doc! {"ping": 1})
            .await
            .map_err(|e| StoreError::database("ping", e))?;
        Ok(())
    }

    async fn insert_table(&self, table: &Table) -> StoreResult<()> {
        self.tables()
            .insert_one(table)
            .await
            .map_err(|e| StoreError::database("insert_table", e))?;
        Ok(())
    }

    async fn tables(&self) -> StoreResult<Vec<Table>> {
        let cursor = self
            .tables()
            .find(doc! {})
            .sort(doc! { "section": 1, "table_number": 1 })
            .await
            .map_err(|e| StoreError::database("list_tables", e))?;
        collect(cursor, "list_tables").await
    }

    async fn table(&self, id: &ObjectId) -> StoreResult<Option<Table>> {
        self.tables()
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| StoreError::database("get_table", e))
    }

    async fn set_table_status(&self, id: &ObjectId, status: TableStatus) -> StoreResult<bool> {
        let result = self
            .tables()
            .update_one(doc! { "_id": id }, doc! { "$set": { "status": status.as_str() } })
            .await
            .map_err(|e| StoreError::database("set_table_status", e))?;
        Ok(result.matched_count > 0)
    }

    async fn insert_staff(&self, staff: &Staff) -> StoreResult<()> {
        self.staff()
            .insert_one(staff)
            .await
            .map_err(|e| StoreError::database("insert_staff", e))?;
        Ok(())
    }

    async fn active_staff(&self) -> StoreResult<Vec<Staff>> {
        let cursor = self
            .staff()
            .find(doc! { "is_active": true })
            .sort(doc! { "role": 1, "first_name": 1 })
            .await
            .map_err(|e| StoreError::database("list_staff", e))?;
        collect(cursor, "list_staff").await
    }

    async fn staff(&self, id: &ObjectId) -> StoreResult<Option<Staff>> {
        self.staff()
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| StoreError::database("get_staff", e))
    }

    async fn staff_by_token(&self, token: &str) -> StoreResult<Option<Staff>> {
        self.staff()
            .find_one(doc! { "access_token": token })
            .await
            .map_err(|e| StoreError::database("validate_token", e))
    }

    async fn staff_by_email(&self, email: &str) -> StoreResult<Option<Staff>> {
        self.staff()
            .find_one(doc! { "email": email.to_lowercase() })
            .await
            .map_err(|e| StoreError::database("staff_by_email", e))
    }

    async fn set_staff_password(&self, id: &ObjectId, password_hash: &str) -> StoreResult<bool> {
        let result = self
            .staff()
            .update_one(
                doc! { "_id": id },
                doc! { "$set": { "password_hash": password_hash } },
            )
            .await
            .map_err(|e| StoreError::database("set_staff_password", e))?;
        Ok(result.matched_count > 0)
    }

    async fn insert_customer(&self, customer: &Customer) -> StoreResult<()> {
        self.customers()
            .insert_one(customer)
            .await
            .map_err(|e| StoreError::database("insert_customer", e))?;
        Ok(())
    }

    async fn customer(&self, id: &ObjectId) -> StoreResult<Option<Customer>> {
        self.customers()
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| StoreError::database("get_customer", e))
    }

    async fn customers(&self, page: Page) -> StoreResult<(Vec<Customer>, u64)> {
        let total = self
            .customers()
            .count_documents(doc! {})
            .await
            .map_err(|e| StoreError::database("count_customers", e))?;
        let cursor = self
            .customers()
            .find(doc! {})
            .sort(doc! { "created_at": -1 })
            .skip(page.skip())
            .limit(i64::from(page.limit))
            .await
            .map_err(|e| StoreError::database("list_customers", e))?;
        Ok((collect(cursor, "list_customers").await?, total))
    }

    async fn search_customers(&self, query: &str, limit: usize) -> StoreResult<Vec<Customer>> {
        let pattern = Bson::RegularExpression(mongodb::bson::Regex {
            pattern: escape_regex(query),
            options: "i".to_string(),
        });
        let filter = doc! {
            "$or": [
                { "first_name": pattern.clone() },
                { "last_name": pattern.clone() },
                { "phone": pattern.clone() },
                { "email": pattern.clone() },
                { "company": pattern },
            ]
        };
        let cursor = self
            .customers()
            .find(filter)
            .await
            .map_err(|e| StoreError::database("search_customers", e))?;
        let mut ranked: Vec<(u8, Customer)> = collect(cursor, "search_customers")
            .await?
            .into_iter()
            .map(|c| (c.search_rank(query).unwrap_or(4), c))
            .collect();
        ranked.sort_by(|(ra, a), (rb, b)| {
            ra.cmp(rb)
                .then_with(|| a.first_name.cmp(&b.first_name))
                .then_with(|| a.last_name.cmp(&b.last_name))
        });
        Ok(ranked.into_iter().take(limit).map(|(_, c)| c).collect())
    }

    async fn update_customer(
        &self,
        id: &ObjectId,
        changes: &CustomerChanges,
    ) -> StoreResult<Option<Customer>> {
        self.customers()
            .find_one_and_update(
                doc! { "_id": id },
                doc! { "$set": customer_changes_document(changes) },
            )
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| StoreError::database("update_customer", e))
    }

    async fn booking(&self, id: &ObjectId) -> StoreResult<Option<Booking>> {
        self.bookings()
            .find_one(doc! { "_id": id })
            .await
            .map_err(|e| StoreError::database("get_booking", e))
    }

    async fn bookings(&self, filter: &BookingFilter) -> StoreResult<Vec<Booking>> {
        let collection = self.bookings();
        let mut find = collection
            .find(booking_filter_document(filter))
            .sort(doc! { "date": -1, "time": 1 });
        if let Some(limit) = filter.limit {
            find = find.limit(i64::try_from(limit).unwrap_or(i64::MAX));
        }
        let cursor = find
            .await
            .map_err(|e| StoreError::database("list_bookings", e))?;
        collect(cursor, "list_bookings").await
    }

    async fn history(&self, booking_id: &ObjectId) -> StoreResult<Vec<HistoryEntry>> {
        let cursor = self
            .booking_history()
            .find(doc! { "booking_id": booking_id })
            .sort(doc! { "created_at": 1 })
            .await
            .map_err(|e| StoreError::database("booking_history", e))?;
        collect(cursor, "booking_history").await
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let mut session = self
            .client
            .start_session()
            .await
            .map_err(|e| StoreError::database("start_session", e))?;
        session
            .start_transaction()
            .read_concern(ReadConcern::snapshot())
            .write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build())
            .await
            .map_err(|e| StoreError::database("start_transaction", e))?;
        Ok(Box::new(MongoTx {
            repo: self.clone(),
            session,
            held: HashSet::new(),
        }))
    }
}

/// Transacción MongoDB sobre una sesión.
///
/// Los bloqueos son escrituras en la colección `locks` dentro de la
/// transacción: dos transacciones que escriben el mismo documento chocan y una
/// de ellas aborta con `TransientTransactionError`. Los documentos se borran
/// en la misma transacción antes de confirmarla, así la colección no crece.
struct MongoTx {
    repo: MongoRepo,
    session: ClientSession,
    held: HashSet<LockKey>,
}

impl MongoTx {
    async fn collect_in_session<T>(
        &mut self,
        mut cursor: SessionCursor<T>,
        operation: &str,
    ) -> StoreResult<Vec<T>>
    where
        T: DeserializeOwned + Send + Sync,
    {
        let mut results = Vec::new();
        while cursor
            .advance(&mut self.session)
            .await
            .map_err(|e| StoreError::database(operation, e))?
        {
            results.push(
                cursor
                    .deserialize_current()
                    .map_err(|e| StoreError::database(operation, e))?,
            );
        }
        Ok(results)
    }
}

#[async_trait]
impl StoreTx for MongoTx {
    async fn lock(&mut self, key: &LockKey) -> StoreResult<()> {
        if self.held.contains(key) {
            return Ok(());
        }
        self.repo
            .locks()
            .update_one(
                doc! { "_id": key.to_string() },
                doc! {
                    "$inc": { "version": 1_i64 },
                    "$set": { "touched_at": current_timestamp() },
                },
            )
            .upsert(true)
            .session(&mut self.session)
            .await
            .map_err(|e| match StoreError::database("lock", e) {
                // dos altas simultáneas del mismo bloqueo chocan por _id
                StoreError::Duplicate(msg) => StoreError::WriteConflict(msg),
                other => other,
            })?;
        self.held.insert(key.clone());
        Ok(())
    }

    async fn table(&mut self, id: &ObjectId) -> StoreResult<Option<Table>> {
        self.repo
            .tables()
            .find_one(doc! { "_id": id })
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::database("get_table", e))
    }

    async fn staff(&mut self, id: &ObjectId) -> StoreResult<Option<Staff>> {
        self.repo
            .staff()
            .find_one(doc! { "_id": id })
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::database("get_staff", e))
    }

    async fn booking(&mut self, id: &ObjectId) -> StoreResult<Option<Booking>> {
        self.repo
            .bookings()
            .find_one(doc! { "_id": id })
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::database("get_booking", e))
    }

    async fn active_bookings_for_table(
        &mut self,
        table_id: &ObjectId,
        date: NaiveDate,
    ) -> StoreResult<Vec<Booking>> {
        let cursor = self
            .repo
            .bookings()
            .find(doc! {
                "table_id": table_id,
                "date": date.to_string(),
                "status": { "$in": active_statuses() },
            })
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::database("active_bookings", e))?;
        self.collect_in_session(cursor, "active_bookings").await
    }

    async fn customer_by_phone(&mut self, phone: &str) -> StoreResult<Option<Customer>> {
        self.repo
            .customers()
            .find_one(doc! { "phone": phone })
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::database("customer_by_phone", e))
    }

    async fn insert_customer(&mut self, customer: &Customer) -> StoreResult<()> {
        self.repo
            .customers()
            .insert_one(customer)
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::database("insert_customer", e))?;
        Ok(())
    }

    async fn replace_customer(&mut self, customer: &Customer) -> StoreResult<()> {
        self.repo
            .customers()
            .replace_one(doc! { "_id": customer.id }, customer)
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::database("replace_customer", e))?;
        Ok(())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        self.repo
            .bookings()
            .insert_one(booking)
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::database("insert_booking", e))?;
        Ok(())
    }

    async fn replace_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        self.repo
            .bookings()
            .replace_one(doc! { "_id": booking.id }, booking)
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::database("replace_booking", e))?;
        Ok(())
    }

    async fn append_history(&mut self, entry: &HistoryEntry) -> StoreResult<()> {
        self.repo
            .booking_history()
            .insert_one(entry)
            .session(&mut self.session)
            .await
            .map_err(|e| StoreError::database("append_history", e))?;
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> StoreResult<()> {
        if !self.held.is_empty() {
            let names: Vec<String> = self.held.iter().map(LockKey::to_string).collect();
            self.repo
                .locks()
                .delete_many(doc! { "_id": { "$in": names } })
                .session(&mut self.session)
                .await
                .map_err(|e| StoreError::database("release_locks", e))?;
        }
        self.session
            .commit_transaction()
            .await
            .map_err(|e| StoreError::database("commit_transaction", e))
    }

    async fn rollback(mut self: Box<Self>) -> StoreResult<()> {
        self.session
            .abort_transaction()
            .await
            .map_err(|e| StoreError::database("abort_transaction", e))
    }
}

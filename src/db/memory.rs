//! # Almacén en memoria
//!
//! Implementa [`Store`] sin dependencias externas. Se usa en las pruebas y en
//! desarrollo local (`STORE_BACKEND=memory`).
//!
//! Las transacciones acumulan sus escrituras y las aplican de golpe en
//! `commit`. Los bloqueos con nombre son mutex asíncronos por [`LockKey`] que
//! la transacción retiene hasta que termina, de modo que otra transacción que
//! pida el mismo bloqueo ve las escrituras ya aplicadas. Al terminar se
//! retiran del mapa los mutex que nadie más usa.

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use mongodb::bson::oid::ObjectId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use super::{
    listing_order, Booking, BookingFilter, Customer, CustomerChanges, HistoryEntry, LockKey, Page,
    Staff, Store, StoreError, StoreResult, StoreTx, Table, TableStatus,
};

#[derive(Default)]
struct Collections {
    tables: HashMap<ObjectId, Table>,
    staff: HashMap<ObjectId, Staff>,
    customers: HashMap<ObjectId, Customer>,
    bookings: HashMap<ObjectId, Booking>,
    history: Vec<HistoryEntry>,
}

impl Collections {
    fn check_customer_unique(&self, customer: &Customer) -> StoreResult<()> {
        let clash = self.customers.values().any(|other| {
            other.id != customer.id
                && (other.phone == customer.phone
                    || (customer.email.is_some() && other.email == customer.email))
        });
        if clash {
            return Err(StoreError::Duplicate(format!(
                "ya existe un cliente con el teléfono {} o ese email",
                customer.phone
            )));
        }
        Ok(())
    }
}

#[derive(Default)]
struct Inner {
    data: RwLock<Collections>,
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn lock_entries(&self) -> usize {
        self.inner.locks.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn insert_table(&self, table: &Table) -> StoreResult<()> {
        let mut data = self.inner.data.write().await;
        if data.tables.values().any(|t| t.table_number == table.table_number) {
            return Err(StoreError::Duplicate(format!(
                "la mesa {} ya existe",
                table.table_number
            )));
        }
        data.tables.insert(table.id, table.clone());
        Ok(())
    }

    async fn tables(&self) -> StoreResult<Vec<Table>> {
        let data = self.inner.data.read().await;
        let mut tables: Vec<Table> = data.tables.values().cloned().collect();
        tables.sort_by(|a, b| {
            a.section
                .cmp(&b.section)
                .then_with(|| a.table_number.cmp(&b.table_number))
        });
        Ok(tables)
    }

    async fn table(&self, id: &ObjectId) -> StoreResult<Option<Table>> {
        Ok(self.inner.data.read().await.tables.get(id).cloned())
    }

    async fn set_table_status(&self, id: &ObjectId, status: TableStatus) -> StoreResult<bool> {
        let mut data = self.inner.data.write().await;
        match data.tables.get_mut(id) {
            Some(table) => {
                table.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_staff(&self, staff: &Staff) -> StoreResult<()> {
        let mut data = self.inner.data.write().await;
        let clash = data
            .staff
            .values()
            .any(|s| s.email == staff.email || s.access_token == staff.access_token);
        if clash {
            return Err(StoreError::Duplicate(format!(
                "ya existe personal con el email {}",
                staff.email
            )));
        }
        data.staff.insert(staff.id, staff.clone());
        Ok(())
    }

    async fn active_staff(&self) -> StoreResult<Vec<Staff>> {
        let data = self.inner.data.read().await;
        let mut staff: Vec<Staff> = data.staff.values().filter(|s| s.is_active).cloned().collect();
        staff.sort_by(|a, b| {
            a.role
                .as_str()
                .cmp(b.role.as_str())
                .then_with(|| a.first_name.cmp(&b.first_name))
        });
        Ok(staff)
    }

    async fn staff(&self, id: &ObjectId) -> StoreResult<Option<Staff>> {
        Ok(self.inner.data.read().await.staff.get(id).cloned())
    }

    async fn staff_by_token(&self, token: &str) -> StoreResult<Option<Staff>> {
        let data = self.inner.data.read().await;
        Ok(data.staff.values().find(|s| s.access_token == token).cloned())
    }

    async fn staff_by_email(&self, email: &str) -> StoreResult<Option<Staff>> {
        let email = email.to_lowercase();
        let data = self.inner.data.read().await;
        Ok(data.staff.values().find(|s| s.email == email).cloned())
    }

    async fn set_staff_password(&self, id: &ObjectId, password_hash: &str) -> StoreResult<bool> {
        let mut data = self.inner.data.write().await;
        match data.staff.get_mut(id) {
            Some(staff) => {
                staff.password_hash = Some(password_hash.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert_customer(&self, customer: &Customer) -> StoreResult<()> {
        let mut data = self.inner.data.write().await;
        data.check_customer_unique(customer)?;
        data.customers.insert(customer.id, customer.clone());
        Ok(())
    }

    async fn customer(&self, id: &ObjectId) -> StoreResult<Option<Customer>> {
        Ok(self.inner.data.read().await.customers.get(id).cloned())
    }

    async fn customers(&self, page: Page) -> StoreResult<(Vec<Customer>, u64)> {
        let data = self.inner.data.read().await;
        let mut customers: Vec<Customer> = data.customers.values().cloned().collect();
        customers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let total = customers.len() as u64;
        let page_items = customers
            .into_iter()
            .skip(page.skip() as usize)
            .take(page.limit as usize)
            .collect();
        Ok((page_items, total))
    }

    async fn search_customers(&self, query: &str, limit: usize) -> StoreResult<Vec<Customer>> {
        let data = self.inner.data.read().await;
        let mut ranked: Vec<(u8, Customer)> = data
            .customers
            .values()
            .filter_map(|c| c.search_rank(query).map(|rank| (rank, c.clone())))
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
        let mut data = self.inner.data.write().await;
        let Some(mut customer) = data.customers.get(id).cloned() else {
            return Ok(None);
        };
        changes.apply(&mut customer);
        data.check_customer_unique(&customer)?;
        data.customers.insert(*id, customer.clone());
        Ok(Some(customer))
    }

    async fn booking(&self, id: &ObjectId) -> StoreResult<Option<Booking>> {
        Ok(self.inner.data.read().await.bookings.get(id).cloned())
    }

    async fn bookings(&self, filter: &BookingFilter) -> StoreResult<Vec<Booking>> {
        let data = self.inner.data.read().await;
        let mut bookings: Vec<Booking> = data
            .bookings
            .values()
            .filter(|b| filter.matches(b))
            .cloned()
            .collect();
        bookings.sort_by(listing_order);
        if let Some(limit) = filter.limit {
            bookings.truncate(limit);
        }
        Ok(bookings)
    }

    async fn history(&self, booking_id: &ObjectId) -> StoreResult<Vec<HistoryEntry>> {
        let data = self.inner.data.read().await;
        Ok(data
            .history
            .iter()
            .filter(|h| h.booking_id == *booking_id)
            .cloned()
            .collect())
    }

    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        Ok(Box::new(MemoryTx {
            inner: self.inner.clone(),
            held: HeldLocks {
                inner: self.inner.clone(),
                guards: HashMap::new(),
            },
            customers: Vec::new(),
            bookings: HashMap::new(),
            history: Vec::new(),
        }))
    }
}

/// Bloqueos retenidos por una transacción
struct HeldLocks {
    inner: Arc<Inner>,
    guards: HashMap<LockKey, OwnedMutexGuard<()>>,
}

impl Drop for HeldLocks {
    fn drop(&mut self) {
        for (key, guard) in self.guards.drain() {
            drop(guard);
            // el mapa es el único dueño si ninguna transacción espera el mutex
            self.inner
                .locks
                .remove_if(&key, |_, mutex| Arc::strong_count(mutex) == 1);
        }
    }
}

/// Transacción en memoria: escrituras pendientes + bloqueos retenidos
struct MemoryTx {
    inner: Arc<Inner>,
    held: HeldLocks,
    customers: Vec<Customer>,
    bookings: HashMap<ObjectId, Booking>,
    history: Vec<HistoryEntry>,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock(&mut self, key: &LockKey) -> StoreResult<()> {
        if self.held.guards.contains_key(key) {
            return Ok(());
        }
        let mutex = self
            .inner
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        self.held.guards.insert(key.clone(), guard);
        Ok(())
    }

    async fn table(&mut self, id: &ObjectId) -> StoreResult<Option<Table>> {
        Ok(self.inner.data.read().await.tables.get(id).cloned())
    }

    async fn staff(&mut self, id: &ObjectId) -> StoreResult<Option<Staff>> {
        Ok(self.inner.data.read().await.staff.get(id).cloned())
    }

    async fn booking(&mut self, id: &ObjectId) -> StoreResult<Option<Booking>> {
        if let Some(pending) = self.bookings.get(id) {
            return Ok(Some(pending.clone()));
        }
        Ok(self.inner.data.read().await.bookings.get(id).cloned())
    }

    async fn active_bookings_for_table(
        &mut self,
        table_id: &ObjectId,
        date: NaiveDate,
    ) -> StoreResult<Vec<Booking>> {
        let data = self.inner.data.read().await;
        let committed = data
            .bookings
            .values()
            .filter(|b| !self.bookings.contains_key(&b.id));
        Ok(committed
            .chain(self.bookings.values())
            .filter(|b| b.table_id == Some(*table_id) && b.date == date && b.is_active())
            .cloned()
            .collect())
    }

    async fn customer_by_phone(&mut self, phone: &str) -> StoreResult<Option<Customer>> {
        if let Some(pending) = self.customers.iter().find(|c| c.phone == phone) {
            return Ok(Some(pending.clone()));
        }
        let data = self.inner.data.read().await;
        Ok(data.customers.values().find(|c| c.phone == phone).cloned())
    }

    async fn insert_customer(&mut self, customer: &Customer) -> StoreResult<()> {
        self.customers.push(customer.clone());
        Ok(())
    }

    async fn replace_customer(&mut self, customer: &Customer) -> StoreResult<()> {
        self.customers.retain(|c| c.id != customer.id);
        self.customers.push(customer.clone());
        Ok(())
    }

    async fn insert_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        self.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn replace_booking(&mut self, booking: &Booking) -> StoreResult<()> {
        self.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn append_history(&mut self, entry: &HistoryEntry) -> StoreResult<()> {
        self.history.push(entry.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let tx = *self;
        let mut data = tx.inner.data.write().await;
        for customer in &tx.customers {
            data.check_customer_unique(customer)?;
        }
        for customer in tx.customers {
            data.customers.insert(customer.id, customer);
        }
        for (id, booking) in tx.bookings {
            data.bookings.insert(id, booking);
        }
        data.history.extend(tx.history);
        drop(data);
        // los bloqueos se liberan ya con las escrituras aplicadas
        drop(tx.held);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{current_timestamp, Section};
    use std::time::Duration;

    fn customer(phone: &str) -> Customer {
        Customer::new("Vanessa", "Gill", phone)
    }

    #[tokio::test]
    async fn duplicate_table_numbers_are_rejected() {
        let store = MemoryStore::new();
        store.insert_table(&Table::new("T1", Section::Bistro, 2)).await.unwrap();
        let result = store.insert_table(&Table::new("T1", Section::Terrace, 4)).await;
        assert!(matches!(result, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn uncommitted_writes_are_discarded() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let c = customer("+61467890123");
        tx.insert_customer(&c).await.unwrap();
        assert!(tx.customer_by_phone("+61467890123").await.unwrap().is_some());
        drop(tx);

        assert!(store.customer(&c.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn committed_writes_become_visible() {
        let store = MemoryStore::new();
        let mut tx = store.begin().await.unwrap();
        let c = customer("+61467890123");
        tx.insert_customer(&c).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.customer(&c.id).await.unwrap(), Some(c));
    }

    #[tokio::test]
    async fn lock_is_held_until_transaction_ends() {
        let store = MemoryStore::new();
        let key = LockKey::Customer("+61467890123".to_string());

        let mut first = store.begin().await.unwrap();
        first.lock(&key).await.unwrap();
        // reentrante dentro de la misma transacción
        first.lock(&key).await.unwrap();

        let mut second = store.begin().await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), second.lock(&key)).await;
        assert!(blocked.is_err());

        first.commit().await.unwrap();
        let acquired = tokio::time::timeout(Duration::from_millis(50), second.lock(&key)).await;
        assert!(acquired.is_ok());
    }

    #[tokio::test]
    async fn finished_transactions_leave_no_lock_entries() {
        let store = MemoryStore::new();
        for i in 0..1000 {
            let mut tx = store.begin().await.unwrap();
            tx.lock(&LockKey::Customer(format!("+614{i:08}"))).await.unwrap();
            match i % 3 {
                0 => tx.commit().await.unwrap(),
                1 => tx.rollback().await.unwrap(),
                _ => drop(tx),
            }
        }
        assert_eq!(store.lock_entries(), 0);
    }

    #[tokio::test]
    async fn lock_entry_survives_while_another_transaction_waits() {
        let store = MemoryStore::new();
        let key = LockKey::Customer("+61467890123".to_string());

        let mut first = store.begin().await.unwrap();
        first.lock(&key).await.unwrap();

        let waiter_store = store.clone();
        let waiter_key = key.clone();
        let waiter = tokio::spawn(async move {
            let mut second = waiter_store.begin().await.unwrap();
            second.lock(&waiter_key).await.unwrap();
            second
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        first.commit().await.unwrap();
        let second = waiter.await.unwrap();
        // sigue habiendo un único mutex para la clave, el del que espera
        assert_eq!(store.lock_entries(), 1);

        let mut third = store.begin().await.unwrap();
        let blocked = tokio::time::timeout(Duration::from_millis(50), third.lock(&key)).await;
        assert!(blocked.is_err());

        second.rollback().await.unwrap();
        drop(third);
        assert_eq!(store.lock_entries(), 0);
    }

    #[tokio::test]
    async fn replaced_customer_is_applied_on_commit() {
        let store = MemoryStore::new();
        let mut c = customer("+61467890123");
        store.insert_customer(&c).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        c.first_name = "Nessa".to_string();
        tx.replace_customer(&c).await.unwrap();
        assert_eq!(
            tx.customer_by_phone("+61467890123").await.unwrap().unwrap().first_name,
            "Nessa"
        );
        tx.commit().await.unwrap();

        assert_eq!(store.customer(&c.id).await.unwrap().unwrap().first_name, "Nessa");
    }

    #[tokio::test]
    async fn customer_search_ranks_and_limits() {
        let store = MemoryStore::new();
        let mut margaret = Customer::new("Margaret", "Briggs", "+61412345678");
        margaret.created_at = current_timestamp() - 10;
        let mut karen = Customer::new("Karen", "Lord", "+61445678901");
        karen.company = Some("Briggs Tech".to_string());
        store.insert_customer(&margaret).await.unwrap();
        store.insert_customer(&karen).await.unwrap();

        let found = store.search_customers("briggs", 10).await.unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, margaret.id);

        let limited = store.search_customers("briggs", 1).await.unwrap();
        assert_eq!(limited.len(), 1);

        let (page, total) = store.customers(Page { page: 1, limit: 1 }).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page[0].id, karen.id);
    }

    #[tokio::test]
    async fn customer_update_cannot_steal_a_phone() {
        let store = MemoryStore::new();
        let a = customer("+61400000001");
        let b = customer("+61400000002");
        store.insert_customer(&a).await.unwrap();
        store.insert_customer(&b).await.unwrap();

        let changes = CustomerChanges {
            phone: Some("+61400000001".to_string()),
            ..Default::default()
        };
        let result = store.update_customer(&b.id, &changes).await;
        assert!(matches!(result, Err(StoreError::Duplicate(_))));
        assert_eq!(store.customer(&b.id).await.unwrap().unwrap().phone, "+61400000002");
    }
}

//! Datos de ejemplo para desarrollo y la cuenta de administración inicial

use super::{Customer, Section, Staff, StaffRole, Store, StoreError, StoreResult, Table};

const SAMPLE_TABLES: [(&str, Section, u8); 15] = [
    ("T1", Section::Bistro, 2),
    ("T2", Section::Bistro, 4),
    ("T3", Section::Bistro, 6),
    ("T4", Section::Bistro, 8),
    ("T10", Section::Central, 2),
    ("T11", Section::Central, 4),
    ("T12", Section::Central, 6),
    ("T13", Section::Central, 8),
    ("T20", Section::MainLounge, 4),
    ("T21", Section::MainLounge, 6),
    ("T22", Section::MainLounge, 8),
    ("T23", Section::MainLounge, 10),
    ("T30", Section::Terrace, 2),
    ("T31", Section::Terrace, 4),
    ("T32", Section::Terrace, 6),
];

const SAMPLE_STAFF: [(&str, &str, &str, StaffRole, &str); 4] = [
    ("John", "Doe", "john.doe@restaurant.com", StaffRole::Host, "all"),
    ("Jane", "Smith", "jane.smith@restaurant.com", StaffRole::Server, "bistro"),
    ("Mike", "Johnson", "mike.johnson@restaurant.com", StaffRole::Server, "central"),
    ("Sarah", "Wilson", "sarah.wilson@restaurant.com", StaffRole::Manager, "all"),
];

// (nombre, apellido, teléfono, email, empresa, etiquetas)
const SAMPLE_CUSTOMERS: [(&str, &str, &str, &str, Option<&str>, &str); 6] = [
    ("Margaret", "Briggs", "+61412345678", "margaret.briggs@email.com", Some("ABC Corp"), "VIP,Regular"),
    ("Kim", "Etcell", "+61423456789", "kim.etcell@email.com", Some("XYZ Ltd"), "Business"),
    ("Cathy", "MacIntyre", "+61434567890", "cathy.macintyre@email.com", None, "Anniversary"),
    ("Karen", "Lord", "+61445678901", "karen.lord@email.com", Some("Tech Solutions"), "Large Group"),
    ("Jennifer", "Nunn", "+61456789012", "jennifer.nunn@email.com", None, "Birthday"),
    ("Vanessa", "Gill", "+61467890123", "vanessa.gill@email.com", Some("Marketing Co"), "VIP"),
];

/// Inserta mesas, personal y clientes de ejemplo si el almacén no tiene mesas.
///
/// Devuelve `false` si ya había datos y no se insertó nada.
pub async fn insert_sample_data(store: &dyn Store) -> StoreResult<bool> {
    if !store.tables().await?.is_empty() {
        tracing::debug!("El almacén ya tiene mesas, se omiten los datos de ejemplo");
        return Ok(false);
    }

    for (number, section, capacity) in SAMPLE_TABLES {
        store.insert_table(&Table::new(number, section, capacity)).await?;
    }

    for (first_name, last_name, email, role, section) in SAMPLE_STAFF {
        let mut staff = Staff::new(first_name, last_name, email, role);
        staff.section = Some(section.to_string());
        store.insert_staff(&staff).await?;
    }

    for (first_name, last_name, phone, email, company, tags) in SAMPLE_CUSTOMERS {
        let mut customer = Customer::new(first_name, last_name, phone);
        customer.email = Some(email.to_string());
        customer.company = company.map(str::to_string);
        customer.tags = Some(tags.to_string());
        store.insert_customer(&customer).await?;
    }

    tracing::info!(
        tables = SAMPLE_TABLES.len(),
        staff = SAMPLE_STAFF.len(),
        customers = SAMPLE_CUSTOMERS.len(),
        "Datos de ejemplo insertados"
    );
    Ok(true)
}

/// Registra un administrador con el token indicado si aún no existe
pub async fn ensure_admin(store: &dyn Store, token: &str) -> StoreResult<Staff> {
    if let Some(existing) = store.staff_by_token(token).await? {
        return Ok(existing);
    }
    let mut admin = Staff::new("Admin", "Bootstrap", "admin@restaurant.local", StaffRole::Admin);
    admin.access_token = token.to_string();
    admin.section = Some("all".to_string());
    match store.insert_staff(&admin).await {
        Ok(()) => {
            tracing::info!(staff_id = %admin.id, "Administrador inicial registrado");
            Ok(admin)
        }
        Err(StoreError::Duplicate(msg)) => Err(StoreError::Duplicate(format!(
            "no se pudo registrar el administrador inicial: {msg}"
        ))),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStore;

    #[tokio::test]
    async fn sample_data_is_inserted_once() {
        let store = MemoryStore::new();
        assert!(insert_sample_data(&store).await.unwrap());
        assert!(!insert_sample_data(&store).await.unwrap());

        let tables = store.tables().await.unwrap();
        assert_eq!(tables.len(), 15);
        assert_eq!(tables[0].table_number, "T1");
        assert_eq!(store.active_staff().await.unwrap().len(), 4);
        assert_eq!(store.search_customers("briggs", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bootstrap_admin_is_idempotent() {
        let store = MemoryStore::new();
        let first = ensure_admin(&store, "secret-token").await.unwrap();
        let second = ensure_admin(&store, "secret-token").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.role, StaffRole::Admin);
    }
}

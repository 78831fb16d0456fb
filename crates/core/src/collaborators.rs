//! Contracts for the collaborators the marketplace consumes, plus SQLite-backed
//! implementations that live alongside the marketplace tables.
//!
//! The provider directory and the prescription store are owned by other parts of the
//! platform; the marketplace only reads them through these traits.

use crate::model::{FulfillmentKind, Provider, RequestedItem, SourceDocument};
use crate::store::{timestamp, Store};
use crate::{QuoteError, QuoteResult};
use chrono::Utc;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use uuid::Uuid;

/// Supplies provider identity and eligibility flags.
pub trait ProviderDirectory: Send + Sync {
    /// Returns the providers that exist among `provider_ids`. Unknown ids are omitted.
    fn lookup(&self, provider_ids: &[Uuid]) -> QuoteResult<Vec<Provider>>;

    /// Active and verified providers of one kind, ordered by name.
    fn eligible(&self, kind: FulfillmentKind) -> QuoteResult<Vec<Provider>>;
}

/// Resolves the prescription a request is created against.
pub trait SourceDocumentAdapter: Send + Sync {
    /// Returns the document's owner and the fulfillable items of `kind`.
    ///
    /// # Errors
    ///
    /// - `QuoteError::NotFound` if the document does not exist,
    /// - `QuoteError::Forbidden` if it is not owned by `requester_id`.
    fn resolve(
        &self,
        document_id: Uuid,
        requester_id: Uuid,
        kind: FulfillmentKind,
    ) -> QuoteResult<SourceDocument>;
}

/// Provider directory stored in the `providers` table.
#[derive(Clone, Debug)]
pub struct SqliteProviderDirectory {
    store: Store,
}

impl SqliteProviderDirectory {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Adds a provider to the directory.
    pub fn register_provider(
        &self,
        name: &str,
        kind: FulfillmentKind,
        active: bool,
        verified: bool,
    ) -> QuoteResult<Provider> {
        let name = name.trim();
        if name.is_empty() {
            return Err(QuoteError::Validation("provider name cannot be empty".into()));
        }

        let provider = Provider {
            id: Uuid::new_v4(),
            name: name.to_string(),
            kind,
            active,
            verified,
        };
        self.store.write("register provider", |tx| {
            tx.execute(
                "INSERT INTO providers (id, name, kind, active, verified) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    provider.id.to_string(),
                    provider.name,
                    provider.kind.as_str(),
                    provider.active,
                    provider.verified
                ],
            )?;
            Ok(())
        })?;

        tracing::info!("registered {} provider {}", provider.kind, provider.id);
        Ok(provider)
    }

    /// Updates a provider's eligibility flags.
    pub fn set_flags(&self, provider_id: Uuid, active: bool, verified: bool) -> QuoteResult<()> {
        let changed = self.store.write("update provider flags", |tx| {
            Ok(tx.execute(
                "UPDATE providers SET active = ?2, verified = ?3 WHERE id = ?1",
                params![provider_id.to_string(), active, verified],
            )?)
        })?;
        if changed == 0 {
            return Err(QuoteError::NotFound(format!("provider {provider_id}")));
        }
        Ok(())
    }
}

fn provider_from_row(row: &Row<'_>) -> rusqlite::Result<(String, String, String, bool, bool)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn provider_from_columns(
    (id, name, kind, active, verified): (String, String, String, bool, bool),
) -> QuoteResult<Provider> {
    Ok(Provider {
        id: Uuid::parse_str(&id)
            .map_err(|_| QuoteError::CorruptRecord(format!("provider id: {id}")))?,
        name,
        kind: kind
            .parse()
            .map_err(|_| QuoteError::CorruptRecord(format!("provider kind: {kind}")))?,
        active,
        verified,
    })
}

impl ProviderDirectory for SqliteProviderDirectory {
    fn lookup(&self, provider_ids: &[Uuid]) -> QuoteResult<Vec<Provider>> {
        if provider_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; provider_ids.len()].join(", ");
        let sql = format!(
            "SELECT id, name, kind, active, verified FROM providers WHERE id IN ({placeholders})"
        );

        self.store.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(
                    params_from_iter(provider_ids.iter().map(Uuid::to_string)),
                    provider_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(provider_from_columns).collect()
        })
    }

    fn eligible(&self, kind: FulfillmentKind) -> QuoteResult<Vec<Provider>> {
        self.store.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, kind, active, verified FROM providers
                 WHERE kind = ?1 AND active = 1 AND verified = 1
                 ORDER BY name, id",
            )?;
            let rows = stmt
                .query_map(params![kind.as_str()], provider_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(provider_from_columns).collect()
        })
    }
}

/// Prescription store backed by the `source_documents` table.
#[derive(Clone, Debug)]
pub struct SqliteSourceDocuments {
    store: Store,
}

impl SqliteSourceDocuments {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Records a prescription with its medications and lab tests.
    pub fn register_document(
        &self,
        owner_id: Uuid,
        medications: &[RequestedItem],
        lab_tests: &[RequestedItem],
    ) -> QuoteResult<Uuid> {
        let id = Uuid::new_v4();
        let medications = serde_json::to_string(medications)?;
        let lab_tests = serde_json::to_string(lab_tests)?;
        let now = timestamp(Utc::now());

        self.store.write("register source document", |tx| {
            tx.execute(
                "INSERT INTO source_documents (id, owner_id, medications, lab_tests, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.to_string(), owner_id.to_string(), medications, lab_tests, now],
            )?;
            Ok(())
        })?;
        Ok(id)
    }
}

impl SourceDocumentAdapter for SqliteSourceDocuments {
    fn resolve(
        &self,
        document_id: Uuid,
        requester_id: Uuid,
        kind: FulfillmentKind,
    ) -> QuoteResult<SourceDocument> {
        let column = match kind {
            FulfillmentKind::Medication => "medications",
            FulfillmentKind::LabTest => "lab_tests",
        };
        let sql = format!("SELECT owner_id, {column} FROM source_documents WHERE id = ?1");

        let row: Option<(String, String)> = self.store.read(|conn| {
            Ok(conn
                .query_row(&sql, params![document_id.to_string()], |r| {
                    Ok((r.get(0)?, r.get(1)?))
                })
                .optional()?)
        })?;

        let (owner, items) =
            row.ok_or_else(|| QuoteError::NotFound(format!("source document {document_id}")))?;
        let owner_id = Uuid::parse_str(&owner)
            .map_err(|_| QuoteError::CorruptRecord(format!("document owner: {owner}")))?;
        if owner_id != requester_id {
            return Err(QuoteError::Forbidden(format!(
                "source document {document_id} belongs to another patient"
            )));
        }

        Ok(SourceDocument {
            id: document_id,
            owner_id,
            items: serde_json::from_str(&items).map_err(|e| {
                QuoteError::CorruptRecord(format!("source document {document_id} items: {e}"))
            })?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoreConfig;
    use quote_types::NonEmptyText;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let cfg = CoreConfig::with_database(dir.path().join("q.sqlite3")).unwrap();
        let store = Store::new(Arc::new(cfg));
        store.initialise().unwrap();
        (dir, store)
    }

    fn item(name: &str) -> RequestedItem {
        RequestedItem {
            name: NonEmptyText::new(name).unwrap(),
            instructions: None,
        }
    }

    #[test]
    fn lookup_omits_unknown_ids() {
        let (_dir, store) = setup();
        let directory = SqliteProviderDirectory::new(store);
        let known = directory
            .register_provider("Main St Pharmacy", FulfillmentKind::Medication, true, true)
            .unwrap();

        let found = directory.lookup(&[known.id, Uuid::new_v4()]).unwrap();
        assert_eq!(found, vec![known]);
        assert!(directory.lookup(&[]).unwrap().is_empty());
    }

    #[test]
    fn eligible_filters_kind_and_flags() {
        let (_dir, store) = setup();
        let directory = SqliteProviderDirectory::new(store);
        let b = directory
            .register_provider("B Labs", FulfillmentKind::LabTest, true, true)
            .unwrap();
        let a = directory
            .register_provider("A Labs", FulfillmentKind::LabTest, true, true)
            .unwrap();
        directory
            .register_provider("Unverified Labs", FulfillmentKind::LabTest, true, false)
            .unwrap();
        directory
            .register_provider("Pharmacy", FulfillmentKind::Medication, true, true)
            .unwrap();

        let eligible = directory.eligible(FulfillmentKind::LabTest).unwrap();
        assert_eq!(eligible, vec![a, b]);
    }

    #[test]
    fn set_flags_on_unknown_provider_is_not_found() {
        let (_dir, store) = setup();
        let directory = SqliteProviderDirectory::new(store);
        assert!(matches!(
            directory.set_flags(Uuid::new_v4(), false, false),
            Err(QuoteError::NotFound(_))
        ));
    }

    #[test]
    fn resolve_checks_existence_and_ownership() {
        let (_dir, store) = setup();
        let documents = SqliteSourceDocuments::new(store);
        let owner = Uuid::new_v4();
        let id = documents
            .register_document(owner, &[item("Amoxicillin")], &[item("CBC"), item("TSH")])
            .unwrap();

        let doc = documents.resolve(id, owner, FulfillmentKind::LabTest).unwrap();
        assert_eq!(doc.items.len(), 2);
        assert_eq!(doc.owner_id, owner);

        assert!(matches!(
            documents.resolve(id, Uuid::new_v4(), FulfillmentKind::LabTest),
            Err(QuoteError::Forbidden(_))
        ));
        assert!(matches!(
            documents.resolve(Uuid::new_v4(), owner, FulfillmentKind::LabTest),
            Err(QuoteError::NotFound(_))
        ));
    }
}

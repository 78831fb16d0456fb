//! Marketplace services.
//!
//! [`QuotationService`] is the single entry point. Its operations are grouped by concern:
//!
//! - [`requests`]: the request ledger (create, cancel)
//! - [`offers`]: the offer ledger (submit)
//! - [`allocation`]: accepting one offer and rejecting its competitors
//! - [`projections`]: read views for patients, providers and downstream components

pub mod allocation;
pub mod offers;
pub mod projections;
pub mod requests;
pub(crate) mod shared;

use crate::collaborators::{
    ProviderDirectory, SourceDocumentAdapter, SqliteProviderDirectory, SqliteSourceDocuments,
};
use crate::config::CoreConfig;
use crate::store::Store;
use std::sync::Arc;

/// Quotation marketplace operations over one database.
///
/// Cheap to clone; every operation opens its own connection, so clones may be used freely
/// from different threads or tasks.
#[derive(Clone)]
pub struct QuotationService {
    store: Store,
    directory: Arc<dyn ProviderDirectory>,
    documents: Arc<dyn SourceDocumentAdapter>,
}

impl QuotationService {
    /// Creates a service with explicit collaborators.
    pub fn new(
        store: Store,
        directory: Arc<dyn ProviderDirectory>,
        documents: Arc<dyn SourceDocumentAdapter>,
    ) -> Self {
        Self {
            store,
            directory,
            documents,
        }
    }

    /// Creates a service whose provider directory and prescription store are the SQLite
    /// tables in the same database.
    pub fn with_sqlite_collaborators(cfg: Arc<CoreConfig>) -> Self {
        let store = Store::new(cfg);
        Self::new(
            store.clone(),
            Arc::new(SqliteProviderDirectory::new(store.clone())),
            Arc::new(SqliteSourceDocuments::new(store.clone())),
        )
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

// db/store.rs
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::lifecyclemodel::*;

/// Table names shared with the rest of the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    MaintenanceRequests,
    BookingRequests,
    QuoteSubmissions,
    Contracts,
    ContractSignatures,
    BindingTerms,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::MaintenanceRequests => "maintenance_requests",
            Table::BookingRequests => "booking_requests",
            Table::QuoteSubmissions => "quote_submissions",
            Table::Contracts => "contracts",
            Table::ContractSignatures => "contract_signatures",
            Table::BindingTerms => "binding_terms",
        }
    }
}

impl std::fmt::Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// A uniqueness rule (one accepted quote, one active contract, one
    /// signature per version) rejected the write.
    #[error("Conflicting write on {0}")]
    Conflict(Table),

    /// The database aborted the transaction to keep it serializable.
    #[error("Concurrent update, transaction must be retried")]
    Retry,

    #[error("{table} row {id} not found")]
    Missing { table: Table, id: Uuid },

    #[error("Corrupt {table} row: {reason}")]
    Corrupt { table: Table, reason: String },
}

/// SQLSTATEs Postgres raises when it aborts the losing side of a race:
/// serialization failure and deadlock.
const RETRYABLE_SQLSTATES: [&str; 2] = ["40001", "40P01"];

pub fn is_retryable(code: Option<&str>) -> bool {
    code.map(|code| RETRYABLE_SQLSTATES.contains(&code))
        .unwrap_or(false)
}

// Every `?` on a query goes through here, locking reads included.
impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &error {
            if is_retryable(db.code().as_deref()) {
                return StoreError::Retry;
            }
        }
        StoreError::Database(error)
    }
}

/// Opens units of work against the durable store.
#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

/// A single unit of work. Dropping it without `commit` discards every write.
///
/// `lock_*` reads take the row for the rest of the transaction, so two
/// accepts racing on the same request or booking serialize on it.
#[async_trait]
pub trait StoreTx: Send {
    // maintenance_requests
    async fn get_request(&mut self, id: Uuid) -> Result<Option<ServiceRequest>, StoreError>;
    async fn lock_request(&mut self, id: Uuid) -> Result<Option<ServiceRequest>, StoreError>;
    async fn insert_request(&mut self, request: &ServiceRequest) -> Result<(), StoreError>;
    async fn update_request(&mut self, request: &ServiceRequest) -> Result<(), StoreError>;

    // booking_requests
    async fn get_booking(&mut self, id: Uuid) -> Result<Option<BookingRequest>, StoreError>;
    async fn lock_booking(&mut self, id: Uuid) -> Result<Option<BookingRequest>, StoreError>;
    async fn insert_booking(&mut self, booking: &BookingRequest) -> Result<(), StoreError>;
    async fn update_booking(&mut self, booking: &BookingRequest) -> Result<(), StoreError>;

    // quote_submissions
    async fn get_quote(&mut self, id: Uuid) -> Result<Option<Quote>, StoreError>;
    async fn find_quotes(&mut self, request_id: Uuid) -> Result<Vec<Quote>, StoreError>;
    async fn insert_quote(&mut self, quote: &Quote) -> Result<(), StoreError>;
    async fn update_quote(&mut self, quote: &Quote) -> Result<(), StoreError>;

    // contracts
    async fn get_contract(&mut self, id: Uuid) -> Result<Option<Contract>, StoreError>;
    async fn lock_contract(&mut self, id: Uuid) -> Result<Option<Contract>, StoreError>;
    /// Every contract for the unit, newest first.
    async fn find_contracts(&mut self, unit: UnitRef) -> Result<Vec<Contract>, StoreError>;
    async fn insert_contract(&mut self, contract: &Contract) -> Result<(), StoreError>;
    async fn update_contract(&mut self, contract: &Contract) -> Result<(), StoreError>;
    /// Removes the contract together with its signatures and binding terms.
    async fn delete_contract(&mut self, id: Uuid) -> Result<(), StoreError>;

    // contract_signatures
    async fn find_signatures(&mut self, contract_id: Uuid) -> Result<Vec<ContractSignature>, StoreError>;
    async fn insert_signature(&mut self, signature: &ContractSignature) -> Result<(), StoreError>;

    // binding_terms
    async fn get_terms(&mut self, contract_id: Uuid) -> Result<Option<BindingTerms>, StoreError>;
    async fn insert_terms(&mut self, terms: &BindingTerms) -> Result<(), StoreError>;
    async fn update_terms(&mut self, terms: &BindingTerms) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_failures_and_deadlocks_are_retryable() {
        assert!(is_retryable(Some("40001")));
        assert!(is_retryable(Some("40P01")));
        assert!(!is_retryable(Some("23505")));
        assert!(!is_retryable(None));
    }

    #[test]
    fn other_driver_errors_stay_database_errors() {
        let error = StoreError::from(sqlx::Error::RowNotFound);
        assert!(matches!(error, StoreError::Database(sqlx::Error::RowNotFound)));
    }
}

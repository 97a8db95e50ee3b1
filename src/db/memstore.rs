// db/memstore.rs
//! In-process store used for local runs without `DATABASE_URL` and in tests.
//!
//! One transaction at a time holds the lock; it works on a copy of the
//! tables and swaps it in on commit. That gives serializable behaviour and
//! the same uniqueness rules the Postgres indexes enforce.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::store::{EntityStore, StoreError, StoreTx, Table};
use crate::models::lifecyclemodel::*;

#[derive(Debug, Clone, Default)]
struct Tables {
    requests: HashMap<Uuid, ServiceRequest>,
    bookings: HashMap<Uuid, BookingRequest>,
    quotes: HashMap<Uuid, Quote>,
    contracts: HashMap<Uuid, Contract>,
    signatures: Vec<ContractSignature>,
    // keyed by contract id
    terms: HashMap<Uuid, BindingTerms>,
}

impl Tables {
    fn check_quote(&self, quote: &Quote) -> Result<(), StoreError> {
        if quote.status != QuoteStatus::Accepted {
            return Ok(());
        }
        let clash = self.quotes.values().any(|other| {
            other.id != quote.id
                && other.request_id == quote.request_id
                && other.status == QuoteStatus::Accepted
        });
        if clash {
            return Err(StoreError::Conflict(Table::QuoteSubmissions));
        }
        Ok(())
    }

    fn check_contract(&self, contract: &Contract) -> Result<(), StoreError> {
        if !contract.status.is_active() {
            return Ok(());
        }
        let clash = self.contracts.values().any(|other| {
            other.id != contract.id && other.unit == contract.unit && other.status.is_active()
        });
        if clash {
            return Err(StoreError::Conflict(Table::Contracts));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

fn missing(table: Table, id: Uuid) -> StoreError {
    StoreError::Missing { table, id }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn get_request(&mut self, id: Uuid) -> Result<Option<ServiceRequest>, StoreError> {
        Ok(self.working.requests.get(&id).cloned())
    }

    async fn lock_request(&mut self, id: Uuid) -> Result<Option<ServiceRequest>, StoreError> {
        self.get_request(id).await
    }

    async fn insert_request(&mut self, request: &ServiceRequest) -> Result<(), StoreError> {
        if self.working.requests.contains_key(&request.id) {
            return Err(StoreError::Conflict(Table::MaintenanceRequests));
        }
        self.working.requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn update_request(&mut self, request: &ServiceRequest) -> Result<(), StoreError> {
        let row = self
            .working
            .requests
            .get_mut(&request.id)
            .ok_or_else(|| missing(Table::MaintenanceRequests, request.id))?;
        *row = request.clone();
        Ok(())
    }

    async fn get_booking(&mut self, id: Uuid) -> Result<Option<BookingRequest>, StoreError> {
        Ok(self.working.bookings.get(&id).cloned())
    }

    async fn lock_booking(&mut self, id: Uuid) -> Result<Option<BookingRequest>, StoreError> {
        self.get_booking(id).await
    }

    async fn insert_booking(&mut self, booking: &BookingRequest) -> Result<(), StoreError> {
        if self.working.bookings.contains_key(&booking.id) {
            return Err(StoreError::Conflict(Table::BookingRequests));
        }
        self.working.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn update_booking(&mut self, booking: &BookingRequest) -> Result<(), StoreError> {
        let row = self
            .working
            .bookings
            .get_mut(&booking.id)
            .ok_or_else(|| missing(Table::BookingRequests, booking.id))?;
        *row = booking.clone();
        Ok(())
    }

    async fn get_quote(&mut self, id: Uuid) -> Result<Option<Quote>, StoreError> {
        Ok(self.working.quotes.get(&id).cloned())
    }

    async fn find_quotes(&mut self, request_id: Uuid) -> Result<Vec<Quote>, StoreError> {
        let mut quotes: Vec<Quote> = self
            .working
            .quotes
            .values()
            .filter(|q| q.request_id == request_id)
            .cloned()
            .collect();
        quotes.sort_by_key(|q| q.created_at);
        Ok(quotes)
    }

    async fn insert_quote(&mut self, quote: &Quote) -> Result<(), StoreError> {
        if self.working.quotes.contains_key(&quote.id) {
            return Err(StoreError::Conflict(Table::QuoteSubmissions));
        }
        self.working.check_quote(quote)?;
        self.working.quotes.insert(quote.id, quote.clone());
        Ok(())
    }

    async fn update_quote(&mut self, quote: &Quote) -> Result<(), StoreError> {
        if !self.working.quotes.contains_key(&quote.id) {
            return Err(missing(Table::QuoteSubmissions, quote.id));
        }
        self.working.check_quote(quote)?;
        self.working.quotes.insert(quote.id, quote.clone());
        Ok(())
    }

    async fn get_contract(&mut self, id: Uuid) -> Result<Option<Contract>, StoreError> {
        Ok(self.working.contracts.get(&id).cloned())
    }

    async fn lock_contract(&mut self, id: Uuid) -> Result<Option<Contract>, StoreError> {
        self.get_contract(id).await
    }

    async fn find_contracts(&mut self, unit: UnitRef) -> Result<Vec<Contract>, StoreError> {
        let mut contracts: Vec<Contract> = self
            .working
            .contracts
            .values()
            .filter(|c| c.unit == unit)
            .cloned()
            .collect();
        contracts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(contracts)
    }

    async fn insert_contract(&mut self, contract: &Contract) -> Result<(), StoreError> {
        if self.working.contracts.contains_key(&contract.id) {
            return Err(StoreError::Conflict(Table::Contracts));
        }
        self.working.check_contract(contract)?;
        self.working.contracts.insert(contract.id, contract.clone());
        Ok(())
    }

    async fn update_contract(&mut self, contract: &Contract) -> Result<(), StoreError> {
        if !self.working.contracts.contains_key(&contract.id) {
            return Err(missing(Table::Contracts, contract.id));
        }
        self.working.check_contract(contract)?;
        self.working.contracts.insert(contract.id, contract.clone());
        Ok(())
    }

    async fn delete_contract(&mut self, id: Uuid) -> Result<(), StoreError> {
        self.working.contracts.remove(&id);
        self.working.signatures.retain(|s| s.contract_id != id);
        self.working.terms.remove(&id);
        Ok(())
    }

    async fn find_signatures(&mut self, contract_id: Uuid) -> Result<Vec<ContractSignature>, StoreError> {
        Ok(self
            .working
            .signatures
            .iter()
            .filter(|s| s.contract_id == contract_id)
            .cloned()
            .collect())
    }

    async fn insert_signature(&mut self, signature: &ContractSignature) -> Result<(), StoreError> {
        if !self.working.contracts.contains_key(&signature.contract_id) {
            return Err(missing(Table::Contracts, signature.contract_id));
        }
        let duplicate = self.working.signatures.iter().any(|s| {
            s.contract_id == signature.contract_id
                && s.user_id == signature.user_id
                && s.version == signature.version
        });
        if duplicate {
            return Err(StoreError::Conflict(Table::ContractSignatures));
        }
        self.working.signatures.push(signature.clone());
        Ok(())
    }

    async fn get_terms(&mut self, contract_id: Uuid) -> Result<Option<BindingTerms>, StoreError> {
        Ok(self.working.terms.get(&contract_id).cloned())
    }

    async fn insert_terms(&mut self, terms: &BindingTerms) -> Result<(), StoreError> {
        if !self.working.contracts.contains_key(&terms.contract_id) {
            return Err(missing(Table::Contracts, terms.contract_id));
        }
        if self.working.terms.contains_key(&terms.contract_id) {
            return Err(StoreError::Conflict(Table::BindingTerms));
        }
        self.working.terms.insert(terms.contract_id, terms.clone());
        Ok(())
    }

    async fn update_terms(&mut self, terms: &BindingTerms) -> Result<(), StoreError> {
        let row = self
            .working
            .terms
            .get_mut(&terms.contract_id)
            .ok_or_else(|| missing(Table::BindingTerms, terms.contract_id))?;
        *row = terms.clone();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn contract(unit: UnitRef, status: ContractStatus) -> Contract {
        let now = Utc::now();
        Contract {
            id: Uuid::new_v4(),
            unit,
            quote_id: None,
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            status,
            version: 1,
            metadata: ContractMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let store = MemoryStore::new();
        let c = contract(UnitRef::Booking(Uuid::new_v4()), ContractStatus::PendingBuyer);

        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_contract(&c).await.unwrap();
        }

        let mut tx = store.begin().await.unwrap();
        assert!(tx.get_contract(c.id).await.unwrap().is_none());
        tx.insert_contract(&c).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.get_contract(c.id).await.unwrap(), Some(c));
    }

    #[tokio::test]
    async fn one_active_contract_per_unit() {
        let store = MemoryStore::new();
        let unit = UnitRef::Request(Uuid::new_v4());
        let mut tx = store.begin().await.unwrap();

        tx.insert_contract(&contract(unit, ContractStatus::Executed)).await.unwrap();
        tx.insert_contract(&contract(unit, ContractStatus::Rejected)).await.unwrap();

        let second = tx.insert_contract(&contract(unit, ContractStatus::PendingBuyer)).await;
        assert!(matches!(second, Err(StoreError::Conflict(Table::Contracts))));
    }

    #[tokio::test]
    async fn signature_unique_per_version_and_cascade() {
        let store = MemoryStore::new();
        let c = contract(UnitRef::Booking(Uuid::new_v4()), ContractStatus::PendingBuyer);
        let mut tx = store.begin().await.unwrap();
        tx.insert_contract(&c).await.unwrap();

        let signature = ContractSignature {
            id: Uuid::new_v4(),
            contract_id: c.id,
            user_id: c.buyer_id,
            role: Role::Buyer,
            version: 1,
            signed_at: Utc::now(),
        };
        tx.insert_signature(&signature).await.unwrap();
        let again = ContractSignature { id: Uuid::new_v4(), ..signature.clone() };
        assert!(matches!(
            tx.insert_signature(&again).await,
            Err(StoreError::Conflict(Table::ContractSignatures))
        ));

        tx.delete_contract(c.id).await.unwrap();
        assert!(tx.find_signatures(c.id).await.unwrap().is_empty());
    }
}

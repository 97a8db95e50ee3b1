// db/pgstore.rs
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{postgres::PgArguments, query::Query, types::Json, FromRow, Postgres, Transaction};
use uuid::Uuid;

use super::{
    db::DBClient,
    store::{EntityStore, StoreError, StoreTx, Table},
};
use crate::models::lifecyclemodel::*;

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

macro_rules! marker_columns {
    () => {
        "seller_on_way_at, work_started_at, seller_marked_complete, seller_completed_at, \
         completion_photos, buyer_marked_complete, buyer_completed_at"
    };
}

macro_rules! request_columns {
    () => {
        concat!(
            "id, category, description, budget_min, budget_max, preferred_start_date, \
             flexible_date, flexible_time, status, ",
            marker_columns!(),
            ", updated_at, buyer_id, created_at"
        )
    };
}

macro_rules! booking_columns {
    () => {
        concat!(
            "id, category, description, budget, proposed_start_date, time_slot, \
             flexible_date, flexible_time, status, seller_counter_proposal, \
             buyer_counter_proposal, revision_message, previous_price, previous_duration, ",
            marker_columns!(),
            ", updated_at, buyer_id, seller_id, created_at"
        )
    };
}

macro_rules! quote_columns {
    () => {
        "id, price, estimated_duration, proposed_start_date, proposal_text, attachments, \
         status, revision_message, previous_price, previous_duration, updated_at, \
         request_id, seller_id, created_at"
    };
}

macro_rules! contract_columns {
    () => {
        "id, quote_id, status, version, metadata, updated_at, \
         request_id, booking_id, buyer_id, seller_id, created_at"
    };
}

macro_rules! signature_columns {
    () => {
        "id, contract_id, user_id, role, version, signed_at"
    };
}

macro_rules! terms_columns {
    () => {
        "id, contract_id, start_date, completion_date, warranty_days, warranty_ends_on, \
         warranty_activated_at"
    };
}

/// Unique-index hits mean another writer got there first. Serialization
/// failures and deadlocks become `Retry` through the `From` impl.
fn classify(table: Table, error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &error {
        if db.is_unique_violation() {
            return StoreError::Conflict(table);
        }
    }
    StoreError::from(error)
}

#[derive(Debug, FromRow)]
struct MarkerColumns {
    seller_on_way_at: Option<DateTime<Utc>>,
    work_started_at: Option<DateTime<Utc>>,
    seller_marked_complete: bool,
    seller_completed_at: Option<DateTime<Utc>>,
    completion_photos: Vec<String>,
    buyer_marked_complete: bool,
    buyer_completed_at: Option<DateTime<Utc>>,
}

impl From<MarkerColumns> for ExecutionMarkers {
    fn from(row: MarkerColumns) -> Self {
        ExecutionMarkers {
            seller_on_way_at: row.seller_on_way_at,
            work_started_at: row.work_started_at,
            seller_marked_complete: row.seller_marked_complete,
            seller_completed_at: row.seller_completed_at,
            completion_photos: row.completion_photos,
            buyer_marked_complete: row.buyer_marked_complete,
            buyer_completed_at: row.buyer_completed_at,
        }
    }
}

fn bind_markers<'q>(query: PgQuery<'q>, markers: &ExecutionMarkers) -> PgQuery<'q> {
    query
        .bind(markers.seller_on_way_at)
        .bind(markers.work_started_at)
        .bind(markers.seller_marked_complete)
        .bind(markers.seller_completed_at)
        .bind(markers.completion_photos.clone())
        .bind(markers.buyer_marked_complete)
        .bind(markers.buyer_completed_at)
}

/// Older rows carry flexibility as tokens inside the description.
fn read_schedule(description: &str, flexible_date: bool, flexible_time: bool) -> (FlexibleSchedule, String) {
    let (legacy, cleaned) = FlexibleSchedule::from_legacy(description);
    let columns = FlexibleSchedule {
        flexible_date,
        flexible_time,
    };
    (columns.merge(legacy), cleaned)
}

#[derive(Debug, FromRow)]
struct RequestRow {
    id: Uuid,
    buyer_id: Uuid,
    category: String,
    description: String,
    budget_min: Option<f64>,
    budget_max: Option<f64>,
    preferred_start_date: Option<NaiveDate>,
    flexible_date: bool,
    flexible_time: bool,
    status: Option<RequestStatus>,
    #[sqlx(flatten)]
    markers: MarkerColumns,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RequestRow> for ServiceRequest {
    fn from(row: RequestRow) -> Self {
        let (schedule, description) =
            read_schedule(&row.description, row.flexible_date, row.flexible_time);
        ServiceRequest {
            id: row.id,
            buyer_id: row.buyer_id,
            category: row.category,
            description,
            budget_min: row.budget_min,
            budget_max: row.budget_max,
            preferred_start_date: row.preferred_start_date,
            schedule,
            status: row.status.unwrap_or_default(),
            markers: row.markers.into(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn bind_request<'q>(query: PgQuery<'q>, request: &ServiceRequest) -> PgQuery<'q> {
    let query = query
        .bind(request.id)
        .bind(request.category.clone())
        .bind(request.description.clone())
        .bind(request.budget_min)
        .bind(request.budget_max)
        .bind(request.preferred_start_date)
        .bind(request.schedule.flexible_date)
        .bind(request.schedule.flexible_time)
        .bind(request.status);
    bind_markers(query, &request.markers).bind(request.updated_at)
}

#[derive(Debug, FromRow)]
struct BookingRow {
    id: Uuid,
    buyer_id: Uuid,
    seller_id: Uuid,
    category: String,
    description: String,
    budget: Option<f64>,
    proposed_start_date: Option<NaiveDate>,
    time_slot: Option<String>,
    flexible_date: bool,
    flexible_time: bool,
    status: Option<BookingStatus>,
    seller_counter_proposal: Option<Json<Proposal>>,
    buyer_counter_proposal: Option<Json<Proposal>>,
    revision_message: Option<String>,
    previous_price: Option<f64>,
    previous_duration: Option<String>,
    #[sqlx(flatten)]
    markers: MarkerColumns,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<BookingRow> for BookingRequest {
    fn from(row: BookingRow) -> Self {
        let (schedule, description) =
            read_schedule(&row.description, row.flexible_date, row.flexible_time);
        BookingRequest {
            id: row.id,
            buyer_id: row.buyer_id,
            seller_id: row.seller_id,
            category: row.category,
            description,
            budget: row.budget,
            proposed_start_date: row.proposed_start_date,
            time_slot: row.time_slot,
            schedule,
            status: row.status.unwrap_or_default(),
            seller_counter_proposal: row.seller_counter_proposal.map(|p| p.0),
            buyer_counter_proposal: row.buyer_counter_proposal.map(|p| p.0),
            revision_message: row.revision_message,
            previous_price: row.previous_price,
            previous_duration: row.previous_duration,
            markers: row.markers.into(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn bind_booking<'q>(query: PgQuery<'q>, booking: &BookingRequest) -> PgQuery<'q> {
    let query = query
        .bind(booking.id)
        .bind(booking.category.clone())
        .bind(booking.description.clone())
        .bind(booking.budget)
        .bind(booking.proposed_start_date)
        .bind(booking.time_slot.clone())
        .bind(booking.schedule.flexible_date)
        .bind(booking.schedule.flexible_time)
        .bind(booking.status)
        .bind(booking.seller_counter_proposal.clone().map(Json))
        .bind(booking.buyer_counter_proposal.clone().map(Json))
        .bind(booking.revision_message.clone())
        .bind(booking.previous_price)
        .bind(booking.previous_duration.clone());
    bind_markers(query, &booking.markers).bind(booking.updated_at)
}

#[derive(Debug, FromRow)]
struct QuoteRow {
    id: Uuid,
    request_id: Uuid,
    seller_id: Uuid,
    price: f64,
    estimated_duration: Option<String>,
    proposed_start_date: Option<NaiveDate>,
    proposal_text: Option<String>,
    attachments: Vec<String>,
    status: Option<QuoteStatus>,
    revision_message: Option<String>,
    previous_price: Option<f64>,
    previous_duration: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<QuoteRow> for Quote {
    fn from(row: QuoteRow) -> Self {
        Quote {
            id: row.id,
            request_id: row.request_id,
            seller_id: row.seller_id,
            price: row.price,
            estimated_duration: row.estimated_duration.unwrap_or_default(),
            proposed_start_date: row.proposed_start_date,
            proposal_text: row.proposal_text.unwrap_or_default(),
            attachments: row.attachments,
            status: row.status.unwrap_or_default(),
            revision_message: row.revision_message,
            previous_price: row.previous_price,
            previous_duration: row.previous_duration,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn bind_quote<'q>(query: PgQuery<'q>, quote: &Quote) -> PgQuery<'q> {
    query
        .bind(quote.id)
        .bind(quote.price)
        .bind(quote.estimated_duration.clone())
        .bind(quote.proposed_start_date)
        .bind(quote.proposal_text.clone())
        .bind(quote.attachments.clone())
        .bind(quote.status)
        .bind(quote.revision_message.clone())
        .bind(quote.previous_price)
        .bind(quote.previous_duration.clone())
        .bind(quote.updated_at)
}

#[derive(Debug, FromRow)]
struct ContractRow {
    id: Uuid,
    request_id: Option<Uuid>,
    booking_id: Option<Uuid>,
    quote_id: Option<Uuid>,
    buyer_id: Uuid,
    seller_id: Uuid,
    status: ContractStatus,
    version: i32,
    metadata: Option<Json<ContractMetadata>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ContractRow> for Contract {
    type Error = StoreError;

    fn try_from(row: ContractRow) -> Result<Self, Self::Error> {
        let unit = match (row.request_id, row.booking_id) {
            (Some(id), None) => UnitRef::Request(id),
            (None, Some(id)) => UnitRef::Booking(id),
            _ => {
                return Err(StoreError::Corrupt {
                    table: Table::Contracts,
                    reason: format!("contract {} must reference exactly one request or booking", row.id),
                })
            }
        };

        Ok(Contract {
            id: row.id,
            unit,
            quote_id: row.quote_id,
            buyer_id: row.buyer_id,
            seller_id: row.seller_id,
            status: row.status,
            version: row.version,
            metadata: row.metadata.map(|m| m.0).unwrap_or_default(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn bind_contract<'q>(query: PgQuery<'q>, contract: &Contract) -> PgQuery<'q> {
    query
        .bind(contract.id)
        .bind(contract.quote_id)
        .bind(contract.status)
        .bind(contract.version)
        .bind(Json(contract.metadata.clone()))
        .bind(contract.updated_at)
}

#[derive(Debug, FromRow)]
struct SignatureRow {
    id: Uuid,
    contract_id: Uuid,
    user_id: Uuid,
    role: Role,
    version: i32,
    signed_at: DateTime<Utc>,
}

impl From<SignatureRow> for ContractSignature {
    fn from(row: SignatureRow) -> Self {
        ContractSignature {
            id: row.id,
            contract_id: row.contract_id,
            user_id: row.user_id,
            role: row.role,
            version: row.version,
            signed_at: row.signed_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct TermsRow {
    id: Uuid,
    contract_id: Uuid,
    start_date: NaiveDate,
    completion_date: NaiveDate,
    warranty_days: i32,
    warranty_ends_on: NaiveDate,
    warranty_activated_at: Option<DateTime<Utc>>,
}

impl From<TermsRow> for BindingTerms {
    fn from(row: TermsRow) -> Self {
        BindingTerms {
            id: row.id,
            contract_id: row.contract_id,
            start_date: row.start_date,
            completion_date: row.completion_date,
            warranty_days: row.warranty_days,
            warranty_ends_on: row.warranty_ends_on,
            warranty_activated_at: row.warranty_activated_at,
        }
    }
}

fn bind_terms<'q>(query: PgQuery<'q>, terms: &BindingTerms) -> PgQuery<'q> {
    query
        .bind(terms.id)
        .bind(terms.contract_id)
        .bind(terms.start_date)
        .bind(terms.completion_date)
        .bind(terms.warranty_days)
        .bind(terms.warranty_ends_on)
        .bind(terms.warranty_activated_at)
}

#[async_trait]
impl EntityStore for DBClient {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgTx { tx }))
    }
}

pub struct PgTx {
    tx: Transaction<'static, Postgres>,
}

impl PgTx {
    async fn fetch_request(&mut self, id: Uuid, lock: bool) -> Result<Option<ServiceRequest>, StoreError> {
        let sql = if lock {
            concat!("SELECT ", request_columns!(), " FROM maintenance_requests WHERE id = $1 FOR UPDATE")
        } else {
            concat!("SELECT ", request_columns!(), " FROM maintenance_requests WHERE id = $1")
        };
        let row = sqlx::query_as::<_, RequestRow>(sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(ServiceRequest::from))
    }

    async fn fetch_booking(&mut self, id: Uuid, lock: bool) -> Result<Option<BookingRequest>, StoreError> {
        let sql = if lock {
            concat!("SELECT ", booking_columns!(), " FROM booking_requests WHERE id = $1 FOR UPDATE")
        } else {
            concat!("SELECT ", booking_columns!(), " FROM booking_requests WHERE id = $1")
        };
        let row = sqlx::query_as::<_, BookingRow>(sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(BookingRequest::from))
    }

    async fn fetch_contract(&mut self, id: Uuid, lock: bool) -> Result<Option<Contract>, StoreError> {
        let sql = if lock {
            concat!("SELECT ", contract_columns!(), " FROM contracts WHERE id = $1 FOR UPDATE")
        } else {
            concat!("SELECT ", contract_columns!(), " FROM contracts WHERE id = $1")
        };
        let row = sqlx::query_as::<_, ContractRow>(sql)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        row.map(Contract::try_from).transpose()
    }
}

fn ensure_updated(result: sqlx::postgres::PgQueryResult, table: Table, id: Uuid) -> Result<(), StoreError> {
    if result.rows_affected() == 0 {
        return Err(StoreError::Missing { table, id });
    }
    Ok(())
}

#[async_trait]
impl StoreTx for PgTx {
    async fn get_request(&mut self, id: Uuid) -> Result<Option<ServiceRequest>, StoreError> {
        self.fetch_request(id, false).await
    }

    async fn lock_request(&mut self, id: Uuid) -> Result<Option<ServiceRequest>, StoreError> {
        self.fetch_request(id, true).await
    }

    async fn insert_request(&mut self, request: &ServiceRequest) -> Result<(), StoreError> {
        let query = sqlx::query(concat!(
            "INSERT INTO maintenance_requests (",
            request_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)"
        ));
        bind_request(query, request)
            .bind(request.buyer_id)
            .bind(request.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify(Table::MaintenanceRequests, e))?;
        Ok(())
    }

    async fn update_request(&mut self, request: &ServiceRequest) -> Result<(), StoreError> {
        let query = sqlx::query(
            r#"
            UPDATE maintenance_requests
            SET category = $2, description = $3, budget_min = $4, budget_max = $5,
                preferred_start_date = $6, flexible_date = $7, flexible_time = $8, status = $9,
                seller_on_way_at = $10, work_started_at = $11, seller_marked_complete = $12,
                seller_completed_at = $13, completion_photos = $14, buyer_marked_complete = $15,
                buyer_completed_at = $16, updated_at = $17
            WHERE id = $1
            "#,
        );
        let result = bind_request(query, request)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify(Table::MaintenanceRequests, e))?;
        ensure_updated(result, Table::MaintenanceRequests, request.id)
    }

    async fn get_booking(&mut self, id: Uuid) -> Result<Option<BookingRequest>, StoreError> {
        self.fetch_booking(id, false).await
    }

    async fn lock_booking(&mut self, id: Uuid) -> Result<Option<BookingRequest>, StoreError> {
        self.fetch_booking(id, true).await
    }

    async fn insert_booking(&mut self, booking: &BookingRequest) -> Result<(), StoreError> {
        let query = sqlx::query(concat!(
            "INSERT INTO booking_requests (",
            booking_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
             $18, $19, $20, $21, $22, $23, $24, $25)"
        ));
        bind_booking(query, booking)
            .bind(booking.buyer_id)
            .bind(booking.seller_id)
            .bind(booking.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify(Table::BookingRequests, e))?;
        Ok(())
    }

    async fn update_booking(&mut self, booking: &BookingRequest) -> Result<(), StoreError> {
        let query = sqlx::query(
            r#"
            UPDATE booking_requests
            SET category = $2, description = $3, budget = $4, proposed_start_date = $5,
                time_slot = $6, flexible_date = $7, flexible_time = $8, status = $9,
                seller_counter_proposal = $10, buyer_counter_proposal = $11,
                revision_message = $12, previous_price = $13, previous_duration = $14,
                seller_on_way_at = $15, work_started_at = $16, seller_marked_complete = $17,
                seller_completed_at = $18, completion_photos = $19, buyer_marked_complete = $20,
                buyer_completed_at = $21, updated_at = $22
            WHERE id = $1
            "#,
        );
        let result = bind_booking(query, booking)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify(Table::BookingRequests, e))?;
        ensure_updated(result, Table::BookingRequests, booking.id)
    }

    async fn get_quote(&mut self, id: Uuid) -> Result<Option<Quote>, StoreError> {
        let row = sqlx::query_as::<_, QuoteRow>(concat!(
            "SELECT ",
            quote_columns!(),
            " FROM quote_submissions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(Quote::from))
    }

    async fn find_quotes(&mut self, request_id: Uuid) -> Result<Vec<Quote>, StoreError> {
        let rows = sqlx::query_as::<_, QuoteRow>(concat!(
            "SELECT ",
            quote_columns!(),
            " FROM quote_submissions WHERE request_id = $1 ORDER BY created_at ASC"
        ))
        .bind(request_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(Quote::from).collect())
    }

    async fn insert_quote(&mut self, quote: &Quote) -> Result<(), StoreError> {
        let query = sqlx::query(concat!(
            "INSERT INTO quote_submissions (",
            quote_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)"
        ));
        bind_quote(query, quote)
            .bind(quote.request_id)
            .bind(quote.seller_id)
            .bind(quote.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify(Table::QuoteSubmissions, e))?;
        Ok(())
    }

    async fn update_quote(&mut self, quote: &Quote) -> Result<(), StoreError> {
        let query = sqlx::query(
            r#"
            UPDATE quote_submissions
            SET price = $2, estimated_duration = $3, proposed_start_date = $4,
                proposal_text = $5, attachments = $6, status = $7, revision_message = $8,
                previous_price = $9, previous_duration = $10, updated_at = $11
            WHERE id = $1
            "#,
        );
        let result = bind_quote(query, quote)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify(Table::QuoteSubmissions, e))?;
        ensure_updated(result, Table::QuoteSubmissions, quote.id)
    }

    async fn get_contract(&mut self, id: Uuid) -> Result<Option<Contract>, StoreError> {
        self.fetch_contract(id, false).await
    }

    async fn lock_contract(&mut self, id: Uuid) -> Result<Option<Contract>, StoreError> {
        self.fetch_contract(id, true).await
    }

    async fn find_contracts(&mut self, unit: UnitRef) -> Result<Vec<Contract>, StoreError> {
        let sql = match unit {
            UnitRef::Request(_) => concat!(
                "SELECT ",
                contract_columns!(),
                " FROM contracts WHERE request_id = $1 ORDER BY created_at DESC"
            ),
            UnitRef::Booking(_) => concat!(
                "SELECT ",
                contract_columns!(),
                " FROM contracts WHERE booking_id = $1 ORDER BY created_at DESC"
            ),
        };
        let rows = sqlx::query_as::<_, ContractRow>(sql)
            .bind(unit.id())
            .fetch_all(&mut *self.tx)
            .await?;
        rows.into_iter().map(Contract::try_from).collect()
    }

    async fn insert_contract(&mut self, contract: &Contract) -> Result<(), StoreError> {
        let query = sqlx::query(concat!(
            "INSERT INTO contracts (",
            contract_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ));
        bind_contract(query, contract)
            .bind(contract.unit.request_id())
            .bind(contract.unit.booking_id())
            .bind(contract.buyer_id)
            .bind(contract.seller_id)
            .bind(contract.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify(Table::Contracts, e))?;
        Ok(())
    }

    async fn update_contract(&mut self, contract: &Contract) -> Result<(), StoreError> {
        let query = sqlx::query(
            r#"
            UPDATE contracts
            SET quote_id = $2, status = $3, version = $4, metadata = $5, updated_at = $6
            WHERE id = $1
            "#,
        );
        let result = bind_contract(query, contract)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify(Table::Contracts, e))?;
        ensure_updated(result, Table::Contracts, contract.id)
    }

    async fn delete_contract(&mut self, id: Uuid) -> Result<(), StoreError> {
        // signatures and binding terms go with it (ON DELETE CASCADE)
        sqlx::query("DELETE FROM contracts WHERE id = $1")
            .bind(id)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify(Table::Contracts, e))?;
        Ok(())
    }

    async fn find_signatures(&mut self, contract_id: Uuid) -> Result<Vec<ContractSignature>, StoreError> {
        let rows = sqlx::query_as::<_, SignatureRow>(concat!(
            "SELECT ",
            signature_columns!(),
            " FROM contract_signatures WHERE contract_id = $1 ORDER BY signed_at ASC"
        ))
        .bind(contract_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows.into_iter().map(ContractSignature::from).collect())
    }

    async fn insert_signature(&mut self, signature: &ContractSignature) -> Result<(), StoreError> {
        sqlx::query(concat!(
            "INSERT INTO contract_signatures (",
            signature_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6)"
        ))
        .bind(signature.id)
        .bind(signature.contract_id)
        .bind(signature.user_id)
        .bind(signature.role)
        .bind(signature.version)
        .bind(signature.signed_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| classify(Table::ContractSignatures, e))?;
        Ok(())
    }

    async fn get_terms(&mut self, contract_id: Uuid) -> Result<Option<BindingTerms>, StoreError> {
        let row = sqlx::query_as::<_, TermsRow>(concat!(
            "SELECT ",
            terms_columns!(),
            " FROM binding_terms WHERE contract_id = $1"
        ))
        .bind(contract_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(BindingTerms::from))
    }

    async fn insert_terms(&mut self, terms: &BindingTerms) -> Result<(), StoreError> {
        let query = sqlx::query(concat!(
            "INSERT INTO binding_terms (",
            terms_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ));
        bind_terms(query, terms)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify(Table::BindingTerms, e))?;
        Ok(())
    }

    async fn update_terms(&mut self, terms: &BindingTerms) -> Result<(), StoreError> {
        let query = sqlx::query(
            r#"
            UPDATE binding_terms
            SET id = $1, start_date = $3, completion_date = $4, warranty_days = $5,
                warranty_ends_on = $6, warranty_activated_at = $7
            WHERE contract_id = $2
            "#,
        );
        let result = bind_terms(query, terms)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| classify(Table::BindingTerms, e))?;
        ensure_updated(result, Table::BindingTerms, terms.contract_id)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await.map_err(|e| classify(Table::Contracts, e))
    }
}

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const LEGACY_FLEXIBLE_DATE_TOKEN: &str = "[Flexible Date]";
pub const LEGACY_FLEXIBLE_TIME_TOKEN: &str = "[Flexible Time]";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Default)]
#[sqlx(type_name = "request_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Open,
    InProgress,
    Closed,
    Completed,
    Deleted,
}

impl RequestStatus {
    pub fn to_str(&self) -> &'static str {
        match self {
            RequestStatus::Open => "open",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Closed => "closed",
            RequestStatus::Completed => "completed",
            RequestStatus::Deleted => "deleted",
        }
    }

    /// A request in one of these states can no longer take an accepted quote.
    pub fn blocks_acceptance(&self) -> bool {
        matches!(
            self,
            RequestStatus::Closed
                | RequestStatus::Deleted
                | RequestStatus::InProgress
                | RequestStatus::Completed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Closed | RequestStatus::Completed | RequestStatus::Deleted
        )
    }
}

// A NULL status column on booking_requests is read as `Pending`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Default)]
#[sqlx(type_name = "booking_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    #[default]
    Pending,
    SellerResponded,
    RevisionRequested,
    BuyerCountered,
    Accepted,
    Declined,
    Cancelled,
    Completed,
}

impl BookingStatus {
    pub fn to_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::SellerResponded => "seller_responded",
            BookingStatus::RevisionRequested => "revision_requested",
            BookingStatus::BuyerCountered => "buyer_countered",
            BookingStatus::Accepted => "accepted",
            BookingStatus::Declined => "declined",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Declined | BookingStatus::Cancelled | BookingStatus::Completed
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Default)]
#[sqlx(type_name = "quote_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QuoteStatus {
    #[default]
    Pending,
    Negotiating,
    RevisionRequested,
    Accepted,
    Rejected,
}

impl QuoteStatus {
    pub fn to_str(&self) -> &'static str {
        match self {
            QuoteStatus::Pending => "pending",
            QuoteStatus::Negotiating => "negotiating",
            QuoteStatus::RevisionRequested => "revision_requested",
            QuoteStatus::Accepted => "accepted",
            QuoteStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QuoteStatus::Rejected)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq, Default)]
#[sqlx(type_name = "contract_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContractStatus {
    #[default]
    PendingBuyer,
    PendingSeller,
    Executed,
    Rejected,
    Completed,
}

impl ContractStatus {
    pub fn to_str(&self) -> &'static str {
        match self {
            ContractStatus::PendingBuyer => "pending_buyer",
            ContractStatus::PendingSeller => "pending_seller",
            ContractStatus::Executed => "executed",
            ContractStatus::Rejected => "rejected",
            ContractStatus::Completed => "completed",
        }
    }

    /// Active contracts are the ones the one-per-unit rule counts.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ContractStatus::PendingBuyer | ContractStatus::PendingSeller | ContractStatus::Executed
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

macro_rules! display_via_to_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.to_str())
            }
        })*
    };
}

display_via_to_str!(RequestStatus, BookingStatus, QuoteStatus, ContractStatus, Role);

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "party_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    Seller,
}

impl Role {
    pub fn to_str(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Seller => "seller",
        }
    }

    pub fn parse(value: &str) -> Option<Role> {
        match value.trim().to_ascii_lowercase().as_str() {
            "buyer" | "customer" => Some(Role::Buyer),
            "seller" | "provider" => Some(Role::Seller),
            _ => None,
        }
    }
}

/// The party performing an action. Passed explicitly into every engine call.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn buyer(id: Uuid) -> Self {
        Self { id, role: Role::Buyer }
    }

    pub fn seller(id: Uuid) -> Self {
        Self { id, role: Role::Seller }
    }
}

/// The unit of work a contract binds: a service request or a direct booking.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum UnitRef {
    Request(Uuid),
    Booking(Uuid),
}

impl UnitRef {
    pub fn id(&self) -> Uuid {
        match self {
            UnitRef::Request(id) | UnitRef::Booking(id) => *id,
        }
    }

    pub fn request_id(&self) -> Option<Uuid> {
        match self {
            UnitRef::Request(id) => Some(*id),
            UnitRef::Booking(_) => None,
        }
    }

    pub fn booking_id(&self) -> Option<Uuid> {
        match self {
            UnitRef::Booking(id) => Some(*id),
            UnitRef::Request(_) => None,
        }
    }
}

/// Structured replacement for the `[Flexible Date]` / `[Flexible Time]`
/// tokens older records carry inside their description text.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlexibleSchedule {
    pub flexible_date: bool,
    pub flexible_time: bool,
}

impl FlexibleSchedule {
    /// Reads legacy tokens out of `description`, returning the flags and the
    /// description with the tokens stripped.
    pub fn from_legacy(description: &str) -> (FlexibleSchedule, String) {
        let flexible_date = description.contains(LEGACY_FLEXIBLE_DATE_TOKEN);
        let flexible_time = description.contains(LEGACY_FLEXIBLE_TIME_TOKEN);

        let cleaned = description
            .replace(LEGACY_FLEXIBLE_DATE_TOKEN, "")
            .replace(LEGACY_FLEXIBLE_TIME_TOKEN, "");
        let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");

        (FlexibleSchedule { flexible_date, flexible_time }, cleaned)
    }

    pub fn merge(self, other: FlexibleSchedule) -> FlexibleSchedule {
        FlexibleSchedule {
            flexible_date: self.flexible_date || other.flexible_date,
            flexible_time: self.flexible_time || other.flexible_time,
        }
    }
}

/// A priced offer: a seller's response, a buyer's counter, or renegotiated terms.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Proposal {
    pub price: f64,
    pub start_date: Option<NaiveDate>,
    pub time_slot: Option<String>,
    pub duration: Option<String>,
    pub notes: Option<String>,
}

/// Execution markers. Monotonic: once set they are only cleared by a
/// delete-response reset.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct ExecutionMarkers {
    pub seller_on_way_at: Option<DateTime<Utc>>,
    pub work_started_at: Option<DateTime<Utc>>,
    pub seller_marked_complete: bool,
    pub seller_completed_at: Option<DateTime<Utc>>,
    pub completion_photos: Vec<String>,
    pub buyer_marked_complete: bool,
    pub buyer_completed_at: Option<DateTime<Utc>>,
}

/// Stored in `maintenance_requests`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ServiceRequest {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub category: String,
    pub description: String,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub preferred_start_date: Option<NaiveDate>,
    pub schedule: FlexibleSchedule,
    pub status: RequestStatus,
    pub markers: ExecutionMarkers,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored in `booking_requests`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BookingRequest {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub category: String,
    pub description: String,
    pub budget: Option<f64>,
    pub proposed_start_date: Option<NaiveDate>,
    pub time_slot: Option<String>,
    pub schedule: FlexibleSchedule,
    pub status: BookingStatus,
    pub seller_counter_proposal: Option<Proposal>,
    pub buyer_counter_proposal: Option<Proposal>,
    pub revision_message: Option<String>,
    pub previous_price: Option<f64>,
    pub previous_duration: Option<String>,
    pub markers: ExecutionMarkers,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BookingRequest {
    /// The terms both sides agreed on when `accepted_by` accepted.
    ///
    /// A buyer accepts the seller's response; a seller accepts either the
    /// buyer's counter or the original request as submitted.
    pub fn agreed_proposal(&self, accepted_by: Role) -> Proposal {
        let slot = match accepted_by {
            Role::Buyer => self.seller_counter_proposal.as_ref(),
            Role::Seller => self.buyer_counter_proposal.as_ref(),
        };

        slot.cloned().unwrap_or_else(|| Proposal {
            price: self.budget.unwrap_or(0.0),
            start_date: self.proposed_start_date,
            time_slot: self.time_slot.clone(),
            duration: None,
            notes: None,
        })
    }
}

/// Stored in `quote_submissions`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Quote {
    pub id: Uuid,
    pub request_id: Uuid,
    pub seller_id: Uuid,
    pub price: f64,
    pub estimated_duration: String,
    pub proposed_start_date: Option<NaiveDate>,
    pub proposal_text: String,
    pub attachments: Vec<String>,
    pub status: QuoteStatus,
    pub revision_message: Option<String>,
    pub previous_price: Option<f64>,
    pub previous_duration: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Scheduling and price snapshot kept on the contract so it renders without
/// the originating quote or booking.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
#[serde(default)]
pub struct ContractMetadata {
    pub price: Option<f64>,
    pub final_amount: Option<f64>,
    pub final_agreed_price: Option<f64>,
    pub deposit_amount: Option<f64>,
    pub start_date: Option<NaiveDate>,
    pub time_slot: Option<String>,
    pub estimated_duration: Option<String>,
    pub duration_days: i64,
    pub notes: Option<String>,
}

impl ContractMetadata {
    /// The amount to display and bill, in fallback order:
    /// final amount, final agreed price, deposit, proposal price.
    pub fn resolve_price(&self) -> Option<f64> {
        [
            self.final_amount,
            self.final_agreed_price,
            self.deposit_amount,
            self.price,
        ]
        .into_iter()
        .flatten()
        .find(|amount| amount.is_finite() && *amount > 0.0)
    }
}

/// Stored in `contracts`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Contract {
    pub id: Uuid,
    pub unit: UnitRef,
    pub quote_id: Option<Uuid>,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub status: ContractStatus,
    pub version: i32,
    pub metadata: ContractMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contract {
    pub fn party_role(&self, user_id: Uuid) -> Option<Role> {
        if user_id == self.buyer_id {
            Some(Role::Buyer)
        } else if user_id == self.seller_id {
            Some(Role::Seller)
        } else {
            None
        }
    }
}

/// Stored in `contract_signatures`, one row per (contract, user, version).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ContractSignature {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub version: i32,
    pub signed_at: DateTime<Utc>,
}

/// Stored in `binding_terms`, one row per contract.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BindingTerms {
    pub id: Uuid,
    pub contract_id: Uuid,
    pub start_date: NaiveDate,
    pub completion_date: NaiveDate,
    pub warranty_days: i32,
    pub warranty_ends_on: NaiveDate,
    pub warranty_activated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingSubmitted,
    SellerResponded,
    RevisionRequested,
    BuyerCountered,
    BookingAccepted,
    BookingDeclined,
    BookingCancelled,
    ResponseDeleted,
    QuoteSubmitted,
    QuoteUpdated,
    QuoteAccepted,
    QuoteRejected,
    ContractAwaitingSignature,
    ContractExecuted,
    ContractRejected,
    ContractRenegotiated,
    SellerOnTheWay,
    WorkStarted,
    SellerMarkedComplete,
    JobCompleted,
    ReviewRequested,
}

impl NotificationKind {
    pub fn to_str(&self) -> &'static str {
        match self {
            NotificationKind::BookingSubmitted => "booking_submitted",
            NotificationKind::SellerResponded => "seller_responded",
            NotificationKind::RevisionRequested => "revision_requested",
            NotificationKind::BuyerCountered => "buyer_countered",
            NotificationKind::BookingAccepted => "booking_accepted",
            NotificationKind::BookingDeclined => "booking_declined",
            NotificationKind::BookingCancelled => "booking_cancelled",
            NotificationKind::ResponseDeleted => "response_deleted",
            NotificationKind::QuoteSubmitted => "quote_submitted",
            NotificationKind::QuoteUpdated => "quote_updated",
            NotificationKind::QuoteAccepted => "quote_accepted",
            NotificationKind::QuoteRejected => "quote_rejected",
            NotificationKind::ContractAwaitingSignature => "contract_awaiting_signature",
            NotificationKind::ContractExecuted => "contract_executed",
            NotificationKind::ContractRejected => "contract_rejected",
            NotificationKind::ContractRenegotiated => "contract_renegotiated",
            NotificationKind::SellerOnTheWay => "seller_on_the_way",
            NotificationKind::WorkStarted => "work_started",
            NotificationKind::SellerMarkedComplete => "seller_marked_complete",
            NotificationKind::JobCompleted => "job_completed",
            NotificationKind::ReviewRequested => "review_requested",
        }
    }
}

/// Descriptor handed to the notification dispatcher after a commit.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub recipient_id: Uuid,
    pub content_id: Uuid,
    pub title: String,
    pub message: String,
}

impl NotificationEvent {
    pub fn new(
        kind: NotificationKind,
        recipient_id: Uuid,
        content_id: Uuid,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            recipient_id,
            content_id,
            title: title.into(),
            message: message.into(),
        }
    }
}

// service/transitions.rs
//! Status transitions for bookings, quotes and service requests.
//!
//! Every function here is pure: it takes the current records, the action and
//! the acting party, and returns either the next record plus the writes and
//! notifications the caller must perform, or a [`Rejection`]. Nothing is
//! persisted here.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
    models::lifecyclemodel::*,
    service::{
        error::Rejection,
        progress::{record_milestone, Milestone},
    },
};

const BOOKING: &str = "booking";
const QUOTE: &str = "quote";
const REQUEST: &str = "service request";

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Respond(Proposal),
    EditResponse(Proposal),
    RequestRevision { message: String },
    CounterPropose(Proposal),
    Accept,
    Reject,
    Decline,
    Cancel,
    DeleteResponse,
    MarkOnWay,
    StartWork,
    MarkSellerComplete { photos: Vec<String> },
    MarkBuyerComplete,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Respond(_) => "respond to",
            Action::EditResponse(_) => "edit the response on",
            Action::RequestRevision { .. } => "request a revision of",
            Action::CounterPropose(_) => "counter",
            Action::Accept => "accept",
            Action::Reject => "reject",
            Action::Decline => "decline",
            Action::Cancel => "cancel",
            Action::DeleteResponse => "delete the response on",
            Action::MarkOnWay => "mark on the way",
            Action::StartWork => "start work on",
            Action::MarkSellerComplete { .. } => "mark complete",
            Action::MarkBuyerComplete => "confirm completion of",
        }
    }

    pub fn milestone(&self) -> Option<Milestone> {
        match self {
            Action::MarkOnWay => Some(Milestone::OnTheWay),
            Action::StartWork => Some(Milestone::Started),
            Action::MarkSellerComplete { photos } => Some(Milestone::SellerComplete {
                photos: photos.clone(),
            }),
            Action::MarkBuyerComplete => Some(Milestone::BuyerComplete),
            _ => None,
        }
    }
}

/// Writes beyond the entity itself that the caller performs in the same unit
/// of work.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    SetRequestStatus { request_id: Uuid, status: RequestStatus },
    SetContractStatus { contract_id: Uuid, status: ContractStatus },
    FormContract(ContractDraft),
    ActivateWarranty { contract_id: Uuid },
}

/// Everything contract formation needs to know about the agreed work.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractDraft {
    pub unit: UnitRef,
    pub quote_id: Option<Uuid>,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub terms: Proposal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition<T> {
    pub next: T,
    pub changed: bool,
    pub effects: Vec<SideEffect>,
    pub events: Vec<NotificationEvent>,
}

impl<T> Transition<T> {
    fn to(next: T) -> Self {
        Self {
            next,
            changed: true,
            effects: Vec::new(),
            events: Vec::new(),
        }
    }

    fn unchanged(next: T) -> Self {
        Self {
            next,
            changed: false,
            effects: Vec::new(),
            events: Vec::new(),
        }
    }

    fn effect(mut self, effect: SideEffect) -> Self {
        self.effects.push(effect);
        self
    }

    fn notify(mut self, event: NotificationEvent) -> Self {
        self.events.push(event);
        self
    }
}

/// Re-checks a proposal coming from a form; earlier validation is not trusted.
pub fn validate_proposal(proposal: &Proposal) -> Result<(), Rejection> {
    if !proposal.price.is_finite() || proposal.price < 0.0 {
        return Err(Rejection::Validation(
            "Price must be a non-negative number".to_string(),
        ));
    }
    Ok(())
}

fn revision_message(message: &str) -> Result<String, Rejection> {
    let message = message.trim();
    if message.is_empty() {
        return Err(Rejection::Validation(
            "Tell the seller what should change".to_string(),
        ));
    }
    Ok(message.to_string())
}

fn require(role: Role, expected: Role, entity: &'static str, action: &Action) -> Result<(), Rejection> {
    if role != expected {
        return Err(Rejection::wrong_role(expected, action.name(), entity));
    }
    Ok(())
}

fn format_price(price: f64) -> String {
    format!("{:.2}", price)
}

/// Applies an execution milestone; `None` when the markers did not move.
fn advance_markers(
    markers: &ExecutionMarkers,
    contract: Option<&Contract>,
    milestone: &Milestone,
    role: Role,
    entity: &'static str,
    now: DateTime<Utc>,
) -> Result<Option<ExecutionMarkers>, Rejection> {
    match contract {
        Some(contract) if contract.status == ContractStatus::Executed => {}
        _ => {
            return Err(Rejection::invalid(
                entity,
                "not under a signed contract",
                "track progress on",
            ))
        }
    }

    let next = record_milestone(markers, milestone, role, entity, now)?;
    Ok((next != *markers).then_some(next))
}

fn completion_effects<T>(
    transition: Transition<T>,
    contract: Option<&Contract>,
    buyer_id: Uuid,
    seller_id: Uuid,
    content_id: Uuid,
) -> Transition<T> {
    let mut transition = transition
        .notify(NotificationEvent::new(
            NotificationKind::JobCompleted,
            seller_id,
            content_id,
            "Job completed",
            "The customer confirmed the work is complete",
        ))
        .notify(NotificationEvent::new(
            NotificationKind::ReviewRequested,
            buyer_id,
            content_id,
            "How did it go?",
            "Your warranty is now active. Leave a review for your provider",
        ));

    if let Some(contract) = contract {
        transition = transition
            .effect(SideEffect::SetContractStatus {
                contract_id: contract.id,
                status: ContractStatus::Completed,
            })
            .effect(SideEffect::ActivateWarranty {
                contract_id: contract.id,
            });
    }
    transition
}

fn milestone_event(
    milestone: &Milestone,
    recipient_id: Uuid,
    content_id: Uuid,
) -> Option<NotificationEvent> {
    let (kind, title, message) = match milestone {
        Milestone::OnTheWay => (
            NotificationKind::SellerOnTheWay,
            "Provider on the way",
            "Your provider is on the way",
        ),
        Milestone::Started => (
            NotificationKind::WorkStarted,
            "Work started",
            "Your provider has started the work",
        ),
        Milestone::SellerComplete { .. } => (
            NotificationKind::SellerMarkedComplete,
            "Please confirm completion",
            "Your provider marked the job complete. Review the photos and confirm",
        ),
        Milestone::BuyerComplete => return None,
    };
    Some(NotificationEvent::new(kind, recipient_id, content_id, title, message))
}

// ─── Bookings ────────────────────────────────────────────────────────

/// What a booking transition needs besides the booking itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookingContext<'a> {
    /// The booking's current contract, if any (the newest non-rejected one).
    pub contract: Option<&'a Contract>,
}

fn booking_role(booking: &BookingRequest, actor: &Actor) -> Result<Role, Rejection> {
    match actor.role {
        Role::Buyer if actor.id == booking.buyer_id => Ok(Role::Buyer),
        Role::Seller if actor.id == booking.seller_id => Ok(Role::Seller),
        _ => Err(Rejection::Forbidden { actor_id: actor.id }),
    }
}

pub fn apply_booking(
    booking: &BookingRequest,
    ctx: &BookingContext<'_>,
    action: &Action,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Transition<BookingRequest>, Rejection> {
    let role = booking_role(booking, actor)?;
    let status = booking.status;

    if *action == Action::MarkBuyerComplete
        && status == BookingStatus::Completed
        && booking.markers.buyer_marked_complete
    {
        return Ok(Transition::unchanged(booking.clone()));
    }

    if status.is_terminal() {
        return Err(Rejection::invalid(BOOKING, status, action.name()));
    }

    let executed = ctx
        .contract
        .map(|c| c.status == ContractStatus::Executed)
        .unwrap_or(false);

    let mut next = booking.clone();
    next.updated_at = now;

    let transition = match action {
        Action::Respond(proposal) => {
            require(role, Role::Seller, BOOKING, action)?;
            if !matches!(status, BookingStatus::Pending | BookingStatus::BuyerCountered) {
                return Err(Rejection::invalid(BOOKING, status, action.name()));
            }
            validate_proposal(proposal)?;

            next.seller_counter_proposal = Some(proposal.clone());
            next.buyer_counter_proposal = None;
            next.status = BookingStatus::SellerResponded;

            Transition::to(next).notify(NotificationEvent::new(
                NotificationKind::SellerResponded,
                booking.buyer_id,
                booking.id,
                "New offer on your booking",
                format!("The provider offered {}", format_price(proposal.price)),
            ))
        }

        Action::EditResponse(proposal) => {
            require(role, Role::Seller, BOOKING, action)?;
            if !matches!(
                status,
                BookingStatus::SellerResponded | BookingStatus::RevisionRequested
            ) || booking.seller_counter_proposal.is_none()
            {
                return Err(Rejection::invalid(BOOKING, status, action.name()));
            }
            validate_proposal(proposal)?;

            // The revision snapshot stays so the buyer can see what changed.
            next.seller_counter_proposal = Some(proposal.clone());
            next.status = BookingStatus::SellerResponded;

            let message = match booking.previous_price {
                Some(previous) => format!(
                    "The provider revised the offer from {} to {}",
                    format_price(previous),
                    format_price(proposal.price)
                ),
                None => format!("The provider updated the offer to {}", format_price(proposal.price)),
            };

            Transition::to(next).notify(NotificationEvent::new(
                NotificationKind::SellerResponded,
                booking.buyer_id,
                booking.id,
                "Offer updated",
                message,
            ))
        }

        Action::RequestRevision { message } => {
            require(role, Role::Buyer, BOOKING, action)?;
            if !matches!(status, BookingStatus::SellerResponded | BookingStatus::Pending) {
                return Err(Rejection::invalid(BOOKING, status, action.name()));
            }
            let message = revision_message(message)?;

            let offer = booking.seller_counter_proposal.as_ref();
            next.previous_price = offer.map(|p| p.price);
            next.previous_duration = offer.and_then(|p| p.duration.clone());
            next.revision_message = Some(message.clone());
            next.status = BookingStatus::RevisionRequested;

            Transition::to(next).notify(NotificationEvent::new(
                NotificationKind::RevisionRequested,
                booking.seller_id,
                booking.id,
                "Revision requested",
                message,
            ))
        }

        Action::CounterPropose(proposal) => {
            require(role, Role::Buyer, BOOKING, action)?;
            if status != BookingStatus::SellerResponded {
                return Err(Rejection::invalid(BOOKING, status, action.name()));
            }
            validate_proposal(proposal)?;

            next.buyer_counter_proposal = Some(proposal.clone());
            next.status = BookingStatus::BuyerCountered;

            Transition::to(next).notify(NotificationEvent::new(
                NotificationKind::BuyerCountered,
                booking.seller_id,
                booking.id,
                "Counter offer received",
                format!("The customer proposed {}", format_price(proposal.price)),
            ))
        }

        Action::Accept => {
            // The seller accepts what the buyer asked for; the buyer accepts
            // what the seller answered.
            let accepted = match (role, status) {
                (Role::Seller, BookingStatus::Pending | BookingStatus::BuyerCountered) => true,
                (Role::Buyer, BookingStatus::SellerResponded) => true,
                _ => false,
            };
            if !accepted {
                return Err(Rejection::invalid(BOOKING, status, action.name()));
            }

            let terms = booking.agreed_proposal(role);
            validate_proposal(&terms)?;
            next.status = BookingStatus::Accepted;

            let recipient = match role {
                Role::Buyer => booking.seller_id,
                Role::Seller => booking.buyer_id,
            };

            Transition::to(next)
                .effect(SideEffect::FormContract(ContractDraft {
                    unit: UnitRef::Booking(booking.id),
                    quote_id: None,
                    buyer_id: booking.buyer_id,
                    seller_id: booking.seller_id,
                    terms,
                }))
                .notify(NotificationEvent::new(
                    NotificationKind::BookingAccepted,
                    recipient,
                    booking.id,
                    "Booking accepted",
                    "The booking was accepted. The contract is ready for signature",
                ))
        }

        Action::Decline | Action::Reject if role == Role::Seller => {
            if executed {
                return Err(Rejection::invalid(BOOKING, "under an executed contract", action.name()));
            }
            next.status = BookingStatus::Declined;

            void_contract(Transition::to(next), ctx.contract).notify(NotificationEvent::new(
                NotificationKind::BookingDeclined,
                booking.buyer_id,
                booking.id,
                "Booking declined",
                "The provider declined your booking",
            ))
        }

        Action::Cancel | Action::Reject if role == Role::Buyer => {
            if executed {
                return Err(Rejection::invalid(BOOKING, "under an executed contract", action.name()));
            }
            next.status = BookingStatus::Cancelled;

            void_contract(Transition::to(next), ctx.contract).notify(NotificationEvent::new(
                NotificationKind::BookingCancelled,
                booking.seller_id,
                booking.id,
                "Booking cancelled",
                "The customer cancelled the booking",
            ))
        }

        Action::DeleteResponse => {
            require(role, Role::Seller, BOOKING, action)?;
            if status == BookingStatus::Pending {
                return Err(Rejection::invalid(BOOKING, status, action.name()));
            }

            next.status = BookingStatus::Pending;
            next.seller_counter_proposal = None;
            next.buyer_counter_proposal = None;
            next.revision_message = None;
            next.previous_price = None;
            next.previous_duration = None;
            next.markers = ExecutionMarkers::default();

            void_contract(Transition::to(next), ctx.contract).notify(NotificationEvent::new(
                NotificationKind::ResponseDeleted,
                booking.buyer_id,
                booking.id,
                "Offer withdrawn",
                "The provider withdrew their response. Your booking is pending again",
            ))
        }

        Action::MarkOnWay
        | Action::StartWork
        | Action::MarkSellerComplete { .. }
        | Action::MarkBuyerComplete => {
            if status != BookingStatus::Accepted {
                return Err(Rejection::invalid(BOOKING, status, action.name()));
            }
            let Some(milestone) = action.milestone() else {
                return Err(Rejection::invalid(BOOKING, status, action.name()));
            };

            let Some(markers) =
                advance_markers(&booking.markers, ctx.contract, &milestone, role, BOOKING, now)?
            else {
                return Ok(Transition::unchanged(booking.clone()));
            };
            next.markers = markers;

            if milestone == Milestone::BuyerComplete {
                next.status = BookingStatus::Completed;
                completion_effects(
                    Transition::to(next),
                    ctx.contract,
                    booking.buyer_id,
                    booking.seller_id,
                    booking.id,
                )
            } else {
                let mut transition = Transition::to(next);
                if let Some(event) = milestone_event(&milestone, booking.buyer_id, booking.id) {
                    transition = transition.notify(event);
                }
                transition
            }
        }

        _ => return Err(Rejection::invalid(BOOKING, status, action.name())),
    };

    Ok(transition)
}

fn void_contract<T>(transition: Transition<T>, contract: Option<&Contract>) -> Transition<T> {
    match contract {
        Some(contract) if contract.status.is_active() => {
            transition.effect(SideEffect::SetContractStatus {
                contract_id: contract.id,
                status: ContractStatus::Rejected,
            })
        }
        _ => transition,
    }
}

// ─── Quotes ──────────────────────────────────────────────────────────

/// A quote decision reads the owning request, every quote on it and every
/// contract for it. The caller loads all three inside one unit of work.
#[derive(Debug, Clone, Copy)]
pub struct QuoteContext<'a> {
    pub request: &'a ServiceRequest,
    pub quotes: &'a [Quote],
    pub contracts: &'a [Contract],
}

fn quote_role(quote: &Quote, request: &ServiceRequest, actor: &Actor) -> Result<Role, Rejection> {
    match actor.role {
        Role::Buyer if actor.id == request.buyer_id => Ok(Role::Buyer),
        Role::Seller if actor.id == quote.seller_id => Ok(Role::Seller),
        _ => Err(Rejection::Forbidden { actor_id: actor.id }),
    }
}

/// The accept guard: no other live contract on the request, no other
/// accepted quote, and a request that can still take one.
pub fn check_quote_acceptable(quote: &Quote, ctx: &QuoteContext<'_>) -> Result<(), Rejection> {
    if let Some(existing) = ctx.contracts.iter().find(|contract| {
        contract.status.is_active()
            && !(contract.status == ContractStatus::PendingBuyer
                && contract.quote_id == Some(quote.id))
    }) {
        return Err(Rejection::ConflictingContract {
            existing_contract_id: existing.id,
        });
    }

    if let Some(winner) = ctx
        .quotes
        .iter()
        .find(|other| other.id != quote.id && other.status == QuoteStatus::Accepted)
    {
        return Err(Rejection::AlreadyAccepted {
            request_id: ctx.request.id,
            quote_id: winner.id,
        });
    }

    if ctx.request.status.blocks_acceptance() {
        return Err(Rejection::invalid(REQUEST, ctx.request.status, "accept a quote on"));
    }

    Ok(())
}

pub fn apply_quote(
    quote: &Quote,
    ctx: &QuoteContext<'_>,
    action: &Action,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Transition<Quote>, Rejection> {
    let request = ctx.request;
    let role = quote_role(quote, request, actor)?;
    let status = quote.status;

    if status.is_terminal() {
        return Err(Rejection::invalid(QUOTE, status, action.name()));
    }

    let mut next = quote.clone();
    next.updated_at = now;

    let transition = match action {
        Action::Respond(proposal) | Action::EditResponse(proposal) => {
            require(role, Role::Seller, QUOTE, action)?;
            if status == QuoteStatus::Accepted {
                return Err(Rejection::invalid(QUOTE, status, action.name()));
            }
            // Quotes are only negotiable while the request is still taking offers.
            if request.status != RequestStatus::Open {
                return Err(Rejection::invalid(REQUEST, request.status, "edit a quote on"));
            }
            validate_proposal(proposal)?;

            next.price = proposal.price;
            if let Some(duration) = &proposal.duration {
                next.estimated_duration = duration.clone();
            }
            if proposal.start_date.is_some() {
                next.proposed_start_date = proposal.start_date;
            }
            if let Some(text) = &proposal.notes {
                next.proposal_text = text.clone();
            }
            // Any edit addresses an open revision request.
            next.status = QuoteStatus::Pending;

            Transition::to(next).notify(NotificationEvent::new(
                NotificationKind::QuoteUpdated,
                request.buyer_id,
                quote.id,
                "Quote updated",
                format!("A provider updated their quote to {}", format_price(proposal.price)),
            ))
        }

        Action::RequestRevision { message } => {
            require(role, Role::Buyer, QUOTE, action)?;
            if !matches!(status, QuoteStatus::Pending | QuoteStatus::Negotiating) {
                return Err(Rejection::invalid(QUOTE, status, action.name()));
            }
            let message = revision_message(message)?;

            next.previous_price = Some(quote.price);
            next.previous_duration = Some(quote.estimated_duration.clone());
            next.revision_message = Some(message.clone());
            next.status = QuoteStatus::RevisionRequested;

            Transition::to(next).notify(NotificationEvent::new(
                NotificationKind::RevisionRequested,
                quote.seller_id,
                quote.id,
                "Revision requested",
                message,
            ))
        }

        Action::CounterPropose(proposal) => {
            require(role, Role::Buyer, QUOTE, action)?;
            if !matches!(
                status,
                QuoteStatus::Pending | QuoteStatus::RevisionRequested | QuoteStatus::Negotiating
            ) {
                return Err(Rejection::invalid(QUOTE, status, action.name()));
            }
            validate_proposal(proposal)?;

            let mut note = format!("Counter offer: {}", format_price(proposal.price));
            if let Some(notes) = proposal.notes.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
                note.push_str(" - ");
                note.push_str(notes);
            }

            next.previous_price = Some(quote.price);
            next.previous_duration = Some(quote.estimated_duration.clone());
            next.revision_message = Some(note.clone());
            next.status = QuoteStatus::Negotiating;

            Transition::to(next).notify(NotificationEvent::new(
                NotificationKind::BuyerCountered,
                quote.seller_id,
                quote.id,
                "Counter offer received",
                note,
            ))
        }

        Action::Accept => {
            require(role, Role::Buyer, QUOTE, action)?;
            check_quote_acceptable(quote, ctx)?;
            if status == QuoteStatus::Accepted {
                return Err(Rejection::invalid(QUOTE, status, action.name()));
            }

            next.status = QuoteStatus::Accepted;

            Transition::to(next)
                .effect(SideEffect::SetRequestStatus {
                    request_id: request.id,
                    status: RequestStatus::InProgress,
                })
                .effect(SideEffect::FormContract(ContractDraft {
                    unit: UnitRef::Request(request.id),
                    quote_id: Some(quote.id),
                    buyer_id: request.buyer_id,
                    seller_id: quote.seller_id,
                    terms: quote_terms(quote),
                }))
                .notify(NotificationEvent::new(
                    NotificationKind::QuoteAccepted,
                    quote.seller_id,
                    quote.id,
                    "Quote accepted",
                    "Your quote was accepted. The contract is ready for signature",
                ))
        }

        Action::Reject | Action::Cancel => {
            let own_contracts: Vec<&Contract> = ctx
                .contracts
                .iter()
                .filter(|c| c.quote_id == Some(quote.id) && c.status.is_active())
                .collect();

            if own_contracts.iter().any(|c| c.status == ContractStatus::Executed) {
                return Err(Rejection::invalid(QUOTE, "under an executed contract", action.name()));
            }

            next.status = QuoteStatus::Rejected;
            let mut transition = Transition::to(next);

            if status == QuoteStatus::Accepted && request.status == RequestStatus::InProgress {
                transition = transition.effect(SideEffect::SetRequestStatus {
                    request_id: request.id,
                    status: RequestStatus::Open,
                });
            }
            for contract in own_contracts {
                transition = transition.effect(SideEffect::SetContractStatus {
                    contract_id: contract.id,
                    status: ContractStatus::Rejected,
                });
            }

            let recipient = match role {
                Role::Buyer => quote.seller_id,
                Role::Seller => request.buyer_id,
            };
            let message = match role {
                Role::Buyer => "The customer declined your quote",
                Role::Seller => "A provider withdrew their quote",
            };

            transition.notify(NotificationEvent::new(
                NotificationKind::QuoteRejected,
                recipient,
                quote.id,
                "Quote closed",
                message,
            ))
        }

        _ => return Err(Rejection::invalid(QUOTE, status, action.name())),
    };

    Ok(transition)
}

/// Contract terms carried by a quote.
pub fn quote_terms(quote: &Quote) -> Proposal {
    Proposal {
        price: quote.price,
        start_date: quote.proposed_start_date,
        time_slot: None,
        duration: Some(quote.estimated_duration.clone()),
        notes: None,
    }
}

// ─── Service requests ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestContext<'a> {
    /// The request's current contract, if any (the newest non-rejected one).
    pub contract: Option<&'a Contract>,
}

fn request_role(request: &ServiceRequest, ctx: &RequestContext<'_>, actor: &Actor) -> Result<Role, Rejection> {
    match actor.role {
        Role::Buyer if actor.id == request.buyer_id => Ok(Role::Buyer),
        Role::Seller if ctx.contract.map(|c| c.seller_id) == Some(actor.id) => Ok(Role::Seller),
        _ => Err(Rejection::Forbidden { actor_id: actor.id }),
    }
}

/// Cancellation and execution tracking on a service request. Negotiation
/// happens on its quotes.
pub fn apply_request(
    request: &ServiceRequest,
    ctx: &RequestContext<'_>,
    action: &Action,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Transition<ServiceRequest>, Rejection> {
    let role = request_role(request, ctx, actor)?;
    let status = request.status;

    if *action == Action::MarkBuyerComplete
        && status == RequestStatus::Completed
        && request.markers.buyer_marked_complete
    {
        return Ok(Transition::unchanged(request.clone()));
    }

    if status.is_terminal() {
        return Err(Rejection::invalid(REQUEST, status, action.name()));
    }

    let mut next = request.clone();
    next.updated_at = now;

    let transition = match action {
        Action::Cancel => {
            require(role, Role::Buyer, REQUEST, action)?;
            // A request with an accepted quote is released by rejecting that quote.
            if status != RequestStatus::Open {
                return Err(Rejection::invalid(REQUEST, status, action.name()));
            }
            next.status = RequestStatus::Closed;
            Transition::to(next)
        }

        Action::MarkOnWay
        | Action::StartWork
        | Action::MarkSellerComplete { .. }
        | Action::MarkBuyerComplete => {
            if status != RequestStatus::InProgress {
                return Err(Rejection::invalid(REQUEST, status, action.name()));
            }
            let Some(milestone) = action.milestone() else {
                return Err(Rejection::invalid(REQUEST, status, action.name()));
            };

            let Some(markers) =
                advance_markers(&request.markers, ctx.contract, &milestone, role, REQUEST, now)?
            else {
                return Ok(Transition::unchanged(request.clone()));
            };
            next.markers = markers;

            if milestone == Milestone::BuyerComplete {
                next.status = RequestStatus::Completed;
                let seller_id = ctx.contract.map(|c| c.seller_id).unwrap_or_default();
                completion_effects(
                    Transition::to(next),
                    ctx.contract,
                    request.buyer_id,
                    seller_id,
                    request.id,
                )
            } else {
                let mut transition = Transition::to(next);
                if let Some(event) = milestone_event(&milestone, request.buyer_id, request.id) {
                    transition = transition.notify(event);
                }
                transition
            }
        }

        _ => return Err(Rejection::invalid(REQUEST, status, action.name())),
    };

    Ok(transition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn booking(status: BookingStatus) -> BookingRequest {
        let now = Utc::now();
        BookingRequest {
            id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            category: "electrical".into(),
            description: "Replace two sockets".into(),
            budget: Some(450.0),
            proposed_start_date: NaiveDate::from_ymd_opt(2026, 11, 2),
            time_slot: Some("morning".into()),
            schedule: FlexibleSchedule::default(),
            status,
            seller_counter_proposal: None,
            buyer_counter_proposal: None,
            revision_message: None,
            previous_price: None,
            previous_duration: None,
            markers: ExecutionMarkers::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn request(status: RequestStatus) -> ServiceRequest {
        let now = Utc::now();
        ServiceRequest {
            id: Uuid::new_v4(),
            buyer_id: Uuid::new_v4(),
            category: "painting".into(),
            description: "Two bedrooms".into(),
            budget_min: Some(200.0),
            budget_max: Some(600.0),
            preferred_start_date: None,
            schedule: FlexibleSchedule::default(),
            status,
            markers: ExecutionMarkers::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn quote(request: &ServiceRequest, status: QuoteStatus) -> Quote {
        let now = Utc::now();
        Quote {
            id: Uuid::new_v4(),
            request_id: request.id,
            seller_id: Uuid::new_v4(),
            price: 500.0,
            estimated_duration: "3 days".into(),
            proposed_start_date: None,
            proposal_text: "Two coats".into(),
            attachments: vec![],
            status,
            revision_message: None,
            previous_price: None,
            previous_duration: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn contract(unit: UnitRef, quote_id: Option<Uuid>, status: ContractStatus) -> Contract {
        let now = Utc::now();
        Contract {
            id: Uuid::new_v4(),
            unit,
            quote_id,
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            status,
            version: 1,
            metadata: ContractMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn offer(price: f64) -> Proposal {
        Proposal {
            price,
            duration: Some("2 days".into()),
            ..Default::default()
        }
    }

    #[test]
    fn booking_negotiation_round_trip() {
        let now = Utc::now();
        let b = booking(BookingStatus::Pending);
        let buyer = Actor::buyer(b.buyer_id);
        let seller = Actor::seller(b.seller_id);
        let ctx = BookingContext::default();

        let t = apply_booking(&b, &ctx, &Action::Respond(offer(500.0)), &seller, now).unwrap();
        assert_eq!(t.next.status, BookingStatus::SellerResponded);
        assert_eq!(t.events[0].recipient_id, b.buyer_id);

        let t = apply_booking(
            &t.next,
            &ctx,
            &Action::RequestRevision { message: "too expensive".into() },
            &buyer,
            now,
        )
        .unwrap();
        assert_eq!(t.next.status, BookingStatus::RevisionRequested);
        assert_eq!(t.next.previous_price, Some(500.0));
        assert_eq!(t.next.revision_message.as_deref(), Some("too expensive"));

        let t = apply_booking(&t.next, &ctx, &Action::EditResponse(offer(400.0)), &seller, now)
            .unwrap();
        assert_eq!(t.next.status, BookingStatus::SellerResponded);
        assert_eq!(t.next.seller_counter_proposal.as_ref().map(|p| p.price), Some(400.0));
        assert_eq!(t.next.previous_price, Some(500.0));
    }

    #[test]
    fn counter_then_seller_accepts_buyer_terms() {
        let now = Utc::now();
        let mut b = booking(BookingStatus::SellerResponded);
        b.seller_counter_proposal = Some(offer(500.0));
        let buyer = Actor::buyer(b.buyer_id);
        let seller = Actor::seller(b.seller_id);
        let ctx = BookingContext::default();

        let t = apply_booking(&b, &ctx, &Action::CounterPropose(offer(420.0)), &buyer, now).unwrap();
        assert_eq!(t.next.status, BookingStatus::BuyerCountered);

        let t = apply_booking(&t.next, &ctx, &Action::Accept, &seller, now).unwrap();
        assert_eq!(t.next.status, BookingStatus::Accepted);
        match &t.effects[..] {
            [SideEffect::FormContract(draft)] => {
                assert_eq!(draft.unit, UnitRef::Booking(b.id));
                assert_eq!(draft.terms.price, 420.0);
            }
            other => panic!("unexpected effects {:?}", other),
        }
    }

    #[test]
    fn booking_accept_only_from_open_negotiation_states() {
        let now = Utc::now();
        let ctx = BookingContext::default();

        for status in [BookingStatus::RevisionRequested, BookingStatus::Accepted] {
            let b = booking(status);
            let seller = Actor::seller(b.seller_id);
            let result = apply_booking(&b, &ctx, &Action::Accept, &seller, now);
            assert!(matches!(result, Err(Rejection::InvalidTransition { .. })), "{:?}", status);
        }

        // The buyer cannot accept their own pending request.
        let b = booking(BookingStatus::Pending);
        let result = apply_booking(&b, &ctx, &Action::Accept, &Actor::buyer(b.buyer_id), now);
        assert!(matches!(result, Err(Rejection::InvalidTransition { .. })));
    }

    #[test]
    fn terminal_bookings_take_no_actions() {
        let now = Utc::now();
        for status in [BookingStatus::Declined, BookingStatus::Cancelled, BookingStatus::Completed] {
            let b = booking(status);
            let seller = Actor::seller(b.seller_id);
            let result = apply_booking(&b, &BookingContext::default(), &Action::Respond(offer(10.0)), &seller, now);
            assert!(matches!(result, Err(Rejection::InvalidTransition { .. })));
        }
    }

    #[test]
    fn strangers_are_forbidden() {
        let b = booking(BookingStatus::Pending);
        let stranger = Actor::seller(Uuid::new_v4());
        let result = apply_booking(&b, &BookingContext::default(), &Action::Decline, &stranger, Utc::now());
        assert_eq!(result, Err(Rejection::Forbidden { actor_id: stranger.id }));
    }

    #[test]
    fn party_acting_for_the_other_side_is_refused() {
        let b = booking(BookingStatus::Pending);
        let buyer = Actor::buyer(b.buyer_id);
        let result = apply_booking(&b, &BookingContext::default(), &Action::Respond(offer(300.0)), &buyer, Utc::now());

        let rejection = result.unwrap_err();
        assert_eq!(
            rejection,
            Rejection::WrongRole {
                expected: Role::Seller,
                action: Action::Respond(offer(300.0)).name(),
                entity: BOOKING,
            }
        );
        assert_eq!(rejection.status_code(), axum::http::StatusCode::FORBIDDEN);
        assert_eq!(rejection.code(), "wrong_role");
    }

    #[test]
    fn negative_or_nan_price_is_refused() {
        let b = booking(BookingStatus::Pending);
        let seller = Actor::seller(b.seller_id);
        for price in [-1.0, f64::NAN, f64::INFINITY] {
            let result = apply_booking(&b, &BookingContext::default(), &Action::Respond(offer(price)), &seller, Utc::now());
            assert!(matches!(result, Err(Rejection::Validation(_))));
        }
    }

    #[test]
    fn delete_response_resets_everything() {
        let now = Utc::now();
        let mut b = booking(BookingStatus::Accepted);
        b.seller_counter_proposal = Some(offer(500.0));
        b.previous_price = Some(600.0);
        b.markers.seller_on_way_at = Some(now);
        let draft = contract(UnitRef::Booking(b.id), None, ContractStatus::PendingBuyer);
        let ctx = BookingContext { contract: Some(&draft) };

        let t = apply_booking(&b, &ctx, &Action::DeleteResponse, &Actor::seller(b.seller_id), now).unwrap();
        assert_eq!(t.next.status, BookingStatus::Pending);
        assert!(t.next.seller_counter_proposal.is_none());
        assert!(t.next.previous_price.is_none());
        assert_eq!(t.next.markers, ExecutionMarkers::default());
        assert_eq!(
            t.effects,
            vec![SideEffect::SetContractStatus {
                contract_id: draft.id,
                status: ContractStatus::Rejected
            }]
        );
    }

    #[test]
    fn delete_response_unwinds_an_executed_job() {
        let now = Utc::now();
        let mut b = booking(BookingStatus::Accepted);
        b.markers.seller_on_way_at = Some(now);
        b.markers.work_started_at = Some(now);
        b.markers.seller_marked_complete = true;
        b.markers.completion_photos = vec!["https://cdn.example.com/after.jpg".into()];
        let executed = contract(UnitRef::Booking(b.id), None, ContractStatus::Executed);
        let ctx = BookingContext { contract: Some(&executed) };

        let t = apply_booking(&b, &ctx, &Action::DeleteResponse, &Actor::seller(b.seller_id), now).unwrap();
        assert_eq!(t.next.status, BookingStatus::Pending);
        assert_eq!(t.next.markers, ExecutionMarkers::default());
        assert_eq!(
            t.effects,
            vec![SideEffect::SetContractStatus {
                contract_id: executed.id,
                status: ContractStatus::Rejected
            }]
        );

        // the buyer cannot withdraw a response, and a finished job stays finished
        let result = apply_booking(&b, &ctx, &Action::DeleteResponse, &Actor::buyer(b.buyer_id), now);
        assert!(matches!(result, Err(Rejection::WrongRole { .. })));
        let mut done = b.clone();
        done.status = BookingStatus::Completed;
        let result = apply_booking(&done, &ctx, &Action::DeleteResponse, &Actor::seller(b.seller_id), now);
        assert!(matches!(result, Err(Rejection::InvalidTransition { .. })));
    }

    #[test]
    fn execution_requires_executed_contract() {
        let now = Utc::now();
        let b = booking(BookingStatus::Accepted);
        let seller = Actor::seller(b.seller_id);

        let draft = contract(UnitRef::Booking(b.id), None, ContractStatus::PendingSeller);
        let result = apply_booking(&b, &BookingContext { contract: Some(&draft) }, &Action::MarkOnWay, &seller, now);
        assert!(matches!(result, Err(Rejection::InvalidTransition { .. })));

        let signed = contract(UnitRef::Booking(b.id), None, ContractStatus::Executed);
        let t = apply_booking(&b, &BookingContext { contract: Some(&signed) }, &Action::MarkOnWay, &seller, now)
            .unwrap();
        assert_eq!(t.next.markers.seller_on_way_at, Some(now));
    }

    #[test]
    fn dual_completion_closes_booking_and_contract() {
        let now = Utc::now();
        let b = booking(BookingStatus::Accepted);
        let buyer = Actor::buyer(b.buyer_id);
        let seller = Actor::seller(b.seller_id);
        let signed = contract(UnitRef::Booking(b.id), None, ContractStatus::Executed);
        let ctx = BookingContext { contract: Some(&signed) };

        let early = apply_booking(&b, &ctx, &Action::MarkBuyerComplete, &buyer, now);
        assert!(matches!(early, Err(Rejection::InvalidTransition { .. })));

        let no_proof = apply_booking(&b, &ctx, &Action::MarkSellerComplete { photos: vec![] }, &seller, now);
        assert_eq!(no_proof, Err(Rejection::ProofRequired));

        let t = apply_booking(
            &b,
            &ctx,
            &Action::MarkSellerComplete { photos: vec!["https://cdn.example.com/a.jpg".into()] },
            &seller,
            now,
        )
        .unwrap();
        assert_eq!(t.next.status, BookingStatus::Accepted);

        let done = apply_booking(&t.next, &ctx, &Action::MarkBuyerComplete, &buyer, now).unwrap();
        assert_eq!(done.next.status, BookingStatus::Completed);
        assert!(done.effects.contains(&SideEffect::SetContractStatus {
            contract_id: signed.id,
            status: ContractStatus::Completed
        }));
        assert!(done.effects.contains(&SideEffect::ActivateWarranty { contract_id: signed.id }));

        let again = apply_booking(&done.next, &ctx, &Action::MarkBuyerComplete, &buyer, now).unwrap();
        assert!(!again.changed);
        assert_eq!(again.next.status, BookingStatus::Completed);
    }

    #[test]
    fn quote_edit_addresses_revision() {
        let now = Utc::now();
        let r = request(RequestStatus::Open);
        let q = quote(&r, QuoteStatus::Pending);
        let ctx = QuoteContext { request: &r, quotes: std::slice::from_ref(&q), contracts: &[] };

        let t = apply_quote(
            &q,
            &ctx,
            &Action::RequestRevision { message: "Include materials".into() },
            &Actor::buyer(r.buyer_id),
            now,
        )
        .unwrap();
        assert_eq!(t.next.status, QuoteStatus::RevisionRequested);
        assert_eq!(t.next.previous_price, Some(500.0));
        assert_eq!(t.next.previous_duration.as_deref(), Some("3 days"));

        let t = apply_quote(&t.next, &ctx, &Action::EditResponse(offer(560.0)), &Actor::seller(q.seller_id), now)
            .unwrap();
        assert_eq!(t.next.status, QuoteStatus::Pending);
        assert_eq!(t.next.price, 560.0);
        assert_eq!(t.next.estimated_duration, "2 days");
        assert_eq!(t.next.previous_price, Some(500.0));
    }

    #[test]
    fn quote_edits_close_once_request_leaves_open() {
        let now = Utc::now();
        for status in [RequestStatus::InProgress, RequestStatus::Closed, RequestStatus::Completed] {
            let r = request(status);
            let q = quote(&r, QuoteStatus::Pending);
            let ctx = QuoteContext { request: &r, quotes: std::slice::from_ref(&q), contracts: &[] };

            let result = apply_quote(&q, &ctx, &Action::EditResponse(offer(450.0)), &Actor::seller(q.seller_id), now);
            assert_eq!(result, Err(Rejection::invalid(REQUEST, status, "edit a quote on")));
        }
    }

    #[test]
    fn quote_accept_guards() {
        let now = Utc::now();
        let r = request(RequestStatus::Open);
        let first = quote(&r, QuoteStatus::Accepted);
        let second = quote(&r, QuoteStatus::Pending);
        let buyer = Actor::buyer(r.buyer_id);

        let quotes = vec![first.clone(), second.clone()];
        let ctx = QuoteContext { request: &r, quotes: &quotes, contracts: &[] };
        assert_eq!(
            apply_quote(&second, &ctx, &Action::Accept, &buyer, now),
            Err(Rejection::AlreadyAccepted { request_id: r.id, quote_id: first.id })
        );

        let live = contract(UnitRef::Request(r.id), Some(first.id), ContractStatus::PendingBuyer);
        let contracts = vec![live.clone()];
        let ctx = QuoteContext { request: &r, quotes: &quotes, contracts: &contracts };
        assert_eq!(
            apply_quote(&second, &ctx, &Action::Accept, &buyer, now),
            Err(Rejection::ConflictingContract { existing_contract_id: live.id })
        );

        let closed = request(RequestStatus::Closed);
        let lone = quote(&closed, QuoteStatus::Pending);
        let ctx = QuoteContext { request: &closed, quotes: std::slice::from_ref(&lone), contracts: &[] };
        let result = apply_quote(&lone, &ctx, &Action::Accept, &Actor::buyer(closed.buyer_id), now);
        assert!(matches!(result, Err(Rejection::InvalidTransition { .. })));
    }

    #[test]
    fn own_pending_draft_does_not_block_accept() {
        let now = Utc::now();
        let r = request(RequestStatus::Open);
        let q = quote(&r, QuoteStatus::Pending);
        let draft = contract(UnitRef::Request(r.id), Some(q.id), ContractStatus::PendingBuyer);
        let contracts = vec![draft];
        let ctx = QuoteContext { request: &r, quotes: std::slice::from_ref(&q), contracts: &contracts };

        let t = apply_quote(&q, &ctx, &Action::Accept, &Actor::buyer(r.buyer_id), now).unwrap();
        assert_eq!(t.next.status, QuoteStatus::Accepted);
        assert_eq!(
            t.effects[0],
            SideEffect::SetRequestStatus { request_id: r.id, status: RequestStatus::InProgress }
        );
        assert!(matches!(t.effects[1], SideEffect::FormContract(_)));
    }

    #[test]
    fn rejecting_accepted_quote_reopens_request() {
        let now = Utc::now();
        let r = request(RequestStatus::InProgress);
        let q = quote(&r, QuoteStatus::Accepted);
        let draft = contract(UnitRef::Request(r.id), Some(q.id), ContractStatus::PendingSeller);
        let contracts = vec![draft.clone()];
        let ctx = QuoteContext { request: &r, quotes: std::slice::from_ref(&q), contracts: &contracts };

        let t = apply_quote(&q, &ctx, &Action::Reject, &Actor::buyer(r.buyer_id), now).unwrap();
        assert_eq!(t.next.status, QuoteStatus::Rejected);
        assert_eq!(
            t.effects,
            vec![
                SideEffect::SetRequestStatus { request_id: r.id, status: RequestStatus::Open },
                SideEffect::SetContractStatus { contract_id: draft.id, status: ContractStatus::Rejected },
            ]
        );

        let again = apply_quote(&t.next, &ctx, &Action::Reject, &Actor::buyer(r.buyer_id), now);
        assert!(matches!(again, Err(Rejection::InvalidTransition { .. })));
    }

    #[test]
    fn request_cancel_only_while_open() {
        let now = Utc::now();
        let r = request(RequestStatus::Open);
        let t = apply_request(&r, &RequestContext::default(), &Action::Cancel, &Actor::buyer(r.buyer_id), now)
            .unwrap();
        assert_eq!(t.next.status, RequestStatus::Closed);

        let busy = request(RequestStatus::InProgress);
        let result = apply_request(&busy, &RequestContext::default(), &Action::Cancel, &Actor::buyer(busy.buyer_id), now);
        assert!(matches!(result, Err(Rejection::InvalidTransition { .. })));
    }
}

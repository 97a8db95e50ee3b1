// service/lifecycle_service.rs
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    db::store::{EntityStore, StoreTx, Table},
    models::lifecyclemodel::*,
    service::{
        contract_service::{self, FormedContract},
        error::{Rejection, ServiceError},
        notification_service::{dispatch_all, NotificationDispatcher},
        progress::{derive_step, PhaseSignal, ProgressStep},
        transitions::{
            apply_booking, apply_quote, apply_request, validate_proposal, Action, BookingContext,
            ContractDraft, QuoteContext, RequestContext, SideEffect,
        },
    },
};

#[derive(Debug, Clone, Default)]
pub struct NewServiceRequest {
    pub category: String,
    pub description: String,
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,
    pub preferred_start_date: Option<NaiveDate>,
    pub schedule: FlexibleSchedule,
}

#[derive(Debug, Clone, Default)]
pub struct NewQuote {
    pub price: f64,
    pub estimated_duration: String,
    pub proposed_start_date: Option<NaiveDate>,
    pub proposal_text: String,
    pub attachments: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct NewBooking {
    pub seller_id: Uuid,
    pub category: String,
    pub description: String,
    pub budget: Option<f64>,
    pub proposed_start_date: Option<NaiveDate>,
    pub time_slot: Option<String>,
    pub schedule: FlexibleSchedule,
}

/// An entity after an action, with the contract that now governs it.
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome<T> {
    #[serde(flatten)]
    pub entity: T,
    pub contract: Option<Contract>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContractView {
    pub contract: Contract,
    pub terms: BindingTerms,
    pub signatures: Vec<ContractSignature>,
    pub fully_signed: bool,
    pub resolved_price: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestView {
    pub request: ServiceRequest,
    pub quotes: Vec<Quote>,
    pub contract: Option<Contract>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressView {
    pub unit: UnitRef,
    pub step: ProgressStep,
    pub step_number: u8,
    pub contract_status: Option<ContractStatus>,
    pub markers: ExecutionMarkers,
}

/// The governing contract: the newest one that has not been rejected.
fn current_contract(contracts: &[Contract]) -> Option<&Contract> {
    contracts.iter().find(|c| c.status != ContractStatus::Rejected)
}

fn require_present<T>(row: Option<T>, table: Table, id: Uuid) -> Result<T, Rejection> {
    row.ok_or(Rejection::not_found(table, id))
}

/// The booking or request a contract belongs to, locked for the transaction.
enum LockedUnit {
    Booking(BookingRequest),
    Request(ServiceRequest),
}

/// Locks the owning unit before the contract. Unit actions take the unit row
/// first and reach the contract through their effects, so every path that
/// holds both locks acquires them in the same order.
async fn lock_contract_with_unit(
    tx: &mut dyn StoreTx,
    contract_id: Uuid,
) -> Result<(Contract, BindingTerms, LockedUnit), ServiceError> {
    let unit = require_present(tx.get_contract(contract_id).await?, Table::Contracts, contract_id)?.unit;

    let locked = match unit {
        UnitRef::Booking(booking_id) => LockedUnit::Booking(require_present(
            tx.lock_booking(booking_id).await?,
            Table::BookingRequests,
            booking_id,
        )?),
        UnitRef::Request(request_id) => LockedUnit::Request(require_present(
            tx.lock_request(request_id).await?,
            Table::MaintenanceRequests,
            request_id,
        )?),
    };

    let (contract, terms) = contract_service::load_contract(tx, contract_id, true).await?;
    Ok((contract, terms, locked))
}

fn validate_amount(label: &str, amount: Option<f64>) -> Result<(), Rejection> {
    match amount {
        Some(value) if !value.is_finite() || value < 0.0 => Err(Rejection::Validation(format!(
            "{} must be a non-negative number",
            label
        ))),
        _ => Ok(()),
    }
}

fn validate_category(category: &str) -> Result<(), Rejection> {
    if category.trim().is_empty() {
        return Err(Rejection::Validation("Category is required".to_string()));
    }
    Ok(())
}

/// Terms of an accepted booking: the buyer's counter if the seller took it,
/// otherwise the seller's offer, otherwise the booking as submitted.
fn accepted_booking_terms(booking: &BookingRequest) -> Proposal {
    booking
        .buyer_counter_proposal
        .clone()
        .or_else(|| booking.seller_counter_proposal.clone())
        .unwrap_or_else(|| booking.agreed_proposal(Role::Seller))
}

fn contract_events(formed: &FormedContract) -> Vec<NotificationEvent> {
    if formed.reused {
        return Vec::new();
    }
    vec![NotificationEvent::new(
        NotificationKind::ContractAwaitingSignature,
        formed.contract.buyer_id,
        formed.contract.id,
        "Contract ready to sign",
        "Review and sign the contract to confirm the job",
    )]
}

/// Performs the writes a transition asked for, in order.
async fn apply_effects(
    tx: &mut dyn StoreTx,
    effects: &[SideEffect],
    now: DateTime<Utc>,
) -> Result<Option<FormedContract>, ServiceError> {
    let mut formed = None;

    for effect in effects {
        match effect {
            SideEffect::SetRequestStatus { request_id, status } => {
                let mut request =
                    require_present(tx.lock_request(*request_id).await?, Table::MaintenanceRequests, *request_id)?;
                request.status = *status;
                request.updated_at = now;
                tx.update_request(&request).await?;
            }
            SideEffect::SetContractStatus { contract_id, status } => {
                let mut contract =
                    require_present(tx.lock_contract(*contract_id).await?, Table::Contracts, *contract_id)?;
                contract.status = *status;
                contract.updated_at = now;
                tx.update_contract(&contract).await?;
            }
            SideEffect::FormContract(draft) => {
                formed = Some(contract_service::form_contract(tx, draft, now).await?);
            }
            SideEffect::ActivateWarranty { contract_id } => {
                if let Some(terms) = tx.get_terms(*contract_id).await? {
                    tx.update_terms(&contract_service::activate_warranty(&terms, now)).await?;
                }
            }
        }
    }

    Ok(formed)
}

#[derive(Clone)]
pub struct LifecycleService {
    store: Arc<dyn EntityStore>,
    notifier: Arc<dyn NotificationDispatcher>,
}

impl LifecycleService {
    pub fn new(store: Arc<dyn EntityStore>, notifier: Arc<dyn NotificationDispatcher>) -> Self {
        Self { store, notifier }
    }

    fn refuse<T>(&self, rejection: Rejection, what: &str, id: Uuid, actor: &Actor) -> Result<T, ServiceError> {
        tracing::warn!(
            "Refused {} {} for {} {}: {}",
            what,
            id,
            actor.role,
            actor.id,
            rejection
        );
        Err(rejection.into())
    }

    async fn notify(&self, events: &[NotificationEvent]) {
        dispatch_all(self.notifier.as_ref(), events).await;
    }

    pub async fn create_service_request(
        &self,
        actor: &Actor,
        input: NewServiceRequest,
    ) -> Result<ServiceRequest, ServiceError> {
        if actor.role != Role::Buyer {
            return Err(Rejection::wrong_role(Role::Buyer, "post", "service request").into());
        }
        validate_category(&input.category)?;
        validate_amount("Minimum budget", input.budget_min)?;
        validate_amount("Maximum budget", input.budget_max)?;
        if let (Some(min), Some(max)) = (input.budget_min, input.budget_max) {
            if min > max {
                return Err(Rejection::Validation(
                    "Minimum budget cannot exceed the maximum".to_string(),
                )
                .into());
            }
        }

        let now = Utc::now();
        let request = ServiceRequest {
            id: Uuid::new_v4(),
            buyer_id: actor.id,
            category: input.category.trim().to_string(),
            description: input.description,
            budget_min: input.budget_min,
            budget_max: input.budget_max,
            preferred_start_date: input.preferred_start_date,
            schedule: input.schedule,
            status: RequestStatus::Open,
            markers: ExecutionMarkers::default(),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.store.begin().await?;
        tx.insert_request(&request).await?;
        tx.commit().await?;

        tracing::info!("Service request {} opened by {}", request.id, actor.id);
        Ok(request)
    }

    pub async fn get_request(&self, request_id: Uuid, actor: &Actor) -> Result<RequestView, ServiceError> {
        let mut tx = self.store.begin().await?;
        let request = require_present(tx.get_request(request_id).await?, Table::MaintenanceRequests, request_id)?;
        let quotes = tx.find_quotes(request_id).await?;
        let contracts = tx.find_contracts(UnitRef::Request(request_id)).await?;

        let visible = match actor.role {
            Role::Buyer => actor.id == request.buyer_id,
            Role::Seller => request.status == RequestStatus::Open || quotes.iter().any(|q| q.seller_id == actor.id),
        };
        if !visible {
            return Err(Rejection::Forbidden { actor_id: actor.id }.into());
        }

        // Sellers only see their own quotes.
        let quotes = match actor.role {
            Role::Buyer => quotes,
            Role::Seller => quotes.into_iter().filter(|q| q.seller_id == actor.id).collect(),
        };

        Ok(RequestView {
            contract: current_contract(&contracts).cloned(),
            request,
            quotes,
        })
    }

    pub async fn submit_quote(
        &self,
        actor: &Actor,
        request_id: Uuid,
        input: NewQuote,
    ) -> Result<Quote, ServiceError> {
        if actor.role != Role::Seller {
            return Err(Rejection::wrong_role(Role::Seller, "quote on", "service request").into());
        }
        validate_proposal(&Proposal {
            price: input.price,
            ..Default::default()
        })?;

        let now = Utc::now();
        let mut tx = self.store.begin().await?;
        let request =
            require_present(tx.lock_request(request_id).await?, Table::MaintenanceRequests, request_id)?;

        if request.status != RequestStatus::Open {
            return self.refuse(
                Rejection::invalid("service request", request.status, "quote on"),
                "quote on request",
                request_id,
                actor,
            );
        }
        if request.buyer_id == actor.id {
            return Err(Rejection::Validation("You cannot quote on your own request".to_string()).into());
        }

        let quotes = tx.find_quotes(request_id).await?;
        if let Some(existing) = quotes
            .iter()
            .find(|q| q.seller_id == actor.id && !q.status.is_terminal())
        {
            return Err(Rejection::Validation(format!(
                "You already have quote {} on this request. Edit it instead",
                existing.id
            ))
            .into());
        }

        let quote = Quote {
            id: Uuid::new_v4(),
            request_id,
            seller_id: actor.id,
            price: input.price,
            estimated_duration: input.estimated_duration,
            proposed_start_date: input.proposed_start_date,
            proposal_text: input.proposal_text,
            attachments: input.attachments,
            status: QuoteStatus::Pending,
            revision_message: None,
            previous_price: None,
            previous_duration: None,
            created_at: now,
            updated_at: now,
        };
        tx.insert_quote(&quote).await?;
        tx.commit().await?;

        tracing::info!("Quote {} submitted on request {} by {}", quote.id, request_id, actor.id);
        self.notify(&[NotificationEvent::new(
            NotificationKind::QuoteSubmitted,
            request.buyer_id,
            quote.id,
            "New quote",
            format!("A provider quoted {:.2} for your {} request", quote.price, request.category),
        )])
        .await;

        Ok(quote)
    }

    pub async fn create_booking(&self, actor: &Actor, input: NewBooking) -> Result<BookingRequest, ServiceError> {
        if actor.role != Role::Buyer {
            return Err(Rejection::wrong_role(Role::Buyer, "create", "booking").into());
        }
        if input.seller_id == actor.id {
            return Err(Rejection::Validation("You cannot book yourself".to_string()).into());
        }
        validate_category(&input.category)?;
        validate_amount("Budget", input.budget)?;

        let now = Utc::now();
        let booking = BookingRequest {
            id: Uuid::new_v4(),
            buyer_id: actor.id,
            seller_id: input.seller_id,
            category: input.category.trim().to_string(),
            description: input.description,
            budget: input.budget,
            proposed_start_date: input.proposed_start_date,
            time_slot: input.time_slot,
            schedule: input.schedule,
            status: BookingStatus::Pending,
            seller_counter_proposal: None,
            buyer_counter_proposal: None,
            revision_message: None,
            previous_price: None,
            previous_duration: None,
            markers: ExecutionMarkers::default(),
            created_at: now,
            updated_at: now,
        };

        let mut tx = self.store.begin().await?;
        tx.insert_booking(&booking).await?;
        tx.commit().await?;

        tracing::info!("Booking {} created by {} for seller {}", booking.id, actor.id, booking.seller_id);
        self.notify(&[NotificationEvent::new(
            NotificationKind::BookingSubmitted,
            booking.seller_id,
            booking.id,
            "New booking request",
            format!("You have a new {} booking request", booking.category),
        )])
        .await;

        Ok(booking)
    }

    pub async fn get_booking(
        &self,
        booking_id: Uuid,
        actor: &Actor,
    ) -> Result<ActionOutcome<BookingRequest>, ServiceError> {
        let mut tx = self.store.begin().await?;
        let booking = require_present(tx.get_booking(booking_id).await?, Table::BookingRequests, booking_id)?;
        if actor.id != booking.buyer_id && actor.id != booking.seller_id {
            return Err(Rejection::Forbidden { actor_id: actor.id }.into());
        }
        let contracts = tx.find_contracts(UnitRef::Booking(booking_id)).await?;

        Ok(ActionOutcome {
            contract: current_contract(&contracts).cloned(),
            entity: booking,
        })
    }

    pub async fn booking_action(
        &self,
        booking_id: Uuid,
        action: Action,
        actor: &Actor,
    ) -> Result<ActionOutcome<BookingRequest>, ServiceError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let booking = require_present(tx.lock_booking(booking_id).await?, Table::BookingRequests, booking_id)?;
        let contracts = tx.find_contracts(UnitRef::Booking(booking_id)).await?;
        let current = current_contract(&contracts);

        let transition = match apply_booking(&booking, &BookingContext { contract: current }, &action, actor, now) {
            Ok(transition) => transition,
            Err(rejection) => return self.refuse(rejection, action.name(), booking_id, actor),
        };

        if !transition.changed {
            return Ok(ActionOutcome {
                contract: current.cloned(),
                entity: transition.next,
            });
        }

        tx.update_booking(&transition.next).await?;
        let formed = apply_effects(tx.as_mut(), &transition.effects, now).await?;
        let contract = match &formed {
            Some(formed) => Some(formed.contract.clone()),
            None => current_contract(&tx.find_contracts(UnitRef::Booking(booking_id)).await?).cloned(),
        };
        tx.commit().await?;

        tracing::info!(
            "Booking {} {} -> {} ({} by {} {})",
            booking_id,
            booking.status,
            transition.next.status,
            action.name(),
            actor.role,
            actor.id
        );

        let mut events = transition.events;
        if let Some(formed) = &formed {
            events.extend(contract_events(formed));
        }
        self.notify(&events).await;

        Ok(ActionOutcome {
            entity: transition.next,
            contract,
        })
    }

    pub async fn quote_action(
        &self,
        quote_id: Uuid,
        action: Action,
        actor: &Actor,
    ) -> Result<ActionOutcome<Quote>, ServiceError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let quote = require_present(tx.get_quote(quote_id).await?, Table::QuoteSubmissions, quote_id)?;
        // Every decision on a request's quotes serializes on the request row.
        let request = require_present(
            tx.lock_request(quote.request_id).await?,
            Table::MaintenanceRequests,
            quote.request_id,
        )?;
        let quotes = tx.find_quotes(request.id).await?;
        let contracts = tx.find_contracts(UnitRef::Request(request.id)).await?;

        let ctx = QuoteContext {
            request: &request,
            quotes: &quotes,
            contracts: &contracts,
        };
        let transition = match apply_quote(&quote, &ctx, &action, actor, now) {
            Ok(transition) => transition,
            Err(rejection) => return self.refuse(rejection, action.name(), quote_id, actor),
        };

        tx.update_quote(&transition.next).await?;
        let formed = apply_effects(tx.as_mut(), &transition.effects, now).await?;
        let contract = match &formed {
            Some(formed) => Some(formed.contract.clone()),
            None => current_contract(&tx.find_contracts(UnitRef::Request(request.id)).await?).cloned(),
        };
        tx.commit().await?;

        tracing::info!(
            "Quote {} {} -> {} ({} by {} {})",
            quote_id,
            quote.status,
            transition.next.status,
            action.name(),
            actor.role,
            actor.id
        );

        let mut events = transition.events;
        if let Some(formed) = &formed {
            events.extend(contract_events(formed));
        }
        self.notify(&events).await;

        Ok(ActionOutcome {
            entity: transition.next,
            contract,
        })
    }

    pub async fn request_action(
        &self,
        request_id: Uuid,
        action: Action,
        actor: &Actor,
    ) -> Result<ActionOutcome<ServiceRequest>, ServiceError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let request =
            require_present(tx.lock_request(request_id).await?, Table::MaintenanceRequests, request_id)?;
        let contracts = tx.find_contracts(UnitRef::Request(request_id)).await?;
        let current = current_contract(&contracts);

        let transition = match apply_request(&request, &RequestContext { contract: current }, &action, actor, now) {
            Ok(transition) => transition,
            Err(rejection) => return self.refuse(rejection, action.name(), request_id, actor),
        };

        if !transition.changed {
            return Ok(ActionOutcome {
                contract: current.cloned(),
                entity: transition.next,
            });
        }

        tx.update_request(&transition.next).await?;
        apply_effects(tx.as_mut(), &transition.effects, now).await?;
        let contract = current_contract(&tx.find_contracts(UnitRef::Request(request_id)).await?).cloned();
        tx.commit().await?;

        tracing::info!(
            "Service request {} {} -> {} ({} by {} {})",
            request_id,
            request.status,
            transition.next.status,
            action.name(),
            actor.role,
            actor.id
        );
        self.notify(&transition.events).await;

        Ok(ActionOutcome {
            entity: transition.next,
            contract,
        })
    }

    /// Returns the draft contract for an accepted quote or booking, creating
    /// it if it is missing. Repeated calls hand back the same draft.
    pub async fn form_contract(&self, unit: UnitRef, actor: &Actor) -> Result<FormedContract, ServiceError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let draft = match unit {
            UnitRef::Request(request_id) => {
                let request =
                    require_present(tx.lock_request(request_id).await?, Table::MaintenanceRequests, request_id)?;
                let quotes = tx.find_quotes(request_id).await?;
                let Some(quote) = quotes.into_iter().find(|q| q.status == QuoteStatus::Accepted) else {
                    return self.refuse(
                        Rejection::invalid("service request", "without an accepted quote", "form a contract for"),
                        "form contract for request",
                        request_id,
                        actor,
                    );
                };
                if actor.id != request.buyer_id && actor.id != quote.seller_id {
                    return Err(Rejection::Forbidden { actor_id: actor.id }.into());
                }
                ContractDraft {
                    unit,
                    quote_id: Some(quote.id),
                    buyer_id: request.buyer_id,
                    seller_id: quote.seller_id,
                    terms: crate::service::transitions::quote_terms(&quote),
                }
            }
            UnitRef::Booking(booking_id) => {
                let booking =
                    require_present(tx.lock_booking(booking_id).await?, Table::BookingRequests, booking_id)?;
                if actor.id != booking.buyer_id && actor.id != booking.seller_id {
                    return Err(Rejection::Forbidden { actor_id: actor.id }.into());
                }
                if booking.status != BookingStatus::Accepted {
                    return self.refuse(
                        Rejection::invalid("booking", booking.status, "form a contract for"),
                        "form contract for booking",
                        booking_id,
                        actor,
                    );
                }
                ContractDraft {
                    unit,
                    quote_id: None,
                    buyer_id: booking.buyer_id,
                    seller_id: booking.seller_id,
                    terms: accepted_booking_terms(&booking),
                }
            }
        };

        let formed = match contract_service::form_contract(tx.as_mut(), &draft, now).await {
            Ok(formed) => formed,
            Err(ServiceError::Rejected(rejection)) => {
                return self.refuse(rejection, "form contract for", unit.id(), actor)
            }
            Err(e) => return Err(e),
        };
        tx.commit().await?;

        tracing::info!(
            "Contract {} for {:?} (reused: {}, replaced: {:?})",
            formed.contract.id,
            unit,
            formed.reused,
            formed.replaced
        );
        self.notify(&contract_events(&formed)).await;

        Ok(formed)
    }

    pub async fn get_contract(&self, contract_id: Uuid, actor: &Actor) -> Result<ContractView, ServiceError> {
        let mut tx = self.store.begin().await?;
        let (contract, terms) = contract_service::load_contract(tx.as_mut(), contract_id, false).await?;
        if contract.party_role(actor.id).is_none() {
            return Err(Rejection::Forbidden { actor_id: actor.id }.into());
        }
        let signatures = tx.find_signatures(contract_id).await?;

        Ok(ContractView {
            fully_signed: contract_service::is_fully_signed(&contract, &signatures),
            resolved_price: contract.metadata.resolve_price(),
            contract,
            terms,
            signatures,
        })
    }

    pub async fn sign_contract(
        &self,
        contract_id: Uuid,
        actor: &Actor,
        version: i32,
    ) -> Result<ContractView, ServiceError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let (contract, terms, unit) = lock_contract_with_unit(tx.as_mut(), contract_id).await?;
        let signatures = tx.find_signatures(contract_id).await?;

        let signed = match contract_service::sign(&contract, &signatures, actor, version, now) {
            Ok(signed) => signed,
            Err(rejection) => return self.refuse(rejection, "sign contract", contract_id, actor),
        };

        tx.insert_signature(&signed.signature).await?;
        tx.update_contract(&signed.contract).await?;

        if signed.executed {
            match unit {
                LockedUnit::Booking(mut booking) => {
                    if booking.status != BookingStatus::Accepted && !booking.status.is_terminal() {
                        booking.status = BookingStatus::Accepted;
                        booking.updated_at = now;
                        tx.update_booking(&booking).await?;
                    }
                }
                LockedUnit::Request(mut request) => {
                    if request.status == RequestStatus::Open {
                        request.status = RequestStatus::InProgress;
                        request.updated_at = now;
                        tx.update_request(&request).await?;
                    }
                }
            }
        }

        let mut all_signatures = signatures;
        all_signatures.push(signed.signature.clone());
        tx.commit().await?;

        tracing::info!(
            "Contract {} v{} signed by {} {} -> {}",
            contract_id,
            version,
            actor.role,
            actor.id,
            signed.contract.status
        );

        let events = if signed.executed {
            [contract.buyer_id, contract.seller_id]
                .into_iter()
                .map(|recipient| {
                    NotificationEvent::new(
                        NotificationKind::ContractExecuted,
                        recipient,
                        contract_id,
                        "Contract signed",
                        "Both parties signed. The job is scheduled",
                    )
                })
                .collect()
        } else {
            vec![NotificationEvent::new(
                NotificationKind::ContractAwaitingSignature,
                contract.seller_id,
                contract_id,
                "Contract ready to sign",
                "The customer signed. Add your signature to confirm the job",
            )]
        };
        self.notify(&events).await;

        Ok(ContractView {
            fully_signed: contract_service::is_fully_signed(&signed.contract, &all_signatures),
            resolved_price: signed.contract.metadata.resolve_price(),
            contract: signed.contract,
            terms,
            signatures: all_signatures,
        })
    }

    /// The seller turns the contract down and the unit of work reopens.
    pub async fn reject_contract(&self, contract_id: Uuid, actor: &Actor) -> Result<Contract, ServiceError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let (contract, _, unit) = lock_contract_with_unit(tx.as_mut(), contract_id).await?;
        let rejected = match contract_service::reject(&contract, actor, now) {
            Ok(rejected) => rejected,
            Err(rejection) => return self.refuse(rejection, "reject contract", contract_id, actor),
        };
        tx.update_contract(&rejected).await?;

        match unit {
            LockedUnit::Booking(mut booking) => {
                if !booking.status.is_terminal() {
                    booking.status = BookingStatus::Pending;
                    booking.seller_counter_proposal = None;
                    booking.buyer_counter_proposal = None;
                    booking.updated_at = now;
                    tx.update_booking(&booking).await?;
                }
            }
            LockedUnit::Request(mut request) => {
                if request.status == RequestStatus::InProgress {
                    request.status = RequestStatus::Open;
                    request.updated_at = now;
                    tx.update_request(&request).await?;
                }
                if let Some(quote_id) = contract.quote_id {
                    if let Some(mut quote) = tx.get_quote(quote_id).await? {
                        if !quote.status.is_terminal() {
                            quote.status = QuoteStatus::Rejected;
                            quote.updated_at = now;
                            tx.update_quote(&quote).await?;
                        }
                    }
                }
            }
        }
        tx.commit().await?;

        tracing::info!("Contract {} rejected by seller {}", contract_id, actor.id);
        self.notify(&[NotificationEvent::new(
            NotificationKind::ContractRejected,
            contract.buyer_id,
            contract_id,
            "Contract declined",
            "The provider declined the contract. Your request is open again",
        )])
        .await;

        Ok(rejected)
    }

    pub async fn renegotiate_contract(
        &self,
        contract_id: Uuid,
        actor: &Actor,
        proposal: Proposal,
    ) -> Result<ContractView, ServiceError> {
        let now = Utc::now();
        let mut tx = self.store.begin().await?;

        let (contract, terms, _) = lock_contract_with_unit(tx.as_mut(), contract_id).await?;
        let (next, next_terms) = match contract_service::renegotiate(&contract, &terms, actor, &proposal, now) {
            Ok(renegotiated) => renegotiated,
            Err(rejection) => return self.refuse(rejection, "renegotiate contract", contract_id, actor),
        };

        tx.update_contract(&next).await?;
        tx.update_terms(&next_terms).await?;
        let signatures = tx.find_signatures(contract_id).await?;
        tx.commit().await?;

        tracing::info!(
            "Contract {} renegotiated to v{} by {} {}",
            contract_id,
            next.version,
            actor.role,
            actor.id
        );

        let counterparty = match actor.role {
            Role::Buyer => contract.seller_id,
            Role::Seller => contract.buyer_id,
        };
        self.notify(&[NotificationEvent::new(
            NotificationKind::ContractRenegotiated,
            counterparty,
            contract_id,
            "Contract terms changed",
            format!("New terms were proposed at {:.2}. Both parties need to sign again", proposal.price),
        )])
        .await;

        Ok(ContractView {
            fully_signed: contract_service::is_fully_signed(&next, &signatures),
            resolved_price: next.metadata.resolve_price(),
            contract: next,
            terms: next_terms,
            signatures,
        })
    }

    pub async fn progress(&self, unit: UnitRef, actor: &Actor) -> Result<ProgressView, ServiceError> {
        let mut tx = self.store.begin().await?;
        let contracts = tx.find_contracts(unit).await?;
        let contract = current_contract(&contracts);
        let contract_status = contract.map(|c| c.status);
        let contract_party = contract.map(|c| c.party_role(actor.id).is_some()).unwrap_or(false);

        let (markers, signal, party) = match unit {
            UnitRef::Request(id) => {
                let request = require_present(tx.get_request(id).await?, Table::MaintenanceRequests, id)?;
                let party = actor.id == request.buyer_id || contract_party;
                (
                    request.markers,
                    PhaseSignal::for_request(request.status, contract_status),
                    party,
                )
            }
            UnitRef::Booking(id) => {
                let booking = require_present(tx.get_booking(id).await?, Table::BookingRequests, id)?;
                let party = actor.id == booking.buyer_id || actor.id == booking.seller_id;
                (
                    booking.markers,
                    PhaseSignal::for_booking(booking.status, contract_status),
                    party,
                )
            }
        };

        if !party {
            return Err(Rejection::Forbidden { actor_id: actor.id }.into());
        }

        let step = derive_step(&markers, signal);
        Ok(ProgressView {
            unit,
            step,
            step_number: step.number(),
            contract_status,
            markers,
        })
    }
}

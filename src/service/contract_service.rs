// service/contract_service.rs
use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::{
    db::store::{StoreTx, Table},
    models::lifecyclemodel::*,
    service::{
        error::{Rejection, ServiceError},
        transitions::{validate_proposal, ContractDraft},
    },
};

pub const DEFAULT_DURATION_DAYS: i64 = 7;
pub const WARRANTY_DAYS: i32 = 90;

const CONTRACT: &str = "contract";

fn first_integer() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[0-9]+").ok()).as_ref()
}

/// Days of work in a free-text duration such as "3 days" or "2-3 days".
///
/// Takes the first integer in the text and reads it as days; anything
/// without one (or a zero) falls back to [`DEFAULT_DURATION_DAYS`].
/// "2-3 days" is 2.
pub fn parse_duration_days(text: &str) -> i64 {
    first_integer()
        .and_then(|re| re.find(text))
        .and_then(|m| m.as_str().parse::<i64>().ok())
        .filter(|days| *days > 0)
        .unwrap_or(DEFAULT_DURATION_DAYS)
}

pub fn contract_metadata(terms: &Proposal) -> ContractMetadata {
    let duration_days = terms
        .duration
        .as_deref()
        .map(parse_duration_days)
        .unwrap_or(DEFAULT_DURATION_DAYS);

    ContractMetadata {
        price: Some(terms.price),
        final_amount: None,
        final_agreed_price: Some(terms.price),
        deposit_amount: None,
        start_date: terms.start_date,
        time_slot: terms.time_slot.clone(),
        estimated_duration: terms.duration.clone(),
        duration_days,
        notes: terms.notes.clone(),
    }
}

/// Start on the agreed date (or `today`), finish `duration_days` later, and
/// cover the work for [`WARRANTY_DAYS`] after that.
pub fn derive_binding_terms(contract_id: Uuid, metadata: &ContractMetadata, today: NaiveDate) -> BindingTerms {
    let start_date = metadata.start_date.unwrap_or(today);
    let completion_date = start_date + Duration::days(metadata.duration_days);

    BindingTerms {
        id: Uuid::new_v4(),
        contract_id,
        start_date,
        completion_date,
        warranty_days: WARRANTY_DAYS,
        warranty_ends_on: completion_date + Duration::days(WARRANTY_DAYS as i64),
        warranty_activated_at: None,
    }
}

#[derive(Debug, Clone)]
pub struct FormedContract {
    pub contract: Contract,
    pub terms: BindingTerms,
    /// An existing draft for the same quote was returned as is.
    pub reused: bool,
    /// A draft for a different quote that was discarded.
    pub replaced: Option<Uuid>,
}

/// Creates the contract for an agreed unit of work, or returns the draft
/// that already exists for it.
///
/// Must run inside the same unit of work as the accept that triggered it.
/// The caller holds the lock on the request or booking row.
pub async fn form_contract(
    tx: &mut dyn StoreTx,
    draft: &ContractDraft,
    now: DateTime<Utc>,
) -> Result<FormedContract, ServiceError> {
    validate_proposal(&draft.terms)?;

    let existing = tx
        .find_contracts(draft.unit)
        .await?
        .into_iter()
        .find(|contract| contract.status.is_active());

    let mut replaced = None;

    if let Some(existing) = existing {
        if existing.status != ContractStatus::PendingBuyer {
            return Err(Rejection::ActiveContractExists {
                existing_contract_id: existing.id,
            }
            .into());
        }

        if existing.quote_id == draft.quote_id {
            let terms = match tx.get_terms(existing.id).await? {
                Some(terms) => terms,
                None => {
                    let terms = derive_binding_terms(existing.id, &existing.metadata, now.date_naive());
                    tx.insert_terms(&terms).await?;
                    terms
                }
            };

            return Ok(FormedContract {
                contract: existing,
                terms,
                reused: true,
                replaced: None,
            });
        }

        tracing::info!(
            "Discarding draft contract {} for {:?}: quote switched to {:?}",
            existing.id,
            draft.unit,
            draft.quote_id
        );
        tx.delete_contract(existing.id).await?;
        replaced = Some(existing.id);
    }

    let contract = Contract {
        id: Uuid::new_v4(),
        unit: draft.unit,
        quote_id: draft.quote_id,
        buyer_id: draft.buyer_id,
        seller_id: draft.seller_id,
        status: ContractStatus::PendingBuyer,
        version: 1,
        metadata: contract_metadata(&draft.terms),
        created_at: now,
        updated_at: now,
    };
    let terms = derive_binding_terms(contract.id, &contract.metadata, now.date_naive());

    tx.insert_contract(&contract).await?;
    tx.insert_terms(&terms).await?;

    Ok(FormedContract {
        contract,
        terms,
        reused: false,
        replaced,
    })
}

fn contract_role(contract: &Contract, actor: &Actor) -> Result<Role, Rejection> {
    match contract.party_role(actor.id) {
        Some(role) if role == actor.role => Ok(role),
        _ => Err(Rejection::Forbidden { actor_id: actor.id }),
    }
}

/// Both parties have signed the contract's current version.
pub fn is_fully_signed(contract: &Contract, signatures: &[ContractSignature]) -> bool {
    let signed = |role: Role, user_id: Uuid| {
        signatures
            .iter()
            .any(|s| s.role == role && s.user_id == user_id && s.version == contract.version)
    };
    signed(Role::Buyer, contract.buyer_id) && signed(Role::Seller, contract.seller_id)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signed {
    pub contract: Contract,
    pub signature: ContractSignature,
    pub executed: bool,
}

/// Buyer signs first, then the seller. The submitted version must be the
/// contract's current one; a renegotiation in between makes it stale.
pub fn sign(
    contract: &Contract,
    signatures: &[ContractSignature],
    actor: &Actor,
    version: i32,
    now: DateTime<Utc>,
) -> Result<Signed, Rejection> {
    let role = contract_role(contract, actor)?;

    if version != contract.version {
        return Err(Rejection::StaleSignatureVersion {
            submitted: version,
            current: contract.version,
        });
    }

    let mut next = contract.clone();
    next.updated_at = now;

    match (role, contract.status) {
        (Role::Buyer, ContractStatus::PendingBuyer) => {
            next.status = ContractStatus::PendingSeller;
        }
        (Role::Seller, ContractStatus::PendingSeller) => {
            let buyer_signed = signatures.iter().any(|s| {
                s.role == Role::Buyer && s.user_id == contract.buyer_id && s.version == contract.version
            });
            if !buyer_signed {
                return Err(Rejection::invalid(CONTRACT, "missing the buyer's signature", "sign"));
            }
            next.status = ContractStatus::Executed;
        }
        (_, status) => return Err(Rejection::invalid(CONTRACT, status, "sign")),
    }

    let signature = ContractSignature {
        id: Uuid::new_v4(),
        contract_id: contract.id,
        user_id: actor.id,
        role,
        version,
        signed_at: now,
    };

    Ok(Signed {
        executed: next.status == ContractStatus::Executed,
        contract: next,
        signature,
    })
}

/// Seller turns down a contract that is not yet executed.
pub fn reject(contract: &Contract, actor: &Actor, now: DateTime<Utc>) -> Result<Contract, Rejection> {
    let role = contract_role(contract, actor)?;
    if role != Role::Seller {
        return Err(Rejection::wrong_role(Role::Seller, "reject", CONTRACT));
    }
    if !matches!(contract.status, ContractStatus::PendingBuyer | ContractStatus::PendingSeller) {
        return Err(Rejection::invalid(CONTRACT, contract.status, "reject"));
    }

    let mut next = contract.clone();
    next.status = ContractStatus::Rejected;
    next.updated_at = now;
    Ok(next)
}

/// New terms on a contract that is awaiting the seller or already executed.
/// The version moves forward and both parties sign again.
pub fn renegotiate(
    contract: &Contract,
    terms: &BindingTerms,
    actor: &Actor,
    proposal: &Proposal,
    now: DateTime<Utc>,
) -> Result<(Contract, BindingTerms), Rejection> {
    contract_role(contract, actor)?;
    if !matches!(contract.status, ContractStatus::PendingSeller | ContractStatus::Executed) {
        return Err(Rejection::invalid(CONTRACT, contract.status, "renegotiate"));
    }
    validate_proposal(proposal)?;

    let mut metadata = contract_metadata(proposal);
    metadata.deposit_amount = contract.metadata.deposit_amount;

    let mut next = contract.clone();
    next.version += 1;
    next.status = ContractStatus::PendingBuyer;
    next.metadata = metadata;
    next.updated_at = now;

    let derived = derive_binding_terms(contract.id, &next.metadata, now.date_naive());
    let next_terms = BindingTerms {
        id: terms.id,
        ..derived
    };

    Ok((next, next_terms))
}

/// Starts the warranty clock from the day both parties confirmed completion.
/// Activating twice keeps the first date.
pub fn activate_warranty(terms: &BindingTerms, now: DateTime<Utc>) -> BindingTerms {
    let mut next = terms.clone();
    if next.warranty_activated_at.is_none() {
        next.warranty_activated_at = Some(now);
        next.warranty_ends_on = now.date_naive() + Duration::days(next.warranty_days as i64);
    }
    next
}

/// Loads a contract and its binding terms, failing if either is missing.
pub async fn load_contract(
    tx: &mut dyn StoreTx,
    contract_id: Uuid,
    lock: bool,
) -> Result<(Contract, BindingTerms), ServiceError> {
    let contract = if lock {
        tx.lock_contract(contract_id).await?
    } else {
        tx.get_contract(contract_id).await?
    }
    .ok_or(Rejection::not_found(Table::Contracts, contract_id))?;

    let terms = tx
        .get_terms(contract_id)
        .await?
        .ok_or(Rejection::not_found(Table::BindingTerms, contract_id))?;

    Ok((contract, terms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memstore::MemoryStore;
    use crate::db::store::EntityStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn draft(unit: UnitRef, quote_id: Option<Uuid>) -> ContractDraft {
        ContractDraft {
            unit,
            quote_id,
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            terms: Proposal {
                price: 500.0,
                start_date: Some(date(2026, 11, 2)),
                duration: Some("3 days".into()),
                ..Default::default()
            },
        }
    }

    fn contract(status: ContractStatus) -> Contract {
        let now = Utc::now();
        Contract {
            id: Uuid::new_v4(),
            unit: UnitRef::Booking(Uuid::new_v4()),
            quote_id: None,
            buyer_id: Uuid::new_v4(),
            seller_id: Uuid::new_v4(),
            status,
            version: 1,
            metadata: contract_metadata(&Proposal { price: 300.0, ..Default::default() }),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn duration_takes_first_integer() {
        assert_eq!(parse_duration_days("3 days"), 3);
        assert_eq!(parse_duration_days("2-3 days"), 2);
        assert_eq!(parse_duration_days("about 10"), 10);
        assert_eq!(parse_duration_days("not specified"), DEFAULT_DURATION_DAYS);
        assert_eq!(parse_duration_days(""), DEFAULT_DURATION_DAYS);
        assert_eq!(parse_duration_days("0 days"), DEFAULT_DURATION_DAYS);
    }

    #[test]
    fn binding_terms_dates() {
        let metadata = contract_metadata(&Proposal {
            price: 100.0,
            start_date: Some(date(2026, 11, 2)),
            duration: Some("3 days".into()),
            ..Default::default()
        });
        let terms = derive_binding_terms(Uuid::new_v4(), &metadata, date(2026, 10, 18));
        assert_eq!(terms.start_date, date(2026, 11, 2));
        assert_eq!(terms.completion_date, date(2026, 11, 5));
        assert_eq!(terms.warranty_ends_on, date(2027, 2, 3));

        let undated = contract_metadata(&Proposal { price: 100.0, ..Default::default() });
        let terms = derive_binding_terms(Uuid::new_v4(), &undated, date(2026, 10, 18));
        assert_eq!(terms.start_date, date(2026, 10, 18));
        assert_eq!(terms.completion_date, date(2026, 10, 25));
    }

    #[test]
    fn signing_order_and_versions() {
        let now = Utc::now();
        let c = contract(ContractStatus::PendingBuyer);
        let buyer = Actor::buyer(c.buyer_id);
        let seller = Actor::seller(c.seller_id);

        let early = sign(&c, &[], &seller, 1, now);
        assert!(matches!(early, Err(Rejection::InvalidTransition { .. })));

        let stale = sign(&c, &[], &buyer, 0, now);
        assert_eq!(stale, Err(Rejection::StaleSignatureVersion { submitted: 0, current: 1 }));

        let first = sign(&c, &[], &buyer, 1, now).unwrap();
        assert_eq!(first.contract.status, ContractStatus::PendingSeller);
        assert!(!first.executed);

        let signatures = vec![first.signature.clone()];
        let second = sign(&first.contract, &signatures, &seller, 1, now).unwrap();
        assert!(second.executed);
        assert_eq!(second.contract.status, ContractStatus::Executed);

        let all = vec![first.signature, second.signature];
        assert!(is_fully_signed(&second.contract, &all));
    }

    #[test]
    fn renegotiation_invalidates_signatures() {
        let now = Utc::now();
        let c = contract(ContractStatus::PendingBuyer);
        let buyer = Actor::buyer(c.buyer_id);
        let seller = Actor::seller(c.seller_id);

        let first = sign(&c, &[], &buyer, 1, now).unwrap();
        let second = sign(&first.contract, &[first.signature.clone()], &seller, 1, now).unwrap();
        let signatures = vec![first.signature, second.signature];

        let terms = derive_binding_terms(c.id, &c.metadata, now.date_naive());
        let offer = Proposal { price: 350.0, duration: Some("4 days".into()), ..Default::default() };
        let (bumped, new_terms) = renegotiate(&second.contract, &terms, &seller, &offer, now).unwrap();

        assert_eq!(bumped.version, 2);
        assert_eq!(bumped.status, ContractStatus::PendingBuyer);
        assert_eq!(bumped.metadata.resolve_price(), Some(350.0));
        assert_eq!(new_terms.id, terms.id);
        assert!(!is_fully_signed(&bumped, &signatures));

        let stale = sign(&bumped, &signatures, &buyer, 1, now);
        assert_eq!(stale, Err(Rejection::StaleSignatureVersion { submitted: 1, current: 2 }));
    }

    #[test]
    fn only_seller_rejects_unexecuted_contracts() {
        let now = Utc::now();
        let c = contract(ContractStatus::PendingSeller);
        assert!(matches!(
            reject(&c, &Actor::buyer(c.buyer_id), now),
            Err(Rejection::WrongRole { expected: Role::Seller, .. })
        ));
        assert_eq!(
            reject(&c, &Actor::seller(c.seller_id), now).unwrap().status,
            ContractStatus::Rejected
        );

        let executed = contract(ContractStatus::Executed);
        assert!(matches!(
            reject(&executed, &Actor::seller(executed.seller_id), now),
            Err(Rejection::InvalidTransition { .. })
        ));

        assert!(matches!(
            reject(&c, &Actor::seller(Uuid::new_v4()), now),
            Err(Rejection::Forbidden { .. })
        ));
    }

    #[test]
    fn warranty_activates_once() {
        let first = Utc::now();
        let terms = derive_binding_terms(Uuid::new_v4(), &ContractMetadata::default(), first.date_naive());
        let active = activate_warranty(&terms, first);
        assert_eq!(active.warranty_activated_at, Some(first));
        assert_eq!(active.warranty_ends_on, first.date_naive() + Duration::days(90));

        let later = first + Duration::days(3);
        assert_eq!(activate_warranty(&active, later), active);
    }

    #[tokio::test]
    async fn forming_twice_reuses_the_draft() {
        let store = MemoryStore::default();
        let request_id = Uuid::new_v4();
        let d = draft(UnitRef::Request(request_id), Some(Uuid::new_v4()));

        let mut tx = store.begin().await.unwrap();
        let first = form_contract(tx.as_mut(), &d, Utc::now()).await.unwrap();
        let second = form_contract(tx.as_mut(), &d, Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(first.contract.id, second.contract.id);
        assert_eq!(first.terms.completion_date, date(2026, 11, 5));
    }

    #[tokio::test]
    async fn switching_quotes_replaces_the_draft() {
        let store = MemoryStore::default();
        let unit = UnitRef::Request(Uuid::new_v4());
        let for_a = draft(unit, Some(Uuid::new_v4()));
        let for_b = ContractDraft { quote_id: Some(Uuid::new_v4()), ..for_a.clone() };

        let mut tx = store.begin().await.unwrap();
        let a = form_contract(tx.as_mut(), &for_a, Utc::now()).await.unwrap();
        let b = form_contract(tx.as_mut(), &for_b, Utc::now()).await.unwrap();

        assert_ne!(a.contract.id, b.contract.id);
        assert_eq!(b.replaced, Some(a.contract.id));
        assert!(tx.get_contract(a.contract.id).await.unwrap().is_none());
        assert!(tx.get_terms(a.contract.id).await.unwrap().is_none());

        let live: Vec<_> = tx
            .find_contracts(unit)
            .await
            .unwrap()
            .into_iter()
            .filter(|c| c.status.is_active())
            .collect();
        assert_eq!(live.len(), 1);
    }

    #[tokio::test]
    async fn signed_contract_blocks_new_formation() {
        let store = MemoryStore::default();
        let unit = UnitRef::Booking(Uuid::new_v4());
        let d = draft(unit, None);

        let mut tx = store.begin().await.unwrap();
        let formed = form_contract(tx.as_mut(), &d, Utc::now()).await.unwrap();
        let mut signed = formed.contract.clone();
        signed.status = ContractStatus::PendingSeller;
        tx.update_contract(&signed).await.unwrap();

        let result = form_contract(tx.as_mut(), &d, Utc::now()).await;
        match result {
            Err(ServiceError::Rejected(Rejection::ActiveContractExists { existing_contract_id })) => {
                assert_eq!(existing_contract_id, formed.contract.id)
            }
            other => panic!("unexpected {:?}", other.map(|f| f.contract.id)),
        }
    }

    #[tokio::test]
    async fn terminal_contracts_do_not_block() {
        let store = MemoryStore::default();
        let unit = UnitRef::Booking(Uuid::new_v4());
        let d = draft(unit, None);

        let mut tx = store.begin().await.unwrap();
        let formed = form_contract(tx.as_mut(), &d, Utc::now()).await.unwrap();
        let mut rejected = formed.contract.clone();
        rejected.status = ContractStatus::Rejected;
        tx.update_contract(&rejected).await.unwrap();

        let fresh = form_contract(tx.as_mut(), &d, Utc::now()).await.unwrap();
        assert_ne!(fresh.contract.id, formed.contract.id);
        assert_eq!(fresh.replaced, None);
    }
}

// service/progress.rs
//! Execution progress for an active job.
//!
//! Seller and buyer each assert their own milestones; the displayed step is
//! always derived from those markers and never stored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    models::lifecyclemodel::*,
    service::error::Rejection,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStep {
    Pending = 1,
    Scheduled = 2,
    OnTheWay = 3,
    Started = 4,
    SellerConfirmed = 5,
    BuyerConfirmed = 6,
}

impl ProgressStep {
    pub fn number(&self) -> u8 {
        *self as u8
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStep::BuyerConfirmed)
    }
}

/// What the owning entity's status says about scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseSignal {
    Completed,
    Scheduled,
    Unscheduled,
}

impl PhaseSignal {
    pub fn for_request(status: RequestStatus, contract: Option<ContractStatus>) -> Self {
        match (status, contract) {
            (RequestStatus::Completed, _) | (_, Some(ContractStatus::Completed)) => {
                PhaseSignal::Completed
            }
            (RequestStatus::InProgress, _) | (_, Some(ContractStatus::Executed)) => {
                PhaseSignal::Scheduled
            }
            _ => PhaseSignal::Unscheduled,
        }
    }

    /// Bookings have no `in_progress` status; an executed contract is what
    /// schedules them.
    pub fn for_booking(status: BookingStatus, contract: Option<ContractStatus>) -> Self {
        match (status, contract) {
            (BookingStatus::Completed, _) | (_, Some(ContractStatus::Completed)) => {
                PhaseSignal::Completed
            }
            (_, Some(ContractStatus::Executed)) => PhaseSignal::Scheduled,
            _ => PhaseSignal::Unscheduled,
        }
    }
}

/// First match wins, checked from the end state backward. Markers are not
/// guaranteed to arrive in order, so the precedence must not change.
pub fn derive_step(markers: &ExecutionMarkers, signal: PhaseSignal) -> ProgressStep {
    if markers.buyer_marked_complete || signal == PhaseSignal::Completed {
        ProgressStep::BuyerConfirmed
    } else if markers.seller_marked_complete {
        ProgressStep::SellerConfirmed
    } else if markers.work_started_at.is_some() {
        ProgressStep::Started
    } else if markers.seller_on_way_at.is_some() {
        ProgressStep::OnTheWay
    } else if signal == PhaseSignal::Scheduled {
        ProgressStep::Scheduled
    } else {
        ProgressStep::Pending
    }
}

/// Execution milestone asserted by one of the parties.
#[derive(Debug, Clone, PartialEq)]
pub enum Milestone {
    OnTheWay,
    Started,
    SellerComplete { photos: Vec<String> },
    BuyerComplete,
}

impl Milestone {
    pub fn name(&self) -> &'static str {
        match self {
            Milestone::OnTheWay => "mark on the way",
            Milestone::Started => "start work on",
            Milestone::SellerComplete { .. } => "mark complete (seller)",
            Milestone::BuyerComplete => "confirm completion of",
        }
    }

    pub fn asserted_by(&self) -> Role {
        match self {
            Milestone::BuyerComplete => Role::Buyer,
            _ => Role::Seller,
        }
    }
}

/// Applies a milestone to the markers.
///
/// Markers never move backward: re-asserting a milestone that is already set
/// returns the markers unchanged.
pub fn record_milestone(
    markers: &ExecutionMarkers,
    milestone: &Milestone,
    role: Role,
    entity: &'static str,
    now: DateTime<Utc>,
) -> Result<ExecutionMarkers, Rejection> {
    if role != milestone.asserted_by() {
        return Err(Rejection::wrong_role(milestone.asserted_by(), milestone.name(), entity));
    }

    let mut next = markers.clone();

    match milestone {
        Milestone::OnTheWay => {
            if markers.seller_marked_complete {
                return Err(Rejection::invalid(entity, "marked complete", "mark on the way"));
            }
            next.seller_on_way_at.get_or_insert(now);
        }
        Milestone::Started => {
            if markers.seller_marked_complete {
                return Err(Rejection::invalid(entity, "marked complete", "start work on"));
            }
            next.work_started_at.get_or_insert(now);
        }
        Milestone::SellerComplete { photos } => {
            if markers.seller_marked_complete {
                return Ok(next);
            }

            let photos: Vec<String> = photos
                .iter()
                .map(|url| url.trim())
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect();

            if photos.is_empty() {
                return Err(Rejection::ProofRequired);
            }

            next.seller_marked_complete = true;
            next.seller_completed_at = Some(now);
            next.completion_photos = photos;
        }
        Milestone::BuyerComplete => {
            if !markers.seller_marked_complete {
                return Err(Rejection::invalid(
                    entity,
                    "awaiting the seller's completion",
                    "confirm completion of",
                ));
            }
            if !markers.buyer_marked_complete {
                next.buyer_marked_complete = true;
                next.buyer_completed_at = Some(now);
            }
        }
    }

    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photos() -> Vec<String> {
        vec!["https://cdn.example.com/done-1.jpg".to_string()]
    }

    #[test]
    fn step_follows_markers_in_order() {
        let now = Utc::now();
        let mut markers = ExecutionMarkers::default();
        let mut steps = vec![derive_step(&markers, PhaseSignal::Scheduled)];

        for milestone in [
            Milestone::OnTheWay,
            Milestone::Started,
            Milestone::SellerComplete { photos: photos() },
            Milestone::BuyerComplete,
        ] {
            markers = record_milestone(&markers, &milestone, milestone.asserted_by(), "booking", now)
                .unwrap();
            steps.push(derive_step(&markers, PhaseSignal::Scheduled));
        }

        let numbers: Vec<u8> = steps.iter().map(ProgressStep::number).collect();
        assert_eq!(numbers, vec![2, 3, 4, 5, 6]);
        assert!(steps.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn precedence_checks_from_the_end_backward() {
        let now = Utc::now();
        let markers = ExecutionMarkers {
            seller_marked_complete: true,
            ..Default::default()
        };
        // Seller completion without an on-the-way or start timestamp.
        assert_eq!(derive_step(&markers, PhaseSignal::Unscheduled), ProgressStep::SellerConfirmed);

        let markers = ExecutionMarkers {
            work_started_at: Some(now),
            ..Default::default()
        };
        assert_eq!(derive_step(&markers, PhaseSignal::Unscheduled), ProgressStep::Started);

        // Completed status wins even with no markers at all.
        assert_eq!(
            derive_step(&ExecutionMarkers::default(), PhaseSignal::Completed),
            ProgressStep::BuyerConfirmed
        );
        assert_eq!(
            derive_step(&ExecutionMarkers::default(), PhaseSignal::Unscheduled),
            ProgressStep::Pending
        );
    }

    #[test]
    fn executed_contract_schedules_without_on_way() {
        let signal = PhaseSignal::for_booking(BookingStatus::Accepted, Some(ContractStatus::Executed));
        assert_eq!(derive_step(&ExecutionMarkers::default(), signal), ProgressStep::Scheduled);

        let signal = PhaseSignal::for_booking(BookingStatus::Accepted, Some(ContractStatus::PendingBuyer));
        assert_eq!(derive_step(&ExecutionMarkers::default(), signal), ProgressStep::Pending);

        let signal = PhaseSignal::for_request(RequestStatus::InProgress, None);
        assert_eq!(signal, PhaseSignal::Scheduled);
    }

    #[test]
    fn seller_completion_requires_photos() {
        let now = Utc::now();
        let markers = ExecutionMarkers::default();

        let missing = record_milestone(
            &markers,
            &Milestone::SellerComplete { photos: vec![] },
            Role::Seller,
            "booking",
            now,
        );
        assert_eq!(missing, Err(Rejection::ProofRequired));

        let blank = record_milestone(
            &markers,
            &Milestone::SellerComplete { photos: vec!["  ".to_string()] },
            Role::Seller,
            "booking",
            now,
        );
        assert_eq!(blank, Err(Rejection::ProofRequired));
    }

    #[test]
    fn buyer_cannot_complete_first() {
        let result = record_milestone(
            &ExecutionMarkers::default(),
            &Milestone::BuyerComplete,
            Role::Buyer,
            "booking",
            Utc::now(),
        );
        assert!(matches!(result, Err(Rejection::InvalidTransition { .. })));
    }

    #[test]
    fn milestones_are_monotonic() {
        let first = Utc::now();
        let later = first + chrono::Duration::hours(2);

        let markers = record_milestone(
            &ExecutionMarkers::default(),
            &Milestone::OnTheWay,
            Role::Seller,
            "booking",
            first,
        )
        .unwrap();
        let again = record_milestone(&markers, &Milestone::OnTheWay, Role::Seller, "booking", later)
            .unwrap();
        assert_eq!(again.seller_on_way_at, Some(first));

        let done = record_milestone(
            &again,
            &Milestone::SellerComplete { photos: photos() },
            Role::Seller,
            "booking",
            later,
        )
        .unwrap();
        let resubmitted = record_milestone(
            &done,
            &Milestone::SellerComplete { photos: vec!["https://cdn.example.com/other.jpg".into()] },
            Role::Seller,
            "booking",
            later,
        )
        .unwrap();
        assert_eq!(resubmitted.completion_photos, photos());
    }

    #[test]
    fn wrong_party_is_refused() {
        let result = record_milestone(
            &ExecutionMarkers::default(),
            &Milestone::Started,
            Role::Buyer,
            "booking",
            Utc::now(),
        );
        assert_eq!(
            result,
            Err(Rejection::WrongRole {
                expected: Role::Seller,
                action: "start work on",
                entity: "booking",
            })
        );
    }
}

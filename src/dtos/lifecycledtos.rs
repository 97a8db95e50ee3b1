// dtos/lifecycledtos.rs
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::{
    models::lifecyclemodel::{FlexibleSchedule, Proposal},
    service::lifecycle_service::{NewBooking, NewQuote, NewServiceRequest},
};

/// Prices arrive from forms as numbers or as text such as "₦1,500" or with
/// Arabic-Indic digits. Both shapes are accepted and normalised here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PriceInput {
    Number(f64),
    Text(String),
}

impl PriceInput {
    pub fn amount(&self) -> Result<f64, String> {
        let value = match self {
            PriceInput::Number(value) => Some(*value),
            PriceInput::Text(text) => parse_price(text),
        };

        match value {
            Some(value) if value.is_finite() && value >= 0.0 => Ok(value),
            Some(_) => Err("Price must be a non-negative number".to_string()),
            None => Err("Price is not a valid amount".to_string()),
        }
    }
}

fn ascii_digit(c: char) -> Option<char> {
    let offset = match c {
        '0'..='9' => return Some(c),
        '\u{0660}'..='\u{0669}' => c as u32 - 0x0660,
        '\u{06F0}'..='\u{06F9}' => c as u32 - 0x06F0,
        _ => return None,
    };
    char::from_digit(offset, 10)
}

/// Strips currency symbols, spaces and thousands separators. Returns `None`
/// when nothing numeric is left or the text is ambiguous: a range such as
/// "500-600", a second decimal point, or a comma after the decimal point
/// ("1.500,00").
pub fn parse_price(text: &str) -> Option<f64> {
    let mut cleaned = String::with_capacity(text.len());
    let mut seen_point = false;

    for c in text.trim().chars() {
        if let Some(digit) = ascii_digit(c) {
            cleaned.push(digit);
        } else if c == '.' || c == '\u{066B}' {
            if seen_point {
                return None;
            }
            seen_point = true;
            cleaned.push('.');
        } else if c == ',' || c == '\u{066C}' {
            if seen_point {
                return None;
            }
        } else if c == '-' {
            if !cleaned.is_empty() {
                return None;
            }
            cleaned.push('-');
        }
        // currency symbols and whitespace fall through
    }

    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

fn optional_amount(input: &Option<PriceInput>) -> Result<Option<f64>, String> {
    input.as_ref().map(PriceInput::amount).transpose()
}

/// New writes keep flexibility as booleans; any legacy tokens typed into the
/// description are lifted out into the flags.
fn schedule_and_description(
    description: Option<&str>,
    flexible_date: Option<bool>,
    flexible_time: Option<bool>,
) -> (FlexibleSchedule, String) {
    let (legacy, description) = FlexibleSchedule::from_legacy(description.unwrap_or_default());
    let explicit = FlexibleSchedule {
        flexible_date: flexible_date.unwrap_or(false),
        flexible_time: flexible_time.unwrap_or(false),
    };
    (explicit.merge(legacy), description)
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct CreateServiceRequestDto {
    #[validate(length(min = 1, max = 100, message = "Category is required"))]
    pub category: String,
    #[validate(length(max = 5000, message = "Description is too long"))]
    pub description: Option<String>,
    pub budget_min: Option<PriceInput>,
    pub budget_max: Option<PriceInput>,
    pub preferred_start_date: Option<NaiveDate>,
    pub flexible_date: Option<bool>,
    pub flexible_time: Option<bool>,
}

impl CreateServiceRequestDto {
    pub fn into_new(self) -> Result<NewServiceRequest, String> {
        let (schedule, description) =
            schedule_and_description(self.description.as_deref(), self.flexible_date, self.flexible_time);

        Ok(NewServiceRequest {
            category: self.category,
            description,
            budget_min: optional_amount(&self.budget_min)?,
            budget_max: optional_amount(&self.budget_max)?,
            preferred_start_date: self.preferred_start_date,
            schedule,
        })
    }
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct SubmitQuoteDto {
    pub price: PriceInput,
    #[validate(length(min = 1, max = 100, message = "Estimated duration is required"))]
    pub estimated_duration: String,
    pub proposed_start_date: Option<NaiveDate>,
    #[validate(length(min = 1, max = 5000, message = "Describe the work you will do"))]
    pub proposal_text: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl SubmitQuoteDto {
    pub fn into_new(self) -> Result<NewQuote, String> {
        Ok(NewQuote {
            price: self.price.amount()?,
            estimated_duration: self.estimated_duration,
            proposed_start_date: self.proposed_start_date,
            proposal_text: self.proposal_text,
            attachments: self.attachments,
        })
    }
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookingDto {
    pub seller_id: Uuid,
    #[validate(length(min = 1, max = 100, message = "Category is required"))]
    pub category: String,
    #[validate(length(max = 5000, message = "Description is too long"))]
    pub description: Option<String>,
    pub budget: Option<PriceInput>,
    pub proposed_start_date: Option<NaiveDate>,
    #[validate(length(max = 50))]
    pub time_slot: Option<String>,
    pub flexible_date: Option<bool>,
    pub flexible_time: Option<bool>,
}

impl CreateBookingDto {
    pub fn into_new(self) -> Result<NewBooking, String> {
        let (schedule, description) =
            schedule_and_description(self.description.as_deref(), self.flexible_date, self.flexible_time);

        Ok(NewBooking {
            seller_id: self.seller_id,
            category: self.category,
            description,
            budget: optional_amount(&self.budget)?,
            proposed_start_date: self.proposed_start_date,
            time_slot: self.time_slot,
            schedule,
        })
    }
}

/// A seller response, a buyer counter, a quote edit or renegotiated terms.
#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct ProposalDto {
    pub price: PriceInput,
    pub start_date: Option<NaiveDate>,
    #[validate(length(max = 50))]
    pub time_slot: Option<String>,
    #[validate(length(max = 100))]
    pub duration: Option<String>,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

impl ProposalDto {
    pub fn into_proposal(self) -> Result<Proposal, String> {
        Ok(Proposal {
            price: self.price.amount()?,
            start_date: self.start_date,
            time_slot: self.time_slot,
            duration: self.duration.filter(|d| !d.trim().is_empty()),
            notes: self.notes,
        })
    }
}

#[derive(Validate, Debug, Default, Clone, Serialize, Deserialize)]
pub struct RevisionDto {
    #[validate(length(min = 1, max = 2000, message = "Tell the seller what should change"))]
    pub message: String,
}

// Photo presence is checked by the engine so it can answer with `proof_required`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CompletionDto {
    #[serde(default)]
    pub photos: Vec<String>,
}

#[derive(Validate, Debug, Clone, Serialize, Deserialize)]
pub struct SignContractDto {
    #[validate(range(min = 1, message = "Version must be at least 1"))]
    pub version: i32,
}

//Response wrapper
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: &str, data: T) -> Self {
        Self {
            status: "success".to_string(),
            message: message.to_string(),
            data: Some(data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prices_parse_from_form_text() {
        assert_eq!(parse_price("1500"), Some(1500.0));
        assert_eq!(parse_price("₦1,500.50"), Some(1500.5));
        assert_eq!(parse_price(" $ 300 "), Some(300.0));
        assert_eq!(parse_price("٤٥٠"), Some(450.0));
        assert_eq!(parse_price("۱۲۰"), Some(120.0));
        assert_eq!(parse_price("NGN"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn ambiguous_price_text_is_not_guessed() {
        assert_eq!(parse_price("500-600"), None);
        assert_eq!(parse_price("₦500 - ₦600"), None);
        assert_eq!(parse_price("1.500,00"), None);
        assert_eq!(parse_price("1.2.3"), None);
        assert_eq!(parse_price("٣٠٠٫٥٫٠"), None);
        assert_eq!(parse_price("12,500.75"), Some(12500.75));
        assert!(PriceInput::Text("500-600".into()).amount().is_err());
    }

    #[test]
    fn negative_or_non_finite_prices_are_refused() {
        assert!(PriceInput::Text("-20".into()).amount().is_err());
        assert!(PriceInput::Number(-1.0).amount().is_err());
        assert!(PriceInput::Number(f64::INFINITY).amount().is_err());
        assert_eq!(PriceInput::Number(0.0).amount(), Ok(0.0));
    }

    #[test]
    fn price_accepts_number_or_string_json() {
        let dto: ProposalDto = serde_json::from_str(r#"{"price": 500}"#).unwrap();
        assert_eq!(dto.into_proposal().unwrap().price, 500.0);

        let dto: ProposalDto = serde_json::from_str(r#"{"price": "₦2,000", "duration": "  "}"#).unwrap();
        let proposal = dto.into_proposal().unwrap();
        assert_eq!(proposal.price, 2000.0);
        assert_eq!(proposal.duration, None);
    }

    #[test]
    fn legacy_tokens_move_into_flags() {
        let dto = CreateBookingDto {
            seller_id: Uuid::new_v4(),
            category: "cleaning".into(),
            description: Some("Deep clean [Flexible Time]".into()),
            budget: Some(PriceInput::Text("200".into())),
            proposed_start_date: None,
            time_slot: None,
            flexible_date: Some(true),
            flexible_time: None,
        };

        let booking = dto.into_new().unwrap();
        assert_eq!(booking.description, "Deep clean");
        assert!(booking.schedule.flexible_date);
        assert!(booking.schedule.flexible_time);
        assert_eq!(booking.budget, Some(200.0));
    }

    #[test]
    fn blank_revision_message_fails_validation() {
        let dto = RevisionDto { message: String::new() };
        assert!(dto.validate().is_err());

        let dto = SignContractDto { version: 0 };
        assert!(dto.validate().is_err());
    }
}

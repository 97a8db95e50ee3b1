pub mod contract_service;
pub mod error;
pub mod lifecycle_service;
pub mod notification_service;
pub mod progress;
pub mod transitions;

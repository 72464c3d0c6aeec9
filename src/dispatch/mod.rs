//! Outbound notifications of job outcomes: the callback to the caller and the audit log.

mod audit;
mod callback;
mod payload;

pub use audit::{AuditLog, JobSummary};
pub use callback::{CallbackClient, DeliveryOutcome};
pub use payload::{CallbackPayload, EchoedCodes, ErrorDescriptor};

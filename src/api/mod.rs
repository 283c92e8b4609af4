//! JSON request surface: `{ "op": ... }` in, `{ success, result | error }` out.

pub mod response;
pub mod service;

pub use response::{ApiError, ApiResponse, ErrorBody, ErrorKind};
pub use service::{
    parse_resolution, AgentEventKind, ApiRequest, CleanupSummary, Components, HealthSummary,
    LabelSummary, TackleService,
};

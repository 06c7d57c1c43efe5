//! Shared request, response and record types.

pub mod message;
pub mod provider;
pub mod request;
pub mod response;
pub mod threat;
pub mod usage;

pub use message::{Message, Role};
pub use provider::Provider;
pub use request::{CallerIdentity, ChatRequest, ClientMeta, InboundMessage, NormalizedRequest};
pub use response::{ChatCompletion, ErrorBody, GatewayResponse, Usage};
pub use threat::ThreatLevel;
pub use usage::{RequestStatus, UsageLogEntry, UsageQuery};

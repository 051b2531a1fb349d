//! File transfer transports: staging (SSH) and POST (multipart)
//! (spec.md §4.C, §4.D).

mod error;
pub mod post;
pub mod staging;

pub use error::{TransferOutcome, TransportError};
pub use post::PostTransport;
pub use staging::StagingTransport;

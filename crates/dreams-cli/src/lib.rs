//! Library half of the `dreams` binary: the transport-independent service layer.

pub mod service;

pub use service::{DreamService, PolishOutcome, ServiceError, ServiceErrorKind};

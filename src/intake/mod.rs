//! Receiving side of the pipeline: lifecycle framing and normalized parts.

pub mod events;
pub mod handler;
pub mod transmitter;

pub use events::{OutputEvent, TerminationCause};
pub use handler::{IntakeHandler, IntakeState};
pub use transmitter::{PartTransmitter, TransmitterConfig};

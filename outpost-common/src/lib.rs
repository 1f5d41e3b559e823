pub mod address;
pub mod logging;
pub mod message;
pub mod stats;
pub mod validation;

pub use message::{Attachment, Message, MessageId, Status};
pub use stats::{DeliveryStats, StatsSnapshot};
pub use tracing;
pub use validation::{Limits, ValidationError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
    Finalised,
}

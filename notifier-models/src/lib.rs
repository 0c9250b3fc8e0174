pub mod core;
pub mod envelope;
pub mod errors;
pub mod queues;
pub mod web;

pub use envelope::{MessageEnvelope, MessageKind, Payload};
pub use queues::QueueName;

#[cfg(feature = "rabbitmq")]
pub mod rabbitmq;

// Services module - Business logic

pub mod access_credential;
pub mod access_validator;
pub mod booking;
pub mod clock;
pub mod notifications;
pub mod password;
pub mod payment_gateway;
pub mod payment_processor;
pub mod signature;
pub mod slot_availability;

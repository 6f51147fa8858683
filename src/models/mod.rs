// Models module - Database entity representations

pub mod access_log;
pub mod appointment;
pub mod location;
pub mod payment;
pub mod pet;
pub mod user;

pub use access_log::AccessLog;
pub use appointment::{Appointment, AppointmentStatus};
pub use location::Location;
pub use payment::{Payment, PaymentMethod, PaymentStatus};
pub use pet::Pet;
pub use user::User;

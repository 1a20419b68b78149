//! Request and response types shared by the handlers.

pub mod surveys;
pub mod uploads;

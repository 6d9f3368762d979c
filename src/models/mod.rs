pub mod identity;
pub mod job;
pub mod requests;
pub mod transition;
pub mod views;

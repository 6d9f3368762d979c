pub mod auth;
pub mod completion;
pub mod dispatch;
pub mod owner;
pub mod query;
pub mod reaper;
pub mod submission;

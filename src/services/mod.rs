pub mod coordinator;
pub mod error;
pub mod listing;
pub mod multipart;
pub mod notification;
pub mod persister;
pub mod pipeline;
pub mod throttle;

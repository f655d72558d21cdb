pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod mailer;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod time;
pub mod wal;

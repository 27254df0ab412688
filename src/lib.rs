pub mod checkins;
pub mod client;
pub mod composer;
pub mod config;
pub mod config_store;
pub mod conversation;
pub mod daemon;
pub mod db;
pub mod domains;
pub mod error;
pub mod history;
pub mod interfaces;
pub mod preferences;
pub mod scheduler;
pub mod services;

pub use crate::config::Config;
pub use crate::error::{CheckinError, Result};
pub use crate::services::checkin::{CheckInService, InboundOutcome, Stores};

pub mod checkin;
pub mod messaging;
pub mod notifier;

pub mod checkin;
pub mod schedule;

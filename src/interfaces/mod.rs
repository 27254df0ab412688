pub mod clock;
pub mod messaging;
pub mod scheduler;

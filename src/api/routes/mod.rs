pub mod daemons;
pub mod dispatch;
pub mod health;
pub mod problems;

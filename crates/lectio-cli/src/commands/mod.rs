pub mod battle;
pub mod family;
pub mod phase;
pub mod session;
pub mod student;
pub mod streak;

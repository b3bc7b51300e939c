//! Domain model for the Waypoint back-office engine.

pub mod meeting;
pub mod roadmap;
pub mod student;
pub mod task;

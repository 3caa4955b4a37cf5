pub mod activities;
pub mod assistant;
pub mod backup;
pub mod core;
pub mod curriculum;
pub mod exams;
pub mod meetings;
pub mod parameters;
pub mod reports;
pub mod schedule;
pub mod students;
pub mod surveys;
pub mod tracking;

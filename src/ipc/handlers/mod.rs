pub mod advisors;
pub mod analytics;
pub mod components;
pub mod core;
pub mod marks;
pub mod meetings;
pub mod remarks;
pub mod roster;
pub mod students;

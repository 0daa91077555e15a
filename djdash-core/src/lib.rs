// Output tabs and their text model
pub mod interact;
pub mod output;

// Redaction shared by history, memory and error display
pub mod sanitize;

// Session persistence + activity history
pub mod history;
pub mod session;

pub mod config;
pub mod error;
pub mod heuristics;

// Job execution model
pub mod job;

// Single-owner application state
pub mod dashboard;
pub mod reducer;

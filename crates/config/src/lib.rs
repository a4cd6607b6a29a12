// Configuration loading

pub mod settings;

pub use settings::{PausedCommits, Settings};

pub mod codeforces;
pub mod config;
pub mod console;
pub mod database;
pub mod error;
pub mod mailer;
pub mod models;
pub mod roster;
pub mod scheduler;
pub mod sync;

//! Operator CLI for the survey sync engine
//!
//! Wraps [`survey_sync`] for field coordinators and support staff:
//! - `status` shows record counts, queue depth and reachability
//! - `sync` drains the queue once, `run` keeps the loop alive
//! - `export` writes a JSON backup or a household CSV
//! - `queue` lists, retries or discards stuck entries
//! - `clear` wipes local survey data

pub mod cli;
pub mod commands;
pub mod context;

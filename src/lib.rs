//! Ruckus: rule-based chat moderation with oracle confirmation and
//! conflict episode detection.

pub mod analyzer;
pub mod buffer;
pub mod capabilities;
pub mod commands;
pub mod config;
pub mod conflict;
pub mod database;
pub mod discord;
pub mod engine;
pub mod error;
pub mod filter;
pub mod health;
pub mod models;
pub mod pipeline;
pub mod punishment;
pub mod purge;
pub mod rules;
pub mod state;

#[cfg(test)]
mod testutil;

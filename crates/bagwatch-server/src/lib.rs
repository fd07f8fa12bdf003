//! # bagwatch-server
//!
//! HTTP server library for the bagwatch luggage proximity tracker.
//!
//! This library provides the API handlers and state management for bagwatch.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;

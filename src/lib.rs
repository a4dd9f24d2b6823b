//! Bulwark - Reliable Delivery and Admission Control
//!
//! This crate provides the reliability substrate of a web application: a
//! durable, retrying delivery queue for outbound messages, and a fixed-window
//! admission limiter that degrades to process-local counting when its shared
//! counter store is unreachable.

pub mod clock;
pub mod config;
pub mod error;
pub mod queue;
pub mod ratelimit;

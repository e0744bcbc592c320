//! Integration tests for retrace
//!
//! These tests verify that multiple components work together correctly.

#[path = "../common/mod.rs"]
pub mod common;

pub mod cli;
pub mod live_session;
pub mod reconnect;
pub mod timeline_properties;

//! Vigil - an alert lifecycle and escalation engine for household care.
//!
//! # Overview
//!
//! Vigil sits between activity monitoring (fall detection, inactivity
//! tracking) and the people who need to respond. It classifies incoming
//! events, suppresses duplicates with a per-subject cooldown, drives each
//! alert through an explicit state machine (active, acknowledged, escalated,
//! resolved), fans notifications out across email/SMS/push with a full
//! delivery ledger, and walks a bounded escalation ladder when nobody
//! responds. A manual SOS bypasses every filter.
//!
//! # Modules
//!
//! - [`model`]: Core enums and request/response types
//! - [`rules`]: Danger classification and severity policy
//! - [`cooldown`]: Per-subject, per-condition alert suppression
//! - [`alert`]: The alert aggregate and its state machine
//! - [`contact`]: Care-network contacts and recipient selection
//! - [`notify`]: Channel senders and the notification dispatcher
//! - [`escalation`]: The engine tying it all together, plus the sweep
//! - [`storage`]: SQLite storage layer
//! - [`api`]: HTTP API handlers
//! - [`config`]: Environment-variable configuration
//! - [`error`]: The crate-wide error type

pub mod alert;
pub mod api;
pub mod config;
pub mod contact;
pub mod cooldown;
pub mod error;
pub mod escalation;
pub mod model;
pub mod notify;
pub mod rules;
pub mod storage;

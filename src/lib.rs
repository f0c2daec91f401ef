//! surface-shadow - control surface matching and allocation engine
//!
//! Raw messages from a control surface are matched against abstract controls
//! (faders, buttons, jog wheels...) and dispatched to whichever page of
//! bindings currently owns the control.
//!
//! - [`pattern`], [`strategy`]: byte-level matching and value extraction
//! - [`surface`], [`matcher`]: controls and priority-ordered matching
//! - [`shadow`], [`device_shadow`]: per-page display state, allocation and binding
//! - [`catalog`], [`config`], [`session`]: device files, YAML pages, the host loop

pub mod catalog;
pub mod cli;
pub mod config;
pub mod device_shadow;
pub mod forward;
pub mod matcher;
pub mod message;
pub mod pattern;
pub mod ports;
pub mod session;
pub mod shadow;
pub mod strategy;
pub mod surface;

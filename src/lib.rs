//! usb-gadgetd - USB gadget configuration daemon
//!
//! Composes USB gadget functions through a configfs tree, keeps the pull-up
//! state in step with descriptor application, and exposes the gadget
//! operations over a small HTTP control plane.

pub mod config;
pub mod error;
pub mod gadget;
pub mod state;
pub mod web;

pub use error::{GadgetError, Result};

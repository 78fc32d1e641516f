//! Synchronization primitives for in-process communication.
//!
//! This module provides the bounded point-to-point channel that the
//! [`crate::dispatch`] matrix wires between producers and consumers.

pub mod spsc;

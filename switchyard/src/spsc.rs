//! Core SPSC (Single-Producer Single-Consumer) queue primitives.
//!
//! This module contains the ring buffer algorithm behind:
//! - [`crate::sync::spsc`] - In-process point-to-point channels
//! - [`crate::dispatch`] - Every link in the dispatch matrix

pub(crate) mod ring;

//! Low-level primitives for the chain transaction layer.
//!
//! Includes fixed-width key encoders and the in-process edge lock.

/// Byte-level utilities and encoding/decoding.
///
/// Order-preserving encoders used to lay out physical edge keys.
pub mod bytes;

/// Concurrency primitives.
///
/// The per-partition memory lock guarding in-flight chain operations.
pub mod concurrency;

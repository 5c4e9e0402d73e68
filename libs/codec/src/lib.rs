//! Envelope Wire Codec
//!
//! One envelope per logical frame: a 4-byte big-endian length prefix
//! followed by the bincode-serialized [`Envelope`]. Frames are reassembled
//! correctly across partial reads, delivered in send order, and bounded by
//! a configurable maximum size so a corrupt prefix cannot trigger an
//! unbounded allocation.

pub mod frame;

pub use frame::{decode_envelope, FrameReader, FrameWriter, DEFAULT_MAX_FRAME_BYTES};

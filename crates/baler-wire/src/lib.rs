//! # baler-wire: Wire frame for the baler pipeline
//!
//! Both sides of the pipeline agree bit-for-bit on the frame layout defined
//! here:
//!
//! ```text
//! ┌─────────────────────┬────────────────────────┬──────────────────────┐
//! │  hdr_len  (u16 BE)  │   header_json bytes    │   payload bytes      │
//! └─────────────────────┴────────────────────────┴──────────────────────┘
//! ```
//!
//! `header_json` is canonical JSON (sorted keys, no whitespace) carrying
//! the batch identity; the payload is the compressed batch, exactly
//! `comp_len` bytes. Unknown header fields are rejected rather than
//! preserved.

mod error;
mod frame;
mod header;

pub use error::{WireError, WireResult};
pub use frame::{FRAME_LEN_PREFIX, Frame};
pub use header::{FrameHeader, PROTOCOL_VERSION};

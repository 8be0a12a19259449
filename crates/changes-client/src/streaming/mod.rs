//! Continuous-feed wire format
//!
//! The server writes one JSON object per line and pads quiet periods with
//! bare newlines. Objects may be split across any number of network chunks:
//!
//! ```text
//! {"seq":"1-g1A","id":"doc-1","changes":[{"rev":"1-967a"}]}\n
//! \n
//! {"seq":"2-g1A","id":"doc-2","changes":[{"rev":"1-7051"}],"deleted":true}\n
//! {"error":"forbidden","reason":"You are not allowed to access this db."}\n
//! {"last_seq":"2-g1A","pending":0}\n
//! ```

pub(crate) mod framer;
mod types;

pub(crate) use framer::LineFramer;
pub(crate) use types::FeedRecord;
pub use types::{ChangeRecord, Cursor, Revision};

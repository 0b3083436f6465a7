//! Filesystem-mediated frame exchange with the analysis engine.
//!
//! Frames are handed over as individual files in a shared directory. The
//! engine scans the directory in name order, so file names must sort in
//! capture order.

pub mod channel;

pub use channel::{
    frame_file_name, FrameChannel, FrameChannelError, CONTAINER_FRAME_DIR, CONTAINER_FRAME_PATTERN,
    END_OF_STREAM_FILE,
};

//! Wire protocol spoken by the analysis engine on its standard output.

pub mod codec;
pub mod events;

pub use codec::{decode_line, Decoded, LineDecoder};
pub use events::{EngineError, EngineErrorKind, EngineEvent, FocusReading, FocusState};

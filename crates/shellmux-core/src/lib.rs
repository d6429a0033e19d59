//! shellmux-core: Shared protocol library for shellmux.
//!
//! Provides the JSON frame types exchanged with the shell host, the text
//! codec, session keys, and the error taxonomy used by the client.

pub mod codec;
pub mod error;
pub mod frames;
pub mod key;

// Re-export commonly used items at crate root.
pub use codec::{decode_frame, encode_frame};
pub use error::{ShellError, ShellResult};
pub use frames::{ClientFrame, Dimensions, ServerFrame};
pub use key::{MountTarget, Project, SessionKey};

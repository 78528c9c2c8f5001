//! One session per receiver: bootstrap, playback control, status tracking

mod handle;
mod machine;

pub use handle::SessionHandle;
pub use machine::{Action, SessionConfig, SessionMachine, SessionSnapshot, DEFAULT_LAUNCH_TIMEOUT};

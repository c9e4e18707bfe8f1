pub mod device;
pub mod error;
pub mod safe_mode;

pub use error::{AgentError, ErrorKind};

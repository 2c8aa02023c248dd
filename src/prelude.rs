pub use crate::hostname;
pub use conduit_core::prelude::*;

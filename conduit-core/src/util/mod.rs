//! Collection of utility types shared by the executors, the scheduler and the actions.

pub use self::drop_guard::*;
pub use self::future::*;
pub use self::ordered_queue::*;

mod drop_guard;
mod future;
mod ordered_queue;

pub mod prelude;
pub mod util;

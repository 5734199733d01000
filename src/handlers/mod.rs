pub mod health;
pub mod session;

pub use health::*;
pub use session::*;

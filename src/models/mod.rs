pub mod health;
pub mod error;
pub mod messages;
pub mod session;
pub mod session_info;

pub use health::*;
pub use error::*;
pub use messages::*;
pub use session::*;
pub use session_info::*;

pub mod connindex;
pub mod error;
pub mod outbox;
pub mod router;
pub mod sessionstore;

pub use connindex::{Binding, ConnectionIndex};
pub use error::SyncError;
pub use outbox::{Delivery, Outbox};
pub use router::EventRouter;
pub use sessionstore::{DocumentDefaults, MemberRemoval, SessionGuard, SessionStore};

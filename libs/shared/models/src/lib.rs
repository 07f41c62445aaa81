pub mod clock;
pub mod context;
pub mod error;

pub use clock::{Clock, SystemClock};
pub use context::RequestContext;
pub use error::DatabaseError;

pub mod conflict;
pub mod lifecycle;
pub mod notifier;
pub mod scheduling;
pub mod stats;

pub use conflict::*;
pub use lifecycle::*;
pub use notifier::*;
pub use scheduling::*;
pub use stats::*;

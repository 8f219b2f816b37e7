pub mod manager;
pub mod session;

pub use manager::{Notifier, SessionManager};
pub use session::{CrawlSession, SessionState, SessionStatistics, SessionStatus, SharedDeps};

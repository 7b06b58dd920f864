//! Identity of the acting caller: principals, subjects and bearer sessions.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod request_context;

pub use principal::{Principal, Subject, SUBJECT_ANY};
pub use session::SessionManager;
pub use request_context::RequestContext;

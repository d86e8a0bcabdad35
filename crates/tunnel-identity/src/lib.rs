//! Subscriber identity for the OpenTunnel control plane
//!
//! Authoritative record of subscribers and their credentials, plus the
//! short-lived verification/reset codes, bearer tokens and the outbound
//! mail seam. Authorization elsewhere in the plane is always an explicit
//! check against the `Subscriber` flags resolved here.

pub mod codes;
pub mod email;
pub mod model;
pub mod password;
pub mod store;
pub mod token;

pub use codes::{CodeCheck, CodePurpose, CodeStore};
pub use email::{ConsoleMailer, Mailer, SmtpMailer};
pub use model::Subscriber;
pub use store::IdentityStore;
pub use token::{issue_token, verify_token, Claims};

//! Digest rendering and delivery.
//!
//! A digest run reads the cache written by the last sync, keeps the changes
//! cached today and sends each recipient the sections their filters select.

mod css;
mod filter;
mod formatter;
mod mailer;
mod send;
mod users;

pub use mailer::{MuttMailer, SmtpSecret};
pub use send::DigestSender;
pub use users::list_users;

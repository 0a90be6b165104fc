//! Inbox pipeline.
//!
//! Emails flow through:
//! 1. `MailProvider::fetch_messages()` for provider I/O, then
//! 2. `RulesEngine::process_email()` against every stored rule, or
//! 3. `Database::insert_email_if_absent()` for sync
//!
//! Actions are reported, never applied to the mailbox.

pub mod inbox;

pub use inbox::{InboxProcessor, ProcessedEmail, actions_for};

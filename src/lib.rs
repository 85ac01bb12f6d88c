pub mod db;
pub mod mailbox;
pub mod relay;
pub mod tools;

pub use db::Database;
pub use mailbox::Message;
pub use relay::RelayService;
pub use tools::MailboxServer;

pub mod page;
pub mod page_guard;

pub use page::Page;
pub use page_guard::{BasicPageGuard, ReadPageGuard, WritePageGuard};

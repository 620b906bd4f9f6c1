//! Page blocks: the slotted record layout and the `.pag` file they live in.

mod slotted;
mod store;

pub use slotted::{Entry, Page, MAX_KEY_LEN, MAX_RECORD_SIZE, PAGE_SIZE, RECORD_HEADER, SLOT_SIZE};
pub(crate) use store::PageStore;

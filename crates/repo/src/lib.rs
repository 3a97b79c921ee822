//! In-memory [`messager_core::Repo`] implementation.

mod memory;

pub use memory::{InMemoryRepo, SharedInMemoryRepo};

//! Messager core: the per-address selection pipeline and chain-head
//! reconciler for a Filecoin-like message relay and nonce-management
//! service.
//!
//! This crate provides:
//! - The repository capability set ([`repo_traits`]) storage backends implement
//! - The message/address domain model and soft-delete conventions
//! - In-memory caches for recent messages and observed tipsets
//! - The selector, head reconciler and push orchestrator driving the pipeline
//! - The outward API surface with its static authorization classification

mod address;
mod cache;
pub mod config;
mod errors;
mod message;
mod orchestrator;
mod reconciler;
mod repo_traits;
mod selector;
mod service;
mod shared_params;
mod tipset_cache;

pub use address::{is_deleted_to_sentinel, sentinel_to_is_deleted, Address, IS_DELETED_ALIVE, IS_DELETED_DELETED};
pub use cache::MessageCache;
pub use config::{config, init_config, MessagerConfig};
pub use errors::{ErrorPhase, MessageError, MessagerError};
pub use message::{Message, MessageMeta, MessageState};
pub use orchestrator::{min_rbf, Orchestrator};
pub use reconciler::Reconciler;
pub use repo_traits::{AddressRepo, MessageRepo, NodeRepo, Repo, SharedParamsRepo, TxWrites};
pub use selector::{SelectResult, Selector};
pub use service::{auth_class, AuthClass, MessagerService};
pub use shared_params::SharedParams;
pub use tipset_cache::TipsetCache;

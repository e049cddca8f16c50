//! Archipelago volume operations
//!
//! - [`Vlmc`]: volume verbs (create, snapshot, hash, remove, info, open,
//!   close, lock, unlock), each carried by one request to the owning peer
//! - [`VolumeMapper`]: mapping volumes to local block devices through a
//!   [`BlockDriver`], serialized host-wide by an [`ExclusiveLock`]
//! - [`TapCtl`]: the blktap driver

pub mod driver;
pub mod error;
pub mod guard;
pub mod mapping;
pub mod tapctl;
pub mod volume;

pub use driver::{BlockDriver, MappedVolume, TapdiskState};
pub use error::{VlmcError, VlmcResult};
pub use guard::{ExclusiveGuard, ExclusiveLock};
pub use mapping::VolumeMapper;
pub use tapctl::TapCtl;
pub use volume::{CreateOptions, Vlmc};

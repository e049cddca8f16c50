//! Volume operations
//!
//! Each operation validates the volume name, opens one channel handle,
//! sends exactly one request to the peer that owns the verb, and closes
//! the handle again:
//!
//! | Verb                                 | Peer       |
//! |--------------------------------------|------------|
//! | create, snapshot, hash, remove, info | `mapperd`  |
//! | open, close                          | `vlmcd`    |
//! | lock, unlock                         | `blockerm` |

use crate::error::{VlmcError, VlmcResult};
use crate::mapping::VolumeMapper;
use archip_common::{Config, Role, VolumeName, mib_to_bytes};
use archip_xseg::{ChannelHandle, HashReply, InfoReply, Reply, RequestOp, Transport};
use std::sync::Arc;
use tracing::{debug, info};

/// Parameters of a volume creation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// Size in MiB
    pub size_mib: Option<u64>,
    /// Snapshot to clone from
    pub snapshot: Option<String>,
    /// Create a content-addressed volume
    pub cont_addr: bool,
}

/// Volume operations against the running peers
#[derive(Clone)]
pub struct Vlmc {
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    mapper: VolumeMapper,
}

impl Vlmc {
    #[must_use]
    pub fn new(config: Arc<Config>, transport: Arc<dyn Transport>, mapper: VolumeMapper) -> Self {
        Self {
            config,
            transport,
            mapper,
        }
    }

    #[must_use]
    pub const fn mapper(&self) -> &VolumeMapper {
        &self.mapper
    }

    /// Send one request to `role` and wait for its completion
    async fn execute(
        &self,
        verb: &'static str,
        volume: &VolumeName,
        role: Role,
        op: RequestOp,
    ) -> VlmcResult<Reply> {
        let port = self.config.port_of(role)?;
        let mut handle = ChannelHandle::open(self.transport.as_ref()).await?;

        let reply = {
            let mut request = handle.request(port, op)?;
            request.submit().await?;
            request.wait().await?;
            request.into_reply()?
        };
        handle.close();

        if !reply.success {
            return Err(VlmcError::Operation {
                verb,
                volume: volume.to_string(),
            });
        }
        debug!("{verb} {volume} succeeded on {role}");
        Ok(reply)
    }

    /// Create a volume, empty or cloned from a snapshot
    pub async fn create(&self, name: &str, options: CreateOptions) -> VlmcResult<()> {
        let volume = VolumeName::new(name)?;
        if options.size_mib.is_none() && options.snapshot.is_none() {
            return Err(VlmcError::MissingSizeOrSnapshot {
                volume: volume.to_string(),
            });
        }
        let size = match options.size_mib {
            Some(mib) => mib_to_bytes(mib).ok_or_else(|| VlmcError::SizeOverflow {
                volume: volume.to_string(),
                mib,
            })?,
            None => 0,
        };

        let op = RequestOp::Clone {
            target: volume.to_string(),
            source: options.snapshot,
            size,
            cont_addr: options.cont_addr,
        };
        self.execute("create", &volume, Role::Mapperd, op).await?;
        info!("created volume {volume}");
        Ok(())
    }

    /// Snapshot a volume, optionally under an explicit name
    pub async fn snapshot(&self, name: &str, snapshot: Option<&str>) -> VlmcResult<()> {
        let volume = VolumeName::new(name)?;
        let op = RequestOp::Snapshot {
            target: volume.to_string(),
            snapshot: snapshot.map(str::to_string),
        };
        self.execute("snapshot", &volume, Role::Mapperd, op).await?;
        Ok(())
    }

    /// Content-addressed name of the volume's map
    pub async fn hash(&self, name: &str) -> VlmcResult<String> {
        let volume = VolumeName::new(name)?;
        let op = RequestOp::Hash {
            target: volume.to_string(),
        };
        let reply = self.execute("hash", &volume, Role::Mapperd, op).await?;
        Ok(reply.payload::<HashReply>()?.target)
    }

    /// Delete a volume that is not mapped
    pub async fn remove(&self, name: &str) -> VlmcResult<()> {
        let volume = VolumeName::new(name)?;
        if let Some(mapped) = self.mapper.is_volume_mapped(&volume)? {
            return Err(VlmcError::VolumeBusy {
                volume: volume.to_string(),
                device: mapped.device,
            });
        }

        let op = RequestOp::Delete {
            target: volume.to_string(),
        };
        self.execute("remove", &volume, Role::Mapperd, op).await?;
        info!("removed volume {volume}");
        Ok(())
    }

    /// Size of the volume in bytes
    pub async fn info(&self, name: &str) -> VlmcResult<u64> {
        let volume = VolumeName::new(name)?;
        let op = RequestOp::Info {
            target: volume.to_string(),
        };
        let reply = self.execute("info", &volume, Role::Mapperd, op).await?;
        Ok(reply.payload::<InfoReply>()?.size)
    }

    pub async fn open(&self, name: &str) -> VlmcResult<()> {
        let volume = VolumeName::new(name)?;
        let op = RequestOp::Open {
            target: volume.to_string(),
        };
        self.execute("open", &volume, Role::Vlmcd, op).await?;
        Ok(())
    }

    pub async fn close(&self, name: &str) -> VlmcResult<()> {
        let volume = VolumeName::new(name)?;
        let op = RequestOp::Close {
            target: volume.to_string(),
        };
        self.execute("close", &volume, Role::Vlmcd, op).await?;
        Ok(())
    }

    /// Take the volume's lock
    pub async fn lock(&self, name: &str) -> VlmcResult<()> {
        let volume = VolumeName::new(name)?;
        let op = RequestOp::Acquire {
            target: volume.lock_target(),
        };
        self.execute("lock", &volume, Role::Blockerm, op).await?;
        Ok(())
    }

    /// Release the volume's lock; `force` releases a lock held by others
    pub async fn unlock(&self, name: &str, force: bool) -> VlmcResult<()> {
        let volume = VolumeName::new(name)?;
        let op = RequestOp::Release {
            target: volume.lock_target(),
            force,
        };
        self.execute("unlock", &volume, Role::Blockerm, op).await?;
        Ok(())
    }

    pub async fn resize(&self, name: &str, _size_mib: u64) -> VlmcResult<()> {
        let volume = VolumeName::new(name)?;
        Err(VlmcError::NotImplemented {
            verb: "resize",
            volume: volume.to_string(),
        })
    }

    /// Map a volume; returns the device minor
    pub fn map(&self, name: &str) -> VlmcResult<u32> {
        let volume = VolumeName::new(name)?;
        self.mapper.map_volume(&volume)
    }

    /// Unmap a device, given by path or minor
    pub fn unmap(&self, device: &str) -> VlmcResult<()> {
        self.mapper.unmap_volume(device)
    }
}

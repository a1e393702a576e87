//! 远程块设备
//!
//! 通过两条连接访问设备：数据面走 [`BlockFifoClient`]，控制面走 [`ControlChannel`]。
//! 卷管理器调用每次都在新克隆的控制连接上发出。对不支持卷管理器的设备，
//! 对端会拆除承载该调用的连接；克隆保证被拆除的只是这条临时连接，
//! 主控制连接和数据 FIFO 仍然可用。

use log::debug;

use crate::channel::RequestChannel;
use crate::control::ControlChannel;
use crate::device::BlockDevice;
use crate::error::Result;
use crate::fifo_client::BlockFifoClient;
use crate::protocol::{BlockFifoRequest, BlockInfo, VolumeInfo, VolumeManagerInfo, VsliceRange};
use crate::vmo::{Vmo, Vmoid};

/// 远程块设备客户端
pub struct RemoteBlockDevice {
    fifo: BlockFifoClient,
    control: Box<dyn ControlChannel>,
}

impl RemoteBlockDevice {
    /// 由数据 FIFO 与控制连接创建客户端
    pub fn new(fifo: impl RequestChannel + 'static, control: Box<dyn ControlChannel>) -> Self {
        Self {
            fifo: BlockFifoClient::new(fifo),
            control,
        }
    }

    /// 数据 FIFO 是否已经关闭
    pub fn is_closed(&self) -> bool {
        self.fifo.is_closed()
    }

    fn volume_connection(&self) -> Result<Box<dyn ControlChannel>> {
        self.control.clone_connection().inspect_err(|e| {
            debug!("remote block: failed to clone control connection: {}", e);
        })
    }
}

impl BlockDevice for RemoteBlockDevice {
    fn fifo_transaction(&self, requests: &[BlockFifoRequest]) -> Result<()> {
        self.fifo.transaction(requests)
    }

    fn get_device_path(&self) -> Result<String> {
        self.control.get_path()
    }

    fn block_get_info(&self) -> Result<BlockInfo> {
        self.control.get_info()
    }

    fn block_attach_vmo(&self, vmo: &Vmo) -> Result<Vmoid> {
        self.control.attach_vmo(vmo).map(Vmoid::new)
    }

    fn volume_get_info(&self) -> Result<(VolumeManagerInfo, VolumeInfo)> {
        self.volume_connection()?.volume_get_info()
    }

    fn volume_query_slices(&self, slices: &[u64]) -> Result<Vec<VsliceRange>> {
        self.volume_connection()?.volume_query_slices(slices)
    }

    fn volume_extend(&self, offset: u64, length: u64) -> Result<()> {
        self.volume_connection()?.volume_extend(offset, length)
    }

    fn volume_shrink(&self, offset: u64, length: u64) -> Result<()> {
        self.volume_connection()?.volume_shrink(offset, length)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::error::BlockError;
    use crate::fake::FakeBlockDevice;
    use crate::protocol::BlockOpcode;
    use crate::server::BlockServer;

    #[test]
    fn test_remote_attach_write_detach() {
        let fake = Arc::new(FakeBlockDevice::new(10, 512));
        let (server, fifo) = BlockServer::new(fake.clone()).unwrap();
        let remote = RemoteBlockDevice::new(fifo, Box::new(server.control()));

        let vmo = Vmo::create(512);
        vmo.write(0, &[0x42; 512]).unwrap();
        let vmoid = remote.block_attach_vmo(&vmo).unwrap();
        let write = BlockFifoRequest::new(BlockOpcode::Write, vmoid.get(), 0, 4, 1);
        remote.fifo_transaction(&[write]).unwrap();
        remote.block_detach_vmo(vmoid).unwrap();

        let mut raw = [0u8; 512];
        fake.read_raw(4, &mut raw).unwrap();
        assert_eq!(raw, [0x42; 512]);
        assert_eq!(fake.attached_vmo_count(), 0);
    }

    #[test]
    fn test_volume_failure_keeps_primary_connections() {
        let (server, fifo) = BlockServer::new(Arc::new(FakeBlockDevice::new(10, 512))).unwrap();
        let remote = RemoteBlockDevice::new(fifo, Box::new(server.control()));

        assert_eq!(remote.volume_get_info(), Err(BlockError::PeerClosed));
        assert_eq!(remote.volume_extend(1, 1), Err(BlockError::PeerClosed));
        assert_eq!(remote.block_get_info().unwrap().block_count, 10);
        assert_eq!(remote.fifo_transaction(&[BlockFifoRequest::flush()]), Ok(()));
        assert!(!remote.is_closed());
    }
}

//! 只读块设备装饰器

use std::sync::Arc;

use crate::device::BlockDevice;
use crate::error::{BlockError, Result};
use crate::protocol::{
    BlockFifoRequest, BlockInfo, BlockOpcode, VolumeInfo, VolumeManagerInfo, VsliceRange,
};
use crate::vmo::{Vmo, Vmoid};

/// 将另一个设备包装为只读
///
/// 读取、刷新、缓冲区注册以及卷查询原样转发。向只读设备提交写入或 TRIM
/// 属于调用者的逻辑错误，直接 panic；扩缩卷总是返回 [`BlockError::AccessDenied`]。
pub struct PassThroughReadOnlyBlockDevice {
    inner: Arc<dyn BlockDevice>,
}

impl PassThroughReadOnlyBlockDevice {
    /// 包装 `inner`
    pub fn new(inner: Arc<dyn BlockDevice>) -> Self {
        Self { inner }
    }
}

impl BlockDevice for PassThroughReadOnlyBlockDevice {
    fn fifo_transaction(&self, requests: &[BlockFifoRequest]) -> Result<()> {
        for request in requests {
            assert!(
                !matches!(request.opcode, BlockOpcode::Write | BlockOpcode::Trim),
                "{:?} submitted to a read-only block device",
                request.opcode
            );
        }
        self.inner.fifo_transaction(requests)
    }

    fn get_device_path(&self) -> Result<String> {
        self.inner.get_device_path()
    }

    fn block_get_info(&self) -> Result<BlockInfo> {
        self.inner.block_get_info()
    }

    fn block_attach_vmo(&self, vmo: &Vmo) -> Result<Vmoid> {
        self.inner.block_attach_vmo(vmo)
    }

    fn block_detach_vmo(&self, vmoid: Vmoid) -> Result<()> {
        self.inner.block_detach_vmo(vmoid)
    }

    fn volume_get_info(&self) -> Result<(VolumeManagerInfo, VolumeInfo)> {
        self.inner.volume_get_info()
    }

    fn volume_query_slices(&self, slices: &[u64]) -> Result<Vec<VsliceRange>> {
        self.inner.volume_query_slices(slices)
    }

    fn volume_extend(&self, _offset: u64, _length: u64) -> Result<()> {
        Err(BlockError::AccessDenied)
    }

    fn volume_shrink(&self, _offset: u64, _length: u64) -> Result<()> {
        Err(BlockError::AccessDenied)
    }
}

//! 块缓冲区
//!
//! [`BlockBuffer`] 是一段按块寻址、已经向设备注册的共享内存。
//! [`VmoBuffer`] 是它的标准实现：创建时注册，drop 时注销。

use std::sync::Arc;

use block::{BlockDevice, BlockError, Result, Vmo, Vmoid};
use log::error;

/// 按块寻址的已注册缓冲区
pub trait BlockBuffer {
    /// 容量（块数）
    fn capacity(&self) -> usize;

    /// 块大小（字节）
    fn block_size(&self) -> u32;

    /// 注册得到的原始 vmoid
    fn vmoid(&self) -> u16;

    /// 底层共享内存
    fn vmo(&self) -> &Vmo;

    /// 读取第 `index` 块的开头 `buf.len()` 字节
    fn read_block(&self, index: usize, buf: &mut [u8]) -> Result<()> {
        let offset = self.block_offset(index, buf.len())?;
        self.vmo().read(offset, buf)
    }

    /// 写入第 `index` 块
    fn write_block(&self, index: usize, buf: &[u8]) -> Result<()> {
        let offset = self.block_offset(index, buf.len())?;
        self.vmo().write(offset, buf)
    }

    #[doc(hidden)]
    fn block_offset(&self, index: usize, len: usize) -> Result<u64> {
        if index >= self.capacity() || len > self.block_size() as usize {
            return Err(BlockError::OutOfRange);
        }
        Ok(index as u64 * self.block_size() as u64)
    }
}

/// 拥有共享内存并注册在设备上的缓冲区
pub struct VmoBuffer {
    device: Arc<dyn BlockDevice>,
    vmo: Vmo,
    vmoid: Vmoid,
    capacity: usize,
    block_size: u32,
}

impl VmoBuffer {
    /// 创建 `capacity` 块、每块 `block_size` 字节的缓冲区并注册到 `device`
    pub fn new(device: Arc<dyn BlockDevice>, capacity: usize, block_size: u32) -> Result<Self> {
        if capacity == 0 || block_size == 0 {
            return Err(BlockError::InvalidArgument);
        }
        let size = capacity
            .checked_mul(block_size as usize)
            .ok_or(BlockError::OutOfRange)?;
        let vmo = Vmo::create(size);
        let vmoid = device.block_attach_vmo(&vmo)?;
        Ok(Self {
            device,
            vmo,
            vmoid,
            capacity,
            block_size,
        })
    }

    /// 显式注销，返回注销结果
    pub fn detach(mut self) -> Result<()> {
        let vmoid = core::mem::take(&mut self.vmoid);
        self.device.block_detach_vmo(vmoid)
    }

    /// 清零全部内容
    pub fn zero(&self) -> Result<()> {
        self.vmo.zero(0, self.vmo.size())
    }
}

impl BlockBuffer for VmoBuffer {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn vmoid(&self) -> u16 {
        self.vmoid.get()
    }

    fn vmo(&self) -> &Vmo {
        &self.vmo
    }
}

impl Drop for VmoBuffer {
    fn drop(&mut self) {
        if !self.vmoid.is_attached() {
            return;
        }
        let vmoid = core::mem::take(&mut self.vmoid);
        if let Err(e) = self.device.block_detach_vmo(vmoid) {
            error!("vmo buffer: failed to detach on drop: {}", e);
        }
    }
}

//! 与设备共享的内存缓冲区
//!
//! [`Vmo`] 是一段可在客户端与设备之间共享的内存；克隆只复制句柄，
//! 所有克隆看到同一份数据。[`Vmoid`] 是缓冲区向设备注册后得到的令牌。

use std::sync::Arc;

use log::warn;
use sync::SpinLock;

use crate::config::VMOID_INVALID;
use crate::error::{BlockError, Result};

/// 共享内存缓冲区句柄
#[derive(Clone)]
pub struct Vmo {
    data: Arc<SpinLock<Vec<u8>>>,
}

impl Vmo {
    /// 创建 `size` 字节、内容全零的缓冲区
    pub fn create(size: usize) -> Self {
        Self {
            data: Arc::new(SpinLock::new(vec![0u8; size])),
        }
    }

    /// 缓冲区大小（字节）
    pub fn size(&self) -> usize {
        self.data.lock().len()
    }

    /// 大小为 0 的缓冲区视为无效句柄，不能注册到设备
    pub fn is_valid(&self) -> bool {
        self.size() != 0
    }

    /// 两个句柄是否指向同一块内存
    pub fn same_buffer(&self, other: &Vmo) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// 从 `offset` 处读取 `buf.len()` 字节
    pub fn read(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.data.lock();
        let range = Self::range(data.len(), offset, buf.len())?;
        buf.copy_from_slice(&data[range]);
        Ok(())
    }

    /// 向 `offset` 处写入 `buf`
    pub fn write(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut data = self.data.lock();
        let range = Self::range(data.len(), offset, buf.len())?;
        data[range].copy_from_slice(buf);
        Ok(())
    }

    /// 将 `offset` 开始的 `len` 字节清零
    pub fn zero(&self, offset: u64, len: usize) -> Result<()> {
        let mut data = self.data.lock();
        let range = Self::range(data.len(), offset, len)?;
        data[range].fill(0);
        Ok(())
    }

    fn range(size: usize, offset: u64, len: usize) -> Result<core::ops::Range<usize>> {
        let start = usize::try_from(offset).map_err(|_| BlockError::OutOfRange)?;
        let end = start.checked_add(len).ok_or(BlockError::OutOfRange)?;
        if end > size {
            return Err(BlockError::OutOfRange);
        }
        Ok(start..end)
    }
}

impl core::fmt::Debug for Vmo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Vmo").field("size", &self.size()).finish()
    }
}

/// 已注册缓冲区的令牌
///
/// 令牌由调用者独占。注册表不会自动释放它，调用者必须通过
/// [`BlockDevice::block_detach_vmo`](crate::BlockDevice::block_detach_vmo) 显式注销；
/// 注销会消耗令牌，因此注销后无法再次使用。
#[derive(Debug, PartialEq, Eq)]
pub struct Vmoid {
    id: u16,
}

impl Vmoid {
    /// 包装设备返回的原始 id
    pub fn new(id: u16) -> Self {
        Self { id }
    }

    /// 原始 id，用于填写请求记录
    pub fn get(&self) -> u16 {
        self.id
    }

    /// 是否仍处于注册状态
    pub fn is_attached(&self) -> bool {
        self.id != VMOID_INVALID
    }

    /// 取出原始 id，令牌随之变为未注册状态
    pub fn take_id(&mut self) -> u16 {
        core::mem::replace(&mut self.id, VMOID_INVALID)
    }
}

impl Default for Vmoid {
    fn default() -> Self {
        Self { id: VMOID_INVALID }
    }
}

impl Drop for Vmoid {
    fn drop(&mut self) {
        if self.is_attached() {
            warn!("vmoid {} dropped while still attached", self.id);
        }
    }
}

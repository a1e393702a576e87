//! 块设备接口
//!
//! [`BlockDevice`] 是具体传输方式（远程设备、内存中的假设备、只读装饰器等）
//! 都必须实现的能力集合。文件系统只通过这个接口访问设备。

use crate::error::{BlockError, Result};
use crate::protocol::{BlockFifoRequest, BlockInfo, VolumeInfo, VolumeManagerInfo, VsliceRange};
use crate::vmo::{Vmo, Vmoid};

/// 块设备驱动程序接口
pub trait BlockDevice: Send + Sync {
    /// 批量提交 FIFO 请求并等待全部完成
    ///
    /// 这是数据路径上的热点操作。返回第一个失败请求的状态。
    fn fifo_transaction(&self, requests: &[BlockFifoRequest]) -> Result<()>;

    /// 获取设备路径
    ///
    /// 通过控制连接查询，与数据 FIFO 相互独立。
    fn get_device_path(&self) -> Result<String>;

    /// 获取块设备信息
    fn block_get_info(&self) -> Result<BlockInfo>;

    /// 向设备注册共享缓冲区
    ///
    /// # 错误
    /// - [`BlockError::InvalidArgument`]：缓冲区句柄无效
    /// - [`BlockError::ResourceExhausted`]：设备的注册表已满
    fn block_attach_vmo(&self, vmo: &Vmo) -> Result<Vmoid>;

    /// 注销共享缓冲区
    ///
    /// 注销本身也是一条 FIFO 请求（[`BlockOpcode::CloseVmoid`](crate::BlockOpcode::CloseVmoid)），
    /// 与读写请求走同一条有序路径，因此在它之前提交的写入一定先于注销被设备看到。
    /// 未注册的令牌直接返回成功。
    fn block_detach_vmo(&self, mut vmoid: Vmoid) -> Result<()> {
        if !vmoid.is_attached() {
            return Ok(());
        }
        let request = BlockFifoRequest::close_vmoid(vmoid.take_id());
        self.fifo_transaction(&[request])
    }

    /// 获取卷管理器与本卷的信息
    fn volume_get_info(&self) -> Result<(VolumeManagerInfo, VolumeInfo)> {
        Err(BlockError::NotSupported)
    }

    /// 查询从每个起始虚拟切片开始、分配状态相同的连续区间
    ///
    /// 起始切片超出卷的虚拟地址空间时返回 [`BlockError::OutOfRange`]。
    fn volume_query_slices(&self, _slices: &[u64]) -> Result<Vec<VsliceRange>> {
        Err(BlockError::NotSupported)
    }

    /// 从虚拟切片 `offset` 开始分配 `length` 个切片
    fn volume_extend(&self, _offset: u64, _length: u64) -> Result<()> {
        Err(BlockError::NotSupported)
    }

    /// 从虚拟切片 `offset` 开始释放 `length` 个切片
    fn volume_shrink(&self, _offset: u64, _length: u64) -> Result<()> {
        Err(BlockError::NotSupported)
    }
}

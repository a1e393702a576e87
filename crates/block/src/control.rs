//! 块设备控制连接
//!
//! 控制面承载设备信息查询、缓冲区注册和卷管理器调用，与数据面的 FIFO 相互独立。
//! 一条控制连接可能因为某次调用失败而被对端拆除，之后该连接上的所有调用都返回
//! [`BlockError::PeerClosed`](crate::BlockError::PeerClosed)；
//! [`ControlChannel::clone_connection`] 可以打开一条新的独立连接。

use crate::error::Result;
use crate::protocol::{BlockInfo, VolumeInfo, VolumeManagerInfo, VsliceRange};
use crate::vmo::Vmo;

/// 控制连接接口
pub trait ControlChannel: Send + Sync {
    /// 查询设备信息
    fn get_info(&self) -> Result<BlockInfo>;

    /// 查询设备路径
    fn get_path(&self) -> Result<String>;

    /// 注册共享缓冲区，返回原始 vmoid
    fn attach_vmo(&self, vmo: &Vmo) -> Result<u16>;

    /// 查询卷管理器与本卷的信息
    fn volume_get_info(&self) -> Result<(VolumeManagerInfo, VolumeInfo)>;

    /// 查询从每个起始虚拟切片开始、分配状态相同的连续区间
    fn volume_query_slices(&self, slices: &[u64]) -> Result<Vec<VsliceRange>>;

    /// 分配虚拟切片
    fn volume_extend(&self, offset: u64, length: u64) -> Result<()>;

    /// 释放虚拟切片
    fn volume_shrink(&self, offset: u64, length: u64) -> Result<()>;

    /// 打开一条连到同一设备的新连接
    fn clone_connection(&self) -> Result<Box<dyn ControlChannel>>;
}

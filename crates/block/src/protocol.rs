//! 块设备 FIFO 协议
//!
//! 定义通过请求通道传输的定长记录，以及设备信息和卷管理器相关的结构体。
//! [`BlockFifoRequest`] 与 [`BlockFifoResponse`] 即线上格式，使用 `#[repr(C)]`
//! 保证布局稳定，尺寸在编译期断言。

use crate::config::VMOID_INVALID;
use crate::error::{BlockError, Result};

/// 请求操作码
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockOpcode {
    /// 从设备读到共享缓冲区
    Read = 1,
    /// 从共享缓冲区写到设备
    Write = 2,
    /// 将设备缓存刷到持久介质
    Flush = 3,
    /// 丢弃设备上的数据块
    Trim = 4,
    /// 注销一个 vmoid
    CloseVmoid = 5,
}

impl BlockOpcode {
    /// 从线上的原始值解析
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Read),
            2 => Some(Self::Write),
            3 => Some(Self::Flush),
            4 => Some(Self::Trim),
            5 => Some(Self::CloseVmoid),
            _ => None,
        }
    }
}

/// FIFO 请求记录
///
/// 偏移与长度均以设备块为单位（经过 `BlockTxn` 等上层转换后）。
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFifoRequest {
    /// 操作码
    pub opcode: BlockOpcode,
    /// 请求号，仅用于诊断匹配
    pub reqid: u32,
    /// 事务组号
    pub group: u16,
    /// 目标共享缓冲区
    pub vmoid: u16,
    /// 块数
    pub length: u32,
    /// 共享缓冲区内的起始块
    pub vmo_offset: u64,
    /// 设备上的起始块
    pub dev_offset: u64,
    /// 跟踪流 id，只用于观测
    pub trace_flow_id: u64,
}

impl BlockFifoRequest {
    /// 创建一个尚未分配组号和请求号的数据请求
    pub fn new(
        opcode: BlockOpcode,
        vmoid: u16,
        vmo_offset: u64,
        dev_offset: u64,
        length: u32,
    ) -> Self {
        Self {
            opcode,
            reqid: 0,
            group: 0,
            vmoid,
            length,
            vmo_offset,
            dev_offset,
            trace_flow_id: 0,
        }
    }

    /// 不携带缓冲区的刷新请求
    pub fn flush() -> Self {
        Self::new(BlockOpcode::Flush, VMOID_INVALID, 0, 0, 0)
    }

    /// 注销 `vmoid` 的请求
    pub fn close_vmoid(vmoid: u16) -> Self {
        Self::new(BlockOpcode::CloseVmoid, vmoid, 0, 0, 0)
    }

    /// 设置跟踪流 id
    pub fn with_trace_flow_id(mut self, trace_flow_id: u64) -> Self {
        self.trace_flow_id = trace_flow_id;
        self
    }
}

/// FIFO 响应记录
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockFifoResponse {
    /// 状态码，0 表示成功
    pub status: i32,
    /// 对应请求的请求号
    pub reqid: u32,
    /// 事务组号
    pub group: u16,
    /// 本响应覆盖了该组中的多少个请求
    pub count: u32,
}

impl BlockFifoResponse {
    /// 创建响应
    pub fn new(result: Result<()>, reqid: u32, group: u16, count: u32) -> Self {
        Self {
            status: crate::error::status_of(&result),
            reqid,
            group,
            count,
        }
    }

    /// 将状态码还原为结果
    pub fn result(&self) -> Result<()> {
        BlockError::from_status(self.status)
    }
}

const _: () = {
    assert!(core::mem::size_of::<BlockFifoRequest>() == 40);
    assert!(core::mem::size_of::<BlockFifoResponse>() == 16);
};

bitflags::bitflags! {
    /// 块设备属性标志
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BlockFlags: u32 {
        /// 只读设备
        const READONLY = 1 << 0;
        /// 可移除介质
        const REMOVABLE = 1 << 1;
        /// 启动分区
        const BOOTPART = 1 << 2;
        /// 支持 TRIM
        const TRIM_SUPPORT = 1 << 3;
        /// 支持 FUA 写
        const FUA_SUPPORT = 1 << 4;
    }
}

/// 块设备信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// 总块数
    pub block_count: u64,
    /// 块大小（字节）
    pub block_size: u32,
    /// 单次传输的最大字节数
    pub max_transfer_size: u32,
    /// 设备属性
    pub flags: BlockFlags,
}

/// 卷管理器信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeManagerInfo {
    /// 切片大小（字节）
    pub slice_size: u64,
    /// 卷管理器可分配的物理切片总数
    pub slice_count: u64,
    /// 已分配的物理切片数
    pub assigned_slice_count: u64,
    /// 卷管理器可扩展到的最大切片数
    pub maximum_slice_count: u64,
    /// 每个分区可寻址的虚拟切片上限
    pub max_virtual_slice: u64,
}

/// 单个卷（分区）的信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VolumeInfo {
    /// 分区已分配的切片数
    pub partition_slice_count: u64,
    /// 分区切片数上限，0 表示不限
    pub slice_limit: u64,
}

/// 虚拟切片区间查询结果
///
/// 描述从查询起点开始、分配状态相同的连续切片。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VsliceRange {
    /// 连续切片数
    pub count: u64,
    /// 是否已分配
    pub allocated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_raw_values() {
        assert_eq!(BlockOpcode::Read as u32, 1);
        assert_eq!(BlockOpcode::CloseVmoid as u32, 5);
        assert_eq!(BlockOpcode::from_raw(4), Some(BlockOpcode::Trim));
        assert_eq!(BlockOpcode::from_raw(0), None);
        assert_eq!(BlockOpcode::from_raw(6), None);
    }

    #[test]
    fn test_special_requests_carry_no_buffer() {
        let flush = BlockFifoRequest::flush();
        assert_eq!(flush.opcode, BlockOpcode::Flush);
        assert_eq!(flush.vmoid, VMOID_INVALID);
        assert_eq!(flush.length, 0);

        let close = BlockFifoRequest::close_vmoid(7);
        assert_eq!(close.opcode, BlockOpcode::CloseVmoid);
        assert_eq!(close.vmoid, 7);
    }

    #[test]
    fn test_response_status() {
        let ok = BlockFifoResponse::new(Ok(()), 1, 2, 3);
        assert_eq!(ok.result(), Ok(()));
        let err = BlockFifoResponse::new(Err(BlockError::Io), 1, 2, 1);
        assert_eq!(err.status, -40);
        assert_eq!(err.result(), Err(BlockError::Io));
    }
}

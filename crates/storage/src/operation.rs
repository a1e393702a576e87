//! 文件系统一侧的块操作描述

use block::BlockOpcode;

/// 操作类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    /// 读
    Read,
    /// 写
    Write,
    /// 丢弃
    Trim,
}

impl OperationType {
    /// 对应的 FIFO 操作码
    pub fn opcode(self) -> BlockOpcode {
        match self {
            OperationType::Read => BlockOpcode::Read,
            OperationType::Write => BlockOpcode::Write,
            OperationType::Trim => BlockOpcode::Trim,
        }
    }
}

/// 以文件系统块为单位的一次操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    /// 操作类型
    pub op_type: OperationType,
    /// 缓冲区内的起始块
    pub vmo_offset: u64,
    /// 设备上的起始块（文件系统块号）
    pub dev_offset: u64,
    /// 块数
    pub length: u64,
}

/// 绑定到某个已注册缓冲区的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferedOperation {
    /// 目标缓冲区的原始 vmoid
    pub vmoid: u16,
    /// 操作本身
    pub op: Operation,
    /// 跟踪流 id，缺省时由处理器生成
    pub trace_flow_id: Option<u64>,
}

impl BufferedOperation {
    /// 创建不带跟踪流 id 的操作
    pub fn new(vmoid: u16, op: Operation) -> Self {
        Self {
            vmoid,
            op,
            trace_flow_id: None,
        }
    }
}

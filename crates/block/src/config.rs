//! 块设备协议配置常量

/// 事务组数量
///
/// 同一个 FIFO 客户端上最多同时存在这么多个进行中的逻辑事务。
pub const MAX_TXN_GROUP_COUNT: usize = 8;

/// FIFO 默认深度（请求条目数）
pub const BLOCK_FIFO_MAX_DEPTH: usize = 512;

/// 单个设备可同时注册的共享缓冲区数量上限
pub const MAX_VMOIDS: usize = 4096;

/// 无效 vmoid，表示"未注册"
pub const VMOID_INVALID: u16 = 0;

/// 设备对单次传输大小没有限制
pub const BLOCK_MAX_TRANSFER_UNBOUNDED: u32 = u32::MAX;

/// 响应读取批量大小
pub(crate) const RESPONSE_BATCH: usize = 32;

//! 块设备协议与传输层
//!
//! 此 crate 提供文件系统访问块设备所需的协议类型和传输实现，包括：
//!
//! - [`BlockDevice`] trait - 块设备能力接口（数据面、控制面和卷管理器）
//! - [`BlockFifoClient`] - 基于请求通道的批量事务客户端，按事务组复用一条 FIFO
//! - [`RequestChannel`] trait 与 [`fifo_pair`] - 有界双向请求通道及其进程内实现
//! - [`RemoteBlockDevice`] - 通过 FIFO 与控制连接访问设备的客户端
//! - [`BlockServer`] - 设备端服务，把 FIFO 请求交给任意 [`BlockDevice`] 后端
//! - [`FakeBlockDevice`] / [`FakeFvmBlockDevice`] - 内存模拟设备
//! - [`PassThroughReadOnlyBlockDevice`] - 只读装饰器
//! - [`reset_all_slices`] - 释放卷上的全部切片
//!
//! # 事务组
//!
//! 每次 [`BlockFifoClient::transaction`] 占用一个事务组（最多
//! [`MAX_TXN_GROUP_COUNT`] 个），组内的请求全部完成后才返回，结果为组内第一个失败的状态。
//! 对端关闭后，所有进行中和之后的事务都以 [`BlockError::PeerClosed`] 结束。

pub mod channel;
pub mod config;
pub mod control;
pub mod device;
pub mod error;
pub mod fake;
pub mod fifo_client;
pub mod fvm;
pub mod protocol;
pub mod read_only;
pub mod registry;
pub mod remote;
pub mod server;
pub mod vmo;

// Re-export config
pub use config::{BLOCK_FIFO_MAX_DEPTH, MAX_TXN_GROUP_COUNT, MAX_VMOIDS, VMOID_INVALID};

// Re-export error
pub use error::{BlockError, Result};

// Re-export protocol
pub use protocol::{
    BlockFifoRequest, BlockFifoResponse, BlockFlags, BlockInfo, BlockOpcode, VolumeInfo,
    VolumeManagerInfo, VsliceRange,
};

// Re-export 传输
pub use channel::{FifoChannel, FifoServerEnd, RequestChannel, Signals, fifo_pair};
pub use control::ControlChannel;
pub use fifo_client::BlockFifoClient;
pub use remote::RemoteBlockDevice;
pub use server::{BlockServer, ServerControl};

// Re-export 设备
pub use device::BlockDevice;
pub use fake::{BlockStats, FakeBlockDevice, FakeFvmBlockDevice, TransactionHook};
pub use fvm::reset_all_slices;
pub use read_only::PassThroughReadOnlyBlockDevice;
pub use registry::VmoidRegistry;
pub use vmo::{Vmo, Vmoid};

//! 面向文件系统的块事务层
//!
//! 在 `block` crate 之上，为文件系统提供以文件系统块为单位的操作接口：
//!
//! - [`Operation`] / [`BufferedOperation`] - 操作描述
//! - [`BlockBuffer`] trait 与 [`VmoBuffer`] - 已注册到设备的按块寻址缓冲区
//! - [`DeviceTransactionHandler`] trait 与 [`BlockDeviceTransactionHandler`] - 把操作列表换算并提交到设备
//! - [`BlockTxn`] - 合并相邻操作的事务累积器

pub mod block_txn;
pub mod buffer;
pub mod operation;
pub mod transaction_handler;

pub use block_txn::BlockTxn;
pub use buffer::{BlockBuffer, VmoBuffer};
pub use operation::{BufferedOperation, Operation, OperationType};
pub use transaction_handler::{
    BlockDeviceTransactionHandler, DeviceTransactionHandler, generate_trace_flow_id,
};

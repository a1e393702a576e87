//! 设备事务处理器
//!
//! [`DeviceTransactionHandler`] 把文件系统的 [`BufferedOperation`] 列表转换为一次
//! [`BlockDevice::fifo_transaction`] 调用。文件系统块号到设备块号的换算通过
//! [`DeviceTransactionHandler::block_number_to_device`] 完成，不同的文件系统可以覆盖它。

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use block::{BlockDevice, BlockError, BlockFifoRequest, Result};
use log::{debug, info};

use crate::operation::BufferedOperation;

static NEXT_TRACE_FLOW_ID: AtomicU64 = AtomicU64::new(1);

/// 生成进程内唯一的跟踪流 id
pub fn generate_trace_flow_id() -> u64 {
    NEXT_TRACE_FLOW_ID.fetch_add(1, Ordering::Relaxed)
}

/// 设备事务处理器接口
pub trait DeviceTransactionHandler {
    /// 底层块设备
    fn device(&self) -> &dyn BlockDevice;

    /// 文件系统块大小（字节）
    fn fs_block_size(&self) -> u32;

    /// 设备块大小（字节）
    fn device_block_size(&self) -> u32;

    /// 把文件系统块号（或块数）换算为设备块号，溢出时返回 `None`
    fn block_number_to_device(&self, block: u64) -> Option<u64> {
        block.checked_mul((self.fs_block_size() / self.device_block_size()) as u64)
    }

    /// 提交一批同类型的操作并等待完成
    ///
    /// 空列表直接成功。换算后的偏移溢出或长度放不进请求记录时返回
    /// [`BlockError::OutOfRange`]，此时不会发出任何请求。
    ///
    /// # Panics
    /// 列表中的操作类型不一致时 panic
    fn run_requests(&self, operations: &[BufferedOperation]) -> Result<()> {
        let Some(first) = operations.first() else {
            return Ok(());
        };
        let op_type = first.op.op_type;
        let mut requests = Vec::with_capacity(operations.len());
        for operation in operations {
            assert_eq!(
                operation.op.op_type, op_type,
                "mixed operation types in one request batch"
            );
            let (vmo_offset, dev_offset, length) = to_device_units(
                self,
                operation.op.vmo_offset,
                operation.op.dev_offset,
                operation.op.length,
            )?;
            let trace_flow_id = operation
                .trace_flow_id
                .unwrap_or_else(generate_trace_flow_id);
            requests.push(
                BlockFifoRequest::new(
                    op_type.opcode(),
                    operation.vmoid,
                    vmo_offset,
                    dev_offset,
                    length,
                )
                .with_trace_flow_id(trace_flow_id),
            );
        }
        debug!("transaction handler: {} {:?} requests", requests.len(), op_type);
        self.device().fifo_transaction(&requests)
    }

    /// 刷新设备缓存
    fn flush(&self) -> Result<()> {
        self.device().fifo_transaction(&[BlockFifoRequest::flush()])
    }
}

/// 把 (缓冲区偏移, 设备偏移, 长度) 从文件系统块换算为设备块
///
/// 任一字段溢出，或长度达到 `u32::MAX`（请求记录无法表示）时返回 [`BlockError::OutOfRange`]。
pub(crate) fn to_device_units<H: DeviceTransactionHandler + ?Sized>(
    handler: &H,
    vmo_offset: u64,
    dev_offset: u64,
    length: u64,
) -> Result<(u64, u64, u32)> {
    let convert = |block| {
        handler
            .block_number_to_device(block)
            .ok_or(BlockError::OutOfRange)
    };
    let length = convert(length)?;
    if length >= u32::MAX as u64 {
        return Err(BlockError::OutOfRange);
    }
    Ok((convert(vmo_offset)?, convert(dev_offset)?, length as u32))
}

/// 固定文件系统块大小的标准处理器
pub struct BlockDeviceTransactionHandler {
    device: Arc<dyn BlockDevice>,
    fs_block_size: u32,
    device_block_size: u32,
}

impl BlockDeviceTransactionHandler {
    /// 在 `device` 上创建块大小为 `fs_block_size` 的处理器
    ///
    /// # 错误
    /// - [`BlockError::InvalidArgument`]：`fs_block_size` 不是设备块大小的正整数倍
    pub fn new(device: Arc<dyn BlockDevice>, fs_block_size: u32) -> Result<Self> {
        let device_block_size = device.block_get_info()?.block_size;
        if device_block_size == 0
            || fs_block_size < device_block_size
            || fs_block_size % device_block_size != 0
        {
            return Err(BlockError::InvalidArgument);
        }
        info!(
            "transaction handler: fs block {} on device block {}",
            fs_block_size, device_block_size
        );
        Ok(Self {
            device,
            fs_block_size,
            device_block_size,
        })
    }

    /// 共享的设备句柄
    pub fn device_arc(&self) -> &Arc<dyn BlockDevice> {
        &self.device
    }
}

impl DeviceTransactionHandler for BlockDeviceTransactionHandler {
    fn device(&self) -> &dyn BlockDevice {
        self.device.as_ref()
    }

    fn fs_block_size(&self) -> u32 {
        self.fs_block_size
    }

    fn device_block_size(&self) -> u32 {
        self.device_block_size
    }
}

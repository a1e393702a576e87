//! 块事务合并器
//!
//! [`BlockTxn`] 以文件系统块为单位累积操作，合并相邻或重叠的请求，
//! 在 [`BlockTxn::transact`] 时换算为设备块并一次性提交。
//!
//! drop 时仍有未提交的请求会被隐式提交；这条路径上的错误只记录日志，
//! 不会返回给任何调用者。需要知道结果的调用者必须在离开作用域前显式调用
//! [`BlockTxn::transact`]。

use block::{BlockFifoRequest, BlockOpcode, Result, VMOID_INVALID};
use log::{debug, error};

use crate::transaction_handler::{DeviceTransactionHandler, to_device_units};

/// 块事务
pub struct BlockTxn<'a> {
    handler: &'a dyn DeviceTransactionHandler,
    requests: Vec<BlockFifoRequest>,
}

impl<'a> BlockTxn<'a> {
    /// 创建空事务，提交时经由 `handler` 换算并发往设备
    pub fn new(handler: &'a dyn DeviceTransactionHandler) -> Self {
        Self {
            handler,
            requests: Vec::new(),
        }
    }

    /// 加入一个操作（文件系统块单位）
    ///
    /// 与已有的同缓冲区、同操作码的请求合并：起点相同时取较长者，
    /// 缓冲区与设备两侧都首尾相接时拼接，否则追加新请求。
    ///
    /// # Panics
    /// `nblocks` 超过 `u32::MAX` 时 panic
    pub fn enqueue_operation(
        &mut self,
        op: BlockOpcode,
        vmoid: u16,
        vmo_offset: u64,
        dev_offset: u64,
        nblocks: u64,
    ) {
        assert!(
            nblocks <= u32::MAX as u64,
            "too many blocks in one operation: {}",
            nblocks
        );
        let nblocks = nblocks as u32;
        for request in self
            .requests
            .iter_mut()
            .filter(|r| r.vmoid == vmoid && r.opcode == op)
        {
            if request.vmo_offset == vmo_offset {
                request.length = request.length.max(nblocks);
                return;
            }
            let contiguous = request.vmo_offset + request.length as u64 == vmo_offset
                && request.dev_offset + request.length as u64 == dev_offset;
            if contiguous {
                if let Some(length) = request.length.checked_add(nblocks) {
                    request.length = length;
                    return;
                }
            }
        }
        self.requests.push(BlockFifoRequest::new(
            op, vmoid, vmo_offset, dev_offset, nblocks,
        ));
    }

    /// 加入读操作
    pub fn enqueue_read(&mut self, vmoid: u16, vmo_offset: u64, dev_offset: u64, nblocks: u64) {
        self.enqueue_operation(BlockOpcode::Read, vmoid, vmo_offset, dev_offset, nblocks);
    }

    /// 加入写操作
    pub fn enqueue_write(&mut self, vmoid: u16, vmo_offset: u64, dev_offset: u64, nblocks: u64) {
        self.enqueue_operation(BlockOpcode::Write, vmoid, vmo_offset, dev_offset, nblocks);
    }

    /// TRIM 不携带缓冲区
    pub fn enqueue_trim(&mut self, dev_offset: u64, nblocks: u64) {
        self.enqueue_operation(BlockOpcode::Trim, VMOID_INVALID, 0, dev_offset, nblocks);
    }

    /// 刷新请求不参与合并
    pub fn enqueue_flush(&mut self) {
        self.requests.push(BlockFifoRequest::flush());
    }

    /// 待提交的请求（文件系统块单位）
    pub fn pending(&self) -> &[BlockFifoRequest] {
        &self.requests
    }

    /// 是否没有待提交的请求
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// 提交所有待提交的请求
    ///
    /// 没有待提交的请求时直接成功。无论成功与否，待提交列表都会被清空。
    pub fn transact(&mut self) -> Result<()> {
        if self.requests.is_empty() {
            return Ok(());
        }
        let mut requests = core::mem::take(&mut self.requests);
        for request in &mut requests {
            (request.vmo_offset, request.dev_offset, request.length) = to_device_units(
                self.handler,
                request.vmo_offset,
                request.dev_offset,
                request.length as u64,
            )?;
        }
        debug!("block txn: submitting {} requests", requests.len());
        self.handler.device().fifo_transaction(&requests)
    }
}

impl Drop for BlockTxn<'_> {
    fn drop(&mut self) {
        let pending = self.requests.len();
        if let Err(e) = self.transact() {
            error!("block txn: implicit transact of {} requests failed: {}", pending, e);
        }
    }
}

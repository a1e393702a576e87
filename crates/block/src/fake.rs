//! 内存模拟块设备
//!
//! [`FakeBlockDevice`] 是 [`BlockDevice`] 的参考实现，数据保存在内存中，
//! 用于测试以及作为 [`BlockServer`](crate::BlockServer) 的后端。
//! [`FakeFvmBlockDevice`] 在其上增加卷管理器的切片分配。

use std::collections::BTreeSet;

use log::debug;
use sync::SpinLock;

use crate::config::{BLOCK_MAX_TRANSFER_UNBOUNDED, MAX_VMOIDS};
use crate::device::BlockDevice;
use crate::error::{BlockError, Result};
use crate::protocol::{
    BlockFifoRequest, BlockFlags, BlockInfo, BlockOpcode, VolumeInfo, VolumeManagerInfo,
    VsliceRange,
};
use crate::registry::VmoidRegistry;
use crate::vmo::{Vmo, Vmoid};

/// 请求钩子：在处理每条请求之前调用，返回错误时该请求以此错误失败
pub type TransactionHook = Box<dyn Fn(&BlockFifoRequest) -> Result<()> + Send + Sync>;

/// 设备处理过的请求统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStats {
    /// `fifo_transaction` 调用次数
    pub transactions: u64,
    /// 读请求数
    pub reads: u64,
    /// 写请求数
    pub writes: u64,
    /// 刷新请求数
    pub flushes: u64,
    /// TRIM 请求数
    pub trims: u64,
    /// 读取的块数
    pub blocks_read: u64,
    /// 写入的块数
    pub blocks_written: u64,
}

struct FakeState {
    data: Vec<u8>,
    flags: BlockFlags,
    stats: BlockStats,
}

/// 内存模拟的块设备
pub struct FakeBlockDevice {
    state: SpinLock<FakeState>,
    registry: VmoidRegistry,
    hook: SpinLock<Option<TransactionHook>>,
    block_count: u64,
    block_size: u32,
    max_transfer_size: u32,
}

impl FakeBlockDevice {
    /// 创建 `block_count` 个 `block_size` 字节块的设备
    ///
    /// # Panics
    /// `block_size` 为 0 时 panic
    pub fn new(block_count: u64, block_size: u32) -> Self {
        assert!(block_size > 0, "block size must be positive");
        Self {
            state: SpinLock::new(FakeState {
                data: vec![0u8; (block_count * block_size as u64) as usize],
                flags: BlockFlags::TRIM_SUPPORT,
                stats: BlockStats::default(),
            }),
            registry: VmoidRegistry::new(MAX_VMOIDS),
            hook: SpinLock::new(None),
            block_count,
            block_size,
            max_transfer_size: BLOCK_MAX_TRANSFER_UNBOUNDED,
        }
    }

    /// 设置可同时注册的缓冲区数量
    pub fn with_vmoid_capacity(mut self, capacity: usize) -> Self {
        self.registry = VmoidRegistry::new(capacity);
        self
    }

    /// 设置单次传输的最大字节数
    pub fn with_max_transfer_size(mut self, max_transfer_size: u32) -> Self {
        self.max_transfer_size = max_transfer_size;
        self
    }

    /// 设置设备属性
    pub fn set_flags(&self, flags: BlockFlags) {
        self.state.lock().flags = flags;
    }

    /// 安装请求钩子，替换之前的钩子
    pub fn set_hook(&self, hook: Option<TransactionHook>) {
        *self.hook.lock() = hook;
    }

    /// 当前统计
    pub fn stats(&self) -> BlockStats {
        self.state.lock().stats
    }

    /// 清零统计
    pub fn reset_stats(&self) {
        self.state.lock().stats = BlockStats::default();
    }

    /// 已注册的缓冲区数量
    pub fn attached_vmo_count(&self) -> usize {
        self.registry.len()
    }

    /// 绕过 FIFO 直接读取设备内容（用于检查）
    pub fn read_raw(&self, block: u64, buf: &mut [u8]) -> Result<()> {
        let state = self.state.lock();
        let start = self.byte_offset(block)?;
        let end = start.checked_add(buf.len()).ok_or(BlockError::OutOfRange)?;
        if end > state.data.len() {
            return Err(BlockError::OutOfRange);
        }
        buf.copy_from_slice(&state.data[start..end]);
        Ok(())
    }

    /// 绕过 FIFO 直接写入设备内容（用于准备数据）
    pub fn write_raw(&self, block: u64, buf: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        let start = self.byte_offset(block)?;
        let end = start.checked_add(buf.len()).ok_or(BlockError::OutOfRange)?;
        if end > state.data.len() {
            return Err(BlockError::OutOfRange);
        }
        state.data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn byte_offset(&self, block: u64) -> Result<usize> {
        block
            .checked_mul(self.block_size as u64)
            .and_then(|b| usize::try_from(b).ok())
            .ok_or(BlockError::OutOfRange)
    }

    /// 检查设备块区间是否合法
    fn check_device_range(&self, request: &BlockFifoRequest) -> Result<()> {
        if request.length == 0 {
            return Err(BlockError::InvalidArgument);
        }
        let end = request
            .dev_offset
            .checked_add(request.length as u64)
            .ok_or(BlockError::OutOfRange)?;
        if end > self.block_count {
            return Err(BlockError::OutOfRange);
        }
        Ok(())
    }

    fn process(&self, request: &BlockFifoRequest) -> Result<()> {
        if let Some(hook) = self.hook.lock().as_ref() {
            hook(request)?;
        }
        let bs = self.block_size as u64;
        match request.opcode {
            BlockOpcode::Read | BlockOpcode::Write => {
                self.check_device_range(request)?;
                let vmo = self.registry.get(request.vmoid)?;
                let len = (request.length as u64 * bs) as usize;
                let vmo_start = request
                    .vmo_offset
                    .checked_mul(bs)
                    .ok_or(BlockError::OutOfRange)?;
                let dev_start = self.byte_offset(request.dev_offset)?;
                let mut state = self.state.lock();
                if request.opcode == BlockOpcode::Read {
                    vmo.write(vmo_start, &state.data[dev_start..dev_start + len])?;
                    state.stats.reads += 1;
                    state.stats.blocks_read += request.length as u64;
                } else {
                    vmo.read(vmo_start, &mut state.data[dev_start..dev_start + len])?;
                    state.stats.writes += 1;
                    state.stats.blocks_written += request.length as u64;
                }
                Ok(())
            }
            BlockOpcode::Flush => {
                self.state.lock().stats.flushes += 1;
                Ok(())
            }
            BlockOpcode::Trim => {
                let mut state = self.state.lock();
                if !state.flags.contains(BlockFlags::TRIM_SUPPORT) {
                    return Err(BlockError::NotSupported);
                }
                self.check_device_range(request)?;
                let start = self.byte_offset(request.dev_offset)?;
                let len = (request.length as u64 * bs) as usize;
                state.data[start..start + len].fill(0);
                state.stats.trims += 1;
                Ok(())
            }
            BlockOpcode::CloseVmoid => self.registry.detach(request.vmoid).map(|_| ()),
        }
    }
}

impl BlockDevice for FakeBlockDevice {
    fn fifo_transaction(&self, requests: &[BlockFifoRequest]) -> Result<()> {
        self.state.lock().stats.transactions += 1;
        let mut status = Ok(());
        for request in requests {
            if let Err(e) = self.process(request) {
                debug!("fake block: {:?} failed: {}", request.opcode, e);
                if status.is_ok() {
                    status = Err(e);
                }
            }
        }
        status
    }

    fn get_device_path(&self) -> Result<String> {
        Ok(String::from("/dev/fake-block"))
    }

    fn block_get_info(&self) -> Result<BlockInfo> {
        Ok(BlockInfo {
            block_count: self.block_count,
            block_size: self.block_size,
            max_transfer_size: self.max_transfer_size,
            flags: self.state.lock().flags,
        })
    }

    fn block_attach_vmo(&self, vmo: &Vmo) -> Result<Vmoid> {
        self.registry.attach(vmo).map(Vmoid::new)
    }
}

/// 带卷管理器的内存模拟块设备
///
/// 设备的虚拟地址空间按 `slice_size` 划分为切片；读写只能落在已分配的切片上。
/// 切片 0 在创建时即被分配，不能释放。
pub struct FakeFvmBlockDevice {
    device: FakeBlockDevice,
    allocated: SpinLock<BTreeSet<u64>>,
    slice_size: u64,
    slice_capacity: u64,
    max_virtual_slice: u64,
}

impl FakeFvmBlockDevice {
    /// 创建设备
    ///
    /// `slice_capacity` 为卷管理器可分配的物理切片总数。
    ///
    /// # Panics
    /// `slice_size` 不是块大小的正整数倍时 panic
    pub fn new(block_count: u64, block_size: u32, slice_size: u64, slice_capacity: u64) -> Self {
        assert!(
            slice_size > 0 && slice_size % block_size as u64 == 0,
            "slice size must be a multiple of the block size"
        );
        let max_virtual_slice = block_count * block_size as u64 / slice_size;
        Self {
            device: FakeBlockDevice::new(block_count, block_size),
            allocated: SpinLock::new(BTreeSet::from([0])),
            slice_size,
            slice_capacity,
            max_virtual_slice,
        }
    }

    /// 底层的内存设备
    pub fn device(&self) -> &FakeBlockDevice {
        &self.device
    }

    /// 当前已分配的切片数
    pub fn allocated_slice_count(&self) -> u64 {
        self.allocated.lock().len() as u64
    }

    fn blocks_per_slice(&self) -> u64 {
        self.slice_size / self.device.block_size as u64
    }

    fn check_slice_range(&self, offset: u64, length: u64) -> Result<()> {
        let end = offset.checked_add(length).ok_or(BlockError::OutOfRange)?;
        if end > self.max_virtual_slice {
            return Err(BlockError::OutOfRange);
        }
        Ok(())
    }

    /// 检查请求的设备块是否都落在已分配的切片上
    fn check_mapped(&self, request: &BlockFifoRequest) -> Result<()> {
        if !matches!(
            request.opcode,
            BlockOpcode::Read | BlockOpcode::Write | BlockOpcode::Trim
        ) || request.length == 0
        {
            return Ok(());
        }
        let bps = self.blocks_per_slice();
        let first = request.dev_offset / bps;
        let last = request
            .dev_offset
            .checked_add(request.length as u64 - 1)
            .ok_or(BlockError::OutOfRange)?
            / bps;
        if last >= self.max_virtual_slice {
            return Err(BlockError::OutOfRange);
        }
        let allocated = self.allocated.lock();
        if (first..=last).all(|slice| allocated.contains(&slice)) {
            Ok(())
        } else {
            Err(BlockError::OutOfRange)
        }
    }
}

impl BlockDevice for FakeFvmBlockDevice {
    fn fifo_transaction(&self, requests: &[BlockFifoRequest]) -> Result<()> {
        for request in requests {
            self.check_mapped(request)?;
        }
        self.device.fifo_transaction(requests)
    }

    fn get_device_path(&self) -> Result<String> {
        Ok(String::from("/dev/fake-fvm/fake-block-p-1/block"))
    }

    fn block_get_info(&self) -> Result<BlockInfo> {
        self.device.block_get_info()
    }

    fn block_attach_vmo(&self, vmo: &Vmo) -> Result<Vmoid> {
        self.device.block_attach_vmo(vmo)
    }

    fn volume_get_info(&self) -> Result<(VolumeManagerInfo, VolumeInfo)> {
        let assigned = self.allocated_slice_count();
        Ok((
            VolumeManagerInfo {
                slice_size: self.slice_size,
                slice_count: self.slice_capacity,
                assigned_slice_count: assigned,
                maximum_slice_count: self.slice_capacity,
                max_virtual_slice: self.max_virtual_slice,
            },
            VolumeInfo {
                partition_slice_count: assigned,
                slice_limit: 0,
            },
        ))
    }

    fn volume_query_slices(&self, slices: &[u64]) -> Result<Vec<VsliceRange>> {
        let allocated = self.allocated.lock();
        slices
            .iter()
            .map(|&start| {
                if start >= self.max_virtual_slice {
                    return Err(BlockError::OutOfRange);
                }
                let state = allocated.contains(&start);
                let count = (start..self.max_virtual_slice)
                    .take_while(|slice| allocated.contains(slice) == state)
                    .count() as u64;
                Ok(VsliceRange {
                    count,
                    allocated: state,
                })
            })
            .collect()
    }

    fn volume_extend(&self, offset: u64, length: u64) -> Result<()> {
        self.check_slice_range(offset, length)?;
        let mut allocated = self.allocated.lock();
        if (offset..offset + length).any(|slice| allocated.contains(&slice)) {
            return Err(BlockError::InvalidArgument);
        }
        if allocated.len() as u64 + length > self.slice_capacity {
            return Err(BlockError::ResourceExhausted);
        }
        allocated.extend(offset..offset + length);
        Ok(())
    }

    fn volume_shrink(&self, offset: u64, length: u64) -> Result<()> {
        if offset == 0 {
            return Err(BlockError::InvalidArgument);
        }
        self.check_slice_range(offset, length)?;
        let mut allocated = self.allocated.lock();
        if !(offset..offset + length).all(|slice| allocated.contains(&slice)) {
            return Err(BlockError::InvalidArgument);
        }
        for slice in offset..offset + length {
            allocated.remove(&slice);
        }
        Ok(())
    }
}

//! 卷管理器辅助函数

use log::{debug, info};

use crate::device::BlockDevice;
use crate::error::{BlockError, Result};

/// 释放卷上除切片 0 以外的所有已分配切片
///
/// 从切片 1 开始逐段查询分配状态，对每段已分配的区间调用一次
/// [`BlockDevice::volume_shrink`]，直到查询返回 [`BlockError::OutOfRange`]
/// （越过卷的虚拟地址空间）为止。
///
/// # 错误
/// - 查询或释放失败时返回对应错误
/// - 设备报告长度为 0 的区间时返回 [`BlockError::Internal`]（否则无法前进）
pub fn reset_all_slices(device: &dyn BlockDevice) -> Result<()> {
    let mut slice = 1u64;
    loop {
        let range = match device.volume_query_slices(&[slice]) {
            Ok(ranges) => ranges.first().copied().ok_or(BlockError::Internal)?,
            Err(BlockError::OutOfRange) => break,
            Err(e) => return Err(e),
        };
        if range.count == 0 {
            return Err(BlockError::Internal);
        }
        if range.allocated {
            debug!("fvm: shrinking slices [{}, +{})", slice, range.count);
            device.volume_shrink(slice, range.count)?;
        }
        slice += range.count;
    }
    info!("fvm: reset all slices, scanned up to {}", slice);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FakeBlockDevice, FakeFvmBlockDevice};

    #[test]
    fn test_reset_frees_everything_but_slice_zero() {
        let fvm = FakeFvmBlockDevice::new(128, 512, 4096, 16);
        fvm.volume_extend(1, 2).unwrap();
        fvm.volume_extend(5, 4).unwrap();
        fvm.volume_extend(15, 1).unwrap();
        assert_eq!(fvm.allocated_slice_count(), 8);

        reset_all_slices(&fvm).unwrap();
        assert_eq!(fvm.allocated_slice_count(), 1);
    }

    #[test]
    fn test_reset_on_fresh_volume_is_noop() {
        let fvm = FakeFvmBlockDevice::new(64, 512, 4096, 8);
        reset_all_slices(&fvm).unwrap();
        assert_eq!(fvm.allocated_slice_count(), 1);
    }

    #[test]
    fn test_reset_without_volume_support() {
        let device = FakeBlockDevice::new(8, 512);
        assert_eq!(reset_all_slices(&device), Err(BlockError::NotSupported));
    }
}

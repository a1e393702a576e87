//! 自旋锁实现
//!
//! 基于原子操作实现自旋锁机制，通过 [`lock_api::RawMutex`] 暴露给上层。

use core::{
    hint,
    sync::atomic::{AtomicBool, Ordering},
};

/// 连续自旋多少次后让出 CPU
const SPIN_LIMIT: u32 = 64;

/// 自旋锁结构体，提供互斥访问临界区的能力。
///
/// 不可重入 (即不能在持锁时再次调用 `lock()`)。
/// 竞争激烈时，自旋超过 [`SPIN_LIMIT`] 次后会调用 `yield_now` 让出 CPU，
/// 避免在用户态长时间空转。
#[derive(Debug)]
pub struct RawSpinLock {
    lock: AtomicBool,
}

impl RawSpinLock {
    /// 创建一个新的 RawSpinLock 实例。
    pub const fn new() -> Self {
        RawSpinLock {
            lock: AtomicBool::new(false),
        }
    }
}

impl Default for RawSpinLock {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: lock/try_lock 在成功时都通过 Acquire 语义独占 lock 标志，
// unlock 通过 Release 语义释放，满足 RawMutex 的互斥约定。
unsafe impl lock_api::RawMutex for RawSpinLock {
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = RawSpinLock::new();

    type GuardMarker = lock_api::GuardSend;

    fn lock(&self) {
        let mut spins = 0;
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            // 等待期间只读，减少缓存行争用
            while self.lock.load(Ordering::Relaxed) {
                if spins < SPIN_LIMIT {
                    spins += 1;
                    hint::spin_loop();
                } else {
                    std::thread::yield_now();
                }
            }
        }
    }

    fn try_lock(&self) -> bool {
        self.lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    unsafe fn unlock(&self) {
        self.lock.store(false, Ordering::Release);
    }

    fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Relaxed)
    }
}

//! 同步原语
//!
//! 向块设备栈的其它模块提供基本的锁和阻塞等待原语：
//!
//! - [`RawSpinLock`] - 基于原子操作的自旋锁，实现了 [`lock_api::RawMutex`]
//! - [`SpinLock`] - 基于 [`RawSpinLock`] 的互斥锁，保护内部数据
//! - [`WaitQueue`] - 与 [`SpinLockGuard`] 配合使用的等待队列（条件变量）
//!
//! 锁本身只用于保护很短的临界区；需要长时间阻塞的等待（例如等待设备完成请求）
//! 一律通过 [`WaitQueue`] 挂起当前线程，而不是持锁自旋。

mod raw_spin_lock;
mod spin_lock;
mod wait_queue;

pub use raw_spin_lock::*;
pub use spin_lock::*;
pub use wait_queue::*;

//! 等待队列
//!
//! 与 [`SpinLock`](crate::SpinLock) 配合使用的条件变量：等待者在持有数据锁时登记自己，
//! 然后释放数据锁并挂起线程；通知者修改共享状态后唤醒一个或全部等待者。
//!
//! 唤醒基于 `std::thread::park`/`unpark`，`unpark` 先于 `park` 发生时不会丢失唤醒。
//! 与标准库条件变量一样，等待可能被虚假唤醒，调用者必须在循环中重新检查条件，
//! 或直接使用 [`WaitQueue::wait_while`]。

use core::sync::atomic::{AtomicU64, Ordering};
use std::collections::VecDeque;
use std::thread::{self, Thread};

use crate::{SpinLock, SpinLockGuard};

struct Waiter {
    id: u64,
    thread: Thread,
}

/// 线程等待队列
pub struct WaitQueue {
    waiters: SpinLock<VecDeque<Waiter>>,
    next_id: AtomicU64,
}

impl WaitQueue {
    /// 创建一个空的等待队列
    pub const fn new() -> Self {
        Self {
            waiters: SpinLock::new(VecDeque::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// 释放 `guard` 对应的锁并挂起当前线程，被唤醒后重新获取锁再返回。
    ///
    /// 登记发生在释放数据锁之前，因此只要通知者在修改状态之后调用
    /// [`notify_one`](Self::notify_one)/[`notify_all`](Self::notify_all)，就不会错过唤醒。
    pub fn wait<T>(&self, guard: &mut SpinLockGuard<'_, T>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.waiters.lock().push_back(Waiter {
            id,
            thread: thread::current(),
        });
        SpinLockGuard::unlocked(guard, thread::park);
        // 虚假唤醒时自己仍在队列中
        self.waiters.lock().retain(|w| w.id != id);
    }

    /// 在 `condition` 返回 true 期间持续等待。
    pub fn wait_while<T, F>(&self, guard: &mut SpinLockGuard<'_, T>, mut condition: F)
    where
        F: FnMut(&mut T) -> bool,
    {
        while condition(&mut **guard) {
            self.wait(guard);
        }
    }

    /// 唤醒最早登记的一个等待者
    pub fn notify_one(&self) {
        let waiter = self.waiters.lock().pop_front();
        if let Some(waiter) = waiter {
            waiter.thread.unpark();
        }
    }

    /// 唤醒全部等待者
    pub fn notify_all(&self) {
        let waiters = core::mem::take(&mut *self.waiters.lock());
        for waiter in waiters {
            waiter.thread.unpark();
        }
    }

    /// 当前登记的等待者数量（仅用于调试/测试）
    pub fn waiter_count(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    struct Flag {
        lock: SpinLock<bool>,
        queue: WaitQueue,
    }

    #[test]
    fn test_wait_until_notified() {
        let flag = Arc::new(Flag {
            lock: SpinLock::new(false),
            queue: WaitQueue::new(),
        });

        let waiter = {
            let flag = flag.clone();
            thread::spawn(move || {
                let mut guard = flag.lock.lock();
                flag.queue.wait_while(&mut guard, |ready| !*ready);
                assert!(*guard);
            })
        };

        thread::sleep(Duration::from_millis(20));
        *flag.lock.lock() = true;
        flag.queue.notify_all();
        waiter.join().unwrap();
        assert_eq!(flag.queue.waiter_count(), 0);
    }

    #[test]
    fn test_notify_before_wait_is_not_lost() {
        let flag = Flag {
            lock: SpinLock::new(true),
            queue: WaitQueue::new(),
        };
        flag.queue.notify_one();
        let mut guard = flag.lock.lock();
        // 条件已满足，不会进入等待
        flag.queue.wait_while(&mut guard, |ready| !*ready);
        assert!(*guard);
    }

    #[test]
    fn test_notify_one_wakes_waiters_in_turn() {
        let state = Arc::new((SpinLock::new(0usize), WaitQueue::new()));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                thread::spawn(move || {
                    let (lock, queue) = &*state;
                    let mut tickets = lock.lock();
                    queue.wait_while(&mut tickets, |t| *t == 0);
                    *tickets -= 1;
                })
            })
            .collect();

        for _ in 0..4 {
            thread::sleep(Duration::from_millis(5));
            *state.0.lock() += 1;
            state.1.notify_one();
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*state.0.lock(), 0);
    }
}

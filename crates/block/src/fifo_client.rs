//! FIFO 客户端
//!
//! 在异步的 [`RequestChannel`] 之上提供同步、线程安全的 [`BlockFifoClient::transaction`]。
//!
//! # 事务组
//!
//! 客户端持有 [`MAX_TXN_GROUP_COUNT`] 个事务组。每次 `transaction` 调用占用一个组，
//! 组内状态变化为：
//!
//! ```text
//! Idle -> Active(pending, first_error) -> Draining -> Idle
//! ```
//!
//! 调用者给本次所有请求打上组号后写入通道，然后在该组的等待队列上睡眠；
//! 后台读取线程不断从通道取出响应，按 `count` 递减对应组的未完成计数并记录第一个错误，
//! 计数归零时唤醒调用者。所有组都被占用时，新的调用者阻塞直到有组被归还。
//!
//! # 对端关闭
//!
//! 读取线程或写入路径观察到 [`BlockError::PeerClosed`] 后，事务组池进入关闭状态：
//! 所有正在等待完成或等待分配组的调用者立即以 `PeerClosed` 返回，之后的调用也一样。
//! 已写入但尚未被设备确认的请求可能丢失（至多一次语义）。

use core::sync::atomic::{AtomicU32, Ordering};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};
use sync::{SpinLock, WaitQueue};

use crate::channel::{RequestChannel, Signals};
use crate::config::{MAX_TXN_GROUP_COUNT, RESPONSE_BATCH};
use crate::error::{BlockError, Result};
use crate::protocol::{BlockFifoRequest, BlockFifoResponse};

#[derive(Debug)]
struct GroupState {
    active: bool,
    pending: usize,
    status: Result<()>,
}

impl GroupState {
    const fn idle() -> Self {
        Self {
            active: false,
            pending: 0,
            status: Ok(()),
        }
    }

    /// 第一个错误胜出
    fn record(&mut self, status: Result<()>) {
        if self.status.is_ok() {
            self.status = status;
        }
    }
}

struct PoolState {
    groups: [GroupState; MAX_TXN_GROUP_COUNT],
    free: VecDeque<u16>,
    closed: bool,
}

/// 事务组池
///
/// 一把粗粒度锁保护全部组状态；等待则按组分开，读取线程只唤醒完成的那个组。
pub(crate) struct GroupPool {
    state: SpinLock<PoolState>,
    available: WaitQueue,
    completed: [WaitQueue; MAX_TXN_GROUP_COUNT],
}

impl GroupPool {
    pub(crate) fn new() -> Self {
        Self {
            state: SpinLock::new(PoolState {
                groups: core::array::from_fn(|_| GroupState::idle()),
                free: (0..MAX_TXN_GROUP_COUNT as u16).collect(),
                closed: false,
            }),
            available: WaitQueue::new(),
            completed: core::array::from_fn(|_| WaitQueue::new()),
        }
    }

    /// 分配一个空闲组，全部被占用时阻塞
    pub(crate) fn acquire(&self) -> Result<GroupGuard<'_>> {
        let mut state = self.state.lock();
        self.available
            .wait_while(&mut state, |s| s.free.is_empty() && !s.closed);
        if state.closed {
            return Err(BlockError::PeerClosed);
        }
        let Some(id) = state.free.pop_front() else {
            return Err(BlockError::BadState);
        };
        let group = &mut state.groups[id as usize];
        debug_assert!(!group.active);
        *group = GroupState {
            active: true,
            pending: 0,
            status: Ok(()),
        };
        Ok(GroupGuard { pool: self, id })
    }

    /// 处理一条响应
    pub(crate) fn complete(&self, id: u16, count: u32, status: Result<()>) {
        let mut state = self.state.lock();
        let Some(group) = state.groups.get_mut(id as usize) else {
            warn!("block fifo: response for invalid group {}", id);
            return;
        };
        if !group.active || group.pending == 0 {
            warn!("block fifo: unexpected response for idle group {}", id);
            return;
        }
        let mut count = count as usize;
        if count > group.pending {
            warn!(
                "block fifo: group {} response counts {} requests, only {} pending",
                id, count, group.pending
            );
            count = group.pending;
        }
        group.pending -= count;
        group.record(status);
        let done = group.pending == 0;
        drop(state);
        if done {
            self.completed[id as usize].notify_all();
        }
    }

    /// 进入关闭状态，释放所有等待者
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        drop(state);
        info!("block fifo: peer closed, releasing all groups");
        self.available.notify_all();
        for queue in &self.completed {
            queue.notify_all();
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn release(&self, id: u16) {
        let mut state = self.state.lock();
        state.groups[id as usize] = GroupState::idle();
        state.free.push_back(id);
        drop(state);
        self.available.notify_one();
    }
}

/// 已分配事务组的 RAII 保护器，离开作用域时把组归还给池
pub(crate) struct GroupGuard<'a> {
    pool: &'a GroupPool,
    id: u16,
}

impl GroupGuard<'_> {
    pub(crate) fn id(&self) -> u16 {
        self.id
    }

    /// 登记即将写入的请求数，必须在第一条请求写入之前调用
    pub(crate) fn begin(&self, count: usize) {
        self.pool.state.lock().groups[self.id as usize].pending += count;
    }

    /// 写入失败时撤销尚未写入的 `count` 条请求，并记录错误
    pub(crate) fn abandon(&self, count: usize, error: BlockError) {
        let mut state = self.pool.state.lock();
        let group = &mut state.groups[self.id as usize];
        group.pending = group.pending.saturating_sub(count);
        group.record(Err(error));
        let done = group.pending == 0;
        drop(state);
        if done {
            self.pool.completed[self.id as usize].notify_all();
        }
    }

    /// 阻塞直到组内请求全部完成（或通道关闭），返回组状态
    pub(crate) fn wait(&self) -> Result<()> {
        let mut state = self.pool.state.lock();
        self.pool.completed[self.id as usize].wait_while(&mut state, |s| {
            s.groups[self.id as usize].pending > 0 && !s.closed
        });
        let group = &state.groups[self.id as usize];
        if group.pending > 0 {
            return Err(BlockError::PeerClosed);
        }
        group.status
    }
}

impl Drop for GroupGuard<'_> {
    fn drop(&mut self) {
        self.pool.release(self.id);
    }
}

struct ClientShared {
    channel: Box<dyn RequestChannel>,
    groups: GroupPool,
    write_lock: SpinLock<()>,
    next_reqid: AtomicU32,
}

impl ClientShared {
    /// 写入一个分块，通道满时等待可写
    ///
    /// 返回实际写入的条数与遇到的错误
    fn write_chunk(&self, chunk: &[BlockFifoRequest]) -> (usize, Result<()>) {
        let mut written = 0;
        while written < chunk.len() {
            let result = {
                let _guard = self.write_lock.lock();
                self.channel.write(&chunk[written..])
            };
            match result {
                Ok(0) => {
                    if let Err(e) = self.channel.wait(Signals::WRITABLE) {
                        return (written, Err(e));
                    }
                }
                Ok(n) => written += n,
                Err(e) => return (written, Err(e)),
            }
        }
        (written, Ok(()))
    }

    fn read_responses(&self) {
        let mut responses = [BlockFifoResponse::default(); RESPONSE_BATCH];
        loop {
            match self.channel.read(&mut responses) {
                Ok(count) => {
                    for response in &responses[..count] {
                        self.groups
                            .complete(response.group, response.count, response.result());
                    }
                }
                Err(BlockError::PeerClosed) => break,
                Err(e) => {
                    debug!("block fifo: reader stopping: {}", e);
                    break;
                }
            }
        }
        self.groups.close();
    }
}

/// 块设备 FIFO 客户端
///
/// 任意多个线程可以并发调用 [`transaction`](Self::transaction)；
/// 每个客户端有一个后台读取线程负责分发响应。
pub struct BlockFifoClient {
    shared: Arc<ClientShared>,
    reader: Option<JoinHandle<()>>,
}

impl BlockFifoClient {
    /// 在 `channel` 上创建客户端并启动读取线程
    pub fn new(channel: impl RequestChannel + 'static) -> Self {
        let shared = Arc::new(ClientShared {
            channel: Box::new(channel),
            groups: GroupPool::new(),
            write_lock: SpinLock::new(()),
            next_reqid: AtomicU32::new(0),
        });
        let reader = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("block-fifo-reader".into())
                .spawn(move || shared.read_responses())
        };
        let reader = match reader {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("block fifo: failed to spawn reader thread: {}", e);
                shared.groups.close();
                None
            }
        };
        Self { shared, reader }
    }

    /// 提交一批请求并等待全部完成
    ///
    /// 空批次直接成功，不产生任何 I/O。超过通道深度的批次会被拆分写入；
    /// 返回组内第一个失败请求的状态，全部成功时返回 `Ok(())`。
    pub fn transaction(&self, requests: &[BlockFifoRequest]) -> Result<()> {
        if requests.is_empty() {
            return Ok(());
        }
        let group = self.shared.groups.acquire()?;
        let mut tagged = requests.to_vec();
        for request in &mut tagged {
            request.group = group.id();
            request.reqid = self.shared.next_reqid.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            "block fifo: group {} submitting {} requests",
            group.id(),
            tagged.len()
        );

        group.begin(tagged.len());
        let capacity = self.shared.channel.capacity().max(1);
        let mut submitted = 0;
        for chunk in tagged.chunks(capacity) {
            let (written, result) = self.shared.write_chunk(chunk);
            submitted += written;
            if let Err(e) = result {
                warn!(
                    "block fifo: group {} write failed after {} of {} requests: {}",
                    group.id(),
                    submitted,
                    tagged.len(),
                    e
                );
                group.abandon(tagged.len() - submitted, e);
                if e == BlockError::PeerClosed {
                    self.shared.groups.close();
                }
                break;
            }
        }
        group.wait()
    }

    /// 通道是否已经关闭
    pub fn is_closed(&self) -> bool {
        self.shared.groups.is_closed()
    }
}

impl Drop for BlockFifoClient {
    fn drop(&mut self) {
        self.shared.channel.close();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

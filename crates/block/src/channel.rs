//! 请求通道
//!
//! 客户端与设备之间的有界双向通道：请求记录从客户端流向设备，响应记录反向流回。
//! [`RequestChannel`] 是客户端看到的接口；[`fifo_pair`] 提供一个进程内实现，
//! 返回客户端端点 [`FifoChannel`] 与设备端点 [`FifoServerEnd`]。
//!
//! 写入是非阻塞的：通道剩余容量不足时只写入能放下的部分，返回实际写入的数量，
//! 这属于正常的背压而不是错误。任意一端关闭（或被 drop）后，另一端上所有
//! 进行中和之后的操作都以 [`BlockError::PeerClosed`] 结束。

use std::collections::VecDeque;
use std::sync::Arc;

use sync::{SpinLock, WaitQueue};

use crate::error::{BlockError, Result};
use crate::protocol::{BlockFifoRequest, BlockFifoResponse};

bitflags::bitflags! {
    /// 通道就绪信号
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Signals: u32 {
        /// 有可读取的记录
        const READABLE = 1 << 0;
        /// 有剩余容量可写入
        const WRITABLE = 1 << 1;
        /// 对端已关闭
        const PEER_CLOSED = 1 << 2;
    }
}

/// 客户端请求通道接口
pub trait RequestChannel: Send + Sync {
    /// 尽可能多地写入请求，返回实际写入的条数（可能为 0）
    fn write(&self, requests: &[BlockFifoRequest]) -> Result<usize>;

    /// 阻塞直到至少有一条响应可读，返回填入 `responses` 的条数
    fn read(&self, responses: &mut [BlockFifoResponse]) -> Result<usize>;

    /// 阻塞直到 `signals` 中的任一信号或 [`Signals::PEER_CLOSED`] 被置位，返回被置位的信号
    fn wait(&self, signals: Signals) -> Result<Signals>;

    /// 通道深度（可同时容纳的请求条数）
    fn capacity(&self) -> usize;

    /// 关闭本端，唤醒两端所有阻塞的调用者
    fn close(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Client,
    Server,
}

impl Side {
    fn peer(self) -> Self {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }
}

struct FifoState {
    requests: VecDeque<BlockFifoRequest>,
    responses: VecDeque<BlockFifoResponse>,
    client_open: bool,
    server_open: bool,
}

impl FifoState {
    fn is_open(&self, side: Side) -> bool {
        match side {
            Side::Client => self.client_open,
            Side::Server => self.server_open,
        }
    }

    /// 检查本端仍然打开、对端没有关闭
    fn check(&self, side: Side) -> Result<()> {
        if !self.is_open(side) {
            return Err(BlockError::BadState);
        }
        if !self.is_open(side.peer()) {
            return Err(BlockError::PeerClosed);
        }
        Ok(())
    }
}

struct FifoShared {
    state: SpinLock<FifoState>,
    changed: WaitQueue,
    depth: usize,
}

impl FifoShared {
    fn push<T: Copy>(
        &self,
        side: Side,
        items: &[T],
        queue: impl Fn(&mut FifoState) -> &mut VecDeque<T>,
    ) -> Result<usize> {
        let mut state = self.state.lock();
        state.check(side)?;
        let q = queue(&mut *state);
        let count = items.len().min(self.depth - q.len());
        q.extend(items[..count].iter().copied());
        drop(state);
        if count > 0 {
            self.changed.notify_all();
        }
        Ok(count)
    }

    fn pop<T: Copy>(
        &self,
        side: Side,
        out: &mut [T],
        queue: impl Fn(&mut FifoState) -> &mut VecDeque<T>,
    ) -> Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock();
        self.changed.wait_while(&mut state, |s| {
            queue(s).is_empty() && s.is_open(side) && s.is_open(side.peer())
        });
        if !state.is_open(side) {
            return Err(BlockError::BadState);
        }
        // 对端关闭前已经入队的记录仍然可以读出
        let q = queue(&mut *state);
        if q.is_empty() {
            return Err(BlockError::PeerClosed);
        }
        let count = out.len().min(q.len());
        for (slot, item) in out.iter_mut().zip(q.drain(..count)) {
            *slot = item;
        }
        drop(state);
        self.changed.notify_all();
        Ok(count)
    }

    fn wait(&self, side: Side, signals: Signals) -> Result<Signals> {
        let mut state = self.state.lock();
        loop {
            if !state.is_open(side) {
                return Err(BlockError::BadState);
            }
            let (inbound, outbound) = match side {
                Side::Client => (state.responses.len(), state.requests.len()),
                Side::Server => (state.requests.len(), state.responses.len()),
            };
            let mut asserted = Signals::empty();
            if inbound > 0 {
                asserted |= Signals::READABLE;
            }
            if outbound < self.depth {
                asserted |= Signals::WRITABLE;
            }
            if !state.is_open(side.peer()) {
                asserted |= Signals::PEER_CLOSED;
            }
            let hit = asserted & (signals | Signals::PEER_CLOSED);
            if !hit.is_empty() {
                return Ok(hit);
            }
            self.changed.wait(&mut state);
        }
    }

    fn close(&self, side: Side) {
        let mut state = self.state.lock();
        match side {
            Side::Client => state.client_open = false,
            Side::Server => state.server_open = false,
        }
        drop(state);
        self.changed.notify_all();
    }
}

/// 创建深度为 `depth` 的进程内 FIFO，返回 (客户端端点, 设备端点)
///
/// # Panics
/// `depth` 为 0 时 panic
pub fn fifo_pair(depth: usize) -> (FifoChannel, FifoServerEnd) {
    assert!(depth > 0, "fifo depth must be positive");
    let shared = Arc::new(FifoShared {
        state: SpinLock::new(FifoState {
            requests: VecDeque::with_capacity(depth),
            responses: VecDeque::with_capacity(depth),
            client_open: true,
            server_open: true,
        }),
        changed: WaitQueue::new(),
        depth,
    });
    (
        FifoChannel {
            shared: shared.clone(),
        },
        FifoServerEnd { shared },
    )
}

/// FIFO 的客户端端点
pub struct FifoChannel {
    shared: Arc<FifoShared>,
}

impl RequestChannel for FifoChannel {
    fn write(&self, requests: &[BlockFifoRequest]) -> Result<usize> {
        self.shared.push(Side::Client, requests, |s| &mut s.requests)
    }

    fn read(&self, responses: &mut [BlockFifoResponse]) -> Result<usize> {
        self.shared.pop(Side::Client, responses, |s| &mut s.responses)
    }

    fn wait(&self, signals: Signals) -> Result<Signals> {
        self.shared.wait(Side::Client, signals)
    }

    fn capacity(&self) -> usize {
        self.shared.depth
    }

    fn close(&self) {
        self.shared.close(Side::Client);
    }
}

impl Drop for FifoChannel {
    fn drop(&mut self) {
        self.close();
    }
}

/// FIFO 的设备端点
pub struct FifoServerEnd {
    shared: Arc<FifoShared>,
}

impl FifoServerEnd {
    /// 阻塞直到至少有一条请求可读，返回填入 `requests` 的条数
    pub fn read_requests(&self, requests: &mut [BlockFifoRequest]) -> Result<usize> {
        self.shared.pop(Side::Server, requests, |s| &mut s.requests)
    }

    /// 尽可能多地写入响应，返回实际写入的条数
    pub fn write_responses(&self, responses: &[BlockFifoResponse]) -> Result<usize> {
        self.shared.push(Side::Server, responses, |s| &mut s.responses)
    }

    /// 写入全部响应，通道满时阻塞等待
    pub fn write_all_responses(&self, mut responses: &[BlockFifoResponse]) -> Result<()> {
        while !responses.is_empty() {
            let written = self.write_responses(responses)?;
            responses = &responses[written..];
            if !responses.is_empty() {
                self.wait(Signals::WRITABLE)?;
            }
        }
        Ok(())
    }

    /// 阻塞直到 `signals` 中的任一信号或 [`Signals::PEER_CLOSED`] 被置位
    pub fn wait(&self, signals: Signals) -> Result<Signals> {
        self.shared.wait(Side::Server, signals)
    }

    /// 通道深度
    pub fn capacity(&self) -> usize {
        self.shared.depth
    }

    /// 关闭设备端点
    pub fn close(&self) {
        self.shared.close(Side::Server);
    }
}

impl Drop for FifoServerEnd {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::BlockOpcode;
    use std::thread;
    use std::time::Duration;

    fn read_req(n: u64) -> BlockFifoRequest {
        BlockFifoRequest::new(BlockOpcode::Read, 1, n, n, 1)
    }

    #[test]
    fn test_partial_write_is_not_an_error() {
        let (client, server) = fifo_pair(2);
        let reqs = [read_req(0), read_req(1), read_req(2)];
        assert_eq!(client.write(&reqs).unwrap(), 2);
        assert_eq!(client.write(&reqs[2..]).unwrap(), 0);
        assert_eq!(server.wait(Signals::READABLE).unwrap(), Signals::READABLE);

        let mut out = [read_req(9); 4];
        assert_eq!(server.read_requests(&mut out).unwrap(), 2);
        assert_eq!(out[0], reqs[0]);
        assert_eq!(out[1], reqs[1]);
        assert_eq!(client.wait(Signals::WRITABLE).unwrap(), Signals::WRITABLE);
        assert_eq!(client.write(&reqs[2..]).unwrap(), 1);
    }

    #[test]
    fn test_read_blocks_until_response() {
        let (client, server) = fifo_pair(4);
        let responder = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            server
                .write_all_responses(&[BlockFifoResponse::new(Ok(()), 7, 1, 1)])
                .unwrap();
            server
        });
        let mut out = [BlockFifoResponse::default(); 4];
        assert_eq!(client.read(&mut out).unwrap(), 1);
        assert_eq!(out[0].reqid, 7);
        drop(responder.join().unwrap());
    }

    #[test]
    fn test_peer_closed_wakes_reader() {
        let (client, server) = fifo_pair(4);
        let closer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            drop(server);
        });
        let mut out = [BlockFifoResponse::default(); 1];
        assert_eq!(client.read(&mut out), Err(BlockError::PeerClosed));
        assert_eq!(client.write(&[read_req(0)]), Err(BlockError::PeerClosed));
        assert_eq!(
            client.wait(Signals::READABLE).unwrap(),
            Signals::PEER_CLOSED
        );
        closer.join().unwrap();
    }

    #[test]
    fn test_pending_records_readable_after_peer_close() {
        let (client, server) = fifo_pair(4);
        client.write(&[read_req(3)]).unwrap();
        drop(client);
        let mut out = [read_req(0); 2];
        assert_eq!(server.read_requests(&mut out).unwrap(), 1);
        assert_eq!(out[0], read_req(3));
        assert_eq!(server.read_requests(&mut out), Err(BlockError::PeerClosed));
    }

    #[test]
    fn test_local_close() {
        let (client, _server) = fifo_pair(4);
        client.close();
        assert_eq!(client.write(&[read_req(0)]), Err(BlockError::BadState));
        let mut out = [BlockFifoResponse::default(); 1];
        assert_eq!(client.read(&mut out), Err(BlockError::BadState));
    }
}

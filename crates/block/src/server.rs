//! 设备端服务
//!
//! [`BlockServer`] 在后台线程上从 [`FifoServerEnd`] 读取请求，逐条交给任意
//! [`BlockDevice`] 后端执行，再把结果写回响应。同一批读到的请求中，
//! 相邻且组号、状态都相同的完成会合并为一条 `count > 1` 的响应。
//!
//! [`ServerControl`] 是服务端交出的控制连接。后端不支持卷管理器时，
//! 卷调用会拆除这条连接，之后它上面的所有调用都返回 [`BlockError::PeerClosed`]。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use crate::channel::{FifoChannel, FifoServerEnd, fifo_pair};
use crate::config::BLOCK_FIFO_MAX_DEPTH;
use crate::control::ControlChannel;
use crate::device::BlockDevice;
use crate::error::{BlockError, Result, status_of};
use crate::protocol::{
    BlockFifoRequest, BlockFifoResponse, BlockInfo, VolumeInfo, VolumeManagerInfo, VsliceRange,
};
use crate::vmo::Vmo;

/// 块设备服务端
pub struct BlockServer {
    device: Arc<dyn BlockDevice>,
    fifo: Arc<FifoServerEnd>,
    worker: Option<JoinHandle<()>>,
}

impl BlockServer {
    /// 以默认深度启动服务，返回服务端与客户端 FIFO 端点
    pub fn new(device: Arc<dyn BlockDevice>) -> Result<(Self, FifoChannel)> {
        Self::with_depth(device, BLOCK_FIFO_MAX_DEPTH)
    }

    /// 以指定的 FIFO 深度启动服务
    pub fn with_depth(device: Arc<dyn BlockDevice>, depth: usize) -> Result<(Self, FifoChannel)> {
        let (client, server) = fifo_pair(depth);
        let fifo = Arc::new(server);
        let worker = {
            let device = device.clone();
            let fifo = fifo.clone();
            thread::Builder::new()
                .name("block-server".into())
                .spawn(move || serve(device.as_ref(), &fifo))
                .map_err(|e| {
                    warn!("block server: failed to spawn worker: {}", e);
                    BlockError::ResourceExhausted
                })?
        };
        info!("block server: started, fifo depth {}", depth);
        Ok((
            Self {
                device,
                fifo,
                worker: Some(worker),
            },
            client,
        ))
    }

    /// 打开一条新的控制连接
    pub fn control(&self) -> ServerControl {
        ServerControl::new(self.device.clone())
    }

    /// 关闭 FIFO 并等待后台线程退出
    pub fn shutdown(&mut self) {
        self.fifo.close();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("block server: worker panicked");
            }
        }
    }
}

impl Drop for BlockServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 工作线程退出（包括 panic 展开）时关闭 FIFO，让客户端看到 `PeerClosed`
struct CloseOnExit<'a>(&'a FifoServerEnd);

impl Drop for CloseOnExit<'_> {
    fn drop(&mut self) {
        self.0.close();
    }
}

fn serve(device: &dyn BlockDevice, fifo: &FifoServerEnd) {
    let _close = CloseOnExit(fifo);
    let mut requests = vec![BlockFifoRequest::flush(); fifo.capacity()];
    let mut responses = Vec::with_capacity(fifo.capacity());
    loop {
        let count = match fifo.read_requests(&mut requests) {
            Ok(count) => count,
            Err(e) => {
                debug!("block server: fifo closed ({})", e);
                break;
            }
        };
        responses.clear();
        for request in &requests[..count] {
            let status = status_of(&device.fifo_transaction(core::slice::from_ref(request)));
            coalesce(&mut responses, request, status);
        }
        if let Err(e) = fifo.write_all_responses(&responses) {
            debug!("block server: dropping {} responses ({})", responses.len(), e);
            break;
        }
    }
}

/// 把一条完成追加到响应列表，能合并时并入最后一条
fn coalesce(responses: &mut Vec<BlockFifoResponse>, request: &BlockFifoRequest, status: i32) {
    match responses.last_mut() {
        Some(last) if last.group == request.group && last.status == status => {
            last.count += 1;
            last.reqid = request.reqid;
        }
        _ => responses.push(BlockFifoResponse {
            status,
            reqid: request.reqid,
            group: request.group,
            count: 1,
        }),
    }
}

/// 服务端的控制连接
pub struct ServerControl {
    device: Arc<dyn BlockDevice>,
    open: AtomicBool,
}

impl ServerControl {
    fn new(device: Arc<dyn BlockDevice>) -> Self {
        Self {
            device,
            open: AtomicBool::new(true),
        }
    }

    /// 连接是否已被拆除
    pub fn is_closed(&self) -> bool {
        !self.open.load(Ordering::Acquire)
    }

    fn check(&self) -> Result<()> {
        if self.is_closed() {
            Err(BlockError::PeerClosed)
        } else {
            Ok(())
        }
    }

    fn volume_call<T>(&self, call: impl FnOnce(&dyn BlockDevice) -> Result<T>) -> Result<T> {
        self.check()?;
        match call(self.device.as_ref()) {
            Err(BlockError::NotSupported) => {
                warn!("block control: volume call on a non-volume device, closing connection");
                self.open.store(false, Ordering::Release);
                Err(BlockError::PeerClosed)
            }
            result => result,
        }
    }
}

impl ControlChannel for ServerControl {
    fn get_info(&self) -> Result<BlockInfo> {
        self.check()?;
        self.device.block_get_info()
    }

    fn get_path(&self) -> Result<String> {
        self.check()?;
        self.device.get_device_path()
    }

    fn attach_vmo(&self, vmo: &Vmo) -> Result<u16> {
        self.check()?;
        // 令牌的所有权交给远端客户端，这里只取出原始 id
        let mut vmoid = self.device.block_attach_vmo(vmo)?;
        Ok(vmoid.take_id())
    }

    fn volume_get_info(&self) -> Result<(VolumeManagerInfo, VolumeInfo)> {
        self.volume_call(|device| device.volume_get_info())
    }

    fn volume_query_slices(&self, slices: &[u64]) -> Result<Vec<VsliceRange>> {
        self.volume_call(|device| device.volume_query_slices(slices))
    }

    fn volume_extend(&self, offset: u64, length: u64) -> Result<()> {
        self.volume_call(|device| device.volume_extend(offset, length))
    }

    fn volume_shrink(&self, offset: u64, length: u64) -> Result<()> {
        self.volume_call(|device| device.volume_shrink(offset, length))
    }

    fn clone_connection(&self) -> Result<Box<dyn ControlChannel>> {
        self.check()?;
        Ok(Box::new(ServerControl::new(self.device.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::RequestChannel;
    use crate::fake::{FakeBlockDevice, FakeFvmBlockDevice};
    use crate::protocol::BlockOpcode;

    fn tagged(opcode: BlockOpcode, group: u16, reqid: u32) -> BlockFifoRequest {
        let mut request = BlockFifoRequest::new(opcode, 0, 0, 0, 1);
        request.group = group;
        request.reqid = reqid;
        request
    }

    #[test]
    fn test_coalesce_same_group_and_status() {
        let mut responses = Vec::new();
        coalesce(&mut responses, &tagged(BlockOpcode::Flush, 1, 1), 0);
        coalesce(&mut responses, &tagged(BlockOpcode::Flush, 1, 2), 0);
        coalesce(&mut responses, &tagged(BlockOpcode::Flush, 1, 3), -40);
        coalesce(&mut responses, &tagged(BlockOpcode::Flush, 2, 4), -40);
        assert_eq!(responses.len(), 3);
        assert_eq!((responses[0].count, responses[0].reqid), (2, 2));
        assert_eq!((responses[1].count, responses[1].status), (1, -40));
        assert_eq!(responses[2].group, 2);
    }

    #[test]
    fn test_server_answers_batch() {
        let device = Arc::new(FakeBlockDevice::new(8, 512));
        let (server, client) = BlockServer::new(device.clone()).unwrap();
        let batch = [
            tagged(BlockOpcode::Flush, 3, 1),
            tagged(BlockOpcode::Flush, 3, 2),
            tagged(BlockOpcode::Flush, 3, 3),
        ];
        assert_eq!(client.write(&batch).unwrap(), 3);

        let mut seen = 0;
        let mut out = [BlockFifoResponse::default(); 4];
        while seen < 3 {
            let n = client.read(&mut out).unwrap();
            for response in &out[..n] {
                assert_eq!(response.group, 3);
                assert_eq!(response.result(), Ok(()));
                seen += response.count;
            }
        }
        assert_eq!(device.stats().flushes, 3);
        drop(server);
        assert_eq!(client.read(&mut out), Err(BlockError::PeerClosed));
    }

    #[test]
    fn test_worker_panic_closes_fifo() {
        let read_only = crate::read_only::PassThroughReadOnlyBlockDevice::new(Arc::new(
            FakeBlockDevice::new(8, 512),
        ));
        let (server, client) = BlockServer::new(Arc::new(read_only)).unwrap();
        let write = tagged(BlockOpcode::Write, 0, 1);
        assert_eq!(client.write(&[write]).unwrap(), 1);

        let mut out = [BlockFifoResponse::default(); 1];
        assert_eq!(client.read(&mut out), Err(BlockError::PeerClosed));
        drop(server);
    }

    #[test]
    fn test_control_reports_device() {
        let device = Arc::new(FakeBlockDevice::new(8, 512));
        let (server, _client) = BlockServer::new(device.clone()).unwrap();
        let control = server.control();
        assert_eq!(control.get_info().unwrap().block_count, 8);
        assert_eq!(control.get_path().unwrap(), "/dev/fake-block");
        let id = control.attach_vmo(&Vmo::create(512)).unwrap();
        assert_ne!(id, crate::config::VMOID_INVALID);
        assert_eq!(device.attached_vmo_count(), 1);
    }

    #[test]
    fn test_volume_call_tears_down_connection_on_plain_device() {
        let (server, _client) = BlockServer::new(Arc::new(FakeBlockDevice::new(8, 512))).unwrap();
        let control = server.control();
        let other = control.clone_connection().unwrap();

        assert_eq!(control.volume_get_info(), Err(BlockError::PeerClosed));
        assert!(control.is_closed());
        assert_eq!(control.get_info(), Err(BlockError::PeerClosed));
        assert!(control.clone_connection().is_err());
        // 其他连接不受影响
        assert_eq!(other.get_info().unwrap().block_size, 512);
    }

    #[test]
    fn test_volume_calls_on_fvm_device() {
        let device = Arc::new(FakeFvmBlockDevice::new(64, 512, 4096, 8));
        let (server, _client) = BlockServer::new(device).unwrap();
        let control = server.control();
        control.volume_extend(1, 2).unwrap();
        assert_eq!(
            control.volume_query_slices(&[1]).unwrap(),
            vec![VsliceRange { count: 2, allocated: true }]
        );
        // 卷管理器自身的错误不会拆除连接
        assert_eq!(control.volume_shrink(0, 1), Err(BlockError::InvalidArgument));
        assert!(!control.is_closed());
    }
}

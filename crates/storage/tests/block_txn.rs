//! BlockTxn 与事务处理器在模拟设备上的行为

use std::sync::Arc;

use block::{BlockDevice, BlockError, BlockOpcode, FakeBlockDevice};
use log::Level;
use storage::{
    BlockBuffer, BlockDeviceTransactionHandler, BlockTxn, BufferedOperation,
    DeviceTransactionHandler, Operation, OperationType, VmoBuffer,
};

const FS_BLOCK: u32 = 2048;
const DEV_BLOCK: u32 = 512;

fn setup(fs_blocks: u64) -> (Arc<FakeBlockDevice>, BlockDeviceTransactionHandler) {
    let fake = Arc::new(FakeBlockDevice::new(
        fs_blocks * (FS_BLOCK / DEV_BLOCK) as u64,
        DEV_BLOCK,
    ));
    let handler = BlockDeviceTransactionHandler::new(fake.clone(), FS_BLOCK).unwrap();
    (fake, handler)
}

#[test]
fn test_empty_transact_is_free() {
    let (fake, handler) = setup(8);
    let mut txn = BlockTxn::new(&handler);
    assert_eq!(txn.transact(), Ok(()));
    drop(txn);
    assert_eq!(fake.stats().transactions, 0);
}

#[test]
fn test_transact_converts_units() {
    let (fake, handler) = setup(16);
    let buffer = VmoBuffer::new(fake.clone(), 4, FS_BLOCK).unwrap();
    for i in 0..4 {
        buffer.write_block(i, &[i as u8 + 1; FS_BLOCK as usize]).unwrap();
    }

    let mut txn = BlockTxn::new(&handler);
    txn.enqueue_write(buffer.vmoid(), 0, 5, 2);
    txn.enqueue_write(buffer.vmoid(), 2, 7, 2);
    assert_eq!(txn.pending().len(), 1);
    txn.transact().unwrap();
    assert!(txn.is_empty());

    let stats = fake.stats();
    assert_eq!((stats.writes, stats.blocks_written), (1, 16));
    let mut raw = [0u8; DEV_BLOCK as usize];
    // 文件系统块 7 = 设备块 28
    fake.read_raw(28, &mut raw).unwrap();
    assert_eq!(raw, [3u8; DEV_BLOCK as usize]);
}

#[test]
fn test_failed_transact_clears_pending() {
    let (fake, handler) = setup(4);
    let buffer = VmoBuffer::new(fake.clone(), 1, FS_BLOCK).unwrap();
    let mut txn = BlockTxn::new(&handler);
    txn.enqueue_write(buffer.vmoid(), 0, 100, 1);
    assert_eq!(txn.transact(), Err(BlockError::OutOfRange));

    let before = fake.stats().transactions;
    assert_eq!(txn.transact(), Ok(()));
    drop(txn);
    assert_eq!(fake.stats().transactions, before);
}

#[test]
fn test_drop_flushes_pending() {
    let (fake, handler) = setup(4);
    {
        let mut txn = BlockTxn::new(&handler);
        txn.enqueue_flush();
    }
    assert_eq!(fake.stats().flushes, 1);
}

#[test]
fn test_drop_logs_and_swallows_error() {
    test_support::logger::init();
    let (fake, handler) = setup(4);
    fake.set_hook(Some(Box::new(|req| {
        if req.opcode == BlockOpcode::Flush {
            Err(BlockError::Io)
        } else {
            Ok(())
        }
    })));
    {
        let mut txn = BlockTxn::new(&handler);
        txn.enqueue_flush();
    }
    assert!(test_support::logger::contains(
        Level::Error,
        "implicit transact of 1 requests failed: i/o error"
    ));
}

#[test]
fn test_run_requests_reads_back() {
    let (fake, handler) = setup(8);
    let source = VmoBuffer::new(fake.clone(), 2, FS_BLOCK).unwrap();
    source.write_block(0, &[0xA1; FS_BLOCK as usize]).unwrap();
    source.write_block(1, &[0xB2; FS_BLOCK as usize]).unwrap();
    let write = BufferedOperation::new(
        source.vmoid(),
        Operation {
            op_type: OperationType::Write,
            vmo_offset: 0,
            dev_offset: 3,
            length: 2,
        },
    );
    handler.run_requests(&[write]).unwrap();
    handler.flush().unwrap();

    let sink = VmoBuffer::new(fake.clone(), 2, FS_BLOCK).unwrap();
    let read = BufferedOperation::new(
        sink.vmoid(),
        Operation {
            op_type: OperationType::Read,
            vmo_offset: 0,
            dev_offset: 3,
            length: 2,
        },
    );
    handler.run_requests(&[read]).unwrap();
    let mut head = [0u8; 8];
    sink.read_block(1, &mut head).unwrap();
    assert_eq!(head, [0xB2; 8]);

    assert_eq!(handler.run_requests(&[]), Ok(()));
    assert_eq!(fake.stats().flushes, 1);
    drop(source);
    drop(sink);
    assert_eq!(fake.attached_vmo_count(), 0);
}

#[test]
fn test_handler_over_read_only_device() {
    let (fake, _) = setup(4);
    let read_only: Arc<dyn BlockDevice> =
        Arc::new(block::PassThroughReadOnlyBlockDevice::new(fake.clone()));
    let handler = BlockDeviceTransactionHandler::new(read_only, FS_BLOCK).unwrap();
    assert_eq!(handler.flush(), Ok(()));
    assert_eq!(handler.device().volume_extend(1, 1), Err(BlockError::AccessDenied));
}

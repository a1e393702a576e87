//! 测试日志捕获
//!
//! [`init`] 把一个捕获型 [`log::Log`] 注册为全局 logger，之后所有 `log` 宏的输出
//! 都会被记录下来，测试可以通过 [`contains`] / [`take`] 检查。
//!
//! 同一个测试二进制中的测试并行运行、共享同一个 logger，因此断言时应匹配
//! 足够具体的消息片段，而不是依赖记录的条数。

use std::sync::{Mutex, Once};

use lazy_static::lazy_static;
use log::{Level, LevelFilter, Log, Metadata, Record};

/// 一条被捕获的日志记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRecord {
    /// 日志级别
    pub level: Level,
    /// 日志目标（通常是模块路径）
    pub target: String,
    /// 格式化后的消息
    pub message: String,
}

lazy_static! {
    static ref RECORDS: Mutex<Vec<CapturedRecord>> = Mutex::new(Vec::new());
}

static INIT: Once = Once::new();

static LOGGER: CaptureLogger = CaptureLogger;

struct CaptureLogger;

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let captured = CapturedRecord {
            level: record.level(),
            target: record.target().to_string(),
            message: record.args().to_string(),
        };
        if let Ok(mut records) = RECORDS.lock() {
            records.push(captured);
        }
    }

    fn flush(&self) {}
}

/// 注册捕获 logger（可重复调用）
///
/// 如果其它 logger 已经注册，捕获不会生效。
pub fn init() {
    INIT.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(LevelFilter::Trace);
        }
    });
}

/// 取出并清空目前捕获的所有记录
pub fn take() -> Vec<CapturedRecord> {
    RECORDS
        .lock()
        .map(|mut records| core::mem::take(&mut *records))
        .unwrap_or_default()
}

/// 是否捕获过级别为 `level`、消息包含 `needle` 的记录
pub fn contains(level: Level, needle: &str) -> bool {
    RECORDS.lock().is_ok_and(|records| {
        records
            .iter()
            .any(|r| r.level == level && r.message.contains(needle))
    })
}

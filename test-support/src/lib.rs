//! 测试支持 crate
//!
//! 提供日志捕获等测试工具
//!
//! 注意：这里不依赖 `block` / `storage`（避免循环依赖），只依赖 `log` 门面。

pub mod logger;

//! # SIAF Expediente
//!
//! 从 SIAF 门户获取支付流程（expediente）状态，以及解析门户导出的电子表格
//!
//! ## 架构设计
//!
//! 本系统采用四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 时钟与会话存储，只暴露 trait
//! - `MemorySessionStore` / `FileSessionStore` - 带 TTL 的键值存储
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 不做网络请求的纯能力
//! - `CaptchaService` - 本地验证码签发与校验
//! - `ResponseParser` - 结果表格解析与补全
//! - `SpreadsheetIngestor` - 电子表格导入
//!
//! ### ③ 连接层（Clients）
//! - `clients/` - 与门户通信的两种方式
//! - `DirectConnector` - 直连门户（cookie 会话）
//! - `ProxyConnector` - 通过中继服务（共享密钥 + 递增超时重试）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/acquisition` - 策略回退与会话管理
//! - `orchestrator/diagnostics` - 连通性诊断
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;

// 重新导出常用类型
pub use clients::{DirectConnector, PortalConnector, ProxyConnector};
pub use config::Config;
pub use error::{AppError, AppResult, ErrorKind};
pub use models::{
    AcquisitionRequest, CaptchaChallenge, ExpedienteRecord, IngestOutcome, QueryOutcome,
    ResolvedSummary, Strategy,
};
pub use orchestrator::{Diagnostics, Orchestrator};

//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责策略调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `acquisition` - 获取流程编排
//! - 获取验证码：直连 → 中继 → 本地验证码
//! - 提交查询：按会话句柄依次尝试直连、中继
//! - 记录每个策略的失败原因，全部失败时一起返回
//! - 管理会话作用域与中继令牌缓存
//!
//! ### `diagnostics` - 连通性诊断
//! - 探测直连页面和中继健康检查
//! - 把失败原因翻译成提示
//!
//! ## 层次关系
//!
//! ```text
//! acquisition::Orchestrator
//!     ↓
//! clients (连接层：DirectConnector / ProxyConnector)
//! services (能力层：captcha / parser / spreadsheet)
//!     ↓
//! infrastructure (基础设施：Clock / SessionStore)
//! ```
//!
//! ## 设计原则
//!
//! 1. **顺序执行**：同一次操作中的策略严格依次尝试，第一个成功即返回
//! 2. **会话隔离**：直连和中继的句柄分开存放，不会互相替用
//! 3. **向下依赖**：编排层 → clients / services → infrastructure

pub mod acquisition;
pub mod diagnostics;

// 重新导出主要类型
pub use acquisition::Orchestrator;
pub use diagnostics::Diagnostics;

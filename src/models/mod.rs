//! 数据模型
//!
//! 请求、验证码、会话句柄以及解析后的 expediente 记录

pub mod challenge;
pub mod record;
pub mod request;
pub mod session;

pub use challenge::{CaptchaChallenge, ImageData, Strategy};
pub use record::{ExpedienteRecord, IngestOutcome, QueryOutcome, ResolvedSummary};
pub use request::{AcquisitionRequest, QueryForm};
pub use session::{ConnectorKind, SessionHandle};

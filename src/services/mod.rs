//! 业务能力层
//!
//! 验证码签发与校验、结果表格解析、电子表格导入。这里不做任何网络请求。

pub mod captcha_service;
pub mod dates;
pub mod glyphs;
pub mod response_parser;
pub mod spreadsheet_ingestor;

pub use captcha_service::{CaptchaRenderer, CaptchaService, RasterRenderer};
pub use dates::DateSystem;
pub use response_parser::{best_record, reconcile, summarize, ParsedTable, ResponseParser};
pub use spreadsheet_ingestor::{SheetCell, SpreadsheetIngestor};

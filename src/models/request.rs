//! 查询请求

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

/// 调用方的查询参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionRequest {
    /// 获取验证码时拿到的会话键
    pub session_key: String,
    /// 中继模式的备用令牌
    #[serde(default)]
    pub relay_token: Option<String>,
    /// 年度 (anoEje)
    pub year: String,
    /// 执行单位编码 (secEjec)
    pub unit_code: String,
    pub expediente: String,
    /// 用户识别出的验证码
    pub captcha_text: String,
    /// 调用方自己的单据编号，原样回传
    pub document_code: String,
}

/// 门户表单的四个字段
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryForm {
    #[serde(rename = "anoEje")]
    pub year: String,
    #[serde(rename = "secEjec")]
    pub unit_code: String,
    #[serde(rename = "expediente")]
    pub expediente: String,
    #[serde(rename = "j_captcha")]
    pub captcha: String,
}

impl QueryForm {
    /// 按门户要求的顺序生成表单键值对
    pub fn pairs(&self) -> [(&'static str, &str); 4] {
        [
            ("anoEje", self.year.as_str()),
            ("secEjec", self.unit_code.as_str()),
            ("expediente", self.expediente.as_str()),
            ("j_captcha", self.captcha.as_str()),
        ]
    }
}

impl AcquisitionRequest {
    /// 校验字段格式
    ///
    /// # 返回
    /// 第一个不合法的字段对应的 `ValidationError`
    pub fn validate(&self) -> AppResult<()> {
        if self.session_key.trim().is_empty() {
            return Err(AppError::invalid_field("session_key", "不能为空"));
        }
        check_digits("year", self.year.trim(), 4, 4)?;
        check_digits("unit_code", self.unit_code.trim(), 1, 6)?;
        check_digits("expediente", self.expediente.trim(), 1, 10)?;

        let captcha = self.captcha_text.trim();
        let len = captcha.chars().count();
        if len == 0 || len > 6 {
            return Err(AppError::invalid_field("captcha_text", "长度必须在 1 到 6 之间"));
        }
        if captcha.chars().any(char::is_whitespace) {
            return Err(AppError::invalid_field("captcha_text", "不能包含空白字符"));
        }

        let doc_len = self.document_code.trim().chars().count();
        if doc_len == 0 || doc_len > 50 {
            return Err(AppError::invalid_field("document_code", "长度必须在 1 到 50 之间"));
        }
        Ok(())
    }

    /// 提交给门户的表单
    pub fn form(&self) -> QueryForm {
        QueryForm {
            year: self.year.trim().to_string(),
            unit_code: self.unit_code.trim().to_string(),
            expediente: self.expediente.trim().to_string(),
            captcha: self.captcha_text.trim().to_string(),
        }
    }
}

fn check_digits(field: &'static str, value: &str, min: usize, max: usize) -> AppResult<()> {
    let len = value.len();
    if len < min || len > max || !value.bytes().all(|b| b.is_ascii_digit()) {
        let reason = if min == max {
            format!("必须是 {} 位数字", min)
        } else {
            format!("必须是 {} 到 {} 位数字", min, max)
        };
        return Err(AppError::invalid_field(field, reason));
    }
    Ok(())
}

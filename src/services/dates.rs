//! 日期归一化
//!
//! 外部来源的日期五花八门，这里按固定顺序逐一尝试：
//! 1. 电子表格日期序列号
//! 2. 带时间的日期字符串（只取日期部分）
//! 3. `d/m/yyyy`、`dd-mm-yyyy`，分隔符和位数都不固定
//! 4. 几种已知格式：`%d/%m/%Y`、`%m/%d/%Y`、`%Y-%m-%d`、`%d-%m-%Y`
//!
//! 输出统一为 `dd/mm/yyyy`。

use std::sync::LazyLock;

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveDateTime};
use regex::Regex;

static DATE_WITH_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d{1,2}[/-]\d{1,2}[/-]\d{4}|\d{4}-\d{1,2}-\d{1,2})[\sT]+\d{1,2}:\d{2}(:\d{2})?").unwrap()
});

static DAY_MONTH_YEAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*(\d{1,2})[/-](\d{1,2})[/-](\d{4})\s*$").unwrap());

const KNOWN_FORMATS: [&str; 4] = ["%d/%m/%Y", "%m/%d/%Y", "%Y-%m-%d", "%d-%m-%Y"];

/// 电子表格的日期系统
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DateSystem {
    /// 1900 日期系统（Windows 版 Excel 默认），保留 1900-02-29 的历史问题
    #[default]
    Excel1900,
    /// 1904 日期系统（旧版 Mac Excel）
    Excel1904,
}

/// 序列号转日期，小数部分（时间）被丢弃
pub fn serial_to_date(serial: f64, system: DateSystem) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 1.0 {
        return None;
    }
    let days = serial.trunc() as i64;
    let base = match system {
        // 序列号 60 是不存在的 1900-02-29，60 之前的日期要少减一天
        DateSystem::Excel1900 if days < 60 => NaiveDate::from_ymd_opt(1899, 12, 31)?,
        DateSystem::Excel1900 => NaiveDate::from_ymd_opt(1899, 12, 30)?,
        DateSystem::Excel1904 => NaiveDate::from_ymd_opt(1904, 1, 1)?,
    };
    base.checked_add_signed(ChronoDuration::days(days))
}

/// 序列号转日期时间，小数部分按一天的比例换算成秒
pub fn serial_to_datetime(serial: f64, system: DateSystem) -> Option<NaiveDateTime> {
    let date = serial_to_date(serial, system)?;
    let seconds = (serial.fract() * 86_400.0).round() as i64;
    date.and_hms_opt(0, 0, 0)?
        .checked_add_signed(ChronoDuration::seconds(seconds))
}

/// 解析日期字符串
///
/// # 返回
/// 所有规则都不匹配时返回 `None`
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Some(caps) = DATE_WITH_TIME.captures(value) {
        if let Some(date) = caps.get(1).and_then(|m| parse_date_only(m.as_str())) {
            return Some(date);
        }
    }

    parse_date_only(value)
}

/// 不带时间的日期：先按 日/月/年，再按已知格式
fn parse_date_only(value: &str) -> Option<NaiveDate> {
    parse_day_month_year(value).or_else(|| {
        KNOWN_FORMATS
            .iter()
            .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
    })
}

fn parse_day_month_year(value: &str) -> Option<NaiveDate> {
    let caps = DAY_MONTH_YEAR.captures(value)?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// 格式化为 `dd/mm/yyyy`
pub fn format_date(date: NaiveDate) -> String {
    date.format("%d/%m/%Y").to_string()
}

/// 字符串日期归一化，无法识别时原样返回（去掉首尾空白）
pub fn normalize_date(value: &str) -> String {
    match parse_date(value) {
        Some(date) => format_date(date),
        None => value.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_serial_1900() {
        assert_eq!(serial_to_date(44562.0, DateSystem::Excel1900), Some(ymd(2022, 1, 1)));
        assert_eq!(serial_to_date(44562.75, DateSystem::Excel1900), Some(ymd(2022, 1, 1)));
        assert_eq!(serial_to_date(1.0, DateSystem::Excel1900), Some(ymd(1900, 1, 1)));
        assert_eq!(serial_to_date(59.0, DateSystem::Excel1900), Some(ymd(1900, 2, 28)));
        assert_eq!(serial_to_date(61.0, DateSystem::Excel1900), Some(ymd(1900, 3, 1)));
        assert_eq!(serial_to_date(0.0, DateSystem::Excel1900), None);
        assert_eq!(format_date(serial_to_date(44562.0, DateSystem::Excel1900).unwrap()), "01/01/2022");
    }

    #[test]
    fn test_serial_with_time() {
        let dt = serial_to_datetime(44562.75, DateSystem::Excel1900).unwrap();
        assert_eq!(dt.format("%d/%m/%Y %H:%M:%S").to_string(), "01/01/2022 18:00:00");
    }

    #[test]
    fn test_serial_1904() {
        assert_eq!(serial_to_date(1.0, DateSystem::Excel1904), Some(ymd(1904, 1, 2)));
        assert_eq!(serial_to_date(43100.0, DateSystem::Excel1904), Some(ymd(2022, 1, 1)));
    }

    #[test]
    fn test_date_with_time() {
        assert_eq!(normalize_date("2/6/2026 16:28:43"), "02/06/2026");
        assert_eq!(normalize_date("05/02/2026 10:00"), "05/02/2026");
    }

    #[test]
    fn test_iso_date_with_time() {
        assert_eq!(normalize_date("2026-02-05 16:28:43"), "05/02/2026");
        // ODS 单元格的 DateTimeIso 值
        assert_eq!(normalize_date("2026-02-05T00:00:00"), "05/02/2026");
        assert_eq!(parse_date("2026-02-05T16:28"), Some(ymd(2026, 2, 5)));
    }

    #[test]
    fn test_day_month_year_variants() {
        assert_eq!(normalize_date("2/6/2026"), "02/06/2026");
        assert_eq!(normalize_date("2-6-2026"), "02/06/2026");
        assert_eq!(normalize_date("12-11-2025"), "12/11/2025");
        assert_eq!(normalize_date(" 9/1/2024 "), "09/01/2024");
    }

    #[test]
    fn test_known_formats_fallback() {
        assert_eq!(normalize_date("2026-02-05"), "05/02/2026");
        // 日 / 月解析失败时再按 月 / 日 尝试
        assert_eq!(normalize_date("12/31/2025"), "31/12/2025");
    }

    #[test]
    fn test_unrecognized_value_is_kept() {
        assert_eq!(normalize_date(" pendiente "), "pendiente");
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("31/02/2026"), None);
    }
}

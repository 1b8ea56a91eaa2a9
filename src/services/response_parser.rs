//! 结果解析 - 业务能力层
//!
//! 从门户返回的 HTML 中按表格 id 找到结果表格，逐行映射成 `ExpedienteRecord`，
//! 再把多行记录补全成一条最终记录。

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::error::{AppResult, ParseError};
use crate::models::{ExpedienteRecord, ResolvedSummary};
use crate::services::dates;

/// 结果表格的 id
pub const RESULT_TABLE_ID: &str = "expedienteDetalles";

/// 一行至少要有的单元格数
const MIN_CELLS: usize = 12;

/// 解析出的表格
#[derive(Debug, Clone)]
pub struct ParsedTable {
    pub records: Vec<ExpedienteRecord>,
    /// 表格本身的 HTML
    pub table_html: String,
    /// 被跳过的数据行数
    pub skipped_rows: usize,
}

#[derive(Debug, Clone)]
pub struct ResponseParser {
    table_id: String,
}

impl Default for ResponseParser {
    fn default() -> Self {
        Self::new(RESULT_TABLE_ID)
    }
}

impl ResponseParser {
    pub fn new(table_id: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
        }
    }

    fn selector(selector: &str) -> AppResult<Selector> {
        Selector::parse(selector).map_err(|_| {
            ParseError::Selector {
                selector: selector.to_string(),
            }
            .into()
        })
    }

    /// 解析门户响应
    ///
    /// # 参数
    /// - `html`: 门户返回的完整页面
    ///
    /// # 返回
    /// 找不到表格返回 `TableNotFound`，表格里没有可用行返回 `NoRows`
    pub fn parse(&self, html: &str) -> AppResult<ParsedTable> {
        let document = Html::parse_document(html);
        let table_sel = Self::selector(&format!(r#"table[id="{}"]"#, self.table_id))?;
        let row_sel = Self::selector("tr")?;
        let header_sel = Self::selector("th")?;
        let cell_sel = Self::selector("td")?;

        let table = document
            .select(&table_sel)
            .next()
            .ok_or_else(|| ParseError::TableNotFound {
                marker: self.table_id.clone(),
            })?;

        let mut records = Vec::new();
        let mut skipped_rows = 0;
        for row in table.select(&row_sel) {
            if row.select(&header_sel).next().is_some() {
                continue;
            }
            let cells: Vec<String> = row.select(&cell_sel).map(cell_text).collect();
            if cells.len() < MIN_CELLS {
                debug!("跳过单元格不足的行: {} 列", cells.len());
                skipped_rows += 1;
                continue;
            }
            records.push(ExpedienteRecord::from_columns(&cells));
        }

        if records.is_empty() {
            warn!("⚠️ 结果表格中没有有效数据行 (跳过 {} 行)", skipped_rows);
            return Err(ParseError::NoRows.into());
        }
        debug!("🔍 解析出 {} 条记录", records.len());

        Ok(ParsedTable {
            records,
            table_html: table.html(),
            skipped_rows,
        })
    }
}

/// 单元格纯文本，连续空白合并为一个空格
fn cell_text(cell: ElementRef<'_>) -> String {
    let raw: String = cell.text().collect();
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// 以最后一行为基础补全空字段
///
/// 每个空字段先在前面同周期、同阶段的行里从后往前找，找不到再在前面所有行里从后往前找。
///
/// # 返回
/// 没有记录时返回 `None`
pub fn best_record(records: &[ExpedienteRecord]) -> Option<ExpedienteRecord> {
    let (last, earlier) = records.split_last()?;
    let mut best = last.clone();

    for index in 0..ExpedienteRecord::FIELD_COUNT {
        if !best.field(index).is_some_and(is_blank) {
            continue;
        }
        let same_stage = earlier
            .iter()
            .rev()
            .filter(|row| row.same_stage(&best))
            .filter_map(|row| row.field(index))
            .find(|value| !is_blank(value))
            .map(str::to_string);
        let borrowed = same_stage.or_else(|| {
            earlier
                .iter()
                .rev()
                .filter_map(|row| row.field(index))
                .find(|value| !is_blank(value))
                .map(str::to_string)
        });
        if let (Some(value), Some(slot)) = (borrowed, best.field_mut(index)) {
            *slot = value;
        }
    }
    Some(best)
}

/// 由补全后的记录得到汇总，处理日期优先取时间戳列
pub fn summarize(record: &ExpedienteRecord) -> ResolvedSummary {
    ResolvedSummary {
        phase: record.phase.clone(),
        status: record.status.clone(),
        process_date: dates::parse_date(&record.timestamp).or_else(|| dates::parse_date(&record.date)),
    }
}

/// 补全并汇总
pub fn reconcile(records: &[ExpedienteRecord]) -> Option<(ExpedienteRecord, ResolvedSummary)> {
    let best = best_record(records)?;
    let summary = summarize(&best);
    Some((best, summary))
}

//! expediente 记录与汇总

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::models::session::ConnectorKind;

/// 结果表格中的一行
///
/// 字段顺序与门户表格的列顺序一致。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpedienteRecord {
    pub cycle: String,
    pub phase: String,
    pub sequence: String,
    pub correlative: String,
    pub doc_code: String,
    pub doc_number: String,
    pub date: String,
    pub funding_source: String,
    pub currency: String,
    pub amount: String,
    pub status: String,
    pub timestamp: String,
    pub transaction_id: String,
}

impl ExpedienteRecord {
    /// 字段数
    pub const FIELD_COUNT: usize = 13;

    /// 按列位置构造，缺失的列留空
    pub fn from_columns<S: AsRef<str>>(columns: &[S]) -> Self {
        let mut record = Self::default();
        for (index, value) in columns.iter().take(Self::FIELD_COUNT).enumerate() {
            if let Some(slot) = record.field_mut(index) {
                *slot = value.as_ref().trim().to_string();
            }
        }
        record
    }

    pub fn field(&self, index: usize) -> Option<&str> {
        let value = match index {
            0 => &self.cycle,
            1 => &self.phase,
            2 => &self.sequence,
            3 => &self.correlative,
            4 => &self.doc_code,
            5 => &self.doc_number,
            6 => &self.date,
            7 => &self.funding_source,
            8 => &self.currency,
            9 => &self.amount,
            10 => &self.status,
            11 => &self.timestamp,
            12 => &self.transaction_id,
            _ => return None,
        };
        Some(value.as_str())
    }

    pub fn field_mut(&mut self, index: usize) -> Option<&mut String> {
        let value = match index {
            0 => &mut self.cycle,
            1 => &mut self.phase,
            2 => &mut self.sequence,
            3 => &mut self.correlative,
            4 => &mut self.doc_code,
            5 => &mut self.doc_number,
            6 => &mut self.date,
            7 => &mut self.funding_source,
            8 => &mut self.currency,
            9 => &mut self.amount,
            10 => &mut self.status,
            11 => &mut self.timestamp,
            12 => &mut self.transaction_id,
            _ => return None,
        };
        Some(value)
    }

    /// 同一周期、同一阶段
    pub fn same_stage(&self, other: &ExpedienteRecord) -> bool {
        self.cycle == other.cycle && self.phase == other.phase
    }
}

/// 从全部记录推导出的最终状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSummary {
    pub phase: String,
    pub status: String,
    /// 处理日期（只保留日期部分）
    pub process_date: Option<NaiveDate>,
}

/// 门户查询的完整结果
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    /// 实际回答查询的连接方式
    pub source: ConnectorKind,
    pub year: String,
    pub unit_code: String,
    pub expediente: String,
    pub document_code: String,
    pub records: Vec<ExpedienteRecord>,
    /// 对最后一行补全后的记录
    pub best_record: ExpedienteRecord,
    pub summary: ResolvedSummary,
    /// 结果表格的 HTML 片段
    pub table_html: String,
}

/// 电子表格导入结果
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub records: Vec<ExpedienteRecord>,
    /// 没有任何一行同时带阶段和状态时为空
    pub summary: Option<ResolvedSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_columns_trims_and_pads() {
        let record = ExpedienteRecord::from_columns(&["1", " D ", "2"]);
        assert_eq!(record.cycle, "1");
        assert_eq!(record.phase, "D");
        assert_eq!(record.sequence, "2");
        assert_eq!(record.transaction_id, "");
    }

    #[test]
    fn test_field_indexes_follow_column_order() {
        let columns: Vec<String> = (0..13).map(|i| format!("c{}", i)).collect();
        let record = ExpedienteRecord::from_columns(&columns);
        assert_eq!(record.amount, "c9");
        assert_eq!(record.status, "c10");
        for i in 0..ExpedienteRecord::FIELD_COUNT {
            assert_eq!(record.field(i), Some(columns[i].as_str()));
        }
        assert_eq!(record.field(13), None);
    }
}

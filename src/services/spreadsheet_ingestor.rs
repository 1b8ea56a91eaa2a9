//! 电子表格导入 - 业务能力层
//!
//! 用户从门户下载的导出文件（xlsx / xls / ods / csv）按固定的 12 列解析成与
//! 网页结果相同的记录结构，不经过任何网络请求。

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, ParseError, ValidationError};
use crate::models::{ExpedienteRecord, IngestOutcome, ResolvedSummary};
use crate::services::dates::{self, DateSystem};

/// 导出文件的列数（A-L）
pub const SHEET_COLUMNS: usize = 12;

const DATE_COLUMN: usize = 6;
const TIMESTAMP_COLUMN: usize = 11;

/// 单元格的值
#[derive(Debug, Clone, PartialEq)]
pub enum SheetCell {
    Empty,
    Number(f64),
    Text(String),
    Bool(bool),
}

impl From<&Data> for SheetCell {
    fn from(value: &Data) -> Self {
        match value {
            Data::Empty | Data::Error(_) => SheetCell::Empty,
            Data::Int(n) => SheetCell::Number(*n as f64),
            Data::Float(n) => SheetCell::Number(*n),
            Data::DateTime(dt) => SheetCell::Number(dt.as_f64()),
            Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => SheetCell::Text(s.clone()),
            Data::Bool(b) => SheetCell::Bool(*b),
        }
    }
}

/// 文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetFormat {
    /// xlsx / ods（zip 容器）或 xls（OLE 容器）
    Workbook,
    Csv,
    Unknown,
}

/// 按文件头判断格式
pub fn detect_format(bytes: &[u8]) -> SheetFormat {
    const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
    const OLE_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0];
    if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(OLE_MAGIC) {
        SheetFormat::Workbook
    } else if std::str::from_utf8(bytes).is_ok() {
        SheetFormat::Csv
    } else {
        SheetFormat::Unknown
    }
}

#[derive(Debug, Clone)]
pub struct SpreadsheetIngestor {
    max_bytes: usize,
    date_system: DateSystem,
}

impl SpreadsheetIngestor {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            date_system: DateSystem::default(),
        }
    }

    pub fn with_date_system(mut self, date_system: DateSystem) -> Self {
        self.date_system = date_system;
        self
    }

    /// 导入文件内容
    ///
    /// # 参数
    /// - `bytes`: 文件的完整内容
    ///
    /// # 返回
    /// 空文件、超出大小、格式无法识别、没有数据行都返回错误
    pub fn ingest(&self, bytes: &[u8]) -> AppResult<IngestOutcome> {
        if bytes.is_empty() {
            return Err(ParseError::EmptySpreadsheet.into());
        }
        if bytes.len() > self.max_bytes {
            return Err(ValidationError::FileTooLarge {
                size: bytes.len(),
                max: self.max_bytes,
            }
            .into());
        }

        let format = detect_format(bytes);
        info!("📋 导入电子表格: {} 字节 ({:?})", bytes.len(), format);
        let rows = match format {
            SheetFormat::Workbook => read_workbook(bytes)?,
            SheetFormat::Csv => read_csv(bytes)?,
            SheetFormat::Unknown => return Err(ParseError::UnsupportedFormat.into()),
        };
        self.ingest_rows(rows)
    }

    /// 解析表头之后的数据行
    pub fn ingest_rows(&self, rows: Vec<Vec<SheetCell>>) -> AppResult<IngestOutcome> {
        let mut records = Vec::new();
        for row in rows {
            let columns: Vec<String> = (0..SHEET_COLUMNS)
                .map(|column| self.cell_text(column, row.get(column).unwrap_or(&SheetCell::Empty)))
                .collect();
            let record = ExpedienteRecord::from_columns(&columns);
            if record.cycle.is_empty() && record.phase.is_empty() && record.sequence.is_empty() {
                continue;
            }
            records.push(record);
        }

        if records.is_empty() {
            warn!("⚠️ 电子表格中没有找到数据行");
            return Err(ParseError::NoSpreadsheetRows.into());
        }

        let summary = summarize_rows(&records);
        info!(
            "✓ 电子表格导入完成: {} 行, 汇总: {}",
            records.len(),
            if summary.is_some() { "有" } else { "无" }
        );
        Ok(IngestOutcome { records, summary })
    }

    fn cell_text(&self, column: usize, cell: &SheetCell) -> String {
        match (column, cell) {
            (_, SheetCell::Empty) => String::new(),
            (_, SheetCell::Bool(b)) => b.to_string(),
            (DATE_COLUMN, SheetCell::Number(n)) => dates::serial_to_date(*n, self.date_system)
                .map(dates::format_date)
                .unwrap_or_else(|| number_text(*n)),
            (TIMESTAMP_COLUMN, SheetCell::Number(n)) => dates::serial_to_datetime(*n, self.date_system)
                .map(|dt| dt.format("%d/%m/%Y %H:%M:%S").to_string())
                .unwrap_or_else(|| number_text(*n)),
            (_, SheetCell::Number(n)) => number_text(*n),
            (DATE_COLUMN, SheetCell::Text(s)) => match s.trim().parse::<f64>() {
                Ok(serial) => self.cell_text(column, &SheetCell::Number(serial)),
                Err(_) => dates::normalize_date(s),
            },
            (_, SheetCell::Text(s)) => s.trim().to_string(),
        }
    }
}

/// 整数不带小数点
fn number_text(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// 最后一行同时带阶段和状态的记录作为汇总
fn summarize_rows(records: &[ExpedienteRecord]) -> Option<ResolvedSummary> {
    let row = records
        .iter()
        .rev()
        .find(|r| !r.phase.is_empty() && !r.status.is_empty())?;
    Some(ResolvedSummary {
        phase: row.phase.clone(),
        status: row.status.clone(),
        process_date: dates::parse_date(&row.timestamp).or_else(|| dates::parse_date(&row.date)),
    })
}

fn read_workbook(bytes: &[u8]) -> AppResult<Vec<Vec<SheetCell>>> {
    let workbook_error = |message: String| AppError::from(ParseError::Workbook { message });

    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| workbook_error(e.to_string()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| workbook_error("文件中没有工作表".to_string()))?
        .map_err(|e| workbook_error(e.to_string()))?;

    let Some((end_row, _)) = range.end() else {
        return Ok(Vec::new());
    };
    // 第 1 行是表头
    let rows = (1..=end_row)
        .map(|row| {
            (0..SHEET_COLUMNS as u32)
                .map(|column| {
                    range
                        .get_value((row, column))
                        .map(SheetCell::from)
                        .unwrap_or(SheetCell::Empty)
                })
                .collect()
        })
        .collect::<Vec<_>>();
    debug!("工作簿数据行: {}", rows.len());
    Ok(rows)
}

fn read_csv(bytes: &[u8]) -> AppResult<Vec<Vec<SheetCell>>> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF".as_slice()).unwrap_or(bytes);
    let first_line = bytes.split(|b| *b == b'\n').next().unwrap_or_default();
    let semicolons = first_line.iter().filter(|b| **b == b';').count();
    let commas = first_line.iter().filter(|b| **b == b',').count();
    let delimiter = if semicolons > commas { b';' } else { b',' };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(bytes);

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| ParseError::Csv {
            message: e.to_string(),
        })?;
        rows.push(
            record
                .iter()
                .map(|value| {
                    if value.trim().is_empty() {
                        SheetCell::Empty
                    } else {
                        SheetCell::Text(value.to_string())
                    }
                })
                .collect(),
        );
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use chrono::NaiveDate;

    fn ingestor() -> SpreadsheetIngestor {
        SpreadsheetIngestor::new(5 * 1024 * 1024)
    }

    const CSV: &str = "Ciclo;Fase;Secuencia;Correlativo;Cod.Doc;Num.Doc;Fecha;FF;Moneda;Monto;Estado;Fecha Proceso\n\
        G;C;1;1;001;0001;44562;00;S/.;1000;A;01/01/2022 10:00:00\n\
        ;;;;;;;;;;;\n\
        G;D;1;2;001;0002;2/6/2026;00;S/.;250.5;P;2/6/2026 16:28:43\n\
        G;G;1;3;001;0003;5-6-2026;00;S/.;;;\n";

    #[test]
    fn test_csv_rows_and_summary() {
        let outcome = ingestor().ingest(CSV.as_bytes()).unwrap();
        assert_eq!(outcome.records.len(), 3);
        assert_eq!(outcome.records[0].date, "01/01/2022");
        assert_eq!(outcome.records[1].date, "02/06/2026");
        assert_eq!(outcome.records[1].amount, "250.5");
        assert_eq!(outcome.records[2].date, "05/06/2026");
        assert_eq!(outcome.records[2].transaction_id, "");

        let summary = outcome.summary.unwrap();
        assert_eq!(summary.phase, "D");
        assert_eq!(summary.status, "P");
        assert_eq!(summary.process_date, NaiveDate::from_ymd_opt(2026, 6, 2));
    }

    #[test]
    fn test_numeric_cells() {
        let rows = vec![vec![
            SheetCell::Text("G".to_string()),
            SheetCell::Text("D".to_string()),
            SheetCell::Number(1.0),
            SheetCell::Number(2.0),
            SheetCell::Empty,
            SheetCell::Empty,
            SheetCell::Number(44562.0),
            SheetCell::Empty,
            SheetCell::Empty,
            SheetCell::Number(1500.25),
            SheetCell::Text("A".to_string()),
            SheetCell::Number(44563.5),
        ]];
        let outcome = ingestor().ingest_rows(rows).unwrap();
        let record = &outcome.records[0];
        assert_eq!(record.sequence, "1");
        assert_eq!(record.date, "01/01/2022");
        assert_eq!(record.amount, "1500.25");
        assert_eq!(record.timestamp, "02/01/2022 12:00:00");
        assert_eq!(
            outcome.summary.unwrap().process_date,
            NaiveDate::from_ymd_opt(2022, 1, 2)
        );
    }

    #[test]
    fn test_iso_date_cells() {
        let mut row = vec![SheetCell::Empty; SHEET_COLUMNS];
        row[0] = SheetCell::Text("G".to_string());
        row[1] = SheetCell::Text("D".to_string());
        row[6] = SheetCell::from(&Data::DateTimeIso("2026-02-05T00:00:00".to_string()));
        row[10] = SheetCell::Text("P".to_string());
        row[11] = SheetCell::Text("2026-02-05 16:28:43".to_string());

        let outcome = ingestor().ingest_rows(vec![row]).unwrap();
        assert_eq!(outcome.records[0].date, "05/02/2026");
        assert_eq!(
            outcome.summary.unwrap().process_date,
            NaiveDate::from_ymd_opt(2026, 2, 5)
        );
    }

    #[test]
    fn test_summary_falls_back_to_date_column() {
        let csv = "Ciclo;Fase\nG;D;1;1;;;07/02/2026;;;;P;\n";
        let outcome = ingestor().ingest(csv.as_bytes()).unwrap();
        assert_eq!(
            outcome.summary.unwrap().process_date,
            NaiveDate::from_ymd_opt(2026, 2, 7)
        );
    }

    #[test]
    fn test_rows_without_phase_and_status_have_no_summary() {
        let csv = "h;h\nG;;1\n";
        let outcome = ingestor().ingest(csv.as_bytes()).unwrap();
        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.summary.is_none());
    }

    #[test]
    fn test_empty_and_header_only_files_fail() {
        let err = ingestor().ingest(b"").unwrap_err();
        assert!(matches!(err, AppError::Parse(ParseError::EmptySpreadsheet)));

        let err = ingestor().ingest(b"Ciclo;Fase;Secuencia\n").unwrap_err();
        assert!(matches!(err, AppError::Parse(ParseError::NoSpreadsheetRows)));
    }

    #[test]
    fn test_size_limit() {
        let err = SpreadsheetIngestor::new(10).ingest(CSV.as_bytes()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(detect_format(b"PK\x03\x04rest"), SheetFormat::Workbook);
        assert_eq!(detect_format(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1]), SheetFormat::Workbook);
        assert_eq!(detect_format(b"a;b;c"), SheetFormat::Csv);
        assert_eq!(detect_format(&[0xFF, 0xFE, 0x00, 0x81]), SheetFormat::Unknown);

        let err = ingestor().ingest(&[0xFF, 0xFE, 0x00, 0x81]).unwrap_err();
        assert!(matches!(err, AppError::Parse(ParseError::UnsupportedFormat)));
        let err = ingestor().ingest(b"PK\x03\x04broken").unwrap_err();
        assert!(matches!(err, AppError::Parse(ParseError::Workbook { .. })));
    }
}

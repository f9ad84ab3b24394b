use std::{fs, path::PathBuf};

use rust_xlsxwriter::Workbook;
use shared::domain::Task;

use crate::{error::TaskBoardError, Result, SpreadsheetExporter};

pub const HISTORY_SHEET_NAME: &str = "歷史任務";
pub const DEFAULT_EXPORT_FILE: &str = "task_history.xlsx";

/// Flat, all-string row written to the history sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub desc: String,
    pub date: String,
    pub assignee: String,
    pub status: String,
    pub report_note: String,
}

impl TaskRecord {
    pub const HEADERS: [&'static str; 7] = [
        "id",
        "title",
        "desc",
        "date",
        "assignee",
        "status",
        "reportNote",
    ];

    pub fn cells(&self) -> [&str; 7] {
        [
            self.id.as_str(),
            self.title.as_str(),
            self.desc.as_str(),
            self.date.as_str(),
            self.assignee.as_str(),
            self.status.as_str(),
            self.report_note.as_str(),
        ]
    }
}

impl From<&Task> for TaskRecord {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.to_string(),
            title: task.title.clone(),
            desc: task.description.clone(),
            date: task.date_string(),
            assignee: task.assignee.clone(),
            status: task.status.label().to_string(),
            report_note: task.report_note.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportReceipt {
    pub path: PathBuf,
    pub rows: usize,
}

pub struct XlsxExporter {
    output_dir: PathBuf,
    file_name: String,
}

impl XlsxExporter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            file_name: DEFAULT_EXPORT_FILE.to_string(),
        }
    }

    pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
        let mut file_name = file_name.into();
        if !file_name.ends_with(".xlsx") {
            file_name.push_str(".xlsx");
        }
        self.file_name = file_name;
        self
    }

    pub fn path(&self) -> PathBuf {
        self.output_dir.join(&self.file_name)
    }
}

impl SpreadsheetExporter for XlsxExporter {
    fn export(&self, sheet_name: &str, records: &[TaskRecord]) -> Result<ExportReceipt> {
        fs::create_dir_all(&self.output_dir).map_err(|err| {
            TaskBoardError::backend(format!(
                "cannot create export directory {}: {err}",
                self.output_dir.display()
            ))
        })?;

        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name(sheet_name).map_err(TaskBoardError::backend)?;
        for (col, header) in TaskRecord::HEADERS.iter().enumerate() {
            sheet
                .write_string(0, col as u16, *header)
                .map_err(TaskBoardError::backend)?;
        }
        for (row, record) in records.iter().enumerate() {
            for (col, cell) in record.cells().iter().enumerate() {
                sheet
                    .write_string(row as u32 + 1, col as u16, *cell)
                    .map_err(TaskBoardError::backend)?;
            }
        }

        let path = self.path();
        workbook.save(&path).map_err(TaskBoardError::backend)?;
        Ok(ExportReceipt {
            path,
            rows: records.len(),
        })
    }
}

#[cfg(test)]
#[path = "tests/export_tests.rs"]
mod tests;

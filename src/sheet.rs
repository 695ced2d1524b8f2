use std::path::Path;

use anyhow::Context as _;
use calamine::{Data, Reader as _, open_workbook_auto};
use rust_xlsxwriter::{Workbook, Worksheet};

use crate::formats::{SCRAPED_COLUMNS, ScrapedBook};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        let value = value.into();
        if value.trim().is_empty() {
            Cell::Empty
        } else {
            Cell::Text(value)
        }
    }

    pub fn from_opt_text(value: Option<&str>) -> Self {
        value.map(Cell::text).unwrap_or_default()
    }

    pub fn from_opt_u64(value: Option<u64>) -> Self {
        value.map(|v| Cell::Number(v as f64)).unwrap_or_default()
    }

    pub fn from_opt_f64(value: Option<f64>) -> Self {
        value.map(Cell::Number).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(text) => text.trim().is_empty(),
            Cell::Number(n) => n.is_nan(),
        }
    }

    /// Cell contents as trimmed text; `None` for empty cells.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(text) => {
                let text = text.trim();
                (!text.is_empty()).then(|| text.to_owned())
            }
            Cell::Number(n) if n.is_nan() => None,
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
            Cell::Number(n) => Some(n.to_string()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(n) if n.is_finite() => Some(*n),
            Cell::Text(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    /// Non-negative integer contents; text cells may use thousands separators.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Cell::Number(n) if n.is_finite() && *n >= 0.0 => Some(n.round() as u64),
            Cell::Text(text) => crate::extract::parse_count(text),
            _ => None,
        }
    }
}

static EMPTY_CELL: Cell = Cell::Empty;

/// The first worksheet of a workbook: a header row plus data rows.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new(headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of the first header equal (case-insensitively) to `name`.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers
            .iter()
            .position(|header| header.trim().eq_ignore_ascii_case(name))
    }

    /// Index of the first column matching any of `names`, tried in order.
    pub fn column_any(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|name| self.column(name))
    }

    pub fn get(&self, row: usize, column: usize) -> &Cell {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .unwrap_or(&EMPTY_CELL)
    }

    /// Text of the first non-empty cell among the aliased columns.
    pub fn text(&self, row: usize, names: &[&str]) -> Option<String> {
        names
            .iter()
            .filter_map(|name| self.column(name))
            .find_map(|column| self.get(row, column).as_text())
    }

    pub fn cell(&self, row: usize, names: &[&str]) -> &Cell {
        names
            .iter()
            .filter_map(|name| self.column(name))
            .map(|column| self.get(row, column))
            .find(|cell| !cell.is_empty())
            .unwrap_or(&EMPTY_CELL)
    }

    /// Index of column `name`, appending an empty column when it does not exist.
    pub fn ensure_column(&mut self, name: &str) -> usize {
        if let Some(column) = self.column(name) {
            return column;
        }
        self.headers.push(name.to_owned());
        self.headers.len() - 1
    }

    pub fn set(&mut self, row: usize, column: usize, cell: Cell) {
        let Some(cells) = self.rows.get_mut(row) else {
            return;
        };
        if cells.len() <= column {
            cells.resize(column + 1, Cell::Empty);
        }
        cells[column] = cell;
    }

    pub fn push_row(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    /// Keeps only the columns named in `order`, in that order. Names that are not
    /// headers of this sheet are skipped.
    pub fn select_columns(&self, order: &[&str]) -> Sheet {
        let picked: Vec<(String, usize)> = order
            .iter()
            .filter_map(|name| {
                self.column(name)
                    .map(|column| (self.headers[column].clone(), column))
            })
            .collect();

        Sheet {
            headers: picked.iter().map(|(header, _)| header.clone()).collect(),
            rows: (0..self.rows.len())
                .map(|row| {
                    picked
                        .iter()
                        .map(|(_, column)| self.get(row, *column).clone())
                        .collect()
                })
                .collect(),
        }
    }
}

impl Sheet {
    /// Scraped books laid out in the fixed scraped-books column order.
    pub fn from_scraped(books: &[ScrapedBook]) -> Sheet {
        let mut sheet = Sheet::new(SCRAPED_COLUMNS.iter().copied().filter(|c| *c != "notes"));
        for book in books {
            sheet.push_row(vec![
                Cell::text(book.title.as_str()),
                Cell::from_opt_text(book.author.as_deref()),
                Cell::text(book.url.as_str()),
                Cell::from_opt_text(book.cover_url.as_deref()),
                Cell::from_opt_f64(book.platform_rating),
                Cell::from_opt_text(book.status.as_deref()),
                Cell::from_opt_u64(book.chapters),
                Cell::from_opt_u64(book.pages),
                Cell::from_opt_u64(book.words),
                Cell::from_opt_u64(book.views),
                Cell::from_opt_u64(book.followers),
                Cell::from_opt_text(book.synopsis.as_deref()),
                Cell::text(book.tags.join(", ")),
            ]);
        }
        sheet
    }
}

/// Reads the first worksheet. The first row is the header; `skip_rows` rows
/// after it are ignored; fully empty rows are dropped.
pub fn read_sheet(path: &Path, skip_rows: usize) -> anyhow::Result<Sheet> {
    read_worksheet(path, None, skip_rows)
}

/// Like [`read_sheet`], for the worksheet called `name`. The name is matched
/// exactly first, then ignoring case.
pub fn read_named_sheet(path: &Path, name: &str, skip_rows: usize) -> anyhow::Result<Sheet> {
    read_worksheet(path, Some(name), skip_rows)
}

fn read_worksheet(path: &Path, name: Option<&str>, skip_rows: usize) -> anyhow::Result<Sheet> {
    let mut workbook = open_workbook_auto(path)
        .map_err(|err| anyhow::anyhow!("open workbook {}: {err}", path.display()))?;
    let names = workbook.sheet_names();
    let first = match name {
        None => names.first().cloned(),
        Some(wanted) => names
            .iter()
            .find(|n| n.as_str() == wanted)
            .or_else(|| names.iter().find(|n| n.eq_ignore_ascii_case(wanted)))
            .cloned(),
    }
    .ok_or_else(|| match name {
        Some(wanted) => anyhow::anyhow!(
            "workbook {} has no worksheet {wanted:?} (found: {})",
            path.display(),
            names.join(", ")
        ),
        None => anyhow::anyhow!("workbook has no sheets: {}", path.display()),
    })?;
    let range = workbook
        .worksheet_range(&first)
        .map_err(|err| anyhow::anyhow!("read worksheet {first:?}: {err}"))?;

    let mut rows = range.rows();
    let headers: Vec<String> = rows
        .next()
        .map(|header| {
            header
                .iter()
                .map(|data| cell_from_data(data).as_text().unwrap_or_default())
                .collect()
        })
        .unwrap_or_default();

    let mut sheet = Sheet::new(headers);
    for row in rows.skip(skip_rows) {
        let cells: Vec<Cell> = row.iter().map(cell_from_data).collect();
        if cells.iter().all(Cell::is_empty) {
            continue;
        }
        sheet.push_row(cells);
    }

    tracing::debug!(
        path = %path.display(),
        sheet = %first,
        columns = sheet.headers.len(),
        rows = sheet.len(),
        "read spreadsheet"
    );
    Ok(sheet)
}

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::text(s.clone()),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTime(dt) => Cell::Text(dt.to_string()),
        Data::DateTimeIso(s) => Cell::text(s.clone()),
        Data::DurationIso(s) => Cell::text(s.clone()),
        Data::Error(_) => Cell::Empty,
    }
}

/// Writes `sheet` as a single-worksheet `.xlsx` file, replacing `path` atomically.
pub fn write_sheet(path: &Path, sheet: &Sheet) -> anyhow::Result<()> {
    let mut workbook = Workbook::new();
    fill_worksheet(workbook.add_worksheet(), sheet)?;
    save_workbook(path, &mut workbook)?;
    tracing::debug!(path = %path.display(), rows = sheet.len(), "wrote spreadsheet");
    Ok(())
}

/// Writes one named worksheet per entry, in order.
pub fn write_workbook(path: &Path, sheets: &[(&str, &Sheet)]) -> anyhow::Result<()> {
    let mut workbook = Workbook::new();
    for (name, sheet) in sheets {
        let worksheet = workbook
            .add_worksheet()
            .set_name(*name)
            .map_err(|err| anyhow::anyhow!("name worksheet {name:?}: {err}"))?;
        fill_worksheet(worksheet, sheet)?;
    }
    save_workbook(path, &mut workbook)?;
    tracing::debug!(path = %path.display(), worksheets = sheets.len(), "wrote workbook");
    Ok(())
}

fn fill_worksheet(worksheet: &mut Worksheet, sheet: &Sheet) -> anyhow::Result<()> {
    for (column, header) in sheet.headers.iter().enumerate() {
        let column = column_index(column)?;
        worksheet
            .write_string(0, column, header.as_str())
            .map_err(|err| anyhow::anyhow!("write header {header:?}: {err}"))?;
    }

    for (row_idx, cells) in sheet.rows.iter().enumerate() {
        let row = u32::try_from(row_idx + 1).context("spreadsheet has too many rows")?;
        for (column, cell) in cells.iter().enumerate().take(sheet.headers.len()) {
            let column = column_index(column)?;
            let written = match cell {
                Cell::Empty => continue,
                Cell::Text(text) => worksheet.write_string(row, column, text.as_str()).map(|_| ()),
                Cell::Number(n) if n.is_finite() => worksheet.write_number(row, column, *n).map(|_| ()),
                Cell::Number(_) => continue,
            };
            written.map_err(|err| anyhow::anyhow!("write cell ({row}, {column}): {err}"))?;
        }
    }
    Ok(())
}

fn save_workbook(path: &Path, workbook: &mut Workbook) -> anyhow::Result<()> {
    crate::catalog::replace_file(path, "xlsx", |tmp_path| {
        workbook
            .save(tmp_path)
            .map_err(|err| anyhow::anyhow!("save spreadsheet {}: {err}", tmp_path.display()))
    })
}

fn column_index(column: usize) -> anyhow::Result<u16> {
    u16::try_from(column).context("spreadsheet has too many columns")
}

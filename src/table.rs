use std::path::Path;

use crate::domain::radec_to_targname;
use crate::error::HsaError;

/// Tabular archive metadata: ordered columns plus string rows, as parsed
/// from the HSA CSV response or read back from a saved query.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl ObservationTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self { columns, rows }
    }

    pub fn from_csv_str(body: &str) -> Result<Self, HsaError> {
        Self::from_reader(body.as_bytes())
    }

    pub fn from_csv_path(path: &Path) -> Result<Self, HsaError> {
        let file = std::fs::File::open(path).map_err(|err| HsaError::Filesystem(err.to_string()))?;
        Self::from_reader(file)
    }

    fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, HsaError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);
        let columns = reader
            .headers()
            .map_err(|err| HsaError::Csv(err.to_string()))?
            .iter()
            .map(|field| field.trim().to_string())
            .collect::<Vec<_>>();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| HsaError::Csv(err.to_string()))?;
            rows.push(record.iter().map(|field| field.to_string()).collect());
        }
        Ok(Self { columns, rows })
    }

    pub fn write_csv(&self, path: &Path) -> Result<(), HsaError> {
        let mut writer =
            csv::Writer::from_path(path).map_err(|err| HsaError::Csv(err.to_string()))?;
        writer
            .write_record(&self.columns)
            .map_err(|err| HsaError::Csv(err.to_string()))?;
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|err| HsaError::Csv(err.to_string()))?;
        }
        writer.flush().map_err(|err| HsaError::Csv(err.to_string()))
    }

    pub fn csv_string(&self) -> Result<String, HsaError> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        writer
            .write_record(&self.columns)
            .map_err(|err| HsaError::Csv(err.to_string()))?;
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|err| HsaError::Csv(err.to_string()))?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|err| HsaError::Csv(err.to_string()))?;
        String::from_utf8(bytes).map_err(|err| HsaError::Csv(err.to_string()))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }

    pub fn value(&self, row: usize, column: &str) -> Result<&str, HsaError> {
        let index = self
            .column_index(column)
            .ok_or_else(|| HsaError::MissingColumn(column.to_string()))?;
        Ok(self.rows[row][index].as_str())
    }

    pub fn str_column(&self, column: &str) -> Result<Vec<&str>, HsaError> {
        let index = self
            .column_index(column)
            .ok_or_else(|| HsaError::MissingColumn(column.to_string()))?;
        Ok(self.rows.iter().map(|row| row[index].as_str()).collect())
    }

    pub fn f64_column(&self, column: &str) -> Result<Vec<f64>, HsaError> {
        self.str_column(column)?
            .into_iter()
            .map(|value| {
                value.trim().parse::<f64>().map_err(|_| HsaError::NonNumericValue {
                    column: column.to_string(),
                    value: value.to_string(),
                })
            })
            .collect()
    }

    pub fn row(&self, index: usize) -> ObsRow<'_> {
        ObsRow { table: self, index }
    }

    pub fn rows(&self) -> impl Iterator<Item = ObsRow<'_>> {
        (0..self.len()).map(|index| self.row(index))
    }

    /// Stable lexicographic sort on one column, by pre-rename name.
    pub fn sort_by_column(&mut self, column: &str) -> Result<(), HsaError> {
        let index = self
            .column_index(column)
            .ok_or_else(|| HsaError::MissingColumn(column.to_string()))?;
        self.rows.sort_by(|a, b| a[index].cmp(&b[index]));
        Ok(())
    }

    /// Add a `JTARGNAME` column derived from the RA/DEC columns. Does
    /// nothing when either coordinate column is absent.
    pub fn add_jtargname(&mut self, scale: f64) -> Result<(), HsaError> {
        if !self.has_column("RA") || !self.has_column("DEC") {
            return Ok(());
        }
        let names = {
            let ra = self.f64_column("RA")?;
            let dec = self.f64_column("DEC")?;
            ra.iter()
                .zip(dec.iter())
                .map(|(&ra, &dec)| radec_to_targname(ra, dec, scale))
                .collect::<Vec<_>>()
        };
        self.columns.push("JTARGNAME".to_string());
        for (row, name) in self.rows.iter_mut().zip(names) {
            row.push(name);
        }
        Ok(())
    }

    pub fn rename_columns(&mut self, rename: &[(String, String)]) {
        for column in &mut self.columns {
            if let Some((_, to)) = rename.iter().find(|(from, _)| from == column) {
                *column = to.clone();
            }
        }
    }

    pub fn lowercase_columns(&mut self) {
        for column in &mut self.columns {
            *column = column.to_lowercase();
        }
    }

    /// New table keeping only the rows the predicate accepts.
    pub fn filter_rows<F>(&self, mut keep: F) -> Result<Self, HsaError>
    where
        F: FnMut(ObsRow<'_>) -> Result<bool, HsaError>,
    {
        let mut rows = Vec::new();
        for index in 0..self.len() {
            if keep(self.row(index))? {
                rows.push(self.rows[index].clone());
            }
        }
        Ok(Self {
            columns: self.columns.clone(),
            rows,
        })
    }

    /// New table keeping only the rows at the given indices, in order.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            columns: self.columns.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }
}

/// Typed view over one row of a post-processed (lowercased) table.
#[derive(Clone, Copy)]
pub struct ObsRow<'a> {
    table: &'a ObservationTable,
    index: usize,
}

impl<'a> ObsRow<'a> {
    pub fn get(&self, column: &str) -> Result<&'a str, HsaError> {
        self.table.value(self.index, column)
    }

    pub fn observation_id(&self) -> Result<&'a str, HsaError> {
        self.get("observation_id")
    }

    pub fn instrument(&self) -> Result<&'a str, HsaError> {
        self.get("instrument")
    }

    pub fn detector(&self) -> Result<&'a str, HsaError> {
        self.get("detector")
    }

    /// `INSTRUMENT/DETECTOR` pair, e.g. `WFC3/IR`.
    pub fn instdet(&self) -> Result<String, HsaError> {
        Ok(format!("{}/{}", self.instrument()?, self.detector()?))
    }

    pub fn filter(&self) -> Result<&'a str, HsaError> {
        self.get("filter")
    }

    pub fn target(&self) -> Result<&'a str, HsaError> {
        self.get("target")
    }

    pub fn proposal_id(&self) -> Result<&'a str, HsaError> {
        self.get("proposal_id")
    }

    pub fn footprint(&self) -> Result<&'a str, HsaError> {
        self.get("footprint")
    }

    fn f64_value(&self, column: &str) -> Result<f64, HsaError> {
        let value = self.get(column)?;
        value.trim().parse::<f64>().map_err(|_| HsaError::NonNumericValue {
            column: column.to_string(),
            value: value.to_string(),
        })
    }

    pub fn ra(&self) -> Result<f64, HsaError> {
        self.f64_value("ra")
    }

    pub fn dec(&self) -> Result<f64, HsaError> {
        self.f64_value("dec")
    }

    pub fn exptime(&self) -> Result<f64, HsaError> {
        self.f64_value("exptime")
    }
}

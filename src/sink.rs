//! Output port for diagnostic artifacts.
//!
//! The original deployment wrote plots and arrays to hard-coded file-system
//! paths from inside the solver. Here the computational core stays
//! side-effect free and callers inject a sink, so the storage backend is
//! swappable and tests can capture artifacts in memory.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::PathBuf;

use ndarray::{ArrayView1, ArrayView2};

use crate::library::Gas;
use crate::{Error, Result};

/// Destination for named diagnostic artifacts.
pub trait ArtifactSink<E> {
    /// Write a matrix artifact, optionally labelled by compound along both
    /// axes (the correlation-matrix case).
    ///
    /// # Errors
    /// Returns an error when the artifact cannot be stored; implementations
    /// must not swallow failures.
    fn write_matrix(
        &mut self,
        name: &str,
        matrix: ArrayView2<'_, E>,
        labels: Option<&[Gas]>,
    ) -> Result<()>;

    /// Write a vector artifact.
    ///
    /// # Errors
    /// Returns an error when the artifact cannot be stored.
    fn write_vector(&mut self, name: &str, vector: ArrayView1<'_, E>) -> Result<()>;
}

/// File-system sink writing one CSV file per artifact under a base directory.
pub struct CsvSink {
    directory: PathBuf,
}

impl CsvSink {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.directory.join(format!("{name}.csv"))
    }
}

fn artifact_error(name: &str) -> impl FnOnce(csv::Error) -> Error + '_ {
    move |source| Error::Artifact {
        name: name.to_owned(),
        source,
    }
}

impl<E: Display + Copy> ArtifactSink<E> for CsvSink {
    fn write_matrix(
        &mut self,
        name: &str,
        matrix: ArrayView2<'_, E>,
        labels: Option<&[Gas]>,
    ) -> Result<()> {
        if let Some(labels) = labels {
            if labels.len() != matrix.nrows() {
                return Err(Error::NameCount {
                    rows: matrix.nrows(),
                    names: labels.len(),
                });
            }
        }

        let mut writer = csv::Writer::from_path(self.path(name)).map_err(artifact_error(name))?;

        if let Some(labels) = labels {
            let mut header = vec![String::new()];
            header.extend(labels.iter().map(|gas| gas.0.clone()));
            writer.write_record(&header).map_err(artifact_error(name))?;
        }
        for (row_index, row) in matrix.rows().into_iter().enumerate() {
            let mut record = Vec::with_capacity(matrix.ncols() + 1);
            if let Some(labels) = labels {
                record.push(labels[row_index].0.clone());
            }
            record.extend(row.iter().map(|value| format!("{value}")));
            writer.write_record(&record).map_err(artifact_error(name))?;
        }
        writer.flush()?;
        Ok(())
    }

    fn write_vector(&mut self, name: &str, vector: ArrayView1<'_, E>) -> Result<()> {
        let mut writer = csv::Writer::from_path(self.path(name)).map_err(artifact_error(name))?;
        for value in vector {
            writer
                .write_record([format!("{value}")])
                .map_err(artifact_error(name))?;
        }
        writer.flush()?;
        Ok(())
    }
}

/// In-memory sink for tests and embedding callers.
#[derive(Debug)]
pub struct MemorySink<E> {
    pub matrices: HashMap<String, ndarray::Array2<E>>,
    pub vectors: HashMap<String, ndarray::Array1<E>>,
    pub labels: HashMap<String, Vec<Gas>>,
}

impl<E> Default for MemorySink<E> {
    fn default() -> Self {
        Self {
            matrices: HashMap::new(),
            vectors: HashMap::new(),
            labels: HashMap::new(),
        }
    }
}

impl<E: Clone> ArtifactSink<E> for MemorySink<E> {
    fn write_matrix(
        &mut self,
        name: &str,
        matrix: ArrayView2<'_, E>,
        labels: Option<&[Gas]>,
    ) -> Result<()> {
        self.matrices.insert(name.to_owned(), matrix.to_owned());
        if let Some(labels) = labels {
            self.labels.insert(name.to_owned(), labels.to_vec());
        }
        Ok(())
    }

    fn write_vector(&mut self, name: &str, vector: ArrayView1<'_, E>) -> Result<()> {
        self.vectors.insert(name.to_owned(), vector.to_owned());
        Ok(())
    }
}

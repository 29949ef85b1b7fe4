// src/serialize.rs
//
// Result file layout, repeated for U, S and V in that order:
//
//   i32 LE   row count
//   i32 LE   column count
//   f64 LE   rows * cols values, row-major
//
// An absent matrix is written as 0, 0 with no values, so a reader always
// finds exactly three records.

use crate::error::PipelineError;
use crate::factorize::{FactorMatrices, Factorization};
use log::{debug, info};
use ndarray::{Array2, ArrayView2};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

fn dimension_to_i32(value: usize, what: &str) -> io::Result<i32> {
    i32::try_from(value).map_err(|_| {
        io::Error::new(
            ErrorKind::InvalidInput,
            format!("{} {} does not fit in a 4-byte record header", what, value),
        )
    })
}

/// Writes one matrix record. `None` becomes an empty `0 x 0` record.
pub fn write_matrix_record<W: Write>(writer: &mut W, matrix: Option<ArrayView2<'_, f64>>) -> io::Result<()> {
    let Some(matrix) = matrix else {
        writer.write_all(&0i32.to_le_bytes())?;
        writer.write_all(&0i32.to_le_bytes())?;
        return Ok(());
    };

    let rows = dimension_to_i32(matrix.nrows(), "row count")?;
    let cols = dimension_to_i32(matrix.ncols(), "column count")?;
    writer.write_all(&rows.to_le_bytes())?;
    writer.write_all(&cols.to_le_bytes())?;

    match matrix.as_slice() {
        #[cfg(target_endian = "little")]
        Some(contiguous) => writer.write_all(bytemuck::cast_slice(contiguous)),
        _ => {
            // Iteration order of an ArrayView2 is logical row-major order.
            for value in matrix.iter() {
                writer.write_all(&value.to_le_bytes())?;
            }
            Ok(())
        }
    }
}

/// Writes the three factor records in the order U, S, V.
pub fn write_factors<W: Write>(
    writer: &mut W,
    u: Option<ArrayView2<'_, f64>>,
    s: Option<ArrayView2<'_, f64>>,
    v: Option<ArrayView2<'_, f64>>,
) -> io::Result<()> {
    write_matrix_record(writer, u)?;
    write_matrix_record(writer, s)?;
    write_matrix_record(writer, v)?;
    Ok(())
}

fn read_i32<R: Read>(reader: &mut R) -> io::Result<i32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(i32::from_le_bytes(bytes))
}

/// Reads one matrix record. An empty `0 x 0` record reads as `None`.
pub fn read_matrix_record<R: Read>(reader: &mut R) -> io::Result<Option<Array2<f64>>> {
    let rows = read_i32(reader)?;
    let cols = read_i32(reader)?;
    if rows < 0 || cols < 0 {
        return Err(io::Error::new(
            ErrorKind::InvalidData,
            format!("negative matrix dimensions {}x{}", rows, cols),
        ));
    }
    if rows == 0 && cols == 0 {
        return Ok(None);
    }

    let (rows, cols) = (rows as usize, cols as usize);
    let len = rows.checked_mul(cols).ok_or_else(|| {
        io::Error::new(ErrorKind::InvalidData, format!("matrix {}x{} is too large", rows, cols))
    })?;

    let mut values: Vec<f64> = Vec::new();
    values
        .try_reserve_exact(len)
        .map_err(|e| io::Error::new(ErrorKind::OutOfMemory, e.to_string()))?;
    values.resize(len, 0.0);
    reader.read_exact(bytemuck::cast_slice_mut(values.as_mut_slice()))?;
    for value in values.iter_mut() {
        // No-op on little-endian targets.
        *value = f64::from_bits(u64::from_le(value.to_bits()));
    }

    let matrix = Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| io::Error::new(ErrorKind::InvalidData, e.to_string()))?;
    Ok(Some(matrix))
}

/// Reads the three factor records written by [`write_factors`].
pub fn read_factors<R: Read>(reader: &mut R) -> io::Result<FactorMatrices> {
    let u = read_matrix_record(reader)?;
    let s = read_matrix_record(reader)?;
    let v = read_matrix_record(reader)?;
    Ok(FactorMatrices { u, s, v })
}

/// Loads a result file from disk.
pub fn load_factors<P: AsRef<Path>>(path: P) -> Result<FactorMatrices, PipelineError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| PipelineError::io(path, e))?;
    let mut reader = BufReader::new(file);
    read_factors(&mut reader).map_err(|e| PipelineError::io(path, e))
}

/// Persists a factorization at `path`.
///
/// The records go to a temporary file in the destination directory, which is
/// renamed over `path` only once everything has been written and flushed. A
/// failure leaves no file at `path`. Returns the number of bytes written.
pub fn save_factorization<P: AsRef<Path>>(path: P, factorization: &Factorization) -> Result<u64, PipelineError> {
    let path = path.as_ref();
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let io_error = |e: io::Error| PipelineError::io(path, e);

    let staging = NamedTempFile::new_in(directory).map_err(io_error)?;
    let mut writer = BufWriter::new(staging);
    let factors = factorization.factors();
    write_factors(&mut writer, factors.u(), factors.s(), factors.v()).map_err(io_error)?;
    let staging = writer.into_inner().map_err(|e| io_error(e.into_error()))?;
    staging.as_file().sync_all().map_err(io_error)?;

    let bytes = staging.as_file().metadata().map_err(io_error)?.len();
    staging.persist(path).map_err(|e| io_error(e.error))?;
    debug!("Persisted {} bytes to {:?}.", bytes, path);
    info!("Wrote U, S, V to {:?}.", path);
    Ok(bytes)
}

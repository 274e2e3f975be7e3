//! Batch results file.
//!
//! A results file is a header describing the rotation grid and the cut boxes,
//! followed by one [`RenderFromPosition`] record per render. Records are streamed
//! as they are produced so a batch never holds every render in memory.
//!
//! Record order is X outermost, then Z, then Y, which gives the flat index
//! `count_z * count_y * x + y + count_y * z` (see [`ResultsHeader::render_index`]).
//! All values are little-endian. Grid limits in the header are stored in units
//! of π; record rotations are stored in radians.

use std::f32::consts::PI;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;

use crate::binary::{read_f32, read_i32, write_f32, write_i32};
use crate::cut_box::{CutAab, CutBoxList};
use crate::records::RenderFromPosition;

/// Errors that can occur while reading or writing binary records.
#[derive(Error, Debug)]
pub enum FormatError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected end of data while reading {field}")]
    Truncated { field: &'static str },

    #[error("Invalid data: {0}")]
    Invalid(String),
}

/// Result type for binary record operations.
pub type FormatResult<T> = Result<T, FormatError>;

/// Largest grid count accepted per axis, and for the cut box count.
pub const MAX_GRID_COUNT: u32 = 1 << 16;

/// Description of the rotation grid a results file covers.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsHeader {
    pub count_x: u32,
    /// Lower X rotation limit in radians
    pub min_x: f32,
    pub max_x: f32,
    pub count_y: u32,
    pub count_z: u32,
    pub min_z: f32,
    pub max_z: f32,
    pub cut_boxes: CutBoxList,
}

impl ResultsHeader {
    /// Number of render records following the header.
    ///
    /// Saturates instead of overflowing; see [`ResultsHeader::checked_total_renders`].
    pub fn total_renders(&self) -> usize {
        self.checked_total_renders().unwrap_or(usize::MAX)
    }

    pub fn checked_total_renders(&self) -> Option<usize> {
        (self.count_x as usize)
            .checked_mul(self.count_y as usize)?
            .checked_mul(self.count_z as usize)
    }

    /// Position of the render for grid cell (x, y, z) in the record stream.
    pub fn render_index(&self, x: u32, y: u32, z: u32) -> usize {
        let (count_y, count_z) = (self.count_y as usize, self.count_z as usize);
        count_z * count_y * x as usize + y as usize + count_y * z as usize
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> std::io::Result<()> {
        write_i32(w, self.count_x as i32)?;
        write_f32(w, self.min_x / PI)?;
        write_f32(w, self.max_x / PI)?;
        write_i32(w, self.count_y as i32)?;
        write_i32(w, self.count_z as i32)?;
        write_f32(w, self.min_z / PI)?;
        write_f32(w, self.max_z / PI)?;
        write_i32(w, self.cut_boxes.len() as i32)?;
        for cut in self.cut_boxes.iter() {
            cut.write_to(w)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(r: &mut R) -> FormatResult<Self> {
        let count_x = read_grid_count(r, "count x")?;
        let min_x = read_f32(r, "min x")? * PI;
        let max_x = read_f32(r, "max x")? * PI;
        let count_y = read_grid_count(r, "count y")?;
        let count_z = read_grid_count(r, "count z")?;
        let min_z = read_f32(r, "min z")? * PI;
        let max_z = read_f32(r, "max z")? * PI;
        let box_count = read_grid_count(r, "cut box count")?;
        let cut_boxes = (0..box_count)
            .map(|_| CutAab::read_from(r))
            .collect::<FormatResult<CutBoxList>>()?;
        let header = Self {
            count_x,
            min_x,
            max_x,
            count_y,
            count_z,
            min_z,
            max_z,
            cut_boxes,
        };
        if header.checked_total_renders().is_none() {
            return Err(FormatError::Invalid(format!(
                "grid {count_x} x {count_y} x {count_z} is too large"
            )));
        }
        Ok(header)
    }
}

fn read_grid_count<R: Read>(r: &mut R, field: &'static str) -> FormatResult<u32> {
    let value = read_i32(r, field)?;
    match u32::try_from(value) {
        Ok(count) if count <= MAX_GRID_COUNT => Ok(count),
        Ok(_) => Err(FormatError::Invalid(format!("{field} {value} exceeds {MAX_GRID_COUNT}"))),
        Err(_) => Err(FormatError::Invalid(format!("negative {field}: {value}"))),
    }
}

/// Streams render records after a header.
pub struct ResultsWriter<W: Write> {
    inner: W,
    skip_additional_data: bool,
    written: usize,
}

impl ResultsWriter<BufWriter<File>> {
    /// Create (or truncate) a results file and write its header.
    pub fn create<P: AsRef<Path>>(
        path: P,
        header: &ResultsHeader,
        skip_additional_data: bool,
    ) -> FormatResult<Self> {
        let file = File::create(path)?;
        Self::new(BufWriter::new(file), header, skip_additional_data)
    }
}

impl<W: Write> ResultsWriter<W> {
    /// Write `header` to `inner` and prepare for records.
    ///
    /// With `skip_additional_data` every record is written without its rays
    /// and intersections.
    pub fn new(mut inner: W, header: &ResultsHeader, skip_additional_data: bool) -> FormatResult<Self> {
        header.write_to(&mut inner)?;
        Ok(Self {
            inner,
            skip_additional_data,
            written: 0,
        })
    }

    pub fn write_render(&mut self, render: &RenderFromPosition) -> FormatResult<()> {
        render.write_to(&mut self.inner, self.skip_additional_data)?;
        self.written += 1;
        Ok(())
    }

    pub fn renders_written(&self) -> usize {
        self.written
    }

    /// Flush and hand back the underlying writer.
    pub fn finish(mut self) -> FormatResult<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

/// Reads a results file header and then its records in order.
pub struct ResultsReader<R: Read> {
    inner: R,
    header: ResultsHeader,
    read: usize,
}

impl ResultsReader<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> FormatResult<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<R: Read> ResultsReader<R> {
    pub fn new(mut inner: R) -> FormatResult<Self> {
        let header = ResultsHeader::read_from(&mut inner)?;
        Ok(Self {
            inner,
            header,
            read: 0,
        })
    }

    pub fn header(&self) -> &ResultsHeader {
        &self.header
    }

    /// Next full record, or `None` once every render in the header was read.
    pub fn next_render(&mut self) -> FormatResult<Option<RenderFromPosition>> {
        if self.read >= self.header.total_renders() {
            return Ok(None);
        }
        let render = RenderFromPosition::read_from(&mut self.inner)?;
        self.read += 1;
        Ok(Some(render))
    }

    /// Next record without rays and intersections.
    pub fn next_summary(&mut self) -> FormatResult<Option<RenderFromPosition>> {
        if self.read >= self.header.total_renders() {
            return Ok(None);
        }
        let render = RenderFromPosition::read_summary(&mut self.inner)?;
        self.read += 1;
        Ok(Some(render))
    }

    /// Statistics of every remaining render, in file order.
    pub fn read_summaries(&mut self) -> FormatResult<Vec<RenderFromPosition>> {
        let mut renders = Vec::new();
        while let Some(render) = self.next_summary()? {
            renders.push(render);
        }
        Ok(renders)
    }
}

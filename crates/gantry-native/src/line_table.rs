//! `file:line` to address resolution from an executable's DWARF line
//! program.

use std::path::{Path, PathBuf};

use gimli::{EndianSlice, RunTimeEndian};
use object::{Object, ObjectKind, ObjectSection, ObjectSegment};

use crate::error::NativeError;

type Reader<'a> = EndianSlice<'a, RunTimeEndian>;

/// One statement row of the line program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineRow {
    pub file: PathBuf,
    pub line: u64,
    /// Link-time address.
    pub address: u64,
}

#[derive(Debug, Clone)]
pub struct LineTable {
    rows: Vec<LineRow>,
    /// Position independent; addresses need the load bias added.
    pub pie: bool,
    /// Lowest virtual address of any loadable segment.
    pub base_vaddr: u64,
}

impl LineTable {
    /// Read the line program of the executable at `path`.
    pub fn load(path: &Path) -> Result<Self, NativeError> {
        let data = std::fs::read(path)?;
        let obj = object::File::parse(&*data)?;
        let endian = if obj.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        let load_section = |id: gimli::SectionId| -> Result<Reader<'_>, gimli::Error> {
            let bytes = obj
                .section_by_name(id.name())
                .and_then(|section| section.data().ok())
                .unwrap_or(&[]);
            Ok(EndianSlice::new(bytes, endian))
        };
        let dwarf = gimli::Dwarf::load(&load_section)?;
        let rows = statement_rows(&dwarf)?;
        if rows.is_empty() {
            return Err(NativeError::NoLineInfo(path.to_path_buf()));
        }

        let base_vaddr = obj
            .segments()
            .map(|segment| segment.address())
            .min()
            .unwrap_or(0);
        Ok(Self::from_rows(rows, obj.kind() == ObjectKind::Dynamic, base_vaddr))
    }

    pub fn from_rows(mut rows: Vec<LineRow>, pie: bool, base_vaddr: u64) -> Self {
        rows.sort_by(|a, b| (&a.file, a.line, a.address).cmp(&(&b.file, b.line, b.address)));
        rows.dedup();
        Self {
            rows,
            pie,
            base_vaddr,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Lowest link-time address of a statement on `line` of `file`.
    ///
    /// `None` when the line has no statement of its own.
    pub fn resolve(&self, file: &Path, line: u64) -> Option<u64> {
        self.rows
            .iter()
            .filter(|row| row.line == line && same_file(&row.file, file))
            .map(|row| row.address)
            .min()
    }
}

fn statement_rows(dwarf: &gimli::Dwarf<Reader<'_>>) -> Result<Vec<LineRow>, NativeError> {
    let mut out = Vec::new();
    let mut units = dwarf.units();
    while let Some(header) = units.next()? {
        let unit = dwarf.unit(header)?;
        let Some(program) = unit.line_program.clone() else {
            continue;
        };
        let comp_dir = unit
            .comp_dir
            .map(|dir| PathBuf::from(dir.to_string_lossy().as_ref()));

        let mut rows = program.rows();
        while let Some((header, row)) = rows.next_row()? {
            if row.end_sequence() || !row.is_stmt() {
                continue;
            }
            let Some(line) = row.line() else { continue };
            let Some(file) = file_path(dwarf, &unit, header, row.file_index(), comp_dir.as_deref())
            else {
                continue;
            };
            out.push(LineRow {
                file,
                line: line.get(),
                address: row.address(),
            });
        }
    }
    Ok(out)
}

fn file_path(
    dwarf: &gimli::Dwarf<Reader<'_>>,
    unit: &gimli::Unit<Reader<'_>>,
    header: &gimli::LineProgramHeader<Reader<'_>>,
    file_index: u64,
    comp_dir: Option<&Path>,
) -> Option<PathBuf> {
    let file = header.file(file_index)?;
    let mut path = comp_dir.map(Path::to_path_buf).unwrap_or_default();
    if let Some(directory) = file.directory(header) {
        let dir = dwarf.attr_string(unit, directory).ok()?;
        path.push(dir.to_string_lossy().as_ref());
    }
    let name = dwarf.attr_string(unit, file.path_name()).ok()?;
    path.push(name.to_string_lossy().as_ref());
    Some(path)
}

/// Paths match exactly or when one is a component-wise suffix of the other.
fn same_file(recorded: &Path, requested: &Path) -> bool {
    recorded == requested || recorded.ends_with(requested) || requested.ends_with(recorded)
}

use crate::core::models::atom::{AtomRecord, DEFAULT_SIGMA, Element};
use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AtomFileError {
    #[error("I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("Unknown element symbol '{symbol}' on record {record}")]
    UnknownElement { record: usize, symbol: String },
    #[error("Atom on record {record} has a non-finite coordinate")]
    NonFinite { record: usize },
}

#[derive(Debug, Deserialize, Serialize)]
struct AtomRow {
    element: String,
    x: f64,
    y: f64,
    z: f64,
    #[serde(default)]
    sigma: Option<f64>,
    #[serde(default)]
    occupancy: Option<f64>,
}

/// Reads atoms from CSV with a header row. `sigma` and `occupancy` columns are optional.
pub fn read_atoms(reader: impl Read) -> Result<Vec<AtomRecord>, AtomFileError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let mut atoms = Vec::new();
    for (i, row) in csv_reader.deserialize::<AtomRow>().enumerate() {
        let row = row?;
        let record = i + 1;
        let element = Element::from_str(&row.element).map_err(|_| AtomFileError::UnknownElement {
            record,
            symbol: row.element.clone(),
        })?;
        if !(row.x.is_finite() && row.y.is_finite() && row.z.is_finite()) {
            return Err(AtomFileError::NonFinite { record });
        }
        atoms.push(AtomRecord {
            atomic_number: element.atomic_number(),
            position: Point3::new(row.x, row.y, row.z),
            sigma: row.sigma.unwrap_or(DEFAULT_SIGMA),
            occupancy: row.occupancy.unwrap_or(1.0),
        });
    }
    Ok(atoms)
}

pub fn read_atoms_from_path(path: &Path) -> Result<Vec<AtomRecord>, AtomFileError> {
    let file = std::fs::File::open(path).map_err(|e| AtomFileError::Io {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;
    read_atoms(std::io::BufReader::new(file))
}

pub fn write_atoms(atoms: &[AtomRecord], writer: impl Write) -> Result<(), AtomFileError> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    for atom in atoms {
        let element = atom
            .element()
            .symbol()
            .map(str::to_string)
            .unwrap_or_else(|| atom.atomic_number.to_string());
        csv_writer.serialize(AtomRow {
            element,
            x: atom.position.x,
            y: atom.position.y,
            z: atom.position.z,
            sigma: Some(atom.sigma),
            occupancy: Some(atom.occupancy),
        })?;
    }
    csv_writer.flush().map_err(|e| AtomFileError::Csv(e.into()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_atoms_parses_required_and_optional_columns() {
        let data = "element,x,y,z,sigma,occupancy\nC,1.0,2.0,3.0,0.1,0.5\nO, 4, 5, 6,,\n";
        let atoms = read_atoms(data.as_bytes()).unwrap();
        assert_eq!(atoms.len(), 2);
        assert_eq!(atoms[0].atomic_number, 6);
        assert_eq!(atoms[0].sigma, 0.1);
        assert_eq!(atoms[0].occupancy, 0.5);
        assert_eq!(atoms[1].atomic_number, 8);
        assert_eq!(atoms[1].position, Point3::new(4.0, 5.0, 6.0));
        assert_eq!(atoms[1].sigma, DEFAULT_SIGMA);
        assert_eq!(atoms[1].occupancy, 1.0);
    }

    #[test]
    fn read_atoms_without_optional_columns() {
        let data = "element,x,y,z\nN,0,0,0\n";
        let atoms = read_atoms(data.as_bytes()).unwrap();
        assert_eq!(atoms[0].atomic_number, 7);
    }

    #[test]
    fn unknown_element_reports_record_number() {
        let data = "element,x,y,z\nC,0,0,0\nQq,1,1,1\n";
        let err = read_atoms(data.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            AtomFileError::UnknownElement { record: 2, ref symbol } if symbol == "Qq"
        ));
    }

    #[test]
    fn malformed_coordinate_is_a_csv_error() {
        let data = "element,x,y,z\nC,zero,0,0\n";
        assert!(matches!(read_atoms(data.as_bytes()), Err(AtomFileError::Csv(_))));
    }

    #[test]
    fn written_atoms_can_be_read_back_from_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.csv");
        let atoms = vec![
            AtomRecord::new(6, Point3::new(1.5, 2.5, 3.5)),
            AtomRecord::new(16, Point3::new(-1.0, 0.0, 10.0)),
        ];
        let mut file = std::fs::File::create(&path).unwrap();
        write_atoms(&atoms, &mut file).unwrap();
        file.flush().unwrap();

        let loaded = read_atoms_from_path(&path).unwrap();
        assert_eq!(loaded, atoms);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = read_atoms_from_path(Path::new("/definitely/not/here.csv")).unwrap_err();
        assert!(matches!(err, AtomFileError::Io { .. }));
    }
}

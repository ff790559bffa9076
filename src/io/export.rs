//! Table and structure exports.

use crate::table::{Column, Record, Value};
use anyhow::{Context, Result};
use rust_xlsxwriter::{Image, Workbook};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

fn cell_text(record: &Record, column: Column) -> String {
    match record.get(column) {
        Some(Value::Text(s)) => s,
        Some(Value::Float(v)) => v.to_string(),
        Some(Value::Int(v)) => v.to_string(),
        None => String::new(),
    }
}

/// Write records as a semicolon-separated table with a header and no index.
pub fn write_csv(path: &Path, records: &[Record]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b';')
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(Column::ALL.iter().map(|c| c.header()))?;
    for record in records {
        writer.write_record(Column::ALL.iter().map(|c| cell_text(record, *c)))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Header of the depiction column.
const DEPICTION_HEADER: &str = "Molecule";
const DEPICTION_SIZE: f64 = 250.0;
/// Row height in points and column width in characters fitting one image
const DEPICTION_ROW_HEIGHT: f64 = 190.0;
const DEPICTION_COLUMN_WIDTH: f64 = 36.0;

/// Write records as a workbook with the table columns plus a rendered
/// depiction per row.
///
/// `depictions` lines up with `records`; a missing image leaves its cell
/// empty.
pub fn write_xlsx(
    path: &Path,
    records: &[Record],
    depictions: &[Option<Vec<u8>>],
) -> Result<()> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    let image_col = Column::ALL.len() as u16;

    for (col, column) in Column::ALL.iter().enumerate() {
        sheet.write_string(0, col as u16, column.header())?;
    }
    sheet.write_string(0, image_col, DEPICTION_HEADER)?;
    sheet.set_column_width(image_col, DEPICTION_COLUMN_WIDTH)?;

    for (i, record) in records.iter().enumerate() {
        let row = i as u32 + 1;
        for (col, column) in Column::ALL.iter().enumerate() {
            let col = col as u16;
            match record.get(*column) {
                Some(Value::Text(s)) => {
                    sheet.write_string(row, col, s)?;
                }
                Some(Value::Float(v)) => {
                    sheet.write_number(row, col, v)?;
                }
                Some(Value::Int(v)) => {
                    sheet.write_number(row, col, v as f64)?;
                }
                None => {}
            }
        }

        if let Some(Some(png)) = depictions.get(i) {
            let image = Image::new_from_buffer(png)?.set_scale_to_size(
                DEPICTION_SIZE,
                DEPICTION_SIZE,
                true,
            );
            sheet.set_row_height(row, DEPICTION_ROW_HEIGHT)?;
            sheet.insert_image(row, image_col, &image)?;
        }
    }

    workbook
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Write records carrying a molblock as an SDF file.
///
/// The title line of each block is replaced by the record name and every
/// column except `Smiles` and `Name` is emitted as a data item. Records
/// without coordinates are skipped; the number written is returned.
pub fn write_sdf(path: &Path, records: &[Record]) -> Result<usize> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let mut written = 0;

    for record in records {
        let Some(block) = record.structure.as_ref().and_then(|s| s.block()) else {
            continue;
        };
        write_block(&mut writer, record, block)?;
        written += 1;
    }

    writer
        .flush()
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(written)
}

fn write_block<W: Write>(writer: &mut W, record: &Record, block: &str) -> std::io::Result<()> {
    writeln!(writer, "{}", record.name)?;
    for line in block.lines().skip(1) {
        writeln!(writer, "{}", line)?;
    }
    writeln!(writer, ">  <Smiles>")?;
    writeln!(writer, "{}", record.smiles)?;
    writeln!(writer)?;
    for column in Column::DESCRIPTORS {
        if record.get(column).is_some() {
            writeln!(writer, ">  <{}>", column.header())?;
            writeln!(writer, "{}", cell_text(record, column))?;
            writeln!(writer)?;
        }
    }
    writeln!(writer, "$$$$")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{Descriptors, Structure};
    use crate::toolkit::mock::PIXEL_PNG;
    use std::io::Read;
    use tempfile::TempDir;

    fn described(name: &str, smiles: &str) -> Record {
        let mut record = Record::new(name, smiles);
        record.set_descriptors(&Descriptors {
            mol_weight: 250.5,
            logp: 1.25,
            rotatable_bonds: 3,
            hbond_acceptors: 2,
            hbond_donors: 1,
            tpsa: 40.0,
        });
        record
    }

    #[test]
    fn test_write_csv_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.csv");
        write_csv(&path, &[described("a", "CCO"), Record::new("b", "CN")]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "Smiles;Name;MW;LogP;numRot;HBA;HBD;TPSA");
        assert_eq!(lines[1], "CCO;a;250.5;1.25;3;2;1;40");
        assert_eq!(lines[2], "CN;b;;;;;;");
    }

    #[test]
    fn test_write_sdf_titles_and_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.sdf");

        let mut with_block = described("aspirin", "CCO");
        with_block.set_structure(
            Structure::new("CCO").with_block("old title\n  prog\n\n  0  0  0  0  0  0  0  0  0  0999 V2000\nM  END\n"),
        );
        let without_block = Record::new("flat", "CN");

        let written = write_sdf(&path, &[with_block, without_block]).unwrap();
        assert_eq!(written, 1);

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("aspirin\n  prog\n"));
        assert!(!text.contains("old title"));
        assert!(text.contains(">  <MW>\n250.5\n"));
        assert!(text.contains(">  <HBD>\n1\n"));
        assert_eq!(text.matches("$$$$").count(), 1);
    }

    #[test]
    fn test_write_xlsx_rows_and_images() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("errors.xlsx");
        let records = [described("a", "CCO"), Record::new("b", "CN")];

        write_xlsx(&path, &records, &[Some(PIXEL_PNG.to_vec()), None]).unwrap();

        let mut archive = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let media: Vec<String> = archive
            .file_names()
            .filter(|name| name.starts_with("xl/media/"))
            .map(str::to_string)
            .collect();
        assert_eq!(media.len(), 1);

        let mut sheet = String::new();
        archive
            .by_name("xl/worksheets/sheet1.xml")
            .unwrap()
            .read_to_string(&mut sheet)
            .unwrap();
        // header plus one row per record
        assert_eq!(sheet.matches("<row ").count(), 3);
    }
}

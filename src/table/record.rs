//! Molecule records and the values stored in their columns.

use std::fmt;

/// Opaque handle to a molecular structure.
///
/// Structures travel between toolkit calls as canonical SMILES, optionally
/// carrying an MDL molblock once coordinates (2D or 3D) have been generated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Structure {
    smiles: String,
    block: Option<String>,
}

impl Structure {
    /// Create a structure from its canonical SMILES.
    pub fn new(smiles: impl Into<String>) -> Self {
        Self {
            smiles: smiles.into(),
            block: None,
        }
    }

    /// Attach a molblock carrying coordinates.
    pub fn with_block(mut self, block: impl Into<String>) -> Self {
        self.block = Some(block.into());
        self
    }

    /// Canonical SMILES of the structure.
    pub fn smiles(&self) -> &str {
        &self.smiles
    }

    /// Molblock, if coordinates exist.
    pub fn block(&self) -> Option<&str> {
        self.block.as_deref()
    }

    /// Key used for duplicate detection.
    pub fn canonical_key(&self) -> &str {
        &self.smiles
    }
}

/// Geometry state of a record's structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Geometry {
    /// No coordinates generated yet.
    #[default]
    Pending,
    /// 3D coordinates generated and refined.
    Embedded,
    /// Both embedding methods failed; structure has no 3D coordinates.
    Failed,
    /// 2D depiction computed for reporting a failed record.
    Depicted,
}

/// Addressable columns of the record table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Smiles,
    Name,
    MolWeight,
    LogP,
    RotatableBonds,
    HBondAcceptors,
    HBondDonors,
    Tpsa,
}

impl Column {
    /// Export order of all columns.
    pub const ALL: [Column; 8] = [
        Column::Smiles,
        Column::Name,
        Column::MolWeight,
        Column::LogP,
        Column::RotatableBonds,
        Column::HBondAcceptors,
        Column::HBondDonors,
        Column::Tpsa,
    ];

    /// Descriptor columns, in filter order.
    pub const DESCRIPTORS: [Column; 6] = [
        Column::MolWeight,
        Column::LogP,
        Column::RotatableBonds,
        Column::HBondAcceptors,
        Column::HBondDonors,
        Column::Tpsa,
    ];

    /// Header used in exported tables.
    pub fn header(&self) -> &'static str {
        match self {
            Column::Smiles => "Smiles",
            Column::Name => "Name",
            Column::MolWeight => "MW",
            Column::LogP => "LogP",
            Column::RotatableBonds => "numRot",
            Column::HBondAcceptors => "HBA",
            Column::HBondDonors => "HBD",
            Column::Tpsa => "TPSA",
        }
    }

    /// Whether the column holds an integer count.
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Column::RotatableBonds | Column::HBondAcceptors | Column::HBondDonors
        )
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header())
    }
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Float(f64),
    Int(i64),
}

impl Value {
    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            Value::Text(_) => None,
        }
    }

    /// Text view of the value, if it has one.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Value::Text(_) => "text",
            Value::Float(_) => "float",
            Value::Int(_) => "integer",
        }
    }
}

/// Physicochemical attributes computed for a structure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Descriptors {
    pub mol_weight: f64,
    pub logp: f64,
    pub rotatable_bonds: i64,
    pub hbond_acceptors: i64,
    pub hbond_donors: i64,
    pub tpsa: f64,
}

/// A row as produced by ingestion, before any validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRecord {
    pub name: Option<String>,
    pub smiles: Option<String>,
}

impl RawRecord {
    pub fn new(smiles: Option<&str>, name: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_string),
            smiles: smiles.map(str::to_string),
        }
    }
}

/// One molecule flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    /// Identifier, unique after collision renaming
    pub name: String,

    /// SMILES column, kept in sync with the structure after each transform
    pub smiles: String,

    /// Parsed structure; `None` until the record passes validation
    pub structure: Option<Structure>,

    pub mol_weight: Option<f64>,
    pub logp: Option<f64>,
    pub rotatable_bonds: Option<i64>,
    pub hbond_acceptors: Option<i64>,
    pub hbond_donors: Option<i64>,
    pub tpsa: Option<f64>,

    /// Coordinate state of the structure
    pub geometry: Geometry,
}

impl Record {
    /// Create a record with a name and raw SMILES.
    pub fn new(name: impl Into<String>, smiles: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            smiles: smiles.into(),
            ..Default::default()
        }
    }

    /// Replace the structure and keep the SMILES column in sync.
    pub fn set_structure(&mut self, structure: Structure) {
        self.smiles = structure.smiles().to_string();
        self.structure = Some(structure);
    }

    /// Store all descriptor columns at once.
    pub fn set_descriptors(&mut self, d: &Descriptors) {
        self.mol_weight = Some(d.mol_weight);
        self.logp = Some(d.logp);
        self.rotatable_bonds = Some(d.rotatable_bonds);
        self.hbond_acceptors = Some(d.hbond_acceptors);
        self.hbond_donors = Some(d.hbond_donors);
        self.tpsa = Some(d.tpsa);
    }

    /// Key used for duplicate detection.
    pub fn dedup_key(&self) -> &str {
        self.structure
            .as_ref()
            .map(Structure::canonical_key)
            .unwrap_or(&self.smiles)
    }

    /// Read a cell.
    pub fn get(&self, column: Column) -> Option<Value> {
        match column {
            Column::Smiles => Some(Value::Text(self.smiles.clone())),
            Column::Name => Some(Value::Text(self.name.clone())),
            Column::MolWeight => self.mol_weight.map(Value::Float),
            Column::LogP => self.logp.map(Value::Float),
            Column::RotatableBonds => self.rotatable_bonds.map(Value::Int),
            Column::HBondAcceptors => self.hbond_acceptors.map(Value::Int),
            Column::HBondDonors => self.hbond_donors.map(Value::Int),
            Column::Tpsa => self.tpsa.map(Value::Float),
        }
    }

    /// Numeric view of a cell.
    pub fn numeric(&self, column: Column) -> Option<f64> {
        self.get(column).and_then(|v| v.as_f64())
    }

    /// Write a cell. Returns the rejected value on a type mismatch.
    pub(crate) fn set(&mut self, column: Column, value: Value) -> Result<(), Value> {
        match (column, value) {
            (Column::Smiles, Value::Text(s)) => self.smiles = s,
            (Column::Name, Value::Text(s)) => self.name = s,
            (Column::MolWeight, v @ (Value::Float(_) | Value::Int(_))) => {
                self.mol_weight = v.as_f64()
            }
            (Column::LogP, v @ (Value::Float(_) | Value::Int(_))) => self.logp = v.as_f64(),
            (Column::Tpsa, v @ (Value::Float(_) | Value::Int(_))) => self.tpsa = v.as_f64(),
            (Column::RotatableBonds, Value::Int(n)) => self.rotatable_bonds = Some(n),
            (Column::HBondAcceptors, Value::Int(n)) => self.hbond_acceptors = Some(n),
            (Column::HBondDonors, Value::Int(n)) => self.hbond_donors = Some(n),
            (_, v) => return Err(v),
        }
        Ok(())
    }

    /// Clear a cell.
    pub(crate) fn clear(&mut self, column: Column) {
        match column {
            Column::Smiles => {
                self.smiles.clear();
                self.structure = None;
            }
            Column::Name => self.name.clear(),
            Column::MolWeight => self.mol_weight = None,
            Column::LogP => self.logp = None,
            Column::RotatableBonds => self.rotatable_bonds = None,
            Column::HBondAcceptors => self.hbond_acceptors = None,
            Column::HBondDonors => self.hbond_donors = None,
            Column::Tpsa => self.tpsa = None,
        }
    }
}

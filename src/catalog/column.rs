// Column Management Module
//
// This module defines the Column type describing one column of a base table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Column value types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Integer,
    Float,
    Text,
    Boolean,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Integer => write!(f, "INTEGER"),
            DataType::Float => write!(f, "FLOAT"),
            DataType::Text => write!(f, "TEXT"),
            DataType::Boolean => write!(f, "BOOLEAN"),
        }
    }
}

/// Represents a column in a base table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name
    name: String,
    /// Column data type
    data_type: DataType,
    /// Whether this column can contain NULL values
    #[serde(default = "default_nullable")]
    nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    /// Create a new nullable column
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Column {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    /// Create a column that never holds NULL
    pub fn not_null(name: impl Into<String>, data_type: DataType) -> Self {
        Column {
            nullable: false,
            ..Column::new(name, data_type)
        }
    }

    /// Get the column name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the column data type
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Check if the column can contain NULL values
    pub fn is_nullable(&self) -> bool {
        self.nullable
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.data_type)?;
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        Ok(())
    }
}

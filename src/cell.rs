// Copyright 2021 Datafuse Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Addressing of versioned data: tables and cells.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// A fully qualified table reference, e.g. `"namespace.table"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TableName(String);

impl TableName {
    pub fn new(name: impl ToString) -> Self {
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The `(row, column)` address of a logical value in a table.
///
/// Rows and columns are opaque byte strings.
/// The derived ordering is lexicographic by row, then by column,
/// which is the order every scan in this crate follows.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub row: Vec<u8>,
    pub column: Vec<u8>,
}

impl Cell {
    pub fn new(row: impl Into<Vec<u8>>, column: impl Into<Vec<u8>>) -> Self {
        Self {
            row: row.into(),
            column: column.into(),
        }
    }

    /// The smallest cell in `row`: the empty column sorts before any other column.
    pub fn first_of_row(row: impl Into<Vec<u8>>) -> Self {
        Self::new(row, Vec::new())
    }

    pub fn row(&self) -> &[u8] {
        &self.row
    }

    pub fn column(&self) -> &[u8] {
        &self.column
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(row=")?;
        write_hex(f, &self.row)?;
        write!(f, ", column=")?;
        write_hex(f, &self.column)?;
        write!(f, ")")
    }
}

fn write_hex(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    write!(f, "0x")?;
    for b in bytes {
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_order_row_then_column() {
        let mut cells = vec![
            Cell::new(vec![2], vec![1]),
            Cell::new(vec![1], vec![2]),
            Cell::new(vec![1], vec![1]),
            Cell::new(vec![1, 0], vec![0]),
        ];
        cells.sort();

        assert_eq!(cells, vec![
            Cell::new(vec![1], vec![1]),
            Cell::new(vec![1], vec![2]),
            Cell::new(vec![1, 0], vec![0]),
            Cell::new(vec![2], vec![1]),
        ]);
    }

    #[test]
    fn test_first_of_row() {
        let first = Cell::first_of_row(vec![3]);
        assert!(first < Cell::new(vec![3], vec![0]));
        assert!(first > Cell::new(vec![2], vec![0xff]));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            "(row=0x0001, column=0xff)",
            Cell::new(vec![0, 1], vec![0xff]).to_string()
        );
        assert_eq!("ns.t", TableName::new("ns.t").to_string());
    }
}

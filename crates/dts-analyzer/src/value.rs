//! Classification and extraction of property values.
//!
//! The validator works on two levels: a cheap shape classification
//! ([`value_profile`]) used for binding-slot dispatch, and a full semantic
//! [`Value`] used where the actual content matters (`#interrupt-cells`
//! widths, `status` enums, phandle targets).

use enum_as_inner::EnumAsInner;

use dts_parser::ast::{Cell, PropValue};

use crate::string::{unescape, StringParseError};

/// The shape of one property value, as dispatched against binding slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyType {
    Empty,
    U32,
    U64,
    String,
    PropEncodedArray,
    StringList,
    ByteString,
    Unknown,
}

impl std::fmt::Display for PropertyType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Empty => "empty",
            Self::U32 => "u32",
            Self::U64 => "u64",
            Self::String => "string",
            Self::PropEncodedArray => "prop-encoded-array",
            Self::StringList => "stringlist",
            Self::ByteString => "bytestring",
            Self::Unknown => "unknown",
        })
    }
}

/// Classifies each value of a property.
///
/// A one-cell array is a `U32`, a two-cell array a `U64`, anything else a
/// `PropEncodedArray`. A label or path reference stands for a single-cell
/// phandle and classifies as `U32`.
pub fn value_profile(values: &[PropValue]) -> Vec<PropertyType> {
    values.iter().map(classify_value).collect()
}

pub fn classify_value(value: &PropValue) -> PropertyType {
    match value {
        PropValue::Str(_) => PropertyType::String,
        PropValue::Cells(array) => match array.cells.len() {
            1 => PropertyType::U32,
            2 => PropertyType::U64,
            _ => PropertyType::PropEncodedArray,
        },
        PropValue::Ref(_) | PropValue::Path(_) => PropertyType::U32,
        PropValue::Bytes(_) => PropertyType::ByteString,
    }
}

/// A phandle's target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PhandleTarget {
    /// `&UART_1`
    Label(String),
    /// `&{/soc/uart}`
    Path(Vec<String>),
}

/// Property values as defined by the Devicetree specification.
#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum Value {
    Empty,
    /// `<0x11223344>`
    U32(u32),
    /// `<1 0>`, the two cells big-endian
    U64(u64),
    /// `"hello"`, escapes interpreted
    String(String),
    /// `"hello", "world"`
    Stringlist(Vec<String>),
    /// `<&UART_1>`
    Phandle(PhandleTarget),
    /// Anything mixed, e.g. `<1 0>, [0x11], "hi"`
    PropEncodedArray(Vec<ArrayItem>),
    /// `[11 22 33]`
    Bytestring(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum ArrayItem {
    Cell(u64),
    Phandle(PhandleTarget),
    String(String),
    Bytes(Vec<u8>),
}

#[derive(displaydoc::Display, thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// failed to interpret string escapes: {0}
    String(#[from] StringParseError),
    /// value contains an unresolved macro or expression
    Unresolved,
}

impl Value {
    pub fn from_values(values: &[PropValue]) -> Result<Self, ValueError> {
        Ok(match values {
            [] => Value::Empty,
            [PropValue::Cells(array)] => match array.cells.as_slice() {
                [Cell::Ref(label)] => {
                    Value::Phandle(PhandleTarget::Label(label.value.clone()))
                }
                [Cell::Path(path)] => {
                    Value::Phandle(PhandleTarget::Path(path.segments.clone()))
                }
                [single] => Value::U32(resolved_cell(single)? as u32),
                [high, low] => match (try_cell(high), try_cell(low)) {
                    (Some(high), Some(low)) => {
                        Value::U64((high << 32) | (low & 0xffff_ffff))
                    }
                    _ => Value::PropEncodedArray(array_items(values)?),
                },
                _ => Value::PropEncodedArray(array_items(values)?),
            },
            [PropValue::Str(string)] => Value::String(unescape(string.raw())?),
            [PropValue::Ref(label)] => {
                Value::Phandle(PhandleTarget::Label(label.value.clone()))
            }
            [PropValue::Path(path)] => {
                Value::Phandle(PhandleTarget::Path(path.segments.clone()))
            }
            [PropValue::Bytes(bytes)] => Value::Bytestring(bytes.bytes.clone()),
            strings if strings.iter().all(|value| value.is_str()) => Value::Stringlist(
                strings
                    .iter()
                    .filter_map(PropValue::as_str)
                    .map(|string| unescape(string.raw()))
                    .collect::<Result<_, _>>()?,
            ),
            other => Value::PropEncodedArray(array_items(other)?),
        })
    }
}

/// A cell's numeric value; references have none.
fn try_cell(cell: &Cell) -> Option<u64> {
    match cell {
        Cell::Number(number) => Some(number.value),
        Cell::Macro(macro_use) => macro_use.value,
        Cell::Expr(expr) => expr.value,
        Cell::Ref(_) | Cell::Path(_) => None,
    }
}

fn resolved_cell(cell: &Cell) -> Result<u64, ValueError> {
    try_cell(cell).ok_or(ValueError::Unresolved)
}

fn array_items(values: &[PropValue]) -> Result<Vec<ArrayItem>, ValueError> {
    let mut items = Vec::new();
    for value in values {
        match value {
            PropValue::Str(string) => items.push(ArrayItem::String(unescape(string.raw())?)),
            PropValue::Bytes(bytes) => items.push(ArrayItem::Bytes(bytes.bytes.clone())),
            PropValue::Ref(label) => {
                items.push(ArrayItem::Phandle(PhandleTarget::Label(label.value.clone())))
            }
            PropValue::Path(path) => {
                items.push(ArrayItem::Phandle(PhandleTarget::Path(path.segments.clone())))
            }
            PropValue::Cells(array) => {
                for cell in &array.cells {
                    match cell {
                        Cell::Ref(label) => items.push(ArrayItem::Phandle(
                            PhandleTarget::Label(label.value.clone()),
                        )),
                        Cell::Path(path) => items.push(ArrayItem::Phandle(
                            PhandleTarget::Path(path.segments.clone()),
                        )),
                        other => items.push(ArrayItem::Cell(resolved_cell(other)?)),
                    }
                }
            }
        }
    }
    Ok(items)
}

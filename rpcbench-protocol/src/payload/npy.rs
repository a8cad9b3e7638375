//! NPY container codec for dense numeric arrays.
//!
//! Layout:
//!
//! ```text
//! +--------------+-------+-------+------------+----------------------+------+
//! | \x93NUMPY    | major | minor | header len | header dict, padded  | data |
//! | 6 bytes      | 1     | 1     | u16 / u32  | to 64-byte alignment |      |
//! +--------------+-------+-------+------------+----------------------+------+
//! ```
//!
//! Version 1.0 uses a u16 header length; 2.0 and 3.0 use u32. Arrays are
//! always written as 1.0, little-endian, C order.

use crate::error::ProtocolError;
use ndarray::{ArrayD, IxDyn, ShapeBuilder};
use std::fmt;

/// Leading magic of every NPY container.
pub const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

const HEADER_ALIGN: usize = 64;

/// Dense n-dimensional array of one of the supported element types.
#[derive(Debug, Clone, PartialEq)]
pub enum NdArray {
    Bool(ArrayD<bool>),
    U8(ArrayD<u8>),
    I8(ArrayD<i8>),
    I16(ArrayD<i16>),
    U16(ArrayD<u16>),
    I32(ArrayD<i32>),
    U32(ArrayD<u32>),
    I64(ArrayD<i64>),
    U64(ArrayD<u64>),
    F32(ArrayD<f32>),
    F64(ArrayD<f64>),
}

macro_rules! dispatch {
    ($array:expr, $a:ident => $body:expr) => {
        match $array {
            NdArray::Bool($a) => $body,
            NdArray::U8($a) => $body,
            NdArray::I8($a) => $body,
            NdArray::I16($a) => $body,
            NdArray::U16($a) => $body,
            NdArray::I32($a) => $body,
            NdArray::U32($a) => $body,
            NdArray::I64($a) => $body,
            NdArray::U64($a) => $body,
            NdArray::F32($a) => $body,
            NdArray::F64($a) => $body,
        }
    };
}

macro_rules! impl_from_array {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<ArrayD<$ty>> for NdArray {
                fn from(array: ArrayD<$ty>) -> Self {
                    NdArray::$variant(array)
                }
            }
        )*
    };
}

impl_from_array!(
    bool => Bool,
    u8 => U8,
    i8 => I8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

impl fmt::Display for NdArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        dispatch!(self, a => write!(f, "{}", a))
    }
}

impl NdArray {
    /// NumPy dtype name, e.g. `float64`.
    pub fn dtype(&self) -> &'static str {
        match self {
            NdArray::Bool(_) => "bool",
            NdArray::U8(_) => "uint8",
            NdArray::I8(_) => "int8",
            NdArray::I16(_) => "int16",
            NdArray::U16(_) => "uint16",
            NdArray::I32(_) => "int32",
            NdArray::U32(_) => "uint32",
            NdArray::I64(_) => "int64",
            NdArray::U64(_) => "uint64",
            NdArray::F32(_) => "float32",
            NdArray::F64(_) => "float64",
        }
    }

    /// Little-endian array-protocol type string, e.g. `<f8`.
    fn descr(&self) -> &'static str {
        match self {
            NdArray::Bool(_) => "|b1",
            NdArray::U8(_) => "|u1",
            NdArray::I8(_) => "|i1",
            NdArray::I16(_) => "<i2",
            NdArray::U16(_) => "<u2",
            NdArray::I32(_) => "<i4",
            NdArray::U32(_) => "<u4",
            NdArray::I64(_) => "<i8",
            NdArray::U64(_) => "<u8",
            NdArray::F32(_) => "<f4",
            NdArray::F64(_) => "<f8",
        }
    }

    pub fn shape(&self) -> &[usize] {
        dispatch!(self, a => a.shape())
    }

    pub fn len(&self) -> usize {
        dispatch!(self, a => a.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serializes into an NPY container: 1.0, or 2.0 when the header
    /// outgrows a u16 length.
    pub fn to_npy(&self) -> Vec<u8> {
        let header = header_dict(self.descr(), self.shape(), 10);
        let mut out = Vec::with_capacity(header.len() + self.len() * 8);
        out.extend_from_slice(NPY_MAGIC);
        match u16::try_from(header.len()) {
            Ok(len) => {
                out.extend_from_slice(&[1, 0]);
                out.extend_from_slice(&len.to_le_bytes());
                out.extend_from_slice(header.as_bytes());
            }
            Err(_) => {
                let header = header_dict(self.descr(), self.shape(), 12);
                out.extend_from_slice(&[2, 0]);
                out.extend_from_slice(&(header.len() as u32).to_le_bytes());
                out.extend_from_slice(header.as_bytes());
            }
        }

        match self {
            NdArray::Bool(a) => out.extend(a.iter().map(|&v| v as u8)),
            NdArray::U8(a) => out.extend(a.iter().copied()),
            NdArray::I8(a) => out.extend(a.iter().map(|v| v.to_le_bytes()[0])),
            NdArray::I16(a) => a.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
            NdArray::U16(a) => a.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
            NdArray::I32(a) => a.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
            NdArray::U32(a) => a.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
            NdArray::I64(a) => a.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
            NdArray::U64(a) => a.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
            NdArray::F32(a) => a.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
            NdArray::F64(a) => a.iter().for_each(|v| out.extend_from_slice(&v.to_le_bytes())),
        }
        out
    }

    /// Parses an NPY container (versions 1.0 through 3.0).
    pub fn from_npy(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if !bytes.starts_with(NPY_MAGIC) {
            return Err(invalid("missing NPY magic"));
        }
        let major = *bytes.get(6).ok_or_else(|| invalid("truncated preamble"))?;

        let (header_len, header_start) = match major {
            1 => {
                let raw = bytes.get(8..10).ok_or_else(|| invalid("truncated preamble"))?;
                (u16::from_le_bytes([raw[0], raw[1]]) as usize, 10)
            }
            2 | 3 => {
                let raw = bytes.get(8..12).ok_or_else(|| invalid("truncated preamble"))?;
                (
                    u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize,
                    12,
                )
            }
            other => return Err(invalid(format!("unsupported NPY version {}", other))),
        };

        let header_end = header_start + header_len;
        let header = bytes
            .get(header_start..header_end)
            .ok_or_else(|| invalid("truncated header"))?;
        let header = std::str::from_utf8(header).map_err(|_| invalid("header is not UTF-8"))?;
        let header = Header::parse(header)?;

        let data = &bytes[header_end..];
        header.read(data)
    }
}

fn invalid(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::InvalidArray(reason.into())
}

fn header_dict(descr: &str, shape: &[usize], preamble: usize) -> String {
    let shape = match shape {
        [single] => format!("({},)", single),
        dims => format!(
            "({})",
            dims.iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    };
    let mut header = format!(
        "{{'descr': '{}', 'fortran_order': False, 'shape': {}, }}",
        descr, shape
    );

    // Magic, version and length make up the preamble; the newline ends the header.
    let unpadded = preamble + header.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    header.extend(std::iter::repeat(' ').take(padding));
    header.push('\n');
    header
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ByteOrder {
    Little,
    Big,
}

#[derive(Debug)]
struct Header {
    order: ByteOrder,
    kind: char,
    size: usize,
    fortran_order: bool,
    shape: Vec<usize>,
}

impl Header {
    fn parse(text: &str) -> Result<Self, ProtocolError> {
        let descr = dict_value(text, "descr")?;
        let descr = descr
            .strip_prefix('\'')
            .or_else(|| descr.strip_prefix('"'))
            .and_then(|rest| rest.split(['\'', '"']).next())
            .ok_or_else(|| invalid("descr is not a string"))?;

        let mut chars = descr.chars();
        let order = match chars.next() {
            Some('<') | Some('|') => ByteOrder::Little,
            Some('>') => ByteOrder::Big,
            Some('=') if cfg!(target_endian = "big") => ByteOrder::Big,
            Some('=') => ByteOrder::Little,
            _ => return Err(invalid(format!("unsupported descr {}", descr))),
        };
        let kind = chars
            .next()
            .ok_or_else(|| invalid(format!("unsupported descr {}", descr)))?;
        let size = chars
            .as_str()
            .parse::<usize>()
            .map_err(|_| invalid(format!("unsupported descr {}", descr)))?;

        let fortran_order = dict_value(text, "fortran_order")?.starts_with("True");

        let shape = dict_value(text, "shape")?;
        let shape = shape
            .strip_prefix('(')
            .and_then(|rest| rest.split(')').next())
            .ok_or_else(|| invalid("shape is not a tuple"))?;
        let shape = shape
            .split(',')
            .map(str::trim)
            .filter(|dim| !dim.is_empty())
            .map(|dim| {
                dim.trim_end_matches('L')
                    .parse::<usize>()
                    .map_err(|_| invalid(format!("bad dimension {}", dim)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            order,
            kind,
            size,
            fortran_order,
            shape,
        })
    }

    fn read(&self, data: &[u8]) -> Result<NdArray, ProtocolError> {
        let needed = self
            .shape
            .iter()
            .try_fold(self.size, |acc, &dim| acc.checked_mul(dim))
            .ok_or_else(|| invalid("array too large"))?;
        if data.len() < needed {
            return Err(invalid(format!(
                "expected {} data bytes, found {}",
                needed,
                data.len()
            )));
        }
        let data = &data[..needed];
        let big = self.order == ByteOrder::Big;

        macro_rules! elements {
            ($ty:ty) => {
                data.chunks_exact(std::mem::size_of::<$ty>())
                    .map(|chunk| {
                        let mut raw = [0u8; std::mem::size_of::<$ty>()];
                        raw.copy_from_slice(chunk);
                        if big {
                            <$ty>::from_be_bytes(raw)
                        } else {
                            <$ty>::from_le_bytes(raw)
                        }
                    })
                    .collect::<Vec<$ty>>()
            };
        }

        let array = match (self.kind, self.size) {
            ('b', 1) => NdArray::Bool(self.build(data.iter().map(|&b| b != 0).collect())?),
            ('u', 1) => NdArray::U8(self.build(data.to_vec())?),
            ('i', 1) => NdArray::I8(self.build(elements!(i8))?),
            ('i', 2) => NdArray::I16(self.build(elements!(i16))?),
            ('u', 2) => NdArray::U16(self.build(elements!(u16))?),
            ('i', 4) => NdArray::I32(self.build(elements!(i32))?),
            ('u', 4) => NdArray::U32(self.build(elements!(u32))?),
            ('i', 8) => NdArray::I64(self.build(elements!(i64))?),
            ('u', 8) => NdArray::U64(self.build(elements!(u64))?),
            ('f', 4) => NdArray::F32(self.build(elements!(f32))?),
            ('f', 8) => NdArray::F64(self.build(elements!(f64))?),
            (kind, size) => {
                return Err(invalid(format!("unsupported dtype {}{}", kind, size)));
            }
        };
        Ok(array)
    }

    fn build<T>(&self, values: Vec<T>) -> Result<ArrayD<T>, ProtocolError> {
        let shape = IxDyn(&self.shape);
        let result = if self.fortran_order {
            ArrayD::from_shape_vec(shape.f(), values)
        } else {
            ArrayD::from_shape_vec(shape, values)
        };
        result.map_err(|e| invalid(e.to_string()))
    }
}

/// Returns the text following `'key':` in a Python dict literal.
fn dict_value<'a>(text: &'a str, key: &str) -> Result<&'a str, ProtocolError> {
    for quote in ['\'', '"'] {
        let needle = format!("{quote}{key}{quote}");
        if let Some(pos) = text.find(&needle) {
            let rest = text[pos + needle.len()..].trim_start();
            if let Some(rest) = rest.strip_prefix(':') {
                return Ok(rest.trim_start());
            }
        }
    }
    Err(invalid(format!("header has no '{}'", key)))
}

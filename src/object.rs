//! PDF object types.
//!
//! The object model mirrors ISO 32000-1 §7.3: eight basic types plus
//! indirect references. Streams carry their raw (still encoded) data;
//! [`Object::decode_stream_data`] applies the filter pipeline.

use crate::error::{Error, Result};
use std::collections::HashMap;

/// PDF object representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    /// Null object
    Null,
    /// Boolean value
    Boolean(bool),
    /// Integer value
    Integer(i64),
    /// Real (floating-point) value
    Real(f64),
    /// String (byte array)
    String(Vec<u8>),
    /// Name (starting with /)
    Name(String),
    /// Array of objects
    Array(Vec<Object>),
    /// Dictionary (key-value pairs)
    Dictionary(HashMap<String, Object>),
    /// Stream (dictionary + raw data)
    Stream {
        /// Stream dictionary
        dict: HashMap<String, Object>,
        /// Raw stream data (filters not yet applied)
        data: bytes::Bytes,
    },
    /// Indirect object reference
    Reference(ObjectRef),
}

/// Reference to an indirect object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Object number
    pub id: u32,
    /// Generation number
    pub gen: u16,
}

impl ObjectRef {
    /// Create a new object reference.
    pub fn new(id: u32, gen: u16) -> Self {
        Self { id, gen }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} R", self.id, self.gen)
    }
}

impl Object {
    /// Get the type name of this object (without data).
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::Null => "Null",
            Object::Boolean(_) => "Boolean",
            Object::Integer(_) => "Integer",
            Object::Real(_) => "Real",
            Object::String(_) => "String",
            Object::Name(_) => "Name",
            Object::Array(_) => "Array",
            Object::Dictionary(_) => "Dictionary",
            Object::Stream { .. } => "Stream",
            Object::Reference(_) => "Reference",
        }
    }

    /// Try to cast to integer.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Object::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to cast to a number (integer or real).
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Object::Integer(i) => Some(*i as f64),
            Object::Real(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to name.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Object::Name(s) => Some(s),
            _ => None,
        }
    }

    /// Try to cast to dictionary. Works for both Dictionary and Stream objects.
    pub fn as_dict(&self) -> Option<&HashMap<String, Object>> {
        match self {
            Object::Dictionary(d) => Some(d),
            Object::Stream { dict, .. } => Some(dict),
            _ => None,
        }
    }

    /// Try to cast to array.
    pub fn as_array(&self) -> Option<&Vec<Object>> {
        match self {
            Object::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Try to cast to reference.
    pub fn as_reference(&self) -> Option<ObjectRef> {
        match self {
            Object::Reference(r) => Some(*r),
            _ => None,
        }
    }

    /// Try to cast to boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to cast to string (bytes).
    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            Object::String(s) => Some(s),
            _ => None,
        }
    }

    /// Check if object is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    /// Decode stream data using the filters named in the stream dictionary.
    ///
    /// Supported filters: `FlateDecode` (with optional PNG predictors) and
    /// `ASCIIHexDecode`. Anything else returns [`Error::Unsupported`];
    /// signature workflows never need image or LZW filters.
    pub fn decode_stream_data(&self) -> Result<Vec<u8>> {
        match self {
            Object::Stream { dict, data } => {
                let filters = dict.get("Filter").map(filter_names).unwrap_or_default();
                if filters.is_empty() {
                    return Ok(data.to_vec());
                }

                let params = predictor_params(dict.get("DecodeParms"));
                let mut current = data.to_vec();
                for filter in &filters {
                    current = match filter.as_str() {
                        "FlateDecode" => {
                            let inflated = inflate(&current)?;
                            match &params {
                                Some(p) if p.predictor >= 10 => apply_png_predictor(&inflated, p)?,
                                _ => inflated,
                            }
                        },
                        "ASCIIHexDecode" => decode_ascii_hex(&current)?,
                        other => {
                            return Err(Error::Unsupported(format!("stream filter {}", other)));
                        },
                    };
                }
                Ok(current)
            },
            _ => Err(Error::InvalidObjectType {
                expected: "Stream".to_string(),
                found: self.type_name().to_string(),
            }),
        }
    }
}

/// Extract filter names from a Filter entry (single Name or Array of Names).
fn filter_names(filter_obj: &Object) -> Vec<String> {
    match filter_obj {
        Object::Name(name) => vec![name.clone()],
        Object::Array(arr) => arr
            .iter()
            .filter_map(|obj| obj.as_name().map(|s| s.to_string()))
            .collect(),
        _ => vec![],
    }
}

/// Predictor parameters for FlateDecode (ISO 32000-1 Table 8).
#[derive(Debug, Clone)]
struct PredictorParams {
    predictor: i64,
    columns: usize,
    colors: usize,
    bits_per_component: usize,
}

fn predictor_params(params_obj: Option<&Object>) -> Option<PredictorParams> {
    let dict = match params_obj? {
        Object::Dictionary(d) => d,
        Object::Array(arr) => arr.iter().filter_map(|obj| obj.as_dict()).next()?,
        _ => return None,
    };
    Some(PredictorParams {
        predictor: dict.get("Predictor").and_then(|o| o.as_integer()).unwrap_or(1),
        columns: dict.get("Columns").and_then(|o| o.as_integer()).unwrap_or(1) as usize,
        colors: dict.get("Colors").and_then(|o| o.as_integer()).unwrap_or(1) as usize,
        bits_per_component: dict
            .get("BitsPerComponent")
            .and_then(|o| o.as_integer())
            .unwrap_or(8) as usize,
    })
}

fn inflate(data: &[u8]) -> Result<Vec<u8>> {
    use std::io::Read;
    let mut decoder = flate2::read::ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::Decode(format!("FlateDecode: {}", e)))?;
    Ok(out)
}

/// Undo PNG row predictors (used by xref streams almost universally).
fn apply_png_predictor(data: &[u8], params: &PredictorParams) -> Result<Vec<u8>> {
    let bpp = (params.colors * params.bits_per_component).div_ceil(8).max(1);
    let row_len = (params.columns * params.colors * params.bits_per_component).div_ceil(8);
    let stride = row_len + 1; // one predictor tag byte per row

    if stride == 1 || data.len() % stride != 0 {
        return Err(Error::Decode("predictor row length mismatch".to_string()));
    }

    let mut out = Vec::with_capacity(data.len() / stride * row_len);
    let mut prev_row = vec![0u8; row_len];

    for chunk in data.chunks(stride) {
        let tag = chunk[0];
        let mut row = chunk[1..].to_vec();
        match tag {
            0 => {},
            1 => {
                for i in bpp..row_len {
                    row[i] = row[i].wrapping_add(row[i - bpp]);
                }
            },
            2 => {
                for i in 0..row_len {
                    row[i] = row[i].wrapping_add(prev_row[i]);
                }
            },
            3 => {
                for i in 0..row_len {
                    let left = if i >= bpp { row[i - bpp] as u16 } else { 0 };
                    row[i] = row[i].wrapping_add(((left + prev_row[i] as u16) / 2) as u8);
                }
            },
            4 => {
                for i in 0..row_len {
                    let a = if i >= bpp { row[i - bpp] as i16 } else { 0 };
                    let b = prev_row[i] as i16;
                    let c = if i >= bpp { prev_row[i - bpp] as i16 } else { 0 };
                    let p = a + b - c;
                    let (pa, pb, pc) = ((p - a).abs(), (p - b).abs(), (p - c).abs());
                    let paeth = if pa <= pb && pa <= pc {
                        a
                    } else if pb <= pc {
                        b
                    } else {
                        c
                    };
                    row[i] = row[i].wrapping_add(paeth as u8);
                }
            },
            other => {
                return Err(Error::Decode(format!("unknown PNG predictor tag {}", other)));
            },
        }
        out.extend_from_slice(&row);
        prev_row = row;
    }
    Ok(out)
}

fn decode_ascii_hex(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() / 2);
    let mut nibble: Option<u8> = None;
    for &b in data {
        let value = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'f' => b - b'a' + 10,
            b'A'..=b'F' => b - b'A' + 10,
            b'>' => break,
            b' ' | b'\t' | b'\r' | b'\n' | 0x00 | 0x0C => continue,
            other => {
                return Err(Error::Decode(format!("invalid hex digit 0x{:02x}", other)));
            },
        };
        nibble = match nibble {
            None => Some(value),
            Some(high) => {
                out.push((high << 4) | value);
                None
            },
        };
    }
    // Odd trailing digit acts as if followed by 0 (ISO 32000-1 §7.4.2).
    if let Some(high) = nibble {
        out.push(high << 4);
    }
    Ok(out)
}

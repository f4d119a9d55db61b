//! PDF object serialization.
//!
//! Converts [`Object`] values to their byte representation per
//! ISO 32000-1 §7.3. Output is deterministic: dictionary keys are written
//! in sorted order so object bytes are stable across runs.

use crate::object::{Object, ObjectRef};
use std::collections::HashMap;
use std::io::Write;

/// Serializer for PDF objects.
#[derive(Debug, Clone, Copy, Default)]
pub struct ObjectSerializer;

impl ObjectSerializer {
    /// Create a new object serializer.
    pub fn new() -> Self {
        Self
    }

    /// Serialize a direct object to bytes.
    pub fn serialize(&self, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_object(&mut buf, obj);
        buf
    }

    /// Serialize an indirect object definition:
    /// `{id} {gen} obj\n{object}\nendobj\n`.
    pub fn serialize_indirect(&self, r: ObjectRef, obj: &Object) -> Vec<u8> {
        let mut buf = Vec::new();
        let _ = writeln!(buf, "{} {} obj", r.id, r.gen);
        self.write_object(&mut buf, obj);
        let _ = write!(buf, "\nendobj\n");
        buf
    }

    fn write_object(&self, buf: &mut Vec<u8>, obj: &Object) {
        match obj {
            Object::Null => buf.extend_from_slice(b"null"),
            Object::Boolean(true) => buf.extend_from_slice(b"true"),
            Object::Boolean(false) => buf.extend_from_slice(b"false"),
            Object::Integer(i) => {
                let _ = write!(buf, "{}", i);
            },
            Object::Real(r) => {
                let _ = write!(buf, "{}", format_real(*r));
            },
            Object::String(s) => self.write_literal_string(buf, s),
            Object::Name(n) => self.write_name(buf, n),
            Object::Array(items) => {
                buf.push(b'[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        buf.push(b' ');
                    }
                    self.write_object(buf, item);
                }
                buf.push(b']');
            },
            Object::Dictionary(dict) => self.write_dict(buf, dict),
            Object::Stream { dict, data } => {
                let mut dict = dict.clone();
                dict.insert("Length".to_string(), Object::Integer(data.len() as i64));
                self.write_dict(buf, &dict);
                buf.extend_from_slice(b"\nstream\n");
                buf.extend_from_slice(data);
                buf.extend_from_slice(b"\nendstream");
            },
            Object::Reference(r) => {
                let _ = write!(buf, "{} {} R", r.id, r.gen);
            },
        }
    }

    fn write_dict(&self, buf: &mut Vec<u8>, dict: &HashMap<String, Object>) {
        let mut keys: Vec<&String> = dict.keys().collect();
        keys.sort();
        buf.extend_from_slice(b"<<");
        for key in keys {
            buf.push(b' ');
            self.write_name(buf, key);
            buf.push(b' ');
            self.write_object(buf, &dict[key]);
        }
        buf.extend_from_slice(b" >>");
    }

    fn write_name(&self, buf: &mut Vec<u8>, name: &str) {
        buf.push(b'/');
        for &b in name.as_bytes() {
            let regular = !matches!(
                b,
                b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%' | b'#'
            ) && (0x21..=0x7E).contains(&b);
            if regular {
                buf.push(b);
            } else {
                let _ = write!(buf, "#{:02X}", b);
            }
        }
    }

    fn write_literal_string(&self, buf: &mut Vec<u8>, s: &[u8]) {
        buf.push(b'(');
        for &b in s {
            match b {
                b'(' => buf.extend_from_slice(b"\\("),
                b')' => buf.extend_from_slice(b"\\)"),
                b'\\' => buf.extend_from_slice(b"\\\\"),
                b'\n' => buf.extend_from_slice(b"\\n"),
                b'\r' => buf.extend_from_slice(b"\\r"),
                b'\t' => buf.extend_from_slice(b"\\t"),
                0x20..=0x7E => buf.push(b),
                other => {
                    let _ = write!(buf, "\\{:03o}", other);
                },
            }
        }
        buf.push(b')');
    }
}

/// Format a real number the PDF way: no exponent, no trailing zeros.
fn format_real(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        return format!("{}", value.trunc() as i64);
    }
    let mut s = format!("{:.6}", value);
    while s.ends_with('0') {
        s.pop();
    }
    if s.ends_with('.') {
        s.pop();
    }
    s
}

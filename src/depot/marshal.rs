//! Codec for `p4 -G` records.
//!
//! With `-G` the depot client writes every result record to stdout as a
//! Python marshal dictionary, and reads forms for `-i` commands the same way
//! from stdin.
//!
//! Wire format: all integers are little-endian i32
//! Dict:   '{' (key value)* '0'
//! String: 's' | 'u' | 't' | 'a' | 'A'  len:i32 | bytes
//!         'z' | 'Z'                    len:u8  | bytes
//! Int:    'i' value:i32
//! Const:  'N' (none) | 'T' | 'F'

use crate::depot::{Record, Value};
use crate::error::{DepotError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const TYPE_DICT: u8 = b'{';
const TYPE_NULL: u8 = b'0';
const TYPE_STRING: u8 = b's';
const TYPE_UNICODE: u8 = b'u';
const TYPE_INTERNED: u8 = b't';
const TYPE_ASCII: u8 = b'a';
const TYPE_ASCII_INTERNED: u8 = b'A';
const TYPE_SHORT_ASCII: u8 = b'z';
const TYPE_SHORT_ASCII_INTERNED: u8 = b'Z';
const TYPE_INT: u8 = b'i';
const TYPE_NONE: u8 = b'N';
const TYPE_TRUE: u8 = b'T';
const TYPE_FALSE: u8 = b'F';

/// Python 3 may set this bit on any type byte to register a back-reference.
const FLAG_REF: u8 = 0x80;

/// Guard against garbage length prefixes (64MB).
const MAX_STRING_LEN: usize = 64 * 1024 * 1024;

// =============================================================================
// Encoding
// =============================================================================

/// Encode a record as a marshal dictionary.
pub fn encode_record(record: &Record) -> Bytes {
    let mut buf = BytesMut::with_capacity(64 + record.len() * 32);
    buf.put_u8(TYPE_DICT);
    for (key, value) in record.iter() {
        put_string(&mut buf, key.as_bytes());
        match value {
            Value::Str(s) => put_string(&mut buf, s.as_bytes()),
            Value::Int(i) => {
                // Values outside i32 are sent as text; the depot parses both.
                match i32::try_from(*i) {
                    Ok(v) => {
                        buf.put_u8(TYPE_INT);
                        buf.put_i32_le(v);
                    }
                    Err(_) => put_string(&mut buf, i.to_string().as_bytes()),
                }
            }
        }
    }
    buf.put_u8(TYPE_NULL);
    buf.freeze()
}

fn put_string(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u8(TYPE_STRING);
    buf.put_i32_le(bytes.len() as i32);
    buf.put_slice(bytes);
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode one record from the front of `input`.
///
/// Returns `Ok(None)` when `input` holds only part of a record, otherwise the
/// record and the number of bytes it occupied.
pub fn decode_record(input: &[u8]) -> Result<Option<(Record, usize)>> {
    let mut buf = input;

    if buf.remaining() < 1 {
        return Ok(None);
    }
    let tag = buf.get_u8() & !FLAG_REF;
    if tag != TYPE_DICT {
        return Err(DepotError::Marshal(format!(
            "Expected dict, got type byte 0x{:02x}",
            tag
        )));
    }

    let mut record = Record::new();
    loop {
        if buf.remaining() < 1 {
            return Ok(None);
        }
        if buf[0] == TYPE_NULL {
            buf.advance(1);
            break;
        }

        let key = match decode_value(&mut buf)? {
            Some(Some(Value::Str(k))) => k,
            Some(Some(other)) => {
                return Err(DepotError::Marshal(format!(
                    "Dict key must be a string, got {:?}",
                    other
                )))
            }
            Some(None) => {
                return Err(DepotError::Marshal("Dict key must not be None".to_string()))
            }
            None => return Ok(None),
        };

        match decode_value(&mut buf)? {
            Some(Some(value)) => record.insert(key, value),
            Some(None) => {}
            None => return Ok(None),
        }
    }

    let consumed = input.len() - buf.remaining();
    Ok(Some((record, consumed)))
}

/// Outer `None`: incomplete input. Inner `None`: a marshalled `None`.
fn decode_value(buf: &mut &[u8]) -> Result<Option<Option<Value>>> {
    if buf.remaining() < 1 {
        return Ok(None);
    }
    let tag = buf.get_u8() & !FLAG_REF;
    let value = match tag {
        TYPE_STRING | TYPE_UNICODE | TYPE_INTERNED | TYPE_ASCII | TYPE_ASCII_INTERNED => {
            if buf.remaining() < 4 {
                return Ok(None);
            }
            let len = buf.get_i32_le();
            if len < 0 || len as usize > MAX_STRING_LEN {
                return Err(DepotError::Marshal(format!("Bad string length {}", len)));
            }
            match take_string(buf, len as usize) {
                Some(s) => Value::Str(s),
                None => return Ok(None),
            }
        }
        TYPE_SHORT_ASCII | TYPE_SHORT_ASCII_INTERNED => {
            if buf.remaining() < 1 {
                return Ok(None);
            }
            let len = buf.get_u8() as usize;
            match take_string(buf, len) {
                Some(s) => Value::Str(s),
                None => return Ok(None),
            }
        }
        TYPE_INT => {
            if buf.remaining() < 4 {
                return Ok(None);
            }
            Value::Int(i64::from(buf.get_i32_le()))
        }
        TYPE_TRUE => Value::Int(1),
        TYPE_FALSE => Value::Int(0),
        TYPE_NONE => return Ok(Some(None)),
        other => {
            return Err(DepotError::Marshal(format!(
                "Unsupported type byte 0x{:02x}",
                other
            )))
        }
    };
    Ok(Some(Some(value)))
}

fn take_string(buf: &mut &[u8], len: usize) -> Option<String> {
    if buf.remaining() < len {
        return None;
    }
    let s = String::from_utf8_lossy(&buf[..len]).into_owned();
    buf.advance(len);
    Some(s)
}

/// Incremental decoder over a byte stream.
#[derive(Debug, Default)]
pub struct RecordDecoder {
    buf: BytesMut,
}

impl RecordDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete record, if one is buffered.
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        match decode_record(&self.buf)? {
            Some((record, used)) => {
                self.buf.advance(used);
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Bytes still buffered. Non-zero at end of stream means truncated output.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python_sync_record() -> Vec<u8> {
        // marshal.dumps({b'code': b'stat', b'rev': b'3'}) as written by p4 -G
        let mut v = vec![b'{'];
        for (k, val) in [("code", "stat"), ("rev", "3")] {
            v.push(b's');
            v.extend_from_slice(&(k.len() as i32).to_le_bytes());
            v.extend_from_slice(k.as_bytes());
            v.push(b's');
            v.extend_from_slice(&(val.len() as i32).to_le_bytes());
            v.extend_from_slice(val.as_bytes());
        }
        v.push(b'0');
        v
    }

    #[test]
    fn test_decode_python_dict() {
        let bytes = python_sync_record();
        let (record, used) = decode_record(&bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(record.get_str("code"), Some("stat"));
        assert_eq!(record.get_str("rev"), Some("3"));
    }

    #[test]
    fn test_decode_partial_returns_none() {
        let bytes = python_sync_record();
        for cut in 0..bytes.len() {
            assert!(decode_record(&bytes[..cut]).unwrap().is_none(), "cut {}", cut);
        }
    }

    #[test]
    fn test_decode_ints_and_flags() {
        let mut v = vec![b'{', b'z', 8];
        v.extend_from_slice(b"severity");
        v.push(b'i');
        v.extend_from_slice(&3i32.to_le_bytes());
        v.push(b's' | FLAG_REF);
        v.extend_from_slice(&4i32.to_le_bytes());
        v.extend_from_slice(b"flag");
        v.push(b'T');
        v.push(b'0');

        let (record, _) = decode_record(&v).unwrap().unwrap();
        assert_eq!(record.get_int("severity"), Some(3));
        assert_eq!(record.get_int("flag"), Some(1));
    }

    #[test]
    fn test_decode_rejects_non_dict() {
        assert!(decode_record(b"s\x01\x00\x00\x00x").is_err());
    }

    #[test]
    fn test_encode_form_decodes_back() {
        let record = Record::new()
            .with("Client", "build-ws")
            .with("View0", "//depot/... //build-ws/...")
            .with("Change", 12);
        let bytes = encode_record(&record);
        let (decoded, used) = decode_record(&bytes).unwrap().unwrap();
        assert_eq!(used, bytes.len());
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_stream_decoder_across_chunks() {
        let one = python_sync_record();
        let mut stream = one.clone();
        stream.extend_from_slice(&one);

        let mut decoder = RecordDecoder::new();
        let mut records = Vec::new();
        for chunk in stream.chunks(5) {
            decoder.feed(chunk);
            while let Some(r) = decoder.next_record().unwrap() {
                records.push(r);
            }
        }
        assert_eq!(records.len(), 2);
        assert_eq!(decoder.pending(), 0);
    }
}

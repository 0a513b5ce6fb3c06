// Binary persistence format for a `Table`.
//
// A file is a 16-byte header followed by one record per live entry:
//
//   header: magic u32 | version u32 | entry_count u32 | reserved u32
//   record: key i32 | value_len u32 | value bytes (value_len, UTF-8)
//
// All integers are little-endian and there is no padding. Records appear in
// the table's slot order.

use std::io::{Read, Write};

use crate::{
    error::{Error, Result},
    table::{Table, RESERVED_KEY},
};

pub const MAGIC: u32 = 0x4B56_5301;
pub const VERSION: u32 = 1;
pub const HEADER_LEN: usize = 16;

/// Longest value a record may declare. Anything larger is treated as a sign
/// of corruption rather than read.
pub const MAX_VALUE_LEN: usize = 100_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u32,
    pub version: u32,
    pub entry_count: u32,
    pub reserved: u32,
}

impl Header {
    pub fn new(entry_count: u32) -> Self {
        Header {
            magic: MAGIC,
            version: VERSION,
            entry_count,
            reserved: 0,
        }
    }

    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0_u8; HEADER_LEN];
        buf[0..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..8].copy_from_slice(&self.version.to_le_bytes());
        buf[8..12].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[12..16].copy_from_slice(&self.reserved.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Self {
        let word = |i: usize| u32::from_le_bytes([buf[i], buf[i + 1], buf[i + 2], buf[i + 3]]);
        Header {
            magic: word(0),
            version: word(4),
            entry_count: word(8),
            reserved: word(12),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(Error::Corruption(format!(
                "bad magic number {:#010x}, expected {:#010x}",
                self.magic, MAGIC
            )));
        }
        if self.version != VERSION {
            return Err(Error::Corruption(format!(
                "unsupported format version {}, expected {}",
                self.version, VERSION
            )));
        }
        Ok(())
    }
}

struct Reader<R: Read> {
    r: R,
}

impl<R: Read> Reader<R> {
    fn new(r: R) -> Self {
        Reader { r }
    }

    fn read_header(&mut self) -> Result<Header> {
        let mut buf = [0_u8; HEADER_LEN];
        self.r.read_exact(&mut buf)?;
        Ok(Header::decode(&buf))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0_u8; 4];
        self.r.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0_u8; 4];
        self.r.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_entry(&mut self) -> Result<(i32, String)> {
        let key = self.read_i32()?;
        if key == RESERVED_KEY {
            return Err(Error::Corruption(format!("record uses reserved key {}", key)));
        }
        let len = self.read_u32()? as usize;
        if len > MAX_VALUE_LEN {
            return Err(Error::Corruption(format!(
                "value for key {} claims {} bytes, limit is {}",
                key, len, MAX_VALUE_LEN
            )));
        }

        let mut buf = Vec::new();
        buf.try_reserve_exact(len)?;
        buf.resize(len, 0);
        self.r.read_exact(&mut buf)?;

        let value = String::from_utf8(buf)
            .map_err(|e| Error::Corruption(format!("value for key {} is not UTF-8: {}", key, e)))?;
        Ok((key, value))
    }
}

/// Writes every live entry of `table` to `w`. Returns the number of bytes
/// written.
pub fn serialize<W: Write>(table: &Table, mut w: W) -> Result<usize> {
    let entry_count = u32::try_from(table.len()).map_err(|_| {
        Error::InvalidParameter(format!("{} entries do not fit in one file", table.len()))
    })?;

    w.write_all(&Header::new(entry_count).encode())?;
    let mut written = HEADER_LEN;

    for (key, value) in table {
        // The reader would reject this record, so refuse to produce it.
        if value.len() > MAX_VALUE_LEN {
            return Err(Error::InvalidParameter(format!(
                "value for key {} is {} bytes, limit is {}",
                key,
                value.len(),
                MAX_VALUE_LEN
            )));
        }
        w.write_all(&key.to_le_bytes())?;
        w.write_all(&(value.len() as u32).to_le_bytes())?;
        w.write_all(value.as_bytes())?;
        written += 8 + value.len();
    }

    w.flush()?;
    Ok(written)
}

pub fn to_bytes(table: &Table) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    serialize(table, &mut buf)?;
    Ok(buf)
}

/// Reads and validates a complete stream, returning its records in file
/// order. Bytes after the last declared record are ignored.
pub fn decode<R: Read>(r: R) -> Result<Vec<(i32, String)>> {
    let mut reader = Reader::new(r);
    let header = reader.read_header()?;
    header.validate()?;

    // Not sized from the header: entry_count is untrusted until every record
    // has been read.
    let mut entries = Vec::new();
    for _ in 0..header.entry_count {
        let entry = reader.read_entry()?;
        entries.try_reserve(1)?;
        entries.push(entry);
    }
    Ok(entries)
}

/// Loads a stream into `table`, merging with whatever it already holds:
/// keys present in both end up with the value from the stream.
///
/// The whole stream is validated before the table is touched, so a corrupt or
/// truncated stream leaves it unchanged. Returns the number of records loaded.
pub fn deserialize<R: Read>(r: R, table: &mut Table) -> Result<usize> {
    let entries = decode(r)?;
    for (key, value) in &entries {
        table.set(*key, value)?;
    }
    Ok(entries.len())
}

#[cfg(test)]
mod test {
    use std::io::{self, Write};

    use crate::{
        error::{Error, ErrorKind},
        table::{Table, RESERVED_KEY},
    };

    use super::{decode, deserialize, serialize, to_bytes, Header, HEADER_LEN, MAGIC, VERSION};

    fn sample() -> Table {
        let mut table = Table::new();
        table.set(100, "one hundred").unwrap();
        table.set(200, "two hundred").unwrap();
        table.set(300, "three hundred").unwrap();
        table
    }

    fn record(key: i32, declared_len: u32, value: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(key.to_le_bytes());
        out.extend(declared_len.to_le_bytes());
        out.extend(value);
        out
    }

    #[test]
    fn test_round_trip() {
        let bytes = to_bytes(&sample()).unwrap();

        let mut loaded = Table::new();
        assert_eq!(deserialize(bytes.as_slice(), &mut loaded).unwrap(), 3);
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.get(100).unwrap(), Some("one hundred"));
        assert_eq!(loaded.get(200).unwrap(), Some("two hundred"));
        assert_eq!(loaded.get(300).unwrap(), Some("three hundred"));
    }

    #[test]
    fn test_layout() {
        let mut table = Table::new();
        table.set(-2, "hi").unwrap();

        let mut bytes = Vec::new();
        let written = serialize(&table, &mut bytes).unwrap();

        let expected = vec![
            0x01, 0x53, 0x56, 0x4b, // magic
            1, 0, 0, 0, // version
            1, 0, 0, 0, // entry_count
            0, 0, 0, 0, // reserved
            0xfe, 0xff, 0xff, 0xff, // key
            2, 0, 0, 0, // value_len
            b'h', b'i',
        ];
        assert_eq!(bytes, expected);
        assert_eq!(written, expected.len());
    }

    #[test]
    fn test_empty_table() {
        let bytes = to_bytes(&Table::new()).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(
            Header::decode(bytes[..].try_into().unwrap()),
            Header::new(0)
        );

        let mut loaded = Table::new();
        assert_eq!(deserialize(bytes.as_slice(), &mut loaded).unwrap(), 0);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = to_bytes(&sample()).unwrap();
        bytes[0] ^= 0xff;
        let mut loaded = Table::new();
        let err = deserialize(bytes.as_slice(), &mut loaded).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corruption);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_bad_version() {
        let mut bytes = Header {
            magic: MAGIC,
            version: VERSION + 1,
            entry_count: 0,
            reserved: 0,
        }
        .encode()
        .to_vec();
        bytes.extend(record(1, 1, b"x"));
        let err = decode(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, Error::Corruption(_)));
    }

    #[test]
    fn test_oversized_value_rejected() {
        let mut bytes = Header::new(3).encode().to_vec();
        bytes.extend(record(1, 3, b"one"));
        bytes.extend(record(2, 200_000, b"two"));
        bytes.extend(record(3, 5, b"three"));

        let mut loaded = Table::new();
        loaded.set(9, "nine").unwrap();
        let err = deserialize(bytes.as_slice(), &mut loaded).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corruption);

        // Nothing from the stream was applied.
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.get(1).unwrap(), None);
        assert_eq!(loaded.get(3).unwrap(), None);
    }

    #[test]
    fn test_truncated() {
        let bytes = to_bytes(&sample()).unwrap();
        for cut in [3, HEADER_LEN, HEADER_LEN + 6, bytes.len() - 1] {
            let mut loaded = Table::new();
            let err = deserialize(&bytes[..cut], &mut loaded).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::FileIo, "cut at {}", cut);
            assert!(loaded.is_empty());
        }
    }

    #[test]
    fn test_reserved_key_record() {
        let mut bytes = Header::new(2).encode().to_vec();
        bytes.extend(record(1, 3, b"one"));
        bytes.extend(record(RESERVED_KEY, 3, b"bad"));

        let mut loaded = Table::new();
        let err = deserialize(bytes.as_slice(), &mut loaded).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corruption);
        assert!(loaded.is_empty());
    }

    #[test]
    fn test_invalid_utf8() {
        let mut bytes = Header::new(1).encode().to_vec();
        bytes.extend(record(1, 2, &[0xc3, 0x28]));
        assert!(matches!(decode(bytes.as_slice()), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let mut bytes = to_bytes(&sample()).unwrap();
        bytes.extend([0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(decode(bytes.as_slice()).unwrap().len(), 3);
    }

    #[test]
    fn test_merge_into_existing() {
        let mut loaded = Table::new();
        loaded.set(100, "stale").unwrap();
        loaded.set(400, "four hundred").unwrap();

        let bytes = to_bytes(&sample()).unwrap();
        deserialize(bytes.as_slice(), &mut loaded).unwrap();

        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.get(100).unwrap(), Some("one hundred"));
        assert_eq!(loaded.get(400).unwrap(), Some("four hundred"));
    }

    #[test]
    fn test_load_grows_small_table() {
        let mut table = Table::new();
        for k in 0..300 {
            table.set(k, &"x".repeat(k as usize)).unwrap();
        }
        let bytes = to_bytes(&table).unwrap();

        let mut loaded = Table::with_capacity(1);
        assert_eq!(deserialize(bytes.as_slice(), &mut loaded).unwrap(), 300);
        for k in 0..300 {
            assert_eq!(loaded.get(k).unwrap().map(str::len), Some(k as usize));
        }
    }

    #[test]
    fn test_serialize_rejects_oversized_value() {
        let mut table = Table::new();
        table.set(1, &"x".repeat(100_001)).unwrap();
        assert!(matches!(to_bytes(&table), Err(Error::InvalidParameter(_))));
    }

    struct FailingWriter {
        budget: usize,
    }

    impl Write for FailingWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let n = buf.len().min(self.budget);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_failure() {
        let err = serialize(&sample(), FailingWriter { budget: 20 }).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileIo);
    }
}

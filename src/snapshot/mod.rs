use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use thiserror::Error;

use crate::storage::keyspace::Keyspace;

const MAGIC: &[u8; 5] = b"REDIS";

const OPCODE_AUX: u8 = 0xFA;
const OPCODE_RESIZE_DB: u8 = 0xFB;
const OPCODE_EXPIRE_MS: u8 = 0xFC;
const OPCODE_EXPIRE_SECS: u8 = 0xFD;
const OPCODE_SELECT_DB: u8 = 0xFE;
const OPCODE_EOF: u8 = 0xFF;
const TYPE_STRING: u8 = 0x00;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot read failed: {0}")]
    Io(#[from] io::Error),
    #[error("not a dump file: bad magic bytes")]
    BadMagic,
    #[error("corrupt dump file: {0}")]
    Corrupt(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub expires_at: Option<SystemTime>,
}

enum Length {
    Plain(usize),
    IntegerEncoding(u8),
}

/// Streaming decoder for the dump-file format: `REDIS` magic and a 4-byte
/// version, then opcode-tagged sections until the EOF marker. Yields one
/// `Record` per stored key.
#[derive(Debug)]
pub struct SnapshotReader<R> {
    reader: R,
    finished: bool,
}

impl SnapshotReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, SnapshotError> {
        Self::new(BufReader::new(File::open(path)?))
    }
}

impl<R: Read> SnapshotReader<R> {
    pub fn new(mut reader: R) -> Result<Self, SnapshotError> {
        let mut magic = [0u8; 5];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(SnapshotError::BadMagic);
        }
        let mut version = [0u8; 4];
        reader.read_exact(&mut version)?;
        Ok(Self {
            reader,
            finished: false,
        })
    }

    pub fn next_record(&mut self) -> Result<Option<Record>, SnapshotError> {
        if self.finished {
            return Ok(None);
        }
        loop {
            let opcode = self.reader.read_u8()?;
            match opcode {
                OPCODE_AUX => {
                    self.read_string()?;
                    self.read_string()?;
                }
                OPCODE_SELECT_DB => {
                    self.read_length()?;
                }
                OPCODE_RESIZE_DB => {
                    self.read_length()?;
                    self.read_length()?;
                }
                OPCODE_EXPIRE_SECS => {
                    let secs = self.reader.read_u32::<LittleEndian>()?;
                    let expires_at = UNIX_EPOCH + Duration::from_secs(secs.into());
                    return self.read_typed_entry(Some(expires_at)).map(Some);
                }
                OPCODE_EXPIRE_MS => {
                    let millis = self.reader.read_u64::<LittleEndian>()?;
                    let expires_at = UNIX_EPOCH + Duration::from_millis(millis);
                    return self.read_typed_entry(Some(expires_at)).map(Some);
                }
                TYPE_STRING => return self.read_entry(None).map(Some),
                OPCODE_EOF => {
                    // 8-byte CRC trailer; older dumps may omit it
                    let mut trailer = [0u8; 8];
                    let _ = self.reader.read_exact(&mut trailer);
                    self.finished = true;
                    return Ok(None);
                }
                _ => return Err(SnapshotError::Corrupt("unsupported opcode")),
            }
        }
    }

    fn read_typed_entry(&mut self, expires_at: Option<SystemTime>) -> Result<Record, SnapshotError> {
        let value_type = self.reader.read_u8()?;
        if value_type != TYPE_STRING {
            return Err(SnapshotError::Corrupt("unsupported value type"));
        }
        self.read_entry(expires_at)
    }

    fn read_entry(&mut self, expires_at: Option<SystemTime>) -> Result<Record, SnapshotError> {
        let key = self.read_string()?;
        let value = self.read_string()?;
        Ok(Record {
            key,
            value,
            expires_at,
        })
    }

    fn read_length_or_encoding(&mut self) -> Result<Length, SnapshotError> {
        let first = self.reader.read_u8()?;
        match first >> 6 {
            0b00 => Ok(Length::Plain((first & 0x3F) as usize)),
            0b01 => {
                let second = self.reader.read_u8()?;
                Ok(Length::Plain(
                    (((first & 0x3F) as usize) << 8) | second as usize,
                ))
            }
            0b10 => Ok(Length::Plain(self.reader.read_u32::<BigEndian>()? as usize)),
            _ => Ok(Length::IntegerEncoding(first & 0x3F)),
        }
    }

    fn read_length(&mut self) -> Result<usize, SnapshotError> {
        match self.read_length_or_encoding()? {
            Length::Plain(len) => Ok(len),
            Length::IntegerEncoding(_) => {
                Err(SnapshotError::Corrupt("unexpected integer encoding"))
            }
        }
    }

    fn read_string(&mut self) -> Result<Vec<u8>, SnapshotError> {
        match self.read_length_or_encoding()? {
            Length::Plain(len) => {
                let mut data = vec![0u8; len];
                self.reader.read_exact(&mut data)?;
                Ok(data)
            }
            Length::IntegerEncoding(0) => Ok(self.reader.read_u8()?.to_string().into_bytes()),
            Length::IntegerEncoding(1) => Ok(self
                .reader
                .read_u16::<LittleEndian>()?
                .to_string()
                .into_bytes()),
            Length::IntegerEncoding(2) => Ok(self
                .reader
                .read_u32::<LittleEndian>()?
                .to_string()
                .into_bytes()),
            Length::IntegerEncoding(_) => {
                Err(SnapshotError::Corrupt("unsupported string encoding"))
            }
        }
    }
}

impl<R: Read> Iterator for SnapshotReader<R> {
    type Item = Result<Record, SnapshotError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Installs every record into the keyspace; returns how many were read.
pub fn load_records<R: Read>(
    reader: SnapshotReader<R>,
    keyspace: &Keyspace,
) -> Result<usize, SnapshotError> {
    let mut installed = 0;
    for record in reader {
        let record = record?;
        keyspace.set_at(&record.key, &record.value, record.expires_at);
        installed += 1;
    }
    Ok(installed)
}

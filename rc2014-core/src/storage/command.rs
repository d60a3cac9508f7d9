//! Storage command line parser.
//!
//! ```text
//!   ~0:I            card info
//!   ~0:PL=path      list directory
//!   ~0:PM=path      make directory
//!   ~0:PR=path      remove file or directory
//!   ~0:FR=file      stream a file back
//!   ~0:FW=file      open a file for writing
//!   ~0:FS=data      data for the open file
//!   ~0:FC           close the open file
//!   ~0:SR=D,T,S     read a sector
//!   ~0:SW=D,T,S     write a sector
//!   ~0:SS=data      sector data
//!   ~0:SC           close sector access
//! ```

/// Response lines sent back to the host.
pub mod response {
    /// Malformed line prefix.
    pub const BAD_PREFIX: &str = "-0:E3=No.\n";
    /// Unknown command, or a path operation that failed.
    pub const BAD_COMMAND: &str = "-0:E6=No.\n";
    /// Operation the emulated card does not support.
    pub const UNAVAILABLE: &str = "-0:E7=Unavailable.\n";
    /// File could not be opened.
    pub const NOT_FOUND: &str = "-0:E9=Not Found.\n";
    /// Card information.
    pub const INFO: [&str; 3] = ["-0:N1=Card OK\n", "-0:Nt=EMU64\n", "-0:Ns=128,meg\n"];
}

/// The only device id answered by the emulated card.
pub const DEVICE_ID: u8 = b'0';

/// Command category (fourth byte of the line).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Info,
    Path,
    File,
    Sector,
}

impl TryFrom<u8> for Category {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'I' => Ok(Self::Info),
            b'P' => Ok(Self::Path),
            b'F' => Ok(Self::File),
            b'S' => Ok(Self::Sector),
            _ => Err(value),
        }
    }
}

/// Sector operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorOp {
    Read,
    Write,
    Send,
    Close,
}

/// Decoded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Info,
    ListDir,
    MakeDir,
    Remove,
    FileRead,
    FileWrite,
    FileSend,
    FileClose,
    Sector(SectorOp),
}

impl Operation {
    fn decode(category: Category, op: Option<u8>) -> Result<Self, ProtocolError> {
        use Operation::*;

        let unknown = || ProtocolError::UnknownOperation(category, op.unwrap_or(0));
        let Some(op) = op else {
            return match category {
                Category::Info => Ok(Info),
                _ => Err(unknown()),
            };
        };

        match (category, op) {
            (Category::Info, _) => Ok(Info),
            (Category::Path, b'L') => Ok(ListDir),
            (Category::Path, b'M') => Ok(MakeDir),
            (Category::Path, b'R') => Ok(Remove),
            (Category::File, b'R') => Ok(FileRead),
            (Category::File, b'W') => Ok(FileWrite),
            (Category::File, b'S') => Ok(FileSend),
            (Category::File, b'C') => Ok(FileClose),
            (Category::Sector, b'R') => Ok(Sector(SectorOp::Read)),
            (Category::Sector, b'W') => Ok(Sector(SectorOp::Write)),
            (Category::Sector, b'S') => Ok(Sector(SectorOp::Send)),
            (Category::Sector, b'C') => Ok(Sector(SectorOp::Close)),
            _ => Err(unknown()),
        }
    }
}

/// Parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageCommand<'a> {
    pub device: u8,
    pub category: Category,
    pub operation: Operation,
    pub args: &'a [u8],
}

impl StorageCommand<'_> {
    /// Arguments as text.
    pub fn args_str(&self) -> String {
        String::from_utf8_lossy(self.args).into_owned()
    }
}

/// Reasons a line is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Not `~0:`, or junk where `=` belongs.
    Malformed,
    UnknownCategory(u8),
    UnknownOperation(Category, u8),
}

impl ProtocolError {
    /// Response line reported to the host.
    pub fn response(&self) -> &'static str {
        match self {
            ProtocolError::Malformed => response::BAD_PREFIX,
            ProtocolError::UnknownCategory(_) | ProtocolError::UnknownOperation(..) => {
                response::BAD_COMMAND
            }
        }
    }

    /// Numeric error code, as in the response line.
    pub fn code(&self) -> u8 {
        match self {
            ProtocolError::Malformed => 3,
            _ => 6,
        }
    }
}

/// Parse a non-empty command line.
pub fn parse(line: &[u8]) -> Result<StorageCommand<'_>, ProtocolError> {
    let line = line.trim_ascii();

    match line {
        [b'~', DEVICE_ID, b':', ..] => {}
        _ => return Err(ProtocolError::Malformed),
    }

    let category = match line.get(3) {
        Some(&c) => Category::try_from(c).map_err(ProtocolError::UnknownCategory)?,
        None => return Err(ProtocolError::UnknownCategory(0)),
    };
    let operation = Operation::decode(category, line.get(4).copied())?;

    let args = match line.get(5) {
        None => &[][..],
        Some(b'=') => &line[6..],
        Some(_) if category == Category::Info => &[][..],
        Some(_) => return Err(ProtocolError::Malformed),
    };

    Ok(StorageCommand {
        device: line[1],
        category,
        operation,
        args,
    })
}

use byteorder::{ByteOrder, BE, LE};
use tokio::io::{self, AsyncRead, AsyncReadExt};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ElfClass {
    Class32 = 1,
    Class64 = 2,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum ElfByteOrder {
    Lsb = 1,
    Msb = 2,
}

/// The identification block and object type of an ELF file.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ElfHeader {
    pub class: ElfClass,
    pub byte_order: ElfByteOrder,
    object_type: u16,
    pub machine: u16,
}

impl ElfHeader {
    const ELFCLASS32: u8 = 1;
    const ELFCLASS64: u8 = 2;

    const ELFDATA2LSB: u8 = 1;
    const ELFDATA2MSB: u8 = 2;

    const ET_EXEC: u16 = 2;
    const ET_DYN: u16 = 3;

    const IDENT_LEN: usize = 16;

    pub fn is_shared_object(&self) -> bool {
        self.object_type == ElfHeader::ET_DYN
    }

    pub fn is_executable(&self) -> bool {
        self.object_type == ElfHeader::ET_EXEC
    }

    /// Returns `Ok(None)` for anything that is not a well-formed ELF identification.
    pub async fn parse<R: AsyncRead + Unpin>(input: &mut R) -> io::Result<Option<Self>> {
        let mut header = [0u8; Self::IDENT_LEN + 4];
        let mut filled = 0;

        while filled < header.len() {
            let n = input.read(&mut header[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        Ok(Self::from_bytes(&header[..filled]))
    }

    pub fn from_bytes(header: &[u8]) -> Option<Self> {
        if header.len() < Self::IDENT_LEN + 4 || &header[..4] != b"\x7FELF" {
            return None;
        }

        let class = match header[4] {
            Self::ELFCLASS32 => ElfClass::Class32,
            Self::ELFCLASS64 => ElfClass::Class64,
            _ => return None,
        };

        let byte_order = match header[5] {
            Self::ELFDATA2LSB => ElfByteOrder::Lsb,
            Self::ELFDATA2MSB => ElfByteOrder::Msb,
            _ => return None,
        };

        let rest = &header[Self::IDENT_LEN..];
        let (object_type, machine) = match byte_order {
            ElfByteOrder::Lsb => (LE::read_u16(&rest[..2]), LE::read_u16(&rest[2..4])),
            ElfByteOrder::Msb => (BE::read_u16(&rest[..2]), BE::read_u16(&rest[2..4])),
        };

        Some(ElfHeader {
            class,
            byte_order,
            object_type,
            machine,
        })
    }
}

use std::io::{self, Read};
use std::ops::Range;

use crate::shared::error::{MediaError, MediaResult};

const HEADER_LEN: usize = 6;
const SCREEN_DESCRIPTOR_LEN: usize = 7;
const IMAGE_DESCRIPTOR_LEN: usize = 9;
const EXTENSION_INTRODUCER: u8 = 0x21;
const IMAGE_SEPARATOR: u8 = 0x2C;
const TRAILER: u8 = 0x3B;
const APPLICATION_LABEL: u8 = 0xFF;
const COLOR_TABLE_FLAG: u8 = 0x80;

/// Where the loop-count patch has to touch a GIF.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GifLayout {
    /// Offset just past the logical screen descriptor and global colour
    /// table, where a new application extension belongs.
    pub insertion_point: u64,
    /// Byte ranges of every application extension block.
    pub application_extensions: Vec<Range<u64>>,
    pub image_count: usize,
    /// False when the stream ended at a block boundary without `0x3B`.
    pub has_trailer: bool,
    /// Header version, `87a` or `89a`.
    pub version: [u8; 3],
}

impl GifLayout {
    /// GIF87a predates extension blocks.
    pub fn supports_extensions(&self) -> bool {
        &self.version != b"87a"
    }
}

/// Walks the block structure of a GIF without decoding any pixels.
pub fn scan_layout<R: Read>(reader: R) -> MediaResult<GifLayout> {
    let mut scanner = Scanner {
        inner: reader,
        offset: 0,
    };

    let mut header = [0u8; HEADER_LEN];
    scanner.read_exact(&mut header, "stream ended before the GIF header")?;
    if &header != b"GIF87a" && &header != b"GIF89a" {
        return Err(MediaError::NotAGif(format!("bad magic {header:02x?}")));
    }

    let mut screen = [0u8; SCREEN_DESCRIPTOR_LEN];
    scanner.read_exact(&mut screen, "truncated logical screen descriptor")?;
    scanner.skip(color_table_len(screen[4]), "truncated global colour table")?;

    let mut layout = GifLayout {
        insertion_point: scanner.offset,
        version: [header[3], header[4], header[5]],
        ..GifLayout::default()
    };

    loop {
        let start = scanner.offset;
        let Some(introducer) = scanner.next_byte()? else {
            log::debug!("GIF ends without a trailer after {} bytes", scanner.offset);
            return Ok(layout);
        };
        match introducer {
            EXTENSION_INTRODUCER => {
                let label = scanner.byte("truncated extension label")?;
                scanner.skip_sub_blocks()?;
                if label == APPLICATION_LABEL {
                    layout.application_extensions.push(start..scanner.offset);
                }
            }
            IMAGE_SEPARATOR => {
                let mut descriptor = [0u8; IMAGE_DESCRIPTOR_LEN];
                scanner.read_exact(&mut descriptor, "truncated image descriptor")?;
                scanner.skip(color_table_len(descriptor[8]), "truncated local colour table")?;
                scanner.byte("missing LZW code size")?;
                scanner.skip_sub_blocks()?;
                layout.image_count += 1;
            }
            TRAILER => {
                layout.has_trailer = true;
                return Ok(layout);
            }
            other => {
                return Err(MediaError::NotAGif(format!(
                    "unknown block introducer 0x{other:02x} at offset {start}"
                )))
            }
        }
    }
}

fn color_table_len(flags: u8) -> u64 {
    if flags & COLOR_TABLE_FLAG == 0 {
        0
    } else {
        3 * (1u64 << ((flags & 0x07) + 1))
    }
}

/// A reader that knows how far it has read.
struct Scanner<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> Scanner<R> {
    fn next_byte(&mut self) -> MediaResult<Option<u8>> {
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(None),
                Ok(_) => {
                    self.offset += 1;
                    return Ok(Some(byte[0]));
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn byte(&mut self, context: &str) -> MediaResult<u8> {
        self.next_byte()?
            .ok_or_else(|| MediaError::NotAGif(format!("{context} at offset {}", self.offset)))
    }

    fn read_exact(&mut self, buf: &mut [u8], context: &str) -> MediaResult<()> {
        match self.inner.read_exact(buf) {
            Ok(()) => {
                self.offset += buf.len() as u64;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(MediaError::NotAGif(format!("{context} at offset {}", self.offset)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn skip(&mut self, len: u64, context: &str) -> MediaResult<()> {
        let skipped = io::copy(&mut (&mut self.inner).take(len), &mut io::sink())?;
        self.offset += skipped;
        if skipped < len {
            return Err(MediaError::NotAGif(format!("{context} at offset {}", self.offset)));
        }
        Ok(())
    }

    /// Skips length-prefixed data sub-blocks up to and including the
    /// zero-length terminator.
    fn skip_sub_blocks(&mut self) -> MediaResult<()> {
        loop {
            let len = self.byte("unterminated data sub-blocks")?;
            if len == 0 {
                return Ok(());
            }
            self.skip(u64::from(len), "truncated data sub-block")?;
        }
    }
}

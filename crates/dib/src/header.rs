use std::io::{self, Write};

use bytemuck::{Pod, Zeroable};

/// Natural size of `BITMAPINFOHEADER`.
pub const INFO_HEADER_SIZE: u32 = 40;

/// Size of the `BITMAPFILEHEADER` preamble.
pub const FILE_HEADER_SIZE: u32 = 14;

/// Size of one palette entry.
pub const RGB_QUAD_SIZE: u32 = 4;

/// File magic marker ("BM").
pub const BITMAP_MAGIC: [u8; 2] = *b"BM";

/// `BITMAPINFOHEADER` fields.
///
/// A positive `height` describes a bottom-up bitmap, which is what capture
/// devices deliver for uncompressed RGB. A negative `height` marks top-down
/// rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapInfoHeader {
    pub size: u32,
    pub width: i32,
    pub height: i32,
    pub planes: u16,
    pub bit_count: u16,
    pub compression: u32,
    pub size_image: u32,
    pub x_pels_per_meter: i32,
    pub y_pels_per_meter: i32,
    pub colors_used: u32,
    pub colors_important: u32,
}

impl BitmapInfoHeader {
    /// Uncompressed header for a `width` x `height` frame at `bit_count` bits
    /// per pixel, with a single plane and no palette.
    pub fn new(width: u32, height: u32, bit_count: u16) -> Self {
        let mut header = Self {
            size: INFO_HEADER_SIZE,
            width: width as i32,
            height: height as i32,
            planes: 1,
            bit_count,
            compression: 0,
            size_image: 0,
            x_pels_per_meter: 0,
            y_pels_per_meter: 0,
            colors_used: 0,
            colors_important: 0,
        };
        let padded = header.stride() * height as usize;
        header.size_image = u32::try_from(padded).unwrap_or(0);
        header
    }

    /// The same header describing rows stored top-to-bottom.
    pub fn top_down(mut self) -> Self {
        self.height = -self.height.abs();
        self
    }

    pub fn is_top_down(&self) -> bool {
        self.height < 0
    }

    /// Bytes per pixel row, padded to a 4-byte boundary as DIB rows are.
    pub fn stride(&self) -> usize {
        let bits = self.width.unsigned_abs() as usize * usize::from(self.bit_count);
        bits.div_ceil(32) * 4
    }

    /// Unpadded pixel payload: `width * height * bit_count / 8`.
    pub fn pixel_bytes(&self) -> usize {
        self.width.unsigned_abs() as usize
            * self.height.unsigned_abs() as usize
            * usize::from(self.bit_count)
            / 8
    }

    /// Serialise the 40-byte record.
    pub fn to_le_bytes(&self) -> [u8; INFO_HEADER_SIZE as usize] {
        let mut out = [0u8; INFO_HEADER_SIZE as usize];
        out[0..4].copy_from_slice(&self.size.to_le_bytes());
        out[4..8].copy_from_slice(&self.width.to_le_bytes());
        out[8..12].copy_from_slice(&self.height.to_le_bytes());
        out[12..14].copy_from_slice(&self.planes.to_le_bytes());
        out[14..16].copy_from_slice(&self.bit_count.to_le_bytes());
        out[16..20].copy_from_slice(&self.compression.to_le_bytes());
        out[20..24].copy_from_slice(&self.size_image.to_le_bytes());
        out[24..28].copy_from_slice(&self.x_pels_per_meter.to_le_bytes());
        out[28..32].copy_from_slice(&self.y_pels_per_meter.to_le_bytes());
        out[32..36].copy_from_slice(&self.colors_used.to_le_bytes());
        out[36..40].copy_from_slice(&self.colors_important.to_le_bytes());
        out
    }

    /// Parse a record previously produced by [`Self::to_le_bytes`].
    pub fn from_le_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < INFO_HEADER_SIZE as usize {
            return None;
        }
        let u32_at = |at: usize| {
            u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        Some(Self {
            size: u32_at(0),
            width: u32_at(4) as i32,
            height: u32_at(8) as i32,
            planes: u16_at(12),
            bit_count: u16_at(14),
            compression: u32_at(16),
            size_image: u32_at(20),
            x_pels_per_meter: u32_at(24) as i32,
            y_pels_per_meter: u32_at(28) as i32,
            colors_used: u32_at(32),
            colors_important: u32_at(36),
        })
    }
}

/// One palette entry, stored blue-green-red-reserved.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct RgbQuad {
    pub blue: u8,
    pub green: u8,
    pub red: u8,
    pub reserved: u8,
}

/// Header size including palette: the declared `size` when non-zero, else
/// the natural record size, plus `colors_used` palette entries.
pub fn size_of(header: &BitmapInfoHeader) -> usize {
    let base = if header.size != 0 {
        header.size
    } else {
        INFO_HEADER_SIZE
    };
    base as usize + header.colors_used as usize * RGB_QUAD_SIZE as usize
}

/// Header record together with its palette.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitmapInfo {
    header: BitmapInfoHeader,
    palette: Vec<RgbQuad>,
}

impl BitmapInfo {
    /// Header without palette entries.
    pub fn new(header: BitmapInfoHeader) -> Self {
        Self {
            header,
            palette: Vec::new(),
        }
    }

    /// Header followed by `palette`; `colors_used` is set to the entry count.
    pub fn with_palette(mut header: BitmapInfoHeader, palette: Vec<RgbQuad>) -> Self {
        header.colors_used = palette.len() as u32;
        Self { header, palette }
    }

    pub fn header(&self) -> &BitmapInfoHeader {
        &self.header
    }

    pub fn palette(&self) -> &[RgbQuad] {
        &self.palette
    }

    /// See [`size_of`].
    pub fn size_of(&self) -> usize {
        size_of(&self.header)
    }

    /// Write the record, padded or truncated to the declared size, then
    /// exactly `colors_used` palette entries (zero-filled past the supplied
    /// palette).
    pub fn write_to<W: Write>(&self, mut out: W) -> io::Result<()> {
        let record = self.header.to_le_bytes();
        let declared = if self.header.size != 0 {
            self.header.size as usize
        } else {
            INFO_HEADER_SIZE as usize
        };

        let written = declared.min(record.len());
        out.write_all(&record[..written])?;
        if declared > written {
            out.write_all(&vec![0u8; declared - written])?;
        }

        let count = self.header.colors_used as usize;
        let supplied = count.min(self.palette.len());
        out.write_all(bytemuck::cast_slice(&self.palette[..supplied]))?;
        if count > supplied {
            out.write_all(&vec![0u8; (count - supplied) * RGB_QUAD_SIZE as usize])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_header_has_one_plane_and_no_palette() {
        let header = BitmapInfoHeader::new(640, 480, 24);
        assert_eq!(header.size, 40);
        assert_eq!(header.planes, 1);
        assert_eq!(header.bit_count, 24);
        assert_eq!(header.colors_used, 0);
        assert_eq!(header.size_image, 640 * 480 * 3);
    }

    #[test]
    fn size_image_counts_row_padding() {
        // 5 pixels * 3 bytes = 15, padded to 16 per row
        let header = BitmapInfoHeader::new(5, 3, 24);
        assert_eq!(header.size_image, 16 * 3);
        assert_eq!(header.pixel_bytes(), 15 * 3);
    }

    #[test]
    fn top_down_header_stores_negative_height() {
        let header = BitmapInfoHeader::new(640, 480, 24).top_down();
        assert!(header.is_top_down());
        assert_eq!(header.height, -480);
        assert_eq!(header.size_image, 640 * 480 * 3);
        assert_eq!(&header.to_le_bytes()[8..12], &(-480i32).to_le_bytes());
        assert!(!BitmapInfoHeader::new(640, 480, 24).is_top_down());
    }

    #[test]
    fn size_of_uses_natural_size_when_declared_size_is_zero() {
        let mut header = BitmapInfoHeader::new(4, 4, 32);
        header.size = 0;
        assert_eq!(size_of(&header), 40);
    }

    #[test]
    fn size_of_honours_declared_size() {
        let mut header = BitmapInfoHeader::new(4, 4, 32);
        header.size = 108;
        assert_eq!(size_of(&header), 108);
    }

    #[test]
    fn size_of_counts_palette_entries() {
        let mut header = BitmapInfoHeader::new(4, 4, 8);
        header.colors_used = 256;
        assert_eq!(size_of(&header), 40 + 256 * 4);
    }

    #[test]
    fn stride_is_dword_aligned() {
        assert_eq!(BitmapInfoHeader::new(1, 1, 24).stride(), 4);
        assert_eq!(BitmapInfoHeader::new(3008, 1504, 24).stride(), 9024);
        assert_eq!(BitmapInfoHeader::new(5, 1, 32).stride(), 20);
    }

    #[test]
    fn header_bytes_are_little_endian() {
        let header = BitmapInfoHeader::new(0x0102, 0x0304, 32);
        let bytes = header.to_le_bytes();
        assert_eq!(&bytes[0..4], &[40, 0, 0, 0]);
        assert_eq!(&bytes[4..8], &[0x02, 0x01, 0, 0]);
        assert_eq!(&bytes[8..12], &[0x04, 0x03, 0, 0]);
        assert_eq!(&bytes[12..14], &[1, 0]);
        assert_eq!(&bytes[14..16], &[32, 0]);
    }

    #[test]
    fn header_parses_back() {
        let header = BitmapInfoHeader::new(3008, 1504, 24);
        let parsed = BitmapInfoHeader::from_le_bytes(&header.to_le_bytes()).unwrap();
        assert_eq!(parsed, header);
        assert!(BitmapInfoHeader::from_le_bytes(&[0u8; 10]).is_none());
    }

    #[test]
    fn with_palette_sets_colors_used() {
        let palette = vec![RgbQuad::default(); 16];
        let info = BitmapInfo::with_palette(BitmapInfoHeader::new(8, 8, 4), palette);
        assert_eq!(info.header().colors_used, 16);
        assert_eq!(info.size_of(), 40 + 64);
    }

    #[test]
    fn write_to_emits_exactly_size_of_bytes() {
        let palette = vec![
            RgbQuad {
                blue: 1,
                green: 2,
                red: 3,
                reserved: 0,
            };
            2
        ];
        let info = BitmapInfo::with_palette(BitmapInfoHeader::new(2, 2, 8), palette);
        let mut out = Vec::new();
        info.write_to(&mut out).unwrap();
        assert_eq!(out.len(), info.size_of());
        assert_eq!(&out[40..44], &[1, 2, 3, 0]);
    }

    #[test]
    fn write_to_pads_missing_palette_entries() {
        let mut header = BitmapInfoHeader::new(2, 2, 8);
        header.colors_used = 3;
        let info = BitmapInfo::new(header);
        let mut out = Vec::new();
        info.write_to(&mut out).unwrap();
        assert_eq!(out.len(), 40 + 12);
        assert!(out[40..].iter().all(|&b| b == 0));
    }

    #[test]
    fn write_to_pads_to_declared_size() {
        let mut header = BitmapInfoHeader::new(2, 2, 24);
        header.size = 52;
        let mut out = Vec::new();
        BitmapInfo::new(header).write_to(&mut out).unwrap();
        assert_eq!(out.len(), 52);
    }
}

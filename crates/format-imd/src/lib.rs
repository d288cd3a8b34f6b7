//! ImageDisk (IMD) floppy image container, per `spec.md` §6's disk-image
//! description.
//!
//! Layout: an ASCII header starting with the literal `"IMD"`, followed by a
//! free-form comment terminated by `0x1A`, followed by one record per
//! track. Each track record is a mode byte, a cylinder byte, a head byte
//! (bits 7/6 flag the presence of an optional cylinder map and head map
//! respectively), a sector count, a sector-size code (`128 << code` bytes
//! per sector), the sector numbering map, the optional cylinder/head maps,
//! and then one sector data record per sector in map order. A sector data
//! record starts with a type byte describing whether the sector is
//! missing, normal, run-length compressed, flagged with the "deleted data"
//! address mark, or flagged as having been read with a data error,
//! followed by either the sector's bytes (normal) or a single fill byte
//! (compressed).
//!
//! No external parsing crate: the format is small and bespoke enough that
//! hand-rolling it is this workspace's own convention for disk containers
//! (see `format-adf`).

use std::fmt;

pub const SECTOR_RECORD_UNAVAILABLE: u8 = 0x00;
pub const SECTOR_RECORD_NORMAL: u8 = 0x01;
pub const SECTOR_RECORD_COMPRESSED: u8 = 0x02;
pub const SECTOR_RECORD_NORMAL_DELETED: u8 = 0x03;
pub const SECTOR_RECORD_COMPRESSED_DELETED: u8 = 0x04;
pub const SECTOR_RECORD_NORMAL_ERROR: u8 = 0x05;
pub const SECTOR_RECORD_COMPRESSED_ERROR: u8 = 0x06;
pub const SECTOR_RECORD_NORMAL_ERROR_DELETED: u8 = 0x07;
pub const SECTOR_RECORD_COMPRESSED_ERROR_DELETED: u8 = 0x08;

const HEAD_CYLMAP_FLAG: u8 = 0x80;
const HEAD_HEADMAP_FLAG: u8 = 0x40;
const HEAD_MASK: u8 = 0x3F;

/// 500 kbps FM, the mode `pdq3_diskFormat` uses for track 0.
pub const MODE_500K_FM: u8 = 0x00;
/// 500 kbps MFM, the mode `pdq3_diskFormat` uses for tracks 1-76.
pub const MODE_500K_MFM: u8 = 0x03;

/// Filler byte `pdq3_diskFormat` writes into every newly formatted sector.
pub const FILL_BYTE: u8 = 0xE5;

#[derive(Debug)]
pub enum ImdError {
    MissingSignature,
    UnterminatedHeader,
    TruncatedTrack { cylinder: u8, head: u8 },
    TruncatedSector { cylinder: u8, head: u8, sector: u8 },
    UnknownSectorRecordType(u8),
}

impl fmt::Display for ImdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSignature => write!(f, "image does not begin with the \"IMD\" signature"),
            Self::UnterminatedHeader => write!(f, "header comment has no 0x1A terminator"),
            Self::TruncatedTrack { cylinder, head } => {
                write!(f, "truncated track record at cylinder {cylinder} head {head}")
            }
            Self::TruncatedSector { cylinder, head, sector } => write!(
                f,
                "truncated sector data at cylinder {cylinder} head {head} sector {sector}"
            ),
            Self::UnknownSectorRecordType(kind) => write!(f, "unknown sector data record type 0x{kind:02X}"),
        }
    }
}

impl std::error::Error for ImdError {}

#[must_use]
pub fn sector_size(size_code: u8) -> usize {
    128usize << size_code
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SectorRecord {
    Unavailable,
    Normal(Vec<u8>),
    Compressed(u8),
    NormalDeleted(Vec<u8>),
    CompressedDeleted(u8),
    NormalError(Vec<u8>),
    CompressedError(u8),
    NormalErrorDeleted(Vec<u8>),
    CompressedErrorDeleted(u8),
}

impl SectorRecord {
    fn kind(&self) -> u8 {
        match self {
            Self::Unavailable => SECTOR_RECORD_UNAVAILABLE,
            Self::Normal(_) => SECTOR_RECORD_NORMAL,
            Self::Compressed(_) => SECTOR_RECORD_COMPRESSED,
            Self::NormalDeleted(_) => SECTOR_RECORD_NORMAL_DELETED,
            Self::CompressedDeleted(_) => SECTOR_RECORD_COMPRESSED_DELETED,
            Self::NormalError(_) => SECTOR_RECORD_NORMAL_ERROR,
            Self::CompressedError(_) => SECTOR_RECORD_COMPRESSED_ERROR,
            Self::NormalErrorDeleted(_) => SECTOR_RECORD_NORMAL_ERROR_DELETED,
            Self::CompressedErrorDeleted(_) => SECTOR_RECORD_COMPRESSED_ERROR_DELETED,
        }
    }

    /// Expand to `size` bytes, filling compressed/unavailable records with
    /// [`FILL_BYTE`].
    #[must_use]
    pub fn expand(&self, size: usize) -> Vec<u8> {
        match self {
            Self::Unavailable => vec![FILL_BYTE; size],
            Self::Normal(d) | Self::NormalDeleted(d) | Self::NormalError(d) | Self::NormalErrorDeleted(d) => d.clone(),
            Self::Compressed(b)
            | Self::CompressedDeleted(b)
            | Self::CompressedError(b)
            | Self::CompressedErrorDeleted(b) => vec![*b; size],
        }
    }

    #[must_use]
    pub fn has_error(&self) -> bool {
        matches!(
            self,
            Self::NormalError(_) | Self::CompressedError(_) | Self::NormalErrorDeleted(_) | Self::CompressedErrorDeleted(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    pub mode: u8,
    pub cylinder: u8,
    pub head: u8,
    pub sector_size_code: u8,
    pub sector_map: Vec<u8>,
    pub cylinder_map: Option<Vec<u8>>,
    pub head_map: Option<Vec<u8>>,
    pub sectors: Vec<SectorRecord>,
}

impl Track {
    #[must_use]
    pub fn sector_size(&self) -> usize {
        sector_size(self.sector_size_code)
    }

    /// Index of logical sector number `sector` within `sector_map`, i.e.
    /// this track's physical slot order.
    #[must_use]
    pub fn index_of(&self, sector: u8) -> Option<usize> {
        self.sector_map.iter().position(|&s| s == sector)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImdImage {
    pub comment: String,
    pub tracks: Vec<Track>,
}

impl ImdImage {
    pub fn from_bytes(data: &[u8]) -> Result<Self, ImdError> {
        if data.len() < 3 || &data[0..3] != b"IMD" {
            return Err(ImdError::MissingSignature);
        }
        let term = data.iter().position(|&b| b == 0x1A).ok_or(ImdError::UnterminatedHeader)?;
        let comment = String::from_utf8_lossy(&data[..term]).into_owned();
        let mut pos = term + 1;
        let mut tracks = Vec::new();
        while pos < data.len() {
            let track_start = pos;
            let mode = data[pos];
            let cylinder = data[pos + 1];
            let head_raw = data[pos + 2];
            let num_sectors = data[pos + 3] as usize;
            let sector_size_code = data[pos + 4];
            pos += 5;
            let head = head_raw & HEAD_MASK;
            let read_map = |pos: &mut usize, data: &[u8]| -> Result<Vec<u8>, ImdError> {
                let slice = data
                    .get(*pos..*pos + num_sectors)
                    .ok_or(ImdError::TruncatedTrack { cylinder, head })?;
                *pos += num_sectors;
                Ok(slice.to_vec())
            };
            let sector_map = read_map(&mut pos, data)?;
            let cylinder_map = if head_raw & HEAD_CYLMAP_FLAG != 0 {
                Some(read_map(&mut pos, data)?)
            } else {
                None
            };
            let head_map = if head_raw & HEAD_HEADMAP_FLAG != 0 {
                Some(read_map(&mut pos, data)?)
            } else {
                None
            };
            let size = sector_size(sector_size_code);
            let mut sectors = Vec::with_capacity(num_sectors);
            for slot in 0..num_sectors {
                let sector = *sector_map.get(slot).unwrap_or(&0);
                let kind = *data.get(pos).ok_or(ImdError::TruncatedSector { cylinder, head, sector })?;
                pos += 1;
                let record = match kind {
                    SECTOR_RECORD_UNAVAILABLE => SectorRecord::Unavailable,
                    SECTOR_RECORD_COMPRESSED
                    | SECTOR_RECORD_COMPRESSED_DELETED
                    | SECTOR_RECORD_COMPRESSED_ERROR
                    | SECTOR_RECORD_COMPRESSED_ERROR_DELETED => {
                        let fill = *data.get(pos).ok_or(ImdError::TruncatedSector { cylinder, head, sector })?;
                        pos += 1;
                        match kind {
                            SECTOR_RECORD_COMPRESSED => SectorRecord::Compressed(fill),
                            SECTOR_RECORD_COMPRESSED_DELETED => SectorRecord::CompressedDeleted(fill),
                            SECTOR_RECORD_COMPRESSED_ERROR => SectorRecord::CompressedError(fill),
                            _ => SectorRecord::CompressedErrorDeleted(fill),
                        }
                    }
                    SECTOR_RECORD_NORMAL | SECTOR_RECORD_NORMAL_DELETED | SECTOR_RECORD_NORMAL_ERROR | SECTOR_RECORD_NORMAL_ERROR_DELETED => {
                        let bytes = data
                            .get(pos..pos + size)
                            .ok_or(ImdError::TruncatedSector { cylinder, head, sector })?
                            .to_vec();
                        pos += size;
                        match kind {
                            SECTOR_RECORD_NORMAL => SectorRecord::Normal(bytes),
                            SECTOR_RECORD_NORMAL_DELETED => SectorRecord::NormalDeleted(bytes),
                            SECTOR_RECORD_NORMAL_ERROR => SectorRecord::NormalError(bytes),
                            _ => SectorRecord::NormalErrorDeleted(bytes),
                        }
                    }
                    other => return Err(ImdError::UnknownSectorRecordType(other)),
                };
                sectors.push(record);
            }
            if pos < track_start {
                return Err(ImdError::TruncatedTrack { cylinder, head });
            }
            tracks.push(Track {
                mode,
                cylinder,
                head,
                sector_size_code,
                sector_map,
                cylinder_map,
                head_map,
                sectors,
            });
        }
        Ok(Self { comment, tracks })
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.comment.as_bytes());
        out.push(0x1A);
        for track in &self.tracks {
            let mut head_byte = track.head;
            if track.cylinder_map.is_some() {
                head_byte |= HEAD_CYLMAP_FLAG;
            }
            if track.head_map.is_some() {
                head_byte |= HEAD_HEADMAP_FLAG;
            }
            out.push(track.mode);
            out.push(track.cylinder);
            out.push(head_byte);
            out.push(track.sector_map.len() as u8);
            out.push(track.sector_size_code);
            out.extend_from_slice(&track.sector_map);
            if let Some(map) = &track.cylinder_map {
                out.extend_from_slice(map);
            }
            if let Some(map) = &track.head_map {
                out.extend_from_slice(map);
            }
            for record in &track.sectors {
                out.push(record.kind());
                match record {
                    SectorRecord::Unavailable => {}
                    SectorRecord::Normal(d)
                    | SectorRecord::NormalDeleted(d)
                    | SectorRecord::NormalError(d)
                    | SectorRecord::NormalErrorDeleted(d) => out.extend_from_slice(d),
                    SectorRecord::Compressed(b)
                    | SectorRecord::CompressedDeleted(b)
                    | SectorRecord::CompressedError(b)
                    | SectorRecord::CompressedErrorDeleted(b) => out.push(*b),
                }
            }
        }
        out
    }

    fn track_mut(&mut self, cylinder: u8, head: u8) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.cylinder == cylinder && t.head == head)
    }

    #[must_use]
    pub fn track(&self, cylinder: u8, head: u8) -> Option<&Track> {
        self.tracks.iter().find(|t| t.cylinder == cylinder && t.head == head)
    }

    /// Read logical `sector` of `(cylinder, head)`, expanding compressed
    /// records to full size. `None` if the track or sector does not exist.
    #[must_use]
    pub fn read_sector(&self, cylinder: u8, head: u8, sector: u8) -> Option<Vec<u8>> {
        let track = self.track(cylinder, head)?;
        let idx = track.index_of(sector)?;
        Some(track.sectors[idx].expand(track.sector_size()))
    }

    #[must_use]
    pub fn sector_has_error(&self, cylinder: u8, head: u8, sector: u8) -> bool {
        self.track(cylinder, head)
            .and_then(|t| t.index_of(sector).map(|idx| t.sectors[idx].has_error()))
            .unwrap_or(false)
    }

    /// Overwrite logical `sector` of `(cylinder, head)` with `data`,
    /// replacing whatever record kind was there with a plain normal
    /// record. Returns `false` if the track or sector does not exist.
    pub fn write_sector(&mut self, cylinder: u8, head: u8, sector: u8, data: &[u8]) -> bool {
        let Some(track) = self.track_mut(cylinder, head) else {
            return false;
        };
        let Some(idx) = track.index_of(sector) else {
            return false;
        };
        track.sectors[idx] = SectorRecord::Normal(data.to_vec());
        true
    }

    /// Build a single formatted track: `num_sectors` sectors of `size`
    /// bytes each, numbered sequentially starting at 1, filled with
    /// [`FILL_BYTE`]. Mirrors `trackWrite()` as called from
    /// `pdq3_diskFormat`.
    fn format_track(cylinder: u8, head: u8, mode: u8, num_sectors: u8, size_code: u8) -> Track {
        let sector_map: Vec<u8> = (1..=num_sectors).collect();
        let sectors = sector_map.iter().map(|_| SectorRecord::Compressed(FILL_BYTE)).collect();
        Track {
            mode,
            cylinder,
            head,
            sector_size_code: size_code,
            sector_map,
            cylinder_map: None,
            head_map: None,
            sectors,
        }
    }

    /// `pdq3_diskCreate`/`pdq3_diskFormat`: a freshly formatted 77-track
    /// single-sided image — track 0 at 26 x 128-byte FM sectors, tracks
    /// 1-76 at 26 x 256-byte MFM sectors, per `spec.md` §6.
    #[must_use]
    pub fn format_pdq3_blank(comment: &str) -> Self {
        let mut tracks = Vec::with_capacity(77);
        tracks.push(Self::format_track(0, 0, MODE_500K_FM, 26, 0));
        for cyl in 1..=76u8 {
            tracks.push(Self::format_track(cyl, 0, MODE_500K_MFM, 26, 1));
        }
        Self {
            comment: comment.to_string(),
            tracks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_signature() {
        assert!(matches!(ImdImage::from_bytes(b"NOPE"), Err(ImdError::MissingSignature)));
    }

    #[test]
    fn rejects_unterminated_header() {
        assert!(matches!(
            ImdImage::from_bytes(b"IMD hello, no terminator"),
            Err(ImdError::UnterminatedHeader)
        ));
    }

    #[test]
    fn blank_image_has_77_tracks() {
        let image = ImdImage::format_pdq3_blank("IMD SIMH test\n");
        assert_eq!(image.tracks.len(), 77);
        assert_eq!(image.tracks[0].sector_size(), 128);
        assert_eq!(image.tracks[0].mode, MODE_500K_FM);
        assert_eq!(image.tracks[1].sector_size(), 256);
        assert_eq!(image.tracks[1].mode, MODE_500K_MFM);
        assert_eq!(image.tracks[76].cylinder, 76);
    }

    #[test]
    fn round_trips_through_bytes() {
        let image = ImdImage::format_pdq3_blank("IMD SIMH test\n");
        let bytes = image.to_bytes();
        let parsed = ImdImage::from_bytes(&bytes).expect("valid image");
        assert_eq!(parsed.tracks.len(), 77);
        assert_eq!(parsed.comment, image.comment);
        assert_eq!(parsed.read_sector(0, 0, 1), image.read_sector(0, 0, 1));
    }

    #[test]
    fn read_write_sector_round_trip() {
        let mut image = ImdImage::format_pdq3_blank("IMD SIMH test\n");
        let data = vec![0x42u8; 256];
        assert!(image.write_sector(5, 0, 3, &data));
        assert_eq!(image.read_sector(5, 0, 3), Some(data));
    }

    #[test]
    fn read_sector_missing_track_is_none() {
        let image = ImdImage::format_pdq3_blank("IMD SIMH test\n");
        assert_eq!(image.read_sector(90, 0, 1), None);
        assert_eq!(image.read_sector(0, 0, 200), None);
    }

    #[test]
    fn compressed_record_expands_to_full_size() {
        let image = ImdImage::format_pdq3_blank("IMD SIMH test\n");
        let sector = image.read_sector(10, 0, 1).expect("sector");
        assert_eq!(sector.len(), 256);
        assert!(sector.iter().all(|&b| b == FILL_BYTE));
    }

    #[test]
    fn error_sector_record_is_flagged() {
        let mut image = ImdImage::format_pdq3_blank("IMD SIMH test\n");
        let track = image.track_mut(0, 0).expect("track 0");
        track.sectors[0] = SectorRecord::NormalError(vec![0; 128]);
        assert!(image.sector_has_error(0, 0, 1));
        assert!(!image.sector_has_error(0, 0, 2));
    }
}

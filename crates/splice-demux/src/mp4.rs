//! MP4 sample-table parsing for the first video track of a container.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::reader::{BoxIter, Cursor, DemuxError, FourCC, Mp4Box};
use crate::track::CodedSample;

/// Static properties of the video track's sample entry.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoTrackInfo {
    pub track_id: u32,
    pub sample_entry: FourCC,
    pub width: u32,
    pub height: u32,
    pub timescale: u32,
    /// `avcC` payload from the sample entry, when present.
    pub avcc: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy)]
struct SampleEntry {
    offset: u64,
    size: u32,
    dts: i64,
    duration: u32,
    cts_offset: i64,
    sync: bool,
}

/// Parses `moov` once, then hands out samples in batches.
pub struct Mp4Parser<'a> {
    data: &'a [u8],
    info: VideoTrackInfo,
    entries: Vec<SampleEntry>,
    declared: usize,
    next: usize,
}

impl<'a> Mp4Parser<'a> {
    pub fn open(data: &'a [u8]) -> Result<Self, DemuxError> {
        let mut moov = None;
        for b in BoxIter::new(data, 0) {
            let b = b?;
            if b.kind == FourCC::MOOV {
                moov = Some(b);
                break;
            }
        }
        let moov = moov.ok_or(DemuxError::MissingBox(FourCC::MOOV))?;

        for trak in moov.children() {
            let trak = trak?;
            if trak.kind != FourCC::TRAK {
                continue;
            }
            let mdia = trak.require(FourCC::MDIA)?;
            if handler_type(&mdia.require(FourCC::HDLR)?)? != *b"vide" {
                continue;
            }
            let track_id = parse_tkhd(&trak.require(FourCC::TKHD)?)?;
            let timescale = parse_mdhd(&mdia.require(FourCC::MDHD)?)?;
            let stbl = mdia.require(FourCC::MINF)?.require(FourCC::STBL)?;
            let (sample_entry, width, height, avcc) =
                parse_stsd(&stbl.require(FourCC::STSD)?)?;
            let (entries, declared) = build_sample_entries(&stbl, data.len())?;
            debug!(
                track_id,
                timescale,
                width,
                height,
                samples = declared,
                entry = sample_entry.as_str(),
                "mp4 video track"
            );
            return Ok(Self {
                data,
                info: VideoTrackInfo {
                    track_id,
                    sample_entry,
                    width,
                    height,
                    timescale,
                    avcc,
                },
                entries,
                declared,
                next: 0,
            });
        }
        Err(DemuxError::NoVideoTrack)
    }

    pub fn info(&self) -> &VideoTrackInfo {
        &self.info
    }

    /// Sample count the container declares in `stsz`.
    pub fn declared_samples(&self) -> usize {
        self.declared
    }

    /// Samples the chunk map actually resolves; at most `declared_samples`.
    pub fn resolved_samples(&self) -> usize {
        self.entries.len()
    }

    /// Up to `max` further samples. Empty once the table is exhausted.
    pub fn next_batch(&mut self, max: usize) -> Result<Vec<CodedSample>, DemuxError> {
        let end = (self.next + max).min(self.entries.len());
        let mut batch = Vec::with_capacity(end - self.next);
        for entry in &self.entries[self.next..end] {
            let start = usize::try_from(entry.offset)
                .map_err(|_| DemuxError::SampleTable("sample offset overflow".into()))?;
            let stop = start
                .checked_add(entry.size as usize)
                .filter(|stop| *stop <= self.data.len())
                .ok_or_else(|| {
                    DemuxError::SampleTable(format!(
                        "sample at {} (+{}) beyond container end",
                        entry.offset, entry.size
                    ))
                })?;
            batch.push(CodedSample {
                cts: entry.dts + entry.cts_offset,
                dts: entry.dts,
                duration: entry.duration,
                timescale: self.info.timescale,
                is_sync: entry.sync,
                data: Arc::from(&self.data[start..stop]),
            });
        }
        trace!(from = self.next, count = batch.len(), "sample batch");
        self.next = end;
        Ok(batch)
    }
}

fn handler_type(hdlr: &Mp4Box<'_>) -> Result<[u8; 4], DemuxError> {
    let (_, mut c) = hdlr.full_box()?;
    c.skip(4, "hdlr pre_defined")?;
    let b = c.bytes(4, "hdlr handler_type")?;
    Ok([b[0], b[1], b[2], b[3]])
}

fn parse_tkhd(tkhd: &Mp4Box<'_>) -> Result<u32, DemuxError> {
    let (version, mut c) = tkhd.full_box()?;
    c.skip(if version == 1 { 16 } else { 8 }, "tkhd times")?;
    c.u32("tkhd track_id")
}

fn parse_mdhd(mdhd: &Mp4Box<'_>) -> Result<u32, DemuxError> {
    let (version, mut c) = mdhd.full_box()?;
    c.skip(if version == 1 { 16 } else { 8 }, "mdhd times")?;
    let timescale = c.u32("mdhd timescale")?;
    if timescale == 0 {
        return Err(DemuxError::SampleTable("zero media timescale".into()));
    }
    Ok(timescale)
}

type SampleDescription = (FourCC, u32, u32, Option<Vec<u8>>);

fn parse_stsd(stsd: &Mp4Box<'_>) -> Result<SampleDescription, DemuxError> {
    let (_, mut c) = stsd.full_box()?;
    let count = c.u32("stsd entry_count")?;
    if count == 0 {
        return Err(DemuxError::SampleTable("empty sample description".into()));
    }
    let base = stsd.offset + c.position();
    let entry = BoxIter::new(c.remaining(), base)
        .next()
        .ok_or(DemuxError::Truncated(FourCC::STSD))??;

    // VisualSampleEntry: 6 reserved, 2 data_reference_index, 16 pre_defined
    // and reserved, then width/height, then 50 more bytes before children.
    let mut v = Cursor::new(entry.payload);
    v.skip(24, "visual sample entry")?;
    let width = v.u16("width")? as u32;
    let height = v.u16("height")? as u32;
    v.skip(50, "visual sample entry tail")?;

    let mut avcc = None;
    if entry.kind == FourCC::AVC1 || entry.kind == FourCC::AVC3 {
        for child in BoxIter::new(v.remaining(), entry.offset + v.position()) {
            match child {
                Ok(child) if child.kind == FourCC::AVCC => {
                    avcc = Some(child.payload.to_vec());
                    break;
                }
                Ok(_) => {}
                // Trailing junk after the config boxes is tolerated.
                Err(_) => break,
            }
        }
    }
    Ok((entry.kind, width, height, avcc))
}

/// Sizes from `stsz`. A uniform size is kept unexpanded.
enum SampleSizes {
    Uniform { size: u32, count: usize },
    Table(Vec<u32>),
}

impl SampleSizes {
    fn len(&self) -> usize {
        match self {
            SampleSizes::Uniform { count, .. } => *count,
            SampleSizes::Table(sizes) => sizes.len(),
        }
    }

    fn get(&self, index: usize) -> u32 {
        match self {
            SampleSizes::Uniform { size, .. } => *size,
            SampleSizes::Table(sizes) => sizes[index],
        }
    }
}

fn build_sample_entries(
    stbl: &Mp4Box<'_>,
    container_len: usize,
) -> Result<(Vec<SampleEntry>, usize), DemuxError> {
    let sizes = parse_stsz(&stbl.require(FourCC::STSZ)?, container_len)?;
    let declared = sizes.len();

    let stts = parse_pairs(&stbl.require(FourCC::STTS)?, "stts")?;
    let ctts = match stbl.child(FourCC::CTTS)? {
        Some(b) => Some(parse_ctts(&b)?),
        None => None,
    };
    let sync = match stbl.child(FourCC::STSS)? {
        Some(b) => Some(parse_u32_list(&b, "stss")?),
        None => None,
    };
    let stsc = parse_stsc(&stbl.require(FourCC::STSC)?)?;
    let chunk_offsets = match stbl.child(FourCC::STCO)? {
        Some(b) => parse_u32_list(&b, "stco")?
            .into_iter()
            .map(u64::from)
            .collect(),
        None => parse_co64(&stbl.require(FourCC::CO64)?)?,
    };

    let mut entries = Vec::new();

    let mut durations = stts
        .iter()
        .flat_map(|&(count, delta)| std::iter::repeat(delta).take(count as usize));
    let mut offsets = ctts
        .iter()
        .flatten()
        .flat_map(|&(count, offset)| std::iter::repeat(offset).take(count as usize));

    let mut sample = 0usize;
    let mut dts = 0i64;
    'chunks: for (chunk_index, &chunk_offset) in chunk_offsets.iter().enumerate() {
        let chunk_number = chunk_index as u32 + 1;
        let per_chunk = stsc
            .iter()
            .rev()
            .find(|(first, _)| *first <= chunk_number)
            .map_or(0, |(_, n)| *n);
        let mut offset = chunk_offset;
        for _ in 0..per_chunk {
            if sample >= declared {
                break 'chunks;
            }
            let size = sizes.get(sample);
            if offset.saturating_add(u64::from(size)) > container_len as u64 {
                return Err(DemuxError::SampleTable(format!(
                    "sample {} at {} (+{}) beyond container end",
                    sample + 1,
                    offset,
                    size
                )));
            }
            let duration = durations.next().unwrap_or(0);
            let is_sync = sync
                .as_ref()
                .map_or(true, |list| list.binary_search(&(sample as u32 + 1)).is_ok());
            entries.push(SampleEntry {
                offset,
                size,
                dts,
                duration,
                cts_offset: offsets.next().unwrap_or(0),
                sync: is_sync,
            });
            offset += size as u64;
            dts += duration as i64;
            sample += 1;
        }
    }
    if entries.len() < declared {
        debug!(
            resolved = entries.len(),
            declared, "chunk map resolves fewer samples than declared"
        );
    }
    Ok((entries, declared))
}

/// Uniform sizes must fit in the container, so a forged count is
/// rejected rather than trusted.
fn parse_stsz(stsz: &Mp4Box<'_>, container_len: usize) -> Result<SampleSizes, DemuxError> {
    let (_, mut c) = stsz.full_box()?;
    let uniform = c.u32("stsz sample_size")?;
    let count = c.u32("stsz sample_count")? as usize;
    if uniform != 0 {
        let total = (count as u64).saturating_mul(u64::from(uniform));
        if total > container_len as u64 {
            return Err(DemuxError::SampleTable(format!(
                "stsz declares {} samples of {} bytes in a {}-byte container",
                count, uniform, container_len
            )));
        }
        return Ok(SampleSizes::Uniform {
            size: uniform,
            count,
        });
    }
    if c.remaining().len() / 4 < count {
        return Err(DemuxError::Truncated(FourCC::STSZ));
    }
    (0..count)
        .map(|_| c.u32("stsz entry"))
        .collect::<Result<Vec<u32>, _>>()
        .map(SampleSizes::Table)
}

fn parse_pairs(b: &Mp4Box<'_>, what: &'static str) -> Result<Vec<(u32, u32)>, DemuxError> {
    let (_, mut c) = b.full_box()?;
    let count = c.u32(what)? as usize;
    if c.remaining().len() / 8 < count {
        return Err(DemuxError::Truncated(b.kind));
    }
    (0..count)
        .map(|_| -> Result<(u32, u32), DemuxError> { Ok((c.u32(what)?, c.u32(what)?)) })
        .collect()
}

fn parse_ctts(b: &Mp4Box<'_>) -> Result<Vec<(u32, i64)>, DemuxError> {
    let (version, _) = b.full_box()?;
    Ok(parse_pairs(b, "ctts")?
        .into_iter()
        .map(|(count, raw)| {
            let offset = if version == 1 {
                raw as i32 as i64
            } else {
                raw as i64
            };
            (count, offset)
        })
        .collect())
}

fn parse_stsc(b: &Mp4Box<'_>) -> Result<Vec<(u32, u32)>, DemuxError> {
    let (_, mut c) = b.full_box()?;
    let count = c.u32("stsc entry_count")? as usize;
    if c.remaining().len() / 12 < count {
        return Err(DemuxError::Truncated(FourCC::STSC));
    }
    (0..count)
        .map(|_| -> Result<(u32, u32), DemuxError> {
            let first = c.u32("stsc first_chunk")?;
            let per_chunk = c.u32("stsc samples_per_chunk")?;
            c.skip(4, "stsc description_index")?;
            Ok((first, per_chunk))
        })
        .collect()
}

fn parse_u32_list(b: &Mp4Box<'_>, what: &'static str) -> Result<Vec<u32>, DemuxError> {
    let (_, mut c) = b.full_box()?;
    let count = c.u32(what)? as usize;
    if c.remaining().len() / 4 < count {
        return Err(DemuxError::Truncated(b.kind));
    }
    (0..count).map(|_| c.u32(what)).collect()
}

fn parse_co64(b: &Mp4Box<'_>) -> Result<Vec<u64>, DemuxError> {
    let (_, mut c) = b.full_box()?;
    let count = c.u32("co64 entry_count")? as usize;
    if c.remaining().len() / 8 < count {
        return Err(DemuxError::Truncated(FourCC::CO64));
    }
    (0..count).map(|_| c.u64("co64 entry")).collect()
}

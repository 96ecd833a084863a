//! # splice-demux
//!
//! Turns an embedded video asset's container bytes into a
//! [`DecodedVideoTrack`]: the coded sample list plus the decoder
//! configuration record, rebuilt from the bitstream when the container
//! does not carry one.

pub mod mp4;
pub mod nal;
pub mod paramset;
pub mod reader;
pub mod track;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use splice_core::{JobContext, SpliceResult};

pub use mp4::{Mp4Parser, VideoTrackInfo};
pub use paramset::{build_avcc, parse_avcc, reconstruct, scan_avcc_box, AvcConfig, ParamSets};
pub use reader::{DemuxError, FourCC};
pub use track::{CodedSample, DecodedVideoTrack, TrackSummary};

/// Samples handed out by the parser per batch.
const SAMPLE_BATCH: usize = 256;

/// Upper bound on waiting for the declared sample count to be reached.
const SAMPLE_WAIT: Duration = Duration::from_secs(5);

/// Where a track's decoder configuration came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSetSource {
    External,
    SampleEntry,
    RawBoxScan,
    Bitstream,
}

/// Demux options.
#[derive(Debug, Clone, Copy)]
pub struct DemuxOptions {
    /// Leading samples scanned when rebuilding parameter sets.
    pub scan_samples: usize,
}

impl Default for DemuxOptions {
    fn default() -> Self {
        Self { scan_samples: 50 }
    }
}

/// Demultiplex one asset.
///
/// `external` is a caller-supplied configuration record; when given it is
/// used as is. Cancellation is observed before parsing and between sample
/// batches.
pub async fn demux_asset(
    ctx: &JobContext,
    data: &[u8],
    external: Option<Arc<[u8]>>,
    options: DemuxOptions,
) -> SpliceResult<DecodedVideoTrack> {
    ctx.check_cancelled()?;
    let mut parser = Mp4Parser::open(data)?;
    let declared = parser.declared_samples();
    let info = parser.info().clone();

    let mut samples = Vec::with_capacity(parser.resolved_samples());
    let accumulated =
        tokio::time::timeout(SAMPLE_WAIT, accumulate(ctx, &mut parser, &mut samples)).await;
    match accumulated {
        Ok(result) => result?,
        Err(_) => warn!(
            got = samples.len(),
            declared, "sample accumulation timed out, continuing with partial list"
        ),
    }
    if samples.len() < declared {
        ctx.diagnostic(format!(
            "track {}: {} of {} declared samples resolved",
            info.track_id,
            samples.len(),
            declared
        ));
    }

    let (description, source) = match resolve_description(data, &info, &samples, external, options)
    {
        Some((record, source)) => (Some(record), Some(source)),
        None => {
            ctx.diagnostic(format!(
                "track {}: no parameter sets found in container or bitstream",
                info.track_id
            ));
            (None, None)
        }
    };

    let codec = description
        .as_deref()
        .and_then(parse_avcc)
        .map(|c| c.codec_string())
        .unwrap_or_else(|| info.sample_entry.as_str().to_string());

    info!(
        track_id = info.track_id,
        codec = %codec,
        samples = samples.len(),
        param_set = ?source,
        "demuxed video track"
    );

    Ok(DecodedVideoTrack {
        track_id: info.track_id,
        codec,
        coded_width: info.width,
        coded_height: info.height,
        timescale: info.timescale,
        description,
        samples,
    })
}

async fn accumulate(
    ctx: &JobContext,
    parser: &mut Mp4Parser<'_>,
    samples: &mut Vec<CodedSample>,
) -> SpliceResult<()> {
    let declared = parser.declared_samples();
    while samples.len() < declared {
        ctx.check_cancelled()?;
        let batch = parser.next_batch(SAMPLE_BATCH)?;
        if batch.is_empty() {
            break;
        }
        samples.extend(batch);
        tokio::task::yield_now().await;
    }
    Ok(())
}

fn resolve_description(
    data: &[u8],
    info: &VideoTrackInfo,
    samples: &[CodedSample],
    external: Option<Arc<[u8]>>,
    options: DemuxOptions,
) -> Option<(Arc<[u8]>, ParamSetSource)> {
    if let Some(record) = external {
        return Some((record, ParamSetSource::External));
    }
    if let Some(record) = info.avcc.as_deref().filter(|r| parse_avcc(r).is_some()) {
        return Some((Arc::from(record), ParamSetSource::SampleEntry));
    }
    if let Some(record) = scan_avcc_box(data).filter(|r| parse_avcc(r).is_some()) {
        debug!(track_id = info.track_id, "avcC recovered by raw box scan");
        return Some((Arc::from(record), ParamSetSource::RawBoxScan));
    }
    let leading = samples
        .iter()
        .take(options.scan_samples)
        .map(|s| &s.data[..]);
    let record = reconstruct(leading).and_then(|sets| sets.to_avcc())?;
    debug!(track_id = info.track_id, "avcC rebuilt from bitstream");
    Some((Arc::from(record), ParamSetSource::Bitstream))
}

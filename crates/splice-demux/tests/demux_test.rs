//! End-to-end demux of small hand-assembled MP4 files.

use std::sync::{Arc, Mutex};

use splice_core::{JobContext, SpliceError};
use splice_demux::{build_avcc, demux_asset, parse_avcc, DemuxOptions};

const SPS: [u8; 6] = [0x67, 0x42, 0xC0, 0x1F, 0xDA, 0x01];
const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];
const IDR: [u8; 4] = [0x65, 0x88, 0x84, 0x00];
const SLICE: [u8; 3] = [0x41, 0x9A, 0x02];

fn boxed(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(kind);
    out.extend_from_slice(payload);
    out
}

fn full(kind: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut body = vec![0, 0, 0, 0];
    body.extend_from_slice(payload);
    boxed(kind, &body)
}

fn u32s(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

fn prefixed(units: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for unit in units {
        out.extend_from_slice(&(unit.len() as u32).to_be_bytes());
        out.extend_from_slice(unit);
    }
    out
}

/// Two samples, 1000-tick durations at timescale 1000, first one sync.
fn build_mp4(samples: &[Vec<u8>], avcc: Option<&[u8]>) -> Vec<u8> {
    let sizes: Vec<u32> = samples.iter().map(|s| s.len() as u32).collect();
    let mut stsz = u32s(&[0, sizes.len() as u32]);
    stsz.extend(u32s(&sizes));
    build_mp4_with_stsz(samples, avcc, &stsz)
}

fn build_mp4_with_stsz(samples: &[Vec<u8>], avcc: Option<&[u8]>, stsz: &[u8]) -> Vec<u8> {
    let ftyp = boxed(b"ftyp", b"isom\0\0\0\0isomavc1");
    let mdat_payload: Vec<u8> = samples.concat();
    let mdat = boxed(b"mdat", &mdat_payload);
    let first_offset = (ftyp.len() + 8) as u32;

    let mut entry = vec![0u8; 78];
    entry[7] = 1;
    entry[24..26].copy_from_slice(&64u16.to_be_bytes());
    entry[26..28].copy_from_slice(&48u16.to_be_bytes());
    if let Some(record) = avcc {
        entry.extend(boxed(b"avcC", record));
    }
    let mut stsd = u32s(&[1]);
    stsd.extend(boxed(b"avc1", &entry));

    let stbl = [
        full(b"stsd", &stsd),
        full(b"stts", &u32s(&[1, samples.len() as u32, 1000])),
        full(b"stss", &u32s(&[1, 1])),
        full(b"stsz", stsz),
        full(b"stsc", &u32s(&[1, 1, samples.len() as u32, 1])),
        full(b"stco", &u32s(&[1, first_offset])),
    ]
    .concat();

    let mut hdlr = u32s(&[0]);
    hdlr.extend_from_slice(b"vide");
    hdlr.extend_from_slice(&[0; 13]);

    let mdia = [
        full(b"mdhd", &[u32s(&[0, 0, 1000, 2000]), vec![0x55, 0xC4, 0, 0]].concat()),
        full(b"hdlr", &hdlr),
        boxed(b"minf", &boxed(b"stbl", &stbl)),
    ]
    .concat();

    let mut tkhd = u32s(&[0, 0, 7, 0, 2000]);
    tkhd.extend_from_slice(&[0; 60]);
    let trak = boxed(b"trak", &[full(b"tkhd", &tkhd), boxed(b"mdia", &mdia)].concat());
    let moov = boxed(b"moov", &trak);

    [ftyp, mdat, moov].concat()
}

fn plain_samples() -> Vec<Vec<u8>> {
    vec![prefixed(&[&IDR[..]]), prefixed(&[&SLICE[..]])]
}

fn capturing_ctx() -> (JobContext, Arc<Mutex<Vec<String>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let ctx = JobContext::new().with_diagnostics(Arc::new(move |msg: String| {
        sink.lock().unwrap().push(msg);
    }));
    (ctx, seen)
}

#[tokio::test]
async fn test_demux_reads_sample_table_and_avcc() {
    let record = build_avcc(&SPS, &PPS, 4).unwrap();
    let data = build_mp4(&plain_samples(), Some(record.as_slice()));
    let track = demux_asset(&JobContext::new(), &data, None, DemuxOptions::default())
        .await
        .unwrap();

    assert_eq!(track.track_id, 7);
    assert_eq!((track.coded_width, track.coded_height), (64, 48));
    assert_eq!(track.timescale, 1000);
    assert_eq!(track.codec, "avc1.42c01f");
    assert_eq!(track.description.as_deref(), Some(record.as_slice()));
    assert_eq!(track.samples.len(), 2);
    assert!(track.samples[0].is_sync);
    assert!(!track.samples[1].is_sync);
    assert_eq!(&track.samples[1].data[4..], &SLICE);

    let chunks: Vec<_> = track.samples.iter().map(|s| s.to_chunk()).collect();
    assert_eq!(chunks[0].timestamp_us, 0);
    assert_eq!(chunks[1].timestamp_us, 1_000_000);
    assert_eq!(chunks[1].duration_us, 1_000_000);
}

#[tokio::test]
async fn test_demux_rebuilds_param_sets_from_bitstream() {
    let samples = vec![prefixed(&[&SPS[..], &PPS[..], &IDR[..]]), prefixed(&[&SLICE[..]])];
    let data = build_mp4(&samples, None);
    let track = demux_asset(&JobContext::new(), &data, None, DemuxOptions::default())
        .await
        .unwrap();

    let config = parse_avcc(track.description.as_deref().unwrap()).unwrap();
    assert_eq!(config.sps, vec![SPS.to_vec()]);
    assert_eq!(config.pps, vec![PPS.to_vec()]);
    assert_eq!(config.length_size, 4);
    assert_eq!(track.codec, "avc1.42c01f");
}

#[tokio::test]
async fn test_demux_without_param_sets_reports_diagnostic() {
    let (ctx, seen) = capturing_ctx();
    let data = build_mp4(&plain_samples(), None);
    let track = demux_asset(&ctx, &data, None, DemuxOptions::default())
        .await
        .unwrap();

    assert!(track.description.is_none());
    assert_eq!(track.codec, "avc1");
    let messages = seen.lock().unwrap();
    assert!(messages.iter().any(|m| m.contains("no parameter sets")));
}

#[tokio::test]
async fn test_external_param_set_takes_precedence() {
    let container_record = build_avcc(&SPS, &PPS, 4).unwrap();
    let mut other_sps = SPS;
    other_sps[3] = 0x28;
    let external: Arc<[u8]> = Arc::from(build_avcc(&other_sps, &PPS, 4).unwrap());
    let data = build_mp4(&plain_samples(), Some(container_record.as_slice()));
    let track = demux_asset(
        &JobContext::new(),
        &data,
        Some(external.clone()),
        DemuxOptions::default(),
    )
    .await
    .unwrap();

    assert_eq!(track.description, Some(external));
    assert_eq!(track.codec, "avc1.42c028");
}

#[tokio::test]
async fn test_demux_observes_cancellation() {
    let ctx = JobContext::new();
    ctx.cancel();
    let data = build_mp4(&plain_samples(), None);
    let err = demux_asset(&ctx, &data, None, DemuxOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
}

#[tokio::test]
async fn test_demux_rejects_malformed_container() {
    let err = demux_asset(
        &JobContext::new(),
        b"\x00\x00\x00\x40moov",
        None,
        DemuxOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SpliceError::Demux(_)));

    let err = demux_asset(
        &JobContext::new(),
        &boxed(b"ftyp", b"isom"),
        None,
        DemuxOptions::default(),
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("moov"));
}

#[tokio::test]
async fn test_forged_uniform_sample_count_is_a_demux_error() {
    let stsz = u32s(&[1, 0xFFFF_FFFE]);
    let data = build_mp4_with_stsz(&plain_samples(), None, &stsz);
    let err = demux_asset(&JobContext::new(), &data, None, DemuxOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SpliceError::Demux(_)), "{:?}", err);
}

#[tokio::test]
async fn test_uniform_sample_size_within_container() {
    let samples = vec![prefixed(&[&SLICE[..]]), prefixed(&[&SLICE[..]])];
    let stsz = u32s(&[7, 2]);
    let data = build_mp4_with_stsz(&samples, None, &stsz);
    let track = demux_asset(&JobContext::new(), &data, None, DemuxOptions::default())
        .await
        .unwrap();
    assert_eq!(track.samples.len(), 2);
    assert_eq!(&track.samples[1].data[4..], &SLICE);
}

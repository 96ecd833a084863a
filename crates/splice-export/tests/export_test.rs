//! Whole-job exports against in-memory codecs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Notify};

use splice_core::codec::{
    AudioData, AudioEncodeCapability, AudioEncoderConfig, ChunkKind, CodecFactory, DecodedFrame,
    EncodedChunk, ErrorCallback, OutputCallback, VideoDecodeCapability, VideoDecoderConfig,
    VideoEncodeCapability, VideoEncoderConfig,
};
use splice_core::{Color, ExportConfig, FrameBuffer, JobContext, SpliceError, SpliceResult};
use splice_demux::{build_avcc, demux_asset, DemuxOptions};
use splice_encode::{Mp4Muxer, VideoTrackParams};
use splice_export::{Event, ExportDriver, ExportState, ProgressReporter, Request, Worker};
use splice_ir::{Project, ProjectDescriptor};

const SPS: [u8; 6] = [0x67, 0x42, 0xC0, 0x1F, 0xDA, 0x01];
const PPS: [u8; 4] = [0x68, 0xCE, 0x3C, 0x80];
const RED: [u8; 4] = [255, 0, 0, 255];

/// Everything the fake codecs saw.
#[derive(Default)]
struct Probe {
    log: Mutex<Vec<&'static str>>,
    video_timestamps: Mutex<Vec<i64>>,
    first_pixels: Mutex<Vec<[u8; 4]>>,
    audio_timestamps: Mutex<Vec<i64>>,
    decoded: AtomicUsize,
    decoder_closes: AtomicUsize,
    video_closes: AtomicUsize,
    audio_closes: AtomicUsize,
}

impl Probe {
    fn log(&self, entry: &'static str) {
        self.log.lock().unwrap().push(entry);
    }
}

struct Gate {
    at_frame: usize,
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

#[derive(Default)]
struct FakeCodecs {
    probe: Arc<Probe>,
    decoder_supported: bool,
    video_supported: bool,
    gate: Option<Arc<Gate>>,
}

impl FakeCodecs {
    fn new() -> Self {
        Self {
            decoder_supported: true,
            video_supported: true,
            ..Self::default()
        }
    }
}

impl CodecFactory for FakeCodecs {
    fn video_decoder(&self) -> SpliceResult<Box<dyn VideoDecodeCapability>> {
        Ok(Box::new(FakeDecoder {
            probe: self.probe.clone(),
            supported: self.decoder_supported,
            size: (0, 0),
            output: None,
        }))
    }

    fn video_encoder(&self) -> SpliceResult<Box<dyn VideoEncodeCapability>> {
        Ok(Box::new(FakeVideoEncoder {
            probe: self.probe.clone(),
            supported: self.video_supported,
            gate: self.gate.clone(),
            frames: 0,
            output: None,
        }))
    }

    fn audio_encoder(&self) -> SpliceResult<Box<dyn AudioEncodeCapability>> {
        Ok(Box::new(FakeAudioEncoder {
            probe: self.probe.clone(),
            output: None,
        }))
    }
}

/// Emits one solid red frame per chunk, synchronously.
struct FakeDecoder {
    probe: Arc<Probe>,
    supported: bool,
    size: (u32, u32),
    output: Option<OutputCallback<DecodedFrame>>,
}

#[async_trait]
impl VideoDecodeCapability for FakeDecoder {
    async fn is_config_supported(&self, _config: &VideoDecoderConfig) -> bool {
        self.supported
    }

    fn configure(
        &mut self,
        config: &VideoDecoderConfig,
        output: OutputCallback<DecodedFrame>,
        _error: ErrorCallback,
    ) -> SpliceResult<()> {
        self.size = (config.coded_width, config.coded_height);
        self.output = Some(output);
        Ok(())
    }

    async fn decode(&mut self, chunk: EncodedChunk) -> SpliceResult<()> {
        self.probe.decoded.fetch_add(1, Ordering::SeqCst);
        let image = FrameBuffer::solid(self.size.0, self.size.1, &Color::from_rgba8(RED));
        if let Some(output) = self.output.as_mut() {
            output(DecodedFrame {
                timestamp_us: chunk.timestamp_us,
                duration_us: chunk.duration_us,
                image,
            });
        }
        Ok(())
    }

    async fn flush(&mut self) -> SpliceResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> SpliceResult<()> {
        self.probe.decoder_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Turns every frame into a one-NAL length-prefixed chunk.
struct FakeVideoEncoder {
    probe: Arc<Probe>,
    supported: bool,
    gate: Option<Arc<Gate>>,
    frames: usize,
    output: Option<OutputCallback<EncodedChunk>>,
}

#[async_trait]
impl VideoEncodeCapability for FakeVideoEncoder {
    async fn is_config_supported(&self, _config: &VideoEncoderConfig) -> bool {
        self.supported
    }

    fn configure(
        &mut self,
        _config: &VideoEncoderConfig,
        output: OutputCallback<EncodedChunk>,
        _error: ErrorCallback,
    ) -> SpliceResult<()> {
        self.output = Some(output);
        Ok(())
    }

    async fn encode(
        &mut self,
        frame: &FrameBuffer,
        timestamp_us: i64,
        duration_us: i64,
        keyframe: bool,
    ) -> SpliceResult<()> {
        if let Some(gate) = &self.gate {
            if self.frames == gate.at_frame {
                gate.reached.notify_one();
                gate.release.notified().await;
            }
        }
        self.probe.log("video");
        self.probe.video_timestamps.lock().unwrap().push(timestamp_us);
        self.probe
            .first_pixels
            .lock()
            .unwrap()
            .push(frame.get_pixel(0, 0).unwrap_or_default());

        let key = keyframe || self.frames == 0;
        let nal = [if key { 0x65 } else { 0x41 }, 0x88, self.frames as u8];
        let mut data = (nal.len() as u32).to_be_bytes().to_vec();
        data.extend_from_slice(&nal);
        let decoder_config =
            (self.frames == 0).then(|| Arc::from(build_avcc(&SPS, &PPS, 4).unwrap()));
        self.frames += 1;
        if let Some(output) = self.output.as_mut() {
            output(EncodedChunk {
                kind: if key { ChunkKind::Key } else { ChunkKind::Delta },
                timestamp_us,
                duration_us,
                data: Arc::from(data),
                decoder_config,
            });
        }
        Ok(())
    }

    async fn flush(&mut self) -> SpliceResult<()> {
        self.probe.log("video-flush");
        Ok(())
    }

    async fn close(&mut self) -> SpliceResult<()> {
        self.probe.video_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeAudioEncoder {
    probe: Arc<Probe>,
    output: Option<OutputCallback<EncodedChunk>>,
}

#[async_trait]
impl AudioEncodeCapability for FakeAudioEncoder {
    async fn is_config_supported(&self, _config: &AudioEncoderConfig) -> bool {
        true
    }

    fn configure(
        &mut self,
        _config: &AudioEncoderConfig,
        output: OutputCallback<EncodedChunk>,
        _error: ErrorCallback,
    ) -> SpliceResult<()> {
        self.output = Some(output);
        Ok(())
    }

    async fn encode(&mut self, data: AudioData) -> SpliceResult<()> {
        self.probe.log("audio");
        let first = {
            let mut stamps = self.probe.audio_timestamps.lock().unwrap();
            stamps.push(data.timestamp_us);
            stamps.len() == 1
        };
        let duration_us = data.frames() as i64 * 1_000_000 / data.sample_rate as i64;
        if let Some(output) = self.output.as_mut() {
            output(EncodedChunk {
                kind: ChunkKind::Key,
                timestamp_us: data.timestamp_us,
                duration_us: duration_us.max(1),
                data: Arc::from(vec![0x21, 0x00, 0x07]),
                decoder_config: first.then(|| Arc::from(&[0x15u8, 0x88][..])),
            });
        }
        Ok(())
    }

    async fn flush(&mut self) -> SpliceResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> SpliceResult<()> {
        self.probe.audio_closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A 30-frame, 16x16 MP4 with a key frame every 10 frames.
fn video_asset() -> Vec<u8> {
    let avcc = build_avcc(&SPS, &PPS, 4).unwrap();
    let mut muxer = Mp4Muxer::new(VideoTrackParams { width: 16, height: 16 }, None);
    for i in 0..30i64 {
        let key = i % 10 == 0;
        let nal = [if key { 0x65 } else { 0x41 }, 0x9A, i as u8];
        let mut data = (nal.len() as u32).to_be_bytes().to_vec();
        data.extend_from_slice(&nal);
        muxer
            .add_video_chunk(&EncodedChunk {
                kind: if key { ChunkKind::Key } else { ChunkKind::Delta },
                timestamp_us: i * 33_333,
                duration_us: 33_333,
                data: Arc::from(data),
                decoder_config: (i == 0).then(|| Arc::from(avcc.as_slice())),
            })
            .unwrap();
    }
    muxer.finalize().unwrap()
}

fn image_project(duration: f64) -> ProjectDescriptor {
    serde_json::from_value(json!({
        "width": 16, "height": 16, "fps": 30,
        "tracks": [
            {"id": "t", "kind": "image", "items": [
                {"id": "i1", "contentId": "blue", "start": 0, "duration": duration}
            ]}
        ],
        "contents": [
            {"kind": "image", "id": "blue", "width": 2, "height": 2,
             "pixels": [0, 0, 255, 255, 0, 0, 255, 255, 0, 0, 255, 255, 0, 0, 255, 255]}
        ]
    }))
    .unwrap()
}

fn video_project() -> ProjectDescriptor {
    serde_json::from_value(json!({
        "width": 16, "height": 16, "fps": 30,
        "tracks": [
            {"id": "v", "kind": "video", "items": [
                {"id": "v1", "contentId": "clip", "start": 0, "duration": 0.5}
            ]}
        ],
        "contents": [
            {"kind": "video", "id": "clip", "assetId": "a", "width": 16, "height": 16}
        ],
        "assets": [{"id": "a", "data": video_asset()}]
    }))
    .unwrap()
}

fn load(desc: ProjectDescriptor) -> Project {
    Project::from_descriptor(desc).unwrap()
}

async fn export(
    codecs: &FakeCodecs,
    config: ExportConfig,
    project: &Project,
) -> (SpliceResult<Vec<u8>>, ExportState, Vec<f64>) {
    let ctx = JobContext::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let codecs: Arc<dyn CodecFactory> = Arc::new(FakeCodecs {
        probe: codecs.probe.clone(),
        decoder_supported: codecs.decoder_supported,
        video_supported: codecs.video_supported,
        gate: codecs.gate.clone(),
    });
    let mut driver = ExportDriver::new(
        ctx.clone(),
        Arc::new(config),
        codecs,
        ProgressReporter::new(&ctx, tx),
    );
    let result = driver.run(project).await;
    let mut progress = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let Event::Progress { progress: p } = event {
            progress.push(p);
        }
    }
    (result, driver.state(), progress)
}

#[tokio::test]
async fn test_two_seconds_at_thirty_fps_is_sixty_frames() {
    let codecs = FakeCodecs::new();
    let project = load(image_project(2.0));
    let (result, state, progress) = export(&codecs, ExportConfig::default(), &project).await;
    let bytes = result.unwrap();
    assert_eq!(state, ExportState::Finalized);
    assert_eq!(&bytes[4..8], b"ftyp");

    let expected: Vec<i64> = (0..60).map(|i| i * 33_333).collect();
    assert_eq!(*codecs.probe.video_timestamps.lock().unwrap(), expected);

    let track = demux_asset(&JobContext::new(), &bytes, None, DemuxOptions::default())
        .await
        .unwrap();
    assert_eq!(track.samples.len(), 60);
    assert_eq!((track.coded_width, track.coded_height), (16, 16));

    assert_eq!(progress.first(), Some(&5.0));
    assert_eq!(progress.last(), Some(&100.0));
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert!(progress.contains(&20.0));
    assert!(progress.contains(&90.0));
    assert_eq!(codecs.probe.video_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_image_is_drawn_over_background() {
    let codecs = FakeCodecs::new();
    let project = load(image_project(0.1));
    let (result, _, _) = export(&codecs, ExportConfig::default(), &project).await;
    result.unwrap();
    let pixels = codecs.probe.first_pixels.lock().unwrap();
    assert_eq!(pixels.len(), 3);
    assert_eq!(pixels[0], [0, 0, 255, 255]);
}

#[tokio::test]
async fn test_empty_project_still_renders_one_frame() {
    let codecs = FakeCodecs::new();
    let project = load(
        serde_json::from_value(json!({"width": 16, "height": 16, "fps": 25})).unwrap(),
    );
    let (result, state, _) = export(&codecs, ExportConfig::default(), &project).await;
    let bytes = result.unwrap();
    assert!(!bytes.is_empty());
    assert_eq!(state, ExportState::Finalized);
    assert_eq!(*codecs.probe.video_timestamps.lock().unwrap(), vec![0]);
    assert!(codecs.probe.audio_timestamps.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_video_asset_decoded_through_cursor() {
    let codecs = FakeCodecs::new();
    let project = load(video_project());
    let (result, state, _) = export(&codecs, ExportConfig::default(), &project).await;
    result.unwrap();
    assert_eq!(state, ExportState::Finalized);

    // 15 output frames over a 30-sample asset; the cursor never reads past
    // the item's window plus its lookahead.
    let decoded = codecs.probe.decoded.load(Ordering::SeqCst);
    assert!(decoded >= 15 && decoded < 30, "decoded {}", decoded);
    assert!(codecs
        .probe
        .first_pixels
        .lock()
        .unwrap()
        .iter()
        .all(|p| *p == RED));
    assert_eq!(codecs.probe.decoder_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_audio_encoded_in_chunks_after_video_flush() {
    let codecs = FakeCodecs::new();
    let mut desc = image_project(1.0);
    let tone: Vec<f32> = (0..8000).map(|i| (i as f32 * 0.01).sin()).collect();
    desc.contents.push(
        serde_json::from_value(json!({
            "kind": "audio", "id": "tone",
            "audio": {"sampleRate": 8000, "channels": [tone]}
        }))
        .unwrap(),
    );
    desc.tracks.push(
        serde_json::from_value(json!({
            "id": "a", "kind": "audio", "items": [
                {"id": "a1", "contentId": "tone", "start": 0, "duration": 1.0}
            ]
        }))
        .unwrap(),
    );
    let project = load(desc);
    let (result, _, _) = export(&codecs, ExportConfig::default(), &project).await;
    let bytes = result.unwrap();
    assert!(bytes.windows(4).any(|w| w == b"mp4a"));

    let stamps = codecs.probe.audio_timestamps.lock().unwrap().clone();
    let expected: Vec<i64> = (0..8).map(|k| k * 128_000).collect();
    assert_eq!(stamps, expected);

    let log = codecs.probe.log.lock().unwrap();
    let flush = log.iter().position(|e| *e == "video-flush").unwrap();
    let first_audio = log.iter().position(|e| *e == "audio").unwrap();
    assert!(first_audio > flush);
    assert!(log[flush..].iter().all(|e| *e != "video"));
    assert_eq!(codecs.probe.audio_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unsupported_decoder_aborts_and_closes_once() {
    let codecs = FakeCodecs {
        decoder_supported: false,
        ..FakeCodecs::new()
    };
    let project = load(video_project());
    let (result, state, _) = export(&codecs, ExportConfig::default(), &project).await;
    assert!(matches!(result, Err(SpliceError::ConfigUnsupported(_))));
    assert_eq!(state, ExportState::Errored);
    assert_eq!(codecs.probe.decoder_closes.load(Ordering::SeqCst), 1);
    assert_eq!(codecs.probe.decoded.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unsupported_encoder_closes_cursors_and_encoder() {
    let codecs = FakeCodecs {
        video_supported: false,
        ..FakeCodecs::new()
    };
    let project = load(video_project());
    let (result, state, progress) = export(&codecs, ExportConfig::default(), &project).await;
    assert!(matches!(result, Err(SpliceError::ConfigUnsupported(_))));
    assert_eq!(state, ExportState::Errored);
    assert_eq!(codecs.probe.decoder_closes.load(Ordering::SeqCst), 1);
    assert_eq!(codecs.probe.video_closes.load(Ordering::SeqCst), 1);
    assert!(codecs.probe.video_timestamps.lock().unwrap().is_empty());
    assert_eq!(progress, vec![5.0]);
}

#[tokio::test]
async fn test_oversized_output_is_unsupported() {
    let codecs = FakeCodecs::new();
    let mut config = ExportConfig::default();
    config.video.max_width = 8;
    let project = load(image_project(0.1));
    let (result, state, _) = export(&codecs, config, &project).await;
    assert!(matches!(result, Err(SpliceError::ConfigUnsupported(_))));
    assert_eq!(state, ExportState::Errored);
}

fn start(desc: ProjectDescriptor) -> Request {
    Request::Start {
        project: Box::new(desc),
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("worker went quiet")
        .expect("worker hung up")
}

#[tokio::test]
async fn test_worker_reports_error_then_serves_next_job() {
    let codecs = Arc::new(FakeCodecs::new());
    let worker = Worker::new(Arc::new(ExportConfig::default()), codecs);
    let (req_tx, req_rx) = mpsc::channel(8);
    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(worker.run(req_rx, ev_tx));

    assert!(matches!(next_event(&mut ev_rx).await, Event::Ready));

    let mut broken = image_project(1.0);
    broken.fps = 0.0;
    req_tx.send(start(broken)).await.unwrap();
    match next_event(&mut ev_rx).await {
        Event::Error { message } => assert!(message.contains("fps"), "{}", message),
        other => panic!("unexpected {:?}", other),
    }

    req_tx.send(start(image_project(0.2))).await.unwrap();
    let done = loop {
        match next_event(&mut ev_rx).await {
            Event::Done { buffer } => break buffer,
            Event::Error { message } => panic!("export failed: {}", message),
            _ => {}
        }
    };
    assert!(done.len() > 8);

    drop(req_tx);
    handle.await.unwrap();
}

fn is_already_running(event: &Event) -> bool {
    matches!(event, Event::Debug { message } if message.contains("already running"))
}

#[tokio::test]
async fn test_cancel_stops_progress_and_suppresses_done() {
    let gate = Arc::new(Gate {
        at_frame: 3,
        reached: Arc::new(Notify::new()),
        release: Arc::new(Notify::new()),
    });
    let codecs = Arc::new(FakeCodecs {
        gate: Some(gate.clone()),
        ..FakeCodecs::new()
    });
    let probe = codecs.probe.clone();
    let worker = Worker::new(Arc::new(ExportConfig::default()), codecs);
    let (req_tx, req_rx) = mpsc::channel(8);
    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(worker.run(req_rx, ev_tx));
    assert!(matches!(next_event(&mut ev_rx).await, Event::Ready));

    req_tx.send(start(image_project(2.0))).await.unwrap();
    gate.reached.notified().await;

    // A second job is refused while the first is running.
    req_tx.send(start(image_project(1.0))).await.unwrap();
    req_tx.send(Request::Cancel).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    gate.release.notify_one();

    drop(req_tx);
    handle.await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = ev_rx.try_recv() {
        events.push(event);
    }
    assert!(!events.iter().any(|e| e.is_terminal()));
    assert!(events.iter().any(is_already_running));

    let progress: Vec<f64> = events
        .iter()
        .filter_map(|e| match e {
            Event::Progress { progress } => Some(*progress),
            _ => None,
        })
        .collect();
    assert_eq!(progress, vec![5.0, 20.0]);

    assert_eq!(probe.video_timestamps.lock().unwrap().len(), 4);
    assert_eq!(probe.video_closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_start_leaves_running_job_with_one_terminal_event() {
    let gate = Arc::new(Gate {
        at_frame: 3,
        reached: Arc::new(Notify::new()),
        release: Arc::new(Notify::new()),
    });
    let codecs = Arc::new(FakeCodecs {
        gate: Some(gate.clone()),
        ..FakeCodecs::new()
    });
    let worker = Worker::new(Arc::new(ExportConfig::default()), codecs);
    let (req_tx, req_rx) = mpsc::channel(8);
    let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(worker.run(req_rx, ev_tx));
    assert!(matches!(next_event(&mut ev_rx).await, Event::Ready));

    req_tx.send(start(image_project(1.0))).await.unwrap();
    gate.reached.notified().await;
    req_tx.send(start(image_project(1.0))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    gate.release.notify_one();

    let mut events = Vec::new();
    loop {
        let event = next_event(&mut ev_rx).await;
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    drop(req_tx);
    handle.await.unwrap();
    while let Ok(event) = ev_rx.try_recv() {
        events.push(event);
    }

    let terminals: Vec<&Event> = events.iter().filter(|e| e.is_terminal()).collect();
    assert_eq!(terminals.len(), 1);
    assert!(matches!(terminals[0], Event::Done { .. }));
    assert!(matches!(events.last(), Some(Event::Done { .. })));

    let rejected = events.iter().position(is_already_running).unwrap();
    let progress_after = events[rejected..]
        .iter()
        .filter(|e| matches!(e, Event::Progress { .. }))
        .count();
    assert!(progress_after > 0);
}

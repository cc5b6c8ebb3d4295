//! FrameSource serialization under concurrent stream, inference, time-lapse,
//! and snapshot load.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use canopy::camera::NegotiatedFormat;
use canopy::inference::{Category, ModelEntry, ModelRegistry, StubClassifier};
use canopy::{
    CaptureDevice, Dashboard, DashboardParts, DeviceOpener, DeviceSettings, Frame, FrameSource,
    PixelFormat, RetryPolicy, StreamEncoder,
};

#[derive(Default)]
struct Probe {
    open_handles: AtomicUsize,
    max_open_handles: AtomicUsize,
    opens: AtomicUsize,
    active_reads: AtomicUsize,
    max_active_reads: AtomicUsize,
    reads: AtomicUsize,
}

struct CountingDevice {
    probe: Arc<Probe>,
    settings: DeviceSettings,
    fail_every: usize,
}

impl CaptureDevice for CountingDevice {
    fn negotiated(&self) -> NegotiatedFormat {
        NegotiatedFormat {
            width: self.settings.width,
            height: self.settings.height,
            fps: self.settings.fps,
        }
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let active = self.probe.active_reads.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_active_reads.fetch_max(active, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(1));
        let n = self.probe.reads.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.active_reads.fetch_sub(1, Ordering::SeqCst);

        if n % self.fail_every == 0 {
            return Err(anyhow!("simulated read failure"));
        }
        let len = (self.settings.width * self.settings.height * 3) as usize;
        Frame::new(
            vec![90u8; len],
            self.settings.width,
            self.settings.height,
            PixelFormat::Rgb24,
        )
    }
}

impl Drop for CountingDevice {
    fn drop(&mut self) {
        self.probe.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

struct CountingOpener {
    probe: Arc<Probe>,
    fail_every: usize,
}

impl DeviceOpener for CountingOpener {
    fn open(&self, settings: &DeviceSettings) -> Result<Box<dyn CaptureDevice>> {
        let open = self.probe.open_handles.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_open_handles.fetch_max(open, Ordering::SeqCst);
        self.probe.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingDevice {
            probe: self.probe.clone(),
            settings: settings.clone(),
            fail_every: self.fail_every,
        }))
    }
}

fn counting_source(probe: &Arc<Probe>, fail_every: usize) -> Arc<FrameSource> {
    let settings = DeviceSettings {
        device: "counting".to_string(),
        width: 16,
        height: 16,
        fps: 30,
    };
    let retry = RetryPolicy {
        attempts: 5,
        delay: Duration::from_millis(1),
    };
    let opener = CountingOpener {
        probe: probe.clone(),
        fail_every,
    };
    Arc::new(FrameSource::new(settings, retry, Box::new(opener)).without_diagnostics())
}

#[test]
fn concurrent_acquires_never_overlap() {
    let probe = Arc::new(Probe::default());
    let source = counting_source(&probe, 7);

    let workers: Vec<_> = (0..6)
        .map(|_| {
            let source = source.clone();
            std::thread::spawn(move || {
                for i in 0..40 {
                    let _ = source.acquire();
                    if i % 13 == 0 {
                        source.release();
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(probe.max_open_handles.load(Ordering::SeqCst), 1);
    assert_eq!(probe.max_active_reads.load(Ordering::SeqCst), 1);
    assert!(probe.opens.load(Ordering::SeqCst) > 1, "failures should force reopens");
    source.release();
    assert_eq!(probe.open_handles.load(Ordering::SeqCst), 0);
}

#[test]
fn stream_inference_and_time_lapse_share_one_handle() {
    let probe = Arc::new(Probe::default());
    let source = counting_source(&probe, 11);
    let dir = tempfile::tempdir().unwrap();

    let mut models = ModelRegistry::new();
    models.register(
        Category::Plant,
        ModelEntry::new(
            Box::new(StubClassifier::new(vec![0.9]).with_input_size(8, 8)),
            vec!["basil".to_string()],
            0.3,
        )
        .unwrap(),
    );
    let dashboard = Arc::new(
        Dashboard::new(DashboardParts {
            source: source.clone(),
            models,
            store: None,
            encoder: StreamEncoder::new(60),
            time_lapse_folder: dir.path().join("tl"),
            snapshot_dir: dir.path().join("snap"),
        })
        .with_inference_retry(RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        })
        .with_stream_poll(Duration::from_millis(1)),
    );

    dashboard.start_time_lapse(0.01, 8).unwrap();

    let streamer = {
        let dashboard = dashboard.clone();
        std::thread::spawn(move || {
            let stream = dashboard.live_stream().expect("stream");
            stream.take(40).count()
        })
    };
    let inferer = {
        let dashboard = dashboard.clone();
        std::thread::spawn(move || {
            let mut ok = 0;
            for _ in 0..10 {
                if dashboard.infer().is_ok() {
                    ok += 1;
                }
            }
            ok
        })
    };
    let snapper = {
        let dashboard = dashboard.clone();
        std::thread::spawn(move || {
            for _ in 0..5 {
                let _ = dashboard.snapshot();
            }
        })
    };

    assert_eq!(streamer.join().unwrap(), 40);
    assert!(inferer.join().unwrap() > 0);
    snapper.join().unwrap();
    dashboard.time_lapse().join();

    assert_eq!(probe.max_open_handles.load(Ordering::SeqCst), 1);
    assert_eq!(probe.max_active_reads.load(Ordering::SeqCst), 1);
    assert!(dashboard.detections().len() <= 5);

    dashboard.shutdown();
    assert_eq!(probe.open_handles.load(Ordering::SeqCst), 0);
}

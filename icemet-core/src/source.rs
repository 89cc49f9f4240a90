//! Frame ingestion: directory watcher, package archives, and a database-replay source.

use crate::database::Database;
use crate::envelope::{Envelope, PackageBoundary};
use crate::queue::QueueSender;
use icemet_model::{Buffer8, DateTime, File, FileStatus, Image};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// A pull-based frame source. [`run`] drives any implementation until it yields `None`.
pub trait Source {
    /// Returns the next envelope, or `None` once the source is permanently exhausted. A
    /// `WatchSource` in indefinite mode never returns `None`; it blocks in `next` until a new
    /// file appears.
    fn next(&mut self) -> crate::Result<Option<Envelope>>;
}

/// Drives `source` until exhaustion, forwarding every envelope to `outbound` in order. A
/// self-emitted `Quit` envelope (from a one-shot source) stops the loop after being forwarded;
/// an `Err` is fatal, matching the stage driver's termination policy.
pub fn run<S: Source>(mut source: S, outbound: Vec<QueueSender>) {
    loop {
        match source.next() {
            Ok(Some(env)) => {
                let quit = env.is_quit();
                for out in &outbound {
                    out.push(env.clone());
                }
                if quit {
                    break;
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::error!(%err, "source: fatal error");
                std::process::exit(4);
            }
        }
    }
}

/// Decodes a loose image file into a grayscale [`Image`], matching the original's "unreadable
/// image" policy: decode failures become an `EMPTY`-status image rather than a propagated error.
fn read_frame(path: &Path) -> crate::Result<Image> {
    let file = File::from_path(path)?;
    let img = match image::open(path) {
        Ok(img) => img.to_luma8(),
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "unreadable image, treating as empty");
            let mut image = Image::new(file, Buffer8::default());
            image.status = icemet_model::ImageStatus::Empty;
            return Ok(image);
        }
    };
    let (w, h) = (img.width(), img.height());
    Ok(Image::new(file, Buffer8::new(img.into_raw(), w, h)))
}

/// Whether `path` is a `.iv1`/`.ip1` package archive rather than a loose image file.
fn is_package_path(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref(),
        Some("iv1") | Some("ip1")
    )
}

/// Watches a directory for canonically-named image files and `.iv1`/`.ip1` package archives.
pub struct WatchSource {
    dir: PathBuf,
    one_shot: bool,
    prev: Option<File>,
    pending: VecDeque<PathBuf>,
    /// A package archive currently being drained frame by frame before the next pending path is
    /// considered.
    active_package: Option<PackageSource>,
    watcher: Option<notify::RecommendedWatcher>,
    events: Option<std::sync::mpsc::Receiver<notify::Result<notify::Event>>>,
    quit_sent: bool,
}

impl WatchSource {
    pub fn new(dir: PathBuf, one_shot: bool) -> crate::Result<Self> {
        let (watcher, events) = if one_shot {
            (None, None)
        } else {
            use notify::Watcher;
            let (tx, rx) = std::sync::mpsc::channel();
            let mut watcher = notify::recommended_watcher(tx)
                .map_err(|e| crate::Error::Source(format!("failed to create watcher: {e}")))?;
            watcher
                .watch(&dir, notify::RecursiveMode::Recursive)
                .map_err(|e| crate::Error::Source(format!("failed to watch {}: {e}", dir.display())))?;
            (Some(watcher), Some(rx))
        };
        Ok(Self {
            dir,
            one_shot,
            prev: None,
            pending: VecDeque::new(),
            active_package: None,
            watcher,
            events,
            quit_sent: false,
        })
    }

    /// Lists every regular file under `dir`, parses each as a canonical [`File`] (ignoring
    /// names that don't match), sorts by the total order, and keeps only those newer than the
    /// last file this source has already emitted.
    fn scan(&mut self) -> crate::Result<()> {
        let mut found: Vec<File> = Vec::new();
        for entry in walk(&self.dir)? {
            match File::from_path(&entry) {
                Ok(file) => found.push(file),
                Err(_) => tracing::warn!(path = %entry.display(), "ignoring non-canonical file name"),
            }
        }
        found.sort();
        for file in found {
            if self.prev.as_ref().is_none_or(|prev| file > *prev) {
                self.pending.push_back(file.path.clone());
            }
        }
        Ok(())
    }
}

fn walk(dir: &Path) -> crate::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(d) = stack.pop() {
        for entry in std::fs::read_dir(&d)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.is_file() {
                out.push(path);
            }
        }
    }
    Ok(out)
}

impl Source for WatchSource {
    fn next(&mut self) -> crate::Result<Option<Envelope>> {
        loop {
            if let Some(pkg) = &mut self.active_package {
                match pkg.next()? {
                    Some(env) if env.is_quit() => self.active_package = None,
                    Some(env) => return Ok(Some(env)),
                    None => self.active_package = None,
                }
                continue;
            }

            if let Some(path) = self.pending.pop_front() {
                if is_package_path(&path) {
                    match File::from_path(&path) {
                        Ok(file) => self.prev = Some(file),
                        Err(_) => tracing::warn!(path = %path.display(), "ignoring non-canonical package name"),
                    }
                    match PackageSource::open(&path) {
                        Ok(source) => {
                            self.active_package = Some(source);
                            continue;
                        }
                        Err(err) => {
                            tracing::error!(path = %path.display(), %err, "corrupt package, skipping");
                            continue;
                        }
                    }
                }
                let image = read_frame(&path)?;
                self.prev = Some(image.file.clone());
                return Ok(Some(Envelope::image(image)));
            }

            if self.one_shot {
                if self.quit_sent {
                    return Ok(None);
                }
                self.scan()?;
                if self.pending.is_empty() {
                    self.quit_sent = true;
                    return Ok(Some(Envelope::quit()));
                }
                continue;
            }

            // Indefinite mode: an initial scan picks up whatever is already there, then we
            // block on filesystem events for anything new.
            if self.prev.is_none() {
                self.scan()?;
                if !self.pending.is_empty() {
                    continue;
                }
            }

            let events = self.events.as_ref().expect("watcher channel present in indefinite mode");
            match events.recv() {
                Ok(Ok(event)) if matches!(event.kind, notify::EventKind::Create(_) | notify::EventKind::Modify(_)) => {
                    self.scan()?;
                }
                Ok(Ok(_)) => continue,
                Ok(Err(err)) => tracing::warn!(%err, "watch error"),
                Err(_) => return Ok(None),
            }
        }
    }
}

/// The `data` entry of a `.iv1`/`.ip1` package archive.
#[derive(Debug, serde::Deserialize)]
struct PackageManifest {
    #[allow(dead_code)]
    fps: f32,
    #[allow(dead_code)]
    len: u32,
    images: Vec<String>,
    size: Option<(u32, u32)>,
}

enum FramePayload {
    Raw { path: PathBuf, width: u32, height: u32 },
    Video { decoder: Box<ffmpeg_next::decoder::Video>, input: ffmpeg_next::format::context::Input, stream_index: usize },
}

/// Reads one `.iv1`/`.ip1` archive: a ZIP with a YAML `data` entry and either a raw u8
/// grayscale `images` entry or a video-encoded one.
pub struct PackageSource {
    source_name: String,
    names: VecDeque<String>,
    frame_count: usize,
    payload: FramePayload,
    _tmp: tempfile::TempDir,
    emitted_boundary: bool,
    quit_sent: bool,
}

impl PackageSource {
    pub fn open(path: &Path) -> crate::Result<Self> {
        let source_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let zip_file = std::fs::File::open(path)?;
        let mut archive =
            zip::ZipArchive::new(zip_file).map_err(|e| crate::Error::Package(format!("bad archive: {e}")))?;

        let tmp = tempfile::Builder::new()
            .prefix("icemet-pkg-")
            .tempdir()
            .map_err(|e| crate::Error::Package(format!("failed to create temp dir: {e}")))?;

        let manifest: PackageManifest = {
            let mut entry = archive
                .by_name("data")
                .map_err(|e| crate::Error::Package(format!("missing 'data' entry: {e}")))?;
            serde_yaml::from_reader(&mut entry).map_err(|e| crate::Error::Package(format!("bad manifest: {e}")))?
        };

        let images_path = tmp.path().join("images");
        {
            let mut entry = archive
                .by_name("images")
                .map_err(|e| crate::Error::Package(format!("missing 'images' entry: {e}")))?;
            let mut out = std::fs::File::create(&images_path)?;
            std::io::copy(&mut entry, &mut out)?;
        }

        let payload = if let Some((w, h)) = manifest.size {
            FramePayload::Raw { path: images_path, width: w, height: h }
        } else {
            let input = ffmpeg_next::format::input(&images_path)
                .map_err(|e| crate::Error::Package(format!("failed to open video payload: {e}")))?;
            let stream =
                input.streams().best(ffmpeg_next::media::Type::Video).ok_or_else(|| {
                    crate::Error::Package("video payload has no video stream".to_string())
                })?;
            let stream_index = stream.index();
            let decoder = ffmpeg_next::codec::context::Context::from_parameters(stream.parameters())
                .map_err(|e| crate::Error::Package(format!("failed to build decoder: {e}")))?
                .decoder()
                .video()
                .map_err(|e| crate::Error::Package(format!("not a video decoder: {e}")))?;
            FramePayload::Video { decoder: Box::new(decoder), input, stream_index }
        };

        let frame_count = manifest.images.len();
        Ok(Self {
            source_name,
            names: manifest.images.into(),
            frame_count,
            payload,
            _tmp: tmp,
            emitted_boundary: false,
            quit_sent: false,
        })
    }

    fn next_raw(path: &Path, width: u32, height: u32, offset: u64) -> crate::Result<Buffer8> {
        use std::io::{Read, Seek, SeekFrom};
        let frame_len = (width as u64) * (height as u64);
        let mut file = std::fs::File::open(path)?;
        file.seek(SeekFrom::Start(offset * frame_len))?;
        let mut data = vec![0u8; frame_len as usize];
        file.read_exact(&mut data)?;
        Ok(Buffer8::new(data, width, height))
    }

    fn next_video_frame(
        decoder: &mut ffmpeg_next::decoder::Video,
        input: &mut ffmpeg_next::format::context::Input,
        stream_index: usize,
    ) -> crate::Result<Option<Buffer8>> {
        let mut decoded = ffmpeg_next::frame::Video::empty();
        loop {
            if decoder.receive_frame(&mut decoded).is_ok() {
                let mut scaler = ffmpeg_next::software::scaling::Context::get(
                    decoded.format(),
                    decoded.width(),
                    decoded.height(),
                    ffmpeg_next::format::Pixel::GRAY8,
                    decoded.width(),
                    decoded.height(),
                    ffmpeg_next::software::scaling::Flags::BILINEAR,
                )
                .map_err(|e| crate::Error::Package(format!("scaler init failed: {e}")))?;
                let mut gray = ffmpeg_next::frame::Video::empty();
                scaler.run(&decoded, &mut gray).map_err(|e| crate::Error::Package(format!("scale failed: {e}")))?;
                let (w, h) = (gray.width(), gray.height());
                let stride = gray.stride(0);
                let data = gray.data(0);
                let mut out = vec![0u8; (w * h) as usize];
                for y in 0..h as usize {
                    let row = &data[y * stride..y * stride + w as usize];
                    out[y * w as usize..(y + 1) * w as usize].copy_from_slice(row);
                }
                return Ok(Some(Buffer8::new(out, w, h)));
            }
            match input.packets().next() {
                Some((stream, packet)) if stream.index() == stream_index => {
                    decoder
                        .send_packet(&packet)
                        .map_err(|e| crate::Error::Package(format!("decode failed: {e}")))?;
                }
                Some(_) => continue,
                None => {
                    decoder.send_eof().ok();
                    if decoder.receive_frame(&mut decoded).is_err() {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

impl Source for PackageSource {
    fn next(&mut self) -> crate::Result<Option<Envelope>> {
        if let Some(name) = self.names.pop_front() {
            let file = File::from_name(&name)?;
            let index = self.frame_count - self.names.len() - 1;
            let buf = match &mut self.payload {
                FramePayload::Raw { path, width, height } => {
                    Self::next_raw(path, *width, *height, index as u64)?
                }
                FramePayload::Video { decoder, input, stream_index } => {
                    Self::next_video_frame(decoder, input, *stream_index)?
                        .ok_or_else(|| crate::Error::Package(format!("short video payload at frame {index}")))?
                }
            };
            return Ok(Some(Envelope::image(Image::new(file, buf))));
        }
        if !self.emitted_boundary {
            self.emitted_boundary = true;
            return Ok(Some(Envelope::Package(PackageBoundary {
                source: self.source_name.clone(),
                frame_count: self.frame_count,
            })));
        }
        if !self.quit_sent {
            self.quit_sent = true;
            return Ok(Some(Envelope::quit()));
        }
        Ok(None)
    }
}

/// Replays accepted particles straight from the database into the Stats stage (the `-s`
/// stats-only mode's `Reader → Stats` path). Synthesizes one `Image` per distinct
/// `(sensor, dt, frame)` group, with pixel buffers empty since only the particle measurements
/// are needed downstream.
pub struct DatabaseSource {
    rows: VecDeque<icemet_model::ParticleRow>,
    quit_sent: bool,
}

impl DatabaseSource {
    pub fn new(db: &Database, from: DateTime, to: DateTime) -> crate::Result<Self> {
        let mut rows: VecDeque<_> = db.read_particles(from, to)?.into();
        rows.make_contiguous().sort_by_key(|r| (r.sensor, r.dt, r.frame));
        Ok(Self { rows, quit_sent: false })
    }
}

impl Source for DatabaseSource {
    fn next(&mut self) -> crate::Result<Option<Envelope>> {
        let Some(first) = self.rows.front().cloned() else {
            if self.quit_sent {
                return Ok(None);
            }
            self.quit_sent = true;
            return Ok(Some(Envelope::quit()));
        };

        let file = File::new(first.sensor, first.dt, first.frame, FileStatus::NotEmpty);
        let mut image = Image::new(file, Buffer8::default());
        image.status = icemet_model::ImageStatus::NotEmpty;

        while let Some(row) = self.rows.front() {
            if row.sensor != first.sensor || row.dt != first.dt || row.frame != first.frame {
                break;
            }
            let row = self.rows.pop_front().expect("front just matched");
            image.particles.push(icemet_model::Particle {
                x: row.x as f64,
                y: row.y as f64,
                z: row.z as f64,
                diam: row.equiv_diam as f64,
                diam_corr: row.equiv_diam_corr as f64,
                circularity: row.circularity as f64,
                dyn_range: row.dyn_range,
                eff_px_sz: row.eff_px_sz as f64,
                mask: Vec::new(),
                mask_width: 0,
                mask_height: 0,
            });
        }
        Ok(Some(Envelope::image(image)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_source_one_shot_emits_quit_on_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = WatchSource::new(dir.path().to_path_buf(), true).unwrap();
        let env = source.next().unwrap().unwrap();
        assert!(env.is_quit());
        assert!(source.next().unwrap().is_none());
    }

    #[test]
    fn watch_source_one_shot_emits_files_in_order_then_quit() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0A_180623_140509123_000002_X.png"), png_bytes()).unwrap();
        std::fs::write(dir.path().join("0A_180623_140509123_000001_X.png"), png_bytes()).unwrap();
        std::fs::write(dir.path().join("not-a-canonical-name.png"), png_bytes()).unwrap();

        let mut source = WatchSource::new(dir.path().to_path_buf(), true).unwrap();
        let first = source.next().unwrap().unwrap().into_image().unwrap();
        assert_eq!(first.file.frame, 1);
        let second = source.next().unwrap().unwrap().into_image().unwrap();
        assert_eq!(second.file.frame, 2);
        assert!(source.next().unwrap().unwrap().is_quit());
    }

    fn png_bytes() -> Vec<u8> {
        let img = image::GrayImage::new(2, 2);
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png).unwrap();
        bytes
    }
}

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{new_job_id, JobBoard, JobKind, JobRecord, JobStatus};
use crate::audio::{chunking, stitch, wav};
use crate::config::constants::SUBPROCESS_TIMEOUT_SECS;
use crate::engines::kokoro::{KokoroAdapter, DEFAULT_VOICE};
use crate::error::{ApiError, Result};
use crate::outputs::OutputStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Wav,
    Mp3,
    M4b,
}

impl AudioFormat {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "wav" => Ok(AudioFormat::Wav),
            "mp3" => Ok(AudioFormat::Mp3),
            "m4b" => Ok(AudioFormat::M4b),
            other => Err(ApiError::BadRequest(format!(
                "Unknown audio format '{}': expected wav, mp3 or m4b",
                other
            ))),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::M4b => "m4b",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtitleFormat {
    None,
    Srt,
    Vtt,
}

impl SubtitleFormat {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "none" => Ok(SubtitleFormat::None),
            "srt" => Ok(SubtitleFormat::Srt),
            "vtt" => Ok(SubtitleFormat::Vtt),
            other => Err(ApiError::BadRequest(format!(
                "Unknown subtitle format '{}': expected none, srt or vtt",
                other
            ))),
        }
    }
}

/// A chapter handed over by the document extractor
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Chapter {
    pub title: String,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudiobookRequest {
    #[serde(default)]
    pub text: String,
    /// Chapter list from the extractor; overrides `text` when present
    #[serde(default)]
    pub chapters: Vec<Chapter>,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_format")]
    pub audio_format: String,
    #[serde(default = "default_subtitle")]
    pub subtitle_format: String,
    #[serde(default = "default_max_chars")]
    pub max_chars_per_chunk: usize,
    #[serde(default = "default_crossfade")]
    pub crossfade_ms: u32,
    pub title: Option<String>,
}

fn default_voice() -> String {
    DEFAULT_VOICE.to_string()
}
fn default_speed() -> f32 {
    1.0
}
fn default_format() -> String {
    "wav".to_string()
}
fn default_subtitle() -> String {
    "none".to_string()
}
fn default_max_chars() -> usize {
    1500
}
fn default_crossfade() -> u32 {
    40
}

/// Progress-bearing state of one audiobook job
#[derive(Debug, Clone, Serialize)]
pub struct AudiobookJob {
    pub id: String,
    pub status: JobStatus,
    pub title: String,
    pub voice: String,
    pub audio_format: AudioFormat,
    pub subtitle_format: SubtitleFormat,
    pub total_chunks: usize,
    pub current_chunk: usize,
    pub total_chars: usize,
    pub processed_chars: usize,
    pub chars_per_sec: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eta_formatted: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_chapter: Option<String>,
    pub chapters: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: String,
    pub request_id: String,
}

/// One synthesized chunk's timing, for subtitles and chapter markers
struct Cue {
    start_secs: f64,
    end_secs: f64,
    text: String,
    chapter: usize,
}

/// Tracks audiobook jobs and their cancellation flags
pub struct AudiobookManager {
    jobs: Mutex<HashMap<String, AudiobookJob>>,
    cancel_flags: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl AudiobookManager {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            cancel_flags: Mutex::new(HashMap::new()),
        }
    }

    /// Validate an audiobook request and spawn its worker
    pub fn submit(
        self: &Arc<Self>,
        board: &Arc<JobBoard>,
        kokoro: &Arc<KokoroAdapter>,
        outputs: &Arc<OutputStore>,
        req: AudiobookRequest,
        request_id: &str,
    ) -> Result<String> {
        let audio_format = AudioFormat::parse(&req.audio_format)?;
        let subtitle_format = SubtitleFormat::parse(&req.subtitle_format)?;

        let chapters: Vec<Chapter> = if req.chapters.is_empty() {
            vec![Chapter {
                title: req.title.clone().unwrap_or_else(|| "Audiobook".to_string()),
                text: req.text.clone(),
            }]
        } else {
            req.chapters.clone()
        };

        // Chapter-aware chunking up front so totals are known before work starts
        let mut chunk_plan: Vec<(usize, String)> = Vec::new();
        for (chapter_idx, chapter) in chapters.iter().enumerate() {
            for chunk in chunking::chunk_text(&chapter.text, req.max_chars_per_chunk.max(1), true)
            {
                chunk_plan.push((chapter_idx, chunk));
            }
        }
        if chunk_plan.is_empty() {
            return Err(ApiError::BadRequest("Text cannot be empty".to_string()));
        }
        if audio_format != AudioFormat::Wav {
            // Encoded outputs need ffmpeg; fail before accepting the job
            which::which("ffmpeg").map_err(|_| {
                ApiError::ServiceUnavailable(
                    "mp3/m4b output needs ffmpeg on PATH; install ffmpeg".to_string(),
                )
            })?;
        }
        kokoro.ensure_ready()?;

        let voice = KokoroAdapter::resolve_voice(&req.voice).to_string();
        let total_chars: usize = chunk_plan.iter().map(|(_, c)| c.chars().count()).sum();
        let id = new_job_id();

        let job = AudiobookJob {
            id: id.clone(),
            status: JobStatus::Started,
            title: req
                .title
                .clone()
                .unwrap_or_else(|| format!("Audiobook ({} chars)", total_chars)),
            voice: voice.clone(),
            audio_format,
            subtitle_format,
            total_chunks: chunk_plan.len(),
            current_chunk: 0,
            total_chars,
            processed_chars: 0,
            chars_per_sec: 0.0,
            eta_seconds: None,
            eta_formatted: None,
            current_chapter: None,
            chapters: chapters.iter().map(|c| c.title.clone()).collect(),
            output_path: None,
            audio_url: None,
            subtitle_path: None,
            subtitle_url: None,
            error: None,
            created_at: Utc::now().to_rfc3339(),
            request_id: request_id.to_string(),
        };

        let cancel = Arc::new(AtomicBool::new(false));
        self.jobs.lock().unwrap().insert(id.clone(), job);
        self.cancel_flags
            .lock()
            .unwrap()
            .insert(id.clone(), Arc::clone(&cancel));

        tracing::info!(
            job_id = %id,
            chunks = chunk_plan.len(),
            chars = total_chars,
            format = ?audio_format,
            "Audiobook job accepted"
        );

        let manager = Arc::clone(self);
        let board = Arc::clone(board);
        let kokoro = Arc::clone(kokoro);
        let outputs = Arc::clone(outputs);
        let worker_id = id.clone();
        let speed = req.speed;
        let crossfade_ms = req.crossfade_ms;
        tokio::task::spawn_blocking(move || {
            let outcome = run_job(
                &manager,
                &kokoro,
                &outputs,
                &worker_id,
                &voice,
                speed,
                crossfade_ms,
                audio_format,
                subtitle_format,
                &chapters,
                &chunk_plan,
                &cancel,
            );

            let status = match &outcome {
                Ok(true) => JobStatus::Completed,
                Ok(false) => JobStatus::Cancelled,
                Err(_) => JobStatus::Failed,
            };
            let error = outcome.err().map(|e| e.to_string());
            manager.set_terminal(&worker_id, status, error.clone());
            manager.cancel_flags.lock().unwrap().remove(&worker_id);

            // Mirror the terminal state into the shared job history
            if let Some(job) = manager.status(&worker_id) {
                let mut record = JobRecord::new(JobKind::Audiobook, "kokoro", "tts", &job.request_id);
                record.id = job.id.clone();
                record.status = status;
                record.title = job.title.clone();
                record.chars = job.total_chars;
                record.voice = Some(job.voice.clone());
                record.output_path = job.output_path.clone();
                record.audio_url = job.audio_url.clone();
                record.error = error;
                board.record_terminal(record);
            }
        });

        Ok(id)
    }

    pub fn status(&self, id: &str) -> Option<AudiobookJob> {
        self.jobs.lock().unwrap().get(id).cloned()
    }

    /// Jobs newest-first for the list endpoint
    pub fn list(&self) -> Vec<AudiobookJob> {
        let mut jobs: Vec<AudiobookJob> = self.jobs.lock().unwrap().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        jobs
    }

    /// Request cancellation; honored at the next chunk boundary
    pub fn cancel(&self, id: &str) -> Result<AudiobookJob> {
        let job = self
            .status(id)
            .ok_or_else(|| ApiError::NotFound(format!("Audiobook job '{}' not found", id)))?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        if let Some(flag) = self.cancel_flags.lock().unwrap().get(id) {
            flag.store(true, Ordering::SeqCst);
        }
        tracing::info!(job_id = %id, "Audiobook cancellation requested");
        Ok(job)
    }

    /// Drop a job record and its artifacts
    pub fn delete(&self, id: &str) -> Result<()> {
        let job = self
            .jobs
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| ApiError::NotFound(format!("Audiobook job '{}' not found", id)))?;
        if let Some(flag) = self.cancel_flags.lock().unwrap().get(id) {
            flag.store(true, Ordering::SeqCst);
        }
        for path in [job.output_path, job.subtitle_path].into_iter().flatten() {
            if let Err(e) = std::fs::remove_file(&path) {
                tracing::debug!(path = %path.display(), error = %e, "Audiobook artifact already gone");
            }
        }
        Ok(())
    }

    fn update(&self, id: &str, f: impl FnOnce(&mut AudiobookJob)) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(job) = jobs.get_mut(id) {
            if !job.status.is_terminal() {
                f(job);
            }
        }
    }

    fn set_terminal(&self, id: &str, status: JobStatus, error: Option<String>) {
        self.update(id, |job| {
            job.status = status;
            job.error = error;
            if status == JobStatus::Completed {
                job.eta_seconds = Some(0.0);
                job.eta_formatted = Some(format_eta(0.0));
            }
        });
    }
}

impl Default for AudiobookManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Sequentially synthesize, stitch, encode and caption one audiobook
///
/// Returns Ok(true) on completion, Ok(false) when cancelled at a chunk
/// boundary.
#[allow(clippy::too_many_arguments)]
fn run_job(
    manager: &AudiobookManager,
    kokoro: &KokoroAdapter,
    outputs: &OutputStore,
    id: &str,
    voice: &str,
    speed: f32,
    crossfade_ms: u32,
    audio_format: AudioFormat,
    subtitle_format: SubtitleFormat,
    chapters: &[Chapter],
    chunk_plan: &[(usize, String)],
    cancel: &AtomicBool,
) -> Result<bool> {
    let started = Instant::now();
    manager.update(id, |job| job.status = JobStatus::Processing);

    let mut rendered: Vec<Vec<f32>> = Vec::with_capacity(chunk_plan.len());
    let mut cues: Vec<Cue> = Vec::with_capacity(chunk_plan.len());
    let mut sample_rate: Option<u32> = None;
    let mut processed_chars = 0usize;
    let total_chars: usize = chunk_plan.iter().map(|(_, c)| c.chars().count()).sum();
    let mut clock_secs = 0.0f64;

    for (index, (chapter_idx, chunk)) in chunk_plan.iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            tracing::info!(job_id = %id, chunk = index, "Audiobook cancelled at chunk boundary");
            return Ok(false);
        }

        let audio = kokoro.synthesize_chunk(chunk, voice, speed)?;
        if audio.is_empty() {
            continue;
        }
        let samples = match sample_rate {
            None => {
                sample_rate = Some(audio.sample_rate);
                audio.samples
            }
            Some(sr) if sr != audio.sample_rate => {
                stitch::resample(&audio.samples, audio.sample_rate, sr)
            }
            Some(_) => audio.samples,
        };
        let sr = sample_rate.unwrap();

        // Crossfades eat into chunk duration; cue math mirrors the merge
        let chunk_secs = samples.len() as f64 / f64::from(sr);
        let overlap_secs = if rendered.is_empty() {
            0.0
        } else {
            let overlap = ((crossfade_ms as u64 * sr as u64) / 1000) as usize;
            overlap.min(samples.len()) as f64 / f64::from(sr)
        };
        let start = (clock_secs - overlap_secs).max(0.0);
        clock_secs = start + chunk_secs;
        cues.push(Cue {
            start_secs: start,
            end_secs: clock_secs,
            text: chunk.clone(),
            chapter: *chapter_idx,
        });
        rendered.push(samples);

        processed_chars += chunk.chars().count();
        let elapsed = started.elapsed().as_secs_f64().max(0.001);
        let cps = processed_chars as f64 / elapsed;
        let remaining = total_chars.saturating_sub(processed_chars) as f64;
        let eta = if cps > 0.0 { remaining / cps } else { 0.0 };
        let chapter_title = chapters.get(*chapter_idx).map(|c| c.title.clone());
        manager.update(id, |job| {
            job.current_chunk = index + 1;
            job.processed_chars = processed_chars;
            job.chars_per_sec = cps;
            job.eta_seconds = Some(eta);
            job.eta_formatted = Some(format_eta(eta));
            job.current_chapter = chapter_title;
        });
    }

    let sample_rate =
        sample_rate.ok_or_else(|| ApiError::Internal("No audio generated".to_string()))?;
    let merged = stitch::merge_chunks(&rendered, sample_rate, crossfade_ms)?;

    let out_dir = outputs.dir();
    std::fs::create_dir_all(&out_dir)?;
    let wav_path = out_dir.join(format!("audiobook-{}.wav", id));
    wav::write_pcm16(&wav_path, &merged, sample_rate)?;

    let final_path = match audio_format {
        AudioFormat::Wav => wav_path.clone(),
        AudioFormat::Mp3 => {
            let target = out_dir.join(format!("audiobook-{}.mp3", id));
            encode_mp3(&wav_path, &target)?;
            let _ = std::fs::remove_file(&wav_path);
            target
        }
        AudioFormat::M4b => {
            let target = out_dir.join(format!("audiobook-{}.m4b", id));
            encode_m4b(&wav_path, &target, chapters, &cues)?;
            let _ = std::fs::remove_file(&wav_path);
            target
        }
    };

    let mut subtitle_path = None;
    match subtitle_format {
        SubtitleFormat::None => {}
        SubtitleFormat::Srt => {
            let path = out_dir.join(format!("audiobook-{}.srt", id));
            std::fs::write(&path, build_srt(&cues))?;
            subtitle_path = Some(path);
        }
        SubtitleFormat::Vtt => {
            let path = out_dir.join(format!("audiobook-{}.vtt", id));
            std::fs::write(&path, build_vtt(&cues))?;
            subtitle_path = Some(path);
        }
    }

    let file_name = final_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let subtitle_url = subtitle_path
        .as_ref()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .map(|n| format!("/audio/{}", n));
    manager.update(id, |job| {
        job.output_path = Some(final_path.clone());
        job.audio_url = Some(format!("/audio/{}", file_name));
        job.subtitle_path = subtitle_path.clone();
        job.subtitle_url = subtitle_url.clone();
    });

    tracing::info!(
        job_id = %id,
        output = %final_path.display(),
        duration_secs = merged.len() as f64 / f64::from(sample_rate),
        "Audiobook completed"
    );
    Ok(true)
}

/// Human-readable remaining time ("2m 05s")
pub fn format_eta(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    if total >= 3600 {
        format!("{}h {:02}m", total / 3600, (total % 3600) / 60)
    } else if total >= 60 {
        format!("{}m {:02}s", total / 60, total % 60)
    } else {
        format!("{}s", total)
    }
}

fn format_timestamp(secs: f64, separator: char) -> String {
    let millis = (secs.max(0.0) * 1000.0).round() as u64;
    format!(
        "{:02}:{:02}:{:02}{}{:03}",
        millis / 3_600_000,
        (millis % 3_600_000) / 60_000,
        (millis % 60_000) / 1000,
        separator,
        millis % 1000
    )
}

fn build_srt(cues: &[Cue]) -> String {
    let mut out = String::new();
    for (i, cue) in cues.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_timestamp(cue.start_secs, ','),
            format_timestamp(cue.end_secs, ','),
            cue.text.trim()
        ));
    }
    out
}

fn build_vtt(cues: &[Cue]) -> String {
    let mut out = String::from("WEBVTT\n\n");
    for cue in cues {
        out.push_str(&format!(
            "{} --> {}\n{}\n\n",
            format_timestamp(cue.start_secs, '.'),
            format_timestamp(cue.end_secs, '.'),
            cue.text.trim()
        ));
    }
    out
}

fn encode_mp3(input: &Path, output: &Path) -> Result<()> {
    let input = input.to_string_lossy().into_owned();
    let output = output.to_string_lossy().into_owned();
    run_ffmpeg(&[
        "-y",
        "-i",
        input.as_str(),
        "-codec:a",
        "libmp3lame",
        "-qscale:a",
        "4",
        output.as_str(),
    ])
}

fn encode_m4b(input: &Path, output: &Path, chapters: &[Chapter], cues: &[Cue]) -> Result<()> {
    // Chapter markers travel through an ffmetadata side file
    let mut metadata = String::from(";FFMETADATA1\n");
    for (idx, chapter) in chapters.iter().enumerate() {
        let start = cues
            .iter()
            .find(|c| c.chapter == idx)
            .map(|c| c.start_secs)
            .unwrap_or(0.0);
        let end = cues
            .iter()
            .rev()
            .find(|c| c.chapter == idx)
            .map(|c| c.end_secs)
            .unwrap_or(start);
        metadata.push_str(&format!(
            "[CHAPTER]\nTIMEBASE=1/1000\nSTART={}\nEND={}\ntitle={}\n",
            (start * 1000.0).round() as u64,
            (end * 1000.0).round() as u64,
            chapter.title.replace('\n', " ")
        ));
    }
    let meta_path = output.with_extension("ffmeta");
    std::fs::write(&meta_path, metadata)?;

    let input_arg = input.to_string_lossy().into_owned();
    let meta_arg = meta_path.to_string_lossy().into_owned();
    let output_arg = output.to_string_lossy().into_owned();
    let result = run_ffmpeg(&[
        "-y",
        "-i",
        input_arg.as_str(),
        "-i",
        meta_arg.as_str(),
        "-map_metadata",
        "1",
        "-c:a",
        "aac",
        "-b:a",
        "96k",
        output_arg.as_str(),
    ]);
    let _ = std::fs::remove_file(&meta_path);
    result
}

/// Run ffmpeg under the configured subprocess timeout
fn run_ffmpeg(args: &[&str]) -> Result<()> {
    let ffmpeg = which::which("ffmpeg").map_err(|_| {
        ApiError::ServiceUnavailable(
            "mp3/m4b output needs ffmpeg on PATH; install ffmpeg".to_string(),
        )
    })?;

    let mut child = std::process::Command::new(ffmpeg)
        .args(args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|e| ApiError::Internal(format!("ffmpeg failed to start: {}", e)))?;

    let deadline = Instant::now() + Duration::from_secs(SUBPROCESS_TIMEOUT_SECS);
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if status.success() {
                    return Ok(());
                }
                return Err(ApiError::Internal(format!("ffmpeg exited with {}", status)));
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ApiError::Internal(format!(
                        "ffmpeg timed out after {}s",
                        SUBPROCESS_TIMEOUT_SECS
                    )));
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => return Err(ApiError::Internal(format!("ffmpeg wait failed: {}", e))),
        }
    }
}

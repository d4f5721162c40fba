//! In-memory PCM audio
//!
//! `AudioBuffer` holds interleaved `f32` samples. Clips come in whatever
//! format the synthesis service produced and are brought to the canonical
//! speech-track format before they reach the merge buffer.

use std::fs::File;
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{DubSyncError, Result};

const RESAMPLE_CHUNK: usize = 1024;

/// Interleaved PCM samples with their layout
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
    channels: u16,
}

impl AudioBuffer {
    /// Wrap interleaved samples; a trailing partial frame is dropped
    pub fn from_interleaved(mut samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Empty buffer in the given layout
    pub fn empty(sample_rate: u32, channels: u16) -> Self {
        Self::from_interleaved(Vec::new(), sample_rate, channels)
    }

    /// Digital silence lasting `duration_ms`
    pub fn silence(duration_ms: u64, sample_rate: u32, channels: u16) -> Self {
        let frames = frames_for_ms(duration_ms, sample_rate);
        Self::from_interleaved(vec![0.0; frames * channels.max(1) as usize], sample_rate, channels)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Number of sample frames
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Duration in whole milliseconds, rounded down
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.frames() as u64 * 1000 / self.sample_rate as u64
    }

    /// Whole milliseconds needed to hold every frame, rounded up
    pub fn span_ms(&self) -> u64 {
        ms_for_frames(self.frames() as u64, self.sample_rate)
    }

    /// Append a buffer of the same layout
    pub fn append(&mut self, other: &AudioBuffer) -> Result<()> {
        if other.sample_rate != self.sample_rate || other.channels != self.channels {
            return Err(DubSyncError::AudioProcessing(format!(
                "cannot append {} Hz/{} ch audio to {} Hz/{} ch buffer",
                other.sample_rate, other.channels, self.sample_rate, self.channels
            )));
        }
        self.samples.extend_from_slice(&other.samples);
        Ok(())
    }

    /// Convert to the given sample rate and channel count
    pub fn to_format(&self, sample_rate: u32, channels: u16) -> Result<AudioBuffer> {
        if sample_rate == 0 || channels == 0 {
            return Err(DubSyncError::AudioProcessing(
                "target sample rate and channel count must be positive".to_string(),
            ));
        }
        if self.sample_rate == sample_rate && self.channels == channels {
            return Ok(self.clone());
        }

        let planar = remix(&self.deinterleave(), channels as usize);
        let planar = resample(planar, self.sample_rate, sample_rate)?;
        Ok(interleave(&planar, sample_rate, channels))
    }

    fn deinterleave(&self) -> Vec<Vec<f32>> {
        let channels = self.channels as usize;
        let mut planar = vec![Vec::with_capacity(self.frames()); channels];
        for frame in self.samples.chunks_exact(channels) {
            for (ch, sample) in frame.iter().enumerate() {
                planar[ch].push(*sample);
            }
        }
        planar
    }

    /// Decode an audio file; WAV goes through hound, everything else through symphonia
    pub fn decode_file(path: &Path) -> Result<AudioBuffer> {
        if !path.exists() {
            return Err(DubSyncError::FileNotFound(path.display().to_string()));
        }

        let is_wav = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);

        if is_wav {
            match decode_wav(path) {
                Ok(buffer) => return Ok(buffer),
                // Some services send WAV headers hound refuses (e.g. streaming sizes)
                Err(e) => log::debug!("hound rejected {}: {}, retrying with symphonia", path.display(), e),
            }
        }
        decode_with_symphonia(path)
    }

    /// Write the buffer as a 16-bit PCM WAV file
    pub fn write_wav(&self, path: &Path) -> Result<()> {
        let mut writer = WavWriter::create(path, wav_spec(self.sample_rate, self.channels))?;
        for sample in &self.samples {
            writer.write_sample(to_i16(*sample))?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Append the samples to a WAV file, creating it if needed.
    ///
    /// An existing file must have this buffer's layout.
    pub fn append_to_wav(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return self.write_wav(path);
        }

        let existing = WavReader::open(path)?.spec();
        if existing != wav_spec(self.sample_rate, self.channels) {
            return Err(DubSyncError::AudioProcessing(format!(
                "{} has layout {:?}, expected {} Hz/{} ch 16-bit",
                path.display(),
                existing,
                self.sample_rate,
                self.channels
            )));
        }

        let mut writer = WavWriter::append(path)?;
        for sample in &self.samples {
            writer.write_sample(to_i16(*sample))?;
        }
        writer.finalize()?;
        Ok(())
    }
}

/// Smallest number of frames covering `duration_ms` at `sample_rate`
pub fn frames_for_ms(duration_ms: u64, sample_rate: u32) -> usize {
    (duration_ms * sample_rate as u64).div_ceil(1000) as usize
}

/// Whole milliseconds covering `frames` at `sample_rate`, rounded up
pub fn ms_for_frames(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (frames * 1000).div_ceil(sample_rate as u64)
}

fn wav_spec(sample_rate: u32, channels: u16) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16
}

fn decode_wav(path: &Path) -> Result<AudioBuffer> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    Ok(AudioBuffer::from_interleaved(samples, spec.sample_rate, spec.channels))
}

fn decode_with_symphonia(path: &Path) -> Result<AudioBuffer> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    let detected = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| {
            DubSyncError::AudioProcessing(format!("unsupported audio {}: {}", path.display(), e))
        })?;

    let mut format = detected.format;
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| {
            DubSyncError::AudioProcessing(format!("no audio track in {}", path.display()))
        })?;

    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| DubSyncError::AudioProcessing(format!("no decoder for {}: {}", path.display(), e)))?;

    let mut samples = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                return Err(DubSyncError::AudioProcessing(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                log::warn!("Skipping undecodable packet in {}: {}", path.display(), e);
            }
            Err(e) => {
                return Err(DubSyncError::AudioProcessing(format!(
                    "failed to decode {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }

    if sample_rate == 0 || channels == 0 {
        return Err(DubSyncError::AudioProcessing(format!(
            "{} carries no decodable audio",
            path.display()
        )));
    }

    Ok(AudioBuffer::from_interleaved(samples, sample_rate, channels))
}

/// Map planar audio onto `target` channels
fn remix(planar: &[Vec<f32>], target: usize) -> Vec<Vec<f32>> {
    let source = planar.len();
    if source == target {
        return planar.to_vec();
    }
    let frames = planar.first().map(|ch| ch.len()).unwrap_or(0);

    if target == 1 {
        let mut mono = vec![0.0; frames];
        for ch in planar {
            for (acc, sample) in mono.iter_mut().zip(ch) {
                *acc += sample / source as f32;
            }
        }
        return vec![mono];
    }

    // Mono is spread to every output; wider sources keep their first channels
    (0..target)
        .map(|ch| planar[ch.min(source - 1)].clone())
        .collect()
}

fn resample(planar: Vec<Vec<f32>>, from: u32, to: u32) -> Result<Vec<Vec<f32>>> {
    let channels = planar.len();
    let input_frames = planar.first().map(|ch| ch.len()).unwrap_or(0);
    if from == to || input_frames == 0 {
        return Ok(planar);
    }

    let ratio = to as f64 / from as f64;
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, channels)
        .map_err(|e| DubSyncError::AudioProcessing(format!("resampler setup failed: {}", e)))?;

    let expected = (input_frames as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut output = vec![Vec::with_capacity(expected + delay); channels];
    let mut position = 0;

    // The tail is zero padded until the delayed output covers every input frame
    while output[0].len() < expected + delay {
        let needed = resampler.input_frames_next();
        let block: Vec<Vec<f32>> = planar
            .iter()
            .map(|ch| {
                let mut chunk = vec![0.0; needed];
                if position < ch.len() {
                    let end = (position + needed).min(ch.len());
                    chunk[..end - position].copy_from_slice(&ch[position..end]);
                }
                chunk
            })
            .collect();
        position += needed;

        let processed = resampler
            .process(&block, None)
            .map_err(|e| DubSyncError::AudioProcessing(format!("resampling failed: {}", e)))?;
        for (out, chunk) in output.iter_mut().zip(processed) {
            out.extend_from_slice(&chunk);
        }
    }

    for out in output.iter_mut() {
        out.drain(..delay);
        out.truncate(expected);
    }
    Ok(output)
}

fn interleave(planar: &[Vec<f32>], sample_rate: u32, channels: u16) -> AudioBuffer {
    let frames = planar.first().map(|ch| ch.len()).unwrap_or(0);
    let mut samples = Vec::with_capacity(frames * planar.len());
    for frame in 0..frames {
        for ch in planar {
            samples.push(ch[frame]);
        }
    }
    AudioBuffer::from_interleaved(samples, sample_rate, channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(frames: usize, sample_rate: u32) -> Vec<f32> {
        (0..frames)
            .map(|i| (i as f32 * 440.0 * 2.0 * std::f32::consts::PI / sample_rate as f32).sin() * 0.5)
            .collect()
    }

    #[test]
    fn test_silence_duration() {
        let silence = AudioBuffer::silence(100, 48_000, 2);
        assert_eq!(silence.frames(), 4_800);
        assert_eq!(silence.samples().len(), 9_600);
        assert_eq!(silence.duration_ms(), 100);
        assert!(silence.samples().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_span_covers_partial_milliseconds() {
        let clip = AudioBuffer::from_interleaved(vec![0.0; 16_015], 16_000, 1);
        assert_eq!(clip.duration_ms(), 1_000);
        assert_eq!(clip.span_ms(), 1_001);
        assert_eq!(AudioBuffer::silence(250, 16_000, 1).span_ms(), 250);

        // 1ms at 44.1 kHz is 44.1 frames
        assert_eq!(frames_for_ms(1, 44_100), 45);
        assert_eq!(frames_for_ms(1_000, 44_100), 44_100);
        assert_eq!(ms_for_frames(45, 44_100), 2);
    }

    #[test]
    fn test_loud_samples_are_clamped_when_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loud.wav");
        AudioBuffer::from_interleaved(vec![1.5, -2.0, 0.5], 8_000, 1)
            .write_wav(&path)
            .unwrap();
        let decoded = AudioBuffer::decode_file(&path).unwrap();
        assert!((decoded.samples()[0] - 1.0).abs() < 1e-3);
        assert!((decoded.samples()[1] + 1.0).abs() < 1e-3);
        assert!((decoded.samples()[2] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_append_requires_same_layout() {
        let mut a = AudioBuffer::silence(10, 48_000, 2);
        let b = AudioBuffer::silence(20, 48_000, 2);
        a.append(&b).unwrap();
        assert_eq!(a.duration_ms(), 30);

        let mono = AudioBuffer::silence(10, 48_000, 1);
        assert!(a.append(&mono).is_err());
    }

    #[test]
    fn test_mono_to_stereo_same_rate() {
        let mono = AudioBuffer::from_interleaved(vec![0.1, 0.2, 0.3], 48_000, 1);
        let stereo = mono.to_format(48_000, 2).unwrap();
        assert_eq!(stereo.samples(), &[0.1, 0.1, 0.2, 0.2, 0.3, 0.3]);
    }

    #[test]
    fn test_stereo_to_mono_averages() {
        let stereo = AudioBuffer::from_interleaved(vec![0.2, 0.4, -1.0, 1.0], 16_000, 2);
        let mono = stereo.to_format(16_000, 1).unwrap();
        assert_eq!(mono.frames(), 2);
        assert!((mono.samples()[0] - 0.3).abs() < 1e-6);
        assert!(mono.samples()[1].abs() < 1e-6);
    }

    #[test]
    fn test_resample_preserves_duration() {
        let source = AudioBuffer::from_interleaved(sine(44_100, 44_100), 44_100, 1);
        let converted = source.to_format(48_000, 2).unwrap();
        assert_eq!(converted.sample_rate(), 48_000);
        assert_eq!(converted.channels(), 2);
        assert_eq!(converted.frames(), 48_000);
        assert_eq!(converted.duration_ms(), 1_000);
        // The signal survives the conversion
        let peak = converted.samples().iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.3, "peak {}", peak);
    }

    #[test]
    fn test_wav_round_trip_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.wav");

        let first = AudioBuffer::from_interleaved(sine(480, 48_000).repeat(2), 48_000, 2);
        first.write_wav(&path).unwrap();
        let second = AudioBuffer::silence(10, 48_000, 2);
        second.append_to_wav(&path).unwrap();

        let decoded = AudioBuffer::decode_file(&path).unwrap();
        assert_eq!(decoded.sample_rate(), 48_000);
        assert_eq!(decoded.channels(), 2);
        assert_eq!(decoded.frames(), first.frames() + second.frames());
        // 16-bit quantization
        for (got, want) in decoded.samples().iter().zip(first.samples()) {
            assert!((got - want).abs() < 1e-4, "{} vs {}", got, want);
        }
    }

    #[test]
    fn test_append_to_wav_rejects_other_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.wav");
        AudioBuffer::silence(10, 48_000, 2).write_wav(&path).unwrap();
        let mono = AudioBuffer::silence(10, 44_100, 1);
        assert!(matches!(
            mono.append_to_wav(&path),
            Err(DubSyncError::AudioProcessing(_))
        ));
    }

    #[test]
    fn test_decode_int_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("int.wav");
        let spec = WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(&path, spec).unwrap();
        for _ in 0..2_205 {
            writer.write_sample(i16::MAX / 2).unwrap();
        }
        writer.finalize().unwrap();

        let decoded = AudioBuffer::decode_file(&path).unwrap();
        assert_eq!(decoded.duration_ms(), 100);
        assert!((decoded.samples()[0] - 0.5).abs() < 0.01);
    }

    #[test]
    fn test_decode_missing_file() {
        let result = AudioBuffer::decode_file(Path::new("/nonexistent/clip.wav"));
        assert!(matches!(result, Err(DubSyncError::FileNotFound(_))));
    }
}

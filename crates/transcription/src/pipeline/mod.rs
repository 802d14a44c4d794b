pub mod convert;
pub mod wav_reader;

pub use convert::{
    AudioConverter, AutoConverter, FfmpegConverter, WavNormalizer, detect_duration_secs,
};
pub use wav_reader::{read_wav_16k_mono, wav_duration_secs, write_wav_mono};

/// Sample rate of every normalized waveform the pipeline produces.
pub const SAMPLE_RATE: u32 = 16000;

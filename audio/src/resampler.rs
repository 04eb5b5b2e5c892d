use samplerate::{convert, ConverterType, Samplerate};

/// Convert s16le bytes to f32 samples in [-1.0, 1.0]. A trailing odd byte is ignored.
pub fn s16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
        .collect()
}

/// Convert f32 samples to s16le bytes, clamping out-of-range values
pub fn f32_to_s16le(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        let clamped = sample.clamp(-1.0, 1.0);
        bytes.extend_from_slice(&((clamped * 32767.0) as i16).to_le_bytes());
    }
    bytes
}

/// Stateless mono resampler backed by libsamplerate
#[derive(Debug, Clone, Copy)]
pub struct Resampler {
    input_rate: u32,
    output_rate: u32,
    quality: ConverterType,
}

impl Resampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Self {
        Self {
            input_rate,
            output_rate,
            quality: ConverterType::SincMediumQuality,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.input_rate == self.output_rate
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    /// Resample mono f32 samples
    pub fn process(&self, samples: &[f32]) -> Result<Vec<f32>, samplerate::Error> {
        if self.is_passthrough() || samples.is_empty() {
            return Ok(samples.to_vec());
        }
        convert(self.input_rate, self.output_rate, 1, self.quality, samples)
    }

    /// Approximate output length for `input_len` samples
    pub fn expected_output_len(&self, input_len: usize) -> usize {
        let ratio = self.output_rate as f64 / self.input_rate as f64;
        (input_len as f64 * ratio) as usize
    }
}

/// Mono resampler for a continuous stream.
///
/// One converter lives for the whole stream so filter history carries across
/// buffers. Not `Send`; create it on the thread that feeds it.
pub struct StreamResampler {
    converter: Option<Samplerate>,
}

impl StreamResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Result<Self, samplerate::Error> {
        let converter = if input_rate == output_rate {
            None
        } else {
            Some(Samplerate::new(
                ConverterType::SincFastest,
                input_rate,
                output_rate,
                1,
            )?)
        };
        Ok(Self { converter })
    }

    pub fn is_passthrough(&self) -> bool {
        self.converter.is_none()
    }

    /// Resample the next buffer of the stream
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, samplerate::Error> {
        match &self.converter {
            Some(converter) if !samples.is_empty() => converter.process(samples),
            _ => Ok(samples.to_vec()),
        }
    }
}

//! Voice activity gate: speech/silence classification over a captured chunk.
//! The variant is picked once at construction from `use_vad`; call sites never check for VAD support.

use earshot::{VoiceActivityDetector, VoiceActivityProfile};
use tracing::{debug, info};

use crate::config::{HotwordConfig, VAD_SAMPLE_RATE};
use crate::error::{HotwordError, Result};

/// Samples per VAD frame: 30ms at 16kHz.
pub const VAD_FRAME_SAMPLES: usize = 480;

/// Speech/silence gate over a chunk of mono i16 PCM.
pub trait VoiceGate: Send {
    /// Whether the chunk contains speech.
    fn is_speech(&mut self, samples: &[i16]) -> bool;

    /// Reset internal model state between cycles.
    fn reset(&mut self) {}

    /// True when the gate does not classify at all. Chunks it passes may be ambient
    /// noise, so their levels must not raise the threshold of the cycle they belong to.
    fn is_pass_through(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;
}

/// Pass-through gate used when VAD is disabled: every chunk counts as speech.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysSpeech;

impl VoiceGate for AlwaysSpeech {
    #[inline]
    fn is_speech(&mut self, _samples: &[i16]) -> bool {
        true
    }

    fn is_pass_through(&self) -> bool {
        true
    }

    fn name(&self) -> &'static str {
        "always_speech"
    }
}

/// Model-backed gate on top of earshot's WebRTC-style detector.
pub struct EarshotGate {
    detector: VoiceActivityDetector,
    aggressiveness: u8,
}

impl EarshotGate {
    /// Aggressiveness follows the WebRTC scale: 0 is the most permissive, 3 filters hardest.
    pub fn new(sample_rate: u32, aggressiveness: u8) -> Result<Self> {
        if sample_rate != VAD_SAMPLE_RATE {
            return Err(HotwordError::config(
                "MIC_SAMPLE_RATE",
                format!("voice activity detection requires {VAD_SAMPLE_RATE} Hz, got {sample_rate}"),
            ));
        }
        let profile = match aggressiveness {
            0 => VoiceActivityProfile::QUALITY,
            1 => VoiceActivityProfile::LBR,
            2 => VoiceActivityProfile::AGGRESSIVE,
            3 => VoiceActivityProfile::VERY_AGGRESSIVE,
            other => {
                return Err(HotwordError::config(
                    "STT_VAD_AGGRESSIVENESS",
                    format!("must be between 0 and 3, got {other}"),
                ))
            }
        };
        Ok(Self {
            detector: VoiceActivityDetector::new(profile),
            aggressiveness,
        })
    }

    pub fn aggressiveness(&self) -> u8 {
        self.aggressiveness
    }
}

impl VoiceGate for EarshotGate {
    /// Splits the chunk into 30ms frames; any speech frame marks the chunk as speech.
    /// A trailing partial frame is zero-padded. Model errors count as speech.
    fn is_speech(&mut self, samples: &[i16]) -> bool {
        if samples.is_empty() {
            return false;
        }
        let mut frame = [0i16; VAD_FRAME_SAMPLES];
        for chunk in samples.chunks(VAD_FRAME_SAMPLES) {
            frame[..chunk.len()].copy_from_slice(chunk);
            frame[chunk.len()..].fill(0);
            match self.detector.predict_16khz(&frame[..]) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(_) => {
                    debug!("vad_predict_failed_counting_as_speech");
                    return true;
                }
            }
        }
        false
    }

    fn reset(&mut self) {
        self.detector.reset();
    }

    fn name(&self) -> &'static str {
        "earshot_vad"
    }
}

/// Build the gate selected by the configuration.
pub fn gate_from_config(cfg: &HotwordConfig) -> Result<Box<dyn VoiceGate>> {
    let gate: Box<dyn VoiceGate> = if cfg.use_vad {
        Box::new(EarshotGate::new(cfg.sample_rate, cfg.vad_aggressiveness)?)
    } else {
        Box::new(AlwaysSpeech)
    };
    info!(gate = gate.name(), "voice_gate_selected");
    Ok(gate)
}

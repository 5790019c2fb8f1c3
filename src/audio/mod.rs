//! Audio pipeline shared by both legs of a call.

pub mod codec;
pub mod resample;

pub use codec::{MULAW_SILENCE, SilenceGate, decode, encode, is_silent};
pub use resample::{
    ExternalResampler, REALTIME_RATE, ResampleStrategy, Resampler, TELEPHONY_RATE, linear_resample,
    output_len,
};

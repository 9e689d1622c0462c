//! Realtime software mixer backing a legacy "create a sound buffer,
//! fill it, play it" API. Producers (arbitrary threads) allocate
//! [`PlaybackObject`]s, lock/unlock them to fill PCM data, and issue
//! play/stop/volume commands; a single realtime thread ([`AudioHost`])
//! drains those commands and mixes every active stream into the
//! endpoint's buffer once per tick.
//!
//! The mixer-native format is fixed: stereo, 16-bit signed
//! little-endian PCM at [`SAMPLE_RATE_HZ`].

pub mod client;
pub mod command;
pub mod command_queue;
pub mod converter;
pub mod error;
pub mod fence;
pub mod host;
pub mod mixer;
pub mod playback;
pub mod queue;
pub mod reaper;
pub mod sample_store;
pub mod stream;
pub mod volume;

pub use client::Client;
pub use command_queue::CommandQueue;
pub use converter::{Converter, PassThrough};
pub use error::{MixError, MixResult};
pub use host::{AudioHost, Endpoint};
pub use mixer::MixerEngine;
pub use playback::{LockRequest, PlaybackObject, PlaybackStatus};
pub use reaper::Reaper;
pub use sample_store::SampleStore;
pub use stream::Stream;
pub use volume::{gain_from_millibels, GAIN_UNITY};

/// Mixer-native sample rate. Format conversion to/from a client's own
/// rate and bit depth is a [`Converter`]'s job, not this crate's.
pub const SAMPLE_RATE_HZ: u32 = 44_100;
pub const CHANNELS: usize = 2;
pub const BYTES_PER_SAMPLE: usize = std::mem::size_of::<i16>();

/// Test-only tracing setup, so the `trace!`/`warn!` chatter the mixer
/// and reaper emit is visible under `cargo test -- --nocapture`.
#[cfg(test)]
pub(crate) mod test_support {
    pub(crate) fn init_tracing() {
        use tracing_subscriber::{fmt, prelude::*, EnvFilter};
        let _ = tracing_subscriber::registry()
            .with(fmt::layer().with_test_writer())
            .with(EnvFilter::from_default_env())
            .try_init();
    }
}

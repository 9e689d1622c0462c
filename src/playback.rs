use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::client::Client;
use crate::command_queue::CommandQueue;
use crate::converter::{Converter, PassThrough};
use crate::error::{MixError, MixResult};
use crate::fence::Fence;
use crate::reaper::Reaper;
use crate::sample_store::SampleStore;
use crate::stream::Stream;
use crate::volume::gain_from_millibels;

/// What span of the buffer a `lock` call asks for. Only `EntireBuffer`
/// is actually honored (see DESIGN.md's resolution of the Lock span
/// question); the others are accepted as input but always rejected,
/// matching `ds_buffer_lock`'s own `E_NOTIMPL` for circular two-span and
/// write-cursor-relative locks.
pub enum LockRequest {
    EntireBuffer,
    Span { offset_bytes: usize, len_bytes: usize },
    FromWriteCursor,
}

#[derive(Debug, Clone, Copy)]
pub struct PlaybackStatus {
    pub playing: bool,
    pub looping: bool,
}

#[derive(derive_new::new)]
struct Teardown {
    cmd: Box<crate::command::Command>,
    fence: Arc<Fence>,
}

/// The legacy "create a sound buffer, fill it, play it" façade
/// (spec.md §4.7), standing in for `IDirectSoundBuffer`. Owns a
/// `Stream` (its own playback cursor) and a `SampleStore` (the audio
/// data, possibly shared with sibling `PlaybackObject`s produced by
/// `duplicate`), plus a private `Client` for submitting commands.
pub struct PlaybackObject {
    stream: Arc<Stream>,
    sample_store: Arc<SampleStore>,
    client: Client,
    converter: Box<dyn Converter>,
    client_nbytes: usize,
    staging: Option<Box<[u8]>>,
    playing: AtomicBool,
    teardown: Option<Teardown>,
}

impl PlaybackObject {
    /// Allocates a fresh buffer of `client_nbytes` (client-format bytes)
    /// backed by its own `SampleStore`, converted through `converter`
    /// into mixer-native storage.
    pub fn create(
        queue: Arc<CommandQueue>,
        client_nbytes: usize,
        converter: Box<dyn Converter>,
    ) -> MixResult<Self> {
        let native_nbytes = converter.dest_nbytes(client_nbytes);
        let native_nsamples = native_nbytes / std::mem::size_of::<i16>();
        let sample_store = Arc::new(SampleStore::alloc(native_nsamples)?);
        Self::from_parts(queue, sample_store, converter, client_nbytes)
    }

    /// Convenience constructor for the common case: client format is
    /// already mixer-native stereo 16-bit PCM.
    pub fn create_native(queue: Arc<CommandQueue>, nsamples: usize) -> MixResult<Self> {
        Self::create(
            queue,
            nsamples * std::mem::size_of::<i16>(),
            Box::new(PassThrough),
        )
    }

    /// Creates a sibling handle sharing this object's `SampleStore` but
    /// with its own independent playback cursor, volume, and looping
    /// state — `DuplicateSoundBuffer`'s behavior. The sibling gets a
    /// fresh pass-through converter of its own, matching the original's
    /// lazily-reinitialized `conv` per duplicate.
    pub fn duplicate(&self, queue: Arc<CommandQueue>) -> MixResult<Self> {
        Self::from_parts(
            queue,
            Arc::clone(&self.sample_store),
            Box::new(PassThrough),
            self.client_nbytes,
        )
    }

    fn from_parts(
        queue: Arc<CommandQueue>,
        sample_store: Arc<SampleStore>,
        converter: Box<dyn Converter>,
        client_nbytes: usize,
    ) -> MixResult<Self> {
        let stream = Stream::new(Arc::clone(&sample_store));
        let mut client = Client::new(queue);

        // Reserve the teardown Stop command up front, same as
        // `ds_buffer_alloc` reserving `self->cmd_stop`: allocation can
        // never fail at drop-time, when we can least afford to handle
        // it.
        let fence = Arc::new(Fence::new());
        let mut cmd = client.cmd_alloc();
        cmd.set_stop(Arc::clone(&stream));
        let signal = Arc::clone(&fence);
        cmd.set_callback(Box::new(move || signal.signal()));

        Ok(Self {
            stream,
            sample_store,
            client,
            converter,
            client_nbytes,
            staging: None,
            playing: AtomicBool::new(false),
            teardown: Some(Teardown::new(cmd, fence)),
        })
    }

    pub fn play(&mut self, looping: bool) {
        let mut cmd = self.client.cmd_alloc();
        cmd.set_play(Arc::clone(&self.stream), looping);
        self.client.cmd_submit(cmd);
        self.playing.store(true, Ordering::SeqCst);
    }

    pub fn stop(&mut self) {
        let mut cmd = self.client.cmd_alloc();
        cmd.set_stop(Arc::clone(&self.stream));
        self.client.cmd_submit(cmd);
        self.playing.store(false, Ordering::SeqCst);
    }

    /// `left_mb`/`right_mb` are DirectSound-style millibel attenuations
    /// in `[-10000, 0]`.
    pub fn set_volume(&mut self, left_mb: i32, right_mb: i32) -> MixResult<()> {
        let gains = [gain_from_millibels(left_mb)?, gain_from_millibels(right_mb)?];
        let mut cmd = self.client.cmd_alloc();
        cmd.set_volume(Arc::clone(&self.stream), gains);
        self.client.cmd_submit(cmd);
        Ok(())
    }

    /// Returns a writable client-format staging buffer. Only
    /// `LockRequest::EntireBuffer` is supported.
    pub fn lock(&mut self, request: LockRequest) -> MixResult<&mut [u8]> {
        match request {
            LockRequest::EntireBuffer => {}
            LockRequest::Span { .. } => {
                return Err(MixError::Unsupported(
                    "partial-span Lock is not supported; use EntireBuffer".into(),
                ));
            }
            LockRequest::FromWriteCursor => {
                return Err(MixError::Unsupported(
                    "FromWriteCursor Lock is not supported".into(),
                ));
            }
        }
        if self.staging.is_none() {
            self.staging = Some(vec![0u8; self.client_nbytes].into_boxed_slice());
        }
        Ok(self.staging.as_mut().expect("populated above"))
    }

    /// Converts the staged client-format bytes into mixer-native storage
    /// and commits them to the buffer.
    pub fn unlock(&mut self) -> MixResult<()> {
        let staging = self
            .staging
            .as_ref()
            .ok_or_else(|| MixError::InvalidArg("Unlock called without a matching Lock".into()))?;
        let mut native = vec![0i16; self.sample_store.nsamples()];
        self.converter.convert(staging, &mut native)?;
        // SAFETY: no Stream referencing this SampleStore is in the
        // mixer's active list until a subsequent `play`, so no reader
        // races this write.
        unsafe { self.sample_store.write_span(0, &native)? };
        Ok(())
    }

    /// `playing` is cleared the first time it's observed that a
    /// non-looping stream ran off the end of its buffer, matching
    /// `ds_buffer_get_status`'s lazy clear.
    pub fn status(&self) -> PlaybackStatus {
        let still_playing = self.playing.load(Ordering::SeqCst) && !self.stream.is_finished();
        if !still_playing {
            self.playing.store(false, Ordering::SeqCst);
        }
        PlaybackStatus {
            playing: still_playing,
            looping: self.stream.is_looping(),
        }
    }

    /// `(play_cursor_bytes, write_cursor_bytes)`, both in mixer-native
    /// bytes — the original reconverts the play cursor back through the
    /// format converter into client bytes, which would need a reverse
    /// mapping `Converter` doesn't expose here. The write cursor is
    /// always reported as 0, matching the original unconditionally.
    pub fn current_position(&self) -> (usize, usize) {
        let native_bytes = self.stream.peek_position() * std::mem::size_of::<i16>();
        (native_bytes, 0)
    }

    /// The original silently accepts and ignores any nonzero
    /// `SetCurrentPosition`; we do the same, just with a trace log.
    pub fn set_current_position(&self, position_bytes: usize) {
        if position_bytes != 0 {
            tracing::trace!(position_bytes, "SetCurrentPosition to nonzero offset ignored");
        }
    }

    /// Tears this object's stream and sample store down asynchronously
    /// through `reaper` instead of blocking the caller's thread, per
    /// spec.md §2's non-blocking teardown path.
    pub fn retire_via(self, reaper: &Reaper) {
        let (stream, sample_store) = self.into_parts();
        reaper.retire(stream, Some(sample_store));
    }

    fn into_parts(mut self) -> (Arc<Stream>, Arc<SampleStore>) {
        self.teardown = None;
        (Arc::clone(&self.stream), Arc::clone(&self.sample_store))
    }
}

impl Drop for PlaybackObject {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            self.client.cmd_submit(teardown.cmd);
            teardown.fence.wait();
        }
    }
}

//! WASAPI exclusive-mode backend, grounded on the original
//! `wasapi_thread_main`/`wasapi_thread_do_setup` (`wasapi.c`) and on the
//! teacher's own `src/audio/wasapi.rs` shape (event handle, renegotiate
//! loop, `AvSetMmThreadCharacteristics` priority bump).

use std::time::Duration;

use windows::core::Interface;
use windows::Win32::Foundation::{CloseHandle, HANDLE};
use windows::Win32::Media::Audio::{
    eConsole, eRender, IAudioClient, IAudioRenderClient, IMMDevice, IMMDeviceEnumerator,
    MMDeviceEnumerator, AUDCLNT_E_BUFFER_SIZE_NOT_ALIGNED, AUDCLNT_E_DEVICE_INVALIDATED,
    AUDCLNT_SHAREMODE_EXCLUSIVE, AUDCLNT_STREAMFLAGS_EVENTCALLBACK, WAVEFORMATEX,
};
use windows::Win32::System::Com::{CoCreateInstance, CoInitializeEx, CLSCTX_ALL, COINIT_MULTITHREADED};
use windows::Win32::System::Threading::{
    AvSetMmThreadCharacteristicsW, CreateEventW, SetEvent, WaitForSingleObject, WAIT_OBJECT_0,
};

use super::Endpoint;
use crate::error::{MixError, MixResult};

const CHANNELS: u16 = 2;
const SAMPLE_RATE_HZ: u32 = 44_100;
const BITS_PER_SAMPLE: u16 = 16;
/// 100ns units; an initial ask of ~10ms, renegotiated if the device
/// rejects it (matches `wasapi_renegotiate_buffer`'s retry).
const INITIAL_PERIOD: i64 = 10 * 10_000;

pub struct WasapiEndpoint {
    client: Option<IAudioClient>,
    render_client: Option<IAudioRenderClient>,
    buffer_ready: HANDLE,
    nframes: u32,
    acquired: bool,
}

impl WasapiEndpoint {
    /// Cheap to call from any thread — no COM state is touched yet.
    /// `CoInitializeEx` happens in `negotiate`, which `AudioHost::start`
    /// always calls from the thread it just spawned (mirroring
    /// `wasapi_thread_main`, which initializes COM as the first thing it
    /// does on its own thread rather than in whatever caller constructs
    /// the endpoint).
    pub fn new() -> MixResult<Self> {
        let buffer_ready = unsafe { CreateEventW(None, false, false, None) }
            .map_err(|e| MixError::Endpoint(format!("CreateEventW failed: {e}")))?;
        Ok(Self {
            client: None,
            render_client: None,
            buffer_ready,
            nframes: 0,
            acquired: false,
        })
    }

    fn default_render_device(&self) -> MixResult<IMMDevice> {
        unsafe {
            let enumerator: IMMDeviceEnumerator =
                CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL)
                    .map_err(|e| MixError::Endpoint(format!("device enumerator: {e}")))?;
            enumerator
                .GetDefaultAudioEndpoint(eRender, eConsole)
                .map_err(|e| MixError::Endpoint(format!("no default render device: {e}")))
        }
    }

    fn format(&self) -> WAVEFORMATEX {
        let block_align = CHANNELS * (BITS_PER_SAMPLE / 8);
        WAVEFORMATEX {
            wFormatTag: 1, // WAVE_FORMAT_PCM
            nChannels: CHANNELS,
            nSamplesPerSec: SAMPLE_RATE_HZ,
            nAvgBytesPerSec: SAMPLE_RATE_HZ * u32::from(block_align),
            nBlockAlign: block_align,
            wBitsPerSample: BITS_PER_SAMPLE,
            cbSize: 0,
        }
    }

    /// Maps a WASAPI call failure to a `MixError`, distinguishing device
    /// invalidation (recoverable — `AudioHost` renegotiates and keeps
    /// running) from every other failure (fatal), matching the
    /// teacher's own `AUDCLNT_E_DEVICE_INVALIDATED` check in
    /// `src/audio/wasapi.rs`.
    fn endpoint_error(context: &str, err: windows::core::Error) -> MixError {
        if err.code() == AUDCLNT_E_DEVICE_INVALIDATED {
            MixError::DeviceInvalidated(format!("{context}: {err}"))
        } else {
            MixError::Endpoint(format!("{context}: {err}"))
        }
    }

    fn open(&mut self, period: i64) -> windows::core::Result<u32> {
        let device = self
            .default_render_device()
            .map_err(|_| windows::core::Error::from_win32())?;
        let format = self.format();
        unsafe {
            let client: IAudioClient = device.Activate(CLSCTX_ALL, None)?;
            client.Initialize(
                AUDCLNT_SHAREMODE_EXCLUSIVE,
                AUDCLNT_STREAMFLAGS_EVENTCALLBACK,
                period,
                period,
                &format,
                None,
            )?;
            client.SetEventHandle(self.buffer_ready)?;
            let nframes = client.GetBufferSize()?;
            let render_client: IAudioRenderClient = client.GetService()?;
            self.client = Some(client);
            self.render_client = Some(render_client);
            Ok(nframes)
        }
    }
}

impl Endpoint for WasapiEndpoint {
    /// Also the reinitialization path: `AudioHost` calls this again
    /// after a `DeviceInvalidated` error, same as the teacher's
    /// outer `loop { Device::init(...) }` around a dropped-out device.
    fn negotiate(&mut self) -> MixResult<usize> {
        unsafe {
            CoInitializeEx(None, COINIT_MULTITHREADED)
                .ok()
                .map_err(|e| MixError::Endpoint(format!("CoInitializeEx failed: {e}")))?;
        }

        if let Some(client) = self.client.take() {
            unsafe { let _ = client.Stop(); }
        }
        self.render_client = None;
        self.acquired = false;

        match self.open(INITIAL_PERIOD) {
            Ok(nframes) => {
                self.nframes = nframes;
            }
            Err(err) if err.code() == AUDCLNT_E_BUFFER_SIZE_NOT_ALIGNED => {
                tracing::warn!("exclusive-mode buffer misaligned, renegotiating once");
                let aligned = self
                    .client
                    .as_ref()
                    .and_then(|c| unsafe { c.GetBufferSize() }.ok())
                    .ok_or_else(|| MixError::Endpoint("renegotiation query failed".into()))?;
                let period = (INITIAL_PERIOD * i64::from(aligned)) / i64::from(self.nframes.max(1));
                self.client = None;
                self.render_client = None;
                let nframes = self
                    .open(period.max(1))
                    .map_err(|e| MixError::Endpoint(format!("renegotiated Initialize failed: {e}")))?;
                self.nframes = nframes;
            }
            Err(err) => {
                return Err(MixError::Endpoint(format!("Initialize failed: {err}")));
            }
        }

        unsafe {
            let _ = AvSetMmThreadCharacteristicsW(windows::core::w!("Pro Audio"));
            self.client
                .as_ref()
                .expect("set by open()")
                .Start()
                .map_err(|e| MixError::Endpoint(format!("IAudioClient::Start failed: {e}")))?;
        }

        tracing::info!(nframes = self.nframes, "wasapi exclusive-mode stream opened");
        Ok(self.nframes as usize)
    }

    fn preroll_silence(&mut self) -> MixResult<()> {
        let buf = self.acquire_buffer()?;
        buf.iter_mut().for_each(|s| *s = 0);
        self.release_buffer()
    }

    fn wait_ready(&mut self, timeout: Duration) -> MixResult<bool> {
        let millis = timeout.as_millis().min(u128::from(u32::MAX)) as u32;
        let result = unsafe { WaitForSingleObject(self.buffer_ready, millis) };
        Ok(result == WAIT_OBJECT_0)
    }

    fn acquire_buffer(&mut self) -> MixResult<&mut [i16]> {
        let render_client = self
            .render_client
            .as_ref()
            .ok_or_else(|| MixError::Endpoint("acquire_buffer before negotiate".into()))?;
        unsafe {
            let ptr = render_client
                .GetBuffer(self.nframes)
                .map_err(|e| Self::endpoint_error("GetBuffer failed", e))?;
            self.acquired = true;
            Ok(std::slice::from_raw_parts_mut(
                ptr as *mut i16,
                self.nframes as usize * usize::from(CHANNELS),
            ))
        }
    }

    fn release_buffer(&mut self) -> MixResult<()> {
        if !self.acquired {
            return Ok(());
        }
        self.acquired = false;
        let render_client = self
            .render_client
            .as_ref()
            .ok_or_else(|| MixError::Endpoint("release_buffer before negotiate".into()))?;
        unsafe {
            render_client
                .ReleaseBuffer(self.nframes, 0)
                .map_err(|e| Self::endpoint_error("ReleaseBuffer failed", e))
        }
    }
}

impl Drop for WasapiEndpoint {
    fn drop(&mut self) {
        if let Some(client) = &self.client {
            unsafe {
                let _ = client.Stop();
            }
        }
        unsafe {
            let _ = CloseHandle(self.buffer_ready);
        }
    }
}

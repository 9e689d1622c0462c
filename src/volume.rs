use crate::error::{MixError, MixResult};

/// Fixed-point unity gain. Render multiplies a sample by a gain in
/// `[0, GAIN_UNITY]`; a stream at `GAIN_UNITY` on both channels passes
/// samples through unchanged once the accumulator is shifted back down
/// by 8 bits during saturation.
pub const GAIN_UNITY: u16 = 0x0100;

/// Converts a DirectSound-style attenuation in millibels (hundredths of
/// a decibel, `0` = unity, more negative = quieter) into the fixed-point
/// linear gain the mixer works with: `256 * 10^(millibels / 2000)`.
/// `millibels` outside `[-10000, 0]` is rejected, matching
/// `ds_buffer_set_volume`'s `DSBVOLUME_MIN`/`DSBVOLUME_MAX` bounds.
///
/// Truncates toward zero rather than rounding to nearest, matching
/// `ds-buffer.c`'s `(int16_t)(256.0 * pow(10.0, millibels / 2000.0))`
/// double-to-integer cast.
pub fn gain_from_millibels(millibels: i32) -> MixResult<u16> {
    if !(-10000..=0).contains(&millibels) {
        return Err(MixError::InvalidArg(format!(
            "volume {millibels} mB is outside the valid [-10000, 0] range"
        )));
    }
    let linear = f64::from(GAIN_UNITY) * 10f64.powf(f64::from(millibels) / 2000.0);
    Ok(linear.trunc().clamp(0.0, f64::from(GAIN_UNITY)) as u16)
}

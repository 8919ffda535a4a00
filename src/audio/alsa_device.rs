//! Opening and negotiating ALSA PCM devices.
//!
//! The hardware may grant something other than what was asked for. Whatever
//! [`AlsaParams`] comes back is what the device really runs at.

use std::fmt;

use alsa::pcm::{Access, Format, Frames, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

/// Parameters the device actually granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlsaParams {
    pub sample_rate: u32,
    pub channels: u32,
    /// Frames per period
    pub period_size: usize,
}

impl fmt::Display for AlsaParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rate={}, channels={}, period_size={}",
            self.sample_rate, self.channels, self.period_size
        )
    }
}

/// What to ask the hardware for. `None` leaves the choice to the device.
struct DeviceRequest<'a> {
    device: &'a str,
    direction: Direction,
    sample_rate: Option<u32>,
    channels: Option<u32>,
    period_size: Option<usize>,
}

impl DeviceRequest<'_> {
    fn label(&self) -> &'static str {
        match self.direction {
            Direction::Capture => "capture",
            Direction::Playback => "playback",
        }
    }

    fn open(&self) -> Result<(PCM, AlsaParams)> {
        let pcm = PCM::new(self.device, self.direction, false)
            .with_context(|| format!("cannot open '{}' for {}", self.device, self.label()))?;
        self.configure(&pcm)
            .with_context(|| format!("'{}' rejected the {} parameters", self.device, self.label()))?;

        let granted = {
            let hwp = pcm.hw_params_current()?;
            AlsaParams {
                sample_rate: hwp.get_rate()?,
                channels: hwp.get_channels()?,
                period_size: hwp.get_period_size()? as usize,
            }
        };
        log::info!("ALSA {} on {}: {}", self.label(), self.device, granted);
        Ok((pcm, granted))
    }

    fn configure(&self, pcm: &PCM) -> Result<()> {
        let hwp = HwParams::any(pcm)?;
        // same sample format as the wire
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        if let Some(channels) = self.channels {
            hwp.set_channels(channels)?;
        }
        if let Some(rate) = self.sample_rate {
            hwp.set_rate_near(rate, ValueOr::Nearest)?;
        }
        if let Some(period) = self.period_size {
            hwp.set_period_size_near(period as Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
        Ok(())
    }
}

/// Open the microphone at whatever rate and channel count it prefers.
pub fn open_capture(device: &str) -> Result<(PCM, AlsaParams)> {
    DeviceRequest {
        device,
        direction: Direction::Capture,
        sample_rate: None,
        channels: None,
        period_size: None,
    }
    .open()
}

/// Open the speaker near the requested format.
pub fn open_playback(
    device: &str,
    sample_rate: u32,
    channels: u32,
    period_size: Option<usize>,
) -> Result<(PCM, AlsaParams)> {
    DeviceRequest {
        device,
        direction: Direction::Playback,
        sample_rate: Some(sample_rate),
        channels: Some(channels),
        period_size,
    }
    .open()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn granted_params_are_logged_in_one_line() {
        let params = AlsaParams {
            sample_rate: 48000,
            channels: 2,
            period_size: 960,
        };
        assert_eq!(params.to_string(), "rate=48000, channels=2, period_size=960");
    }
}

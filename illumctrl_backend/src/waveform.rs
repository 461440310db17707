//! Per-cycle illumination waveforms.
//!
//! A [`Waveform`] holds one full illumination cycle for every analog channel of a
//! board. The parameter layer hands waveforms over as one flat, channel-major
//! sequence (all of channel 0, then all of channel 1, ...); internally they are
//! stored as a `channels × samples` [`Array2`], whose standard layout is exactly that
//! channel-major order, so uploads need no reshuffling.

use std::borrow::Cow;

use ndarray::{Array2, ArrayView1, Axis};

use crate::error::WaveformError;

const DIGITAL_PORT_LINES: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    samples: Array2<f64>,
}

impl Waveform {
    /// Builds a waveform from a flat channel-major sequence.
    ///
    /// The per-channel length is `flat.len() / channels`; a length that is not an
    /// exact multiple of `channels` is rejected rather than truncated.
    ///
    /// ```
    /// use illumctrl_backend::waveform::Waveform;
    ///
    /// let wv = Waveform::from_flat(vec![5.0, 4.0, 3.0, 0.0, 1.0, 2.0], 2).unwrap();
    /// assert_eq!(wv.samples_per_channel(), 3);
    /// assert_eq!(wv.channel(1).to_vec(), vec![0.0, 1.0, 2.0]);
    ///
    /// assert!(Waveform::from_flat(vec![1.0; 7], 2).is_err());
    /// ```
    pub fn from_flat(flat: Vec<f64>, channels: usize) -> Result<Self, WaveformError> {
        if channels == 0 {
            return Err(WaveformError::NoChannels);
        }
        let len = flat.len();
        if len % channels != 0 {
            return Err(WaveformError::NotDivisible { len, channels });
        }
        let samples = Array2::from_shape_vec((channels, len / channels), flat)
            .map_err(|_| WaveformError::NotDivisible { len, channels })?;
        Ok(Self { samples })
    }

    /// Builds a waveform from one sample vector per channel.
    pub fn from_channels(channels: &[Vec<f64>]) -> Result<Self, WaveformError> {
        let expected = channels.first().ok_or(WaveformError::NoChannels)?.len();
        if let Some((channel, chan)) = channels
            .iter()
            .enumerate()
            .find(|(_, chan)| chan.len() != expected)
        {
            return Err(WaveformError::RaggedChannels {
                channel,
                len: chan.len(),
                expected,
            });
        }
        let flat = channels.iter().flatten().copied().collect();
        Self::from_flat(flat, channels.len())
    }

    pub fn channel_count(&self) -> usize {
        self.samples.len_of(Axis(0))
    }

    pub fn samples_per_channel(&self) -> usize {
        self.samples.len_of(Axis(1))
    }

    /// Total number of samples over all channels
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn channel(&self, channel: usize) -> ArrayView1<'_, f64> {
        self.samples.row(channel)
    }

    /// Channel-major flat view of the data, as uploaded to the board.
    pub fn as_flat(&self) -> Cow<'_, [f64]> {
        match self.samples.as_slice() {
            Some(flat) => Cow::Borrowed(flat),
            None => Cow::Owned(self.samples.iter().copied().collect()),
        }
    }

    /// Packs the waveform into one port-wide word per sample: bit `i` is set when
    /// channel `i` is above zero at that sample.
    pub fn to_digital_port(&self) -> Result<Vec<u32>, WaveformError> {
        let channels = self.channel_count();
        if channels > DIGITAL_PORT_LINES {
            return Err(WaveformError::TooManyLines(channels));
        }
        let mut words = vec![0u32; self.samples_per_channel()];
        for (line, row) in self.samples.outer_iter().enumerate() {
            let bitmask = 1u32 << line;
            for (word, &value) in words.iter_mut().zip(row.iter()) {
                if value > 0.0 {
                    *word |= bitmask;
                }
            }
        }
        Ok(words)
    }
}

#[cfg(test)]
mod test {
    use crate::error::WaveformError;
    use crate::waveform::*;

    #[test]
    fn non_divisible_length_is_rejected() {
        let err = Waveform::from_flat(vec![0.0; 10], 3).unwrap_err();
        assert_eq!(err, WaveformError::NotDivisible { len: 10, channels: 3 });
        assert_eq!(
            Waveform::from_flat(vec![0.0; 4], 0).unwrap_err(),
            WaveformError::NoChannels
        );
    }

    #[test]
    fn flat_layout_is_channel_major() {
        let wv = Waveform::from_channels(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        assert_eq!(wv.channel_count(), 3);
        assert_eq!(wv.samples_per_channel(), 2);
        assert_eq!(wv.as_flat().to_vec(), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn ragged_channels_are_rejected() {
        let err = Waveform::from_channels(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert_eq!(
            err,
            WaveformError::RaggedChannels {
                channel: 1,
                len: 1,
                expected: 2
            }
        );
    }

    #[test]
    fn digital_packing() {
        // line0: high on samples 0,1; line1: high on samples 1,2
        let wv = Waveform::from_flat(vec![1.0, 1.0, 0.0, 0.0, 5.0, 5.0], 2).unwrap();
        assert_eq!(wv.to_digital_port().unwrap(), vec![0b01, 0b11, 0b10]);

        let too_wide = Waveform::from_flat(vec![0.0; 33], 33).unwrap();
        assert_eq!(
            too_wide.to_digital_port().unwrap_err(),
            WaveformError::TooManyLines(33)
        );
    }
}

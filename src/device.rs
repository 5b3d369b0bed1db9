//! CPAL input/output backend.
//!
//! The looper processes fixed 128-sample mono blocks while cpal delivers
//! callbacks of whatever size the host picks. Input frames are downmixed to
//! their first channel and queued; the output callback pulls a block's worth
//! of input each time it runs out of processed samples.

use crate::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SizedSample};
use looper_core::{AudioConfig, BLOCK_SAMPLES};
use looper_track::LooperProcessor;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use tracing::info;

/// Input queue depth in blocks.
const INPUT_QUEUE_BLOCKS: usize = 16;

/// Running input and output streams on the default devices.
pub struct AudioDevice {
    sample_rate: u32,
    _input: cpal::Stream,
    _output: cpal::Stream,
}

impl AudioDevice {
    /// Start both streams, moving `processor` into the output callback.
    ///
    /// Fails if the output device does not run at `config.sample_rate`.
    pub fn start(processor: LooperProcessor, config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();
        let input_device = host
            .default_input_device()
            .ok_or_else(|| Error::InvalidDevice("No input device available".to_string()))?;
        let output_device = host
            .default_output_device()
            .ok_or_else(|| Error::InvalidDevice("No output device available".to_string()))?;

        let input_config = input_device.default_input_config()?;
        let output_config = output_device.default_output_config()?;
        let rate = check_rates(
            input_config.sample_rate().0,
            output_config.sample_rate().0,
            config.sample_rate,
        )?;

        let (producer, consumer) = HeapRb::<i16>::new(BLOCK_SAMPLES * INPUT_QUEUE_BLOCKS).split();

        let input = match input_config.sample_format() {
            cpal::SampleFormat::F32 => {
                build_input::<f32>(&input_device, &input_config.into(), producer)?
            }
            cpal::SampleFormat::I16 => {
                build_input::<i16>(&input_device, &input_config.into(), producer)?
            }
            cpal::SampleFormat::U16 => {
                build_input::<u16>(&input_device, &input_config.into(), producer)?
            }
            format => {
                return Err(Error::InvalidDevice(format!(
                    "Unsupported input sample format: {:?}",
                    format
                )));
            }
        };
        let output = match output_config.sample_format() {
            cpal::SampleFormat::F32 => {
                build_output::<f32>(&output_device, &output_config.into(), consumer, processor)?
            }
            cpal::SampleFormat::I16 => {
                build_output::<i16>(&output_device, &output_config.into(), consumer, processor)?
            }
            cpal::SampleFormat::U16 => {
                build_output::<u16>(&output_device, &output_config.into(), consumer, processor)?
            }
            format => {
                return Err(Error::InvalidDevice(format!(
                    "Unsupported output sample format: {:?}",
                    format
                )));
            }
        };

        input.play()?;
        output.play()?;
        info!(sample_rate = rate, "audio device started");
        Ok(Self {
            sample_rate: rate,
            _input: input,
            _output: output,
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

/// Both streams must run at the looper's rate or input drifts against the
/// block cadence.
fn check_rates(input: u32, output: u32, expected: u32) -> Result<u32> {
    if output != expected {
        return Err(Error::InvalidDevice(format!(
            "Output runs at {} Hz, looper expects {} Hz",
            output, expected
        )));
    }
    if input != expected {
        return Err(Error::InvalidDevice(format!(
            "Input runs at {} Hz, looper expects {} Hz",
            input, expected
        )));
    }
    Ok(output)
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: HeapProd<i16>,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = (config.channels as usize).max(1);
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            for frame in data.chunks(channels) {
                let value: f32 = frame[0].to_sample();
                // overflow drops input rather than blocking the callback
                let _ = producer.try_push((value.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
            }
        },
        |_err| {
            // Audio stream error - cannot log from callback
        },
        None,
    )?;
    Ok(stream)
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut consumer: HeapCons<i16>,
    mut processor: LooperProcessor,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = (config.channels as usize).max(1);
    let mut input = [0i16; BLOCK_SAMPLES];
    let mut output = [0i16; BLOCK_SAMPLES];
    let mut cursor = BLOCK_SAMPLES;

    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(channels) {
                if cursor == BLOCK_SAMPLES {
                    let n = consumer.pop_slice(&mut input);
                    input[n..].fill(0);
                    processor.process_samples(&input, &mut output);
                    cursor = 0;
                }
                let value = T::from_sample(output[cursor] as f32 / 32768.0);
                frame.fill(value);
                cursor += 1;
            }
        },
        |_err| {
            // Audio stream error - cannot log from callback
        },
        None,
    )?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rates_must_match() {
        assert_eq!(check_rates(44_100, 44_100, 44_100).unwrap(), 44_100);
        assert!(matches!(
            check_rates(48_000, 44_100, 44_100),
            Err(Error::InvalidDevice(msg)) if msg.starts_with("Input")
        ));
        assert!(matches!(
            check_rates(44_100, 48_000, 44_100),
            Err(Error::InvalidDevice(msg)) if msg.starts_with("Output")
        ));
    }
}

use super::{AudioInput, CaptureConfig, FragmentSink, BYTES_PER_SAMPLE};
use crate::error::{Result, SenseError};
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    Device, FromSample, Sample, SampleFormat, SizedSample, Stream as CpalStream,
};
use std::thread::JoinHandle;

/// Audio device information
#[derive(Debug, Clone)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub channel_count: u16,
    pub sample_rate: u32,
}

/// Microphone input through CPAL.
///
/// The CPAL stream lives on a dedicated thread for as long as the input is
/// started; `stop` signals that thread and waits for it to drop the stream.
pub struct CpalInput {
    device_name: Option<String>,
    stop_tx: Option<crossbeam_channel::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CpalInput {
    /// `device_name` of `None` picks the host's default input device
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            stop_tx: None,
            worker: None,
        }
    }
}

impl AudioInput for CpalInput {
    fn start(&mut self, config: &CaptureConfig, sink: FragmentSink) -> Result<()> {
        if self.worker.is_some() {
            return Err(SenseError::Capture("Audio input already started".into()));
        }

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let device_name = self.device_name.clone();
        let config = config.clone();

        let worker = std::thread::Builder::new()
            .name("sense-capture".into())
            .spawn(move || {
                let stream = match open_stream(device_name.as_deref(), &config, sink) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(SenseError::Capture(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Keep the stream alive until the session lets go of it
                let _ = stop_rx.recv();
                if let Err(e) = stream.pause() {
                    log::debug!("Pausing input stream failed: {}", e);
                }
                log::debug!("🎤 Input stream closed");
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.stop_tx = Some(stop_tx);
                self.worker = Some(worker);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => Err(SenseError::Capture(
                "Capture thread exited before the stream started".into(),
            )),
        }
    }

    fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            worker
                .join()
                .map_err(|_| SenseError::Capture("Capture thread panicked".into()))?;
        }
        Ok(())
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("🎤 {}", e);
        }
    }
}

fn find_device(device_name: Option<&str>) -> Result<Device> {
    let host = cpal::default_host();
    log::info!("🎤 Initializing audio capture with host: {:?}", host.id());

    match device_name {
        Some(name) => host
            .input_devices()
            .map_err(|e| SenseError::Capture(e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| SenseError::Capture(format!("Device not found: {}", name))),
        None => host
            .default_input_device()
            .ok_or_else(|| SenseError::Capture("No default input device found".into())),
    }
}

fn open_stream(
    device_name: Option<&str>,
    config: &CaptureConfig,
    sink: FragmentSink,
) -> Result<CpalStream> {
    let device = find_device(device_name)?;
    log::info!("🎤 Using input device: {:?}", device.name());

    let supported_config = device
        .default_input_config()
        .map_err(|e| SenseError::Capture(e.to_string()))?;

    // Ask for the task's rate; mono comes from the first channel of each frame
    let stream_config = cpal::StreamConfig {
        channels: supported_config.channels(),
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    log::info!(
        "🎤 Audio capture configured: {} channels @ {}Hz (format: {:?})",
        stream_config.channels,
        config.sample_rate,
        supported_config.sample_format()
    );

    let frames = config.frames_per_buffer as usize;
    match supported_config.sample_format() {
        SampleFormat::I16 => build_stream::<i16>(&device, &stream_config, frames, sink),
        SampleFormat::U16 => build_stream::<u16>(&device, &stream_config, frames, sink),
        SampleFormat::F32 => build_stream::<f32>(&device, &stream_config, frames, sink),
        other => Err(SenseError::Capture(format!(
            "Unsupported sample format: {:?}",
            other
        ))),
    }
}

/// Keeps the first channel of interleaved frames and cuts it into fragments
/// of `frames_per_buffer` little-endian f32 samples
struct MonoFragmenter {
    channels: usize,
    fragment_bytes: usize,
    buffer: Vec<u8>,
}

impl MonoFragmenter {
    fn new(channels: u16, frames_per_buffer: usize) -> Self {
        let fragment_bytes = frames_per_buffer.max(1) * BYTES_PER_SAMPLE;
        Self {
            channels: usize::from(channels.max(1)),
            fragment_bytes,
            buffer: Vec::with_capacity(fragment_bytes),
        }
    }

    fn push<T>(&mut self, data: &[T], mut emit: impl FnMut(Vec<u8>))
    where
        T: Sample,
        f32: FromSample<T>,
    {
        for frame in data.chunks(self.channels) {
            if let Some(sample) = frame.first() {
                self.buffer
                    .extend_from_slice(&f32::from_sample(*sample).to_le_bytes());
                if self.buffer.len() >= self.fragment_bytes {
                    let fragment = std::mem::replace(
                        &mut self.buffer,
                        Vec::with_capacity(self.fragment_bytes),
                    );
                    emit(fragment);
                }
            }
        }
    }
}

fn build_stream<T>(
    device: &Device,
    config: &cpal::StreamConfig,
    frames_per_buffer: usize,
    sink: FragmentSink,
) -> Result<CpalStream>
where
    T: Sample + SizedSample + Send + Sync + 'static,
    f32: FromSample<T>,
{
    let mut fragmenter = MonoFragmenter::new(config.channels, frames_per_buffer);

    let err_fn = move |err: cpal::StreamError| {
        log::error!("Audio stream error: {}", err);
    };

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                fragmenter.push(data, |fragment| {
                    if !sink.push(fragment) {
                        log::trace!("Capture session gone, dropping audio");
                    }
                });
            },
            err_fn,
            None,
        )
        .map_err(|e| SenseError::Capture(e.to_string()))
}

/// Input devices that can open a default input config
pub fn list_input_devices() -> Result<Vec<AudioDeviceInfo>> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());

    let devices = host
        .input_devices()
        .map_err(|e| SenseError::Capture(e.to_string()))?;

    let mut result = Vec::new();
    for device in devices {
        let Ok(name) = device.name() else {
            continue;
        };
        if let Ok(config) = device.default_input_config() {
            result.push(AudioDeviceInfo {
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
                channel_count: config.channels(),
                sample_rate: config.sample_rate().0,
            });
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg_attr(not(feature = "test-audio"), ignore)]
    fn test_list_input_devices() {
        match list_input_devices() {
            Ok(devices) => {
                for device in devices {
                    println!("{:?}", device);
                }
            }
            Err(e) => println!("Audio devices not available in this environment: {}", e),
        }
    }

    #[test]
    fn test_fragmenter_keeps_first_channel() {
        let mut fragmenter = MonoFragmenter::new(2, 2);
        let mut fragments = Vec::new();

        // Interleaved stereo: left is 0.5/-0.5, right is 1.0
        fragmenter.push(&[0.5f32, 1.0, -0.5, 1.0, 0.25, 1.0], |f| fragments.push(f));

        let mut expected = Vec::new();
        expected.extend_from_slice(&0.5f32.to_le_bytes());
        expected.extend_from_slice(&(-0.5f32).to_le_bytes());
        assert_eq!(fragments, vec![expected]);

        // The third frame waits for the next fragment
        fragmenter.push(&[0.75f32, 1.0], |f| fragments.push(f));
        assert_eq!(fragments.len(), 2);
        assert_eq!(&fragments[1][..4], &0.25f32.to_le_bytes());
    }

    #[test]
    fn test_fragmenter_converts_integer_samples() {
        let mut fragmenter = MonoFragmenter::new(1, 1);
        let mut fragments = Vec::new();
        fragmenter.push(&[0i16, i16::MIN], |f| fragments.push(f));

        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0], 0.0f32.to_le_bytes().to_vec());
        assert_eq!(fragments[1], (-1.0f32).to_le_bytes().to_vec());
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let mut input = CpalInput::new(None);
        assert!(input.stop().is_ok());
    }
}

use anyhow::Context;
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

/// Finds the input device named `device_name`, or the host default when `None`.
pub fn get_or_default_input(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());
    match device_name {
        None => host
            .default_input_device()
            .context("No default input device"),
        Some(target) => host
            .input_devices()
            .context("Failed to enumerate input devices")?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .with_context(|| format!("No input device named {target:?}")),
    }
}

/// Finds the output device named `device_name`, or the host default when `None`.
pub fn get_or_default_output(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = get_host();
    match device_name {
        None => host
            .default_output_device()
            .context("No default output device"),
        Some(target) => host
            .output_devices()
            .context("Failed to enumerate output devices")?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .with_context(|| format!("No output device named {target:?}")),
    }
}

fn describe(name: &str, channels: u16, sample_rate: u32, default_name: Option<&str>) -> String {
    let mut d = format!(" * {}({}ch, {}hz)", name, channels, sample_rate);
    if default_name == Some(name) {
        d.push_str(" [default]");
    }
    d
}

/// One line per input device with its default config. Devices that fail to
/// report a name or config are skipped.
pub fn get_available_inputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let mut device_names = Vec::new();
    for device in host.input_devices().context("No input devices found")? {
        let (Ok(name), Ok(cfg)) = (device.name(), device.default_input_config()) else {
            continue;
        };
        device_names.push(describe(
            &name,
            cfg.channels(),
            cfg.sample_rate().0,
            default_name.as_deref(),
        ));
    }
    Ok(device_names.join("\n"))
}

pub fn get_available_outputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let mut device_names = Vec::new();
    for device in host.output_devices().context("No output devices found")? {
        let (Ok(name), Ok(cfg)) = (device.name(), device.default_output_config()) else {
            continue;
        };
        device_names.push(describe(
            &name,
            cfg.channels(),
            cfg.sample_rate().0,
            default_name.as_deref(),
        ));
    }
    Ok(device_names.join("\n"))
}

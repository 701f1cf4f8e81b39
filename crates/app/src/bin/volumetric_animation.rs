//! Volumetric animation sample.

use std::process::ExitCode;

use lockstep_renderer::{VolumeConfig, VolumetricAnimation};

fn main() -> anyhow::Result<ExitCode> {
    lockstep_app::run("Volumetric Animation", |backend, shaders, extent, title| {
        let config = VolumeConfig {
            extent,
            ..Default::default()
        };
        Ok(VolumetricAnimation::new(backend, shaders, config)?.with_title(title))
    })
}

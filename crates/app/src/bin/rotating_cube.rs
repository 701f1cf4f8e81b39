//! Rotating cube sample.

use std::process::ExitCode;

use lockstep_renderer::{CubeConfig, RotatingCube};

fn main() -> anyhow::Result<ExitCode> {
    lockstep_app::run("Rotating Cube", |backend, shaders, extent, title| {
        let config = CubeConfig {
            extent,
            ..Default::default()
        };
        Ok(RotatingCube::new(backend, shaders, config).with_title(title))
    })
}

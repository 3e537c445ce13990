use std::path::PathBuf;

use clap::Parser;

use qforge::modules::light::{Light, VisApprox};

use crate::config::QforgeConfig;

use super::{Cli, CliRes};

#[derive(Debug, Parser)]
#[command(name = "light", version, about = "Bake lightmaps into a .bsp")]
struct LightToolCli {
    /// Input .bsp file, relit in place
    input: PathBuf,

    /// Worker thread count
    #[arg(long)]
    threads: Option<usize>,
    /// 2x oversampling
    #[arg(long)]
    extra: bool,
    /// 4x oversampling
    #[arg(long)]
    extra4: bool,
    /// Global falloff distance scale
    #[arg(long)]
    dist: Option<f64>,
    /// Output range scale
    #[arg(long)]
    range: Option<f64>,
    /// Light culling gate
    #[arg(long)]
    gate: Option<f64>,
    /// Global minlight level
    #[arg(long)]
    light: Option<f64>,
    /// Add minlight instead of clamping to it
    #[arg(long)]
    addmin: bool,
    /// Lightmap gamma
    #[arg(long)]
    gamma: Option<f64>,
    /// Write a colored .lit sidecar
    #[arg(long)]
    lit: bool,
    /// Write a v2 .lit with the per-face table
    #[arg(long)]
    lit2: bool,
    /// Store RGB lighting as a BSPX lump
    #[arg(long)]
    bspx: bool,
    /// Write a .lux light-direction sidecar
    #[arg(long)]
    lux: bool,
    /// Soft-filter radius
    #[arg(long, num_args = 0..=1, default_missing_value = "1")]
    soft: Option<u32>,
    /// Enable dirtmapping
    #[arg(long)]
    dirt: bool,
    /// Visualize the dirt factor
    #[arg(long)]
    dirtdebug: bool,
    /// 0 ordered cone, 1 random cone
    #[arg(long)]
    dirtmode: Option<i32>,
    /// Dirt ray length
    #[arg(long)]
    dirtdepth: Option<f64>,
    /// Dirt intensity scale
    #[arg(long)]
    dirtscale: Option<f64>,
    /// Dirt gain exponent
    #[arg(long)]
    dirtgain: Option<f64>,
    /// Dirt cone half-angle
    #[arg(long)]
    dirtangle: Option<f64>,
    /// Sky-dome sun count target
    #[arg(long)]
    sunsamples: Option<u32>,
    /// World units per luxel
    #[arg(long)]
    lightmap_scale: Option<f64>,
    /// World units per luxel (decoupled lightmap)
    #[arg(long)]
    world_units_per_luxel: Option<f64>,
    /// Bounce pass count
    #[arg(long)]
    bounce: Option<i32>,
    /// HDR .lit output
    #[arg(long)]
    hdr: bool,
    /// HDR lighting as a BSPX lump
    #[arg(long)]
    bspxhdr: bool,
    /// Visibility culling: none, vis, rays
    #[arg(long, value_parser = parse_visapprox)]
    visapprox: Option<VisApprox>,
    /// Skip the vanilla greyscale lump when a BSPX variant is written
    #[arg(long)]
    novanilla: bool,
    /// Minlight and sun only
    #[arg(long)]
    nolights: bool,
    /// Visualize phong normals
    #[arg(long)]
    phongdebug: bool,
}

fn parse_visapprox(value: &str) -> Result<VisApprox, String> {
    match value {
        "none" => Ok(VisApprox::None),
        "vis" => Ok(VisApprox::Vis),
        "rays" => Ok(VisApprox::Rays),
        _ => Err(format!("unknown visapprox mode `{}`", value)),
    }
}

pub struct LightTool;

impl Cli for LightTool {
    fn name(&self) -> &'static str {
        "light"
    }

    fn cli(&self, args: &[String]) -> CliRes {
        let cli = match LightToolCli::try_parse_from(args) {
            Ok(cli) => cli,
            Err(err) => {
                let _ = err.print();
                return CliRes::Usage;
            }
        };

        let config = QforgeConfig::load();
        let mut light = Light::new();

        if let Some(threads) = cli.threads.or(config.threads) {
            light.threads(threads);
        }
        if cli.extra4 {
            light.extra4();
        } else if cli.extra {
            light.extra();
        }
        if let Some(v) = cli.dist {
            light.dist(v);
        }
        if let Some(v) = cli.range {
            light.range(v);
        }
        if let Some(v) = cli.gate {
            light.gate(v);
        }
        if let Some(v) = cli.light {
            light.minlight(v);
        }
        if cli.addmin {
            light.add_min();
        }
        if let Some(v) = cli.gamma {
            light.gamma(v);
        }
        if cli.lit {
            light.lit();
        }
        if cli.lit2 {
            light.lit2();
        }
        if cli.bspx {
            light.bspx();
        }
        if cli.lux {
            light.lux();
        }
        if let Some(radius) = cli.soft {
            light.soft(radius);
        }
        if cli.dirt {
            light.dirt(true);
        }
        if cli.dirtdebug {
            light.dirt_debug();
        }
        light.dirt_params(
            cli.dirtmode,
            cli.dirtdepth,
            cli.dirtscale,
            cli.dirtgain,
            cli.dirtangle,
        );
        if let Some(samples) = cli.sunsamples {
            light.sun_samples(samples);
        }
        if let Some(scale) = cli.lightmap_scale {
            light.world_units_per_luxel(scale);
        }
        if let Some(scale) = cli.world_units_per_luxel {
            light.world_units_per_luxel(scale);
        }
        if let Some(passes) = cli.bounce {
            light.bounce(passes);
        }
        if cli.hdr {
            light.hdr();
        }
        if cli.bspxhdr {
            light.bspx_hdr();
        }
        if let Some(mode) = cli.visapprox {
            light.vis_approx(mode);
        }
        if cli.novanilla {
            light.no_vanilla();
        }
        if cli.nolights {
            light.no_lights();
        }
        if cli.phongdebug {
            light.phong_debug();
        }

        match light.run(&cli.input) {
            Ok(report) => {
                for warning in &report.warnings {
                    eprintln!("WARNING: {}", warning);
                }
                CliRes::Ok
            }
            Err(err) => {
                eprintln!("{}", err);

                if err.to_string().contains("Cannot load") || err.to_string().contains("Cannot write")
                {
                    CliRes::Io
                } else {
                    CliRes::Usage
                }
            }
        }
    }
}

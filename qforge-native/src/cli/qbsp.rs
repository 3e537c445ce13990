use std::path::PathBuf;

use clap::Parser;

use bsp::BspFormat;
use qforge::{
    game::GameDef,
    modules::qbsp::{ConvertFormat, Qbsp},
};

use crate::config::QforgeConfig;

use super::{Cli, CliRes};

#[derive(Debug, Parser)]
#[command(name = "qbsp", version, about = "Compile a .map into a .bsp")]
struct QbspCli {
    /// Input .map file
    input: PathBuf,
    /// Output .bsp; defaults to the input with a .bsp extension
    output: Option<PathBuf>,

    /// Skip the outside-fill pass
    #[arg(long = "nofill")]
    no_fill: bool,
    /// Skip clip hull generation
    #[arg(long = "noclip")]
    no_clip: bool,
    /// Keep faces with the skip/hint textures
    #[arg(long = "noskip")]
    no_skip: bool,
    /// Treat func_detail brushes as structural
    #[arg(long = "nodetail")]
    no_detail: bool,
    /// Drop all detail brushes
    #[arg(long = "omitdetail")]
    omit_detail: bool,
    /// Drop func_detail_wall brushes
    #[arg(long = "omitdetailwall")]
    omit_detail_wall: bool,
    /// Drop func_detail_illusionary brushes
    #[arg(long = "omitdetailillusionary")]
    omit_detail_illusionary: bool,
    /// Drop func_detail_fence brushes
    #[arg(long = "omitdetailfence")]
    omit_detail_fence: bool,
    /// Only rebuild the entity lump
    #[arg(long = "onlyents")]
    only_ents: bool,
    /// Subdivide sky and liquid faces too
    #[arg(long = "splitspecial")]
    split_special: bool,
    /// Subdivide sky faces
    #[arg(long = "splitsky")]
    split_sky: bool,
    /// Subdivide liquid faces
    #[arg(long = "splitturb")]
    split_turb: bool,
    /// Water is transparent to vis (default)
    #[arg(long = "transwater")]
    trans_water: bool,
    /// Water blocks vis
    #[arg(long = "notranswater")]
    no_trans_water: bool,
    /// Write a GoldSrc (Half-Life) BSP
    #[arg(long = "hlbsp")]
    hlbsp: bool,
    /// Write a BSP2 file
    #[arg(long = "bsp2")]
    bsp2: bool,
    /// Write a BSP2rmq (2PSB) file
    #[arg(long = "2psb")]
    bsp2rmq: bool,
    /// Hexen II hull set
    #[arg(long = "hexen2")]
    hexen2: bool,
    /// Write a Quake II BSP
    #[arg(long = "q2bsp")]
    q2bsp: bool,
    /// Spacing of the leak trail points
    #[arg(long = "leakdist", default_value_t = 2.)]
    leak_dist: f64,
    /// Texture-space subdivision threshold
    #[arg(long = "subdivide", default_value_t = 240.)]
    subdivide: f64,
    /// Midsplit fallback node size
    #[arg(long = "maxnodesize", default_value_t = 1024.)]
    max_node_size: f64,
    /// WAD search directory
    #[arg(long = "wadpath")]
    wad_path: Vec<PathBuf>,
    /// Extra WAD search directory
    #[arg(long = "xwadpath")]
    xwad_path: Vec<PathBuf>,
    /// Convert the map between texture syntaxes instead of compiling
    #[arg(long = "convert", value_parser = parse_convert)]
    convert: Option<ConvertFormat>,
    /// Force the PRT1 portal format
    #[arg(long = "forceprt1")]
    force_prt1: bool,
    /// Treat a leak as a fatal error
    #[arg(long = "leaktest")]
    leak_test: bool,
}

fn parse_convert(value: &str) -> Result<ConvertFormat, String> {
    match value {
        "quake" => Ok(ConvertFormat::Quake),
        "quake2" => Ok(ConvertFormat::Quake2),
        "valve" => Ok(ConvertFormat::Valve),
        "bp" => Ok(ConvertFormat::BrushPrimitives),
        _ => Err(format!("unknown convert format `{}`", value)),
    }
}

pub struct QbspTool;

impl Cli for QbspTool {
    fn name(&self) -> &'static str {
        "qbsp"
    }

    fn cli(&self, args: &[String]) -> CliRes {
        let cli = match QbspCli::try_parse_from(args) {
            Ok(cli) => cli,
            Err(err) => {
                let _ = err.print();
                return CliRes::Usage;
            }
        };

        let config = QforgeConfig::load();
        let mut qbsp = Qbsp::new();

        if cli.hexen2 {
            qbsp.game(GameDef::hexen2());
        } else if cli.hlbsp {
            qbsp.game(GameDef::half_life());
        } else if cli.q2bsp {
            qbsp.game(GameDef::quake2());
        }

        if cli.bsp2 {
            qbsp.format(BspFormat::Bsp2);
        } else if cli.bsp2rmq {
            qbsp.format(BspFormat::Bsp2rmq);
        } else if let Some(format) = config.format.as_deref() {
            match format {
                "bsp2" => {
                    qbsp.format(BspFormat::Bsp2);
                }
                "2psb" => {
                    qbsp.format(BspFormat::Bsp2rmq);
                }
                _ => {}
            }
        }

        if cli.no_fill {
            qbsp.no_fill();
        }
        if cli.no_clip {
            qbsp.no_clip();
        }
        if cli.no_skip {
            qbsp.no_skip();
        }
        if cli.no_detail {
            qbsp.no_detail();
        }
        qbsp.omit_detail(
            cli.omit_detail,
            cli.omit_detail_wall,
            cli.omit_detail_illusionary,
            cli.omit_detail_fence,
        );
        if cli.only_ents {
            qbsp.only_ents();
        }
        if cli.split_special {
            qbsp.split_special();
        }
        if cli.split_sky {
            qbsp.split_sky();
        }
        if cli.split_turb {
            qbsp.split_turb();
        }
        if cli.no_trans_water {
            qbsp.trans_water(false);
        } else if cli.trans_water {
            qbsp.trans_water(true);
        }
        if cli.leak_test {
            qbsp.leak_test();
        }
        if cli.force_prt1 {
            qbsp.force_prt1();
        }
        if let Some(convert) = cli.convert {
            qbsp.convert(convert);
        }

        qbsp.leak_dist(cli.leak_dist)
            .subdivide(cli.subdivide)
            .max_node_size(cli.max_node_size);

        for path in config
            .wad_paths
            .iter()
            .chain(cli.wad_path.iter())
            .chain(cli.xwad_path.iter())
        {
            qbsp.wad_path(path);
        }

        match qbsp.run(&cli.input, cli.output.clone()) {
            Ok(_) => CliRes::Ok,
            Err(err) => {
                eprintln!("{}", err);

                if err.to_string().contains("leaktest") {
                    CliRes::Leak
                } else if err.to_string().contains("Cannot write")
                    || err.to_string().contains("Cannot read")
                {
                    CliRes::Io
                } else {
                    CliRes::Usage
                }
            }
        }
    }
}

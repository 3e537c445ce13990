use std::process::exit;

mod cli;
mod config;

use cli::{light::LightTool, qbsp::QbspTool, Cli, CliRes};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .format_target(false)
        .init();

    let tools: Vec<Box<dyn Cli>> = vec![Box::new(QbspTool), Box::new(LightTool)];

    let args: Vec<String> = std::env::args().collect();

    // The tool can be picked by the binary name (a qbsp/light symlink) or
    // by the first argument.
    let invoked = args[0]
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or("")
        .trim_end_matches(".exe")
        .to_string();

    if let Some(tool) = tools.iter().find(|t| t.name() == invoked) {
        exit(tool.cli(&args).exit_code());
    }

    if args.len() > 1 {
        if let Some(tool) = tools.iter().find(|t| t.name() == args[1]) {
            exit(tool.cli(&args[1..]).exit_code());
        }
    }

    eprintln!("usage: qforge <qbsp|light> [options] <input> [output]");
    exit(CliRes::Usage.exit_code());
}

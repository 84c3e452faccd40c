//! usd2gltf - convert USD(z) files to glTF/glb.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};

use usd2gltf_core::convert::{Converter, GltfConverter};
use usd2gltf_core::shade::normalize_st_primvar_readers_with;

/// Convert incoming USD(z) file to glTF/glb
#[derive(Parser, Debug)]
#[command(name = "usd2gltf", version, about, long_about = None)]
struct Cli {
    /// Input USD (.usd, .usda, .usdz)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output glTF (.gltf, .glb)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Interpolation of animation (LINEAR, STEP, CUBIC)
    #[arg(long, default_value = "LINEAR")]
    interpolation: String,

    /// Run in debug mode
    #[arg(short, long)]
    debug: bool,

    /// Flatten all animations into one animation
    #[arg(short, long)]
    flatten: bool,
}

fn main() -> Result<()> {
    if std::env::args_os().len() <= 1 {
        Cli::command().print_help()?;
        std::process::exit(1);
    }

    let cli = Cli::parse();
    init_logging(cli.debug);

    let mut converter = GltfConverter::new();
    run(&cli, &mut converter, &mut io::stdout().lock())
}

/// `--debug` forces debug output; otherwise `RUST_LOG` applies, defaulting to warnings.
fn init_logging(debug: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if debug {
        builder.filter_level(log::LevelFilter::Debug);
    } else if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(log::LevelFilter::Warn);
    }
    builder.init();
}

fn display(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "None".to_string())
}

/// Configure the converter, load, normalize material `st` readers and
/// write the output.
fn run<C: Converter>(cli: &Cli, converter: &mut C, out: &mut impl Write) -> Result<()> {
    writeln!(out, "Converting: {}\nTo: {}", display(&cli.input), display(&cli.output))?;

    let options = converter.options_mut();
    options.interpolation = cli.interpolation.clone();
    options.flatten_xform_animation = cli.flatten;

    // Missing paths are left for the converter to reject.
    let input = cli.input.as_deref().unwrap_or(Path::new(""));
    let output = cli.output.as_deref().unwrap_or(Path::new(""));

    let mut stage = converter
        .load_usd(input)
        .with_context(|| format!("Failed to load {}", input.display()))?;

    let mut printed = Ok(());
    let configured = normalize_st_primvar_readers_with(&mut stage, |material| {
        if printed.is_ok() {
            printed = writeln!(out, "Configured 'st' primvar reader for material: {}", material);
        }
    });
    printed?;
    configured.context("Failed to configure material primvar readers")?;

    converter
        .process(&stage, output)
        .with_context(|| format!("Failed to convert to {}", output.display()))?;

    writeln!(out, "Converted!")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use usd2gltf_core::convert::{ConvertResult, ConverterOptions};
    use usd2gltf_core::gltf::ExportError;
    use usd2gltf_core::usd::{load_stage_from_str, Stage};

    use super::*;

    const TWO_MATERIALS: &str = r#"#usda 1.0
def Scope "Looks"
{
    def Material "A"
    {
    }

    def Material "B"
    {
    }
}
"#;

    /// Records calls instead of converting.
    #[derive(Default)]
    struct RecordingConverter {
        options: ConverterOptions,
        loaded: RefCell<Vec<PathBuf>>,
        processed: RefCell<Vec<(PathBuf, usize)>>,
        source: &'static str,
        fail_process: bool,
    }

    impl Converter for RecordingConverter {
        fn options_mut(&mut self) -> &mut ConverterOptions {
            &mut self.options
        }

        fn load_usd(&self, path: &Path) -> ConvertResult<Stage> {
            self.loaded.borrow_mut().push(path.to_path_buf());
            Ok(load_stage_from_str(self.source, "test.usda")?)
        }

        fn process(&self, stage: &Stage, output: &Path) -> ConvertResult<()> {
            let readers = stage
                .traverse()
                .into_iter()
                .filter(|p| p.name() == "stReader")
                .count();
            self.processed.borrow_mut().push((output.to_path_buf(), readers));
            if self.fail_process {
                let io = std::io::Error::new(std::io::ErrorKind::NotFound, "no output path");
                return Err(ExportError::from(io).into());
            }
            Ok(())
        }
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("usd2gltf").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["-i", "in.usda"]);
        assert_eq!(cli.input, Some(PathBuf::from("in.usda")));
        assert_eq!(cli.output, None);
        assert_eq!(cli.interpolation, "LINEAR");
        assert!(!cli.debug);
        assert!(!cli.flatten);
    }

    #[test]
    fn test_options_reach_converter() {
        let cli = parse(&["-i", "in.usdz", "-o", "out.glb", "--interpolation", "CUBIC", "--flatten"]);
        let mut converter = RecordingConverter {
            source: TWO_MATERIALS,
            ..Default::default()
        };
        let mut out = Vec::new();

        run(&cli, &mut converter, &mut out).unwrap();

        assert_eq!(converter.options.interpolation, "CUBIC");
        assert!(converter.options.flatten_xform_animation);
        assert_eq!(*converter.loaded.borrow(), vec![PathBuf::from("in.usdz")]);
        // Both materials were given a reader before processing
        assert_eq!(*converter.processed.borrow(), vec![(PathBuf::from("out.glb"), 2)]);
    }

    #[test]
    fn test_run_output_lines() {
        let cli = parse(&["-i", "in.usda", "-o", "out.gltf"]);
        let mut converter = RecordingConverter {
            source: TWO_MATERIALS,
            ..Default::default()
        };
        let mut out = Vec::new();

        run(&cli, &mut converter, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            [
                "Converting: in.usda",
                "To: out.gltf",
                "Configured 'st' primvar reader for material: /Looks/A",
                "Configured 'st' primvar reader for material: /Looks/B",
                "Converted!",
            ]
        );
    }

    #[test]
    fn test_no_materials_prints_no_reader_lines() {
        let cli = parse(&["-i", "in.usda", "-o", "out.glb"]);
        let mut converter = RecordingConverter {
            source: "#usda 1.0\ndef Xform \"World\"\n{\n}\n",
            ..Default::default()
        };
        let mut out = Vec::new();

        run(&cli, &mut converter, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(!text.contains("Configured"));
        assert!(text.ends_with("Converted!\n"));
        assert_eq!(converter.processed.borrow()[0].1, 0);
    }

    #[test]
    fn test_missing_output_fails_in_process() {
        let cli = parse(&["-i", "in.usda"]);
        let mut converter = RecordingConverter {
            source: TWO_MATERIALS,
            fail_process: true,
            ..Default::default()
        };
        let mut out = Vec::new();

        let err = run(&cli, &mut converter, &mut out).unwrap_err();

        assert!(err.to_string().contains("Failed to convert"));
        assert_eq!(*converter.loaded.borrow(), vec![PathBuf::from("in.usda")]);
        assert_eq!(*converter.processed.borrow(), vec![(PathBuf::new(), 2)]);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("Converting: in.usda\nTo: None\n"));
        assert!(text.contains("Configured 'st' primvar reader for material: /Looks/B"));
        assert!(!text.contains("Converted!"));
    }

    #[test]
    fn test_missing_input_reaches_loader() {
        let cli = parse(&["-o", "out.glb"]);
        let mut converter = GltfConverter::new();
        let mut out = Vec::new();

        let err = run(&cli, &mut converter, &mut out).unwrap_err();

        assert!(err.to_string().contains("Failed to load"));
        assert!(String::from_utf8(out).unwrap().starts_with("Converting: None\nTo: out.glb"));
    }

    #[test]
    fn test_materials_printed_before_failure() {
        let cli = parse(&["-i", "in.usda", "-o", "out.glb"]);
        let mut converter = RecordingConverter {
            source: r#"#usda 1.0
def Material "A"
{
}

def Material "B"
{
    float inputs:frame:stPrimvarName = 1
}
"#,
            ..Default::default()
        };
        let mut out = Vec::new();

        let err = run(&cli, &mut converter, &mut out).unwrap_err();

        assert!(err.to_string().contains("Failed to configure"));
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Configured 'st' primvar reader for material: /A\n"));
        assert!(!text.contains("/B"));
        assert!(converter.processed.borrow().is_empty());
    }
}

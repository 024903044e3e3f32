//! Linguine CLI
//!
//! Command-line driver for the Linguine scripting language: compile
//! sources to bytecode images, run scripts, and inspect compiled code.

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{Shell, generate};
use linguine_core::{IMAGE_MAGIC, Image};
use linguine_runtime::{Runtime, TypedValue, Value};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "linguine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Linguine scripting language tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a .lin source file to a bytecode image
    Build {
        /// Input .lin source file
        input: PathBuf,

        /// Output image path (defaults to the input with a .lnb extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a script (source or compiled image)
    Run {
        /// Input .lin source or .lnb image file
        input: PathBuf,

        /// Function to call
        #[arg(long, default_value = "main")]
        entry: String,

        /// Arguments for the entry function; JSON scalars (42, 2.5,
        /// "text") or bare words, which pass as strings
        args: Vec<String>,

        /// Print the result as JSON instead of the display form
        #[arg(long)]
        json: bool,
    },

    /// Disassemble a source file or compiled image
    Disasm {
        /// Input .lin source or .lnb image file
        input: PathBuf,
    },

    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Build { input, output } => {
            let output = output.unwrap_or_else(|| input.with_extension("lnb"));
            run_build(&input, &output);
        }
        Commands::Run { input, entry, args, json } => run_run(&input, &entry, &args, json),
        Commands::Disasm { input } => run_disasm(&input),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
        }
    }
}

fn read_or_die(path: &Path) -> Vec<u8> {
    match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            eprintln!("error: cannot read {}: {e}", path.display());
            process::exit(1);
        }
    }
}

/// Compiled images start with the `LNGU` magic; anything else is source.
fn is_image(bytes: &[u8]) -> bool {
    bytes.starts_with(&IMAGE_MAGIC)
}

fn compile_source(path: &Path, bytes: &[u8]) -> Image {
    let Ok(text) = std::str::from_utf8(bytes) else {
        eprintln!("error: {} is not UTF-8 source", path.display());
        process::exit(1);
    };
    match lingc::compile(text) {
        Ok(image) => image,
        Err(e) => {
            eprintln!("{}: {e}", path.display());
            process::exit(1);
        }
    }
}

fn run_build(input: &Path, output: &Path) {
    let bytes = read_or_die(input);
    if is_image(&bytes) {
        eprintln!("error: {} is already a compiled image", input.display());
        process::exit(1);
    }
    let image = compile_source(input, &bytes);
    if let Err(e) = fs::write(output, image.to_bytes()) {
        eprintln!("error: cannot write {}: {e}", output.display());
        process::exit(1);
    }
}

fn run_disasm(input: &Path) {
    let bytes = read_or_die(input);
    let image = if is_image(&bytes) {
        match Image::from_bytes(&bytes) {
            Ok(image) => image,
            Err(e) => {
                eprintln!("{}: {e}", input.display());
                process::exit(1);
            }
        }
    } else {
        compile_source(input, &bytes)
    };
    print!("{image}");
}

fn run_run(input: &Path, entry: &str, raw_args: &[String], json: bool) {
    let bytes = read_or_die(input);
    let mut rt = Runtime::new();
    let loaded = if is_image(&bytes) {
        rt.load_image_bytes(&bytes)
    } else {
        match std::str::from_utf8(&bytes) {
            Ok(text) => rt.load_source(&input.display().to_string(), text),
            Err(_) => {
                eprintln!("error: {} is not UTF-8 source", input.display());
                process::exit(1);
            }
        }
    };
    if let Err(e) = loaded {
        eprintln!("{}: {e}", input.display());
        process::exit(1);
    }

    let mut args: Vec<Value> = Vec::with_capacity(raw_args.len());
    for raw in raw_args {
        let typed = parse_arg(raw);
        match rt.from_typed(&typed) {
            Ok(v) => args.push(v),
            Err(e) => {
                eprintln!("error: bad argument '{raw}': {e}");
                process::exit(1);
            }
        }
    }

    match rt.call(entry, &args) {
        Ok(value) => {
            if json {
                match rt.to_typed(value).map(|t| serde_json::to_string(&t)) {
                    Ok(Ok(text)) => println!("{text}"),
                    Ok(Err(e)) => {
                        eprintln!("error: cannot serialize result: {e}");
                        process::exit(1);
                    }
                    Err(e) => {
                        eprintln!("error: cannot export result: {e}");
                        process::exit(1);
                    }
                }
            } else {
                println!("{}", rt.display_value(value));
            }
        }
        Err(_) => {
            match rt.last_error() {
                Some(record) => eprintln!("{record}"),
                None => eprintln!("error: execution failed"),
            }
            process::exit(1);
        }
    }
}

/// JSON scalars pass through typed; anything that does not parse as JSON
/// is handed to the script as a plain string.
fn parse_arg(raw: &str) -> TypedValue {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(serde_json::Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                    return TypedValue::Int(i as i32);
                }
            }
            TypedValue::Float(n.as_f64().unwrap_or(0.0))
        }
        Ok(serde_json::Value::String(s)) => TypedValue::Str(s),
        _ => TypedValue::Str(raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_parse_as_json_scalars_or_strings() {
        assert_eq!(parse_arg("42"), TypedValue::Int(42));
        assert_eq!(parse_arg("-7"), TypedValue::Int(-7));
        assert_eq!(parse_arg("2.5"), TypedValue::Float(2.5));
        assert_eq!(parse_arg("\"quoted\""), TypedValue::Str("quoted".to_string()));
        assert_eq!(parse_arg("bare_word"), TypedValue::Str("bare_word".to_string()));
        assert_eq!(parse_arg("4000000000"), TypedValue::Float(4000000000.0));
    }

    #[test]
    fn image_sniffing() {
        assert!(is_image(b"LNGU rest"));
        assert!(!is_image(b"func main() {}"));
        assert!(!is_image(b""));
    }
}

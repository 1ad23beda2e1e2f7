mod generate;

use std::io::Read;
use std::path::PathBuf;
use std::process::exit;

use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "dbus-bridge-codegen", about = "Generates host-object declarations from D-Bus introspection XML")]
struct Args {
    /// Comma separated list of filter strings. Only matching interfaces are generated if set.
    #[structopt(short = "f", long, value_name = "FILTER", use_delimiter = true)]
    interfaces: Option<Vec<String>>,
    /// D-Bus XML introspection document. Reads from stdin otherwise.
    #[structopt(long, value_name = "FILE")]
    file: Option<PathBuf>,
    /// Write output into the specified file instead of stdout.
    #[structopt(short, long, value_name = "FILE")]
    output: Option<PathBuf>,
}

fn read_input(args: &Args) -> std::io::Result<String> {
    match &args.file {
        Some(path) => std::fs::read_to_string(path),
        None => {
            let mut s = String::new();
            std::io::stdin().read_to_string(&mut s)?;
            Ok(s)
        }
    }
}

fn main() {
    let args = Args::from_args();

    let xml = match read_input(&args) {
        Ok(xml) => xml,
        Err(e) => {
            eprintln!("dbus-bridge-codegen: {}", e);
            exit(2);
        }
    };

    let rendered = match generate::generate(&xml, args.interfaces.as_deref()) {
        Ok(rendered) => rendered,
        Err(e) => {
            eprintln!("dbus-bridge-codegen: {}", e);
            exit(1);
        }
    };

    let write_result = match &args.output {
        Some(path) => std::fs::write(path, rendered),
        None => {
            print!("{}", rendered);
            Ok(())
        }
    };

    if let Err(e) = write_result {
        eprintln!("dbus-bridge-codegen: {}", e);
        exit(2);
    }
}

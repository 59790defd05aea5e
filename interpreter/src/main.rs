use std::env;
use std::io;
use std::process;

use interpreter::Interpreter;
use tracing_subscriber::EnvFilter;

fn main() {
    let filter = EnvFilter::try_from_env("TAG_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let args: Vec<String> = env::args().collect();
    let path = match args.as_slice() {
        [_, path] => path,
        _ => {
            eprintln!("Usage: tag [script]");
            process::exit(64);
        }
    };

    let mut stdout = io::stdout();
    if let Err(err) = Interpreter::new(&mut stdout).run_file(path) {
        println!("{}", err);
        process::exit(1);
    };
}

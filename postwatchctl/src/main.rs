use clap::Parser;

fn main() {
    let cli = postwatchctl::Cli::parse();
    if let Err(err) = postwatchctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

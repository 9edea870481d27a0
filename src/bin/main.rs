use clap::Parser;

use ibd_ends::estimate_ends::EstimateEnds;

#[derive(Parser)]
#[command(
    name = "ibdends",
    version,
    about = "Probabilistic estimation of IBD segment endpoints"
)]
struct Cli {
    #[command(flatten)]
    args: EstimateEnds,
}

fn main() {
    let cli = Cli::parse();
    match cli.args.run() {
        Ok(()) => {}
        Err(err) => {
            eprintln!("ERROR: {err:#}");
            std::process::exit(1);
        }
    }
}

use clap::Parser;
use threadbare_serve::{init_tracing, run, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    if !args.write_config {
        init_tracing();
    }
    run(args).await
}

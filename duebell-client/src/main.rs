use clap::Parser;
use duebell_client::{Cli, run};

#[tokio::main]
async fn main() -> Result<(), duebell_client::AppError> {
    run(Cli::parse()).await
}

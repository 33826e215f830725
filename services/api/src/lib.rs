mod cli;
mod infra;
mod routes;
mod server;
mod traffic;

use reviews::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
